use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::{
    config::Config,
    constants::{
        FINALIZE_MAX_ATTEMPTS, FINALIZE_RETRY_BASE_SECS, PAYMENT_TOLERANCE_NUM,
        PAYMENT_TOLERANCE_SCALE, PAYMENT_WINDOW_MINUTES,
    },
    db::Database,
    error::{AppError, Result},
    integrations::{SolanaRpc, TelegramClient},
    models::{PendingDeposit, ProductMedia, SnapshotItem},
    services::{
        ledger, pricing,
        price_oracle::PriceOracle,
        reservations,
        wallet_engine::{SettlementEvent, WalletEngine},
    },
    utils::{floor_cents, format_eur},
};

/// Everything the front-end needs to show a payment invoice.
#[derive(Debug, Clone)]
pub struct InvoiceDetails {
    pub payment_id: String,
    pub address: String,
    pub expected_sol: Decimal,
    pub target_eur: Decimal,
    pub expires_minutes: i64,
}

/// Orchestrates an order from basket to settlement: invoice creation,
/// settlement handling, cancellation, and the post-exhaustion recovery
/// artifacts. Finalization is keyed on payment_id: the deposit row is
/// claimed inside the finalize transaction and an in-flight set keeps two
/// attempts for the same payment from racing.
pub struct OrderCoordinator {
    db: Database,
    config: Config,
    bot: TelegramClient,
    oracle: Arc<PriceOracle>,
    wallets: Arc<WalletEngine>,
    rpc: SolanaRpc,
    in_flight: Mutex<HashSet<String>>,
}

impl OrderCoordinator {
    pub fn new(
        db: Database,
        config: Config,
        bot: TelegramClient,
        oracle: Arc<PriceOracle>,
        wallets: Arc<WalletEngine>,
        rpc: SolanaRpc,
    ) -> Self {
        Self {
            db,
            config,
            bot,
            oracle,
            wallets,
            rpc,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    // ==================== INVOICE CREATION ====================

    /// Crypto basket payment: snapshot the reserved basket, re-validate the
    /// coupon, mint a payment wallet, persist the pending deposit.
    pub async fn create_purchase_invoice(
        &self,
        user_id: i64,
        discount_code: Option<&str>,
        quoted_total: Option<Decimal>,
    ) -> Result<InvoiceDetails> {
        let reservations = self.db.list_user_reservations(user_id).await?;
        if reservations.is_empty() {
            return Err(AppError::BadRequest("basket is empty".to_string()));
        }

        let snapshot = pricing::snapshot_from_reservations(&self.db, user_id, &reservations).await?;
        let subtotal = pricing::snapshot_subtotal(&snapshot);

        // Coupon state can change between basket display and this point;
        // re-validate against the fresh subtotal before touching money.
        let final_total = match discount_code {
            Some(code) => {
                let outcome = pricing::validate_discount(&self.db, code, subtotal).await?;
                if let Some(quoted) = quoted_total {
                    pricing::verify_quoted_total(outcome.discounted_total, quoted)?;
                }
                outcome.discounted_total
            }
            None => subtotal,
        };

        let payment_id = make_order_id(user_id, true);
        let minted = self.wallets.mint(user_id, &payment_id, final_total).await?;

        let snapshot_json = serde_json::to_value(&snapshot)
            .map_err(|e| AppError::Internal(format!("snapshot encode: {}", e)))?;
        self.db
            .add_pending_deposit(
                &payment_id,
                user_id,
                final_total,
                minted.expected_sol,
                true,
                Some(&snapshot_json),
                discount_code,
            )
            .await?;

        tracing::info!(
            "Created purchase invoice {} for user {}: {} EUR = {} SOL at {} EUR/SOL",
            payment_id,
            user_id,
            final_total,
            minted.expected_sol,
            minted.quote_eur_per_sol
        );

        Ok(InvoiceDetails {
            payment_id,
            address: minted.address,
            expected_sol: minted.expected_sol,
            target_eur: final_total,
            expires_minutes: PAYMENT_WINDOW_MINUTES,
        })
    }

    /// Balance top-up invoice: no basket, no coupon.
    pub async fn create_refill_invoice(
        &self,
        user_id: i64,
        eur_amount: Decimal,
    ) -> Result<InvoiceDetails> {
        if eur_amount < self.config.min_refill_eur {
            return Err(AppError::BadRequest(format!(
                "minimum top-up is {} EUR",
                format_eur(self.config.min_refill_eur)
            )));
        }

        let payment_id = make_order_id(user_id, false);
        let minted = self.wallets.mint(user_id, &payment_id, eur_amount).await?;
        self.db
            .add_pending_deposit(
                &payment_id,
                user_id,
                eur_amount,
                minted.expected_sol,
                false,
                None,
                None,
            )
            .await?;

        tracing::info!(
            "Created refill invoice {} for user {}: {} EUR = {} SOL at {} EUR/SOL",
            payment_id,
            user_id,
            eur_amount,
            minted.expected_sol,
            minted.quote_eur_per_sol
        );

        Ok(InvoiceDetails {
            payment_id,
            address: minted.address,
            expected_sol: minted.expected_sol,
            target_eur: eur_amount,
            expires_minutes: PAYMENT_WINDOW_MINUTES,
        })
    }

    /// Internal-balance purchase: debit, finalize, deliver. Compensation
    /// on failure is the ledger's job.
    pub async fn pay_with_balance(
        &self,
        user_id: i64,
        discount_code: Option<&str>,
    ) -> Result<Decimal> {
        let held = self.db.list_user_reservations(user_id).await?;
        if held.is_empty() {
            return Err(AppError::BadRequest("basket is empty".to_string()));
        }

        let snapshot = pricing::snapshot_from_reservations(&self.db, user_id, &held).await?;
        let subtotal = pricing::snapshot_subtotal(&snapshot);
        let final_total = match discount_code {
            Some(code) => {
                pricing::validate_discount(&self.db, code, subtotal)
                    .await?
                    .discounted_total
            }
            None => subtotal,
        };

        let outcome = ledger::debit_then_finalize(
            &self.db,
            &self.bot,
            user_id,
            final_total,
            &snapshot,
            discount_code,
        )
        .await?;

        self.deliver_and_cleanup(user_id, &snapshot, &outcome.product_ids)
            .await;
        Ok(outcome.total_paid)
    }

    // ==================== SETTLEMENT ====================

    /// Entry point for scanner events. Safe to call with duplicates: the
    /// pending-deposit row is the idempotency token.
    pub async fn on_settlement(&self, event: SettlementEvent) {
        let result = match event {
            SettlementEvent::Paid {
                order_id,
                user_id,
                received_sol,
                expected_sol,
            } => {
                self.handle_paid(&order_id, user_id, received_sol, expected_sol)
                    .await
            }
            SettlementEvent::Underpaid {
                order_id,
                user_id,
                received_sol,
            } => self.handle_underpaid(&order_id, user_id, received_sol).await,
            SettlementEvent::Expired { order_id, user_id } => {
                self.handle_expired(&order_id, user_id).await
            }
        };

        if let Err(e) = result {
            tracing::error!("Settlement handling failed: {}", e);
        }
    }

    async fn handle_paid(
        &self,
        payment_id: &str,
        user_id: i64,
        received_sol: Decimal,
        expected_sol: Decimal,
    ) -> Result<()> {
        if !self.claim(payment_id).await {
            tracing::debug!("Settlement for {} already in flight", payment_id);
            return Ok(());
        }
        let result = self
            .handle_paid_inner(payment_id, user_id, received_sol, expected_sol)
            .await;
        self.release_claim(payment_id).await;
        result
    }

    async fn handle_paid_inner(
        &self,
        payment_id: &str,
        user_id: i64,
        received_sol: Decimal,
        expected_sol: Decimal,
    ) -> Result<()> {
        let Some(deposit) = self.db.get_pending_deposit(payment_id).await? else {
            // Cancelled (or timed out) before the funds landed: refund the
            // inflow to the user's balance rather than keeping it.
            return self
                .refund_orphan_inflow(payment_id, user_id, received_sol)
                .await;
        };

        self.credit_overpayment_if_due(&deposit, received_sol, expected_sol)
            .await?;

        let signature = self.incoming_signature(payment_id).await;
        if let Some(sig) = &signature {
            tracing::info!("Payment {} settled on-chain, tx {}", payment_id, sig);
        }

        if deposit.is_purchase {
            let snapshot = deposit.snapshot_items();
            let outcome = self
                .finalize_with_retry(&deposit, &snapshot)
                .await?;
            if outcome.already_done {
                return Ok(());
            }
            let _ = self
                .bot
                .notify_admin(&format!(
                    "Purchase log: payment {} by user {}, {} items, {} EUR, tx {}",
                    payment_id,
                    user_id,
                    outcome.product_ids.len(),
                    format_eur(outcome.total_paid),
                    signature.as_deref().unwrap_or("unknown"),
                ))
                .await;
            if let Err(e) = self
                .bot
                .send_message(user_id, "Purchase complete! Pickup details below:")
                .await
            {
                tracing::warn!("Could not send purchase header to {}: {}", user_id, e);
            }
            self.deliver_and_cleanup(user_id, &snapshot, &outcome.product_ids)
                .await;
        } else {
            self.settle_refill(&deposit).await?;
        }

        Ok(())
    }

    /// Credits `(received - expected) * q_now` to the buyer, at most once
    /// per payment. Gated on the audit reason like every other automatic
    /// credit, so recovery replays cannot double-credit.
    async fn credit_overpayment_if_due(
        &self,
        deposit: &PendingDeposit,
        received_sol: Decimal,
        expected_sol: Decimal,
    ) -> Result<()> {
        let over_sol = received_sol - expected_sol;
        if over_sol <= Decimal::ZERO {
            return Ok(());
        }
        let reason = format!("Overpayment for payment {}", deposit.payment_id);
        if self.db.has_credit_with_reason(&reason).await? {
            return Ok(());
        }
        let quote_now = self.quote_or_implied(deposit).await;
        let over_eur = floor_cents(over_sol * quote_now);
        if over_eur > Decimal::ZERO {
            ledger::credit(&self.db, &self.bot, deposit.user_id, over_eur, &reason).await?;
        }
        Ok(())
    }

    async fn settle_refill(&self, deposit: &PendingDeposit) -> Result<()> {
        let reason = format!("Refill payment {}", deposit.payment_id);
        if !self.db.has_credit_with_reason(&reason).await? {
            ledger::credit(&self.db, &self.bot, deposit.user_id, deposit.target_eur, &reason)
                .await?;
        }
        self.db.take_pending_deposit(&deposit.payment_id).await?;
        Ok(())
    }

    async fn handle_underpaid(
        &self,
        payment_id: &str,
        user_id: i64,
        received_sol: Decimal,
    ) -> Result<()> {
        let Some(deposit) = self.db.take_pending_deposit(payment_id).await? else {
            return self
                .refund_orphan_inflow(payment_id, user_id, received_sol)
                .await;
        };

        let quote_now = self.quote_or_implied(&deposit).await;
        let refund_eur = floor_cents(received_sol * quote_now);
        let reason = format!("Underpayment refund for payment {}", payment_id);
        if refund_eur > Decimal::ZERO && !self.db.has_credit_with_reason(&reason).await? {
            ledger::credit(&self.db, &self.bot, user_id, refund_eur, &reason).await?;
        }

        if deposit.is_purchase {
            reservations::release_basket(&self.db, user_id).await?;
        }
        Ok(())
    }

    async fn handle_expired(&self, payment_id: &str, user_id: i64) -> Result<()> {
        let Some(deposit) = self.db.take_pending_deposit(payment_id).await? else {
            return Ok(());
        };

        if deposit.is_purchase {
            reservations::release_basket(&self.db, user_id).await?;
        }
        if let Err(e) = self
            .bot
            .send_message(
                user_id,
                "Payment timeout: your payment window has expired. Reserved items have been released.",
            )
            .await
        {
            tracing::warn!("Could not send timeout notice to {}: {}", user_id, e);
        }
        Ok(())
    }

    /// Funds that arrived for an order with no pending deposit (cancelled
    /// or already timed out) are credited to the user instead of stranded.
    async fn refund_orphan_inflow(
        &self,
        payment_id: &str,
        user_id: i64,
        received_sol: Decimal,
    ) -> Result<()> {
        let reason = format!("Refund: payment {} received after cancellation", payment_id);
        if received_sol <= Decimal::ZERO || self.db.has_credit_with_reason(&reason).await? {
            return Ok(());
        }
        let quote = self.oracle.quote_eur_per_sol().await?;
        let eur = floor_cents(received_sol * quote);
        if eur > Decimal::ZERO {
            ledger::credit(&self.db, &self.bot, user_id, eur, &reason).await?;
        }
        Ok(())
    }

    // ==================== CANCEL ====================

    /// User-initiated cancel: removes the pending deposit and releases the
    /// reserved items. The scanner still observes the wallet, so funds
    /// that arrive anyway get refunded as an orphan inflow.
    pub async fn cancel_payment(&self, user_id: i64, payment_id: &str) -> Result<bool> {
        let Some(deposit) = self.db.get_pending_deposit(payment_id).await? else {
            return Ok(false);
        };
        if deposit.user_id != user_id {
            return Err(AppError::BadRequest("payment belongs to another user".to_string()));
        }

        let Some(deposit) = self.db.take_pending_deposit(payment_id).await? else {
            return Ok(false);
        };
        if deposit.is_purchase {
            reservations::release_basket(&self.db, user_id).await?;
        }
        tracing::info!("User {} cancelled payment {}", user_id, payment_id);
        Ok(true)
    }

    // ==================== RETRY & RECOVERY ====================

    async fn finalize_with_retry(
        &self,
        deposit: &PendingDeposit,
        snapshot: &[SnapshotItem],
    ) -> Result<reservations::FinalizeOutcome> {
        let mut last_err: Option<AppError> = None;
        for attempt in 0..FINALIZE_MAX_ATTEMPTS {
            if attempt > 0 {
                let wait = FINALIZE_RETRY_BASE_SECS * 3u64.pow(attempt);
                tracing::info!(
                    "Retrying finalization for {} in {}s (attempt {}/{})",
                    deposit.payment_id,
                    wait,
                    attempt + 1,
                    FINALIZE_MAX_ATTEMPTS
                );
                tokio::time::sleep(Duration::from_secs(wait)).await;
            }

            match reservations::finalize(
                &self.db,
                deposit.user_id,
                snapshot,
                deposit.discount_code.as_deref(),
                Some(&deposit.payment_id),
            )
            .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    tracing::error!(
                        "Finalization attempt {} failed for {}: {}",
                        attempt + 1,
                        deposit.payment_id,
                        e
                    );
                    last_err = Some(e);
                }
            }
        }

        // Exhausted: durable critical record, page the operator, keep the
        // pending deposit as the recoverable artifact.
        let detail = format!(
            "payment {} for user {} settled but finalization failed after {} attempts: {:?}",
            deposit.payment_id, deposit.user_id, FINALIZE_MAX_ATTEMPTS, last_err
        );
        if let Err(e) = self
            .db
            .log_audit(
                0,
                "FINALIZE_EXHAUSTED",
                Some(deposit.user_id),
                Some(&detail),
                Some(deposit.target_eur),
                None,
                None,
            )
            .await
        {
            tracing::error!("Could not write finalize-exhausted audit entry: {}", e);
        }
        let _ = self
            .bot
            .notify_admin(&format!(
                "CRITICAL: payment received but finalization failed repeatedly. {}",
                detail
            ))
            .await;

        Err(last_err.unwrap_or_else(|| AppError::FinalizeFailed("unknown".to_string())))
    }

    /// Recovery job body: replays stranded settlements (wallet settled,
    /// deposit still present) from the wallet's recorded amount — the
    /// overpayment credit, then finalization or the refill/underpayment
    /// credit, each gated by its own idempotency token.
    pub async fn run_recovery_tick(&self) -> Result<()> {
        let stranded = self.db.list_stranded_deposits().await?;
        for deposit in stranded {
            if !self.claim(&deposit.payment_id).await {
                continue;
            }
            tracing::warn!(
                "Recovering stranded settlement {} (user {})",
                deposit.payment_id,
                deposit.user_id
            );

            let result = self.recover_stranded(&deposit).await;

            self.release_claim(&deposit.payment_id).await;
            if let Err(e) = result {
                tracing::error!("Recovery failed for {}: {}", deposit.payment_id, e);
            }
        }
        Ok(())
    }

    async fn recover_stranded(&self, deposit: &PendingDeposit) -> Result<()> {
        let Some(wallet) = self.db.get_wallet_by_order(&deposit.payment_id).await? else {
            return Err(AppError::Internal(format!(
                "no wallet row for stranded payment {}",
                deposit.payment_id
            )));
        };
        let received_sol = wallet.amount_received.unwrap_or(Decimal::ZERO);

        // The wallet may already be swept, which erases the paid/refunded
        // distinction from its status; the recorded amount decides which
        // settlement this was.
        if !settled_within_tolerance(received_sol, wallet.expected_sol) {
            return self
                .handle_underpaid(&deposit.payment_id, deposit.user_id, received_sol)
                .await;
        }

        if let Err(e) = self
            .credit_overpayment_if_due(deposit, received_sol, wallet.expected_sol)
            .await
        {
            tracing::error!(
                "Overpayment replay failed for {}: {}",
                deposit.payment_id,
                e
            );
        }

        if deposit.is_purchase {
            let snapshot = deposit.snapshot_items();
            let outcome = self.finalize_with_retry(deposit, &snapshot).await?;
            if !outcome.already_done {
                self.deliver_and_cleanup(deposit.user_id, &snapshot, &outcome.product_ids)
                    .await;
            }
            Ok(())
        } else {
            self.settle_refill(deposit).await
        }
    }

    /// Payment-timeout job body: removes deposits past the payment window,
    /// releases their reservations, and notifies the affected users.
    pub async fn run_payment_timeout_tick(&self) -> Result<()> {
        let cutoff = Utc::now() - ChronoDuration::minutes(PAYMENT_WINDOW_MINUTES);
        let expired = self.db.list_expired_pending_deposits(cutoff).await?;

        for deposit in expired {
            // The wallet may have settled in the meantime; leave those to
            // the scanner and recovery paths.
            if let Ok(Some(wallet)) = self.db.get_wallet_by_order(&deposit.payment_id).await {
                if wallet.status() != crate::models::WalletStatus::Pending {
                    continue;
                }
            }
            let Some(deposit) = self.db.take_pending_deposit(&deposit.payment_id).await? else {
                continue;
            };
            if deposit.is_purchase {
                reservations::release_basket(&self.db, deposit.user_id).await?;
            }
            if let Err(e) = self
                .bot
                .send_message(
                    deposit.user_id,
                    "Payment timeout: your payment for basket items has expired. Reserved items have been released.",
                )
                .await
            {
                tracing::warn!("Could not send timeout notice to {}: {}", deposit.user_id, e);
            }
        }
        Ok(())
    }

    // ==================== DELIVERY ====================

    /// Post-commit pickup delivery. Product rows (and their media
    /// directories) are deleted only when everything reached the buyer; a
    /// failed delivery keeps the rows so support can re-deliver manually.
    pub async fn deliver_and_cleanup(
        &self,
        user_id: i64,
        snapshot: &[SnapshotItem],
        product_ids: &[i64],
    ) {
        if product_ids.is_empty() {
            return;
        }

        match self.deliver_pickup_details(user_id, snapshot, product_ids).await {
            Ok(()) => {
                if let Err(e) = self.db.hard_delete_products(product_ids).await {
                    tracing::error!("Could not delete sold product rows {:?}: {}", product_ids, e);
                    return;
                }
                for product_id in product_ids {
                    let dir = format!("{}/{}", self.config.media_dir, product_id);
                    if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            tracing::warn!("Could not remove media dir {}: {}", dir, e);
                        }
                    }
                }
            }
            Err(e) => {
                tracing::error!("Media delivery failed for user {}: {}", user_id, e);
                let _ = self
                    .bot
                    .notify_admin(&format!(
                        "URGENT: media delivery failed for user {}. Payment succeeded but \
                         products not delivered. Products: {:?}. Error: {}",
                        user_id, product_ids, e
                    ))
                    .await;
                let mut notice = "Payment successful, but we hit a technical issue delivering \
                                  your items. Delivery status: PENDING. Our support team has \
                                  been notified."
                    .to_string();
                if let Some(handle) = &self.config.support_handle {
                    notice.push_str(&format!(" You can also reach us at {}.", handle));
                }
                let _ = self.bot.send_message(user_id, &notice).await;
            }
        }
    }

    async fn deliver_pickup_details(
        &self,
        user_id: i64,
        snapshot: &[SnapshotItem],
        product_ids: &[i64],
    ) -> Result<()> {
        let media = self.db.get_product_media(product_ids).await?;

        for item in snapshot {
            let item_media: Vec<ProductMedia> = media
                .iter()
                .filter(|m| m.product_id == item.product_id)
                .cloned()
                .collect();

            let groupable: Vec<ProductMedia> = item_media
                .iter()
                .filter(|m| m.media_type == "photo" || m.media_type == "video")
                .cloned()
                .collect();
            if !groupable.is_empty() {
                self.bot.send_media_group(user_id, &groupable).await?;
            }
            for animation in item_media.iter().filter(|m| m.media_type == "gif") {
                self.bot.send_animation(user_id, animation).await?;
            }

            let pickup = item
                .pickup_text
                .as_deref()
                .unwrap_or("(No specific pickup details provided)");
            let text = format!("--- Item: {} {} ---\n\n{}", item.name, item.size, pickup);
            self.bot.send_message(user_id, &text).await?;
        }

        Ok(())
    }

    // ==================== HELPERS ====================

    /// q_now for converting observed SOL to EUR; falls back to the rate
    /// implied by the invoice when every upstream is down.
    async fn quote_or_implied(&self, deposit: &PendingDeposit) -> Decimal {
        match self.oracle.quote_eur_per_sol().await {
            Ok(q) => q,
            Err(_) if deposit.expected_sol > Decimal::ZERO => {
                deposit.target_eur / deposit.expected_sol
            }
            Err(_) => Decimal::ZERO,
        }
    }

    async fn incoming_signature(&self, order_id: &str) -> Option<String> {
        let wallet = self.db.get_wallet_by_order(order_id).await.ok()??;
        let pubkey = Pubkey::from_str(&wallet.public_key).ok()?;
        self.rpc.latest_signature(&pubkey).await
    }

    async fn claim(&self, payment_id: &str) -> bool {
        self.in_flight.lock().await.insert(payment_id.to_string())
    }

    async fn release_claim(&self, payment_id: &str) {
        self.in_flight.lock().await.remove(payment_id);
    }
}

/// Decimal counterpart of the scanner's lamport classification: a payment
/// settles as paid when received >= 0.995 * expected.
fn settled_within_tolerance(received_sol: Decimal, expected_sol: Decimal) -> bool {
    received_sol > Decimal::ZERO
        && received_sol * Decimal::from(10u32.pow(PAYMENT_TOLERANCE_SCALE))
            >= expected_sol * Decimal::from(PAYMENT_TOLERANCE_NUM)
}

/// `USER{id}_{PURCHASE|REFILL}_{unix}_{6 hex chars}`.
pub fn make_order_id(user_id: i64, is_purchase: bool) -> String {
    let kind = if is_purchase { "PURCHASE" } else { "REFILL" };
    format!(
        "USER{}_{}_{}_{}",
        user_id,
        kind,
        Utc::now().timestamp(),
        hex::encode(rand::random::<[u8; 3]>())
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_id_carries_user_and_kind() {
        let id = make_order_id(42, true);
        assert!(id.starts_with("USER42_PURCHASE_"));
        let id = make_order_id(7, false);
        assert!(id.starts_with("USER7_REFILL_"));
    }

    #[test]
    fn order_ids_are_unique_enough() {
        let a = make_order_id(1, true);
        let b = make_order_id(1, true);
        assert_ne!(a, b);
    }

    #[test]
    fn tolerance_boundary_matches_scanner() {
        use std::str::FromStr;
        let expected = Decimal::from_str("1").unwrap();
        assert!(settled_within_tolerance(
            Decimal::from_str("0.995").unwrap(),
            expected
        ));
        assert!(!settled_within_tolerance(
            Decimal::from_str("0.994").unwrap(),
            expected
        ));
        assert!(!settled_within_tolerance(Decimal::ZERO, expected));
    }
}
