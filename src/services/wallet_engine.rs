use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use rust_decimal::Decimal;
use solana_sdk::{pubkey::Pubkey, signature::Keypair, signer::Signer};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    config::Config,
    constants::{
        PAYMENT_TOLERANCE_NUM, PAYMENT_TOLERANCE_SCALE, PAYMENT_WINDOW_MINUTES,
        RECOVERY_BATCH_DELAY_SECS, RECOVERY_BATCH_SIZE, RECOVERY_DUST_LAMPORTS,
        TRANSFER_FEE_LAMPORTS,
    },
    db::Database,
    error::{AppError, Result},
    integrations::{SolanaRpc, TelegramClient},
    models::{EphemeralWallet, WalletStatus},
    services::price_oracle::PriceOracle,
    utils::{ceil_sol, lamports_to_sol, sol_to_lamports},
};

/// A freshly minted (or re-fetched) payment invoice.
#[derive(Debug, Clone)]
pub struct MintedInvoice {
    pub order_id: String,
    pub address: String,
    pub expected_sol: Decimal,
    pub quote_eur_per_sol: Decimal,
}

/// What the scanner observed for one settled wallet. The coordinator turns
/// these into finalizations, credits, and releases.
#[derive(Debug, Clone)]
pub enum SettlementEvent {
    Paid {
        order_id: String,
        user_id: i64,
        received_sol: Decimal,
        expected_sol: Decimal,
    },
    Underpaid {
        order_id: String,
        user_id: i64,
        received_sol: Decimal,
    },
    Expired {
        order_id: String,
        user_id: i64,
    },
}

/// One swept wallet in a recovery report.
#[derive(Debug, Clone)]
pub struct RecoveredFunds {
    pub address: String,
    pub sol: Decimal,
    pub eur_estimate: Option<Decimal>,
    pub signature: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Paid,
    Underpaid,
    Expired,
    StillPending,
}

/// Classifies a pending wallet from its observed balance and age. The
/// 0.5% tolerance absorbs price drift between invoice creation and the
/// user actually sending.
pub fn classify(balance_lamports: u64, expected_lamports: u64, age_minutes: i64) -> Classification {
    let scale = 10u128.pow(PAYMENT_TOLERANCE_SCALE);
    let threshold_crossed = (balance_lamports as u128) * scale
        >= (expected_lamports as u128) * (PAYMENT_TOLERANCE_NUM as u128);

    if balance_lamports > 0 && threshold_crossed {
        Classification::Paid
    } else if balance_lamports > 0 {
        Classification::Underpaid
    } else if age_minutes > PAYMENT_WINDOW_MINUTES {
        Classification::Expired
    } else {
        Classification::StillPending
    }
}

/// Lamports a sweep would move: balance minus the transfer fee, but only
/// when that remainder itself clears the fee floor.
pub fn sweepable_lamports(balance: u64) -> Option<u64> {
    let amount = balance.checked_sub(TRANSFER_FEE_LAMPORTS)?;
    if amount == 0 || amount <= TRANSFER_FEE_LAMPORTS {
        return None;
    }
    Some(amount)
}

/// EUR target converted at the quote, padded by the fee adjustment, then
/// rounded UP to five decimals.
pub fn expected_sol_for(eur: Decimal, quote: Decimal, fee_adjust_percent: Decimal) -> Decimal {
    let padded = eur * (Decimal::from(100) + fee_adjust_percent) / Decimal::from(100);
    ceil_sol(padded / quote)
}

/// Per-order keypair issuance, deposit observation, and treasury sweeps.
/// Status transitions are single-writer: only `scan` moves wallets out of
/// `pending`.
pub struct WalletEngine {
    db: Database,
    config: Config,
    rpc: SolanaRpc,
    oracle: Arc<PriceOracle>,
    bot: TelegramClient,
}

impl WalletEngine {
    pub fn new(
        db: Database,
        config: Config,
        rpc: SolanaRpc,
        oracle: Arc<PriceOracle>,
        bot: TelegramClient,
    ) -> Self {
        Self {
            db,
            config,
            rpc,
            oracle,
            bot,
        }
    }

    /// Mints a fresh keypair for the order and records the expected SOL
    /// amount. Idempotent on order_id: a repeat call returns the existing
    /// row untouched, never a second keypair.
    pub async fn mint(
        &self,
        user_id: i64,
        order_id: &str,
        eur_amount: Decimal,
    ) -> Result<MintedInvoice> {
        if let Some(existing) = self.db.get_wallet_by_order(order_id).await? {
            let implied_quote = if existing.expected_sol > Decimal::ZERO {
                eur_amount / existing.expected_sol
            } else {
                Decimal::ZERO
            };
            return Ok(MintedInvoice {
                order_id: existing.order_id,
                address: existing.public_key,
                expected_sol: existing.expected_sol,
                quote_eur_per_sol: implied_quote,
            });
        }

        let quote = self.oracle.quote_eur_per_sol().await?;
        let expected_sol = expected_sol_for(eur_amount, quote, self.config.fee_adjustment_percent);

        let keypair = Keypair::new();
        let public_key = keypair.pubkey().to_string();
        let private_key_b64 = BASE64.encode(keypair.to_bytes());

        let wallet = self
            .db
            .insert_wallet(user_id, order_id, &public_key, &private_key_b64, expected_sol)
            .await?;

        tracing::info!(
            "Minted payment wallet {} for order {} ({} SOL expected)",
            wallet.public_key,
            order_id,
            expected_sol
        );

        Ok(MintedInvoice {
            order_id: order_id.to_string(),
            address: wallet.public_key,
            expected_sol,
            quote_eur_per_sol: quote,
        })
    }

    /// One observation pass over every pending wallet. Classifies, applies
    /// the status transition, sweeps settled funds, and returns the events
    /// for the coordinator.
    pub async fn scan(&self) -> Result<Vec<SettlementEvent>> {
        let pending = self.db.list_wallets_by_status(WalletStatus::Pending).await?;
        let mut events = Vec::new();

        for wallet in pending {
            let pubkey = match Pubkey::from_str(&wallet.public_key) {
                Ok(k) => k,
                Err(e) => {
                    tracing::error!("Wallet {} has invalid public key: {}", wallet.id, e);
                    continue;
                }
            };

            let balance = match self.rpc.balance_lamports(&pubkey).await {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(
                        "Skipping wallet {} this pass, balance read failed: {}",
                        wallet.public_key,
                        e
                    );
                    continue;
                }
            };

            let expected_lamports = sol_to_lamports(wallet.expected_sol);
            let age_minutes = Utc::now()
                .signed_duration_since(wallet.created_at)
                .num_minutes();
            let received_sol = lamports_to_sol(balance);

            match classify(balance, expected_lamports, age_minutes) {
                Classification::Paid => {
                    if self
                        .db
                        .transition_wallet(
                            wallet.id,
                            WalletStatus::Pending,
                            WalletStatus::Paid,
                            Some(received_sol),
                        )
                        .await?
                    {
                        tracing::info!(
                            "Wallet {} paid: {} SOL received (expected {})",
                            wallet.public_key,
                            received_sol,
                            wallet.expected_sol
                        );
                        events.push(SettlementEvent::Paid {
                            order_id: wallet.order_id.clone(),
                            user_id: wallet.user_id,
                            received_sol,
                            expected_sol: wallet.expected_sol,
                        });
                        self.try_sweep(&wallet).await;
                    }
                }
                Classification::Underpaid => {
                    if self
                        .db
                        .transition_wallet(
                            wallet.id,
                            WalletStatus::Pending,
                            WalletStatus::Refunded,
                            Some(received_sol),
                        )
                        .await?
                    {
                        tracing::info!(
                            "Wallet {} underpaid: {} SOL received (expected {})",
                            wallet.public_key,
                            received_sol,
                            wallet.expected_sol
                        );
                        events.push(SettlementEvent::Underpaid {
                            order_id: wallet.order_id.clone(),
                            user_id: wallet.user_id,
                            received_sol,
                        });
                        self.try_sweep(&wallet).await;
                    }
                }
                Classification::Expired => {
                    if self
                        .db
                        .transition_wallet(
                            wallet.id,
                            WalletStatus::Pending,
                            WalletStatus::Expired,
                            None,
                        )
                        .await?
                    {
                        events.push(SettlementEvent::Expired {
                            order_id: wallet.order_id.clone(),
                            user_id: wallet.user_id,
                        });
                    }
                }
                Classification::StillPending => {}
            }
        }

        Ok(events)
    }

    async fn try_sweep(&self, wallet: &EphemeralWallet) {
        match self.sweep(wallet, &self.config.admin_wallet).await {
            Ok(Some(signature)) => {
                tracing::info!("Swept wallet {} to treasury: {}", wallet.public_key, signature);
            }
            Ok(None) => {
                tracing::debug!("Wallet {} below sweep floor, left as dust", wallet.public_key);
            }
            Err(e) => {
                tracing::error!("Sweep failed for wallet {}: {}", wallet.public_key, e);
            }
        }
    }

    /// Drains `balance - fee` lamports to `destination`. No-op at or below
    /// the fee floor. Validates that the stored key material still derives
    /// the recorded public key before signing; a mismatch marks the wallet
    /// corrupt and alerts the operator.
    pub async fn sweep(
        &self,
        wallet: &EphemeralWallet,
        destination: &str,
    ) -> Result<Option<String>> {
        let pubkey = Pubkey::from_str(&wallet.public_key)
            .map_err(|e| AppError::Internal(format!("bad wallet pubkey: {}", e)))?;
        let destination = Pubkey::from_str(destination)
            .map_err(|e| AppError::Internal(format!("bad destination pubkey: {}", e)))?;

        let balance = self.rpc.balance_lamports(&pubkey).await?;
        let Some(amount) = sweepable_lamports(balance) else {
            return Ok(None);
        };

        let keypair = self.load_validated_keypair(wallet).await?;

        let signature = self.rpc.transfer(&keypair, &destination, amount).await?;
        self.db
            .set_wallet_status(wallet.id, WalletStatus::Swept)
            .await?;

        Ok(Some(signature.to_string()))
    }

    async fn load_validated_keypair(&self, wallet: &EphemeralWallet) -> Result<Keypair> {
        let decoded = BASE64
            .decode(wallet.private_key.as_bytes())
            .map_err(|_| AppError::CorruptKey(wallet.public_key.clone()))?;
        let keypair = Keypair::from_bytes(&decoded)
            .map_err(|_| AppError::CorruptKey(wallet.public_key.clone()))?;

        if keypair.pubkey().to_string() != wallet.public_key {
            self.db
                .set_wallet_status(wallet.id, WalletStatus::Corrupt)
                .await?;
            let _ = self
                .bot
                .notify_admin(&format!(
                    "ALERT: stored key material for wallet {} (order {}) no longer derives its \
                     public key. Wallet skipped; manual recovery required.",
                    wallet.public_key, wallet.order_id
                ))
                .await;
            return Err(AppError::CorruptKey(wallet.public_key.clone()));
        }

        Ok(keypair)
    }

    /// Scans every wallet regardless of status and sweeps anything above
    /// the dust floor to `target` (falling back to the recovery wallet,
    /// then the treasury). Batched reads with a pause between batches to
    /// stay under RPC rate limits.
    pub async fn recover_stuck_funds(&self, target: Option<&str>) -> Result<Vec<RecoveredFunds>> {
        let destination = target
            .map(str::to_string)
            .or_else(|| self.config.recovery_wallet.clone())
            .unwrap_or_else(|| self.config.admin_wallet.clone());

        let wallets = self.db.list_all_wallets().await?;
        let quote = self.oracle.quote_eur_per_sol().await.ok();
        let mut recovered = Vec::new();

        for (batch_index, batch) in wallets.chunks(RECOVERY_BATCH_SIZE).enumerate() {
            if batch_index > 0 {
                tokio::time::sleep(Duration::from_secs(RECOVERY_BATCH_DELAY_SECS)).await;
            }

            for wallet in batch {
                let Ok(pubkey) = Pubkey::from_str(&wallet.public_key) else {
                    continue;
                };
                let balance = match self.rpc.balance_lamports(&pubkey).await {
                    Ok(b) => b,
                    Err(e) => {
                        tracing::warn!(
                            "Recovery balance read failed for {}: {}",
                            wallet.public_key,
                            e
                        );
                        continue;
                    }
                };
                if balance <= RECOVERY_DUST_LAMPORTS {
                    continue;
                }

                let sol = lamports_to_sol(balance);
                match self.sweep(wallet, &destination).await {
                    Ok(Some(signature)) => {
                        recovered.push(RecoveredFunds {
                            address: wallet.public_key.clone(),
                            sol,
                            eur_estimate: quote.map(|q| sol * q),
                            signature,
                        });
                    }
                    Ok(None) => {}
                    Err(AppError::CorruptKey(_)) => {
                        // Alert already raised; leave it for manual handling.
                    }
                    Err(e) => {
                        tracing::error!(
                            "Recovery sweep failed for wallet {}: {}",
                            wallet.public_key,
                            e
                        );
                    }
                }
            }
        }

        if !recovered.is_empty() {
            tracing::info!(
                "Recovered funds from {} wallets to {}",
                recovered.len(),
                destination
            );
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn sol(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn classify_exact_payment_is_paid() {
        // 0.05 SOL expected, exactly paid
        assert_eq!(classify(50_000_000, 50_000_000, 1), Classification::Paid);
    }

    #[test]
    fn classify_tolerance_boundary() {
        let expected = 1_000_000_000u64; // 1 SOL
        // 0.995 * expected: exactly on the tolerance line counts as paid
        assert_eq!(classify(995_000_000, expected, 1), Classification::Paid);
        // 0.994 * expected: under the line, refunded
        assert_eq!(classify(994_000_000, expected, 1), Classification::Underpaid);
    }

    #[test]
    fn classify_overpayment_is_paid() {
        assert_eq!(classify(150_000_000, 100_000_000, 5), Classification::Paid);
    }

    #[test]
    fn classify_empty_wallet_expires_after_window() {
        assert_eq!(classify(0, 50_000_000, 20), Classification::StillPending);
        assert_eq!(classify(0, 50_000_000, 21), Classification::Expired);
    }

    #[test]
    fn classify_partial_payment_refunds_even_after_window() {
        assert_eq!(classify(10_000_000, 50_000_000, 30), Classification::Underpaid);
    }

    #[test]
    fn sweep_floor_boundaries() {
        assert_eq!(sweepable_lamports(5_000), None);
        // 5001: remainder of 1 lamport cannot clear the fee floor
        assert_eq!(sweepable_lamports(5_001), None);
        assert_eq!(sweepable_lamports(10_000), None);
        assert_eq!(sweepable_lamports(10_001), Some(5_001));
        assert_eq!(sweepable_lamports(1_000_000_000), Some(999_995_000));
    }

    #[test]
    fn expected_sol_exact_conversion() {
        // 10 EUR at 200 EUR/SOL with no fee adjustment
        let expected = expected_sol_for(sol("10"), sol("200"), Decimal::ZERO);
        assert_eq!(expected, sol("0.05000"));
    }

    #[test]
    fn expected_sol_rounds_up() {
        // 10 EUR at 143 EUR/SOL = 0.069930069... rounds up at 5dp
        let expected = expected_sol_for(sol("10"), sol("143"), Decimal::ZERO);
        assert_eq!(expected, sol("0.06994"));
    }

    #[test]
    fn expected_sol_applies_fee_adjustment() {
        // 2% adjustment on 10 EUR at 200 EUR/SOL
        let expected = expected_sol_for(sol("10"), sol("200"), sol("2"));
        assert_eq!(expected, sol("0.05100"));
    }
}
