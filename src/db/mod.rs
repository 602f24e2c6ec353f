use crate::{
    config::Config,
    constants::{DB_RETRY_BASE_MS, DB_RETRY_MAX_ATTEMPTS},
    error::{is_contention, AppError, Result},
    models::*,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::future::Future;
use std::time::Duration;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .connect(&config.database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs `op`, retrying on lock/serialization contention with
    /// exponential backoff (100ms * 2^n, max 3 attempts).
    pub async fn with_contention_retry<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(AppError::Database(e))
                    if is_contention(&e) && attempt + 1 < DB_RETRY_MAX_ATTEMPTS =>
                {
                    let backoff = Duration::from_millis(DB_RETRY_BASE_MS << attempt);
                    tracing::warn!(
                        "DB contention (attempt {}/{}), retrying in {:?}: {}",
                        attempt + 1,
                        DB_RETRY_MAX_ATTEMPTS,
                        backoff,
                        e
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ==================== USER QUERIES ====================
impl Database {
    /// First interaction creates the row; later calls are no-ops.
    pub async fn ensure_user(&self, user_id: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (user_id) VALUES ($1)
             ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }
}

// ==================== CATALOG QUERIES ====================
impl Database {
    pub async fn get_product(&self, product_id: i64) -> Result<Option<Product>> {
        let row = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
            .bind(product_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn get_product_media(&self, product_ids: &[i64]) -> Result<Vec<ProductMedia>> {
        let rows = sqlx::query_as::<_, ProductMedia>(
            "SELECT * FROM product_media WHERE product_id = ANY($1) ORDER BY id ASC",
        )
        .bind(product_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Removes sold product rows and their media records. Only called after
    /// pickup details reached the buyer.
    pub async fn hard_delete_products(&self, product_ids: &[i64]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM product_media WHERE product_id = ANY($1)")
            .bind(product_ids)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM products WHERE id = ANY($1)")
            .bind(product_ids)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }
}

// ==================== DISCOUNT QUERIES ====================
impl Database {
    pub async fn get_discount_code(&self, code: &str) -> Result<Option<DiscountCode>> {
        let row =
            sqlx::query_as::<_, DiscountCode>("SELECT * FROM discount_codes WHERE code = $1")
                .bind(code)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    /// Resolves the reseller percentage for (user, product type). Any
    /// failure or missing row degrades to 0% rather than blocking a sale.
    pub async fn get_reseller_percent(&self, user_id: i64, product_type: &str) -> Decimal {
        let result = sqlx::query_as::<_, ResellerDiscount>(
            "SELECT rd.reseller_user_id, rd.product_type, rd.percent
             FROM reseller_discounts rd
             JOIN users u ON u.user_id = rd.reseller_user_id
             WHERE rd.reseller_user_id = $1
               AND rd.product_type = $2
               AND u.is_reseller = TRUE",
        )
        .bind(user_id)
        .bind(product_type)
        .fetch_optional(&self.pool)
        .await;

        match result {
            Ok(Some(discount)) => discount.percent,
            Ok(None) => Decimal::ZERO,
            Err(e) => {
                tracing::warn!(
                    "Reseller discount lookup failed for user {} type '{}', using full price: {}",
                    user_id,
                    product_type,
                    e
                );
                Decimal::ZERO
            }
        }
    }
}

// ==================== PENDING DEPOSIT QUERIES ====================
impl Database {
    #[allow(clippy::too_many_arguments)]
    pub async fn add_pending_deposit(
        &self,
        payment_id: &str,
        user_id: i64,
        target_eur: Decimal,
        expected_sol: Decimal,
        is_purchase: bool,
        basket_snapshot: Option<&serde_json::Value>,
        discount_code: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO pending_deposits
                (payment_id, user_id, currency, target_eur, expected_sol,
                 is_purchase, basket_snapshot, discount_code)
             VALUES ($1, $2, 'SOL', $3, $4, $5, $6, $7)",
        )
        .bind(payment_id)
        .bind(user_id)
        .bind(target_eur)
        .bind(expected_sol)
        .bind(is_purchase)
        .bind(basket_snapshot)
        .bind(discount_code)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_pending_deposit(&self, payment_id: &str) -> Result<Option<PendingDeposit>> {
        let row = sqlx::query_as::<_, PendingDeposit>(
            "SELECT * FROM pending_deposits WHERE payment_id = $1",
        )
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Deletes and returns the deposit. Whoever gets the row back owns the
    /// follow-up work (unreserve, notify); concurrent callers get None.
    pub async fn take_pending_deposit(&self, payment_id: &str) -> Result<Option<PendingDeposit>> {
        let row = sqlx::query_as::<_, PendingDeposit>(
            "DELETE FROM pending_deposits WHERE payment_id = $1 RETURNING *",
        )
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_expired_pending_deposits(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<PendingDeposit>> {
        let rows = sqlx::query_as::<_, PendingDeposit>(
            "SELECT * FROM pending_deposits WHERE created_at < $1 ORDER BY created_at ASC",
        )
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Deposits whose wallet already settled but whose follow-up work has
    /// not completed (the deposit row still exists).
    pub async fn list_stranded_deposits(&self) -> Result<Vec<PendingDeposit>> {
        let rows = sqlx::query_as::<_, PendingDeposit>(
            "SELECT pd.*
             FROM pending_deposits pd
             JOIN solana_wallets w ON w.order_id = pd.payment_id
             WHERE w.status IN ('paid', 'swept')
             ORDER BY pd.created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Whether an automatic credit with exactly this reason was already
    /// written. The reason strings embed the payment_id, which makes this
    /// the idempotency probe for refund/refill credits.
    pub async fn has_credit_with_reason(&self, reason: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(
                SELECT 1 FROM admin_log
                WHERE action = 'BALANCE_CREDIT_AUTO' AND reason = $1
            )",
        )
        .bind(reason)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}

// ==================== EPHEMERAL WALLET QUERIES ====================
impl Database {
    pub async fn insert_wallet(
        &self,
        user_id: i64,
        order_id: &str,
        public_key: &str,
        private_key_b64: &str,
        expected_sol: Decimal,
    ) -> Result<EphemeralWallet> {
        let row = sqlx::query_as::<_, EphemeralWallet>(
            "INSERT INTO solana_wallets
                (user_id, order_id, public_key, private_key, expected_sol, status)
             VALUES ($1, $2, $3, $4, $5, 'pending')
             RETURNING *",
        )
        .bind(user_id)
        .bind(order_id)
        .bind(public_key)
        .bind(private_key_b64)
        .bind(expected_sol)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_wallet_by_order(&self, order_id: &str) -> Result<Option<EphemeralWallet>> {
        let row = sqlx::query_as::<_, EphemeralWallet>(
            "SELECT * FROM solana_wallets WHERE order_id = $1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_wallets_by_status(&self, status: WalletStatus) -> Result<Vec<EphemeralWallet>> {
        let rows = sqlx::query_as::<_, EphemeralWallet>(
            "SELECT * FROM solana_wallets WHERE status = $1 ORDER BY created_at ASC",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_all_wallets(&self) -> Result<Vec<EphemeralWallet>> {
        let rows = sqlx::query_as::<_, EphemeralWallet>(
            "SELECT * FROM solana_wallets ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Conditional status transition; returns false when another writer got
    /// there first.
    pub async fn transition_wallet(
        &self,
        wallet_id: i64,
        from: WalletStatus,
        to: WalletStatus,
        amount_received: Option<Decimal>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE solana_wallets
             SET status = $1,
                 amount_received = COALESCE($2, amount_received),
                 updated_at = NOW()
             WHERE id = $3 AND status = $4",
        )
        .bind(to.as_str())
        .bind(amount_received)
        .bind(wallet_id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_wallet_status(&self, wallet_id: i64, to: WalletStatus) -> Result<()> {
        sqlx::query(
            "UPDATE solana_wallets SET status = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(to.as_str())
        .bind(wallet_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ==================== SETTINGS QUERIES ====================
impl Database {
    pub async fn get_setting(&self, key: &str) -> Result<Option<(String, DateTime<Utc>)>> {
        let row = sqlx::query_as::<_, (String, DateTime<Utc>)>(
            "SELECT value, updated_at FROM settings WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn upsert_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (key, value, updated_at)
             VALUES ($1, $2, NOW())
             ON CONFLICT (key) DO UPDATE
             SET value = EXCLUDED.value, updated_at = NOW()",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ==================== AUDIT QUERIES ====================
impl Database {
    #[allow(clippy::too_many_arguments)]
    pub async fn log_audit(
        &self,
        admin_id: i64,
        action: &str,
        target_user_id: Option<i64>,
        reason: Option<&str>,
        amount_change: Option<Decimal>,
        old_value: Option<Decimal>,
        new_value: Option<Decimal>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO admin_log
                (admin_id, action, target_user_id, reason, amount_change, old_value, new_value)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(admin_id)
        .bind(action)
        .bind(target_user_id)
        .bind(reason)
        .bind(amount_change)
        .bind(old_value)
        .bind(new_value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ==================== RESERVATION QUERIES ====================
impl Database {
    pub async fn list_user_reservations(&self, user_id: i64) -> Result<Vec<BasketReservation>> {
        let rows = sqlx::query_as::<_, BasketReservation>(
            "SELECT * FROM basket_reservations WHERE user_id = $1 ORDER BY reserved_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(database_url: &str) -> Config {
        Config {
            host: "0.0.0.0".to_string(),
            port: 3000,
            environment: "development".to_string(),
            database_url: database_url.to_string(),
            database_max_connections: 1,
            bot_token: "test-token".to_string(),
            primary_admin_id: 1,
            webhook_url: "".to_string(),
            support_handle: None,
            solana_rpc_url: "http://localhost:8899".to_string(),
            admin_wallet: "11111111111111111111111111111111".to_string(),
            recovery_wallet: None,
            basket_timeout_secs: 900,
            min_refill_eur: Decimal::new(500, 2),
            fee_adjustment_percent: Decimal::ZERO,
            media_dir: "media".to_string(),
            dex_quote_url: "http://localhost:9999".to_string(),
            coingecko_api_url: "http://localhost:9998".to_string(),
        }
    }

    #[tokio::test]
    async fn database_new_returns_error_on_invalid_url() {
        let config = test_config("not-a-url");
        let result = Database::new(&config).await;
        assert!(result.is_err());
    }
}
