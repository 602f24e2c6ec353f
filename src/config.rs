use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::str::FromStr;

use crate::constants::DEFAULT_SOLANA_RPC_URL;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Server
    pub host: String,
    pub port: u16,
    pub environment: String,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Telegram
    pub bot_token: String,
    pub primary_admin_id: i64,
    pub webhook_url: String,
    pub support_handle: Option<String>,

    // Solana
    pub solana_rpc_url: String,
    pub admin_wallet: String,
    pub recovery_wallet: Option<String>,

    // Shop behavior
    pub basket_timeout_secs: i64,
    pub min_refill_eur: Decimal,
    pub fee_adjustment_percent: Decimal,
    pub media_dir: String,

    // Price upstreams
    pub dex_quote_url: String,
    pub coingecko_api_url: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Config {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),

            database_url: env::var("DATABASE_URL")?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()?,

            bot_token: env::var("TELEGRAM_BOT_TOKEN")?,
            primary_admin_id: env::var("PRIMARY_ADMIN_ID")?.parse()?,
            webhook_url: env::var("WEBHOOK_URL").unwrap_or_else(|_| "".to_string()),
            support_handle: env::var("SUPPORT_HANDLE").ok(),

            solana_rpc_url: env::var("SOLANA_RPC_URL")
                .unwrap_or_else(|_| DEFAULT_SOLANA_RPC_URL.to_string()),
            admin_wallet: env::var("SOLANA_ADMIN_WALLET")?,
            recovery_wallet: env::var("SOLANA_RECOVERY_WALLET")
                .ok()
                .filter(|v| !v.trim().is_empty()),

            basket_timeout_secs: env::var("BASKET_TIMEOUT_SECS")
                .unwrap_or_else(|_| "900".to_string())
                .parse()?,
            min_refill_eur: parse_decimal_env("MIN_REFILL_EUR", "5.00")?,
            fee_adjustment_percent: parse_decimal_env("FEE_ADJUSTMENT_PERCENT", "0")?,
            media_dir: env::var("MEDIA_DIR").unwrap_or_else(|_| "media".to_string()),

            dex_quote_url: env::var("DEX_QUOTE_URL")
                .unwrap_or_else(|_| "https://lite-api.jup.ag/price/v2".to_string()),
            coingecko_api_url: env::var("COINGECKO_API_URL")
                .unwrap_or_else(|_| "https://api.coingecko.com/api/v3".to_string()),
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database_url.trim().is_empty() {
            anyhow::bail!("DATABASE_URL is empty");
        }
        if self.bot_token.trim().is_empty() {
            anyhow::bail!("TELEGRAM_BOT_TOKEN is empty");
        }
        if self.admin_wallet.trim().is_empty() {
            anyhow::bail!("SOLANA_ADMIN_WALLET is empty");
        }

        if self.basket_timeout_secs <= 0 {
            tracing::warn!("BASKET_TIMEOUT_SECS is not positive; reservations never expire");
        }
        if self.min_refill_eur <= Decimal::ZERO {
            tracing::warn!("MIN_REFILL_EUR should be > 0");
        }
        if self.fee_adjustment_percent < Decimal::ZERO {
            tracing::warn!("FEE_ADJUSTMENT_PERCENT is negative; invoices will undercharge");
        }
        if self.webhook_url.trim().is_empty() {
            tracing::warn!("WEBHOOK_URL is empty; inbound updates must be delivered manually");
        }

        Ok(())
    }

    /// Path of the inbound update route, `/telegram/<bot_token>`.
    pub fn telegram_webhook_path(&self) -> String {
        format!("/telegram/{}", self.bot_token)
    }
}

fn parse_decimal_env(name: &str, default: &str) -> anyhow::Result<Decimal> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    Decimal::from_str(raw.trim())
        .map_err(|e| anyhow::anyhow!("invalid decimal in {}: {}", name, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_decimal_env_falls_back_to_default() {
        std::env::remove_var("KIOSK_TEST_DECIMAL");
        let v = parse_decimal_env("KIOSK_TEST_DECIMAL", "5.00").unwrap();
        assert_eq!(v, Decimal::new(500, 2));
    }

    #[test]
    fn parse_decimal_env_rejects_garbage() {
        std::env::set_var("KIOSK_TEST_DECIMAL_BAD", "not-a-number");
        assert!(parse_decimal_env("KIOSK_TEST_DECIMAL_BAD", "0").is_err());
    }
}
