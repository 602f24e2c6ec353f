use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::{
    config::Config,
    constants::{
        PRICE_CACHE_SETTING_KEY, PRICE_DEX_TIMEOUT_SECS, PRICE_HTTP_TIMEOUT_SECS,
        PRICE_MEMORY_TTL_SECS, PRICE_PERSISTENT_TTL_SECS, PRICE_STALE_TTL_SECS,
    },
    db::Database,
    error::{AppError, Result},
};

const SOL_MINT: &str = "So11111111111111111111111111111111111111112";

#[derive(Debug, Clone, Copy)]
struct CachedQuote {
    price: Decimal,
    fetched_at: Instant,
}

/// EUR-per-SOL quote with layered caching: memory, settings row, upstream
/// rotation, stale fallback. Individual price APIs are flaky; it is very
/// unlikely that all of them fail inside one stale window.
pub struct PriceOracle {
    db: Database,
    config: Config,
    http: reqwest::Client,
    dex_http: reqwest::Client,
    memory: Arc<RwLock<Option<CachedQuote>>>,
}

impl PriceOracle {
    pub fn new(db: Database, config: Config) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(PRICE_HTTP_TIMEOUT_SECS))
            .build()
            .expect("reqwest client");
        let dex_http = reqwest::Client::builder()
            .timeout(Duration::from_secs(PRICE_DEX_TIMEOUT_SECS))
            .build()
            .expect("reqwest client");
        Self {
            db,
            config,
            http,
            dex_http,
            memory: Arc::new(RwLock::new(None)),
        }
    }

    /// The one operation: current EUR/SOL rate, or QuoteUnavailable.
    pub async fn quote_eur_per_sol(&self) -> Result<Decimal> {
        // Layer 1: memory
        if let Some(cached) = *self.memory.read().await {
            if cached.fetched_at.elapsed() < Duration::from_secs(PRICE_MEMORY_TTL_SECS) {
                return Ok(cached.price);
            }
        }

        // Layer 2: persistent settings row
        if let Some(price) = self.read_persistent_cache().await {
            self.store_memory(price).await;
            return Ok(price);
        }

        // Layer 3: upstream rotation
        match self.fetch_upstream().await {
            Ok(price) => {
                self.store_memory(price).await;
                if let Err(e) = self
                    .db
                    .upsert_setting(PRICE_CACHE_SETTING_KEY, &price.to_string())
                    .await
                {
                    tracing::warn!("Price cache write failed: {}", e);
                }
                return Ok(price);
            }
            Err(e) => {
                tracing::warn!("All price upstreams failed: {}", e);
            }
        }

        // Layer 4: stale memory fallback
        if let Some(cached) = *self.memory.read().await {
            if cached.fetched_at.elapsed() < Duration::from_secs(PRICE_STALE_TTL_SECS) {
                tracing::warn!("Serving stale SOL price {}", cached.price);
                return Ok(cached.price);
            }
        }

        Err(AppError::QuoteUnavailable)
    }

    /// Background warm-up: drops layer 1 so the next quote refills from
    /// upstreams (or at worst the settings row).
    pub async fn refresh(&self) -> Result<()> {
        *self.memory.write().await = None;
        let price = self.quote_eur_per_sol().await?;
        tracing::debug!("Refreshed SOL price: {} EUR", price);
        Ok(())
    }

    async fn store_memory(&self, price: Decimal) {
        *self.memory.write().await = Some(CachedQuote {
            price,
            fetched_at: Instant::now(),
        });
    }

    async fn read_persistent_cache(&self) -> Option<Decimal> {
        match self.db.get_setting(PRICE_CACHE_SETTING_KEY).await {
            Ok(Some((value, updated_at))) => {
                let age = Utc::now().signed_duration_since(updated_at).num_seconds();
                if age < PRICE_PERSISTENT_TTL_SECS {
                    Decimal::from_str(value.trim()).ok()
                } else {
                    None
                }
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Price cache read failed, falling through: {}", e);
                None
            }
        }
    }

    /// Tries the native DEX quote, then exchange USD tickers (converted to
    /// EUR through FX rotation), then direct EUR endpoints. First success
    /// wins.
    async fn fetch_upstream(&self) -> Result<Decimal> {
        let usd_price = match self.fetch_dex_usd().await {
            Ok(price) => Some(price),
            Err(e) => {
                tracing::debug!("DEX quote failed: {}", e);
                self.fetch_exchange_usd().await.ok()
            }
        };

        if let Some(usd) = usd_price {
            match self.fetch_usd_to_eur().await {
                Ok(rate) => return Ok(usd * rate),
                Err(e) => tracing::debug!("FX conversion failed: {}", e),
            }
        }

        self.fetch_direct_eur().await
    }

    async fn fetch_dex_usd(&self) -> Result<Decimal> {
        #[derive(Deserialize)]
        struct DexPriceEntry {
            price: String,
        }
        #[derive(Deserialize)]
        struct DexPriceResponse {
            data: HashMap<String, DexPriceEntry>,
        }

        let url = format!("{}?ids={}", self.config.dex_quote_url, SOL_MINT);
        let body: DexPriceResponse = self
            .dex_http
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("dex quote request: {}", e)))?
            .error_for_status()
            .map_err(|e| AppError::Internal(format!("dex quote status: {}", e)))?
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("dex quote json: {}", e)))?;

        let entry = body
            .data
            .get(SOL_MINT)
            .ok_or_else(|| AppError::Internal("dex quote missing SOL entry".to_string()))?;
        parse_positive_price(&entry.price, "dex")
    }

    async fn fetch_exchange_usd(&self) -> Result<Decimal> {
        #[derive(Deserialize)]
        struct BinanceTicker {
            price: String,
        }
        #[derive(Deserialize)]
        struct CoinbaseSpot {
            data: CoinbaseSpotData,
        }
        #[derive(Deserialize)]
        struct CoinbaseSpotData {
            amount: String,
        }

        // Binance
        match self
            .get_json::<BinanceTicker>("https://api.binance.com/api/v3/ticker/price?symbol=SOLUSDT")
            .await
        {
            Ok(t) => {
                if let Ok(p) = parse_positive_price(&t.price, "binance") {
                    return Ok(p);
                }
            }
            Err(e) => tracing::debug!("Binance ticker failed: {}", e),
        }

        // Coinbase
        match self
            .get_json::<CoinbaseSpot>("https://api.coinbase.com/v2/prices/SOL-USD/spot")
            .await
        {
            Ok(s) => {
                if let Ok(p) = parse_positive_price(&s.data.amount, "coinbase") {
                    return Ok(p);
                }
            }
            Err(e) => tracing::debug!("Coinbase spot failed: {}", e),
        }

        Err(AppError::Internal("no exchange USD quote available".to_string()))
    }

    async fn fetch_usd_to_eur(&self) -> Result<Decimal> {
        #[derive(Deserialize)]
        struct FrankfurterResponse {
            rates: HashMap<String, f64>,
        }
        #[derive(Deserialize)]
        struct OpenErApiResponse {
            rates: HashMap<String, f64>,
        }

        match self
            .get_json::<FrankfurterResponse>("https://api.frankfurter.app/latest?from=USD&to=EUR")
            .await
        {
            Ok(body) => {
                if let Some(rate) = body.rates.get("EUR").and_then(|r| sane_fx_rate(*r)) {
                    return Ok(rate);
                }
            }
            Err(e) => tracing::debug!("Frankfurter FX failed: {}", e),
        }

        match self
            .get_json::<OpenErApiResponse>("https://open.er-api.com/v6/latest/USD")
            .await
        {
            Ok(body) => {
                if let Some(rate) = body.rates.get("EUR").and_then(|r| sane_fx_rate(*r)) {
                    return Ok(rate);
                }
            }
            Err(e) => tracing::debug!("open.er-api FX failed: {}", e),
        }

        Err(AppError::Internal("no sane USD/EUR rate available".to_string()))
    }

    async fn fetch_direct_eur(&self) -> Result<Decimal> {
        #[derive(Deserialize)]
        struct CoinGeckoSimple {
            solana: CoinGeckoEntry,
        }
        #[derive(Deserialize)]
        struct CoinGeckoEntry {
            eur: f64,
        }

        let url = format!(
            "{}/simple/price?ids=solana&vs_currencies=eur",
            self.config.coingecko_api_url
        );
        let body: CoinGeckoSimple = self.get_json(&url).await?;
        Decimal::try_from(body.solana.eur)
            .ok()
            .filter(|p| *p > Decimal::ZERO)
            .ok_or_else(|| AppError::Internal("coingecko returned non-positive price".to_string()))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        self.http
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("request {}: {}", url, e)))?
            .error_for_status()
            .map_err(|e| AppError::Internal(format!("status {}: {}", url, e)))?
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("json {}: {}", url, e)))
    }
}

fn parse_positive_price(raw: &str, source: &str) -> Result<Decimal> {
    Decimal::from_str(raw.trim())
        .ok()
        .filter(|p| *p > Decimal::ZERO)
        .ok_or_else(|| AppError::Internal(format!("{} returned bad price '{}'", source, raw)))
}

/// EUR/USD outside 0.5..1.5 means a broken feed, not a market move.
fn sane_fx_rate(rate: f64) -> Option<Decimal> {
    if !(0.5..=1.5).contains(&rate) {
        return None;
    }
    Decimal::try_from(rate).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fx_sanity_rejects_outliers() {
        assert!(sane_fx_rate(0.92).is_some());
        assert!(sane_fx_rate(0.49).is_none());
        assert!(sane_fx_rate(1.51).is_none());
        assert!(sane_fx_rate(f64::NAN).is_none());
    }

    #[test]
    fn fx_sanity_accepts_bounds() {
        assert!(sane_fx_rate(0.5).is_some());
        assert!(sane_fx_rate(1.5).is_some());
    }

    #[test]
    fn positive_price_parse() {
        assert!(parse_positive_price("142.35", "test").is_ok());
        assert!(parse_positive_price("0", "test").is_err());
        assert!(parse_positive_price("-3", "test").is_err());
        assert!(parse_positive_price("abc", "test").is_err());
    }
}
