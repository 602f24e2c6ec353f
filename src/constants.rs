/// Application constants

// Payment lifecycle
pub const PAYMENT_WINDOW_MINUTES: i64 = 20;
pub const PAYMENT_TOLERANCE_NUM: u32 = 995; // paid when received >= 0.995 * expected
pub const PAYMENT_TOLERANCE_SCALE: u32 = 3;

// Solana
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;
pub const TRANSFER_FEE_LAMPORTS: u64 = 5_000;
pub const DEFAULT_SOLANA_RPC_URL: &str = "https://api.mainnet-beta.solana.com";
pub const RECOVERY_DUST_LAMPORTS: u64 = 100_000; // 0.0001 SOL
pub const RECOVERY_BATCH_SIZE: usize = 10;
pub const RECOVERY_BATCH_DELAY_SECS: u64 = 1;

// Price oracle cache layers
pub const PRICE_MEMORY_TTL_SECS: u64 = 300;
pub const PRICE_PERSISTENT_TTL_SECS: i64 = 600;
pub const PRICE_STALE_TTL_SECS: u64 = 3600;
pub const PRICE_CACHE_SETTING_KEY: &str = "sol_price_eur_cache";
pub const PRICE_HTTP_TIMEOUT_SECS: u64 = 5;
pub const PRICE_DEX_TIMEOUT_SECS: u64 = 10;

// Background job cadence (interval, first-run delay), in seconds
pub const BASKET_EXPIRY_INTERVAL_SECS: u64 = 300;
pub const BASKET_EXPIRY_FIRST_DELAY_SECS: u64 = 10;
pub const PAYMENT_TIMEOUT_INTERVAL_SECS: u64 = 600;
pub const PAYMENT_TIMEOUT_FIRST_DELAY_SECS: u64 = 60;
pub const ABANDONED_RESERVATION_INTERVAL_SECS: u64 = 180;
pub const ABANDONED_RESERVATION_FIRST_DELAY_SECS: u64 = 120;
pub const PAYMENT_RECOVERY_INTERVAL_SECS: u64 = 300;
pub const PAYMENT_RECOVERY_FIRST_DELAY_SECS: u64 = 180;
pub const SOLANA_SCAN_INTERVAL_SECS: u64 = 60;
pub const SOLANA_SCAN_FIRST_DELAY_SECS: u64 = 30;
pub const PRICE_REFRESH_INTERVAL_SECS: u64 = 240;
pub const PRICE_REFRESH_FIRST_DELAY_SECS: u64 = 60;

// Reservations held past BASKET_TIMEOUT with no live deposit are abandoned
// after this extra grace.
pub const ABANDONED_GRACE_SECS: i64 = 600;

// Finalization retry: waits 5 * 3^n seconds between attempts
pub const FINALIZE_MAX_ATTEMPTS: u32 = 3;
pub const FINALIZE_RETRY_BASE_SECS: u64 = 5;

// DB contention retry: 100ms * 2^n, max 3 attempts
pub const DB_RETRY_MAX_ATTEMPTS: u32 = 3;
pub const DB_RETRY_BASE_MS: u64 = 100;

// Messenger
pub const MEDIA_GROUP_MAX_ITEMS: usize = 10;
pub const MESSENGER_RETRY_ATTEMPTS: u32 = 3;
