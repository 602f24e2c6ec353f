// All service modules
pub mod ledger;
pub mod orders;
pub mod price_oracle;
pub mod pricing;
pub mod reservations;
pub mod wallet_engine;

// Re-export for convenience
pub use orders::OrderCoordinator;
pub use price_oracle::PriceOracle;
pub use wallet_engine::WalletEngine;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    config::Config,
    constants::*,
    db::Database,
    error::Result,
    integrations::{SolanaRpc, TelegramClient},
};

/// The long-lived service graph. Built once at startup; background jobs
/// and the inbound dispatcher share it.
#[derive(Clone)]
pub struct Services {
    pub oracle: Arc<PriceOracle>,
    pub wallets: Arc<WalletEngine>,
    pub orders: Arc<OrderCoordinator>,
}

pub fn build_services(db: Database, config: Config, bot: TelegramClient) -> Services {
    let rpc = SolanaRpc::new(config.solana_rpc_url.clone());
    let oracle = Arc::new(PriceOracle::new(db.clone(), config.clone()));
    let wallets = Arc::new(WalletEngine::new(
        db.clone(),
        config.clone(),
        rpc.clone(),
        oracle.clone(),
        bot.clone(),
    ));
    let orders = Arc::new(OrderCoordinator::new(
        db,
        config,
        bot,
        oracle.clone(),
        wallets.clone(),
        rpc,
    ));

    Services {
        oracle,
        wallets,
        orders,
    }
}

/// One sequential loop per job: a tick never overlaps itself, and a
/// failing tick only logs. Each job waits out its first-run delay before
/// the first tick.
fn spawn_job<F, Fut>(name: &'static str, first_delay_secs: u64, interval_secs: u64, tick: F)
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send,
{
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(first_delay_secs)).await;
        loop {
            tracing::debug!("Running background job: {}", name);
            if let Err(e) = tick().await {
                tracing::error!("Error in background job {}: {}", name, e);
            }
            tokio::time::sleep(Duration::from_secs(interval_secs)).await;
        }
    });
}

/// Start all background jobs: deposit scanning, reservation expiry,
/// payment timeout, recovery, and price refresh.
pub async fn start_background_services(services: Services, db: Database, config: Config) {
    tracing::info!("Starting background services...");

    if config.basket_timeout_secs > 0 {
        let expiry_db = db.clone();
        let basket_timeout = config.basket_timeout_secs;
        spawn_job(
            "basket_expiry",
            BASKET_EXPIRY_FIRST_DELAY_SECS,
            BASKET_EXPIRY_INTERVAL_SECS,
            move || {
                let db = expiry_db.clone();
                async move {
                    let released = reservations::expire(&db, basket_timeout).await?;
                    for (user_id, count) in released {
                        tracing::info!("Expired {} reserved items for user {}", count, user_id);
                    }
                    Ok(())
                }
            },
        );

        let abandoned_db = db.clone();
        let abandoned_age = config.basket_timeout_secs + ABANDONED_GRACE_SECS;
        spawn_job(
            "abandoned_reservation",
            ABANDONED_RESERVATION_FIRST_DELAY_SECS,
            ABANDONED_RESERVATION_INTERVAL_SECS,
            move || {
                let db = abandoned_db.clone();
                async move {
                    let released = reservations::release_abandoned(&db, abandoned_age).await?;
                    for (user_id, count) in released {
                        tracing::warn!(
                            "Released {} abandoned reservations for user {}",
                            count,
                            user_id
                        );
                    }
                    Ok(())
                }
            },
        );
    } else {
        tracing::warn!("BASKET_TIMEOUT_SECS is not positive; skipping basket expiry jobs");
    }

    let timeout_orders = services.orders.clone();
    spawn_job(
        "payment_timeout",
        PAYMENT_TIMEOUT_FIRST_DELAY_SECS,
        PAYMENT_TIMEOUT_INTERVAL_SECS,
        move || {
            let orders = timeout_orders.clone();
            async move { orders.run_payment_timeout_tick().await }
        },
    );

    let recovery_orders = services.orders.clone();
    let recovery_wallets = services.wallets.clone();
    spawn_job(
        "payment_recovery",
        PAYMENT_RECOVERY_FIRST_DELAY_SECS,
        PAYMENT_RECOVERY_INTERVAL_SECS,
        move || {
            let orders = recovery_orders.clone();
            let wallets = recovery_wallets.clone();
            async move {
                orders.run_recovery_tick().await?;
                wallets.recover_stuck_funds(None).await?;
                Ok(())
            }
        },
    );

    let scan_wallets = services.wallets.clone();
    let scan_orders = services.orders.clone();
    spawn_job(
        "solana_scan",
        SOLANA_SCAN_FIRST_DELAY_SECS,
        SOLANA_SCAN_INTERVAL_SECS,
        move || {
            let wallets = scan_wallets.clone();
            let orders = scan_orders.clone();
            async move {
                let events = wallets.scan().await?;
                for event in events {
                    orders.on_settlement(event).await;
                }
                Ok(())
            }
        },
    );

    let refresh_oracle = services.oracle.clone();
    spawn_job(
        "price_refresh",
        PRICE_REFRESH_FIRST_DELAY_SECS,
        PRICE_REFRESH_INTERVAL_SECS,
        move || {
            let oracle = refresh_oracle.clone();
            async move {
                if let Err(e) = oracle.refresh().await {
                    tracing::warn!("Price refresh failed: {}", e);
                }
                Ok(())
            }
        },
    );

    tracing::info!("All background services started");
}
