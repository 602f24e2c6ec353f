use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod commands;
mod config;
mod constants;
mod db;
mod error;
mod integrations;
mod models;
mod services;
mod utils;

use config::Config;
use db::Database;
use integrations::TelegramClient;

const UPDATE_CHANNEL_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "kiosk_backend=info,tower_http=warn,sqlx::query=error".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    config.validate()?;

    tracing::info!("Starting kiosk backend");
    tracing::info!("Environment: {}", config.environment);
    tracing::info!("Solana RPC URL: {}", config.solana_rpc_url);
    tracing::info!("Treasury wallet: {}", config.admin_wallet);
    tracing::info!(
        "Recovery wallet configured: {}",
        config.recovery_wallet.is_some()
    );
    tracing::info!("Basket timeout: {}s", config.basket_timeout_secs);

    // Initialize database
    let db = Database::new(&config).await?;
    tracing::info!("Running database migrations...");
    db.run_migrations().await?;

    // Outbound messenger client
    let bot = TelegramClient::new(&config.bot_token, config.primary_admin_id);

    // Service graph + background jobs
    let service_graph = services::build_services(db.clone(), config.clone(), bot.clone());
    tokio::spawn(services::start_background_services(
        service_graph.clone(),
        db.clone(),
        config.clone(),
    ));

    // Inbound updates flow through a channel into one dispatcher task, so
    // the HTTP server never reaches back into handler state.
    let (updates_tx, updates_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
    tokio::spawn(commands::run_dispatcher(
        updates_rx,
        service_graph,
        db.clone(),
        bot.clone(),
    ));

    let app_state = api::AppState {
        db,
        config: config.clone(),
        updates_tx,
    };
    let app = build_router(app_state);
    tracing::info!("Webhook route mounted at {}", config.telegram_webhook_path());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(state: api::AppState) -> Router {
    Router::new()
        .route("/", get(api::telegram::root))
        .route("/health", get(api::health::health_check))
        .route("/telegram/{token}", post(api::telegram::telegram_webhook))
        // Stub kept for compatibility; payment observation polls the chain.
        .route("/webhook", post(api::telegram::payment_webhook_stub))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
