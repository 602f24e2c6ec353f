pub mod health;
pub mod telegram;

use tokio::sync::mpsc;

use crate::{commands::InboundUpdate, config::Config, db::Database};

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Config,
    pub updates_tx: mpsc::Sender<InboundUpdate>,
}
