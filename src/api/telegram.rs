use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use super::AppState;
use crate::commands::InboundUpdate;

/// Inbound messenger webhook at `/telegram/<bot_token>`. Knowing the token
/// is the authentication. Updates are serialized onto the dispatcher
/// channel; the HTTP side never runs handler logic.
pub async fn telegram_webhook(
    State(state): State<AppState>,
    Path(token): Path<String>,
    body: Bytes,
) -> Response {
    if token != state.config.bot_token {
        return StatusCode::NOT_FOUND.into_response();
    }

    let update: InboundUpdate = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            tracing::error!("Webhook received invalid JSON: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid JSON").into_response();
        }
    };

    match state.updates_tx.try_send(update) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(tokio::sync::mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!("Update channel full; dropping update");
            StatusCode::OK.into_response()
        }
        Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => {
            tracing::error!("Update dispatcher not running");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

/// Placeholder kept for compatibility: payment observation uses the
/// background scanner, not webhooks.
pub async fn payment_webhook_stub() -> Response {
    (StatusCode::OK, "Payments are observed via background polling").into_response()
}

pub async fn root() -> Response {
    (StatusCode::OK, "Kiosk backend is running").into_response()
}
