use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Product no longer available")]
    StockVanished,

    #[error("Out of stock")]
    OutOfStock,

    #[error("Discount code invalid: {0}")]
    DiscountInvalid(String),

    #[error("Discount code exhausted")]
    DiscountExhausted,

    #[error("Discount total mismatch")]
    DiscountMismatch,

    #[error("Price quote unavailable")]
    QuoteUnavailable,

    #[error("Solana RPC rate limited")]
    RpcRateLimited,

    #[error("Solana RPC error: {0}")]
    Rpc(String),

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("Purchase finalization failed: {0}")]
    FinalizeFailed(String),

    #[error("Balance compensation failed: {0}")]
    CompensationFailed(String),

    #[error("Stored keypair does not match wallet {0}")]
    CorruptKey(String),

    #[error("Media delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Messenger API error: {0}")]
    Messenger(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// SQLSTATEs worth a backoff-and-retry: serialization failure, deadlock,
/// lock not available.
pub fn is_contention(err: &sqlx::Error) -> bool {
    if let Some(db_err) = err.as_database_error() {
        matches!(
            db_err.code().as_deref(),
            Some("40001") | Some("40P01") | Some("55P03")
        )
    } else {
        false
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Database(ref e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                e.to_string(),
            ),
            AppError::StockVanished | AppError::OutOfStock => (
                StatusCode::CONFLICT,
                "OUT_OF_STOCK",
                self.to_string(),
            ),
            AppError::DiscountInvalid(ref msg) => {
                (StatusCode::BAD_REQUEST, "DISCOUNT_INVALID", msg.clone())
            }
            AppError::DiscountExhausted => (
                StatusCode::CONFLICT,
                "DISCOUNT_EXHAUSTED",
                "Discount code has no uses left".to_string(),
            ),
            AppError::DiscountMismatch => (
                StatusCode::CONFLICT,
                "DISCOUNT_MISMATCH",
                "Payment amount no longer matches the discounted total".to_string(),
            ),
            AppError::QuoteUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "QUOTE_UNAVAILABLE",
                "Price quote unavailable, try again shortly".to_string(),
            ),
            AppError::InsufficientBalance => (
                StatusCode::BAD_REQUEST,
                "INSUFFICIENT_BALANCE",
                "Insufficient balance for this operation".to_string(),
            ),
            AppError::NotFound(ref msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::BadRequest(ref msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                self.to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            success: false,
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
