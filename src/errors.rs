// src/errors.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failures that terminate a request with an HTTP error status. The initiate
/// path reports gateway problems through its structured 200 body instead, so
/// only genuinely internal faults land here.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("transaction id already recorded")]
    DuplicateKey,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::Sqlx(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Database error"),
            AppError::DuplicateKey => (StatusCode::INTERNAL_SERVER_ERROR, "Duplicate transaction"),
        };

        let body = Json(json!({
            "error": error_message,
            "message": self.to_string(),
            "success": false,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Gateway failure taxonomy. Each variant maps to a distinct caller-facing
/// retry recommendation, which is the only reason callers need to tell them
/// apart.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("invalid charge input: {0}")]
    InvalidInput(String),

    #[error("gateway credential exchange failed: {0}")]
    AuthFailure(String),

    #[error("gateway rate limit exceeded")]
    RateLimited,

    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    #[error("gateway unreachable: {0}")]
    NetworkDelay(String),
}
