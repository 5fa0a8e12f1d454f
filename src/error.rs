use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

use crate::ingest::rate_limiter::RateLimitError;
use crate::queue::QueueError;
use crate::store::StoreError;

const INTERNAL_MESSAGE: &str = "Internal server error. Please try again later.";

/// Application error types surfaced over HTTP
#[derive(Debug)]
pub enum AppError {
    /// Service token header absent or malformed
    MissingToken,
    /// Service token does not resolve to a service
    InvalidToken,
    /// Per-credential request rate exceeded
    RateLimited(String),
    /// Per-credential event quota exceeded
    QuotaExceeded(String),
    /// Request body over the configured cap
    PayloadTooLarge(String),
    /// Batch cardinality over the configured cap
    BatchTooLarge { size: usize, max: usize },
    /// Request body is not valid JSON
    InvalidJson(String),
    /// Every record in the batch was rejected
    NoValidEvents { rejected: usize },
    /// Time series `metrics` parameter names no known metric
    InvalidMetrics(String),
    /// Invalid query or path parameters
    BadRequest(String),
    /// Requested resource does not exist
    NotFound(String),
    /// Internal server error (details are logged, never returned)
    InternalError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingToken => write!(f, "Service token is required"),
            Self::InvalidToken => write!(f, "Invalid or non-existing service token"),
            Self::RateLimited(msg) => write!(f, "Rate limit exceeded: {}", msg),
            Self::QuotaExceeded(msg) => write!(f, "Event quota exceeded: {}", msg),
            Self::PayloadTooLarge(msg) => write!(f, "Payload too large: {}", msg),
            Self::BatchTooLarge { size, max } => {
                write!(f, "Batch size {} exceeds maximum of {} events", size, max)
            }
            Self::InvalidJson(msg) => write!(f, "Invalid JSON body: {}", msg),
            Self::NoValidEvents { rejected } => {
                write!(f, "All {} events in the request were rejected", rejected)
            }
            Self::InvalidMetrics(raw) => write!(f, "No valid metrics in '{}'", raw),
            Self::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            Self::NotFound(msg) => write!(f, "{}", msg),
            Self::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingToken | Self::InvalidToken => StatusCode::UNAUTHORIZED,
            Self::RateLimited(_) | Self::QuotaExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::PayloadTooLarge(_) | Self::BatchTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InvalidJson(_) | Self::InvalidMetrics(_) | Self::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NoValidEvents { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = match &self {
            Self::InternalError(_) => INTERNAL_MESSAGE.to_string(),
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type_name(&self),
            }
        }));

        (status, body).into_response()
    }
}

fn error_type_name(error: &AppError) -> &'static str {
    match error {
        AppError::MissingToken => "missing_token",
        AppError::InvalidToken => "invalid_token",
        AppError::RateLimited(_) => "rate_limited",
        AppError::QuotaExceeded(_) => "quota_exceeded",
        AppError::PayloadTooLarge(_) => "payload_too_large",
        AppError::BatchTooLarge { .. } => "batch_too_large",
        AppError::InvalidJson(_) => "invalid_json",
        AppError::NoValidEvents { .. } => "no_valid_events",
        AppError::InvalidMetrics(_) => "invalid_metrics",
        AppError::BadRequest(_) => "bad_request",
        AppError::NotFound(_) => "not_found",
        AppError::InternalError(_) => "internal_error",
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %err, "Unhandled internal error");
        Self::InternalError(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!(error = %err, "Database error");
        Self::InternalError(err.to_string())
    }
}

impl From<RateLimitError> for AppError {
    fn from(err: RateLimitError) -> Self {
        tracing::error!(error = %err, "Rate limiter unavailable, rejecting request");
        Self::InternalError(err.to_string())
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        tracing::error!(error = %err, "Queue unavailable");
        Self::InternalError(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "Log store unavailable");
        Self::InternalError(err.to_string())
    }
}
