// Error type shared by every handler; rendered as `{ "message": ... }`

use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use judge_common::{RateLimitError, RateLimitStats, StoreError};
use judge_worker::QueueError;
use serde::Serialize;
use thiserror::Error;

use crate::rate_limit::apply_rate_limit_headers;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("authentication required")]
    Unauthorized,
    #[error("insufficient permissions")]
    Forbidden,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("rate limit exceeded for {}", .0.service)]
    RateLimited(RateLimitStats),
    #[error("{0}")]
    Unavailable(&'static str),
    /// Detail is logged, never returned
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();

        let (status, message) = match self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Authentication required".to_string(),
            ),
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                "Insufficient permissions".to_string(),
            ),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::RateLimited(stats) => {
                apply_rate_limit_headers(&mut headers, &stats);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    format!(
                        "Rate limit exceeded for {}. Try again after {}",
                        stats.service,
                        stats.reset_at.to_rfc3339()
                    ),
                )
            }
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.to_string()),
            ApiError::Internal(detail) => {
                tracing::error!(detail = %detail, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An unexpected error occurred".to_string(),
                )
            }
        };

        (status, headers, Json(ErrorBody { message })).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<RateLimitError> for ApiError {
    fn from(e: RateLimitError) -> Self {
        match e {
            RateLimitError::UnknownUser(user) => {
                ApiError::NotFound(format!("No rate limit record for user {}", user))
            }
            RateLimitError::UnknownService(service) => {
                ApiError::Validation(format!("Service {} is not limited per user", service))
            }
            RateLimitError::Store(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Full => {
                ApiError::Unavailable("Submission queue is full, please try again shortly")
            }
            QueueError::Closed => ApiError::Unavailable("Server is shutting down"),
        }
    }
}
