//! API error types for fab-dp

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::pipeline::PipelineError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409) - concurrent stage execution or state mismatch
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Design not ready for the requested operation (409)
    #[error("Not ready: {0}")]
    NotReady(String),

    /// Plan quota exhausted (429)
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Upstream capability failed (502)
    #[error("Upstream failure: {0}")]
    Upstream(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// fab-common error
    #[error("Common error: {0}")]
    Common(#[from] fab_common::Error),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Validation(msg) => ApiError::BadRequest(msg),
            PipelineError::NotFound(id) => ApiError::NotFound(format!("Design not found: {}", id)),
            PipelineError::Conflict(msg) => ApiError::Conflict(msg),
            PipelineError::Cancelled { .. } => ApiError::Conflict(err.to_string()),
            PipelineError::NotReady(msg) => ApiError::NotReady(msg),
            PipelineError::QuotaExceeded { .. } => ApiError::QuotaExceeded(err.to_string()),
            PipelineError::StageFailed { .. } => ApiError::Upstream(err.to_string()),
            PipelineError::GenerationFailed(msg) => ApiError::Upstream(msg),
            PipelineError::Storage(e) => ApiError::Common(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::NotReady(msg) => (StatusCode::CONFLICT, "NOT_READY", msg),
            ApiError::QuotaExceeded(msg) => {
                (StatusCode::TOO_MANY_REQUESTS, "QUOTA_EXCEEDED", msg)
            }
            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "UPSTREAM_FAILURE", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Other(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
