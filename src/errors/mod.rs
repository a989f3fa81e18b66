//! Core error taxonomy.
//!
//! Every fallible core operation returns a [`CoreError`]. Handlers translate
//! it into the `{ code, message, details? }` JSON envelope and HTTP status
//! mandated by the error-handling design: no stack traces, no echoing of
//! untrusted input, a generic message for `Internal`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("circuit breaker open for dependency '{0}'")]
    BreakerOpen(String),

    #[error("operation timed out")]
    Timeout,

    #[error("downstream dependency failure: {0}")]
    Dependency(String),

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl CoreError {
    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        CoreError::Internal(err.into())
    }

    /// Stable error code string surfaced to callers, per the error taxonomy.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "VALIDATION",
            CoreError::Auth(_) => "AUTH",
            CoreError::NotFound(_) => "NOT_FOUND",
            CoreError::Conflict(_) => "CONFLICT",
            CoreError::RateLimited { .. } => "RATE_LIMITED",
            CoreError::BreakerOpen(_) => "BREAKER_OPEN",
            CoreError::Timeout => "TIMEOUT",
            CoreError::Dependency(_) => "DEPENDENCY",
            CoreError::Integrity(_) => "INTEGRITY",
            CoreError::Internal(_) => "INTERNAL",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::Auth(_) => StatusCode::UNAUTHORIZED,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            CoreError::BreakerOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::Timeout => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::Dependency(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::Integrity(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The message surfaced to the caller. Internal errors never leak their
    /// real cause; that cause is recorded in the audit log by the caller.
    fn public_message(&self) -> String {
        match self {
            CoreError::Internal(_) => "an internal error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    status: &'static str,
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        if let CoreError::Internal(err) = &self {
            tracing::error!(error = %err, "internal error");
        }
        let status = self.status();
        let body = ErrorBody {
            status: "error",
            code: self.code(),
            message: self.public_message(),
            details: None,
        };
        (status, Json(body)).into_response()
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
