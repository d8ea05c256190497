//! HTTP error mapping.

use std::time::Duration;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use rollcall_directory::DirectoryError;
use serde_json::json;

/// Errors returned by handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed input (400).
    #[error("{0}")]
    BadRequest(String),

    /// No session or rejected credentials (401).
    #[error("{0}")]
    Unauthorized(String),

    /// Rate limit exceeded (429).
    #[error("too many requests")]
    RateLimited { retry_after: Duration },

    /// The database collaborator failed. Never reported as "not found".
    #[error("upstream lookup failed: {0}")]
    UpstreamLookupFailure(#[source] DirectoryError),

    /// Generic internal error (500).
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamLookupFailure(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::RateLimited { .. } => "rate_limited",
            Self::UpstreamLookupFailure(_) => "upstream_failure",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<DirectoryError> for ApiError {
    fn from(err: DirectoryError) -> Self {
        if matches!(err, DirectoryError::InvalidCredentials) {
            Self::Unauthorized(err.to_string())
        } else {
            Self::UpstreamLookupFailure(err)
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Upstream details go to the log, not the client
        let message = match &self {
            Self::UpstreamLookupFailure(source) => {
                tracing::error!(error = %source, "upstream lookup failed");
                "internal error".to_string()
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                "internal error".to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": message,
            }
        });

        let mut response = (status, Json(body)).into_response();
        if let Self::RateLimited { retry_after } = self {
            response
                .headers_mut()
                .insert(RETRY_AFTER, retry_after_header(retry_after));
        }
        response
    }
}

/// Whole seconds, rounded up, never below one.
pub fn retry_after_header(retry_after: Duration) -> HeaderValue {
    let secs = retry_after.as_millis().div_ceil(1000).max(1);
    HeaderValue::from(secs as u64)
}
