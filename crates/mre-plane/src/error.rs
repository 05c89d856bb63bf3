//! Control plane error types.

use thiserror::Error;

/// Result type for control plane operations.
pub type PlaneResult<T> = Result<T, PlaneError>;

/// Errors that can occur talking to the control plane and its stores.
#[derive(Debug, Error)]
pub enum PlaneError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Concurrent update of {resource}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        resource: String,
        expected: u64,
        actual: u64,
    },

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Server error ({0}): {1}")]
    ServerError(u16, String),

    #[error("Rate limited, retry after {0}ms")]
    RateLimited(u64),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Model(#[from] mre_models::ModelError),
}

impl PlaneError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn request_failed(msg: impl Into<String>) -> Self {
        Self::RequestFailed(msg.into())
    }

    pub fn conflict(resource: impl Into<String>, expected: u64, actual: u64) -> Self {
        Self::ConcurrencyConflict {
            resource: resource.into(),
            expected,
            actual,
        }
    }

    /// Map a non-success HTTP status to an error.
    pub fn from_http_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            404 => Self::NotFound(body),
            429 => Self::RateLimited(1000),
            500..=599 => Self::ServerError(status, body),
            _ => Self::RequestFailed(format!("HTTP {}: {}", status, body)),
        }
    }

    /// HTTP status this error corresponds to, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::NotFound(_) => Some(404),
            Self::ConcurrencyConflict { .. } => Some(412),
            Self::RateLimited(_) => Some(429),
            Self::ServerError(status, _) => Some(*status),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Server-requested wait before retrying.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited(ms) => Some(*ms),
            _ => None,
        }
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PlaneError::Network(_) | PlaneError::RateLimited(_) | PlaneError::ServerError(_, _)
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, PlaneError::ConcurrencyConflict { .. })
    }
}
