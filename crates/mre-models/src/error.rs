//! Model validation errors.

use thiserror::Error;

/// Result type for model conversions and validation.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while converting or validating models.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("Invalid feature criterion: {0}")]
    InvalidCriterion(String),

    #[error("Invalid replay request: {0}")]
    InvalidRequest(String),

    #[error("Unknown output resolution: {0}")]
    UnknownResolution(String),
}

impl ModelError {
    pub fn invalid_criterion(msg: impl Into<String>) -> Self {
        Self::InvalidCriterion(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }
}
