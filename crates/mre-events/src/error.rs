//! Lifecycle event bus errors.

use thiserror::Error;

pub type EventResult<T> = Result<T, EventError>;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Cannot reach the lifecycle event stream: {0}")]
    ConnectionFailed(String),

    #[error("Lifecycle event not published: {0}")]
    PublishFailed(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Payload of a stream entry that is not a lifecycle event
    #[error("Malformed lifecycle event: {0}")]
    Json(#[from] serde_json::Error),
}

impl EventError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn publish_failed(msg: impl Into<String>) -> Self {
        Self::PublishFailed(msg.into())
    }
}
