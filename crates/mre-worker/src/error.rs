//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// Blob or store operation failed after retries
    #[error("Transient store failure: {0}")]
    TransientStore(String),

    /// Expected data absent; callers log it and carry on
    #[error("Missing data: {0}")]
    MissingData(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Replay {replay_id} kept changing after {attempts} merge attempts")]
    ConcurrencyConflict { replay_id: String, attempts: u32 },

    #[error("Invocation timed out after {0}s")]
    InvocationTimeout(u64),

    #[error("Storage error: {0}")]
    Storage(#[from] mre_storage::StorageError),

    #[error("Control plane error: {0}")]
    Plane(#[from] mre_plane::PlaneError),

    #[error("Event bus error: {0}")]
    Events(#[from] mre_events::EventError),

    #[error("Media error: {0}")]
    Media(#[from] mre_media::MediaError),

    #[error("Model error: {0}")]
    Model(#[from] mre_models::ModelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn transient_store(msg: impl Into<String>) -> Self {
        Self::TransientStore(msg.into())
    }

    pub fn missing_data(msg: impl Into<String>) -> Self {
        Self::MissingData(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::TransientStore(_)
            | WorkerError::ConcurrencyConflict { .. }
            | WorkerError::InvocationTimeout(_)
            | WorkerError::Events(_)
            | WorkerError::Io(_) => true,
            WorkerError::Storage(e) => e.is_transient(),
            WorkerError::Plane(e) => e.is_retryable() || e.is_conflict(),
            WorkerError::Media(e) => e.is_retryable(),
            WorkerError::MissingData(_) | WorkerError::Configuration(_) | WorkerError::Model(_) => {
                false
            }
        }
    }

    /// Errors caused by the replay's own configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            WorkerError::Configuration(_)
                | WorkerError::Model(_)
                | WorkerError::Media(mre_media::MediaError::UnknownResolution(_))
        )
    }
}
