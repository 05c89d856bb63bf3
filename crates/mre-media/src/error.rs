//! Error types for timeline assembly and rendering.

use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while assembling or rendering replay clips.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("No media chunks cover segment {start}..{end}")]
    MissingChunks { start: f64, end: f64 },

    #[error("Invalid timeline: {0}")]
    InvalidTimeline(String),

    #[error("Unknown output resolution: {0}")]
    UnknownResolution(String),

    #[error("Render submission failed: {0}")]
    SubmitFailed(String),

    #[error("Render job {job_id} failed: {message}")]
    RenderFailed { job_id: String, message: String },

    #[error("Render job {job_id} did not finish after {attempts} status checks")]
    RenderTimeout { job_id: String, attempts: u32 },

    #[error("Renderer returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl MediaError {
    pub fn invalid_timeline(message: impl Into<String>) -> Self {
        Self::InvalidTimeline(message.into())
    }

    pub fn submit_failed(message: impl Into<String>) -> Self {
        Self::SubmitFailed(message.into())
    }

    pub fn render_failed(job_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RenderFailed {
            job_id: job_id.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Transport problems and renderer 5xx are worth another try.
    pub fn is_retryable(&self) -> bool {
        match self {
            MediaError::Network(_) => true,
            MediaError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
