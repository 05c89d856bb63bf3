//! Feature cache errors.

use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Feature cache misconfigured: {0}")]
    ConfigError(String),

    #[error("Feature blob upload failed: {0}")]
    UploadFailed(String),

    #[error("Feature blob download failed: {0}")]
    DownloadFailed(String),

    #[error("Feature cache listing failed: {0}")]
    ListFailed(String),

    /// Object key outside the `{hour}/{start}_{end}_{track}.json` layout
    #[error("Invalid feature cache key: {0}")]
    InvalidKey(String),

    #[error("Local cache I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("Feature blob is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("S3 error: {0}")]
    AwsSdk(String),
}

impl StorageError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::DownloadFailed(msg.into())
    }

    pub fn invalid_key(msg: impl Into<String>) -> Self {
        Self::InvalidKey(msg.into())
    }

    /// Store-side failures a later attempt may not hit.
    ///
    /// Corrupt blobs and bad keys stay broken, so they are not transient.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::UploadFailed(_)
                | StorageError::DownloadFailed(_)
                | StorageError::ListFailed(_)
                | StorageError::AwsSdk(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StorageError::ListFailed("throttled".into()).is_transient());
        assert!(!StorageError::invalid_key("0/abc.json").is_transient());
        let corrupt = serde_json::from_slice::<serde_json::Value>(b"{").unwrap_err();
        assert!(!StorageError::from(corrupt).is_transient());
    }
}
