//! Local mirror of synced feature blobs.
//!
//! Layout matches the blob ids: `{root}/{hour}/{start_ms}_{end_ms}_{track}.json`.

use std::path::{Path, PathBuf};

use mre_models::FeatureBlob;
use tracing::{debug, warn};

use crate::error::StorageResult;
use crate::key::CacheKey;

/// Directory holding one event's synced blobs.
#[derive(Debug, Clone)]
pub struct LocalCacheDir {
    root: PathBuf,
    program: String,
    event: String,
}

impl LocalCacheDir {
    /// Create (or reuse) a cache directory for an event.
    pub async fn create(
        root: impl AsRef<Path>,
        program: impl Into<String>,
        event: impl Into<String>,
    ) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            program: program.into(),
            event: event.into(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.relative_path())
    }

    pub async fn contains(&self, key: &CacheKey) -> bool {
        tokio::fs::try_exists(self.path_for(key))
            .await
            .unwrap_or(false)
    }

    /// Write raw blob bytes.
    pub async fn write(&self, key: &CacheKey, bytes: &[u8]) -> StorageResult<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        debug!(path = %path.display(), "Wrote feature blob");
        Ok(())
    }

    /// Read and decode a blob; `None` when the file is absent.
    pub async fn read_blob(&self, key: &CacheKey) -> StorageResult<Option<FeatureBlob>> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Every blob key present locally, sorted.
    pub async fn list_keys(&self) -> StorageResult<Vec<CacheKey>> {
        let mut keys = Vec::new();
        let mut hours = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(e.into()),
        };

        while let Some(hour_dir) = hours.next_entry().await? {
            if !hour_dir.file_type().await?.is_dir() {
                continue;
            }
            let hour = hour_dir.file_name().to_string_lossy().to_string();
            let mut files = tokio::fs::read_dir(hour_dir.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let name = file.file_name().to_string_lossy().to_string();
                let blob_id = format!("{}/{}", hour, name);
                match CacheKey::from_blob_id(&self.program, &self.event, &blob_id) {
                    Ok(key) => keys.push(key),
                    Err(e) => warn!(file = %blob_id, error = %e, "Ignoring unexpected file in local cache"),
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    /// Remove the directory and everything in it.
    pub async fn remove(self) -> StorageResult<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_read_list() {
        let tmp = TempDir::new().unwrap();
        let dir = LocalCacheDir::create(tmp.path().join("sync"), "p", "e").await.unwrap();

        let k1 = CacheKey::for_segment("p", "e", 5.0, 6.0, 1);
        let k2 = CacheKey::for_segment("p", "e", 3700.0, 3702.5, 1);
        let blob = FeatureBlob::new(5.0, 6.0);
        dir.write(&k1, &serde_json::to_vec(&blob).unwrap()).await.unwrap();
        dir.write(&k2, &serde_json::to_vec(&blob).unwrap()).await.unwrap();

        assert!(dir.contains(&k1).await);
        assert_eq!(dir.read_blob(&k1).await.unwrap(), Some(blob));
        assert_eq!(dir.list_keys().await.unwrap(), vec![k1, k2]);
    }

    #[tokio::test]
    async fn test_missing_and_corrupt_blobs() {
        let tmp = TempDir::new().unwrap();
        let dir = LocalCacheDir::create(tmp.path(), "p", "e").await.unwrap();

        let key = CacheKey::for_segment("p", "e", 5.0, 6.0, 1);
        assert!(dir.read_blob(&key).await.unwrap().is_none());

        dir.write(&key, b"{broken").await.unwrap();
        assert!(matches!(dir.read_blob(&key).await, Err(StorageError::Json(_))));
    }

    #[tokio::test]
    async fn test_list_ignores_stray_files() {
        let tmp = TempDir::new().unwrap();
        let dir = LocalCacheDir::create(tmp.path(), "p", "e").await.unwrap();
        tokio::fs::create_dir_all(tmp.path().join("0")).await.unwrap();
        tokio::fs::write(tmp.path().join("0").join("README"), b"x").await.unwrap();
        tokio::fs::write(tmp.path().join("top.txt"), b"x").await.unwrap();
        assert!(dir.list_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("inv");
        let dir = LocalCacheDir::create(&root, "p", "e").await.unwrap();
        dir.remove().await.unwrap();
        assert!(!root.exists());
    }
}
