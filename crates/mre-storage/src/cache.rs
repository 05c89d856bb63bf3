//! Feature cache abstraction.
//!
//! The cache is write-once per `(segment, track)` key; readers never see a
//! blob change after it was stored.

use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use mre_models::FeatureBlob;
use tracing::{debug, warn};

use crate::client::S3Client;
use crate::error::{StorageError, StorageResult};
use crate::key::CacheKey;

/// Blob cache of per-segment feature data.
#[async_trait]
pub trait FeatureCache: Send + Sync {
    /// Whether a blob exists for the key.
    async fn exists(&self, key: &CacheKey) -> StorageResult<bool>;

    /// Raw blob bytes, `None` when absent.
    async fn get_bytes(&self, key: &CacheKey) -> StorageResult<Option<Vec<u8>>>;

    /// Store a blob.
    async fn put(&self, key: &CacheKey, blob: &FeatureBlob) -> StorageResult<()>;

    /// Hour partitions that hold at least one blob, ascending.
    async fn list_partitions(&self, program: &str, event: &str) -> StorageResult<Vec<u32>>;

    /// Every blob key inside one hour partition.
    async fn list_partition(
        &self,
        program: &str,
        event: &str,
        hour: u32,
    ) -> StorageResult<Vec<CacheKey>>;

    /// Decoded blob, `None` when absent.
    async fn get(&self, key: &CacheKey) -> StorageResult<Option<FeatureBlob>> {
        match self.get_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

/// Feature cache backed by an S3 bucket.
#[derive(Clone)]
pub struct S3FeatureCache {
    s3: S3Client,
}

impl S3FeatureCache {
    pub fn new(s3: S3Client) -> Self {
        Self { s3 }
    }
}

#[async_trait]
impl FeatureCache for S3FeatureCache {
    async fn exists(&self, key: &CacheKey) -> StorageResult<bool> {
        self.s3.exists(&key.object_key()).await
    }

    async fn get_bytes(&self, key: &CacheKey) -> StorageResult<Option<Vec<u8>>> {
        let bytes = self.s3.get_object(&key.object_key()).await?;
        if bytes.is_none() {
            debug!(key = %key, "Feature blob not found");
        }
        Ok(bytes)
    }

    async fn put(&self, key: &CacheKey, blob: &FeatureBlob) -> StorageResult<()> {
        let body = serde_json::to_vec(blob)?;
        self.s3.put_json(&key.object_key(), body).await
    }

    async fn list_partitions(&self, program: &str, event: &str) -> StorageResult<Vec<u32>> {
        let event_prefix = CacheKey::event_prefix(program, event);
        let listing = self.s3.list(&event_prefix, Some("/")).await?;

        let mut hours: Vec<u32> = listing
            .prefixes
            .iter()
            .filter_map(|p| {
                p.strip_prefix(&event_prefix)
                    .map(|rest| rest.trim_end_matches('/'))
                    .and_then(|hour| hour.parse().ok())
            })
            .collect();
        hours.sort_unstable();
        hours.dedup();
        Ok(hours)
    }

    async fn list_partition(
        &self,
        program: &str,
        event: &str,
        hour: u32,
    ) -> StorageResult<Vec<CacheKey>> {
        let prefix = CacheKey::partition_prefix(program, event, hour);
        let listing = self.s3.list(&prefix, None).await?;

        let mut keys = Vec::with_capacity(listing.keys.len());
        for object in &listing.keys {
            match CacheKey::from_object_key(program, event, object) {
                Ok(key) => keys.push(key),
                Err(e) => warn!(object = %object, error = %e, "Skipping foreign object in feature cache"),
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// In-process feature cache.
///
/// Used by tests and local runs. Keys registered through
/// [`MemoryFeatureCache::fail_on`] make `get_bytes` fail to simulate a
/// flaky store.
#[derive(Default)]
pub struct MemoryFeatureCache {
    blobs: RwLock<BTreeMap<CacheKey, Vec<u8>>>,
    failing: RwLock<HashSet<CacheKey>>,
    fail_listing: RwLock<bool>,
}

impl MemoryFeatureCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw bytes, bypassing serialization (e.g. to plant a corrupt blob).
    pub fn insert_raw(&self, key: CacheKey, bytes: Vec<u8>) {
        if let Ok(mut blobs) = self.blobs.write() {
            blobs.insert(key, bytes);
        }
    }

    /// Make fetches of `key` fail with a download error.
    pub fn fail_on(&self, key: CacheKey) {
        if let Ok(mut failing) = self.failing.write() {
            failing.insert(key);
        }
    }

    /// Make partition listings fail.
    pub fn set_listing_fails(&self, fail: bool) {
        if let Ok(mut flag) = self.fail_listing.write() {
            *flag = fail;
        }
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_listing(&self) -> StorageResult<()> {
        if self.fail_listing.read().map(|f| *f).unwrap_or(false) {
            return Err(StorageError::ListFailed("listing disabled".to_string()));
        }
        Ok(())
    }

    fn lock_poisoned() -> StorageError {
        StorageError::AwsSdk("memory cache lock poisoned".to_string())
    }
}

#[async_trait]
impl FeatureCache for MemoryFeatureCache {
    async fn exists(&self, key: &CacheKey) -> StorageResult<bool> {
        let blobs = self.blobs.read().map_err(|_| Self::lock_poisoned())?;
        Ok(blobs.contains_key(key))
    }

    async fn get_bytes(&self, key: &CacheKey) -> StorageResult<Option<Vec<u8>>> {
        let failing = self.failing.read().map_err(|_| Self::lock_poisoned())?;
        if failing.contains(key) {
            return Err(StorageError::download_failed(format!("injected failure for {}", key)));
        }
        drop(failing);

        let blobs = self.blobs.read().map_err(|_| Self::lock_poisoned())?;
        Ok(blobs.get(key).cloned())
    }

    async fn put(&self, key: &CacheKey, blob: &FeatureBlob) -> StorageResult<()> {
        let body = serde_json::to_vec(blob)?;
        let mut blobs = self.blobs.write().map_err(|_| Self::lock_poisoned())?;
        blobs.insert(key.clone(), body);
        Ok(())
    }

    async fn list_partitions(&self, program: &str, event: &str) -> StorageResult<Vec<u32>> {
        self.check_listing()?;
        let blobs = self.blobs.read().map_err(|_| Self::lock_poisoned())?;
        let mut hours: Vec<u32> = blobs
            .keys()
            .filter(|k| k.program == program && k.event == event)
            .map(|k| k.hour)
            .collect();
        // Keys order by (program, event, hour), so hours arrive sorted
        hours.dedup();
        Ok(hours)
    }

    async fn list_partition(
        &self,
        program: &str,
        event: &str,
        hour: u32,
    ) -> StorageResult<Vec<CacheKey>> {
        self.check_listing()?;
        let blobs = self.blobs.read().map_err(|_| Self::lock_poisoned())?;
        Ok(blobs
            .keys()
            .filter(|k| k.program == program && k.event == event && k.hour == hour)
            .cloned()
            .collect())
    }
}
