//! Feature cache synchronization.
//!
//! Copies the blobs of the hour partitions in scope from the shared feature
//! cache into a local directory before matching. Fetches run in batches of at
//! most `sync_batch_size`, each batch joined before the next starts.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use mre_storage::{CacheKey, FeatureCache, LocalCacheDir, StorageError};
use tracing::{debug, info, warn};

use crate::config::EngineSettings;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::retry::{retry_async, RetryConfig};

/// What one sync did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Blobs downloaded in this sync
    pub fetched: usize,
    /// Blobs that were already present locally
    pub already_local: usize,
    /// Listed blobs that vanished before they could be fetched
    pub missing: usize,
    /// Blobs whose fetch failed
    pub failed: usize,
}

impl SyncReport {
    pub fn available(&self) -> usize {
        self.fetched + self.already_local
    }
}

enum FetchOutcome {
    Fetched,
    Missing,
    Failed,
}

/// Materializes cached feature blobs locally.
pub struct CacheSyncManager {
    cache: Arc<dyn FeatureCache>,
    batch_size: usize,
    partition_window: usize,
    listing_retry: RetryConfig,
}

impl CacheSyncManager {
    pub fn new(cache: Arc<dyn FeatureCache>, settings: &EngineSettings) -> Self {
        Self {
            cache,
            batch_size: settings.sync_batch_size.max(1),
            partition_window: settings.catchup_partition_window.max(1),
            listing_retry: RetryConfig::new("feature_cache_listing")
                .with_max_retries(settings.sync_retry_attempts)
                .with_base_delay(settings.sync_retry_base_delay),
        }
    }

    async fn with_listing_retry<T, F, Fut>(&self, what: &str, op: F) -> WorkerResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, StorageError>>,
    {
        retry_async(&self.listing_retry, StorageError::is_transient, op)
            .await
            .map_err(|exhausted| WorkerError::transient_store(format!("{}: {}", what, exhausted)))
    }

    /// Hour partitions a computation should read, ascending.
    ///
    /// Catch-up replays only look at the newest partitions; older blobs were
    /// consumed by earlier runs.
    pub async fn partitions_in_scope(
        &self,
        program: &str,
        event: &str,
        catchup: bool,
    ) -> WorkerResult<Vec<u32>> {
        let mut partitions = self
            .with_listing_retry("listing partitions", || {
                self.cache.list_partitions(program, event)
            })
            .await?;
        partitions.sort_unstable();
        partitions.dedup();

        if catchup && partitions.len() > self.partition_window {
            partitions.drain(..partitions.len() - self.partition_window);
        }
        Ok(partitions)
    }

    /// Sync every blob of the given partitions into `local`.
    ///
    /// Individual fetch failures are logged and counted, not raised: a blob
    /// that is absent locally simply yields no features. Listing failures are
    /// retried and then surface as `TransientStore`.
    pub async fn sync(
        &self,
        local: &LocalCacheDir,
        program: &str,
        event: &str,
        catchup: bool,
        partitions: &[u32],
    ) -> WorkerResult<SyncReport> {
        let started = Instant::now();
        let mut report = SyncReport::default();

        let mut wanted: Vec<CacheKey> = Vec::new();
        for &hour in partitions {
            let keys = self
                .with_listing_retry("listing partition", || {
                    self.cache.list_partition(program, event, hour)
                })
                .await?;
            for key in keys {
                if local.contains(&key).await {
                    report.already_local += 1;
                } else {
                    wanted.push(key);
                }
            }
        }

        for batch in wanted.chunks(self.batch_size) {
            let outcomes = join_all(batch.iter().map(|key| self.fetch(local, key))).await;
            for outcome in outcomes {
                match outcome {
                    FetchOutcome::Fetched => report.fetched += 1,
                    FetchOutcome::Missing => report.missing += 1,
                    FetchOutcome::Failed => report.failed += 1,
                }
            }
        }

        metrics::record_cache_sync(catchup, started.elapsed());
        metrics::record_blobs("fetched", report.fetched as u64);
        metrics::record_blobs("cached", report.already_local as u64);
        metrics::record_blobs("missing", report.missing as u64);
        metrics::record_blobs("failed", report.failed as u64);

        info!(
            program = %program,
            event = %event,
            catchup,
            partitions = partitions.len(),
            fetched = report.fetched,
            already_local = report.already_local,
            missing = report.missing,
            failed = report.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Feature cache synced"
        );
        Ok(report)
    }

    async fn fetch(&self, local: &LocalCacheDir, key: &CacheKey) -> FetchOutcome {
        match self.cache.get_bytes(key).await {
            Ok(Some(bytes)) => match local.write(key, &bytes).await {
                Ok(()) => FetchOutcome::Fetched,
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to write feature blob locally");
                    FetchOutcome::Failed
                }
            },
            Ok(None) => {
                debug!(key = %key, "Feature blob disappeared before fetch");
                FetchOutcome::Missing
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to fetch feature blob");
                FetchOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mre_models::FeatureBlob;
    use mre_storage::MemoryFeatureCache;
    use std::time::Duration;

    fn settings() -> EngineSettings {
        EngineSettings {
            sync_batch_size: 2,
            sync_retry_base_delay: Duration::from_millis(1),
            ..EngineSettings::default()
        }
    }

    async fn seeded_cache() -> Arc<MemoryFeatureCache> {
        let cache = Arc::new(MemoryFeatureCache::new());
        for start in [10.0, 20.0, 3700.0, 7300.0, 7400.0] {
            let key = CacheKey::for_segment("p", "e", start, start + 5.0, 1);
            cache
                .put(&key, &FeatureBlob::new(start, start + 5.0))
                .await
                .unwrap();
        }
        cache
    }

    #[tokio::test]
    async fn test_catchup_scope_is_newest_partitions() {
        let cache = seeded_cache().await;
        let manager = CacheSyncManager::new(cache, &settings());

        let full = manager.partitions_in_scope("p", "e", false).await.unwrap();
        assert_eq!(full, vec![0, 1, 2]);
        let catchup = manager.partitions_in_scope("p", "e", true).await.unwrap();
        assert_eq!(catchup, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_sync_fetches_in_batches_and_skips_local() {
        let cache = seeded_cache().await;
        let manager = CacheSyncManager::new(cache, &settings());
        let dir = tempfile::tempdir().unwrap();
        let local = LocalCacheDir::create(dir.path(), "p", "e").await.unwrap();

        let report = manager.sync(&local, "p", "e", false, &[0, 1, 2]).await.unwrap();
        assert_eq!(report.fetched, 5);
        assert_eq!(local.list_keys().await.unwrap().len(), 5);

        let again = manager.sync(&local, "p", "e", false, &[0, 1, 2]).await.unwrap();
        assert_eq!(again.fetched, 0);
        assert_eq!(again.already_local, 5);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_not_fatal() {
        let cache = seeded_cache().await;
        cache.fail_on(CacheKey::for_segment("p", "e", 20.0, 25.0, 1));
        let manager = CacheSyncManager::new(cache, &settings());
        let dir = tempfile::tempdir().unwrap();
        let local = LocalCacheDir::create(dir.path(), "p", "e").await.unwrap();

        let report = manager.sync(&local, "p", "e", false, &[0]).await.unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.available(), 1);
    }

    #[tokio::test]
    async fn test_listing_failure_surfaces_as_transient() {
        let cache = seeded_cache().await;
        cache.set_listing_fails(true);
        let manager = CacheSyncManager::new(cache, &settings());

        let err = manager.partitions_in_scope("p", "e", true).await.unwrap_err();
        assert!(matches!(err, WorkerError::TransientStore(_)));
        assert!(err.is_retryable());
    }
}
