//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Tunables of the replay engine.
///
/// Resolved once per process and handed to every component that needs them.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Maximum concurrent blob fetches during cache sync
    pub sync_batch_size: usize,
    /// Hour partitions synced for catch-up replays, newest first
    pub catchup_partition_window: usize,
    /// Maximum blobs scanned concurrently
    pub scan_concurrency: usize,
    /// Attempts for listing the feature cache
    pub sync_retry_attempts: u32,
    /// Base backoff between listing attempts
    pub sync_retry_base_delay: Duration,
    /// Re-read/re-merge rounds on a version conflict
    pub conflict_retry_attempts: u32,
    /// Frame rate used for clip timecodes when the event has none
    pub frame_rate: u32,
    pub render_poll_interval: Duration,
    pub render_poll_attempts: u32,
    /// Root of the per-invocation local cache directories
    pub cache_dir: PathBuf,
    /// Prefix under which rendered replays are written
    pub output_prefix: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sync_batch_size: 10,
            catchup_partition_window: 2,
            scan_concurrency: 20,
            sync_retry_attempts: 3,
            sync_retry_base_delay: Duration::from_millis(200),
            conflict_retry_attempts: 5,
            frame_rate: 25,
            render_poll_interval: Duration::from_secs(10),
            render_poll_attempts: 90,
            cache_dir: std::env::temp_dir().join("mre-cache"),
            output_prefix: "s3://mre-replays".to_string(),
        }
    }
}

impl EngineSettings {
    /// Create settings from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            sync_batch_size: env_or("ENGINE_SYNC_BATCH_SIZE", defaults.sync_batch_size).max(1),
            catchup_partition_window: env_or(
                "ENGINE_CATCHUP_PARTITIONS",
                defaults.catchup_partition_window,
            )
            .max(1),
            scan_concurrency: env_or("ENGINE_SCAN_CONCURRENCY", defaults.scan_concurrency).max(1),
            sync_retry_attempts: env_or("ENGINE_SYNC_RETRY_ATTEMPTS", defaults.sync_retry_attempts),
            sync_retry_base_delay: Duration::from_millis(env_or(
                "ENGINE_SYNC_RETRY_BASE_MS",
                200u64,
            )),
            conflict_retry_attempts: env_or(
                "ENGINE_CONFLICT_RETRY_ATTEMPTS",
                defaults.conflict_retry_attempts,
            )
            .max(1),
            frame_rate: env_or("ENGINE_FRAME_RATE", defaults.frame_rate).max(1),
            render_poll_interval: Duration::from_secs(env_or("ENGINE_RENDER_POLL_SECS", 10u64)),
            render_poll_attempts: env_or(
                "ENGINE_RENDER_POLL_ATTEMPTS",
                defaults.render_poll_attempts,
            )
            .max(1),
            cache_dir: std::env::var("ENGINE_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            output_prefix: std::env::var("RENDER_OUTPUT_PREFIX")
                .unwrap_or(defaults.output_prefix),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent engine invocations
    pub max_concurrent_invocations: usize,
    /// Wall-clock limit of one invocation
    pub invocation_timeout: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// How often the worker scans for orphaned pending events
    pub claim_interval: Duration,
    /// Minimum idle time before a pending event can be claimed
    pub claim_min_idle: Duration,
    /// Port for the Prometheus exporter, if any
    pub metrics_port: Option<u16>,
    pub engine: EngineSettings,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_invocations: 4,
            invocation_timeout: Duration::from_secs(900), // 15 minutes
            shutdown_timeout: Duration::from_secs(60),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(960),
            metrics_port: None,
            engine: EngineSettings::default(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_concurrent_invocations: env_or("WORKER_MAX_INVOCATIONS", 4usize).max(1),
            invocation_timeout: Duration::from_secs(env_or(
                "WORKER_INVOCATION_TIMEOUT_SECS",
                900u64,
            )),
            shutdown_timeout: Duration::from_secs(env_or("WORKER_SHUTDOWN_TIMEOUT", 60u64)),
            claim_interval: Duration::from_secs(env_or("WORKER_CLAIM_INTERVAL_SECS", 30u64)),
            claim_min_idle: Duration::from_secs(env_or("WORKER_CLAIM_MIN_IDLE_SECS", 960u64)),
            metrics_port: std::env::var("METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
            engine: EngineSettings::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults() {
        let settings = EngineSettings::default();
        assert_eq!(settings.sync_batch_size, 10);
        assert_eq!(settings.catchup_partition_window, 2);
        assert_eq!(settings.scan_concurrency, 20);
        assert_eq!(settings.conflict_retry_attempts, 5);
        assert_eq!(settings.frame_rate, 25);
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        std::env::set_var("ENGINE_SYNC_BATCH_SIZE", "4");
        std::env::set_var("ENGINE_SCAN_CONCURRENCY", "0");
        std::env::set_var("WORKER_MAX_INVOCATIONS", "8");
        std::env::set_var("METRICS_PORT", "9100");

        let config = WorkerConfig::from_env();
        assert_eq!(config.engine.sync_batch_size, 4);
        assert_eq!(config.engine.scan_concurrency, 1);
        assert_eq!(config.max_concurrent_invocations, 8);
        assert_eq!(config.metrics_port, Some(9100));

        std::env::remove_var("ENGINE_SYNC_BATCH_SIZE");
        std::env::remove_var("ENGINE_SCAN_CONCURRENCY");
        std::env::remove_var("WORKER_MAX_INVOCATIONS");
        std::env::remove_var("METRICS_PORT");
    }
}
