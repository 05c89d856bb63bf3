//! Request retries against the control plane.
//!
//! Network failures, 429 and 5xx are retried with capped exponential backoff
//! and equal jitter. A 429 that names its own wait is honored as is.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{info_span, warn, Instrument};

use crate::error::{PlaneError, PlaneResult};
use crate::metrics::record_retry;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// `PLANE_RETRY_MAX_ATTEMPTS`, `PLANE_RETRY_BASE_MS`, `PLANE_RETRY_MAX_MS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let read = |name: &str| std::env::var(name).ok().and_then(|v| v.parse::<u64>().ok());

        Self {
            max_retries: read("PLANE_RETRY_MAX_ATTEMPTS")
                .map(|n| n as u32)
                .unwrap_or(defaults.max_retries),
            base_delay: read("PLANE_RETRY_BASE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            max_delay: read("PLANE_RETRY_MAX_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
        }
    }

    /// Wait before retry number `retry` (0-based) after `error`.
    pub(crate) fn delay_after(&self, retry: u32, error: &PlaneError) -> Duration {
        if let Some(ms) = error.retry_after_ms() {
            return Duration::from_millis(ms);
        }
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        let ceiling = self.base_delay.saturating_mul(factor).min(self.max_delay);

        // Half fixed, half jittered; sub-second clock noise is enough here
        let noise = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos() % 1000)
            .unwrap_or(0) as f64
            / 1000.0;
        let half = ceiling / 2;
        (half + half.mul_f64(noise)).max(self.base_delay.min(ceiling))
    }
}

/// Run `op`, retrying transient failures.
///
/// Version conflicts and other client errors return immediately.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: &'static str, op: F) -> PlaneResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = PlaneResult<T>>,
{
    let mut retry = 0u32;
    loop {
        let span = info_span!("plane_attempt", operation = %operation, attempt = retry + 1);
        let error = match op().instrument(span).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        if !error.is_retryable() || retry >= config.max_retries {
            return Err(error);
        }

        let delay = config.delay_after(retry, &error);
        record_retry(operation, &error);
        warn!(
            operation = %operation,
            attempt = retry + 1,
            delay_ms = delay.as_millis() as u64,
            "Control plane request failed, retrying: {}",
            error
        );
        tokio::time::sleep(delay).await;
        retry += 1;
    }
}
