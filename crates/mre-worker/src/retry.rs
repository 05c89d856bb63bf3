//! Backoff retries for feature cache calls and log throttling for the
//! executor's background loops.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

/// Backoff policy of one retried call site.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles per retry
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub operation_name: String,
}

impl RetryConfig {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            operation_name: operation_name.into(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// The last error of a call that never succeeded.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub error: E,
    pub attempts: u32,
}

impl<E: fmt::Display> fmt::Display for Exhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (after {} attempts)", self.error, self.attempts)
    }
}

/// Run `operation` until it succeeds, fails with an error `should_retry`
/// rejects, or the retries run out.
pub async fn retry_async<F, Fut, T, E, P>(
    config: &RetryConfig,
    should_retry: P,
    operation: F,
) -> Result<T, Exhausted<E>>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut retries = 0u32;
    loop {
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        if retries >= config.max_retries || !should_retry(&error) {
            return Err(Exhausted {
                error,
                attempts: retries + 1,
            });
        }

        let delay = config.backoff(retries);
        retries += 1;
        debug!(
            operation = %config.operation_name,
            retry = retries,
            delay_ms = delay.as_millis() as u64,
            "Retrying after error: {}",
            error
        );
        tokio::time::sleep(delay).await;
    }
}

/// Rate-limits log output of a background loop that keeps failing.
///
/// The first `log_limit` consecutive failures are reported; the streak is
/// then silenced until the next success.
#[derive(Debug, Default)]
pub struct FailureTracker {
    streak: u32,
    log_limit: u32,
}

impl FailureTracker {
    pub fn new(log_limit: u32) -> Self {
        Self {
            streak: 0,
            log_limit,
        }
    }

    pub fn record_success(&mut self) {
        if self.streak > self.log_limit {
            info!(failures = self.streak, "Recovered after suppressed failures");
        }
        self.streak = 0;
    }

    /// Returns `true` if this failure should be logged.
    pub fn record_failure(&mut self) -> bool {
        self.streak += 1;
        if self.streak == self.log_limit + 1 {
            warn!(
                limit = self.log_limit,
                "Repeated failures, silencing until recovery"
            );
        }
        self.streak <= self.log_limit
    }

    pub fn failure_count(&self) -> u32 {
        self.streak
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = RetryConfig::new("test").with_base_delay(Duration::from_millis(100));
        assert_eq!(config.backoff(0), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(400));
        assert_eq!(config.backoff(40), Duration::from_secs(5));
    }

    #[test]
    fn test_failure_tracker_suppression() {
        let mut tracker = FailureTracker::new(2);
        assert!(tracker.record_failure());
        assert!(tracker.record_failure());
        assert!(!tracker.record_failure());
        assert!(!tracker.record_failure());

        tracker.record_success();
        assert_eq!(tracker.failure_count(), 0);
        assert!(tracker.record_failure());
    }

    #[tokio::test]
    async fn test_eventual_success() {
        let config = RetryConfig::new("list").with_base_delay(Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let result = retry_async(&config, |_: &&str| true, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("flaky")
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let config = RetryConfig::new("list").with_base_delay(Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let result: Result<u32, _> = retry_async(&config, |_: &&str| false, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("bad key") }
        })
        .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 1);
        assert_eq!(exhausted.to_string(), "bad key (after 1 attempts)");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let config = RetryConfig::new("list")
            .with_max_retries(2)
            .with_base_delay(Duration::from_millis(1));

        let result: Result<(), _> = retry_async(&config, |_: &&str| true, || async { Err("down") }).await;
        assert_eq!(result.unwrap_err().attempts, 3);
    }
}
