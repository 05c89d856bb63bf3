//! Control plane request metrics.

use std::time::Duration;

use metrics::{counter, histogram};

use crate::error::PlaneError;

pub mod names {
    /// Requests by operation and outcome.
    pub const REQUESTS_TOTAL: &str = "plane_requests_total";
    pub const REQUEST_SECONDS: &str = "plane_request_seconds";
    /// Retries by operation and the status that caused them.
    pub const RETRIES_TOTAL: &str = "plane_retries_total";
    /// Rejected conditional writes of replay results.
    pub const VERSION_CONFLICTS_TOTAL: &str = "plane_version_conflicts_total";
}

/// Coarse outcome label, keeps label cardinality bounded.
fn outcome<T>(result: &Result<T, PlaneError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(PlaneError::NotFound(_)) => "not_found",
        Err(e) if e.is_conflict() => "conflict",
        Err(e) if e.is_retryable() => "transient",
        Err(_) => "error",
    }
}

/// Record a finished request.
pub fn record_request<T>(operation: &'static str, result: &Result<T, PlaneError>, elapsed: Duration) {
    counter!(
        names::REQUESTS_TOTAL,
        "operation" => operation,
        "outcome" => outcome(result)
    )
    .increment(1);
    histogram!(names::REQUEST_SECONDS, "operation" => operation).record(elapsed.as_secs_f64());

    if matches!(result, Err(e) if e.is_conflict()) {
        counter!(names::VERSION_CONFLICTS_TOTAL).increment(1);
    }
}

/// Record a retry caused by `error`.
pub fn record_retry(operation: &'static str, error: &PlaneError) {
    let status = error
        .http_status()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "network".to_string());
    counter!(names::RETRIES_TOTAL, "operation" => operation, "status" => status).increment(1);
}
