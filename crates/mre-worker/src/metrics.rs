//! Engine metrics.

use std::time::Duration;

pub mod names {
    pub const CACHE_SYNC_SECONDS: &str = "replay_cache_sync_seconds";
    pub const CACHE_BLOBS_TOTAL: &str = "replay_cache_blobs_total";
    pub const SEGMENTS_SELECTED_TOTAL: &str = "replay_segments_selected_total";
    pub const INVOCATIONS_TOTAL: &str = "replay_invocations_total";
}

/// Record how long one cache sync took.
pub fn record_cache_sync(catchup: bool, elapsed: Duration) {
    let mode = if catchup { "catchup" } else { "full" };
    metrics::histogram!(names::CACHE_SYNC_SECONDS, "mode" => mode).record(elapsed.as_secs_f64());
}

/// Count blobs by sync outcome (`fetched`, `cached`, `missing`, `failed`).
pub fn record_blobs(result: &'static str, count: u64) {
    if count > 0 {
        metrics::counter!(names::CACHE_BLOBS_TOTAL, "result" => result).increment(count);
    }
}

pub fn record_segments_selected(count: usize) {
    metrics::counter!(names::SEGMENTS_SELECTED_TOTAL).increment(count as u64);
}

/// Count an engine invocation by triggering state and outcome.
pub fn record_invocation(state: &'static str, outcome: &'static str) {
    metrics::counter!(names::INVOCATIONS_TOTAL, "state" => state, "outcome" => outcome)
        .increment(1);
}
