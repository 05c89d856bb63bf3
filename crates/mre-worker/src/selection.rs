//! Merging and summarizing replay results.

use mre_models::segment::same_instant;
use mre_models::{reduce_to_roots, DurationSummarization, ReplayResult, ScanOrder};

/// Outcome of merging new matches into a replay's results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Merged {
    /// Results ascending by effective start, pairwise non-overlapping
    pub results: Vec<ReplayResult>,
    pub added: usize,
    pub rejected: usize,
}

fn by_effective_start(a: &ReplayResult, b: &ReplayResult) -> std::cmp::Ordering {
    a.effective_start().total_cmp(&b.effective_start())
}

/// Insert new results into `existing`.
///
/// New results are root-reduced first. Each is then inserted at its position
/// by effective start unless an existing entry shares that start or overlaps
/// it; the entry seen first stays.
pub fn merge_results(existing: &[ReplayResult], new: Vec<ReplayResult>) -> Merged {
    let mut results = existing.to_vec();
    results.sort_by(by_effective_start);

    let mut candidates = new;
    candidates.sort_by(by_effective_start);
    let candidates = reduce_to_roots(candidates, ScanOrder::Ascending);

    let mut added = 0;
    let mut rejected = 0;
    for candidate in candidates {
        let clash = results.iter().any(|kept| {
            same_instant(kept.effective_start(), candidate.effective_start())
                || kept.overlaps(&candidate)
        });
        if clash {
            rejected += 1;
            continue;
        }
        let at = results.partition_point(|kept| {
            kept.effective_start() < candidate.effective_start()
        });
        results.insert(at, candidate);
        added += 1;
    }

    Merged {
        results,
        added,
        rejected,
    }
}

/// Keep the best-scoring results that fit the duration budget.
///
/// Candidates are ranked by score, earlier start first on ties, and accepted
/// while the running total stays within `duration + tolerance`. The survivors
/// come back in playback order.
pub fn summarize(results: Vec<ReplayResult>, summary: &DurationSummarization) -> Vec<ReplayResult> {
    let limit = summary.limit();
    let mut ranked = results;
    ranked.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| by_effective_start(a, b))
    });

    let mut total = 0.0;
    let mut kept = Vec::new();
    for result in ranked {
        let duration = result.duration();
        if total + duration <= limit {
            total += duration;
            kept.push(result);
        }
    }

    kept.sort_by(by_effective_start);
    kept
}

/// Whether results are sorted and free of overlaps.
pub fn is_non_overlapping(results: &[ReplayResult]) -> bool {
    results.windows(2).all(|pair| {
        pair[0].effective_start() <= pair[1].effective_start()
            && pair[0].effective_end() <= pair[1].effective_start()
    })
}
