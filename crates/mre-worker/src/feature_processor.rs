//! Feature matching over synced blobs.
//!
//! Each local blob is the cached feature data of one segment for one audio
//! track. A segment is selected when at least one active criterion of the
//! replay matches a data point of its video group or of the replay's audio
//! track group. Reviewer feedback can force a segment in (likes) or keep it
//! out (dislikes).

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures::future::join_all;
use mre_models::segment::seconds_to_millis;
use mre_models::{
    BoundaryContext, ClipPreviewFeedback, FeatureBlob, FeatureCriterion, ReplayRequest,
    ReplayResult, Segment,
};
use mre_storage::{CacheKey, LocalCacheDir};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::WorkerResult;

/// Matches found in one scan.
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    /// Selected segments, ascending by effective start
    pub results: Vec<ReplayResult>,
    /// Blobs that were read and evaluated
    pub processed_blob_ids: Vec<String>,
    pub skipped_ignored: usize,
    /// Blobs absent or unreadable locally
    pub unreadable: usize,
    pub excluded_disliked: usize,
}

enum BlobVerdict {
    Selected(ReplayResult),
    Excluded,
    NoMatch,
    Unreadable,
}

/// Where a blob's segment sits and how reviewers saw it.
struct Placement {
    start: f64,
    end: f64,
    optimized: Option<(f64, f64)>,
    context: BoundaryContext,
}

/// Scans the blobs of one replay computation.
pub struct ReplayFeatureProcessor {
    request: Arc<ReplayRequest>,
    /// Segments by start in milliseconds
    segments: HashMap<i64, Vec<Segment>>,
    feedback: Vec<ClipPreviewFeedback>,
    concurrency: usize,
}

impl ReplayFeatureProcessor {
    /// `segments` are the segments in scope, nested ones included; blobs are
    /// matched to them by start time.
    pub fn new(
        request: Arc<ReplayRequest>,
        segments: Vec<Segment>,
        feedback: Vec<ClipPreviewFeedback>,
        concurrency: usize,
    ) -> Self {
        let mut by_start: HashMap<i64, Vec<Segment>> = HashMap::new();
        for segment in segments {
            by_start
                .entry(seconds_to_millis(segment.start))
                .or_default()
                .push(segment);
        }
        Self {
            request,
            segments: by_start,
            feedback,
            concurrency: concurrency.max(1),
        }
    }

    /// Evaluate every local blob of the replay's audio track that is not on
    /// its ignore list.
    pub async fn find_matching_segments(
        &self,
        local: &LocalCacheDir,
    ) -> WorkerResult<MatchOutcome> {
        let mut outcome = MatchOutcome::default();

        let ignore: &BTreeSet<String> = &self.request.ignore_list;
        let mut candidates = Vec::new();
        for key in local.list_keys().await? {
            if key.audio_track != self.request.audio_track {
                continue;
            }
            if ignore.contains(&key.blob_id()) {
                outcome.skipped_ignored += 1;
                continue;
            }
            candidates.push(key);
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let scans = candidates.iter().map(|key| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let verdict = match local.read_blob(key).await {
                    Ok(Some(blob)) => self.evaluate(key, &blob),
                    Ok(None) => {
                        debug!(key = %key, "Feature blob not present locally");
                        BlobVerdict::Unreadable
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "Skipping unreadable feature blob");
                        BlobVerdict::Unreadable
                    }
                };
                (key, verdict)
            }
        });

        for (key, verdict) in join_all(scans).await {
            match verdict {
                BlobVerdict::Unreadable => {
                    outcome.unreadable += 1;
                    continue;
                }
                BlobVerdict::Selected(result) => outcome.results.push(result),
                BlobVerdict::Excluded => outcome.excluded_disliked += 1,
                BlobVerdict::NoMatch => {}
            }
            outcome.processed_blob_ids.push(key.blob_id());
        }

        outcome
            .results
            .sort_by(|a, b| a.effective_start().total_cmp(&b.effective_start()));
        Ok(outcome)
    }

    fn placement(&self, key: &CacheKey, blob: &FeatureBlob) -> Placement {
        let track = self.request.audio_track;
        // Segments sharing a start are told apart by their end.
        let segment = self.segments.get(&key.start_millis).and_then(|same_start| {
            same_start
                .iter()
                .find(|s| seconds_to_millis(s.end) == key.end_millis)
                .or_else(|| same_start.first())
        });
        match segment {
            Some(segment) => {
                let optimized = segment.optimized_bounds(track);
                Placement {
                    start: segment.start,
                    end: segment.end,
                    optimized,
                    context: BoundaryContext::for_segment(optimized.is_some()),
                }
            }
            None => Placement {
                start: blob.start,
                end: blob.end,
                optimized: None,
                context: BoundaryContext::Original,
            },
        }
    }

    fn has_feedback(&self, placement: &Placement, wanted: fn(&ClipPreviewFeedback) -> bool) -> bool {
        self.feedback.iter().any(|f| {
            wanted(f) && f.applies_to(placement.start, placement.context, self.request.audio_track)
        })
    }

    fn evaluate(&self, key: &CacheKey, blob: &FeatureBlob) -> BlobVerdict {
        let placement = self.placement(key, blob);
        let mut result = ReplayResult::new(placement.start, placement.end);
        if let Some((start, end)) = placement.optimized {
            result = result.with_optimized(start, end);
        }

        if self.request.include_liked_segments
            && self.has_feedback(&placement, ClipPreviewFeedback::is_like)
        {
            result.force_included = true;
            return BlobVerdict::Selected(result);
        }

        if self.request.ignore_disliked_segments
            && self.has_feedback(&placement, ClipPreviewFeedback::is_dislike)
        {
            debug!(start = placement.start, "Excluding disliked segment");
            return BlobVerdict::Excluded;
        }

        let matched = match_criteria(
            self.request.active_features(),
            blob,
            self.request.audio_track,
        );
        if matched.is_empty() {
            return BlobVerdict::NoMatch;
        }

        result.score = matched.iter().map(FeatureCriterion::score).sum();
        result.features = matched;
        BlobVerdict::Selected(result)
    }
}

/// Criteria satisfied by a blob, crediting each attribute at most once.
pub fn match_criteria<'a>(
    criteria: impl Iterator<Item = &'a FeatureCriterion>,
    blob: &FeatureBlob,
    audio_track: u32,
) -> Vec<FeatureCriterion> {
    let mut credited: BTreeSet<&str> = BTreeSet::new();
    let mut matched = Vec::new();

    for criterion in criteria {
        if credited.contains(criterion.attrib_name.as_str()) {
            continue;
        }
        if blob.points_for(audio_track).any(|p| criterion.matches(p)) {
            credited.insert(criterion.attrib_name.as_str());
            matched.push(criterion.clone());
        }
    }
    matched
}
