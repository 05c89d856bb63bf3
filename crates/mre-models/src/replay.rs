//! Replay request and result models.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::feature::{FeatureCriterion, RawCriterion};
use crate::resolution::resolution_dimensions;

fn default_audio_track() -> u32 {
    1
}

/// Replay processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
pub enum ReplayStatus {
    #[default]
    Queued,
    Processing,
    Complete,
    Error,
}

impl ReplayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplayStatus::Queued => "Queued",
            ReplayStatus::Processing => "Processing",
            ReplayStatus::Complete => "Complete",
            ReplayStatus::Error => "Error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReplayStatus::Complete | ReplayStatus::Error)
    }
}

impl std::fmt::Display for ReplayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Target-duration selection for batch replays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct DurationSummarization {
    /// Target replay length in seconds
    pub duration: f64,

    /// Allowed overshoot in seconds
    #[serde(default, rename = "ToleranceMaxLimitInSecs")]
    pub tolerance_secs: f64,
}

impl DurationSummarization {
    /// Upper bound on the accumulated duration.
    pub fn limit(&self) -> f64 {
        self.duration + self.tolerance_secs.max(0.0)
    }
}

/// Append-only audit trail entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct DebugEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl DebugEntry {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

/// A segment selected into a replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct ReplayResult {
    pub start: f64,

    pub end: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opto_start: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opto_end: Option<f64>,

    /// Criteria that matched the segment
    #[serde(default)]
    #[schemars(with = "Vec<RawCriterion>")]
    pub features: Vec<FeatureCriterion>,

    /// Included through a "like" regardless of features
    #[serde(default)]
    pub force_included: bool,

    /// Sum of matched criterion weights
    #[serde(default)]
    pub score: f64,
}

impl ReplayResult {
    pub fn new(start: f64, end: f64) -> Self {
        Self {
            start,
            end,
            opto_start: None,
            opto_end: None,
            features: Vec::new(),
            force_included: false,
            score: 0.0,
        }
    }

    pub fn with_optimized(mut self, start: f64, end: f64) -> Self {
        self.opto_start = Some(start);
        self.opto_end = Some(end);
        self
    }

    /// Start used for ordering and rendering.
    pub fn effective_start(&self) -> f64 {
        self.opto_start.unwrap_or(self.start)
    }

    /// End used for ordering and rendering.
    pub fn effective_end(&self) -> f64 {
        self.opto_end.unwrap_or(self.end)
    }

    pub fn duration(&self) -> f64 {
        (self.effective_end() - self.effective_start()).max(0.0)
    }

    /// Effective ranges intersect (touching ends do not count).
    pub fn overlaps(&self, other: &ReplayResult) -> bool {
        self.effective_start() < other.effective_end()
            && other.effective_start() < self.effective_end()
    }
}

/// A named replay selection and its accumulated results.
///
/// One instance is keyed by `(program, event, replay_id)` and accumulates
/// across incremental invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct ReplayRequest {
    pub program: String,

    pub event: String,

    #[serde(rename = "ReplayId")]
    pub replay_id: String,

    #[serde(default)]
    pub description: String,

    /// Selection criteria
    #[serde(default)]
    #[schemars(with = "Vec<RawCriterion>")]
    pub features: Vec<FeatureCriterion>,

    #[serde(default = "default_audio_track")]
    pub audio_track: u32,

    /// Incremental (true) vs batch (false) mode
    #[serde(default)]
    pub catchup: bool,

    /// Output resolutions for rendering
    #[serde(default)]
    pub resolutions: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_name: Option<String>,

    #[serde(default)]
    pub ignore_disliked_segments: bool,

    #[serde(default)]
    pub include_liked_segments: bool,

    #[serde(default)]
    pub create_hls: bool,

    #[serde(default)]
    pub create_mp4: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub durationbased_summarization: Option<DurationSummarization>,

    #[serde(default)]
    pub replay_results: Vec<ReplayResult>,

    #[serde(default)]
    pub status: ReplayStatus,

    #[serde(default)]
    pub total_score: f64,

    #[serde(default)]
    pub debug_info: Vec<DebugEntry>,

    /// Cache blob keys already consumed by earlier invocations
    #[serde(default)]
    pub ignore_list: BTreeSet<String>,

    /// Optimistic concurrency counter for `replay_results`
    #[serde(default)]
    pub version: u64,
}

impl ReplayRequest {
    /// Create a new queued replay request.
    pub fn new(
        program: impl Into<String>,
        event: impl Into<String>,
        replay_id: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            event: event.into(),
            replay_id: replay_id.into(),
            description: String::new(),
            features: Vec::new(),
            audio_track: default_audio_track(),
            catchup: false,
            resolutions: Vec::new(),
            transition_name: None,
            ignore_disliked_segments: false,
            include_liked_segments: false,
            create_hls: false,
            create_mp4: false,
            durationbased_summarization: None,
            replay_results: Vec::new(),
            status: ReplayStatus::Queued,
            total_score: 0.0,
            debug_info: Vec::new(),
            ignore_list: BTreeSet::new(),
            version: 0,
        }
    }

    pub fn with_feature(mut self, criterion: FeatureCriterion) -> Self {
        self.features.push(criterion);
        self
    }

    pub fn with_catchup(mut self, catchup: bool) -> Self {
        self.catchup = catchup;
        self
    }

    /// Criteria that take part in matching.
    pub fn active_features(&self) -> impl Iterator<Item = &FeatureCriterion> {
        self.features.iter().filter(|c| c.is_active())
    }

    /// Whether any clip rendering was requested.
    pub fn wants_rendering(&self) -> bool {
        self.create_hls || self.create_mp4
    }

    /// Check the fields the engine cannot work without.
    pub fn validate(&self) -> ModelResult<()> {
        if self.program.trim().is_empty() || self.event.trim().is_empty() {
            return Err(ModelError::invalid_request("program and event are required"));
        }
        if self.replay_id.trim().is_empty() {
            return Err(ModelError::invalid_request("replay id is required"));
        }
        if self.audio_track == 0 {
            return Err(ModelError::invalid_request("audio track ids start at 1"));
        }
        if self.wants_rendering() && self.resolutions.is_empty() {
            return Err(ModelError::invalid_request(
                "rendering requested without any output resolution",
            ));
        }
        for resolution in &self.resolutions {
            if resolution_dimensions(resolution).is_none() {
                return Err(ModelError::UnknownResolution(resolution.clone()));
            }
        }
        if let Some(ref summary) = self.durationbased_summarization {
            if summary.duration <= 0.0 {
                return Err(ModelError::invalid_request(
                    "duration-based summarization needs a positive duration",
                ));
            }
        }
        Ok(())
    }
}

/// Result write applied by the engine after a computation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReplayUpdate {
    pub replay_results: Vec<ReplayResult>,
    pub total_score: f64,
    /// Entries appended to the audit trail
    pub debug_info: Vec<DebugEntry>,
}

impl ReplayUpdate {
    pub fn new(replay_results: Vec<ReplayResult>) -> Self {
        let total_score = replay_results.iter().map(|r| r.score).sum();
        Self {
            replay_results,
            total_score,
            debug_info: Vec::new(),
        }
    }

    pub fn with_debug(mut self, message: impl Into<String>) -> Self {
        self.debug_info.push(DebugEntry::now(message));
        self
    }
}
