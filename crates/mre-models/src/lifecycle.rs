//! Lifecycle events exchanged between pipeline stages.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known `detail-type` values on the lifecycle bus.
pub mod detail_types {
    pub const SEGMENTATION_STATUS: &str = "Segmentation Status";
    pub const OPTIMIZATION_STATUS: &str = "Optimization Status";
    pub const EVENT_STATUS: &str = "Event Status";
    pub const REPLAY_STATUS: &str = "Replay Status";
}

/// Pipeline state carried by a lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    SegmentCached,
    OptimizedSegmentCached,
    EventEnd,
    ReplayCreated,
    ReplayProcessed,
    ReplayProcessedWithClip,
    /// Any state this engine does not react to
    #[serde(other)]
    Other,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::SegmentCached => "SEGMENT_CACHED",
            LifecycleState::OptimizedSegmentCached => "OPTIMIZED_SEGMENT_CACHED",
            LifecycleState::EventEnd => "EVENT_END",
            LifecycleState::ReplayCreated => "REPLAY_CREATED",
            LifecycleState::ReplayProcessed => "REPLAY_PROCESSED",
            LifecycleState::ReplayProcessedWithClip => "REPLAY_PROCESSED_WITH_CLIP",
            LifecycleState::Other => "OTHER",
        }
    }

    /// States that trigger replay computation.
    pub fn is_trigger(&self) -> bool {
        matches!(
            self,
            LifecycleState::SegmentCached
                | LifecycleState::OptimizedSegmentCached
                | LifecycleState::EventEnd
                | LifecycleState::ReplayCreated
        )
    }

    /// Per-segment cache notifications.
    pub fn is_segment_cached(&self) -> bool {
        matches!(
            self,
            LifecycleState::SegmentCached | LifecycleState::OptimizedSegmentCached
        )
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Segment a cache notification refers to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct SegmentRef {
    pub start: f64,
    pub end: f64,
}

/// A lifecycle bus message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct LifecycleEvent {
    /// Unique message id
    pub event_id: String,

    pub detail_type: String,

    pub state: LifecycleState,

    pub program: String,

    pub event: String,

    /// Target replay; `None` means every replay of the event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment: Option<SegmentRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_track: Option<u32>,

    pub emitted_at: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(
        detail_type: impl Into<String>,
        state: LifecycleState,
        program: impl Into<String>,
        event: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            detail_type: detail_type.into(),
            state,
            program: program.into(),
            event: event.into(),
            replay_id: None,
            segment: None,
            audio_track: None,
            emitted_at: Utc::now(),
        }
    }

    /// Notification for a freshly cached segment.
    pub fn segment_cached(
        program: impl Into<String>,
        event: impl Into<String>,
        start: f64,
        end: f64,
        optimized: bool,
    ) -> Self {
        let (detail_type, state) = if optimized {
            (
                detail_types::OPTIMIZATION_STATUS,
                LifecycleState::OptimizedSegmentCached,
            )
        } else {
            (
                detail_types::SEGMENTATION_STATUS,
                LifecycleState::SegmentCached,
            )
        };
        let mut ev = Self::new(detail_type, state, program, event);
        ev.segment = Some(SegmentRef { start, end });
        ev
    }

    /// Replay stage notification.
    pub fn replay(
        state: LifecycleState,
        program: impl Into<String>,
        event: impl Into<String>,
        replay_id: impl Into<String>,
    ) -> Self {
        Self::new(detail_types::REPLAY_STATUS, state, program, event).with_replay(replay_id)
    }

    pub fn with_replay(mut self, replay_id: impl Into<String>) -> Self {
        self.replay_id = Some(replay_id.into());
        self
    }

    pub fn with_audio_track(mut self, audio_track: u32) -> Self {
        self.audio_track = Some(audio_track);
        self
    }
}
