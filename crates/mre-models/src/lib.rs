//! Shared data models for the Media Replay Engine.
//!
//! This crate provides Serde-serializable types for:
//! - Segments and their plugin-defined attributes
//! - Cached feature data points and replay selection criteria
//! - Replay requests, results and status
//! - Clip preview feedback (likes/dislikes)
//! - Event, profile, transition and media chunk metadata
//! - Lifecycle event payloads
//! - Output resolutions and frame-based timecodes
//! - Root-segment reduction shared by the engine and query-time thinning

pub mod error;
pub mod event;
pub mod feature;
pub mod feedback;
pub mod lifecycle;
pub mod replay;
pub mod resolution;
pub mod roots;
pub mod segment;
pub mod timecode;

// Re-export common types
pub use error::{ModelError, ModelResult};
pub use event::{
    EventInfo, MediaChunk, PluginRef, Profile, TransitionConfig, TransitionMediaType,
};
pub use feature::{FeatureBlob, FeatureCriterion, FeatureDataPoint, RawCriterion, VIDEO_GROUP};
pub use feedback::{BoundaryContext, ClipPreviewFeedback, FeedbackKind};
pub use lifecycle::{detail_types, LifecycleEvent, LifecycleState, SegmentRef};
pub use replay::{
    DebugEntry, DurationSummarization, ReplayRequest, ReplayResult, ReplayStatus, ReplayUpdate,
};
pub use resolution::{resolution_dimensions, Resolution, RESOLUTIONS};
pub use roots::{reduce_to_roots, ScanOrder, TimeRange};
pub use segment::{partitions_start_range, AttrValue, Segment, SegmentKey};
pub use timecode::{parse_timecode, seconds_to_timecode, TimecodeError};
