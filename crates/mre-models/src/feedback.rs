//! Clip preview feedback (likes/dislikes) recorded by reviewers.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::segment::same_instant;

/// Reviewer verdict on a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum FeedbackKind {
    Like,
    Dislike,
}

/// Which variant of a segment the reviewer was looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum BoundaryContext {
    /// Detected boundaries
    Original,
    /// Optimizer-refined boundaries
    Optimized,
}

impl BoundaryContext {
    /// Context for a segment given whether it carries optimized boundaries.
    pub fn for_segment(optimized: bool) -> Self {
        if optimized {
            BoundaryContext::Optimized
        } else {
            BoundaryContext::Original
        }
    }
}

/// Like/dislike annotation keyed by `(program, event, classifier, start)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct ClipPreviewFeedback {
    pub program: String,

    pub event: String,

    #[serde(rename = "PluginName")]
    pub classifier: String,

    /// Detected start of the segment the feedback refers to
    pub start: f64,

    /// Audio track the optimized variant was reviewed with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_track: Option<u32>,

    pub feedback: FeedbackKind,

    pub context: BoundaryContext,
}

impl ClipPreviewFeedback {
    pub fn new(
        program: impl Into<String>,
        event: impl Into<String>,
        classifier: impl Into<String>,
        start: f64,
        feedback: FeedbackKind,
        context: BoundaryContext,
    ) -> Self {
        Self {
            program: program.into(),
            event: event.into(),
            classifier: classifier.into(),
            start,
            audio_track: None,
            feedback,
            context,
        }
    }

    pub fn with_audio_track(mut self, audio_track: u32) -> Self {
        self.audio_track = Some(audio_track);
        self
    }

    /// Whether this entry annotates the segment variant a replay would use.
    ///
    /// Optimized feedback recorded for a specific audio track only applies to
    /// that track.
    pub fn applies_to(&self, start: f64, context: BoundaryContext, audio_track: u32) -> bool {
        if !same_instant(self.start, start) || self.context != context {
            return false;
        }
        match (context, self.audio_track) {
            (BoundaryContext::Optimized, Some(track)) => track == audio_track,
            _ => true,
        }
    }

    pub fn is_like(&self) -> bool {
        self.feedback == FeedbackKind::Like
    }

    pub fn is_dislike(&self) -> bool {
        self.feedback == FeedbackKind::Dislike
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_applies_to_matching_context() {
        let fb = ClipPreviewFeedback::new("p", "e", "c", 8.0, FeedbackKind::Dislike, BoundaryContext::Original);
        assert!(fb.applies_to(8.0, BoundaryContext::Original, 1));
        assert!(!fb.applies_to(8.0, BoundaryContext::Optimized, 1));
        assert!(!fb.applies_to(8.5, BoundaryContext::Original, 1));
    }

    #[test]
    fn test_optimized_feedback_is_track_scoped() {
        let fb = ClipPreviewFeedback::new("p", "e", "c", 8.0, FeedbackKind::Like, BoundaryContext::Optimized)
            .with_audio_track(2);
        assert!(fb.applies_to(8.0, BoundaryContext::Optimized, 2));
        assert!(!fb.applies_to(8.0, BoundaryContext::Optimized, 1));
    }
}
