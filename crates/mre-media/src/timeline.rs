//! Timeline assembly.
//!
//! Each selected segment is cut out of the raw media chunks covering it. A
//! segment spanning several chunks clips the first chunk at the segment start
//! and the last chunk at the segment end; interior chunks play whole.
//! Clip markers are `HH:MM:SS:FF` timecodes relative to the chunk start.

use mre_models::timecode::{end_timecode, seconds_to_timecode, DEFAULT_FRAME_RATE};
use mre_models::{MediaChunk, TransitionConfig, TransitionMediaType};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// A selected segment with the chunks of the source stream it overlaps.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentClip {
    pub start: f64,
    pub end: f64,
    pub chunks: Vec<MediaChunk>,
}

impl SegmentClip {
    pub fn new(start: f64, end: f64, chunks: Vec<MediaChunk>) -> Self {
        Self { start, end, chunks }
    }
}

/// Image drawn over an input clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageOverlay {
    pub image_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fade_in_ms: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fade_out_ms: Option<u32>,
    pub opacity: u8,
    pub x: u32,
    pub y: u32,
}

impl ImageOverlay {
    fn from_transition(transition: &TransitionConfig) -> Self {
        Self {
            image_ref: transition.file_ref.clone(),
            fade_in_ms: None,
            fade_out_ms: None,
            opacity: transition.opacity,
            x: transition.image_x,
            y: transition.image_y,
        }
    }
}

/// One renderer input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InputClip {
    pub file_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_end: Option<String>,
    /// Audio track to map; transitions carry their own audio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_track: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay: Option<ImageOverlay>,
    #[serde(default)]
    pub transition: bool,
}

impl InputClip {
    fn chunk(chunk: &MediaChunk, audio_track: u32) -> Self {
        Self {
            file_ref: chunk.filename.clone(),
            clip_start: None,
            clip_end: None,
            audio_track: Some(audio_track),
            overlay: None,
            transition: false,
        }
    }

    fn transition_clip(transition: &TransitionConfig) -> Self {
        Self {
            file_ref: transition.file_ref.clone(),
            clip_start: None,
            clip_end: None,
            audio_track: None,
            overlay: None,
            transition: true,
        }
    }
}

/// Ordered renderer inputs for one replay.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Timeline {
    pub inputs: Vec<InputClip>,
    /// Seconds of source material, transitions excluded
    pub duration: f64,
}

impl Timeline {
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// Builds timelines for one replay's audio track and transition.
#[derive(Debug, Clone)]
pub struct TimelineBuilder {
    audio_track: u32,
    frame_rate: u32,
    transition: Option<TransitionConfig>,
}

impl TimelineBuilder {
    pub fn new(audio_track: u32) -> Self {
        Self {
            audio_track,
            frame_rate: DEFAULT_FRAME_RATE,
            transition: None,
        }
    }

    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate.max(1);
        self
    }

    pub fn with_transition(mut self, transition: Option<TransitionConfig>) -> Self {
        self.transition = transition;
        self
    }

    /// Input clips for a single segment.
    pub fn segment_inputs(&self, segment: &SegmentClip) -> MediaResult<Vec<InputClip>> {
        if segment.end < segment.start {
            return Err(MediaError::invalid_timeline(format!(
                "segment ends before it starts: {}..{}",
                segment.start, segment.end
            )));
        }

        let mut chunks: Vec<&MediaChunk> = segment
            .chunks
            .iter()
            .filter(|c| c.intersects(segment.start, segment.end))
            // A chunk starting exactly at the end contributes no frames
            .filter(|c| c.start < segment.end || segment.start == segment.end)
            .collect();
        chunks.sort_by(|a, b| a.start.total_cmp(&b.start));

        let (first, last) = match (chunks.first(), chunks.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => {
                return Err(MediaError::MissingChunks {
                    start: segment.start,
                    end: segment.end,
                })
            }
        };

        let start_offset = (segment.start - first.start).max(0.0);
        let end_offset = (segment.end - last.start).clamp(0.0, last.duration.max(0.0));
        let start_tc = seconds_to_timecode(start_offset, self.frame_rate);
        let end_tc = end_timecode(end_offset, self.frame_rate);

        let mut inputs: Vec<InputClip> = chunks
            .iter()
            .map(|c| InputClip::chunk(c, self.audio_track))
            .collect();

        let count = inputs.len();
        if let Some(head) = inputs.first_mut() {
            head.clip_start = Some(start_tc.clone());
        }
        if count == 1 {
            // Zero-padded timecodes compare correctly as strings
            if end_tc > start_tc {
                inputs[0].clip_end = Some(end_tc);
            } else {
                debug!(
                    start = segment.start,
                    end = segment.end,
                    "Dropping end marker that does not follow the start marker"
                );
            }
        } else if let Some(tail) = inputs.last_mut() {
            tail.clip_end = Some(end_tc);
        }

        Ok(inputs)
    }

    /// Assemble the full timeline for segments already in playback order.
    pub fn build(&self, segments: &[SegmentClip]) -> MediaResult<Timeline> {
        let mut per_segment = Vec::with_capacity(segments.len());
        for segment in segments {
            per_segment.push(self.segment_inputs(segment)?);
        }

        match self.transition {
            Some(ref t) if t.media_type == TransitionMediaType::Image => {
                apply_image_overlays(&mut per_segment, t);
            }
            _ => {}
        }

        let mut inputs = Vec::new();
        let total = per_segment.len();
        for (i, group) in per_segment.into_iter().enumerate() {
            inputs.extend(group);
            if i + 1 < total {
                if let Some(ref t) = self.transition {
                    if t.media_type == TransitionMediaType::Video {
                        inputs.push(InputClip::transition_clip(t));
                    }
                }
            }
        }

        let duration = segments.iter().map(|s| s.end - s.start).sum();
        Ok(Timeline { inputs, duration })
    }
}

/// Fade the overlay in on entry to every segment but the first and out on
/// exit from every segment but the last.
fn apply_image_overlays(groups: &mut [Vec<InputClip>], transition: &TransitionConfig) {
    let total = groups.len();
    for (i, group) in groups.iter_mut().enumerate() {
        if i > 0 {
            if let Some(head) = group.first_mut() {
                head.overlay
                    .get_or_insert_with(|| ImageOverlay::from_transition(transition))
                    .fade_in_ms = Some(transition.fade_in_ms);
            }
        }
        if i + 1 < total {
            if let Some(tail) = group.last_mut() {
                tail.overlay
                    .get_or_insert_with(|| ImageOverlay::from_transition(transition))
                    .fade_out_ms = Some(transition.fade_out_ms);
            }
        }
    }
}
