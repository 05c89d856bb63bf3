//! Segment models.
//!
//! A segment is a detected time range of interest within an event's media
//! timeline. Detector plugins attach arbitrary named outputs to it; the
//! optimizer may later refine its boundaries per audio track.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Value of a plugin-defined attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<AttrValue>),
}

impl AttrValue {
    /// Boolean interpretation of the value, if it has one.
    ///
    /// Text only counts when it spells `true`/`false` (any case).
    pub fn truthiness(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            AttrValue::Number(n) => Some(*n != 0.0),
            AttrValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            AttrValue::List(items) => Some(!items.is_empty()),
        }
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Number(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_string())
    }
}

/// Composite ordering key for segments.
///
/// Start time is truncated to milliseconds; `sequence` breaks ties between
/// segments a detector reported with the same timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentKey {
    pub start_millis: i64,
    pub sequence: u32,
}

impl SegmentKey {
    pub fn new(start: f64, sequence: u32) -> Self {
        Self {
            start_millis: seconds_to_millis(start),
            sequence,
        }
    }
}

impl fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.start_millis, self.sequence)
    }
}

/// Convert event-relative seconds to whole milliseconds.
pub fn seconds_to_millis(secs: f64) -> i64 {
    (secs * 1000.0).round() as i64
}

/// True when two event-relative times refer to the same millisecond.
pub fn same_instant(a: f64, b: f64) -> bool {
    seconds_to_millis(a) == seconds_to_millis(b)
}

/// A detected segment.
///
/// Identity is `(program, event, classifier, start)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct Segment {
    /// Program name
    pub program: String,

    /// Event name
    pub event: String,

    /// Detector (classifier plugin) that created the segment
    #[serde(rename = "PluginName")]
    pub classifier: String,

    /// Start time in seconds, relative to the event start
    pub start: f64,

    /// End time in seconds, relative to the event start
    pub end: f64,

    /// Optimized start per audio track id
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub opto_start: BTreeMap<String, f64>,

    /// Optimized end per audio track id
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub opto_end: BTreeMap<String, f64>,

    /// Label assigned by the detector
    #[serde(default)]
    pub label: String,

    /// Tie-breaker for segments sharing a start time
    #[serde(default)]
    pub sequence: u32,

    /// Plugin-defined output attributes
    #[serde(flatten)]
    pub attributes: BTreeMap<String, AttrValue>,
}

impl Segment {
    /// Create a new segment without optimized boundaries or attributes.
    pub fn new(
        program: impl Into<String>,
        event: impl Into<String>,
        classifier: impl Into<String>,
        start: f64,
        end: f64,
    ) -> Self {
        Self {
            program: program.into(),
            event: event.into(),
            classifier: classifier.into(),
            start,
            end,
            opto_start: BTreeMap::new(),
            opto_end: BTreeMap::new(),
            label: String::new(),
            sequence: 0,
            attributes: BTreeMap::new(),
        }
    }

    /// Set the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set optimized boundaries for an audio track.
    pub fn with_optimized(mut self, audio_track: u32, start: f64, end: f64) -> Self {
        self.opto_start.insert(audio_track.to_string(), start);
        self.opto_end.insert(audio_track.to_string(), end);
        self
    }

    /// Set a plugin-defined attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Ordering key.
    pub fn key(&self) -> SegmentKey {
        SegmentKey::new(self.start, self.sequence)
    }

    /// Optimized boundaries for the given audio track, when both ends exist.
    pub fn optimized_bounds(&self, audio_track: u32) -> Option<(f64, f64)> {
        let track = audio_track.to_string();
        match (self.opto_start.get(&track), self.opto_end.get(&track)) {
            (Some(start), Some(end)) => Some((*start, *end)),
            _ => None,
        }
    }

    /// Whether the optimizer refined this segment for the audio track.
    pub fn is_optimized_for(&self, audio_track: u32) -> bool {
        self.optimized_bounds(audio_track).is_some()
    }

    /// Boundaries a replay should use: optimized when present, else detected.
    pub fn effective_bounds(&self, audio_track: u32) -> (f64, f64) {
        self.optimized_bounds(audio_track)
            .unwrap_or((self.start, self.end))
    }

    /// Elapsed-hour partition this segment's cached features live in.
    pub fn hour_elapsed(&self) -> u32 {
        hour_partition(self.start)
    }

    /// Check the `start <= end` invariant (including optimized bounds).
    pub fn is_well_formed(&self) -> bool {
        if self.start > self.end {
            return false;
        }
        self.opto_start.iter().all(|(track, start)| {
            self.opto_end
                .get(track)
                .map(|end| start <= end)
                .unwrap_or(true)
        })
    }

    /// Compare by composite key.
    pub fn cmp_by_key(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Elapsed-hour partition for an event-relative time.
pub fn hour_partition(secs: f64) -> u32 {
    if secs <= 0.0 {
        0
    } else {
        (secs / 3600.0).floor() as u32
    }
}

/// Inclusive start-time range covering the given hour partitions.
///
/// The upper bound stops just short of the next partition's first second.
pub fn partitions_start_range(partitions: &[u32]) -> Option<(f64, f64)> {
    let first = *partitions.iter().min()?;
    let last = *partitions.iter().max()?;
    Some((
        first as f64 * 3600.0,
        (last as f64 + 1.0) * 3600.0 - 1e-6,
    ))
}
