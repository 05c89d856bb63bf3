//! Event, profile, transition and media chunk metadata.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to a configured plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct PluginRef {
    pub name: String,
}

impl PluginRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Processing profile an event runs with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct Profile {
    pub name: String,

    /// Segmentation plugin
    pub classifier: PluginRef,

    /// Boundary optimizer, if the profile runs one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimizer: Option<PluginRef>,

    /// Feature detection plugins
    #[serde(default)]
    pub featurers: Vec<PluginRef>,
}

impl Profile {
    pub fn new(name: impl Into<String>, classifier: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            classifier: PluginRef::new(classifier),
            optimizer: None,
            featurers: Vec::new(),
        }
    }

    pub fn with_optimizer(mut self, optimizer: impl Into<String>) -> Self {
        self.optimizer = Some(PluginRef::new(optimizer));
        self
    }

    pub fn has_optimizer(&self) -> bool {
        self.optimizer.is_some()
    }
}

/// Event metadata the engine needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct EventInfo {
    pub name: String,

    pub program: String,

    /// Name of the processing profile
    pub profile: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,

    /// Source frame rate, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<f64>,
}

impl EventInfo {
    pub fn new(
        name: impl Into<String>,
        program: impl Into<String>,
        profile: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            profile: profile.into(),
            start: None,
            frame_rate: None,
        }
    }
}

/// Kind of media a transition inserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum TransitionMediaType {
    /// Clip spliced between segments
    Video,
    /// Still overlaid with fades on the segments themselves
    Image,
}

/// Named transition configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct TransitionConfig {
    pub name: String,

    pub media_type: TransitionMediaType,

    /// Location of the transition media
    pub file_ref: String,

    #[serde(default)]
    pub fade_in_ms: u32,

    #[serde(default)]
    pub fade_out_ms: u32,

    /// Overlay opacity in percent
    #[serde(default = "default_opacity")]
    pub opacity: u8,

    #[serde(default)]
    pub image_x: u32,

    #[serde(default)]
    pub image_y: u32,
}

fn default_opacity() -> u8 {
    100
}

impl TransitionConfig {
    pub fn video(name: impl Into<String>, file_ref: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            media_type: TransitionMediaType::Video,
            file_ref: file_ref.into(),
            fade_in_ms: 0,
            fade_out_ms: 0,
            opacity: default_opacity(),
            image_x: 0,
            image_y: 0,
        }
    }

    pub fn image(
        name: impl Into<String>,
        file_ref: impl Into<String>,
        fade_in_ms: u32,
        fade_out_ms: u32,
    ) -> Self {
        Self {
            media_type: TransitionMediaType::Image,
            fade_in_ms,
            fade_out_ms,
            ..Self::video(name, file_ref)
        }
    }
}

/// A raw media chunk (e.g. an HLS segment) of the event's source stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct MediaChunk {
    /// Location of the chunk file
    pub filename: String,

    /// Event-relative start in seconds
    pub start: f64,

    /// Chunk duration in seconds
    pub duration: f64,
}

impl MediaChunk {
    pub fn new(filename: impl Into<String>, start: f64, duration: f64) -> Self {
        Self {
            filename: filename.into(),
            start,
            duration,
        }
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    /// Whether the chunk covers any part of `[start, end]`.
    pub fn intersects(&self, start: f64, end: f64) -> bool {
        self.start <= end && start < self.end()
    }
}
