//! Cached feature data and replay selection criteria.

use std::collections::BTreeMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::segment::AttrValue;

/// Data point group holding video-wide features.
pub const VIDEO_GROUP: &str = "0";

/// One detector output sample inside a cached segment blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct FeatureDataPoint {
    pub start: f64,

    pub end: f64,

    #[serde(default)]
    pub label: String,

    /// Featurer plugin that produced the sample, when recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_name: Option<String>,

    /// Plugin-defined output attributes
    #[serde(flatten)]
    pub attributes: BTreeMap<String, AttrValue>,
}

impl FeatureDataPoint {
    pub fn new(start: f64, end: f64) -> Self {
        Self {
            start,
            end,
            label: String::new(),
            plugin_name: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin_name = Some(plugin.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

/// Feature data cached for one `(segment, audio track)` pair.
///
/// Data points are grouped under [`VIDEO_GROUP`] for video-wide features or
/// under an audio track id for audio-scoped ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct FeatureBlob {
    pub start: f64,

    pub end: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_track: Option<u32>,

    #[serde(rename = "FeaturesDataPoints", default)]
    pub data_points: BTreeMap<String, Vec<FeatureDataPoint>>,
}

impl FeatureBlob {
    pub fn new(start: f64, end: f64) -> Self {
        Self {
            start,
            end,
            audio_track: None,
            data_points: BTreeMap::new(),
        }
    }

    /// Append a data point to a group.
    pub fn push(&mut self, group: impl Into<String>, point: FeatureDataPoint) {
        self.data_points.entry(group.into()).or_default().push(point);
    }

    /// Video-wide data points.
    pub fn video_points(&self) -> &[FeatureDataPoint] {
        self.data_points
            .get(VIDEO_GROUP)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Data points scoped to an audio track.
    pub fn track_points(&self, audio_track: u32) -> &[FeatureDataPoint] {
        self.data_points
            .get(&audio_track.to_string())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Video-wide points followed by the audio track's points.
    pub fn points_for(&self, audio_track: u32) -> impl Iterator<Item = &FeatureDataPoint> {
        self.video_points()
            .iter()
            .chain(self.track_points(audio_track).iter())
    }
}

/// Criterion as stored on a replay request.
///
/// `name` follows the `Plugin | Attribute | true|false` convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct RawCriterion {
    pub attrib_name: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,

    #[serde(default)]
    pub include: bool,
}

/// A typed feature selection rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCriterion", into = "RawCriterion")]
pub struct FeatureCriterion {
    /// Plugin that produces the attribute
    pub plugin_name: String,
    /// Attribute to look up on data points
    pub attrib_name: String,
    /// Polarity the attribute must have to match
    pub expected_value: bool,
    /// Weight contributed to the segment score
    pub weight: Option<f64>,
    /// Inclusion-style criterion (matches regardless of weight)
    pub include: bool,
}

impl FeatureCriterion {
    pub fn new(plugin_name: impl Into<String>, attrib_name: impl Into<String>, expected_value: bool) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            attrib_name: attrib_name.into(),
            expected_value,
            weight: None,
            include: false,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_include(mut self, include: bool) -> Self {
        self.include = include;
        self
    }

    /// Whether the criterion takes part in selection at all.
    pub fn is_active(&self) -> bool {
        self.include || self.weight.map(|w| w > 0.0).unwrap_or(false)
    }

    /// Score credit for a match.
    pub fn score(&self) -> f64 {
        self.weight.filter(|w| *w > 0.0).unwrap_or(0.0)
    }

    /// Check a single data point.
    pub fn matches(&self, point: &FeatureDataPoint) -> bool {
        if let Some(ref plugin) = point.plugin_name {
            if !self.plugin_name.is_empty() && plugin != &self.plugin_name {
                return false;
            }
        }

        point
            .attributes
            .get(&self.attrib_name)
            .and_then(AttrValue::truthiness)
            .map(|value| value == self.expected_value)
            .unwrap_or(false)
    }
}

impl fmt::Display for FeatureCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | {} | {}",
            self.plugin_name, self.attrib_name, self.expected_value
        )
    }
}

impl TryFrom<RawCriterion> for FeatureCriterion {
    type Error = ModelError;

    fn try_from(raw: RawCriterion) -> Result<Self, Self::Error> {
        let parts: Vec<&str> = raw.name.split('|').map(str::trim).collect();
        let (plugin, attrib, polarity) = match parts.as_slice() {
            [plugin, attrib, polarity] => (*plugin, *attrib, *polarity),
            // Name without polarity means "attribute is set"
            [plugin, attrib] => (*plugin, *attrib, "true"),
            _ => {
                return Err(ModelError::invalid_criterion(format!(
                    "expected 'Plugin | Attribute | true|false', got '{}'",
                    raw.name
                )))
            }
        };

        let attrib_name = raw.attrib_name.trim();
        if attrib_name.is_empty() {
            return Err(ModelError::invalid_criterion(format!(
                "missing AttribName for '{}'",
                raw.name
            )));
        }
        if attrib != attrib_name {
            return Err(ModelError::invalid_criterion(format!(
                "AttribName '{}' does not match name '{}'",
                attrib_name, raw.name
            )));
        }

        let expected_value = match polarity.to_ascii_lowercase().as_str() {
            "true" => true,
            "false" => false,
            other => {
                return Err(ModelError::invalid_criterion(format!(
                    "polarity must be true or false, got '{}'",
                    other
                )))
            }
        };

        Ok(Self {
            plugin_name: plugin.to_string(),
            attrib_name: attrib_name.to_string(),
            expected_value,
            weight: raw.weight,
            include: raw.include,
        })
    }
}

impl From<FeatureCriterion> for RawCriterion {
    fn from(criterion: FeatureCriterion) -> Self {
        Self {
            name: format!(
                "{}|{}|{}",
                criterion.plugin_name, criterion.attrib_name, criterion.expected_value
            ),
            attrib_name: criterion.attrib_name,
            weight: criterion.weight,
            include: criterion.include,
        }
    }
}
