//! Visual mapping
//!
//! Sibling JSON to the IR that names which state variables drive the viewer's
//! position, size, color, and opacity channels. The core writes and reads it
//! verbatim; interpretation belongs to the viewer.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendMode {
    Add,
    Average,
    Max,
    Min,
}

/// Either a single state-var name or a weighted blend of several.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VisualSource {
    Single(String),
    Multi {
        sources: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        weights: Option<Vec<f32>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        blend: Option<BlendMode>,
    },
}

impl VisualSource {
    pub fn single(name: impl Into<String>) -> Self {
        Self::Single(name.into())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionMapping {
    pub x: String,
    pub y: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeMapping {
    pub source: VisualSource,
    #[serde(
        default,
        rename = "valueRange",
        skip_serializing_if = "Option::is_none"
    )]
    pub value_range: Option<[f32; 2]>,
    pub range: [f32; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorMapping {
    pub source: VisualSource,
    pub colormap: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<[f32; 2]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpacityMapping {
    pub source: VisualSource,
    #[serde(
        default,
        rename = "valueRange",
        skip_serializing_if = "Option::is_none"
    )]
    pub value_range: Option<[f32; 2]>,
    pub range: [f32; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualMapping {
    pub position: PositionMapping,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<SizeMapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<ColorMapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<OpacityMapping>,
}
