//! Typed parameter sets for each job kind.
//!
//! Each set validates its ranges locally and flattens into the parameter
//! map of a [`JobRequest`](crate::types::JobRequest), using the service's
//! field names verbatim.

use crate::types::{JobError, MeshFormat, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolygonQuality {
    Low,
    #[default]
    Medium,
    High,
}

impl FromStr for PolygonQuality {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(PolygonQuality::Low),
            "medium" => Ok(PolygonQuality::Medium),
            "high" => Ok(PolygonQuality::High),
            other => Err(format!("unknown polygon quality '{}' (expected low, medium or high)", other)),
        }
    }
}

/// Marching-cubes grid resolution accepted by the mesh workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum McResolution {
    Low,
    #[default]
    Medium,
    High,
}

impl From<McResolution> for u16 {
    fn from(resolution: McResolution) -> Self {
        match resolution {
            McResolution::Low => 128,
            McResolution::Medium => 256,
            McResolution::High => 512,
        }
    }
}

impl TryFrom<u16> for McResolution {
    type Error = String;

    fn try_from(value: u16) -> std::result::Result<Self, Self::Error> {
        match value {
            128 => Ok(McResolution::Low),
            256 => Ok(McResolution::Medium),
            512 => Ok(McResolution::High),
            other => Err(format!("mc_resolution must be 128, 256 or 512, got {}", other)),
        }
    }
}

impl FromStr for McResolution {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let value: u16 = s.trim().parse().map_err(|_| format!("not a resolution: '{}'", s))?;
        McResolution::try_from(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemeshOption {
    None,
    Triangle,
    Quad,
}

impl FromStr for RemeshOption {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(RemeshOption::None),
            "triangle" => Ok(RemeshOption::Triangle),
            "quad" => Ok(RemeshOption::Quad),
            other => Err(format!("unknown remesh option '{}' (expected none, triangle or quad)", other)),
        }
    }
}

/// Still-image segmentation options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentParams {
    pub prompt: String,
    pub confidence_threshold: f32,
    pub max_masks: u32,
    pub polygon_quality: PolygonQuality,
    pub edge_snap_distance: f32,
}

impl Default for SegmentParams {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            confidence_threshold: 0.5,
            max_masks: 10,
            polygon_quality: PolygonQuality::default(),
            edge_snap_distance: 0.0,
        }
    }
}

impl SegmentParams {
    pub fn with_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_confidence(self.confidence_threshold)?;
        if self.max_masks == 0 {
            return Err(JobError::InvalidRequest("max_masks must be at least 1".to_string()));
        }
        check_snap(self.edge_snap_distance)
    }

    pub fn to_parameters(&self) -> Result<Map<String, Value>> {
        self.validate()?;
        to_map(self)
    }
}

/// Video tracking options, shared by full runs and previews.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoParams {
    pub prompt: String,
    pub confidence_threshold: f32,
    pub max_frames: u32,
    pub polygon_quality: PolygonQuality,
    pub edge_snap_distance: f32,
}

impl Default for VideoParams {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            confidence_threshold: 0.5,
            max_frames: 300,
            polygon_quality: PolygonQuality::default(),
            edge_snap_distance: 0.0,
        }
    }
}

impl VideoParams {
    pub fn with_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_confidence(self.confidence_threshold)?;
        if self.max_frames == 0 {
            return Err(JobError::InvalidRequest("max_frames must be at least 1".to_string()));
        }
        check_snap(self.edge_snap_distance)
    }

    pub fn to_parameters(&self) -> Result<Map<String, Value>> {
        self.validate()?;
        to_map(self)
    }
}

/// Image-to-mesh options. The optional fields are only understood by some
/// mesh workers and are sent only when set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshParams {
    pub foreground_ratio: f32,
    pub mc_resolution: McResolution,
    pub output_format: MeshFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub texture_resolution: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remesh_option: Option<RemeshOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_texture: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_background: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<u8>,
}

impl Default for MeshParams {
    fn default() -> Self {
        Self {
            foreground_ratio: 0.85,
            mc_resolution: McResolution::default(),
            output_format: MeshFormat::Glb,
            texture_resolution: None,
            remesh_option: None,
            generate_texture: None,
            remove_background: None,
            profile: None,
        }
    }
}

impl MeshParams {
    pub fn validate(&self) -> Result<()> {
        if !(0.5..=1.0).contains(&self.foreground_ratio) {
            return Err(JobError::InvalidRequest(format!(
                "foreground_ratio must be within 0.5..=1.0, got {}",
                self.foreground_ratio
            )));
        }
        if let Some(resolution) = self.texture_resolution {
            if ![512, 1024, 2048].contains(&resolution) {
                return Err(JobError::InvalidRequest(format!(
                    "texture_resolution must be 512, 1024 or 2048, got {}",
                    resolution
                )));
            }
        }
        if let Some(profile) = self.profile {
            if !(1..=5).contains(&profile) {
                return Err(JobError::InvalidRequest(format!("profile must be within 1..=5, got {}", profile)));
            }
        }
        Ok(())
    }

    pub fn to_parameters(&self) -> Result<Map<String, Value>> {
        self.validate()?;
        to_map(self)
    }
}

fn check_confidence(threshold: f32) -> Result<()> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(())
    } else {
        Err(JobError::InvalidRequest(format!(
            "confidence_threshold must be within 0..=1, got {}",
            threshold
        )))
    }
}

fn check_snap(distance: f32) -> Result<()> {
    if distance >= 0.0 {
        Ok(())
    } else {
        Err(JobError::InvalidRequest(format!(
            "edge_snap_distance must not be negative, got {}",
            distance
        )))
    }
}

fn to_map<T: Serialize>(params: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(params)? {
        Value::Object(map) => Ok(map),
        other => Err(JobError::InvalidRequest(format!("parameters must be an object, got {}", other))),
    }
}
