use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// A point in layer pixel space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl From<[f64; 2]> for Point {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [f64; 2] {
    fn from(point: Point) -> Self {
        [point.x, point.y]
    }
}

/// Axis-aligned box, serialised as `[x1, y1, x2, y2]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn width(&self) -> f64 {
        (self.x2 - self.x1).abs()
    }

    pub fn height(&self) -> f64 {
        (self.y2 - self.y1).abs()
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from([x1, y1, x2, y2]: [f64; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(bbox: BoundingBox) -> Self {
        [bbox.x1, bbox.y1, bbox.x2, bbox.y2]
    }
}

/// One detected object.
///
/// The polygon is an ordered outline; services usually repeat the first
/// point at the end to close the path, but nothing here relies on that.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaskResult {
    pub id: u32,
    #[serde(alias = "score")]
    pub confidence: f32,
    pub polygon: Vec<Point>,
    pub bbox: BoundingBox,
    pub area: f64,
}

/// Per-frame masks for a tracked video, keyed by zero-based frame index.
///
/// Object ids are expected to be stable across frames of one job.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameTrack {
    pub frames: BTreeMap<u32, Vec<MaskResult>>,
}

impl FrameTrack {
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn frame(&self, index: u32) -> Option<&[MaskResult]> {
        self.frames.get(&index).map(Vec::as_slice)
    }

    /// Distinct object ids seen anywhere in the track.
    pub fn object_ids(&self) -> BTreeSet<u32> {
        self.frames
            .values()
            .flat_map(|masks| masks.iter().map(|mask| mask.id))
            .collect()
    }

    /// Frame indices missing from the `0..=last` range.
    pub fn missing_frames(&self) -> Vec<u32> {
        let Some(&last) = self.frames.keys().next_back() else {
            return Vec::new();
        };
        (0..=last).filter(|index| !self.frames.contains_key(index)).collect()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeshFormat {
    #[default]
    Glb,
    Obj,
}

impl MeshFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            MeshFormat::Glb => "glb",
            MeshFormat::Obj => "obj",
        }
    }
}

/// Generated 3D content plus the statistics reported alongside it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeshResult {
    #[serde(skip)]
    pub content: Vec<u8>,
    pub format: MeshFormat,
    pub vertices: u64,
    pub faces: u64,
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Masks to write back into the document: a single still or a tracked clip.
#[derive(Clone, Copy, Debug)]
pub enum MaskSet<'a> {
    Still(&'a [MaskResult]),
    Track(&'a FrameTrack),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplyAck {
    /// Number of paths, keyframed shapes or files written into the document.
    pub written: usize,
}

// Host document glue. Implementations live with the host integration; the
// job client only needs bytes in and structured results out.
#[allow(async_fn_in_trait)]
pub trait DocumentAdapter {
    async fn export_current_frame(&self) -> Result<Vec<u8>>;
    async fn export_video_range(&self, start_frame: u32, end_frame: u32) -> Result<Vec<u8>>;
    async fn apply_mask_result(&self, masks: MaskSet<'_>) -> Result<ApplyAck>;
    async fn apply_mesh_result(&self, mesh: &MeshResult) -> Result<ApplyAck>;
}
