use std::sync::Mutex;

use anyhow::{Result, bail};

use crate::defs::{ApplyAck, DocumentAdapter, FrameTrack, MaskResult, MaskSet, MeshResult};

/// In-memory document: serves fixed content and remembers what was applied.
///
/// Stands in for the host when there is no real composition, e.g. dry runs.
#[derive(Debug, Default)]
pub struct EmptyDocument {
    frame: Vec<u8>,
    video: Vec<u8>,
    applied: Mutex<Applied>,
}

#[derive(Debug, Default, Clone)]
pub struct Applied {
    pub stills: Vec<Vec<MaskResult>>,
    pub tracks: Vec<FrameTrack>,
    pub meshes: Vec<MeshResult>,
}

impl EmptyDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frame(mut self, frame: Vec<u8>) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_video(mut self, video: Vec<u8>) -> Self {
        self.video = video;
        self
    }

    pub fn applied(&self) -> Applied {
        self.applied.lock().map(|applied| applied.clone()).unwrap_or_default()
    }
}

impl DocumentAdapter for EmptyDocument {
    async fn export_current_frame(&self) -> Result<Vec<u8>> {
        Ok(self.frame.clone())
    }

    async fn export_video_range(&self, start_frame: u32, end_frame: u32) -> Result<Vec<u8>> {
        if start_frame > end_frame {
            bail!("invalid frame range {start_frame}..{end_frame}");
        }
        Ok(self.video.clone())
    }

    async fn apply_mask_result(&self, masks: MaskSet<'_>) -> Result<ApplyAck> {
        let mut applied = self
            .applied
            .lock()
            .map_err(|_| anyhow::anyhow!("document state poisoned"))?;
        let written = match masks {
            MaskSet::Still(masks) => {
                applied.stills.push(masks.to_vec());
                masks.len()
            }
            MaskSet::Track(track) => {
                applied.tracks.push(track.clone());
                track.object_ids().len()
            }
        };
        Ok(ApplyAck { written })
    }

    async fn apply_mesh_result(&self, mesh: &MeshResult) -> Result<ApplyAck> {
        let mut applied = self
            .applied
            .lock()
            .map_err(|_| anyhow::anyhow!("document state poisoned"))?;
        applied.meshes.push(mesh.clone());
        Ok(ApplyAck { written: 1 })
    }
}
