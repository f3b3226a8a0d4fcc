use crate::types::JobResult;
use anyhow::{bail, Context, Result};
use interfaces::{ApplyAck, DocumentAdapter, MaskSet, MeshResult};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Document backed by plain files: content is read from `input`, results
/// are written to `output`.
///
/// Masks are written as JSON. Meshes are written as the raw model file; if
/// `output` has no extension the mesh format's one is added.
#[derive(Debug, Clone)]
pub struct FileDocument {
    input: PathBuf,
    output: Option<PathBuf>,
}

impl FileDocument {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: None,
        }
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    fn output(&self) -> Result<&Path> {
        match &self.output {
            Some(path) => Ok(path),
            None => bail!("no output path configured for {}", self.input.display()),
        }
    }

    async fn read_input(&self) -> Result<Vec<u8>> {
        tokio::fs::read(&self.input)
            .await
            .with_context(|| format!("failed to read {}", self.input.display()))
    }

    async fn write_output(&self, path: &Path, content: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("Wrote {} bytes to {}", content.len(), path.display());
        Ok(())
    }
}

impl DocumentAdapter for FileDocument {
    async fn export_current_frame(&self) -> Result<Vec<u8>> {
        self.read_input().await
    }

    // A file holds the whole clip; the range is only checked.
    async fn export_video_range(&self, start_frame: u32, end_frame: u32) -> Result<Vec<u8>> {
        if start_frame > end_frame {
            bail!("invalid frame range {}..{}", start_frame, end_frame);
        }
        debug!(
            "Exporting {} for frames {}..{}",
            self.input.display(),
            start_frame,
            end_frame
        );
        self.read_input().await
    }

    async fn apply_mask_result(&self, masks: MaskSet<'_>) -> Result<ApplyAck> {
        let path = self.output()?;
        let (json, written) = match masks {
            MaskSet::Still(masks) => (serde_json::to_vec_pretty(masks)?, masks.len()),
            MaskSet::Track(track) => (serde_json::to_vec_pretty(track)?, track.object_ids().len()),
        };
        self.write_output(path, &json).await?;
        Ok(ApplyAck { written })
    }

    async fn apply_mesh_result(&self, mesh: &MeshResult) -> Result<ApplyAck> {
        let path = self.output()?;
        let path = if path.extension().is_none() {
            path.with_extension(mesh.format.extension())
        } else {
            path.to_path_buf()
        };
        self.write_output(&path, &mesh.content).await?;
        Ok(ApplyAck { written: 1 })
    }
}

/// Write a finished job's result into any document.
pub async fn apply_result<D: DocumentAdapter>(document: &D, result: &JobResult) -> Result<ApplyAck> {
    match result {
        JobResult::Masks { masks } => document.apply_mask_result(MaskSet::Still(masks)).await,
        JobResult::Track { frames } => document.apply_mask_result(MaskSet::Track(frames)).await,
        JobResult::Mesh { mesh } => document.apply_mesh_result(mesh).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interfaces::{BoundingBox, FrameTrack, MaskResult, MeshFormat, Point};
    use tempfile::TempDir;

    fn mask(id: u32) -> MaskResult {
        MaskResult {
            id,
            confidence: 0.75,
            polygon: vec![Point { x: 0.0, y: 0.0 }, Point { x: 2.0, y: 0.0 }, Point { x: 2.0, y: 2.0 }],
            bbox: BoundingBox {
                x1: 0.0,
                y1: 0.0,
                x2: 2.0,
                y2: 2.0,
            },
            area: 2.0,
        }
    }

    #[tokio::test]
    async fn exports_input_file() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("frame.png");
        tokio::fs::write(&input, b"\x89PNG").await.unwrap();

        let document = FileDocument::new(&input);
        assert_eq!(document.export_current_frame().await.unwrap(), b"\x89PNG".to_vec());
        assert_eq!(document.export_video_range(0, 30).await.unwrap().len(), 4);
        assert!(document.export_video_range(30, 0).await.is_err());
    }

    #[tokio::test]
    async fn missing_input_is_an_error() {
        let dir = TempDir::new().unwrap();
        let document = FileDocument::new(dir.path().join("absent.png"));
        assert!(document.export_current_frame().await.is_err());
    }

    #[tokio::test]
    async fn writes_masks_as_json() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out").join("masks.json");
        let document = FileDocument::new(dir.path().join("in.png")).with_output(&output);

        let masks = vec![mask(1), mask(2)];
        let ack = document.apply_mask_result(MaskSet::Still(&masks)).await.unwrap();
        assert_eq!(ack.written, 2);

        let written: Vec<MaskResult> = serde_json::from_slice(&tokio::fs::read(&output).await.unwrap()).unwrap();
        assert_eq!(written, masks);

        let mut track = FrameTrack::default();
        track.frames.insert(0, vec![mask(4)]);
        track.frames.insert(1, vec![mask(4), mask(5)]);
        let ack = document.apply_mask_result(MaskSet::Track(&track)).await.unwrap();
        assert_eq!(ack.written, 2);

        let written: serde_json::Value = serde_json::from_slice(&tokio::fs::read(&output).await.unwrap()).unwrap();
        assert_eq!(written["1"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn writes_mesh_with_format_extension() {
        let dir = TempDir::new().unwrap();
        let document = FileDocument::new(dir.path().join("in.png")).with_output(dir.path().join("model"));
        let mesh = MeshResult {
            content: b"o cube\n".to_vec(),
            format: MeshFormat::Obj,
            vertices: 8,
            faces: 12,
            file_size: 7,
            execution_time: None,
            warning: None,
        };

        document.apply_mesh_result(&mesh).await.unwrap();
        let written = tokio::fs::read(dir.path().join("model.obj")).await.unwrap();
        assert_eq!(written, mesh.content);
    }

    #[tokio::test]
    async fn applies_any_result_kind_to_any_document() {
        let document = interfaces::EmptyDocument::new();
        let result = JobResult::Masks {
            masks: vec![mask(1), mask(2), mask(3)],
        };
        let ack = apply_result(&document, &result).await.unwrap();
        assert_eq!(ack.written, 3);
        assert_eq!(document.applied().stills[0].len(), 3);
    }

    #[tokio::test]
    async fn applying_without_output_fails() {
        let document = FileDocument::new("in.png");
        assert!(document.apply_mask_result(MaskSet::Still(&[])).await.is_err());
    }
}
