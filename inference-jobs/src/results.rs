//! Turns a succeeded job's raw `output` into a typed [`JobResult`].
//!
//! Unknown fields are ignored. Missing or mistyped required fields are a
//! [`JobError::MalformedResult`]; nothing is silently defaulted except the
//! mesh statistics some workers do not report.

use crate::transport::Transport;
use crate::types::{FrameTrack, JobError, JobKind, JobResult, MaskResult, MeshFormat, MeshResult, Result};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct MaskOutput {
    masks: Vec<MaskResult>,
}

#[derive(Debug, Deserialize)]
struct TrackOutput {
    frames: FrameTrack,
}

#[derive(Debug, Deserialize)]
struct MeshOutput {
    #[serde(default)]
    model_base64: Option<String>,
    #[serde(default)]
    model_url: Option<String>,
    #[serde(default)]
    format: MeshFormat,
    #[serde(default)]
    vertices: Option<u64>,
    #[serde(default)]
    faces: Option<u64>,
    #[serde(default)]
    file_size: Option<u64>,
    #[serde(default)]
    execution_time: Option<f64>,
    #[serde(default)]
    warning: Option<String>,
}

pub async fn decode(kind: JobKind, output: Value, transport: &dyn Transport) -> Result<JobResult> {
    match kind {
        JobKind::ImageSegment => decode_masks(output),
        JobKind::VideoSegment | JobKind::VideoPreview => decode_track(output),
        JobKind::MeshGenerate => decode_mesh(output, transport).await,
    }
}

fn decode_masks(output: Value) -> Result<JobResult> {
    let parsed: MaskOutput =
        serde_json::from_value(output).map_err(|e| JobError::MalformedResult(format!("mask list: {}", e)))?;
    check_masks(&parsed.masks)?;
    debug!("Decoded {} masks", parsed.masks.len());
    Ok(JobResult::Masks { masks: parsed.masks })
}

fn decode_track(output: Value) -> Result<JobResult> {
    let parsed: TrackOutput =
        serde_json::from_value(output).map_err(|e| JobError::MalformedResult(format!("frame map: {}", e)))?;

    for masks in parsed.frames.frames.values() {
        check_masks(masks)?;
    }

    let missing = parsed.frames.missing_frames();
    if !missing.is_empty() {
        warn!(
            "Frame map has {} gaps (first missing frame {}), keeping what was returned",
            missing.len(),
            missing[0]
        );
    }

    debug!(
        "Decoded {} frames tracking {} objects",
        parsed.frames.frame_count(),
        parsed.frames.object_ids().len()
    );
    Ok(JobResult::Track { frames: parsed.frames })
}

async fn decode_mesh(output: Value, transport: &dyn Transport) -> Result<JobResult> {
    let parsed: MeshOutput =
        serde_json::from_value(output).map_err(|e| JobError::MalformedResult(format!("mesh descriptor: {}", e)))?;

    let content = match (&parsed.model_base64, &parsed.model_url) {
        (Some(encoded), _) => BASE64_STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| JobError::MalformedResult(format!("model_base64 is not valid base64: {}", e)))?,
        (None, Some(url)) => {
            debug!("Downloading mesh from {}", url);
            transport.get_raw(url).await?.to_vec()
        }
        (None, None) => {
            return Err(JobError::MalformedResult(
                "mesh descriptor has neither model_base64 nor model_url".to_string(),
            ))
        }
    };

    let actual_size = content.len() as u64;
    if let Some(declared) = parsed.file_size {
        if declared != actual_size {
            warn!("Mesh declared {} bytes but {} arrived", declared, actual_size);
        }
    }
    if let Some(warning) = &parsed.warning {
        warn!("Mesh worker warning: {}", warning);
    }

    Ok(JobResult::Mesh {
        mesh: MeshResult {
            content,
            format: parsed.format,
            vertices: parsed.vertices.unwrap_or(0),
            faces: parsed.faces.unwrap_or(0),
            file_size: actual_size,
            execution_time: parsed.execution_time,
            warning: parsed.warning,
        },
    })
}

fn check_masks(masks: &[MaskResult]) -> Result<()> {
    for mask in masks {
        if !(0.0..=1.0).contains(&mask.confidence) {
            return Err(JobError::MalformedResult(format!(
                "mask {} has confidence {} outside 0..=1",
                mask.id, mask.confidence
            )));
        }
    }
    Ok(())
}
