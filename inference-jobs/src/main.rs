use anyhow::Context;
use bytes::Bytes;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use inference_jobs::{
    apply_result, check_health, ClientConfig, DocumentAdapter, FileDocument, HttpTransport, JobController, JobKind,
    JobResult, McResolution, MeshFormat, MeshParams, PollBudget, PolygonQuality, ProgressEvent, RemeshOption,
    SegmentParams, Transport, VideoParams,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Submit segmentation and mesh jobs to a remote inference service.
#[derive(Debug, Parser)]
#[command(name = "inference-jobs", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Increase logging verbosity (-v, -vv).
    #[arg(global = true, short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
    /// Service base URL (overrides INFERENCE_BASE_URL).
    #[arg(global = true, long)]
    base_url: Option<String>,
    /// API key (overrides INFERENCE_API_KEY).
    #[arg(global = true, long)]
    api_key: Option<String>,
    /// Per-request timeout in seconds.
    #[arg(global = true, long)]
    timeout: Option<u64>,
    /// Content above this many bytes is uploaded out of band.
    #[arg(global = true, long)]
    inline_threshold: Option<u64>,
    /// Delay between status checks for this run, in milliseconds.
    #[arg(global = true, long)]
    poll_interval_ms: Option<u64>,
    /// Status checks before giving up on this run.
    #[arg(global = true, long)]
    max_attempts: Option<u32>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Check connectivity and credentials.
    Health,
    /// Segment a still image.
    SegmentImage(SegmentImageArgs),
    /// Track objects through a video clip.
    SegmentVideo(VideoArgs),
    /// Quick low-cost tracking pass over a clip.
    PreviewVideo(VideoArgs),
    /// Generate a 3D mesh from an image.
    Mesh(MeshArgs),
}

impl Commands {
    fn kind(&self) -> Option<JobKind> {
        match self {
            Commands::Health => None,
            Commands::SegmentImage(_) => Some(JobKind::ImageSegment),
            Commands::SegmentVideo(_) => Some(JobKind::VideoSegment),
            Commands::PreviewVideo(_) => Some(JobKind::VideoPreview),
            Commands::Mesh(_) => Some(JobKind::MeshGenerate),
        }
    }
}

#[derive(Debug, Args)]
struct SegmentImageArgs {
    #[arg(value_name = "FILE")]
    input: PathBuf,
    /// Text prompt describing what to segment.
    #[arg(long, default_value = "")]
    prompt: String,
    #[arg(long, default_value_t = 0.5)]
    confidence_threshold: f32,
    #[arg(long, default_value_t = 10)]
    max_masks: u32,
    /// low, medium or high.
    #[arg(long, default_value = "medium")]
    polygon_quality: PolygonQuality,
    #[arg(long, default_value_t = 0.0)]
    edge_snap_distance: f32,
    /// Write the masks here as JSON.
    #[arg(long, value_name = "PATH")]
    out: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct VideoArgs {
    #[arg(value_name = "FILE")]
    input: PathBuf,
    #[arg(long, default_value = "")]
    prompt: String,
    #[arg(long, default_value_t = 0.5)]
    confidence_threshold: f32,
    #[arg(long, default_value_t = 300)]
    max_frames: u32,
    #[arg(long, default_value = "medium")]
    polygon_quality: PolygonQuality,
    #[arg(long, default_value_t = 0.0)]
    edge_snap_distance: f32,
    /// Write the frame track here as JSON.
    #[arg(long, value_name = "PATH")]
    out: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Glb,
    Obj,
}

impl From<FormatArg> for MeshFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Glb => MeshFormat::Glb,
            FormatArg::Obj => MeshFormat::Obj,
        }
    }
}

#[derive(Debug, Args)]
struct MeshArgs {
    #[arg(value_name = "FILE")]
    input: PathBuf,
    #[arg(long, default_value_t = 0.85)]
    foreground_ratio: f32,
    /// 128, 256 or 512.
    #[arg(long, default_value = "256")]
    mc_resolution: McResolution,
    #[arg(long, value_enum, default_value_t = FormatArg::Glb)]
    format: FormatArg,
    /// 512, 1024 or 2048 (textured backends only).
    #[arg(long)]
    texture_resolution: Option<u16>,
    /// none, triangle or quad.
    #[arg(long)]
    remesh: Option<RemeshOption>,
    /// Bare flag means true; `--generate-texture=false` turns it off.
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    generate_texture: Option<bool>,
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    remove_background: Option<bool>,
    /// Quality profile 1-5 (backends that support it).
    #[arg(long)]
    profile: Option<u8>,
    /// Write the model here; the format's extension is added if missing.
    #[arg(long, value_name = "PATH")]
    out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(1)
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // stdout carries the JSON report only.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let mut config = ClientConfig::from_env_with(cli.base_url.clone(), cli.api_key.clone())?;
    if let Some(timeout) = cli.timeout {
        config.timeout_seconds = timeout;
    }
    if let Some(threshold) = cli.inline_threshold {
        config.inline_threshold_bytes = threshold;
    }
    if let Some(kind) = cli.command.kind() {
        let default = config.budgets.for_kind(kind);
        let budget = PollBudget {
            interval: cli
                .poll_interval_ms
                .map(std::time::Duration::from_millis)
                .unwrap_or(default.interval),
            max_attempts: cli.max_attempts.unwrap_or(default.max_attempts),
        };
        config.budgets.set(kind, budget);
    }
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = load_config(&cli)?;
    info!("Using inference service at {}", config.base_url);
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config)?);

    if let Commands::Health = cli.command {
        let health = check_health(transport.as_ref()).await?;
        println!("{}", serde_json::to_string_pretty(&health)?);
        return Ok(true);
    }

    let controller = Arc::new(JobController::new(transport, &config));
    let kind = cli.command.kind();
    let (progress, events) = mpsc::unbounded_channel();
    let logger = tokio::spawn(log_progress(events));
    let interrupt = tokio::spawn(cancel_on_interrupt(controller.clone()));

    let result = match cli.command {
        Commands::Health => unreachable!("handled above"),
        Commands::SegmentImage(args) => {
            let document = document(&args.input, args.out.as_ref());
            let image = Bytes::from(document.export_current_frame().await?);
            let params = SegmentParams {
                prompt: args.prompt,
                confidence_threshold: args.confidence_threshold,
                max_masks: args.max_masks,
                polygon_quality: args.polygon_quality,
                edge_snap_distance: args.edge_snap_distance,
            };
            let result = controller
                .segment_image(image, &params, Some(&progress))
                .await
                .map(|masks| JobResult::Masks { masks });
            (document, args.out.is_some(), result)
        }
        Commands::SegmentVideo(args) | Commands::PreviewVideo(args) => {
            let preview = kind == Some(JobKind::VideoPreview);
            let document = document(&args.input, args.out.as_ref());
            let video = Bytes::from(document.export_video_range(0, args.max_frames).await?);
            let params = VideoParams {
                prompt: args.prompt,
                confidence_threshold: args.confidence_threshold,
                max_frames: args.max_frames,
                polygon_quality: args.polygon_quality,
                edge_snap_distance: args.edge_snap_distance,
            };
            let tracked = if preview {
                controller.preview_video(video, &params, Some(&progress)).await
            } else {
                controller.segment_video(video, &params, Some(&progress)).await
            };
            (document, args.out.is_some(), tracked.map(|frames| JobResult::Track { frames }))
        }
        Commands::Mesh(args) => {
            let document = document(&args.input, args.out.as_ref());
            let image = Bytes::from(document.export_current_frame().await?);
            let params = MeshParams {
                foreground_ratio: args.foreground_ratio,
                mc_resolution: args.mc_resolution,
                output_format: args.format.into(),
                texture_resolution: args.texture_resolution,
                remesh_option: args.remesh,
                generate_texture: args.generate_texture,
                remove_background: args.remove_background,
                profile: args.profile,
            };
            let result = controller
                .generate_mesh(image, &params, Some(&progress))
                .await
                .map(|mesh| JobResult::Mesh { mesh });
            (document, args.out.is_some(), result)
        }
    };
    let (document, has_output, result) = result;

    interrupt.abort();
    drop(progress);
    let _ = logger.await;

    if let (true, Ok(value)) = (has_output, &result) {
        let ack = apply_result(&document, value).await.context("failed to write the result")?;
        debug!("Wrote {} items", ack.written);
    }

    let report = controller.report(&result).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report.success)
}

fn document(input: &PathBuf, out: Option<&PathBuf>) -> FileDocument {
    let document = FileDocument::new(input);
    match out {
        Some(path) => document.with_output(path),
        None => document,
    }
}

async fn log_progress(mut events: mpsc::UnboundedReceiver<ProgressEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ProgressEvent::Uploading { sent, total } => {
                debug!("Uploaded {}/{} bytes", sent, total);
                if sent == total {
                    info!("Upload of {} bytes finished", total);
                }
            }
            ProgressEvent::Submitted { job_id } => info!("Job {} submitted", job_id),
            ProgressEvent::Status {
                status,
                attempt,
                max_attempts,
            } => info!("Status {} ({}/{})", status, attempt, max_attempts),
        }
    }
}

async fn cancel_on_interrupt(controller: Arc<JobController>) {
    loop {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            return;
        }
        warn!("Interrupted, requesting cancellation");
        if !controller.cancel().await {
            warn!("Nothing was cancelled");
        }
    }
}
