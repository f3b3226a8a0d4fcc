use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::env;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

pub use interfaces::defs::{BoundingBox, FrameTrack, MaskResult, MeshFormat, MeshResult, Point};

/// Inline content above this size goes through the out-of-band upload.
pub const DEFAULT_INLINE_THRESHOLD_BYTES: u64 = 7 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    ImageSegment,
    VideoSegment,
    VideoPreview,
    MeshGenerate,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::ImageSegment,
        JobKind::VideoSegment,
        JobKind::VideoPreview,
        JobKind::MeshGenerate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::ImageSegment => "image-segment",
            JobKind::VideoSegment => "video-segment",
            JobKind::VideoPreview => "video-preview",
            JobKind::MeshGenerate => "mesh-generate",
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, JobKind::VideoSegment | JobKind::VideoPreview)
    }

    /// Input field carrying inline content.
    pub fn content_field(&self) -> &'static str {
        if self.is_video() {
            "video"
        } else {
            "image"
        }
    }

    /// Input field carrying an uploaded-object key.
    ///
    /// Image kinds only accept `image_key` on a backend that fetches
    /// uploaded objects by key; workers that read nothing but the inline
    /// `image` field reject such a job as having no image.
    pub fn reference_field(&self) -> &'static str {
        if self.is_video() {
            "video_key"
        } else {
            "image_key"
        }
    }

    pub fn content_type(&self) -> &'static str {
        if self.is_video() {
            "video/mp4"
        } else {
            "image/png"
        }
    }

    pub fn mode(&self) -> Option<&'static str> {
        match self {
            JobKind::VideoSegment => Some("video"),
            JobKind::VideoPreview => Some("preview"),
            _ => None,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the job's binary input lives. Exactly one of the two, always.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Base64 content embedded in the job input.
    Inline(String),
    /// Key of content previously uploaded to object storage.
    Reference(String),
}

impl Payload {
    pub fn is_inline(&self) -> bool {
        matches!(self, Payload::Inline(_))
    }
}

/// Immutable description of one unit of work to submit.
#[derive(Debug, Clone)]
pub struct JobRequest {
    kind: JobKind,
    payload: Payload,
    parameters: Map<String, Value>,
}

impl JobRequest {
    pub fn new(kind: JobKind, payload: Payload, parameters: Map<String, Value>) -> Self {
        Self {
            kind,
            payload,
            parameters,
        }
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn parameters(&self) -> &Map<String, Value> {
        &self.parameters
    }

    /// The kind-specific object placed under `input` in the run envelope.
    pub fn to_input(&self) -> Value {
        let mut input = self.parameters.clone();
        if let Some(mode) = self.kind.mode() {
            input.insert("mode".to_string(), Value::from(mode));
        }
        match &self.payload {
            Payload::Inline(encoded) => {
                input.insert(self.kind.content_field().to_string(), Value::from(encoded.as_str()));
            }
            Payload::Reference(key) => {
                input.insert(self.kind.reference_field().to_string(), Value::from(key.as_str()));
            }
        }
        Value::Object(input)
    }
}

/// Out-of-band storage slot handed out by the service for one upload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadTicket {
    #[serde(rename = "uploadUrl", alias = "upload_url")]
    pub upload_url: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
    Unknown(String),
}

impl JobStatus {
    /// Accepts both naming families the service has used.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "QUEUED" | "IN_QUEUE" => JobStatus::Queued,
            "RUNNING" | "IN_PROGRESS" => JobStatus::Running,
            "SUCCEEDED" | "COMPLETED" => JobStatus::Succeeded,
            "FAILED" => JobStatus::Failed,
            "CANCELLED" | "CANCELED" => JobStatus::Cancelled,
            "TIMED_OUT" => JobStatus::TimedOut,
            _ => JobStatus::Unknown(raw.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled | JobStatus::TimedOut
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => f.write_str("QUEUED"),
            JobStatus::Running => f.write_str("RUNNING"),
            JobStatus::Succeeded => f.write_str("SUCCEEDED"),
            JobStatus::Failed => f.write_str("FAILED"),
            JobStatus::Cancelled => f.write_str("CANCELLED"),
            JobStatus::TimedOut => f.write_str("TIMED_OUT"),
            JobStatus::Unknown(raw) => write!(f, "{}", raw),
        }
    }
}

/// Structured output of a finished job, one variant per result family.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobResult {
    Masks { masks: Vec<MaskResult> },
    Track { frames: FrameTrack },
    Mesh { mesh: MeshResult },
}

/// One remote unit of work as tracked by a controller.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    pub result: Option<JobResult>,
    pub error_message: Option<String>,
}

impl Job {
    pub fn new(id: String, kind: JobKind, status: JobStatus) -> Self {
        Self {
            id,
            kind,
            status,
            submitted_at: Utc::now(),
            result: None,
            error_message: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Uploading { sent: u64, total: u64 },
    Submitted { job_id: String },
    Status { status: String, attempt: u32, max_attempts: u32 },
}

/// Per-operation progress channel; the caller owns the receiving end.
pub type ProgressSink = mpsc::UnboundedSender<ProgressEvent>;

pub(crate) fn emit(progress: Option<&ProgressSink>, event: ProgressEvent) {
    if let Some(sink) = progress {
        // A dropped receiver only means nobody is watching.
        let _ = sink.send(event);
    }
}

/// Fixed-delay polling budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollBudget {
    pub fn new(interval_ms: u64, max_attempts: u32) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms),
            max_attempts,
        }
    }

    /// Longest time the poll loop can run, ignoring request latency.
    pub fn ceiling(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetTable {
    pub image_segment: PollBudget,
    pub video_segment: PollBudget,
    pub video_preview: PollBudget,
    pub mesh_generate: PollBudget,
}

impl BudgetTable {
    pub fn for_kind(&self, kind: JobKind) -> PollBudget {
        match kind {
            JobKind::ImageSegment => self.image_segment,
            JobKind::VideoSegment => self.video_segment,
            JobKind::VideoPreview => self.video_preview,
            JobKind::MeshGenerate => self.mesh_generate,
        }
    }

    pub fn set(&mut self, kind: JobKind, budget: PollBudget) {
        match kind {
            JobKind::ImageSegment => self.image_segment = budget,
            JobKind::VideoSegment => self.video_segment = budget,
            JobKind::VideoPreview => self.video_preview = budget,
            JobKind::MeshGenerate => self.mesh_generate = budget,
        }
    }
}

impl Default for BudgetTable {
    fn default() -> Self {
        Self {
            image_segment: PollBudget::new(1_000, 120),
            video_segment: PollBudget::new(3_000, 400),
            video_preview: PollBudget::new(2_000, 150),
            mesh_generate: PollBudget::new(3_000, 200),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub upload_ticket_path: String,
    pub inline_threshold_bytes: u64,
    pub budgets: BudgetTable,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            api_key: String::new(),
            user_agent: "Inference-Jobs/0.1".to_string(),
            timeout_seconds: 120,
            upload_ticket_path: "/upload".to_string(),
            inline_threshold_bytes: DEFAULT_INLINE_THRESHOLD_BYTES,
            budgets: BudgetTable::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables (and `.env`, if present).
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(None, None)
    }

    /// Same as [`ClientConfig::from_env`], but credentials given here win
    /// and the matching variables become optional. Malformed settings are
    /// still reported.
    pub fn from_env_with(base_url: Option<String>, api_key: Option<String>) -> Result<Self> {
        dotenv::dotenv().ok();
        let defaults = Self::default();

        let base_url = match base_url {
            Some(base_url) => base_url,
            None => env::var("INFERENCE_BASE_URL")
                .map_err(|_| JobError::Config("INFERENCE_BASE_URL is not set".to_string()))?,
        };
        let api_key = match api_key {
            Some(api_key) => api_key,
            None => env::var("INFERENCE_API_KEY")
                .map_err(|_| JobError::Config("INFERENCE_API_KEY is not set".to_string()))?,
        };

        Ok(Self {
            base_url,
            api_key,
            user_agent: env::var("INFERENCE_USER_AGENT").unwrap_or(defaults.user_agent),
            timeout_seconds: parse_env("INFERENCE_TIMEOUT_SECONDS")?.unwrap_or(defaults.timeout_seconds),
            upload_ticket_path: env::var("INFERENCE_UPLOAD_PATH").unwrap_or(defaults.upload_ticket_path),
            inline_threshold_bytes: parse_env("INFERENCE_INLINE_THRESHOLD_BYTES")?
                .unwrap_or(defaults.inline_threshold_bytes),
            budgets: defaults.budgets,
        })
    }
}

fn parse_env(name: &str) -> Result<Option<u64>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| JobError::Config(format!("{} must be an unsigned integer, got '{}'", name, raw))),
        Err(_) => Ok(None),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("upload ticket request failed: {0}")]
    UploadTicket(String),

    #[error("upload transfer failed: {0}")]
    UploadTransfer(String),

    #[error("job submission failed: {0}")]
    Submission(String),

    #[error("{message}")]
    RemoteJobFailure { status: JobStatus, message: String },

    #[error("polling timeout: job {job_id} reported no terminal status after {attempts} checks")]
    PollingTimeout { job_id: String, attempts: u32 },

    #[error("cancellation failed: {0}")]
    Cancellation(String),

    /// `job_id` is `None` when the run was superseded before it submitted anything.
    #[error("{}", superseded_message(.job_id))]
    Superseded { job_id: Option<String> },

    #[error("malformed job result: {0}")]
    MalformedResult(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn superseded_message(job_id: &Option<String>) -> String {
    match job_id {
        Some(job_id) => format!("job {} was superseded by a newer operation", job_id),
        None => "run was superseded by a newer operation before a job was submitted".to_string(),
    }
}

impl JobError {
    /// Server reported the job as timed out (not the local attempt budget).
    pub fn is_server_timeout(&self) -> bool {
        matches!(self, JobError::RemoteJobFailure { status: JobStatus::TimedOut, .. })
    }

    pub fn is_polling_timeout(&self) -> bool {
        matches!(self, JobError::PollingTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, JobError>;

/// Uniform caller-facing shape: `{"success": true, ...}` or
/// `{"success": false, "error": "..."}`.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(flatten)]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobReport {
    pub fn from_result(result: &Result<JobResult>, job_id: Option<String>) -> Self {
        match result {
            Ok(value) => Self {
                success: true,
                job_id,
                result: Some(value.clone()),
                error: None,
            },
            Err(e) => Self {
                success: false,
                job_id,
                result: None,
                error: Some(e.to_string()),
            },
        }
    }
}
