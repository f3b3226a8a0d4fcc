use crate::params::{MeshParams, SegmentParams, VideoParams};
use crate::payload::PayloadStrategy;
use crate::poller::StatusPoller;
use crate::results;
use crate::submitter::JobSubmitter;
use crate::transport::{Outcome, Transport};
use crate::types::{
    emit, BudgetTable, ClientConfig, FrameTrack, Job, JobError, JobKind, JobReport, JobRequest, JobResult,
    JobStatus, MaskResult, MeshResult, ProgressEvent, ProgressSink, Result,
};
use bytes::Bytes;
use reqwest::Method;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// The controller's single "current job" slot plus the generation that owns it.
#[derive(Debug, Default)]
struct JobSlot {
    generation: u64,
    current: Option<Job>,
    last: Option<Job>,
}

/// Ownership token for one `run()`.
///
/// Every slot mutation checks the generation first, so a run that has been
/// superseded by a newer one can never clear or overwrite the newer job.
#[derive(Debug, Clone)]
pub struct JobLease {
    generation: u64,
    slot: Arc<RwLock<JobSlot>>,
}

impl JobLease {
    /// A lease over a private slot, for driving the poller on its own.
    pub fn standalone() -> Self {
        Self {
            generation: 0,
            slot: Arc::new(RwLock::new(JobSlot::default())),
        }
    }

    pub async fn is_current(&self) -> bool {
        self.slot.read().await.generation == self.generation
    }

    /// Install a freshly submitted job as the current one.
    pub async fn adopt(&self, job: Job) -> bool {
        let mut slot = self.slot.write().await;
        if slot.generation != self.generation {
            return false;
        }
        slot.current = Some(job);
        true
    }

    pub async fn record_status(&self, status: &JobStatus) {
        let mut slot = self.slot.write().await;
        if slot.generation != self.generation {
            return;
        }
        if let Some(job) = slot.current.as_mut() {
            job.status = status.clone();
        }
    }

    /// The poll loop is over: the job stops being current.
    pub async fn settle(&self, job_id: &str, outcome: &Result<Value>) {
        let mut slot = self.slot.write().await;
        if slot.generation != self.generation {
            return;
        }
        if slot.current.as_ref().map_or(true, |job| job.id != job_id) {
            return;
        }
        let Some(mut job) = slot.current.take() else {
            return;
        };

        match outcome {
            Ok(_) => job.status = JobStatus::Succeeded,
            Err(JobError::RemoteJobFailure { status, message }) => {
                job.status = status.clone();
                job.error_message = Some(message.clone());
            }
            Err(e) => job.error_message = Some(e.to_string()),
        }
        slot.last = Some(job);
    }

    /// Attach the decoded result (or the decoding error) to the settled job.
    pub async fn record_result(&self, job_id: &str, result: &Result<JobResult>) {
        let mut slot = self.slot.write().await;
        if slot.generation != self.generation {
            return;
        }
        if let Some(job) = slot.last.as_mut().filter(|job| job.id == job_id) {
            match result {
                Ok(value) => job.result = Some(value.clone()),
                Err(e) => job.error_message = Some(e.to_string()),
            }
        }
    }
}

/// Runs one job at a time: payload, submission, polling, result decoding.
///
/// Starting a new run while one is in flight supersedes the old one; its
/// poll loop stops at the next attempt with [`JobError::Superseded`].
pub struct JobController {
    transport: Arc<dyn Transport>,
    payloads: PayloadStrategy,
    submitter: JobSubmitter,
    poller: StatusPoller,
    budgets: BudgetTable,
    slot: Arc<RwLock<JobSlot>>,
}

impl JobController {
    pub fn new(transport: Arc<dyn Transport>, config: &ClientConfig) -> Self {
        Self {
            payloads: PayloadStrategy::new(
                transport.clone(),
                config.inline_threshold_bytes,
                config.upload_ticket_path.clone(),
            ),
            submitter: JobSubmitter::new(transport.clone()),
            poller: StatusPoller::new(transport.clone()),
            budgets: config.budgets,
            slot: Arc::new(RwLock::new(JobSlot::default())),
            transport,
        }
    }

    async fn begin(&self) -> JobLease {
        let mut slot = self.slot.write().await;
        slot.generation += 1;
        slot.last = None;
        if let Some(previous) = slot.current.take() {
            warn!("Job {} is still {}, starting a new run supersedes it", previous.id, previous.status);
        }
        JobLease {
            generation: slot.generation,
            slot: self.slot.clone(),
        }
    }

    /// Full lifecycle of one job. Parameters are passed through as given;
    /// use the typed wrappers to validate them first.
    pub async fn run(
        &self,
        kind: JobKind,
        content: Bytes,
        parameters: Map<String, Value>,
        progress: Option<&ProgressSink>,
    ) -> Result<JobResult> {
        let lease = self.begin().await;

        let payload = self.payloads.resolve(kind, content, progress).await?;
        let request = JobRequest::new(kind, payload, parameters);

        if !lease.is_current().await {
            return Err(JobError::Superseded { job_id: None });
        }

        let job = self.submitter.submit(&request).await?;
        let job_id = job.id.clone();

        if !lease.adopt(job).await {
            warn!("Job {} was superseded before polling started, cancelling it", job_id);
            if let Err(e) = self.send_cancel(&job_id).await {
                warn!("{}", e);
            }
            return Err(JobError::Superseded { job_id: Some(job_id) });
        }
        emit(progress, ProgressEvent::Submitted { job_id: job_id.clone() });

        let budget = self.budgets.for_kind(kind);
        let output = self.poller.poll(&job_id, &budget, &lease, progress).await;
        lease.settle(&job_id, &output).await;

        let result = match output {
            Ok(output) => results::decode(kind, output, self.transport.as_ref()).await,
            Err(e) => Err(e),
        };
        lease.record_result(&job_id, &result).await;

        match &result {
            Ok(_) => info!("{} job {} finished", kind, job_id),
            Err(e) => warn!("{} job {} did not produce a result: {}", kind, job_id, e),
        }
        result
    }

    pub async fn segment_image(
        &self,
        image: Bytes,
        params: &SegmentParams,
        progress: Option<&ProgressSink>,
    ) -> Result<Vec<MaskResult>> {
        let parameters = params.to_parameters()?;
        match self.run(JobKind::ImageSegment, image, parameters, progress).await? {
            JobResult::Masks { masks } => Ok(masks),
            other => Err(unexpected(JobKind::ImageSegment, &other)),
        }
    }

    pub async fn segment_video(
        &self,
        video: Bytes,
        params: &VideoParams,
        progress: Option<&ProgressSink>,
    ) -> Result<FrameTrack> {
        self.track(JobKind::VideoSegment, video, params, progress).await
    }

    /// Quick low-cost pass over a clip, same result shape as a full run.
    pub async fn preview_video(
        &self,
        video: Bytes,
        params: &VideoParams,
        progress: Option<&ProgressSink>,
    ) -> Result<FrameTrack> {
        self.track(JobKind::VideoPreview, video, params, progress).await
    }

    async fn track(
        &self,
        kind: JobKind,
        video: Bytes,
        params: &VideoParams,
        progress: Option<&ProgressSink>,
    ) -> Result<FrameTrack> {
        let parameters = params.to_parameters()?;
        match self.run(kind, video, parameters, progress).await? {
            JobResult::Track { frames } => Ok(frames),
            other => Err(unexpected(kind, &other)),
        }
    }

    pub async fn generate_mesh(
        &self,
        image: Bytes,
        params: &MeshParams,
        progress: Option<&ProgressSink>,
    ) -> Result<MeshResult> {
        let parameters = params.to_parameters()?;
        match self.run(JobKind::MeshGenerate, image, parameters, progress).await? {
            JobResult::Mesh { mesh } => Ok(mesh),
            other => Err(unexpected(JobKind::MeshGenerate, &other)),
        }
    }

    /// Ask the service to cancel the current job.
    ///
    /// Returns `false` without any network call when nothing is running, and
    /// `false` (logged) when the request fails. The job stays current until
    /// the poll loop sees a terminal status.
    pub async fn cancel(&self) -> bool {
        let Some(job_id) = self.current_job().await else {
            info!("No job in flight, nothing to cancel");
            return false;
        };

        match self.send_cancel(&job_id).await {
            Ok(()) => {
                info!("Cancellation requested for job {}", job_id);
                true
            }
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    async fn send_cancel(&self, job_id: &str) -> Result<()> {
        let path = format!("/cancel/{}", job_id);
        match self.transport.send(Method::POST, &path, None).await {
            Outcome::Ok { .. } => Ok(()),
            Outcome::HttpError { status, body } => Err(JobError::Cancellation(format!(
                "job {}: HTTP {}: {}",
                job_id, status, body
            ))),
            Outcome::NetworkError(message) => Err(JobError::Cancellation(format!("job {}: {}", job_id, message))),
        }
    }

    pub async fn current_job(&self) -> Option<String> {
        self.slot.read().await.current.as_ref().map(|job| job.id.clone())
    }

    /// The job the latest run finished with, with its result if any. Cleared
    /// when a new run starts.
    pub async fn last_job(&self) -> Option<Job> {
        self.slot.read().await.last.clone()
    }

    /// Caller-facing summary of the latest run. A run that failed before
    /// submitting anything carries no job id.
    pub async fn report(&self, result: &Result<JobResult>) -> JobReport {
        let job_id = match result {
            Err(JobError::Superseded { job_id }) => job_id.clone(),
            _ => self.last_job().await.map(|job| job.id),
        };
        JobReport::from_result(result, job_id)
    }
}

fn unexpected(kind: JobKind, result: &JobResult) -> JobError {
    let found = match result {
        JobResult::Masks { .. } => "masks",
        JobResult::Track { .. } => "frame track",
        JobResult::Mesh { .. } => "mesh",
    };
    JobError::MalformedResult(format!("{} job produced a {}", kind, found))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use crate::types::{PollBudget, ProgressEvent};
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::Instant;

    fn config() -> ClientConfig {
        let mut config = ClientConfig::default();
        for kind in JobKind::ALL {
            config.budgets.set(kind, PollBudget::new(1_000, 5));
        }
        config
    }

    fn controller(transport: &Arc<MockTransport>, config: &ClientConfig) -> JobController {
        JobController::new(transport.clone(), config)
    }

    fn masks_output() -> Value {
        json!({
            "status": "COMPLETED",
            "output": {
                "masks": [{
                    "id": 1,
                    "score": 0.92,
                    "polygon": [[1, 1], [4, 1], [4, 4]],
                    "bbox": [1, 1, 4, 4],
                    "area": 4.5
                }]
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_first_check_polls_once() {
        let transport = Arc::new(MockTransport::new().with_statuses([MockTransport::ok(masks_output())]));
        let controller = controller(&transport, &config());

        let masks = controller
            .segment_image(Bytes::from_static(b"png"), &SegmentParams::with_prompt("cat"), None)
            .await
            .unwrap();

        assert_eq!(masks.len(), 1);
        assert!((masks[0].confidence - 0.92).abs() < 1e-6);
        assert_eq!(transport.count(Method::GET, "/status/"), 1);
        assert_eq!(transport.count(Method::POST, "/cancel/"), 0);
        assert_eq!(controller.current_job().await, None);

        let last = controller.last_job().await.unwrap();
        assert_eq!(last.status, JobStatus::Succeeded);
        assert!(matches!(last.result, Some(JobResult::Masks { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn running_forever_exhausts_the_budget() {
        let transport = Arc::new(MockTransport::new().with_statuses([MockTransport::status("RUNNING")]));
        let mut config = config();
        config.budgets.set(JobKind::VideoSegment, PollBudget::new(3_000, 4));
        let controller = controller(&transport, &config);
        let started = Instant::now();

        let err = controller
            .segment_video(Bytes::from_static(b"mp4"), &VideoParams::default(), None)
            .await
            .unwrap_err();

        assert!(err.is_polling_timeout());
        assert!(!err.is_server_timeout());
        assert!(started.elapsed() >= Duration::from_millis(12_000));
        assert_eq!(transport.count(Method::GET, "/status/"), 4);
        assert_eq!(controller.current_job().await, None);
        assert_eq!(controller.last_job().await.unwrap().status, JobStatus::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn server_timeout_is_not_a_polling_timeout() {
        let transport = Arc::new(MockTransport::new().with_statuses([MockTransport::status("TIMED_OUT")]));
        let controller = controller(&transport, &config());

        let err = controller
            .preview_video(Bytes::from_static(b"mp4"), &VideoParams::default(), None)
            .await
            .unwrap_err();
        assert!(err.is_server_timeout());
        assert_eq!(controller.last_job().await.unwrap().status, JobStatus::TimedOut);
    }

    #[tokio::test]
    async fn cancel_without_a_job_makes_no_call() {
        let transport = Arc::new(MockTransport::new());
        let controller = controller(&transport, &config());

        assert!(!controller.cancel().await);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_mid_poll_ends_on_cancelled_status() {
        let transport = Arc::new(MockTransport::new().with_statuses([MockTransport::status("IN_PROGRESS")]));
        let mut config = config();
        config.budgets.set(JobKind::VideoSegment, PollBudget::new(1_000, 50));
        let controller = Arc::new(controller(&transport, &config));

        let running = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .segment_video(Bytes::from_static(b"mp4"), &VideoParams::with_prompt("car"), None)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert!(controller.current_job().await.is_some());
        assert!(controller.cancel().await);
        transport.push_status(MockTransport::status("CANCELLED"));

        let err = running.await.unwrap().unwrap_err();
        assert!(matches!(err, JobError::RemoteJobFailure { status: JobStatus::Cancelled, .. }));
        assert_eq!(transport.count(Method::POST, "/cancel/"), 1);
        assert_eq!(transport.count(Method::GET, "/status/"), 3);
        assert_eq!(controller.current_job().await, None);
        assert!(!controller.cancel().await);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_cancel_returns_false_and_polling_continues() {
        let transport = Arc::new(
            MockTransport::new()
                .with_statuses([MockTransport::status("IN_QUEUE")])
                .with_cancel(Outcome::HttpError {
                    status: 404,
                    body: "unknown job".to_string(),
                }),
        );
        let controller = Arc::new(controller(&transport, &config()));

        let running = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .segment_image(Bytes::from_static(b"png"), &SegmentParams::default(), None)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(!controller.cancel().await);
        assert!(controller.current_job().await.is_some());

        let err = running.await.unwrap().unwrap_err();
        assert!(err.is_polling_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_status_failures_still_count() {
        let transport = Arc::new(MockTransport::new().with_statuses([
            Outcome::NetworkError("reset".to_string()),
            MockTransport::status("IN_PROGRESS"),
            Outcome::HttpError {
                status: 502,
                body: "bad gateway".to_string(),
            },
        ]));
        let mut config = config();
        config.budgets.set(JobKind::ImageSegment, PollBudget::new(1_000, 4));
        let controller = controller(&transport, &config);

        let err = controller
            .segment_image(Bytes::from_static(b"png"), &SegmentParams::default(), None)
            .await
            .unwrap_err();
        assert!(err.is_polling_timeout());
        assert_eq!(transport.count(Method::GET, "/status/"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn round_trip_echoes_parameters_and_reports_progress() {
        let transport = Arc::new(
            MockTransport::new()
                .with_submit(MockTransport::ok(json!({ "id": "job-42", "status": "IN_QUEUE" })))
                .with_statuses([MockTransport::status("IN_PROGRESS"), MockTransport::status("COMPLETED")])
                .with_echo_input(),
        );
        let controller = controller(&transport, &config());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let mut parameters = Map::new();
        parameters.insert("prompt".to_string(), json!("chair"));
        parameters.insert("max_masks".to_string(), json!(2));
        // An echoed input is not a mask list.
        let err = controller
            .run(JobKind::ImageSegment, Bytes::from_static(b"abc"), parameters, Some(&tx))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::MalformedResult(_)));

        let input = transport.last_submitted_input().unwrap();
        assert_eq!(input["prompt"], "chair");
        assert_eq!(input["max_masks"], 2);
        assert_eq!(input["image"], "YWJj");

        assert_eq!(
            rx.try_recv().unwrap(),
            ProgressEvent::Submitted {
                job_id: "job-42".to_string()
            }
        );
        let mut statuses = Vec::new();
        while let Ok(ProgressEvent::Status { status, .. }) = rx.try_recv() {
            statuses.push(status);
        }
        assert_eq!(statuses, vec!["IN_PROGRESS", "COMPLETED"]);

        let report = controller.report(&Err(err)).await;
        assert!(!report.success);
        assert_eq!(report.job_id.as_deref(), Some("job-42"));
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_content_is_uploaded_before_submission() {
        let transport = Arc::new(MockTransport::new().with_statuses([MockTransport::ok(json!({
            "status": "COMPLETED",
            "output": { "frames": { "0": [] } }
        }))]));
        let controller = controller(&transport, &config());

        let video = Bytes::from(vec![0u8; 10 * 1024 * 1024]);
        let track = controller
            .segment_video(video, &VideoParams::with_prompt("dog"), None)
            .await
            .unwrap();
        assert_eq!(track.frame_count(), 1);

        let calls = transport.calls();
        let methods: Vec<(Method, &str)> = calls.iter().map(|call| (call.method.clone(), call.path.as_str())).collect();
        assert_eq!(methods[0], (Method::POST, "/upload"));
        assert_eq!(methods[1].0, Method::PUT);
        assert_eq!(methods[2], (Method::POST, "/run"));

        let input = transport.last_submitted_input().unwrap();
        assert_eq!(input["video_key"], "uploads/object");
        assert_eq!(input["mode"], "video");
        assert!(input.get("video").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn upload_failure_submits_nothing() {
        let transport = Arc::new(MockTransport::new().with_upload(Outcome::HttpError {
            status: 403,
            body: "expired".to_string(),
        }));
        let mut config = config();
        config.inline_threshold_bytes = 4;
        let controller = controller(&transport, &config);

        let err = controller
            .generate_mesh(Bytes::from_static(b"too large"), &MeshParams::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::UploadTransfer(_)));
        assert_eq!(transport.count(Method::POST, "/run"), 0);
        assert_eq!(controller.current_job().await, None);
    }

    #[tokio::test]
    async fn invalid_parameters_fail_before_any_call() {
        let transport = Arc::new(MockTransport::new());
        let controller = controller(&transport, &config());
        let params = MeshParams {
            foreground_ratio: 0.2,
            ..MeshParams::default()
        };

        let err = controller
            .generate_mesh(Bytes::from_static(b"png"), &params, None)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidRequest(_)));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn newer_run_supersedes_the_one_in_flight() {
        let transport = Arc::new(MockTransport::new().with_statuses([MockTransport::status("IN_PROGRESS")]));
        let mut config = config();
        config.budgets.set(JobKind::VideoSegment, PollBudget::new(1_000, 50));
        config.budgets.set(JobKind::ImageSegment, PollBudget::new(1_000, 3));
        let controller = Arc::new(controller(&transport, &config));

        let first = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .segment_video(Bytes::from_static(b"mp4"), &VideoParams::default(), None)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        let first_id = controller.current_job().await.unwrap();

        let second = controller
            .segment_image(Bytes::from_static(b"png"), &SegmentParams::default(), None)
            .await
            .unwrap_err();
        assert!(second.is_polling_timeout());

        let first = first.await.unwrap().unwrap_err();
        assert!(matches!(first, JobError::Superseded { job_id: Some(ref id) } if *id == first_id));
        assert_eq!(controller.current_job().await, None);
        assert_eq!(transport.count(Method::POST, "/cancel/"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_before_submission_reports_no_job_id() {
        let transport = Arc::new(
            MockTransport::new()
                .with_submit(MockTransport::ok(json!({ "id": "job-old", "status": "IN_QUEUE" })))
                .with_statuses([MockTransport::ok(masks_output())])
                .with_upload(Outcome::HttpError {
                    status: 403,
                    body: "expired".to_string(),
                }),
        );
        let mut config = config();
        config.inline_threshold_bytes = 4;
        let controller = controller(&transport, &config);

        let first = controller
            .segment_image(Bytes::from_static(b"png"), &SegmentParams::default(), None)
            .await
            .map(|masks| JobResult::Masks { masks });
        assert_eq!(controller.report(&first).await.job_id.as_deref(), Some("job-old"));

        let second = controller
            .segment_image(Bytes::from_static(b"a larger png"), &SegmentParams::default(), None)
            .await
            .map(|masks| JobResult::Masks { masks });
        assert!(matches!(second, Err(JobError::UploadTransfer(_))));

        let report = controller.report(&second).await;
        assert!(!report.success);
        assert_eq!(report.job_id, None);
        assert!(controller.last_job().await.is_none());
        assert_eq!(transport.count(Method::POST, "/run"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_superseded_during_upload_never_submits() {
        let transport = Arc::new(MockTransport::new().with_delay(500));
        let mut config = config();
        config.inline_threshold_bytes = 4;
        config.budgets.set(JobKind::ImageSegment, PollBudget::new(1_000, 2));
        let controller = Arc::new(controller(&transport, &config));

        let first = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .segment_image(Bytes::from_static(b"a larger png"), &SegmentParams::default(), None)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let second = controller
            .segment_image(Bytes::from_static(b"png"), &SegmentParams::default(), None)
            .await
            .unwrap_err();
        assert!(second.is_polling_timeout());

        let first = first.await.unwrap().unwrap_err();
        assert!(matches!(first, JobError::Superseded { job_id: None }));
        assert_eq!(
            first.to_string(),
            "run was superseded by a newer operation before a job was submitted"
        );
        assert_eq!(controller.report(&Err(first)).await.job_id, None);
        assert_eq!(transport.count(Method::POST, "/upload"), 1);
        assert_eq!(transport.count(Method::POST, "/run"), 1);
        assert_eq!(transport.count(Method::POST, "/cancel/"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn job_submitted_after_being_superseded_is_cancelled() {
        let transport = Arc::new(
            MockTransport::new()
                .with_submit(MockTransport::ok(json!({ "id": "job-7", "status": "IN_QUEUE" })))
                .with_delay(500),
        );
        let mut config = config();
        config.budgets.set(JobKind::ImageSegment, PollBudget::new(1_000, 2));
        let controller = Arc::new(controller(&transport, &config));

        // The first submission is still in flight when the second run starts.
        let first = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .segment_video(Bytes::from_static(b"mp4"), &VideoParams::default(), None)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let second = controller
            .segment_image(Bytes::from_static(b"png"), &SegmentParams::default(), None)
            .await
            .unwrap_err();
        assert!(second.is_polling_timeout());

        let first = first.await.unwrap().unwrap_err();
        assert!(matches!(first, JobError::Superseded { job_id: Some(ref id) } if id == "job-7"));
        assert_eq!(controller.report(&Err(first)).await.job_id.as_deref(), Some("job-7"));
        assert_eq!(transport.count(Method::POST, "/run"), 2);
        assert_eq!(transport.count(Method::POST, "/cancel/"), 1);
        assert_eq!(controller.current_job().await, None);
    }
}
