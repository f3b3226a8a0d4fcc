use crate::controller::JobLease;
use crate::retry::{self, Step};
use crate::transport::{Outcome, Transport};
use crate::types::{emit, JobError, JobStatus, PollBudget, ProgressEvent, ProgressSink, Result};
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// Polls `GET /status/{id}` at a fixed interval until the job reaches a
/// terminal status or the attempt budget is spent.
///
/// A failed status check (network error or non-2xx) uses up an attempt but
/// does not end polling.
pub struct StatusPoller {
    transport: Arc<dyn Transport>,
}

impl StatusPoller {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Returns the service-provided `output` of a succeeded job.
    pub async fn poll(
        &self,
        job_id: &str,
        budget: &PollBudget,
        lease: &JobLease,
        progress: Option<&ProgressSink>,
    ) -> Result<Value> {
        let path = format!("/status/{}", job_id);
        let path = path.as_str();

        let outcome = retry::fixed_interval(budget, move |attempt| async move {
            if !lease.is_current().await {
                info!("Job {} was superseded, stopping status checks", job_id);
                return Step::Done(Err(JobError::Superseded {
                    job_id: Some(job_id.to_string()),
                }));
            }

            match self.transport.send(Method::GET, path, None).await {
                Outcome::Ok { body, .. } => self.interpret(job_id, body, attempt, budget, lease, progress).await,
                Outcome::HttpError { status, body } => {
                    warn!(
                        "Status check {}/{} for job {} failed with HTTP {}: {}",
                        attempt, budget.max_attempts, job_id, status, body
                    );
                    Step::Retry
                }
                Outcome::NetworkError(message) => {
                    warn!(
                        "Status check {}/{} for job {} failed: {}",
                        attempt, budget.max_attempts, job_id, message
                    );
                    Step::Retry
                }
            }
        })
        .await;

        outcome.unwrap_or_else(|| {
            warn!("Giving up on job {} after {} status checks", job_id, budget.max_attempts);
            Err(JobError::PollingTimeout {
                job_id: job_id.to_string(),
                attempts: budget.max_attempts,
            })
        })
    }

    async fn interpret(
        &self,
        job_id: &str,
        body: Value,
        attempt: u32,
        budget: &PollBudget,
        lease: &JobLease,
        progress: Option<&ProgressSink>,
    ) -> Step<Result<Value>> {
        let response: StatusResponse = match serde_json::from_value(body) {
            Ok(response) => response,
            Err(e) => {
                warn!("Unreadable status for job {} on check {}: {}", job_id, attempt, e);
                return Step::Retry;
            }
        };

        let status = JobStatus::parse(&response.status);
        lease.record_status(&status).await;
        emit(
            progress,
            ProgressEvent::Status {
                status: response.status.clone(),
                attempt,
                max_attempts: budget.max_attempts,
            },
        );

        match status {
            JobStatus::Succeeded => {
                info!("Job {} succeeded after {} status checks", job_id, attempt);
                Step::Done(succeeded_output(job_id, response.output))
            }
            JobStatus::Failed => {
                let message = response
                    .error
                    .as_ref()
                    .map(error_text)
                    .unwrap_or_else(|| "job failed on the server".to_string());
                Step::Done(Err(JobError::RemoteJobFailure {
                    status: JobStatus::Failed,
                    message,
                }))
            }
            JobStatus::Cancelled => Step::Done(Err(JobError::RemoteJobFailure {
                status: JobStatus::Cancelled,
                message: "job was cancelled".to_string(),
            })),
            JobStatus::TimedOut => Step::Done(Err(JobError::RemoteJobFailure {
                status: JobStatus::TimedOut,
                message: "job timed out on the server".to_string(),
            })),
            JobStatus::Queued | JobStatus::Running => {
                debug!("Job {} is {} ({}/{})", job_id, status, attempt, budget.max_attempts);
                Step::Retry
            }
            JobStatus::Unknown(raw) => {
                warn!("Job {} reported unrecognised status '{}', still polling", job_id, raw);
                Step::Retry
            }
        }
    }
}

/// Workers report handler errors as `{"error": ...}` inside a completed job.
fn succeeded_output(job_id: &str, output: Option<Value>) -> Result<Value> {
    let output = output.ok_or_else(|| JobError::MalformedResult(format!("job {} succeeded without output", job_id)))?;

    if let Some(error) = output.get("error").filter(|error| !error.is_null()) {
        return Err(JobError::RemoteJobFailure {
            status: JobStatus::Failed,
            message: error_text(error),
        });
    }
    Ok(output)
}

fn error_text(error: &Value) -> String {
    match error {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
