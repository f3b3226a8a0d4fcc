use crate::transport::{Outcome, Transport};
use crate::types::{Job, JobError, JobRequest, JobStatus, Result};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

/// Sends a job request to `POST /run`. Submissions are never retried.
pub struct JobSubmitter {
    transport: Arc<dyn Transport>,
}

impl JobSubmitter {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub async fn submit(&self, request: &JobRequest) -> Result<Job> {
        let envelope = json!({ "input": request.to_input() });

        let body = match self.transport.send(Method::POST, "/run", Some(envelope)).await {
            Outcome::Ok { body, .. } => body,
            Outcome::HttpError { status, body } => {
                return Err(JobError::Submission(format!("HTTP {}: {}", status, body)));
            }
            Outcome::NetworkError(message) => return Err(JobError::Submission(message)),
        };

        let id = body
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| JobError::Submission(format!("response has no job id: {}", body)))?;

        // A freshly accepted job is queued from our point of view until the service says otherwise.
        let status = body
            .get("status")
            .and_then(Value::as_str)
            .map(JobStatus::parse)
            .unwrap_or(JobStatus::Queued);

        info!("Submitted {} job {} ({})", request.kind(), id, status);
        Ok(Job::new(id.to_string(), request.kind(), status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use crate::types::{JobKind, Payload};
    use serde_json::Map;

    fn request() -> JobRequest {
        let mut parameters = Map::new();
        parameters.insert("max_masks".to_string(), json!(3));
        JobRequest::new(JobKind::ImageSegment, Payload::Inline("AAAA".to_string()), parameters)
    }

    #[tokio::test]
    async fn wraps_input_and_extracts_id() {
        let transport = Arc::new(MockTransport::new().with_submit(MockTransport::ok(json!({
            "id": "abc-123",
            "status": "IN_PROGRESS"
        }))));
        let submitter = JobSubmitter::new(transport.clone());

        let job = submitter.submit(&request()).await.unwrap();
        assert_eq!(job.id, "abc-123");
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.kind, JobKind::ImageSegment);

        let input = transport.last_submitted_input().unwrap();
        assert_eq!(input["image"], "AAAA");
        assert_eq!(input["max_masks"], 3);
    }

    #[tokio::test]
    async fn missing_id_is_a_submission_error() {
        let transport = Arc::new(MockTransport::new().with_submit(MockTransport::ok(json!({ "status": "IN_QUEUE" }))));
        let submitter = JobSubmitter::new(transport.clone());

        let err = submitter.submit(&request()).await.unwrap_err();
        assert!(matches!(err, JobError::Submission(_)));
        assert_eq!(transport.count(Method::POST, "/run"), 1);
    }

    #[tokio::test]
    async fn transport_failures_are_not_retried() {
        let transport = Arc::new(MockTransport::new().with_submit(Outcome::HttpError {
            status: 500,
            body: "boom".to_string(),
        }));
        let submitter = JobSubmitter::new(transport.clone());

        let err = submitter.submit(&request()).await.unwrap_err();
        assert_eq!(err.to_string(), "job submission failed: HTTP 500: boom");
        assert_eq!(transport.count(Method::POST, "/run"), 1);
    }
}
