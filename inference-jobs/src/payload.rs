use crate::transport::{Outcome, Transport};
use crate::types::{JobError, JobKind, Payload, ProgressSink, Result, UploadTicket};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use reqwest::Method;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

/// Chooses between embedding content in the job input and the
/// object-storage detour, based on content size.
pub struct PayloadStrategy {
    transport: Arc<dyn Transport>,
    inline_threshold_bytes: u64,
    ticket_path: String,
}

impl PayloadStrategy {
    pub fn new(transport: Arc<dyn Transport>, inline_threshold_bytes: u64, ticket_path: impl Into<String>) -> Self {
        Self {
            transport,
            inline_threshold_bytes,
            ticket_path: ticket_path.into(),
        }
    }

    pub fn inline_threshold_bytes(&self) -> u64 {
        self.inline_threshold_bytes
    }

    /// Produce the payload for one job. Oversized content is uploaded first;
    /// on any upload failure no payload (and so no job) is produced.
    pub async fn resolve(&self, kind: JobKind, content: Bytes, progress: Option<&ProgressSink>) -> Result<Payload> {
        let size = content.len() as u64;
        if size <= self.inline_threshold_bytes {
            debug!("Inlining {} bytes of {} content", size, kind);
            return Ok(Payload::Inline(BASE64_STANDARD.encode(&content)));
        }

        info!(
            "Content of {} bytes exceeds inline threshold of {} bytes, uploading out of band",
            size, self.inline_threshold_bytes
        );
        let ticket = self.request_ticket(kind, size).await?;
        self.transfer(kind, &ticket, content, progress).await?;
        info!("Upload complete, referencing key {}", ticket.key);
        Ok(Payload::Reference(ticket.key))
    }

    async fn request_ticket(&self, kind: JobKind, size: u64) -> Result<UploadTicket> {
        let body = json!({
            "kind": kind.as_str(),
            "content_type": kind.content_type(),
            "size": size,
        });

        match self.transport.send(Method::POST, &self.ticket_path, Some(body)).await {
            Outcome::Ok { body, .. } => {
                let ticket: UploadTicket = serde_json::from_value(body)
                    .map_err(|e| JobError::UploadTicket(format!("malformed ticket response: {}", e)))?;
                if ticket.upload_url.is_empty() || ticket.key.is_empty() {
                    return Err(JobError::UploadTicket("ticket is missing its upload URL or key".to_string()));
                }
                Ok(ticket)
            }
            Outcome::HttpError { status, body } => Err(JobError::UploadTicket(format!("HTTP {}: {}", status, body))),
            Outcome::NetworkError(message) => Err(JobError::UploadTicket(message)),
        }
    }

    async fn transfer(
        &self,
        kind: JobKind,
        ticket: &UploadTicket,
        content: Bytes,
        progress: Option<&ProgressSink>,
    ) -> Result<()> {
        match self
            .transport
            .put_raw(&ticket.upload_url, content, kind.content_type(), progress)
            .await
        {
            Outcome::Ok { .. } => Ok(()),
            Outcome::HttpError { status, body } => Err(JobError::UploadTransfer(format!("HTTP {}: {}", status, body))),
            Outcome::NetworkError(message) => Err(JobError::UploadTransfer(message)),
        }
    }
}
