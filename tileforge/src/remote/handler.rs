//! Coordinator side of the remote protocol.

use super::protocol::{ClaimResponse, CompletionAck, CompletionReport, JobDescriptor};
use crate::queue::{Disposition, JobOutcome, JobQueue, QueueError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors answering a remote request.
#[derive(Debug, Error)]
pub enum RpcError {
    /// No such method
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// The request body could not be decoded
    #[error("Malformed request: {0}")]
    Malformed(String),

    /// The queue refused the operation
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Serves `claim` and `complete` requests from remote workers against the
/// coordinator's [`JobQueue`].
///
/// Embedders mount [`handle`](Self::handle) on whatever server they run.
pub struct RpcHandler {
    queue: Arc<JobQueue>,
    end_of_work: bool,
}

impl RpcHandler {
    /// Create a handler for `queue`.
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self {
            queue,
            end_of_work: false,
        }
    }

    /// Answer claims on an empty queue with the end-of-work sentinel
    /// instead of "no job", telling workers to exit.
    pub fn with_end_of_work_sentinel(mut self, enabled: bool) -> Self {
        self.end_of_work = enabled;
        self
    }

    /// Dispatch a raw JSON request.
    pub fn handle(&self, method: &str, body: &[u8]) -> Result<Vec<u8>, RpcError> {
        let encoded = match method {
            "claim" => serde_json::to_vec(&self.claim()),
            "complete" => {
                let report: CompletionReport = serde_json::from_slice(body)
                    .map_err(|e| RpcError::Malformed(e.to_string()))?;
                serde_json::to_vec(&self.complete(&report)?)
            }
            other => return Err(RpcError::UnknownMethod(other.to_string())),
        };
        encoded.map_err(|e| RpcError::Malformed(e.to_string()))
    }

    /// Claim the next job for a remote worker.
    pub fn claim(&self) -> ClaimResponse {
        match self.queue.claim_next() {
            Some(job) => {
                debug!(job_id = job.id, key = %job.key, "Job claimed remotely");
                ClaimResponse {
                    job: Some(JobDescriptor::from(&job)),
                }
            }
            None if self.end_of_work => ClaimResponse {
                job: Some(JobDescriptor::end_of_work()),
            },
            None => ClaimResponse::default(),
        }
    }

    /// Record a remote completion.
    pub fn complete(&self, report: &CompletionReport) -> Result<CompletionAck, RpcError> {
        let outcome = JobOutcome::from(&report.outcome);
        let disposition = self.queue.complete(report.job_id, report.lease, outcome)?;
        if disposition == Disposition::Stale {
            warn!(
                job_id = report.job_id,
                lease = report.lease,
                "Remote completion ignored; claim superseded"
            );
        } else {
            info!(job_id = report.job_id, ?disposition, "Remote completion recorded");
        }
        Ok(CompletionAck {
            ack: true,
            cancelled: matches!(disposition, Disposition::Cancelled(_)),
        })
    }
}
