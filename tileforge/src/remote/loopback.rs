//! In-process transport that goes through the JSON wire format.

use super::handler::{RpcError, RpcHandler};
use super::protocol::{ClaimResponse, CompletionAck, CompletionReport, JobDescriptor};
use super::transport::{RemoteQueue, TransportError};
use std::sync::Arc;

/// [`RemoteQueue`] that encodes every request and response as JSON and
/// dispatches it to an [`RpcHandler`] in the same process.
///
/// Used to run remote workers against a local coordinator without a
/// server, and in tests.
pub struct LoopbackQueue {
    handler: Arc<RpcHandler>,
}

impl LoopbackQueue {
    /// Wrap `handler`.
    pub fn new(handler: Arc<RpcHandler>) -> Self {
        Self { handler }
    }

    fn call(&self, method: &str, body: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.handler.handle(method, body).map_err(|e| match e {
            RpcError::Queue(e) => TransportError::Rejected(e.to_string()),
            other => TransportError::InvalidResponse(other.to_string()),
        })
    }
}

impl RemoteQueue for LoopbackQueue {
    fn claim_next(&self) -> Result<Option<JobDescriptor>, TransportError> {
        let bytes = self.call("claim", b"{}")?;
        let response: ClaimResponse = serde_json::from_slice(&bytes)
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        Ok(response.job)
    }

    fn complete(&self, report: &CompletionReport) -> Result<CompletionAck, TransportError> {
        let body = serde_json::to_vec(report)
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        let bytes = self.call("complete", &body)?;
        serde_json::from_slice(&bytes).map_err(|e| TransportError::InvalidResponse(e.to_string()))
    }
}
