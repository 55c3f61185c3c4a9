//! Transport between a remote worker and the coordinator's queue.

use super::protocol::{ClaimResponse, CompletionAck, CompletionReport, JobDescriptor};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors talking to the coordinator.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request could not be delivered
    #[error("HTTP error: {0}")]
    Http(String),

    /// The coordinator answered with something we cannot read
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The coordinator rejected the request
    #[error("Rejected by coordinator: {0}")]
    Rejected(String),
}

/// The queue operations a remote worker needs.
pub trait RemoteQueue: Send + Sync {
    /// Claim the next job. `Ok(None)` means the queue is drained.
    fn claim_next(&self) -> Result<Option<JobDescriptor>, TransportError>;

    /// Report the outcome of a claimed job.
    fn complete(&self, report: &CompletionReport) -> Result<CompletionAck, TransportError>;
}

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of delivery attempts per request.
pub const DEFAULT_ATTEMPTS: u32 = 3;

const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(500);

/// [`RemoteQueue`] over HTTP: `POST {endpoint}/claim` and
/// `POST {endpoint}/complete`, both with JSON bodies.
pub struct HttpRemoteQueue {
    client: reqwest::blocking::Client,
    endpoint: String,
    attempts: u32,
    retry_delay: Duration,
}

impl HttpRemoteQueue {
    /// Create a client for the coordinator at `endpoint`.
    pub fn new(endpoint: &str) -> Result<Self, TransportError> {
        Self::with_timeout(endpoint, DEFAULT_TIMEOUT)
    }

    /// Create a client with a custom request timeout.
    pub fn with_timeout(endpoint: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tileforge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            attempts: DEFAULT_ATTEMPTS,
            retry_delay: INITIAL_RETRY_DELAY,
        })
    }

    /// Override the number of delivery attempts (at least one).
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Base URL of the coordinator.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.endpoint, method)
    }

    /// POST `body` to `{endpoint}/{method}`, retrying transport failures.
    ///
    /// Rejections (4xx) are not retried.
    fn post(&self, method: &str, body: &str) -> Result<Vec<u8>, TransportError> {
        let url = self.url(method);
        let mut delay = self.retry_delay;
        let mut attempt = 1;
        loop {
            match self.post_once(&url, body) {
                Ok(bytes) => return Ok(bytes),
                Err(TransportError::Http(msg)) if attempt < self.attempts => {
                    warn!(url = %url, attempt, error = %msg, "Request failed; retrying");
                    thread::sleep(delay);
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn post_once(&self, url: &str, body: &str) -> Result<Vec<u8>, TransportError> {
        debug!(url, "POST");
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .map_err(|e| TransportError::Http(format!("Request failed: {}", e)))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(TransportError::Rejected(format!("HTTP {} from {}", status, url)));
        }
        if !status.is_success() {
            return Err(TransportError::Http(format!("HTTP {} from {}", status, url)));
        }

        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| TransportError::Http(format!("Failed to read response: {}", e)))
    }
}

impl RemoteQueue for HttpRemoteQueue {
    fn claim_next(&self) -> Result<Option<JobDescriptor>, TransportError> {
        let bytes = self.post("claim", "{}")?;
        let response: ClaimResponse = serde_json::from_slice(&bytes)
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        Ok(response.job)
    }

    fn complete(&self, report: &CompletionReport) -> Result<CompletionAck, TransportError> {
        let body = serde_json::to_string(report)
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        let bytes = self.post("complete", &body)?;
        serde_json::from_slice(&bytes).map_err(|e| TransportError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_trailing_slash_is_trimmed() {
        let remote = HttpRemoteQueue::new("http://coordinator:8080/tiles/").unwrap();
        assert_eq!(remote.endpoint(), "http://coordinator:8080/tiles");
        assert_eq!(remote.url("claim"), "http://coordinator:8080/tiles/claim");
    }

    #[test]
    fn test_attempts_at_least_one() {
        let remote = HttpRemoteQueue::new("http://localhost").unwrap().with_attempts(0);
        assert_eq!(remote.attempts, 1);
    }

    #[test]
    fn test_unreachable_endpoint_is_http_error() {
        // Port 9 (discard) on localhost is closed in test environments
        let remote = HttpRemoteQueue::with_timeout("http://127.0.0.1:9", Duration::from_secs(2))
            .unwrap()
            .with_attempts(1);
        assert!(matches!(remote.claim_next(), Err(TransportError::Http(_))));
    }
}
