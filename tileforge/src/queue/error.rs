//! Queue error types.

use super::JobId;
use crate::layout::LayoutError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by [`JobQueue`](super::JobQueue) operations.
///
/// Losing a claim race is not an error: `claim_next` simply returns `None`.
#[derive(Debug, Error)]
pub enum QueueError {
    /// No active job has this id
    #[error("Unknown job {0}")]
    UnknownJob(JobId),

    /// The job key is malformed
    #[error("Invalid job key: {0}")]
    InvalidKey(#[from] LayoutError),

    /// The queue snapshot could not be read or written
    #[error("Queue persistence failed for '{}': {reason}", path.display())]
    Persistence { path: PathBuf, reason: String },
}
