//! Job types.

use super::QueueError;
use crate::layout::{key_components, validate_owner};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique job identifier, assigned by the queue.
pub type JobId = u64;

/// Identifies one claim of a job. Every claim gets a fresh lease, so a
/// report from an earlier claim can be told apart from the current one.
pub type Lease = u64;

/// Identity of a tiling job: the owning collection and the source path.
///
/// The relative path is normalized to `/`-separated form with a single
/// leading slash, so `img\page.tif` and `/img/page.tif` are the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    /// Owning collection (derivative) id
    pub owner_id: String,
    /// Source file path within the owner
    pub relative_path: String,
}

impl JobKey {
    /// Create a validated, normalized key.
    ///
    /// # Example
    ///
    /// ```
    /// use tileforge::queue::JobKey;
    ///
    /// let key = JobKey::new("deriv1", "img\\page1.tif").unwrap();
    /// assert_eq!(key.relative_path, "/img/page1.tif");
    /// ```
    pub fn new(owner_id: &str, relative_path: &str) -> Result<Self, QueueError> {
        validate_owner(owner_id)?;
        let parts = key_components(relative_path)?;
        Ok(Self {
            owner_id: owner_id.to_string(),
            relative_path: format!("/{}", parts.join("/")),
        })
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner_id, self.relative_path)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    /// Waiting to be claimed
    Queued,
    /// Owned by exactly one worker
    Claimed,
    /// Pyramid generated
    Succeeded,
    /// Retry budget exhausted
    Failed,
}

impl JobState {
    /// Whether the job still counts toward the queue size.
    pub fn is_active(self) -> bool {
        matches!(self, JobState::Queued | JobState::Claimed)
    }
}

/// A tiling job as held by the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TilingJob {
    /// Queue-assigned id
    pub id: JobId,
    /// Owner and source path
    pub key: JobKey,
    /// Current state
    pub state: JobState,
    /// Failed attempts so far
    pub attempts: u32,
    /// When the job (or its latest re-run) was requested
    pub created_at: DateTime<Utc>,
    /// Insertion sequence, breaks `created_at` ties
    pub seq: u64,
    /// Message of the most recent failure
    #[serde(default)]
    pub last_error: Option<String>,
    /// A newer request arrived while the job was claimed
    #[serde(default)]
    pub rerun: bool,
    /// Lease of the most recent claim; 0 if never claimed
    #[serde(default)]
    pub lease: Lease,
}

impl TilingJob {
    /// Owner id shortcut.
    pub fn owner_id(&self) -> &str {
        &self.key.owner_id
    }

    /// Relative path shortcut.
    pub fn relative_path(&self) -> &str {
        &self.key.relative_path
    }
}

/// Result of one attempt, reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The pyramid was written
    Success,
    /// The attempt failed with the given message
    Failure(String),
}

/// What the queue did with a completed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Succeeded and removed
    Removed,
    /// Succeeded, but a newer request arrived meanwhile: queued again
    Rerun,
    /// Failed and queued for another attempt
    Requeued {
        /// Failed attempts so far
        attempts: u32,
    },
    /// Failed for the last time; kept in the failed list
    Failed {
        /// Failed attempts in total
        attempts: u32,
    },
    /// The source was deleted while the job was claimed; its output must go
    Cancelled(JobKey),
    /// The report belongs to a claim that is no longer current and was
    /// ignored
    Stale,
}
