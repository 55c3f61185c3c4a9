//! Wire messages exchanged between the coordinator and remote workers.
//!
//! All messages are JSON. A claim returns either a job, no job (the queue is
//! drained) or the end-of-work sentinel, a job with an empty owner.
//!
//! A job carries the lease of its claim and the worker echoes it in the
//! completion report, so a report re-sent after a lost response can never
//! be applied to a later claim of the same job.

use crate::pyramid::TilePyramidDescriptor;
use crate::queue::{JobId, JobOutcome, Lease, TilingJob};
use serde::{Deserialize, Serialize};

/// Job handed to a remote worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    pub job_id: JobId,
    #[serde(default)]
    pub lease: Lease,
    pub owner_id: String,
    pub relative_path: String,
}

impl JobDescriptor {
    /// The sentinel telling a worker process to shut down.
    pub fn end_of_work() -> Self {
        Self {
            job_id: 0,
            lease: 0,
            owner_id: String::new(),
            relative_path: String::new(),
        }
    }

    /// Whether this is the end-of-work sentinel.
    pub fn is_end_of_work(&self) -> bool {
        self.owner_id.is_empty()
    }
}

impl From<&TilingJob> for JobDescriptor {
    fn from(job: &TilingJob) -> Self {
        Self {
            job_id: job.id,
            lease: job.lease,
            owner_id: job.owner_id().to_string(),
            relative_path: job.relative_path().to_string(),
        }
    }
}

/// Response to a claim request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClaimResponse {
    #[serde(default)]
    pub job: Option<JobDescriptor>,
}

/// Result of a remote attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ReportedOutcome {
    /// The pyramid is on disk
    #[serde(rename_all = "camelCase")]
    Success {
        width: u32,
        height: u32,
        zoom_level: u32,
        tile_count: u64,
    },
    /// The attempt failed
    Failure { kind: String, message: String },
}

impl ReportedOutcome {
    /// Success carrying the metrics of `descriptor`.
    pub fn success(descriptor: &TilePyramidDescriptor) -> Self {
        ReportedOutcome::Success {
            width: descriptor.width,
            height: descriptor.height,
            zoom_level: descriptor.zoom_level,
            tile_count: descriptor.tile_count,
        }
    }

    /// Failure with a category and message.
    pub fn failure(kind: impl Into<String>, message: impl Into<String>) -> Self {
        ReportedOutcome::Failure {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl From<&ReportedOutcome> for JobOutcome {
    fn from(outcome: &ReportedOutcome) -> Self {
        match outcome {
            ReportedOutcome::Success { .. } => JobOutcome::Success,
            ReportedOutcome::Failure { kind, message } => {
                JobOutcome::Failure(format!("{}: {}", kind, message))
            }
        }
    }
}

/// Completion report sent after an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionReport {
    pub job_id: JobId,
    /// Lease from the claimed [`JobDescriptor`]
    pub lease: Lease,
    pub outcome: ReportedOutcome,
}

impl CompletionReport {
    /// Report `outcome` for the claim described by `job`.
    pub fn new(job: &JobDescriptor, outcome: ReportedOutcome) -> Self {
        Self {
            job_id: job.job_id,
            lease: job.lease,
            outcome,
        }
    }
}

/// Coordinator's acknowledgement of a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompletionAck {
    pub ack: bool,
    /// The source was deleted meanwhile; the worker must discard its output
    #[serde(default)]
    pub cancelled: bool,
}
