//! Durable tiling job queue.
//!
//! The queue is the single shared mutable structure of the pipeline. Local
//! worker threads use it directly; remote workers reach it through
//! [`crate::remote::RpcHandler`].
//!
//! # Job lifecycle
//!
//! ```text
//!   enqueue ──► Queued ──claim──► Claimed ──ok──► Succeeded (removed)
//!                 ▲                  │
//!                 └──fail, retries───┤
//!                    remaining       └──fail, budget spent──► Failed
//! ```
//!
//! Every claim carries a fresh [`Lease`]. Completions and releases must
//! present the lease of the current claim; reports for an earlier claim
//! (a retried request, a worker that outlived a restart) are ignored.

mod error;
mod job;
mod job_queue;
mod slot;
mod store;

pub use error::QueueError;
pub use job::{Disposition, JobId, JobKey, JobOutcome, JobState, Lease, TilingJob};
pub use job_queue::{JobQueue, QueueConfig, QueueStats, DEFAULT_MAX_RETRIES};
pub use slot::WorkerSlot;
pub use store::{QueueSnapshot, SnapshotStore};
