//! Exclusive ownership of one claimed job.

use super::{Disposition, JobOutcome, JobQueue, QueueError, TilingJob};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// One in-progress tiling operation.
///
/// A slot owns the job it claimed until [`finish`](Self::finish) reports an
/// outcome. A slot dropped without finishing (worker panic, shutdown) hands
/// the job back to the queue so another worker can pick it up.
#[derive(Debug)]
pub struct WorkerSlot {
    queue: Arc<JobQueue>,
    job: TilingJob,
    finished: bool,
}

impl WorkerSlot {
    /// Claim the next job, if any.
    pub fn claim(queue: &Arc<JobQueue>) -> Option<Self> {
        queue.claim_next().map(|job| Self::new(queue, job))
    }

    /// Claim the next job, waiting up to `timeout` for one to appear.
    /// Gives up without claiming once `stop` is set.
    pub fn claim_timeout(
        queue: &Arc<JobQueue>,
        timeout: Duration,
        stop: &AtomicBool,
    ) -> Option<Self> {
        queue
            .claim_next_timeout(timeout, stop)
            .map(|job| Self::new(queue, job))
    }

    fn new(queue: &Arc<JobQueue>, job: TilingJob) -> Self {
        Self {
            queue: Arc::clone(queue),
            job,
            finished: false,
        }
    }

    /// The claimed job.
    pub fn job(&self) -> &TilingJob {
        &self.job
    }

    /// Report the outcome and give up ownership.
    pub fn finish(mut self, outcome: JobOutcome) -> Result<Disposition, QueueError> {
        self.finished = true;
        self.queue.complete(self.job.id, self.job.lease, outcome)
    }
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        match self.queue.release(self.job.id, self.job.lease) {
            Ok(true) => warn!(job_id = self.job.id, "Worker slot dropped; job released"),
            Ok(false) => {}
            Err(e) => warn!(job_id = self.job.id, error = %e, "Failed to release job"),
        }
    }
}
