//! The shared job queue.

use super::store::{QueueSnapshot, SnapshotStore};
use super::{Disposition, JobId, JobKey, JobOutcome, JobState, Lease, QueueError, TilingJob};
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default number of retries after the first failed attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 1;

/// Queue behaviour settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Failed attempts allowed before a job becomes terminally failed.
    ///
    /// A job is attempted at most `max_retries + 1` times.
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Point-in-time queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Jobs waiting to be claimed
    pub queued: usize,
    /// Jobs owned by a worker
    pub claimed: usize,
    /// Terminally failed jobs retained for inspection
    pub failed: usize,
}

/// FIFO position: creation time, then insertion order.
type Position = (DateTime<Utc>, u64);

#[derive(Debug, Default)]
struct QueueState {
    jobs: HashMap<JobId, TilingJob>,
    by_key: HashMap<JobKey, JobId>,
    queued: BTreeMap<Position, JobId>,
    failed: Vec<TilingJob>,
    /// Claimed jobs whose source was deleted; the worker is still building
    cancelled: HashMap<JobId, (Lease, JobKey)>,
    next_id: JobId,
    next_seq: u64,
    last_lease: Lease,
}

impl QueueState {
    fn from_snapshot(snapshot: QueueSnapshot) -> Self {
        let mut state = QueueState {
            next_id: snapshot.next_id,
            next_seq: snapshot.next_seq,
            last_lease: snapshot.last_lease,
            failed: snapshot.failed,
            ..Default::default()
        };

        for mut job in snapshot.active {
            if state.by_key.contains_key(&job.key) || state.jobs.contains_key(&job.id) {
                warn!(job_id = job.id, key = %job.key, "Dropping duplicate job from snapshot");
                continue;
            }
            // Claims never survive a restart
            job.state = JobState::Queued;
            state.next_id = state.next_id.max(job.id + 1);
            state.next_seq = state.next_seq.max(job.seq + 1);
            state.last_lease = state.last_lease.max(job.lease);
            state.queued.insert((job.created_at, job.seq), job.id);
            state.by_key.insert(job.key.clone(), job.id);
            state.jobs.insert(job.id, job);
        }
        state
    }

    fn snapshot(&self) -> QueueSnapshot {
        let mut active: Vec<TilingJob> = self.jobs.values().cloned().collect();
        active.sort_by_key(|j| j.seq);
        QueueSnapshot {
            version: 0,
            next_id: self.next_id,
            next_seq: self.next_seq,
            last_lease: self.last_lease,
            active,
            failed: self.failed.clone(),
        }
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Put a job back in line at its own FIFO position.
    fn push_queued(&mut self, id: JobId) {
        if let Some(job) = self.jobs.get_mut(&id) {
            job.state = JobState::Queued;
            self.queued.insert((job.created_at, job.seq), id);
        }
    }

    fn detach(&mut self, id: JobId) -> Option<TilingJob> {
        let job = self.jobs.remove(&id)?;
        self.by_key.remove(&job.key);
        self.queued.remove(&(job.created_at, job.seq));
        Some(job)
    }

    /// Keys whose container is still being written by a cancelled claim.
    fn busy_keys(&self) -> HashSet<&JobKey> {
        self.cancelled.values().map(|(_, key)| key).collect()
    }
}

/// Durable, ordered queue of tiling jobs.
///
/// All operations serialize on one mutex, so claims are exclusive: two
/// callers of [`claim_next`](Self::claim_next) never receive the same job,
/// and at most one active job exists per [`JobKey`].
///
/// The queue is an ordinary value. The hosting process constructs it and
/// hands `Arc<JobQueue>` to the pool, the lifecycle controller and the RPC
/// handler.
///
/// # Example
///
/// ```
/// use tileforge::queue::{JobOutcome, JobQueue, QueueConfig};
///
/// let queue = JobQueue::in_memory(QueueConfig::default());
/// queue.enqueue("deriv1", "/img/page1.tif").unwrap();
/// queue.enqueue("deriv1", "/img/page1.tif").unwrap();
/// assert_eq!(queue.size(), 1);
///
/// let job = queue.claim_next().unwrap();
/// queue.complete(job.id, job.lease, JobOutcome::Success).unwrap();
/// assert!(queue.is_empty());
/// ```
#[derive(Debug)]
pub struct JobQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    config: QueueConfig,
    store: Option<SnapshotStore>,
}

impl JobQueue {
    /// Create a queue that is not persisted.
    pub fn in_memory(config: QueueConfig) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            available: Condvar::new(),
            config,
            store: None,
        }
    }

    /// Open a durable queue backed by a snapshot file.
    ///
    /// Jobs that were claimed when the snapshot was written are returned to
    /// the queue.
    pub fn open(path: impl Into<PathBuf>, config: QueueConfig) -> Result<Self, QueueError> {
        let store = SnapshotStore::new(path);
        let state = match store.load()? {
            Some(snapshot) => QueueState::from_snapshot(snapshot),
            None => QueueState::default(),
        };

        info!(
            path = %store.path().display(),
            queued = state.queued.len(),
            failed = state.failed.len(),
            "Opened job queue"
        );

        Ok(Self {
            state: Mutex::new(state),
            available: Condvar::new(),
            config,
            store: Some(store),
        })
    }

    /// Queue behaviour settings.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn persist(&self, state: &QueueState) -> Result<(), QueueError> {
        match &self.store {
            Some(store) => store.save(&state.snapshot()),
            None => Ok(()),
        }
    }

    /// Record a claim so its lease is never handed out again after a restart.
    fn persist_claim(&self, state: &QueueState, job: &TilingJob) {
        if let Err(e) = self.persist(state) {
            warn!(job_id = job.id, lease = job.lease, error = %e, "Failed to persist claim");
        }
    }

    /// Request tiling for a source file.
    ///
    /// If the key already has a queued job, that job is returned unchanged.
    /// If it has a claimed job, the job is flagged to run again once the
    /// current attempt finishes, so the newest source content is tiled.
    pub fn enqueue(&self, owner_id: &str, relative_path: &str) -> Result<TilingJob, QueueError> {
        let key = JobKey::new(owner_id, relative_path)?;
        let mut state = self.state.lock();

        if let Some(&id) = state.by_key.get(&key) {
            let job = state.jobs.get_mut(&id).ok_or(QueueError::UnknownJob(id))?;
            if job.state == JobState::Claimed && !job.rerun {
                job.rerun = true;
                debug!(job_id = id, %key, "Job claimed; flagged for re-run");
            } else {
                debug!(job_id = id, %key, "Coalesced enqueue into existing job");
            }
            let job = job.clone();
            self.persist(&state)?;
            return Ok(job);
        }

        let id = state.next_id;
        state.next_id += 1;
        let seq = state.next_seq();
        let job = TilingJob {
            id,
            key: key.clone(),
            state: JobState::Queued,
            attempts: 0,
            created_at: Utc::now(),
            seq,
            last_error: None,
            rerun: false,
            lease: 0,
        };

        state.queued.insert((job.created_at, seq), id);
        state.by_key.insert(key, id);
        state.jobs.insert(id, job.clone());
        self.persist(&state)?;
        drop(state);

        self.available.notify_one();
        debug!(job_id = id, key = %job.key, "Enqueued tiling job");
        Ok(job)
    }

    /// Claim the oldest queued job, or `None` if nothing is claimable.
    ///
    /// A queued job whose key is still being written by a cancelled claim
    /// is skipped until that worker reports back.
    pub fn claim_next(&self) -> Option<TilingJob> {
        let mut state = self.state.lock();
        let job = Self::claim_locked(&mut state)?;
        self.persist_claim(&state, &job);
        Some(job)
    }

    /// Like [`claim_next`](Self::claim_next), but waits up to `timeout` for
    /// a job to become available.
    ///
    /// Returns `None` without claiming as soon as `stop` is observed set,
    /// including after being woken by [`wake_all`](Self::wake_all).
    pub fn claim_next_timeout(&self, timeout: Duration, stop: &AtomicBool) -> Option<TilingJob> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        let mut timed_out = false;
        loop {
            if stop.load(Ordering::SeqCst) {
                return None;
            }
            if let Some(job) = Self::claim_locked(&mut state) {
                self.persist_claim(&state, &job);
                return Some(job);
            }
            if timed_out {
                return None;
            }
            timed_out = self.available.wait_until(&mut state, deadline).timed_out();
        }
    }

    fn claim_locked(state: &mut QueueState) -> Option<TilingJob> {
        let position = {
            let busy = state.busy_keys();
            state
                .queued
                .iter()
                .find(|(_, id)| {
                    state
                        .jobs
                        .get(id)
                        .is_some_and(|job| !busy.contains(&job.key))
                })
                .map(|(pos, _)| *pos)
        }?;

        let id = state.queued.remove(&position)?;
        state.last_lease += 1;
        let lease = state.last_lease;
        let job = state.jobs.get_mut(&id)?;
        job.state = JobState::Claimed;
        job.lease = lease;
        debug!(job_id = id, lease, key = %job.key, "Claimed tiling job");
        Some(job.clone())
    }

    /// Record the outcome of a claimed job.
    ///
    /// `lease` must be the lease of the current claim. A report for any
    /// earlier claim changes nothing and returns [`Disposition::Stale`], so
    /// delivering the same report twice is harmless.
    pub fn complete(
        &self,
        id: JobId,
        lease: Lease,
        outcome: JobOutcome,
    ) -> Result<Disposition, QueueError> {
        let mut state = self.state.lock();

        if state.cancelled.get(&id).is_some_and(|(held, _)| *held == lease) {
            if let Some((_, key)) = state.cancelled.remove(&id) {
                drop(state);
                // The key may have a queued job that waited for this worker
                self.available.notify_all();
                debug!(job_id = id, %key, "Completed job was cancelled");
                return Ok(Disposition::Cancelled(key));
            }
        }

        let current = state
            .jobs
            .get(&id)
            .map(|job| job.state == JobState::Claimed && job.lease == lease);
        match current {
            Some(true) => {}
            None if id >= state.next_id => return Err(QueueError::UnknownJob(id)),
            _ => {
                debug!(job_id = id, lease, "Ignoring report for a superseded claim");
                return Ok(Disposition::Stale);
            }
        }

        let max_retries = self.config.max_retries;
        let job = state.jobs.get_mut(&id).ok_or(QueueError::UnknownJob(id))?;

        let disposition = match outcome {
            JobOutcome::Success if job.rerun => {
                job.rerun = false;
                job.attempts = 0;
                job.last_error = None;
                job.created_at = Utc::now();
                let seq = state.next_seq();
                if let Some(job) = state.jobs.get_mut(&id) {
                    job.seq = seq;
                }
                state.push_queued(id);
                Disposition::Rerun
            }
            JobOutcome::Success => {
                if let Some(mut job) = state.detach(id) {
                    job.state = JobState::Succeeded;
                    info!(job_id = id, key = %job.key, "Tiling job succeeded");
                }
                Disposition::Removed
            }
            JobOutcome::Failure(message) => {
                let rerun = std::mem::take(&mut job.rerun);
                job.attempts = if rerun { 0 } else { job.attempts + 1 };
                job.last_error = Some(message);
                let attempts = job.attempts;

                if rerun || attempts <= max_retries {
                    state.push_queued(id);
                    warn!(job_id = id, attempts, "Tiling job failed; requeued");
                    Disposition::Requeued { attempts }
                } else {
                    if let Some(mut job) = state.detach(id) {
                        job.state = JobState::Failed;
                        warn!(
                            job_id = id,
                            key = %job.key,
                            attempts,
                            error = job.last_error.as_deref().unwrap_or_default(),
                            "Tiling job failed permanently"
                        );
                        state.failed.push(job);
                    }
                    Disposition::Failed { attempts }
                }
            }
        };

        self.persist(&state)?;
        drop(state);
        if matches!(disposition, Disposition::Rerun | Disposition::Requeued { .. }) {
            self.available.notify_one();
        }
        Ok(disposition)
    }

    /// Return a claimed job to the queue without counting an attempt.
    ///
    /// Returns `false` if `lease` is not the current claim, for example
    /// because the source was deleted meanwhile.
    pub fn release(&self, id: JobId, lease: Lease) -> Result<bool, QueueError> {
        let mut state = self.state.lock();
        if state.cancelled.get(&id).is_some_and(|(held, _)| *held == lease) {
            state.cancelled.remove(&id);
            drop(state);
            self.available.notify_all();
            return Ok(false);
        }

        let current = state
            .jobs
            .get(&id)
            .is_some_and(|job| job.state == JobState::Claimed && job.lease == lease);
        if !current {
            return Ok(false);
        }
        state.push_queued(id);
        self.persist(&state)?;
        drop(state);

        self.available.notify_one();
        debug!(job_id = id, "Released claimed job");
        Ok(true)
    }

    /// Drop the active job for a key, if any.
    ///
    /// A claimed job keeps running; its eventual completion reports
    /// [`Disposition::Cancelled`].
    pub fn remove(&self, owner_id: &str, relative_path: &str) -> Result<bool, QueueError> {
        let key = JobKey::new(owner_id, relative_path)?;
        let mut state = self.state.lock();
        let Some(&id) = state.by_key.get(&key) else {
            return Ok(false);
        };
        if let Some(job) = state.detach(id) {
            if job.state == JobState::Claimed {
                state.cancelled.insert(id, (job.lease, job.key));
            }
        }
        self.persist(&state)?;
        debug!(job_id = id, %key, "Removed tiling job");
        Ok(true)
    }

    /// Drop every active job of an owner. Returns how many were removed.
    pub fn remove_owner(&self, owner_id: &str) -> Result<usize, QueueError> {
        let mut state = self.state.lock();
        let ids: Vec<JobId> = state
            .jobs
            .values()
            .filter(|j| j.key.owner_id == owner_id)
            .map(|j| j.id)
            .collect();

        for &id in &ids {
            if let Some(job) = state.detach(id) {
                if job.state == JobState::Claimed {
                    state.cancelled.insert(id, (job.lease, job.key));
                }
            }
        }
        if !ids.is_empty() {
            self.persist(&state)?;
        }
        Ok(ids.len())
    }

    /// Active job for a key, if any.
    pub fn find(&self, owner_id: &str, relative_path: &str) -> Option<TilingJob> {
        let key = JobKey::new(owner_id, relative_path).ok()?;
        let state = self.state.lock();
        let id = state.by_key.get(&key)?;
        state.jobs.get(id).cloned()
    }

    /// Number of queued and claimed jobs.
    pub fn size(&self) -> usize {
        self.state.lock().jobs.len()
    }

    /// Whether no job is queued or claimed.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Current counters.
    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            queued: state.queued.len(),
            claimed: state.jobs.len() - state.queued.len(),
            failed: state.failed.len(),
        }
    }

    /// Terminally failed jobs, oldest first.
    pub fn failed_jobs(&self) -> Vec<TilingJob> {
        self.state.lock().failed.clone()
    }

    /// Forget terminally failed jobs.
    pub fn clear_failed(&self) -> Result<usize, QueueError> {
        let mut state = self.state.lock();
        let count = state.failed.len();
        state.failed.clear();
        self.persist(&state)?;
        Ok(count)
    }

    /// Wake every thread blocked in [`claim_next_timeout`](Self::claim_next_timeout).
    pub fn wake_all(&self) {
        self.available.notify_all();
    }
}
