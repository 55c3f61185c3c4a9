//! In-process worker pool.
//!
//! # State machine
//!
//! ```text
//!            start()              prepare_shutdown()
//!  Stopped ──────────► Running ───────────────────► Draining
//!     ▲                                                │
//!     └──────────────── await_stopped() ◄──────────────┘
//! ```
//!
//! Each worker is a named OS thread running a blocking
//! claim → build → complete loop. Draining stops new claims; a build that
//! is already running always finishes.

use crate::queue::{Disposition, JobOutcome, JobQueue, WorkerSlot};
use crate::worker::TileJobRunner;
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a [`LocalWorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// No worker threads exist
    Stopped,
    /// Workers are claiming jobs
    Running,
    /// Workers finish in-flight jobs and exit
    Draining,
}

/// Pool errors.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A worker thread could not be created
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),

    /// `await_stopped` was called without `prepare_shutdown`
    #[error("Worker pool is running; call prepare_shutdown first")]
    NotDraining,
}

/// Idle backoff bounds for worker loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// First wait after finding the queue empty
    pub min: Duration,
    /// Upper bound for consecutive empty polls
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(50),
            max: Duration::from_secs(2),
        }
    }
}

impl Backoff {
    /// Wait after `current`, doubled and capped.
    pub fn next(&self, current: Duration) -> Duration {
        (current * 2).clamp(self.min, self.max)
    }
}

/// Decrements the live-thread counter even if the worker panics.
struct AliveGuard(Arc<AtomicUsize>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fixed-size pool of local tiling workers.
pub struct LocalWorkerPool {
    queue: Arc<JobQueue>,
    runner: Arc<TileJobRunner>,
    backoff: Backoff,
    state: Mutex<PoolState>,
    stop: Arc<AtomicBool>,
    alive: Arc<AtomicUsize>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl LocalWorkerPool {
    /// Create a stopped pool.
    pub fn new(queue: Arc<JobQueue>, runner: Arc<TileJobRunner>) -> Self {
        Self {
            queue,
            runner,
            backoff: Backoff::default(),
            state: Mutex::new(PoolState::Stopped),
            stop: Arc::new(AtomicBool::new(false)),
            alive: Arc::new(AtomicUsize::new(0)),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Override the idle backoff.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Current state.
    pub fn state(&self) -> PoolState {
        *self.state.lock()
    }

    /// Number of worker threads that have not exited yet.
    pub fn live_workers(&self) -> usize {
        self.alive.load(Ordering::SeqCst)
    }

    /// Spawn `concurrency` workers.
    ///
    /// Returns `Ok(false)` without doing anything if the pool is not
    /// stopped.
    pub fn start(&self, concurrency: usize) -> Result<bool, PoolError> {
        let mut state = self.state.lock();
        if *state != PoolState::Stopped {
            warn!(state = ?*state, "Worker pool already started; ignoring start request");
            return Ok(false);
        }

        let concurrency = concurrency.max(1);
        self.stop.store(false, Ordering::SeqCst);
        let mut handles = self.handles.lock();

        for i in 0..concurrency {
            let queue = Arc::clone(&self.queue);
            let runner = Arc::clone(&self.runner);
            let stop = Arc::clone(&self.stop);
            let alive = Arc::clone(&self.alive);
            let backoff = self.backoff;

            self.alive.fetch_add(1, Ordering::SeqCst);
            let spawned = thread::Builder::new()
                .name(format!("tile-worker-{}", i))
                .spawn(move || {
                    let _alive = AliveGuard(alive);
                    worker_loop(&queue, &runner, &stop, backoff);
                });

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    self.alive.fetch_sub(1, Ordering::SeqCst);
                    // Threads already running must be drained by the caller
                    self.stop.store(true, Ordering::SeqCst);
                    self.queue.wake_all();
                    *state = PoolState::Draining;
                    return Err(PoolError::Spawn(e));
                }
            }
        }

        *state = PoolState::Running;
        info!(concurrency, "Local worker pool started");
        Ok(true)
    }

    /// Stop claiming new jobs. In-flight builds are left to finish.
    pub fn prepare_shutdown(&self) {
        let mut state = self.state.lock();
        if *state != PoolState::Running {
            debug!(state = ?*state, "prepare_shutdown on a pool that is not running");
            return;
        }
        *state = PoolState::Draining;
        self.stop.store(true, Ordering::SeqCst);
        self.queue.wake_all();
        info!("Local worker pool draining");
    }

    /// Block until every worker has exited, checking every `poll_interval`.
    pub fn await_stopped(&self, poll_interval: Duration) -> Result<(), PoolError> {
        match self.state() {
            PoolState::Stopped => return Ok(()),
            PoolState::Running => return Err(PoolError::NotDraining),
            PoolState::Draining => {}
        }

        loop {
            let live = self.live_workers();
            if live == 0 {
                break;
            }
            debug!(live, "Waiting for tile workers to finish");
            thread::sleep(poll_interval);
        }

        for handle in self.handles.lock().drain(..) {
            let name = handle.thread().name().unwrap_or("tile-worker").to_string();
            if handle.join().is_err() {
                error!(thread = %name, "Tile worker terminated by a fatal error");
            }
        }

        *self.state.lock() = PoolState::Stopped;
        info!("Local worker pool stopped");
        Ok(())
    }
}

fn worker_loop(queue: &Arc<JobQueue>, runner: &TileJobRunner, stop: &AtomicBool, backoff: Backoff) {
    let mut wait = backoff.min;

    while !stop.load(Ordering::SeqCst) {
        let Some(slot) = WorkerSlot::claim_timeout(queue, wait, stop) else {
            wait = backoff.next(wait);
            continue;
        };
        wait = backoff.min;
        process(slot, runner);
    }

    debug!("Tile worker exiting");
}

fn process(slot: WorkerSlot, runner: &TileJobRunner) {
    let job = slot.job().clone();
    let outcome = match runner.run(job.owner_id(), job.relative_path()) {
        Ok(_) => JobOutcome::Success,
        Err(e) => {
            warn!(job_id = job.id, key = %job.key, kind = e.kind(), error = %e, "Tiling failed");
            JobOutcome::Failure(e.to_string())
        }
    };

    match slot.finish(outcome) {
        Ok(Disposition::Cancelled(key)) => runner.discard(&key),
        Ok(Disposition::Stale) => warn!(job_id = job.id, "Outcome ignored; claim superseded"),
        Ok(disposition) => debug!(job_id = job.id, ?disposition, "Job completed"),
        Err(e) => error!(job_id = job.id, error = %e, "Failed to record job outcome"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::TileFileLayout;
    use crate::pyramid::PyramidBuilder;
    use crate::queue::{QueueConfig, QueueStats};
    use crate::worker::test_support::{CountingBuilder, GatedBuilder};
    use std::time::Instant;
    use tempfile::TempDir;

    fn runner(temp: &TempDir, builder: Arc<dyn PyramidBuilder>) -> Arc<TileJobRunner> {
        Arc::new(TileJobRunner::new(
            builder,
            TileFileLayout::new(temp.path().join("tiles")),
            temp.path().join("store"),
        ))
    }

    fn pool(temp: &TempDir, builder: Arc<CountingBuilder>) -> (Arc<JobQueue>, LocalWorkerPool) {
        let queue = Arc::new(JobQueue::in_memory(QueueConfig::default()));
        let runner = runner(temp, builder);
        let pool = LocalWorkerPool::new(Arc::clone(&queue), runner).with_backoff(Backoff {
            min: Duration::from_millis(5),
            max: Duration::from_millis(20),
        });
        (queue, pool)
    }

    fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_backoff_is_bounded() {
        let backoff = Backoff::default();
        assert_eq!(backoff.next(Duration::from_millis(50)), Duration::from_millis(100));
        assert_eq!(backoff.next(Duration::from_secs(2)), Duration::from_secs(2));
        assert_eq!(backoff.next(Duration::ZERO), Duration::from_millis(50));
    }

    #[test]
    fn test_pool_processes_queue() {
        let temp = TempDir::new().unwrap();
        let builder = Arc::new(CountingBuilder::default());
        let (queue, pool) = pool(&temp, Arc::clone(&builder));
        for i in 0..10 {
            queue.enqueue("d", &format!("{}.tif", i)).unwrap();
        }

        assert!(pool.start(3).unwrap());
        assert_eq!(pool.state(), PoolState::Running);
        wait_until(|| queue.is_empty());

        pool.prepare_shutdown();
        pool.await_stopped(Duration::from_millis(10)).unwrap();
        assert_eq!(pool.state(), PoolState::Stopped);
        assert_eq!(pool.live_workers(), 0);
        assert_eq!(builder.calls(), 10);
    }

    #[test]
    fn test_second_start_is_noop() {
        let temp = TempDir::new().unwrap();
        let (_queue, pool) = pool(&temp, Arc::new(CountingBuilder::default()));

        assert!(pool.start(2).unwrap());
        assert!(!pool.start(2).unwrap());
        assert_eq!(pool.live_workers(), 2);

        pool.prepare_shutdown();
        pool.await_stopped(Duration::from_millis(10)).unwrap();
    }

    #[test]
    fn test_await_stopped_requires_drain() {
        let temp = TempDir::new().unwrap();
        let (_queue, pool) = pool(&temp, Arc::new(CountingBuilder::default()));

        assert!(pool.await_stopped(Duration::from_millis(1)).is_ok());
        pool.start(1).unwrap();
        assert!(matches!(
            pool.await_stopped(Duration::from_millis(1)),
            Err(PoolError::NotDraining)
        ));
        pool.prepare_shutdown();
        pool.await_stopped(Duration::from_millis(10)).unwrap();
    }

    #[test]
    fn test_failing_jobs_end_failed() {
        let temp = TempDir::new().unwrap();
        let builder = Arc::new(CountingBuilder::failing());
        let (queue, pool) = pool(&temp, Arc::clone(&builder));
        queue.enqueue("d", "bad.tif").unwrap();

        pool.start(1).unwrap();
        wait_until(|| queue.failed_jobs().len() == 1);
        pool.prepare_shutdown();
        pool.await_stopped(Duration::from_millis(10)).unwrap();

        // One attempt plus one retry
        assert_eq!(builder.calls(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pool_can_restart_after_stop() {
        let temp = TempDir::new().unwrap();
        let builder = Arc::new(CountingBuilder::default());
        let (queue, pool) = pool(&temp, Arc::clone(&builder));

        pool.start(1).unwrap();
        pool.prepare_shutdown();
        pool.await_stopped(Duration::from_millis(10)).unwrap();

        queue.enqueue("d", "late.tif").unwrap();
        assert!(pool.start(1).unwrap());
        wait_until(|| queue.is_empty());
        pool.prepare_shutdown();
        pool.await_stopped(Duration::from_millis(10)).unwrap();
        assert_eq!(builder.calls(), 1);
    }

    #[test]
    fn test_stopped_pool_claims_nothing_new() {
        let temp = TempDir::new().unwrap();
        let builder = Arc::new(CountingBuilder::default());
        let (queue, pool) = pool(&temp, Arc::clone(&builder));

        pool.start(2).unwrap();
        pool.prepare_shutdown();
        pool.await_stopped(Duration::from_millis(10)).unwrap();

        queue.enqueue("d", "after.tif").unwrap();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(queue.stats().queued, 1);
        assert_eq!(builder.calls(), 0);
    }

    #[test]
    fn test_drain_finishes_in_flight_build_and_leaves_rest_queued() {
        let temp = TempDir::new().unwrap();
        let builder = Arc::new(GatedBuilder::default());
        let queue = Arc::new(JobQueue::in_memory(QueueConfig::default()));
        for name in ["a.tif", "b.tif", "c.tif"] {
            queue.enqueue("d", name).unwrap();
        }
        let pool = LocalWorkerPool::new(Arc::clone(&queue), runner(&temp, builder.clone()));

        pool.start(1).unwrap();
        wait_until(|| builder.started() == 1);

        pool.prepare_shutdown();
        assert_eq!(pool.state(), PoolState::Draining);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(pool.live_workers(), 1);

        builder.open();
        pool.await_stopped(Duration::from_millis(10)).unwrap();

        assert_eq!(builder.inner.calls(), 1);
        assert!(queue.find("d", "a.tif").is_none());
        assert_eq!(
            queue.stats(),
            QueueStats {
                queued: 2,
                claimed: 0,
                failed: 0
            }
        );
    }

    #[test]
    fn test_idle_worker_stops_without_claiming_after_drain() {
        let temp = TempDir::new().unwrap();
        let builder = Arc::new(CountingBuilder::default());
        let queue = Arc::new(JobQueue::in_memory(QueueConfig::default()));
        let pool = LocalWorkerPool::new(Arc::clone(&queue), runner(&temp, builder.clone()))
            .with_backoff(Backoff {
                min: Duration::from_secs(10),
                max: Duration::from_secs(10),
            });

        pool.start(1).unwrap();
        // Let the worker block in its idle wait
        thread::sleep(Duration::from_millis(30));

        let start = Instant::now();
        pool.prepare_shutdown();
        queue.enqueue("d", "late.tif").unwrap();
        pool.await_stopped(Duration::from_millis(5)).unwrap();

        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(builder.calls(), 0);
        assert_eq!(queue.stats().queued, 1);
    }
}
