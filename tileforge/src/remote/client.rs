//! Batch-drain worker that tiles jobs claimed from a remote coordinator.

use super::protocol::{CompletionReport, JobDescriptor, ReportedOutcome};
use super::transport::{RemoteQueue, TransportError};
use crate::queue::JobKey;
use crate::shutdown::ShutdownSignal;
use crate::worker::{JobResult, TileJobRunner};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Default number of worker threads.
pub const DEFAULT_THREADS: usize = 1;

/// Default interval for polling thread completion.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Errors that end a worker thread.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The coordinator could not be reached after retries
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    /// An unrecoverable failure inside the worker
    #[error("Fatal worker error: {0}")]
    Fatal(String),
}

/// Remote client configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// Worker thread count
    pub threads: usize,
    /// How often the supervising thread checks for finished workers
    pub poll_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Totals for one [`RemoteWorkerClient::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Worker threads the run was configured with
    pub threads: usize,
    /// Pyramids built
    pub built: usize,
    /// Jobs completed from an existing pyramid
    pub skipped: usize,
    /// Jobs reported as failed
    pub failed: usize,
    /// Threads that ended with a transport or fatal error
    pub crashed_threads: usize,
}

impl RunSummary {
    /// Whether no thread ended normally, e.g. because the coordinator was
    /// unreachable throughout.
    pub fn all_threads_failed(&self) -> bool {
        self.crashed_threads > 0 && self.crashed_threads >= self.threads
    }
}

#[derive(Default)]
struct Counters {
    built: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
}

/// Claims jobs from a [`RemoteQueue`], tiles them against the shared file
/// store and reports the results.
///
/// Each thread runs claim, tile and report in a loop. A thread exits when
/// the queue is observed empty, on the end-of-work sentinel, on shutdown or
/// on a transport/fatal error. [`run`](Self::run) returns once every
/// thread has exited.
pub struct RemoteWorkerClient {
    remote: Arc<dyn RemoteQueue>,
    runner: Arc<TileJobRunner>,
    config: ClientConfig,
    shutdown: ShutdownSignal,
    active: AtomicUsize,
    counters: Counters,
}

impl RemoteWorkerClient {
    /// Create a client.
    pub fn new(remote: Arc<dyn RemoteQueue>, runner: Arc<TileJobRunner>) -> Self {
        Self {
            remote,
            runner,
            config: ClientConfig::default(),
            shutdown: ShutdownSignal::new(),
            active: AtomicUsize::new(0),
            counters: Counters::default(),
        }
    }

    /// Override the configuration. A thread count of zero becomes one.
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = ClientConfig {
            threads: config.threads.max(1),
            ..config
        };
        self
    }

    /// Use an externally owned shutdown signal.
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// The signal that stops this client from claiming new jobs.
    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Jobs currently being tiled.
    pub fn active_jobs(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Run every worker thread to completion.
    pub fn run(&self) -> RunSummary {
        let mut crashed = 0;

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(self.config.threads);
            for i in 0..self.config.threads {
                let spawned = thread::Builder::new()
                    .name(format!("remote-worker-{}", i))
                    .spawn_scoped(scope, move || self.worker_loop(i));
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        error!(worker_id = i, error = %e, "Failed to spawn remote worker");
                        crashed += 1;
                    }
                }
            }
            info!(threads = handles.len(), "Remote workers started");

            let mut announced = false;
            while !handles.iter().all(|h| h.is_finished()) {
                if !announced && self.shutdown.is_requested() {
                    info!(active = self.active_jobs(), "Shutdown requested; finishing active jobs");
                    announced = true;
                }
                thread::sleep(self.config.poll_interval);
            }

            for (i, handle) in handles.into_iter().enumerate() {
                match handle.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!(worker_id = i, error = %e, "Remote worker terminated");
                        crashed += 1;
                    }
                    Err(payload) => {
                        let e = WorkerError::Fatal(panic_message(payload.as_ref()));
                        error!(worker_id = i, error = %e, "Remote worker terminated");
                        crashed += 1;
                    }
                }
            }
        });

        let summary = RunSummary {
            threads: self.config.threads,
            built: self.counters.built.load(Ordering::SeqCst),
            skipped: self.counters.skipped.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            crashed_threads: crashed,
        };
        if summary.crashed_threads == 0 {
            info!(
                built = summary.built,
                skipped = summary.skipped,
                failed = summary.failed,
                "No more jobs in queue"
            );
        } else {
            error!(
                built = summary.built,
                skipped = summary.skipped,
                failed = summary.failed,
                crashed_threads = summary.crashed_threads,
                threads = summary.threads,
                "Remote tiling stopped after worker failures"
            );
        }
        summary
    }

    fn worker_loop(&self, worker_id: usize) -> Result<(), WorkerError> {
        loop {
            if self.shutdown.is_requested() {
                debug!(worker_id, "Shutdown requested; not claiming");
                return Ok(());
            }

            let job = match self.remote.claim_next()? {
                Some(job) => job,
                None => {
                    debug!(worker_id, "Queue drained");
                    return Ok(());
                }
            };
            if job.is_end_of_work() {
                info!(worker_id, "End of work received; shutting down");
                self.shutdown.request();
                return Ok(());
            }

            self.active.fetch_add(1, Ordering::SeqCst);
            let result = self.process(worker_id, &job);
            self.active.fetch_sub(1, Ordering::SeqCst);
            result?;
        }
    }

    fn process(&self, worker_id: usize, job: &JobDescriptor) -> Result<(), WorkerError> {
        debug!(
            worker_id,
            job_id = job.job_id,
            owner_id = %job.owner_id,
            relative_path = %job.relative_path,
            "Tiling"
        );

        let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
            self.runner.run(&job.owner_id, &job.relative_path)
        }));

        let (outcome, fatal) = match attempt {
            Ok(Ok(JobResult::Built(descriptor))) => {
                self.counters.built.fetch_add(1, Ordering::SeqCst);
                (ReportedOutcome::success(&descriptor), None)
            }
            Ok(Ok(JobResult::Skipped(descriptor))) => {
                self.counters.skipped.fetch_add(1, Ordering::SeqCst);
                (ReportedOutcome::success(&descriptor), None)
            }
            Ok(Err(e)) => {
                warn!(worker_id, job_id = job.job_id, error = %e, "Tiling failed");
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                (ReportedOutcome::failure(e.kind(), e.to_string()), None)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                (
                    ReportedOutcome::failure("fatal", message.clone()),
                    Some(WorkerError::Fatal(message)),
                )
            }
        };

        let ack = self.remote.complete(&CompletionReport::new(job, outcome))?;
        if ack.cancelled {
            match JobKey::new(&job.owner_id, &job.relative_path) {
                Ok(key) => self.runner.discard(&key),
                Err(e) => warn!(job_id = job.job_id, error = %e, "Cannot discard cancelled job"),
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::TileFileLayout;
    use crate::pyramid::{PyramidBuilder, TileError, TilePyramidDescriptor};
    use crate::queue::{JobQueue, QueueConfig, QueueStats};
    use crate::remote::handler::RpcHandler;
    use crate::remote::loopback::LoopbackQueue;
    use crate::remote::protocol::CompletionAck;
    use crate::worker::test_support::{CountingBuilder, GatedBuilder};
    use parking_lot::Mutex;
    use std::path::Path;
    use std::time::Instant;
    use tempfile::TempDir;

    fn runner(temp: &TempDir, builder: Arc<dyn PyramidBuilder>, skip: bool) -> Arc<TileJobRunner> {
        Arc::new(
            TileJobRunner::new(
                builder,
                TileFileLayout::new(temp.path().join("tiles")),
                temp.path().join("store"),
            )
            .with_skip_existing(skip),
        )
    }

    fn loopback(queue: &Arc<JobQueue>, sentinel: bool) -> Arc<dyn RemoteQueue> {
        let handler = RpcHandler::new(Arc::clone(queue)).with_end_of_work_sentinel(sentinel);
        Arc::new(LoopbackQueue::new(Arc::new(handler)))
    }

    fn config(threads: usize) -> ClientConfig {
        ClientConfig {
            threads,
            poll_interval: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_drains_queue_and_exits() {
        let temp = TempDir::new().unwrap();
        let queue = Arc::new(JobQueue::in_memory(QueueConfig::default()));
        for i in 0..10 {
            queue.enqueue("d", &format!("img/{}.tif", i)).unwrap();
        }
        let builder = Arc::new(CountingBuilder::default());
        let client = RemoteWorkerClient::new(loopback(&queue, false), runner(&temp, builder.clone(), false))
            .with_config(config(3));

        let summary = client.run();

        assert_eq!(summary.built, 10);
        assert_eq!(summary.crashed_threads, 0);
        assert_eq!(builder.calls(), 10);
        assert!(queue.is_empty());
        assert_eq!(client.active_jobs(), 0);
    }

    #[test]
    fn test_empty_queue_exits_immediately() {
        let temp = TempDir::new().unwrap();
        let queue = Arc::new(JobQueue::in_memory(QueueConfig::default()));
        let client = RemoteWorkerClient::new(
            loopback(&queue, false),
            runner(&temp, Arc::new(CountingBuilder::default()), false),
        );
        let summary = client.run();
        assert_eq!(
            summary,
            RunSummary {
                threads: 1,
                ..RunSummary::default()
            }
        );
        assert!(!summary.all_threads_failed());
    }

    #[test]
    fn test_skip_existing_reports_without_building() {
        let temp = TempDir::new().unwrap();
        let queue = Arc::new(JobQueue::in_memory(QueueConfig::default()));
        let builder = Arc::new(CountingBuilder::default());
        runner(&temp, builder.clone(), false).run("d", "a.tif").unwrap();
        queue.enqueue("d", "a.tif").unwrap();

        let client = RemoteWorkerClient::new(loopback(&queue, false), runner(&temp, builder.clone(), true));
        let summary = client.run();

        assert_eq!(summary.skipped, 1);
        assert_eq!(builder.calls(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_failures_are_reported_and_worker_continues() {
        let temp = TempDir::new().unwrap();
        let queue = Arc::new(JobQueue::in_memory(QueueConfig { max_retries: 0 }));
        queue.enqueue("d", "a.tif").unwrap();
        queue.enqueue("d", "b.tif").unwrap();

        let client = RemoteWorkerClient::new(
            loopback(&queue, false),
            runner(&temp, Arc::new(CountingBuilder::failing()), false),
        );
        let summary = client.run();

        assert_eq!(summary.failed, 2);
        assert_eq!(summary.crashed_threads, 0);
        assert_eq!(queue.failed_jobs().len(), 2);
    }

    #[test]
    fn test_sentinel_requests_shutdown() {
        let temp = TempDir::new().unwrap();
        let queue = Arc::new(JobQueue::in_memory(QueueConfig::default()));
        queue.enqueue("d", "a.tif").unwrap();

        let client = RemoteWorkerClient::new(
            loopback(&queue, true),
            runner(&temp, Arc::new(CountingBuilder::default()), false),
        );
        let summary = client.run();

        assert_eq!(summary.built, 1);
        assert!(client.shutdown_signal().is_requested());
    }

    #[test]
    fn test_shutdown_before_run_claims_nothing() {
        let temp = TempDir::new().unwrap();
        let queue = Arc::new(JobQueue::in_memory(QueueConfig::default()));
        queue.enqueue("d", "a.tif").unwrap();
        let signal = ShutdownSignal::new();
        signal.request();

        let client = RemoteWorkerClient::new(
            loopback(&queue, false),
            runner(&temp, Arc::new(CountingBuilder::default()), false),
        )
        .with_shutdown(signal);

        assert_eq!(client.run().built, 0);
        assert_eq!(queue.size(), 1);
    }

    struct PanickingBuilder;

    impl PyramidBuilder for PanickingBuilder {
        fn build(&self, _: &Path, _: &Path) -> Result<TilePyramidDescriptor, TileError> {
            panic!("decoder blew up");
        }
    }

    #[test]
    fn test_panic_terminates_only_that_thread() {
        let temp = TempDir::new().unwrap();
        let queue = Arc::new(JobQueue::in_memory(QueueConfig { max_retries: 0 }));
        queue.enqueue("d", "a.tif").unwrap();

        let client = RemoteWorkerClient::new(
            loopback(&queue, false),
            runner(&temp, Arc::new(PanickingBuilder), false),
        )
        .with_config(config(2));
        let summary = client.run();

        assert_eq!(summary.crashed_threads, 1);
        assert!(!summary.all_threads_failed());
        assert_eq!(summary.failed, 1);
        assert_eq!(queue.failed_jobs().len(), 1);
    }

    struct BrokenRemote {
        claims: Mutex<usize>,
    }

    impl RemoteQueue for BrokenRemote {
        fn claim_next(&self) -> Result<Option<JobDescriptor>, TransportError> {
            *self.claims.lock() += 1;
            Err(TransportError::Http("connection refused".to_string()))
        }

        fn complete(&self, _: &CompletionReport) -> Result<CompletionAck, TransportError> {
            unreachable!()
        }
    }

    #[test]
    fn test_transport_failure_ends_each_thread() {
        let temp = TempDir::new().unwrap();
        let remote = Arc::new(BrokenRemote {
            claims: Mutex::new(0),
        });
        let client = RemoteWorkerClient::new(
            remote.clone(),
            runner(&temp, Arc::new(CountingBuilder::default()), false),
        )
        .with_config(config(2));

        let summary = client.run();
        assert_eq!(summary.crashed_threads, 2);
        assert!(summary.all_threads_failed());
        assert_eq!(*remote.claims.lock(), 2);
    }

    #[test]
    fn test_cancelled_ack_discards_output() {
        let temp = TempDir::new().unwrap();
        let queue = Arc::new(JobQueue::in_memory(QueueConfig::default()));
        queue.enqueue("d", "x/a.tif").unwrap();

        struct CancellingRemote {
            inner: Arc<dyn RemoteQueue>,
            queue: Arc<JobQueue>,
        }
        impl RemoteQueue for CancellingRemote {
            fn claim_next(&self) -> Result<Option<JobDescriptor>, TransportError> {
                let job = self.inner.claim_next()?;
                if let Some(job) = &job {
                    self.queue.remove(&job.owner_id, &job.relative_path).unwrap();
                }
                Ok(job)
            }
            fn complete(&self, r: &CompletionReport) -> Result<CompletionAck, TransportError> {
                self.inner.complete(r)
            }
        }

        let remote = Arc::new(CancellingRemote {
            inner: loopback(&queue, false),
            queue: Arc::clone(&queue),
        });
        let runner = runner(&temp, Arc::new(CountingBuilder::default()), false);
        let client = RemoteWorkerClient::new(remote, Arc::clone(&runner));

        assert_eq!(client.run().built, 1);
        assert!(!runner.layout().exists("d", "x/a.tif"));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_shutdown_mid_build_finishes_job_and_leaves_rest_queued() {
        let temp = TempDir::new().unwrap();
        let queue = Arc::new(JobQueue::in_memory(QueueConfig::default()));
        for name in ["a.tif", "b.tif", "c.tif"] {
            queue.enqueue("d", name).unwrap();
        }
        let builder = Arc::new(GatedBuilder::default());
        let client =
            RemoteWorkerClient::new(loopback(&queue, false), runner(&temp, builder.clone(), false))
                .with_config(config(1));

        let (summary, active_while_draining, finished_early) = thread::scope(|scope| {
            let run = scope.spawn(|| client.run());
            let deadline = Instant::now() + Duration::from_secs(10);
            while builder.started() == 0 && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }

            client.shutdown_signal().request();
            thread::sleep(Duration::from_millis(50));
            let active = client.active_jobs();
            let finished = run.is_finished();

            builder.open();
            (run.join().unwrap(), active, finished)
        });

        assert_eq!(active_while_draining, 1);
        assert!(!finished_early);
        assert_eq!(summary.built, 1);
        assert_eq!(summary.crashed_threads, 0);
        assert_eq!(builder.inner.calls(), 1);
        assert_eq!(client.active_jobs(), 0);
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

    /// Delivers every completion twice, as a transport retrying after a lost
    /// response would.
    struct ResendingRemote {
        inner: Arc<dyn RemoteQueue>,
    }

    impl RemoteQueue for ResendingRemote {
        fn claim_next(&self) -> Result<Option<JobDescriptor>, TransportError> {
            self.inner.claim_next()
        }

        fn complete(&self, report: &CompletionReport) -> Result<CompletionAck, TransportError> {
            self.inner.complete(report)?;
            self.inner.complete(report)
        }
    }

    #[test]
    fn test_resent_completions_do_not_consume_retries() {
        let temp = TempDir::new().unwrap();
        let queue = Arc::new(JobQueue::in_memory(QueueConfig::default()));
        queue.enqueue("d", "a.tif").unwrap();
        queue.enqueue("d", "b.tif").unwrap();
        let builder = Arc::new(CountingBuilder::failing());
        let remote = Arc::new(ResendingRemote {
            inner: loopback(&queue, false),
        });

        let client = RemoteWorkerClient::new(remote, runner(&temp, builder.clone(), false));
        let summary = client.run();

        assert_eq!(summary.crashed_threads, 0);
        // One attempt plus one retry for each job
        assert_eq!(builder.calls(), 4);
        assert_eq!(summary.failed, 4);
        let failed = queue.failed_jobs();
        assert_eq!(failed.len(), 2);
        assert!(failed.iter().all(|job| job.attempts == 2));
    }
}
