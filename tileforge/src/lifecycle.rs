//! Host-process lifecycle hooks for the local worker pool.

use crate::pool::{LocalWorkerPool, PoolError, PoolState};
use crate::shutdown::ShutdownSignal;
use std::time::Duration;
use tracing::info;

/// Default polling interval while waiting for the pool to drain.
pub const DEFAULT_SHUTDOWN_POLL: Duration = Duration::from_secs(1);

/// Starts the local pool with the host and drains it on teardown.
///
/// The controller owns the host's only [`LocalWorkerPool`], so at most one
/// pool can ever be running per process.
pub struct LifecycleController {
    pool: LocalWorkerPool,
    concurrency: usize,
    shutdown_poll: Duration,
}

impl LifecycleController {
    /// Create a controller for `pool`.
    pub fn new(pool: LocalWorkerPool, concurrency: usize) -> Self {
        Self {
            pool,
            concurrency,
            shutdown_poll: DEFAULT_SHUTDOWN_POLL,
        }
    }

    /// Override the drain polling interval.
    pub fn with_shutdown_poll(mut self, poll: Duration) -> Self {
        self.shutdown_poll = poll;
        self
    }

    /// The managed pool.
    pub fn pool(&self) -> &LocalWorkerPool {
        &self.pool
    }

    /// Whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.pool.state() == PoolState::Running
    }

    /// Start the pool unless it is already running.
    ///
    /// Returns `true` if this call started it.
    pub fn on_host_startup(&self) -> Result<bool, PoolError> {
        if self.is_running() {
            return Ok(false);
        }
        self.pool.start(self.concurrency)
    }

    /// Drain the pool, blocking until every worker has exited.
    pub fn on_host_shutdown(&self) -> Result<(), PoolError> {
        info!("Host shutting down; draining tile workers");
        self.pool.prepare_shutdown();
        self.pool.await_stopped(self.shutdown_poll)
    }

    /// Run the pool until `signal` is requested, then drain it and run the
    /// signal's chained handlers.
    pub fn run_until(&self, signal: &ShutdownSignal) -> Result<(), PoolError> {
        self.on_host_startup()?;
        signal.wait();
        let result = self.on_host_shutdown();
        signal.run_hooks();
        result
    }
}
