//! Platform-neutral shutdown requests.
//!
//! Worker loops and the lifecycle controller only see a [`ShutdownSignal`].
//! Binding it to an OS signal, a container stop hook or a test harness is
//! the job of the embedding binary.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

type Hook = Box<dyn FnOnce() + Send>;

struct Inner {
    requested: Mutex<bool>,
    cond: Condvar,
    hooks: Mutex<Vec<Hook>>,
}

/// Cloneable, thread-safe "please stop" flag with delegated hooks.
///
/// Hooks registered with [`chain`](Self::chain) model handlers that were
/// installed before ours: they run, in registration order, once cleanup has
/// finished and [`run_hooks`](Self::run_hooks) is called.
#[derive(Clone)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("requested", &self.is_requested())
            .finish()
    }
}

impl ShutdownSignal {
    /// Create a signal in the "running" state.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                requested: Mutex::new(false),
                cond: Condvar::new(),
                hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Request shutdown and wake every waiter. Idempotent.
    pub fn request(&self) {
        let mut requested = self.inner.requested.lock();
        *requested = true;
        self.inner.cond.notify_all();
    }

    /// Whether shutdown has been requested.
    pub fn is_requested(&self) -> bool {
        *self.inner.requested.lock()
    }

    /// Sleep for up to `timeout`, returning early if shutdown is requested.
    ///
    /// Returns `true` if shutdown has been requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut requested = self.inner.requested.lock();
        while !*requested {
            if self
                .inner
                .cond
                .wait_until(&mut requested, deadline)
                .timed_out()
            {
                break;
            }
        }
        *requested
    }

    /// Block until shutdown is requested.
    pub fn wait(&self) {
        let mut requested = self.inner.requested.lock();
        while !*requested {
            self.inner.cond.wait(&mut requested);
        }
    }

    /// Register a handler to run after cleanup.
    pub fn chain(&self, hook: impl FnOnce() + Send + 'static) {
        self.inner.hooks.lock().push(Box::new(hook));
    }

    /// Run and forget every chained handler. Returns how many ran.
    pub fn run_hooks(&self) -> usize {
        let hooks = std::mem::take(&mut *self.inner.hooks.lock());
        let count = hooks.len();
        for hook in hooks {
            hook();
        }
        count
    }
}
