//! Tokio runtime dispatcher implementation.

use std::sync::Arc;

use super::dispatch::{Dispatch, Task};

/// Dispatcher that runs callbacks on a tokio runtime's blocking pool.
#[derive(Clone)]
pub struct TokioDispatcher {
    handle: tokio::runtime::Handle,
    // Keeps a runtime built by `with_worker_threads` alive.
    _runtime: Option<Arc<tokio::runtime::Runtime>>,
}

impl TokioDispatcher {
    /// Create a new `TokioDispatcher` from a tokio runtime handle.
    #[must_use]
    pub const fn new(handle: tokio::runtime::Handle) -> Self {
        Self {
            handle,
            _runtime: None,
        }
    }

    /// Use the runtime the caller is currently running on, if any.
    #[must_use]
    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }

    /// Create a `TokioDispatcher` owning a new multi-threaded runtime.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from building the runtime.
    pub fn with_worker_threads(worker_threads: usize) -> Result<Self, std::io::Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads)
            .thread_name("wheel-dispatch")
            .enable_all()
            .build()?;
        Ok(Self {
            handle: runtime.handle().clone(),
            _runtime: Some(Arc::new(runtime)),
        })
    }
}

impl Dispatch for TokioDispatcher {
    fn dispatch(&self, task: Task) {
        // Panics are contained by the JoinHandle, which is dropped here.
        drop(self.handle.spawn_blocking(task));
    }
}
