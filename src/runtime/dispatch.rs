//! Execution contexts for due timer callbacks.
//!
//! The timing wheel's driver never runs callbacks itself; it hands each due
//! occurrence to a `Dispatch` implementation so a slow callback cannot delay
//! the next tick.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::core::panic_message;

/// How long a thread spawned beyond the core set waits for work before exiting.
const SURGE_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// A unit of dispatched work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Abstraction for running dispatched tasks off the caller's thread.
pub trait Dispatch: Send + Sync + 'static {
    /// Run `task` in some other execution context. Must not block on the task,
    /// and must not leave it waiting behind a task that is still running.
    fn dispatch(&self, task: Task);

    /// Stop accepting tasks. Already dispatched tasks may still run.
    fn close(&self) {}
}

/// OS threads fed by an unbounded channel.
///
/// A core set of threads is kept alive. When a task arrives and every thread is
/// busy, another thread is spawned for it, so a long-running task never delays
/// the ones behind it. Threads beyond the core set exit after five seconds
/// without work.
pub struct ThreadDispatcher {
    name: String,
    tx: Mutex<Option<Sender<Task>>>,
    rx: Receiver<Task>,
    /// Threads waiting for a task that no queued task has claimed yet.
    idle: Arc<AtomicUsize>,
    next_index: AtomicUsize,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadDispatcher {
    /// Spawn `threads` core dispatch threads named `{name}-{index}`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if a thread cannot be spawned.
    pub fn new(name: &str, threads: usize) -> std::io::Result<Self> {
        let core = threads.max(1);
        let (tx, rx) = unbounded::<Task>();
        let dispatcher = Self {
            name: name.to_string(),
            tx: Mutex::new(Some(tx)),
            rx,
            idle: Arc::new(AtomicUsize::new(core)),
            next_index: AtomicUsize::new(0),
            threads: Mutex::new(Vec::with_capacity(core)),
        };
        for _ in 0..core {
            // Dropping `dispatcher` on error releases the threads already started.
            let handle = dispatcher.spawn_thread(None)?;
            dispatcher.threads.lock().push(handle);
        }
        Ok(dispatcher)
    }

    /// Close the channel and wait for queued tasks to finish.
    ///
    /// Must not be called from a dispatched task.
    pub fn join(&self) {
        self.close();
        let handles: Vec<_> = self.threads.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                warn!("dispatch thread panicked");
            }
        }
    }

    /// Number of dispatch threads still running.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.threads
            .lock()
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    fn spawn_thread(&self, idle_timeout: Option<Duration>) -> std::io::Result<JoinHandle<()>> {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        let rx = self.rx.clone();
        let idle = Arc::clone(&self.idle);
        thread::Builder::new()
            .name(format!("{}-{index}", self.name))
            .spawn(move || run_dispatch_loop(index, &rx, &idle, idle_timeout))
    }

    /// Claim an idle thread for one task. False when every thread is busy.
    fn claim_idle(&self) -> bool {
        self.idle
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    fn spawn_surge_thread(&self) {
        match self.spawn_thread(Some(SURGE_IDLE_TIMEOUT)) {
            Ok(handle) => {
                let mut threads = self.threads.lock();
                threads.retain(|h| !h.is_finished());
                threads.push(handle);
                debug!(dispatcher = %self.name, threads = threads.len(), "dispatch threads grown");
            }
            Err(e) => {
                // The task waits for the next thread to free up instead.
                self.idle.fetch_add(1, Ordering::AcqRel);
                warn!(dispatcher = %self.name, error = %e, "failed to spawn dispatch thread");
            }
        }
    }
}

impl Dispatch for ThreadDispatcher {
    fn dispatch(&self, task: Task) {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            debug!("dispatcher closed, dropping task");
            return;
        };
        if !self.claim_idle() {
            self.spawn_surge_thread();
        }
        if tx.send(task).is_err() {
            warn!("dispatch threads gone, dropping task");
        }
    }

    fn close(&self) {
        self.tx.lock().take();
    }
}

impl Drop for ThreadDispatcher {
    fn drop(&mut self) {
        // Threads exit once the queue drains; they are not joined here.
        self.close();
    }
}

/// Run tasks until the channel closes. A thread with an `idle_timeout` also
/// exits after waiting that long, provided no task has claimed it meanwhile.
fn run_dispatch_loop(
    index: usize,
    rx: &Receiver<Task>,
    idle: &AtomicUsize,
    idle_timeout: Option<Duration>,
) {
    loop {
        let task = match idle_timeout {
            None => match rx.recv() {
                Ok(task) => task,
                Err(_) => break,
            },
            Some(timeout) => match rx.recv_timeout(timeout) {
                Ok(task) => task,
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    let retired = idle
                        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                        .is_ok();
                    if retired {
                        break;
                    }
                    continue;
                }
            },
        };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
            error!(
                dispatcher = index,
                panic = %panic_message(payload.as_ref()),
                "dispatched task panicked"
            );
        }
        idle.fetch_add(1, Ordering::AcqRel);
    }
    debug!(dispatcher = index, "dispatch thread exiting");
}
