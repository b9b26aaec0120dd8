//! `WorkerPool` backed by one dedicated OS thread per execution slot.
//!
//! # Design Principles
//!
//! - **One admission lock**: `active` and `pending` are only mutated under
//!   `SlotState`'s mutex, so `capacity + queue_limit` is an exact bound
//! - **No polling**: idle workers block on a channel; `shutdown` waits on a Condvar
//! - **Hand-off on completion**: a worker that finishes a unit pulls the next
//!   queued unit itself, keeping its slot, so FIFO order is preserved

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::PoolConfig;
use crate::core::executor::{
    default_failure_hook, panic_message, AdmittedUnit, FailureHook, FailureKind, UnitFailure,
    UnitId,
};
use crate::core::{PoolError, WorkUnit};

use super::{PoolCounters, PoolStats, Rejected};

/// Slot accounting protected by the admission lock.
struct SlotState {
    /// Units holding a slot, including ones handed off but not yet picked up.
    active: usize,
    /// Admitted units waiting for a slot, oldest first.
    pending: VecDeque<AdmittedUnit>,
    /// Cleared once shutdown begins.
    accepting: bool,
    /// Hand-off channel to idle workers. `None` once workers are told to exit.
    dispatch: Option<Sender<AdmittedUnit>>,
}

/// State shared between the pool handle and its workers.
struct Shared {
    name: String,
    capacity: usize,
    queue_limit: usize,
    state: Mutex<SlotState>,
    /// Signalled when the pool becomes idle (no active, no pending).
    idle: Condvar,
    counters: PoolCounters,
    hook: FailureHook,
}

/// Bounded pool of execution slots with a FIFO admission queue.
///
/// # Invariants
///
/// - `0 <= active <= capacity`
/// - `pending.len() <= queue_limit`
/// - `pending` is non-empty only while every slot is busy
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_ids: Vec<ThreadId>,
    unit_id_counter: AtomicU64,
}

impl WorkerPool {
    /// Create a pool whose failures are logged through `tracing`.
    ///
    /// # Errors
    ///
    /// `PoolError::InvalidConfig` if `capacity` is zero, `PoolError::Internal`
    /// if a worker thread cannot be spawned.
    pub fn new(name: impl Into<String>, config: &PoolConfig) -> Result<Self, PoolError> {
        Self::with_hook(name, config, default_failure_hook())
    }

    /// Create a pool that reports failed units to `hook`.
    ///
    /// # Errors
    ///
    /// Same as [`WorkerPool::new`].
    pub fn with_hook(
        name: impl Into<String>,
        config: &PoolConfig,
        hook: FailureHook,
    ) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;
        let name = name.into();

        // At most `capacity` units are ever in flight on the hand-off channel.
        let (dispatch_tx, dispatch_rx) = bounded::<AdmittedUnit>(config.capacity);

        let shared = Arc::new(Shared {
            name: name.clone(),
            capacity: config.capacity,
            queue_limit: config.queue_limit,
            state: Mutex::new(SlotState {
                active: 0,
                pending: VecDeque::with_capacity(config.queue_limit.min(1024)),
                accepting: true,
                dispatch: Some(dispatch_tx),
            }),
            idle: Condvar::new(),
            counters: PoolCounters::default(),
            hook,
        });

        let mut workers = Vec::with_capacity(config.capacity);
        for worker_id in 0..config.capacity {
            match spawn_worker(
                worker_id,
                dispatch_rx.clone(),
                Arc::clone(&shared),
                config.thread_stack_size,
            ) {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Close the channel so the workers already started exit.
                    shared.state.lock().dispatch = None;
                    return Err(PoolError::Internal(format!(
                        "failed to spawn worker {worker_id} for pool `{name}`: {e}"
                    )));
                }
            }
        }
        let worker_ids = workers.iter().map(|w| w.thread().id()).collect();

        info!(
            pool = %name,
            capacity = config.capacity,
            queue_limit = config.queue_limit,
            "WorkerPool initialized"
        );

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            worker_ids,
            unit_id_counter: AtomicU64::new(0),
        })
    }

    /// Submit a unit.
    ///
    /// Never blocks. Starts the unit on a free slot, queues it behind earlier
    /// units, or refuses it.
    ///
    /// # Errors
    ///
    /// - `PoolError::Overloaded` if every slot is busy and the queue is full
    /// - `PoolError::ShutDown` once shutdown has begun
    pub fn submit(&self, unit: WorkUnit) -> Result<UnitId, PoolError> {
        self.try_submit(unit).map_err(|rejected| rejected.error)
    }

    /// Submit a unit, getting it back on refusal.
    ///
    /// # Errors
    ///
    /// Same conditions as [`WorkerPool::submit`]; the `Rejected` carries the unit.
    pub fn try_submit(&self, unit: WorkUnit) -> Result<UnitId, Rejected> {
        let shared = &self.shared;
        let mut state = shared.state.lock();

        if !state.accepting {
            return Err(Rejected {
                error: PoolError::ShutDown,
                unit,
            });
        }

        if state.active < shared.capacity {
            let unit_id = self.next_unit_id();
            let Some(dispatch) = state.dispatch.as_ref() else {
                return Err(Rejected {
                    error: PoolError::ShutDown,
                    unit,
                });
            };
            return match dispatch.try_send(unit.admit(unit_id)) {
                Ok(()) => {
                    state.active += 1;
                    shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
                    debug!(pool = %shared.name, unit_id, "unit started on free slot");
                    Ok(unit_id)
                }
                Err(TrySendError::Full(admitted)) => Err(Rejected {
                    error: PoolError::Internal("worker hand-off channel full".into()),
                    unit: admitted.into_unit(),
                }),
                Err(TrySendError::Disconnected(admitted)) => Err(Rejected {
                    error: PoolError::ShutDown,
                    unit: admitted.into_unit(),
                }),
            };
        }

        if state.pending.len() < shared.queue_limit {
            let unit_id = self.next_unit_id();
            state.pending.push_back(unit.admit(unit_id));
            shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
            debug!(
                pool = %shared.name,
                unit_id,
                queued = state.pending.len(),
                "unit queued"
            );
            return Ok(unit_id);
        }

        drop(state);
        shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
        warn!(
            pool = %shared.name,
            capacity = shared.capacity,
            queue_limit = shared.queue_limit,
            "pool saturated, rejecting unit"
        );
        Err(Rejected {
            error: PoolError::Overloaded {
                pool: shared.name.clone(),
                capacity: shared.capacity,
                queue_limit: shared.queue_limit,
            },
            unit,
        })
    }

    /// Stop accepting units and wind the pool down.
    ///
    /// With `drain`, every active and queued unit runs to completion first.
    /// Without it, queued units are discarded (each reported to the failure hook
    /// as `FailureKind::Cancelled`) and only active units are awaited. Calling it
    /// again is a no-op that returns once the pool is idle.
    ///
    /// Must not be called from one of this pool's own units.
    ///
    /// # Errors
    ///
    /// `PoolError::Internal` when called from a worker of this pool or when a
    /// worker thread cannot be joined.
    pub fn shutdown(&self, drain: bool) -> Result<(), PoolError> {
        if self.worker_ids.contains(&thread::current().id()) {
            return Err(PoolError::Internal(format!(
                "pool `{}` cannot be shut down from its own worker",
                self.shared.name
            )));
        }

        let shared = &self.shared;
        let discarded: Vec<AdmittedUnit> = {
            let mut state = shared.state.lock();
            if state.accepting {
                info!(pool = %shared.name, drain, "Shutting down worker pool");
            }
            state.accepting = false;
            if drain {
                Vec::new()
            } else {
                state.pending.drain(..).collect()
            }
        };

        if !discarded.is_empty() {
            warn!(
                pool = %shared.name,
                discarded = discarded.len(),
                "discarding queued units"
            );
            shared
                .counters
                .cancelled
                .fetch_add(discarded.len() as u64, Ordering::Relaxed);
            for unit in discarded {
                shared.report(Some(unit.meta.id), unit.meta.label, FailureKind::Cancelled);
            }
        }

        {
            let mut state = shared.state.lock();
            while state.active > 0 || !state.pending.is_empty() {
                shared.idle.wait(&mut state);
            }
            // Dropping the sender unblocks every idle worker.
            state.dispatch = None;
        }

        let mut workers = self.workers.lock();
        let worker_count = workers.len();
        let mut panicked = 0usize;
        for (idx, worker) in workers.drain(..).enumerate() {
            if worker.join().is_err() {
                warn!(pool = %shared.name, worker_id = idx, "Worker panicked");
                panicked += 1;
            }
        }
        if worker_count > 0 {
            info!(pool = %shared.name, worker_count, "Worker pool shut down complete");
        }

        if panicked > 0 {
            return Err(PoolError::Internal(format!(
                "{panicked} worker(s) of pool `{}` panicked",
                shared.name
            )));
        }
        Ok(())
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let (active, queued) = {
            let state = self.shared.state.lock();
            (state.active, state.pending.len())
        };
        self.shared
            .counters
            .snapshot(self.shared.capacity, self.shared.queue_limit, active, queued)
    }

    /// Units currently holding a slot.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.shared.state.lock().active
    }

    /// Units waiting for a slot.
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Pool name used in logs and failure reports.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Number of execution slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Admission queue limit.
    #[must_use]
    pub fn queue_limit(&self) -> usize {
        self.shared.queue_limit
    }

    /// Whether the pool still accepts submissions.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.shared.state.lock().accepting
    }

    /// Report a unit that never reached the pool (e.g. abandoned retries).
    pub(crate) fn report_failure(&self, label: Option<String>, kind: FailureKind) {
        self.shared.report(None, label, kind);
    }

    fn next_unit_id(&self) -> UnitId {
        self.unit_id_counter.fetch_add(1, Ordering::Relaxed)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Stop admission and release idle workers, but don't join here.
        let mut state = self.shared.state.lock();
        if state.accepting {
            state.accepting = false;
            state.dispatch = None;
            debug!(
                pool = %self.shared.name,
                "WorkerPool dropped without explicit shutdown - workers will be detached"
            );
        }
    }
}

impl Shared {
    /// Run one admitted unit on the calling worker, catching errors and panics.
    fn run_unit(&self, worker_id: usize, unit: AdmittedUnit) {
        let AdmittedUnit { meta, job } = unit;

        if meta.deadline.is_some_and(|deadline| Instant::now() > deadline) {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            self.report(Some(meta.id), meta.label, FailureKind::DeadlineExpired);
            return;
        }

        debug!(
            pool = %self.name,
            worker_id,
            unit_id = meta.id,
            waited_ms = u64::try_from(meta.submitted_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Worker executing unit"
        );

        let kind = match panic::catch_unwind(AssertUnwindSafe(move || job.run())) {
            Ok(Ok(())) => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Ok(Err(err)) => FailureKind::Error(err),
            Err(payload) => FailureKind::Panic(panic_message(payload.as_ref())),
        };
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        self.report(Some(meta.id), meta.label, kind);
    }

    /// Release the caller's slot, or hand it the next queued unit.
    fn next_or_release(&self) -> Option<AdmittedUnit> {
        let mut state = self.state.lock();
        if let Some(next) = state.pending.pop_front() {
            return Some(next);
        }
        state.active -= 1;
        if state.active == 0 {
            self.idle.notify_all();
        }
        None
    }

    fn report(&self, unit_id: Option<UnitId>, label: Option<String>, kind: FailureKind) {
        let failure = UnitFailure {
            pool: self.name.clone(),
            unit_id,
            label,
            kind,
        };
        if panic::catch_unwind(AssertUnwindSafe(|| (self.hook)(&failure))).is_err() {
            error!(pool = %self.name, %failure, "failure hook panicked");
        }
    }
}

/// Spawn a worker thread.
fn spawn_worker(
    worker_id: usize,
    dispatch_rx: Receiver<AdmittedUnit>,
    shared: Arc<Shared>,
    stack_size: Option<usize>,
) -> std::io::Result<JoinHandle<()>> {
    let mut builder = thread::Builder::new().name(format!("{}-worker-{worker_id}", shared.name));
    if let Some(size) = stack_size {
        builder = builder.stack_size(size);
    }

    builder.spawn(move || {
        debug!(pool = %shared.name, worker_id, "Worker thread started");

        // When the sender is dropped (shutdown), recv returns Err.
        while let Ok(first) = dispatch_rx.recv() {
            let mut unit = first;
            loop {
                shared.run_unit(worker_id, unit);
                match shared.next_or_release() {
                    Some(next) => unit = next,
                    None => break,
                }
            }
        }

        debug!(pool = %shared.name, worker_id, "Worker thread exiting");
    })
}
