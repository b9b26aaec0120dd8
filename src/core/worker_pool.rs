//! Bounded worker pool with a FIFO admission queue and synchronous backpressure.
//!
//! A `WorkerPool` owns `capacity` dedicated OS threads (one per execution slot)
//! and an admission queue of at most `queue_limit` units. `submit` never blocks:
//! the unit either starts on a free slot, waits in the queue, or is rejected with
//! `PoolError::Overloaded` so the producer can apply its own flow control.
//!
//! # Key Features
//!
//! - **Deterministic admission**: slot and queue accounting happen under one lock
//! - **Strict FIFO** for queued units
//! - **Failure isolation**: errors and panics are caught at the pool boundary and
//!   reported to a caller-supplied hook
//! - **Drain or discard** on shutdown
//!
//! # Example
//!
//! ```rust,ignore
//! use ingest_runtime::config::PoolConfig;
//! use ingest_runtime::core::{PoolError, WorkUnit, WorkerPool};
//!
//! let pool = WorkerPool::new("parsing", &PoolConfig::new(4, 400))?;
//!
//! match pool.submit(WorkUnit::new(move || parse(message))) {
//!     Ok(unit_id) => tracing::debug!(unit_id, "parse admitted"),
//!     Err(PoolError::Overloaded { .. }) => consumer.pause(),
//!     Err(other) => return Err(other.into()),
//! }
//!
//! pool.shutdown(true)?;
//! ```

mod threaded;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{PoolError, WorkUnit};

pub use threaded::WorkerPool;

/// A submission the pool refused, handed back so the caller can retry it.
pub struct Rejected {
    /// Why the unit was refused.
    pub error: PoolError,
    /// The untouched unit.
    pub unit: WorkUnit,
}

impl fmt::Debug for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("error", &self.error)
            .field("unit", &self.unit)
            .finish()
    }
}

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of execution slots.
    pub capacity: usize,

    /// Admission queue limit.
    pub queue_limit: usize,

    /// Units currently holding a slot.
    pub active_units: usize,

    /// Units waiting for a slot.
    pub queued_units: usize,

    /// Units admitted since construction.
    pub submitted_units: u64,

    /// Units that ran and returned `Ok`.
    pub completed_units: u64,

    /// Units that errored, panicked, or missed their start deadline.
    pub failed_units: u64,

    /// Submissions refused with `Overloaded`.
    pub rejected_units: u64,

    /// Queued units discarded by a non-draining shutdown.
    pub cancelled_units: u64,
}

/// Lifetime counters (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub rejected: AtomicU64,
    pub cancelled: AtomicU64,
}

impl PoolCounters {
    /// Get a snapshot combined with the live slot accounting.
    pub fn snapshot(
        &self,
        capacity: usize,
        queue_limit: usize,
        active_units: usize,
        queued_units: usize,
    ) -> PoolStats {
        PoolStats {
            capacity,
            queue_limit,
            active_units,
            queued_units,
            submitted_units: self.submitted.load(Ordering::Relaxed),
            completed_units: self.completed.load(Ordering::Relaxed),
            failed_units: self.failed.load(Ordering::Relaxed),
            rejected_units: self.rejected.load(Ordering::Relaxed),
            cancelled_units: self.cancelled.load(Ordering::Relaxed),
        }
    }
}
