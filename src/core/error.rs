//! Error types for pool, wheel and runtime operations.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors produced by a `WorkerPool`.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Construction parameters were rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Every slot is busy and the admission queue is full.
    #[error("pool `{pool}` overloaded: {capacity} slots busy, {queue_limit} units queued")]
    Overloaded {
        /// Name of the rejecting pool.
        pool: String,
        /// Number of execution slots.
        capacity: usize,
        /// Admission queue limit.
        queue_limit: usize,
    },
    /// The pool no longer accepts submissions.
    #[error("pool has been shut down")]
    ShutDown,
    /// Worker thread could not be spawned, joined, or reached.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PoolError {
    /// Whether the error is the recoverable backpressure signal.
    #[must_use]
    pub const fn is_overload(&self) -> bool {
        matches!(self, Self::Overloaded { .. })
    }
}

/// Errors produced by a `TimingWheel`.
#[derive(Debug, Error)]
pub enum WheelError {
    /// Construction parameters were rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The requested delay, deadline, or period cannot be scheduled.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
    /// The wheel has been stopped.
    #[error("timing wheel has been stopped")]
    Stopped,
    /// Driver thread could not be spawned or joined.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors surfaced while building or operating the shared runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Runtime configuration was invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A pool failed to build or to shut down.
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),
    /// The timing wheel failed to build or rejected a schedule.
    #[error("timing wheel error: {0}")]
    Wheel(#[from] WheelError),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
