//! Core primitives: the bounded worker pool and the shared timing wheel.

pub mod error;
pub mod executor;
pub mod timing_wheel;
pub mod worker_pool;

pub use error::{AppResult, PoolError, RuntimeError, WheelError};
pub use executor::{
    default_failure_hook, log_failure, FailureHook, FailureKind, Job, UnitFailure, UnitId,
    UnitMeta, WorkUnit,
};
pub use timing_wheel::{TimerHandle, TimerId, TimingWheel};
pub use worker_pool::{PoolStats, Rejected, WorkerPool};

pub(crate) use executor::panic_message;
