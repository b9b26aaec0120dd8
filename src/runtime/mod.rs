//! Runtime wiring: the shared context and the execution contexts timer
//! callbacks are dispatched to.

pub mod context;
pub mod dispatch;
#[cfg(feature = "tokio-runtime")]
pub mod tokio_spawner;

pub use context::{PoolKind, RetryPolicy, RuntimeContext, Submission};
pub use dispatch::{Dispatch, Task, ThreadDispatcher};
#[cfg(feature = "tokio-runtime")]
pub use tokio_spawner::TokioDispatcher;
