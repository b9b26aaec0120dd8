//! # Ingest Runtime
//!
//! Concurrency plumbing for a data-ingestion pipeline: bounded worker pools
//! that push back when saturated, and one shared hashed timing wheel for
//! timeouts and periodic jobs.
//!
//! ## Core Problem Solved
//!
//! Unbounded spawning lets a burst of messages exhaust memory and threads long
//! before anything downstream notices. Here every unit of work passes through a
//! pool with a fixed number of execution slots and a fixed-length waiting
//! queue; past that, submission fails fast with `PoolError::Overloaded` and the
//! caller decides whether to retry, defer or drop.
//!
//! ## Key Features
//!
//! - **Bounded admission**: at most `capacity` units run and `queue_limit` wait
//! - **FIFO hand-off**: a finishing worker picks up the oldest waiting unit
//! - **Failure isolation**: errors and panics in a unit reach a failure hook,
//!   never the pool
//! - **Timing wheel**: O(1) schedule and cancel for one-shot and recurring timers
//! - **Runtime context**: one wheel plus a `parsing` and a `writing` pool,
//!   built once from configuration and passed to components explicitly
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use ingest_runtime::config::RuntimeConfig;
//! use ingest_runtime::core::WorkUnit;
//! use ingest_runtime::runtime::{PoolKind, RetryPolicy, RuntimeContext};
//!
//! ingest_runtime::util::init_tracing();
//! let runtime = RuntimeContext::init(&RuntimeConfig::from_env()?)?;
//!
//! runtime
//!     .parsing_pool()
//!     .submit(WorkUnit::new(move || parse(batch)).with_label("batch-42"))?;
//!
//! runtime.submit_with_retry(
//!     PoolKind::Writing,
//!     WorkUnit::new(move || store.write(rows)),
//!     RetryPolicy::default(),
//! )?;
//!
//! let flush = runtime
//!     .timer_wheel()
//!     .schedule_recurring(Duration::from_secs(5), move || batcher.flush())?;
//!
//! // ...
//! flush.cancel();
//! runtime.shutdown(true)?;
//! ```
//!
//! For complete examples, see:
//! - `tests/worker_pool_test.rs` - admission, ordering and shutdown
//! - `tests/timing_wheel_test.rs` - timer accuracy and cancellation
//! - `tests/runtime_context_test.rs` - the assembled runtime

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Worker pool, timing wheel, work units and error types.
pub mod core;
/// Configuration models for the wheel and the pools.
pub mod config;
/// Builders to construct the runtime from configuration.
pub mod builders;
/// The runtime context and timer dispatch contexts.
pub mod runtime;
/// Shared utilities.
pub mod util;
