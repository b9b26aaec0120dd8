//! The process-wide runtime: one timing wheel and two worker pools.
//!
//! `RuntimeContext` is created once at startup and cloned into every component
//! that needs a pool or the wheel. There is no global lookup; a component that
//! was not handed a context cannot reach the pools.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::builders::RuntimeBuilder;
use crate::config::RuntimeConfig;
use crate::core::{
    FailureKind, PoolError, Rejected, RuntimeError, TimingWheel, UnitId, WheelError, WorkUnit,
    WorkerPool,
};

/// Which of the two shared pools a unit targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    /// CPU-bound message parsing.
    Parsing,
    /// CPU/network-balanced writes to the downstream store.
    Writing,
}

impl PoolKind {
    /// Pool name used in logs and failure reports.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Parsing => "parsing",
            Self::Writing => "writing",
        }
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Backoff used by [`RuntimeContext::submit_with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Resubmissions after the first attempt before giving up.
    pub max_retries: u32,
    /// Delay before the first resubmission.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before resubmission number `retry` (1-based), doubling each time.
    #[must_use]
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.initial_backoff
            .checked_mul(1_u32 << exponent)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

/// Outcome of [`RuntimeContext::submit_with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// The pool admitted the unit immediately.
    Admitted(UnitId),
    /// The pool was saturated; a resubmission is scheduled on the wheel.
    Deferred {
        /// Delay before the first resubmission.
        retry_in: Duration,
    },
}

/// Shared timing wheel plus the parsing and writing pools.
///
/// Cloning is cheap and shares the same underlying components.
#[derive(Clone)]
pub struct RuntimeContext {
    wheel: Arc<TimingWheel>,
    parsing: Arc<WorkerPool>,
    writing: Arc<WorkerPool>,
}

impl RuntimeContext {
    /// Build the runtime from configuration with the default failure hook.
    ///
    /// # Errors
    ///
    /// Any construction error; treat it as fatal to startup.
    pub fn init(config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        RuntimeBuilder::new(config.clone()).build()
    }

    /// Assemble a context from components built elsewhere.
    #[must_use]
    pub const fn from_parts(
        wheel: Arc<TimingWheel>,
        parsing: Arc<WorkerPool>,
        writing: Arc<WorkerPool>,
    ) -> Self {
        Self {
            wheel,
            parsing,
            writing,
        }
    }

    /// The shared timing wheel.
    #[must_use]
    pub const fn timer_wheel(&self) -> &Arc<TimingWheel> {
        &self.wheel
    }

    /// The CPU-bound parsing pool.
    #[must_use]
    pub const fn parsing_pool(&self) -> &Arc<WorkerPool> {
        &self.parsing
    }

    /// The CPU/network-balanced writing pool.
    #[must_use]
    pub const fn writing_pool(&self) -> &Arc<WorkerPool> {
        &self.writing
    }

    /// Pool for `kind`.
    #[must_use]
    pub const fn pool(&self, kind: PoolKind) -> &Arc<WorkerPool> {
        match kind {
            PoolKind::Parsing => &self.parsing,
            PoolKind::Writing => &self.writing,
        }
    }

    /// Submit to `kind`, deferring on overload instead of failing.
    ///
    /// If the pool is saturated, the unit is resubmitted from the timing wheel
    /// with exponential backoff. When `policy.max_retries` resubmissions are all
    /// rejected, or the pool shuts down meanwhile, the unit is dropped and
    /// reported to the pool's failure hook as `FailureKind::Rejected`.
    ///
    /// # Errors
    ///
    /// `PoolError::ShutDown` (or another non-overload pool error) from the first
    /// attempt, or a wheel error if the resubmission cannot be scheduled. In
    /// both cases the unit is dropped without a failure-hook report.
    pub fn submit_with_retry(
        &self,
        kind: PoolKind,
        unit: WorkUnit,
        policy: RetryPolicy,
    ) -> Result<Submission, RuntimeError> {
        let pool = self.pool(kind);
        match pool.try_submit(unit) {
            Ok(unit_id) => Ok(Submission::Admitted(unit_id)),
            Err(Rejected {
                error: PoolError::Overloaded { .. },
                unit,
            }) if policy.max_retries > 0 => {
                let retry_in = policy.backoff_for(1);
                // The caller learns of the loss from the error; the hook is not called.
                defer_submission(Arc::clone(pool), &self.wheel, unit, policy, 1)
                    .map_err(|(err, _unit)| err)?;
                debug!(pool = %kind, retry_in = ?retry_in, "submission deferred");
                Ok(Submission::Deferred { retry_in })
            }
            Err(rejected) => Err(rejected.error.into()),
        }
    }

    /// Shut the runtime down: parsing pool, then writing pool, then the wheel.
    ///
    /// Parsing drains first because its units feed the writing pool. Retries
    /// that fire after their pool closed are reported to the failure hook.
    ///
    /// # Errors
    ///
    /// The first pool error; the remaining components are still shut down.
    pub fn shutdown(&self, drain: bool) -> Result<(), RuntimeError> {
        info!(drain, "Shutting down runtime");
        let parsing = self.parsing.shutdown(drain);
        let writing = self.writing.shutdown(drain);
        self.wheel.stop();
        parsing?;
        writing?;
        Ok(())
    }
}

/// A unit waiting on the wheel for resubmission.
///
/// If the timer is discarded before it fires (the wheel stopped), the unit is
/// reported to the pool's failure hook on drop.
struct DeferredUnit {
    pool: Arc<WorkerPool>,
    unit: Option<WorkUnit>,
    retry: u32,
}

impl Drop for DeferredUnit {
    fn drop(&mut self) {
        if let Some(unit) = self.unit.take() {
            self.pool.report_failure(
                unit.label().map(str::to_owned),
                FailureKind::Rejected {
                    attempts: self.retry,
                    reason: PoolError::ShutDown,
                },
            );
        }
    }
}

/// Schedule resubmission number `retry` of `unit` on the wheel.
///
/// If the wheel refuses the timer, the unit is handed back unreported.
fn defer_submission(
    pool: Arc<WorkerPool>,
    wheel: &Arc<TimingWheel>,
    unit: WorkUnit,
    policy: RetryPolicy,
    retry: u32,
) -> Result<(), (WheelError, Option<WorkUnit>)> {
    let weak_wheel: Weak<TimingWheel> = Arc::downgrade(wheel);
    // Shared with the timer callback so a refused schedule can disarm the guard.
    let slot = Arc::new(Mutex::new(Some(DeferredUnit {
        pool,
        unit: Some(unit),
        retry,
    })));
    let armed = Arc::clone(&slot);
    let scheduled = wheel.schedule(policy.backoff_for(retry), move || {
        let deferred = armed.lock().take();
        if let Some(mut deferred) = deferred {
            if let Some(unit) = deferred.unit.take() {
                resubmit(&deferred.pool, &weak_wheel, unit, policy, retry);
            }
        }
    });
    match scheduled {
        Ok(_) => Ok(()),
        Err(err) => {
            let unit = slot.lock().take().and_then(|mut deferred| deferred.unit.take());
            Err((err, unit))
        }
    }
}

fn resubmit(
    pool: &Arc<WorkerPool>,
    wheel: &Weak<TimingWheel>,
    unit: WorkUnit,
    policy: RetryPolicy,
    retry: u32,
) {
    let attempts = retry + 1;
    let (reason, unit) = match pool.try_submit(unit) {
        Ok(unit_id) => {
            debug!(pool = %pool.name(), unit_id, attempts, "deferred unit admitted");
            return;
        }
        Err(Rejected { error, unit }) => (error, unit),
    };

    if reason.is_overload() && retry < policy.max_retries {
        if let Some(wheel) = wheel.upgrade() {
            let Err((err, unit)) =
                defer_submission(Arc::clone(pool), &wheel, unit, policy, retry + 1)
            else {
                return;
            };
            warn!(pool = %pool.name(), error = %err, "could not reschedule deferred unit");
            if let Some(unit) = unit {
                pool.report_failure(
                    unit.label().map(str::to_owned),
                    FailureKind::Rejected {
                        attempts,
                        reason: PoolError::ShutDown,
                    },
                );
            }
            return;
        }
    }

    pool.report_failure(
        unit.label().map(str::to_owned),
        FailureKind::Rejected { attempts, reason },
    );
}
