//! Work units, the `Job` abstraction, and failure reporting.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use super::PoolError;

/// Identifier assigned to a unit when a pool admits it.
pub type UnitId = u64;

/// A single piece of opaque work.
///
/// Any `FnOnce() -> anyhow::Result<()>` closure is a `Job`, so callers rarely
/// implement this by hand.
///
/// # Example
///
/// ```rust,ignore
/// use ingest_runtime::core::WorkUnit;
///
/// let unit = WorkUnit::new(move || {
///     let rows = parse(&message)?;
///     writer.push(rows);
///     Ok(())
/// })
/// .with_label("parse:topic-a");
/// ```
pub trait Job: Send + 'static {
    /// Consume the job and run it to completion on the calling thread.
    ///
    /// # Errors
    ///
    /// Whatever the job itself reports; the pool forwards it to the failure hook.
    fn run(self: Box<Self>) -> anyhow::Result<()>;
}

impl<F> Job for F
where
    F: FnOnce() -> anyhow::Result<()> + Send + 'static,
{
    fn run(self: Box<Self>) -> anyhow::Result<()> {
        (*self)()
    }
}

/// A job plus the caller-side metadata that travels with it.
pub struct WorkUnit {
    job: Box<dyn Job>,
    label: Option<String>,
    deadline: Option<Instant>,
}

impl WorkUnit {
    /// Wrap a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        Self::from_job(f)
    }

    /// Wrap any [`Job`] implementation.
    pub fn from_job<J: Job>(job: J) -> Self {
        Self {
            job: Box::new(job),
            label: None,
            deadline: None,
        }
    }

    /// Attach a label used in logs and failure reports.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Skip execution if no slot frees up before `deadline`.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Label, if any.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Start deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) fn admit(self, id: UnitId) -> AdmittedUnit {
        AdmittedUnit {
            meta: UnitMeta {
                id,
                label: self.label,
                submitted_at: Instant::now(),
                deadline: self.deadline,
            },
            job: self.job,
        }
    }
}

impl fmt::Debug for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkUnit")
            .field("label", &self.label)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

/// Metadata recorded for an admitted unit.
#[derive(Debug, Clone)]
pub struct UnitMeta {
    /// Pool-local identifier.
    pub id: UnitId,
    /// Caller-supplied label.
    pub label: Option<String>,
    /// When the pool admitted the unit.
    pub submitted_at: Instant,
    /// Latest acceptable start time.
    pub deadline: Option<Instant>,
}

/// A unit that holds a slot or a queue position.
pub(crate) struct AdmittedUnit {
    pub meta: UnitMeta,
    pub job: Box<dyn Job>,
}

impl AdmittedUnit {
    /// Give the caller back a unit the pool could not hand to a worker.
    pub fn into_unit(self) -> WorkUnit {
        WorkUnit {
            job: self.job,
            label: self.meta.label,
            deadline: self.meta.deadline,
        }
    }
}

/// Why a unit did not complete successfully.
#[derive(Debug, Error)]
pub enum FailureKind {
    /// The job returned an error.
    #[error("unit returned an error: {0:#}")]
    Error(anyhow::Error),
    /// The job panicked; the payload message is kept.
    #[error("unit panicked: {0}")]
    Panic(String),
    /// No slot became free before the unit's start deadline.
    #[error("start deadline expired before a slot was free")]
    DeadlineExpired,
    /// The unit was queued when the pool shut down without draining.
    #[error("discarded by shutdown before it started")]
    Cancelled,
    /// The unit was never admitted; deferred resubmission gave up.
    #[error("rejected after {attempts} attempts: {reason}")]
    Rejected {
        /// Submission attempts made, including the first.
        attempts: u32,
        /// The last rejection.
        reason: PoolError,
    },
}

/// A failure report delivered to the pool's hook.
#[derive(Debug)]
pub struct UnitFailure {
    /// Name of the pool the unit belonged to.
    pub pool: String,
    /// Identifier, if the unit was ever admitted.
    pub unit_id: Option<UnitId>,
    /// Caller-supplied label.
    pub label: Option<String>,
    /// What went wrong.
    pub kind: FailureKind,
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.pool)?;
        if let Some(id) = self.unit_id {
            write!(f, " unit {id}")?;
        }
        if let Some(label) = &self.label {
            write!(f, " ({label})")?;
        }
        write!(f, ": {}", self.kind)
    }
}

/// Caller-supplied callback invoked for every failed, expired, discarded, or
/// abandoned unit.
pub type FailureHook = Arc<dyn Fn(&UnitFailure) + Send + Sync>;

/// Default hook: log the failure and move on.
pub fn log_failure(failure: &UnitFailure) {
    tracing::error!(
        pool = %failure.pool,
        unit_id = ?failure.unit_id,
        label = ?failure.label,
        error = %failure.kind,
        "work unit failed"
    );
}

/// Default hook as a shareable `FailureHook`.
#[must_use]
pub fn default_failure_hook() -> FailureHook {
    Arc::new(log_failure)
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_is_job() {
        let job: Box<dyn Job> = Box::new(|| -> anyhow::Result<()> { Ok(()) });
        assert!(job.run().is_ok());

        let failing: Box<dyn Job> =
            Box::new(|| -> anyhow::Result<()> { Err(anyhow::anyhow!("bad row")) });
        assert_eq!(failing.run().unwrap_err().to_string(), "bad row");
    }

    #[test]
    fn test_admit_round_trip_keeps_metadata() {
        let deadline = Instant::now();
        let unit = WorkUnit::new(|| Ok(()))
            .with_label("write:batch-7")
            .with_deadline(deadline);

        let admitted = unit.admit(42);
        assert_eq!(admitted.meta.id, 42);
        assert_eq!(admitted.meta.label.as_deref(), Some("write:batch-7"));

        let back = admitted.into_unit();
        assert_eq!(back.label(), Some("write:batch-7"));
        assert_eq!(back.deadline(), Some(deadline));
    }

    #[test]
    fn test_failure_display() {
        let failure = UnitFailure {
            pool: "parsing".into(),
            unit_id: Some(3),
            label: Some("msg-9".into()),
            kind: FailureKind::Panic("index out of bounds".into()),
        };
        assert_eq!(
            failure.to_string(),
            "[parsing] unit 3 (msg-9): unit panicked: index out of bounds"
        );

        let rejected = UnitFailure {
            pool: "writing".into(),
            unit_id: None,
            label: None,
            kind: FailureKind::Rejected {
                attempts: 4,
                reason: PoolError::ShutDown,
            },
        };
        assert_eq!(
            rejected.to_string(),
            "[writing]: rejected after 4 attempts: pool has been shut down"
        );
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
