//! Timer state machine and handles.
//!
//! A timer moves through `ARMED → FIRING → (ARMED | FIRED)` as occurrences run,
//! or to `CANCELLED` from `ARMED` (and from `FIRING` for recurring timers).
//! The executing context must win the `ARMED → FIRING` claim before it may run
//! the callback, so a cancel and a fire can never both succeed for the same
//! occurrence.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::core::executor::panic_message;

/// Identifier of a scheduled timer, unique per wheel.
pub type TimerId = u64;

const ARMED: u8 = 0;
const FIRING: u8 = 1;
const FIRED: u8 = 2;
const CANCELLED: u8 = 3;

pub(crate) enum Callback {
    Once(Mutex<Option<Box<dyn FnOnce() + Send>>>),
    Repeat(Box<dyn Fn() + Send + Sync>),
}

/// Recurrence of a periodic timer, in nanoseconds since the wheel started.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Recurrence {
    /// When the timer was scheduled; occurrence `n` is due at
    /// `origin + n * period`.
    pub origin: u128,
    pub period: u128,
}

pub(crate) struct TimerInner {
    id: TimerId,
    state: AtomicU8,
    callback: Callback,
    recurrence: Option<Recurrence>,
}

impl TimerInner {
    pub fn once(id: TimerId, callback: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            id,
            state: AtomicU8::new(ARMED),
            callback: Callback::Once(Mutex::new(Some(callback))),
            recurrence: None,
        }
    }

    pub fn recurring(
        id: TimerId,
        callback: Box<dyn Fn() + Send + Sync>,
        recurrence: Recurrence,
    ) -> Self {
        Self {
            id,
            state: AtomicU8::new(ARMED),
            callback: Callback::Repeat(callback),
            recurrence: Some(recurrence),
        }
    }

    pub const fn id(&self) -> TimerId {
        self.id
    }

    pub const fn recurrence(&self) -> Option<Recurrence> {
        self.recurrence
    }

    /// Whether the timer can never fire again.
    pub fn is_finished(&self) -> bool {
        matches!(self.state.load(Ordering::Acquire), FIRED | CANCELLED)
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    /// Move the timer to `CANCELLED`. Returns whether this call did so.
    ///
    /// A one-shot timer whose occurrence has already been claimed is left alone;
    /// a recurring timer is cancelled even mid-fire so no later occurrence runs.
    pub fn cancel(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let cancellable = match current {
                ARMED => true,
                FIRING => self.recurrence.is_some(),
                _ => false,
            };
            if !cancellable {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                CANCELLED,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        if let Callback::Once(slot) = &self.callback {
            drop(slot.lock().take());
        }
        true
    }

    /// Claim and run one occurrence. Returns whether the callback ran.
    pub fn fire(&self) -> bool {
        if self
            .state
            .compare_exchange(ARMED, FIRING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(timer_id = self.id, "occurrence not claimed (cancelled or still running)");
            return false;
        }

        match &self.callback {
            Callback::Once(slot) => {
                let callback = slot.lock().take();
                if let Some(callback) = callback {
                    self.run_guarded(callback);
                }
                let _ = self
                    .state
                    .compare_exchange(FIRING, FIRED, Ordering::AcqRel, Ordering::Acquire);
            }
            Callback::Repeat(callback) => {
                self.run_guarded(|| callback());
                // Fails if cancelled meanwhile; the timer then stays cancelled.
                let _ = self
                    .state
                    .compare_exchange(FIRING, ARMED, Ordering::AcqRel, Ordering::Acquire);
            }
        }
        true
    }

    fn run_guarded<F: FnOnce()>(&self, callback: F) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
            error!(
                timer_id = self.id,
                panic = %panic_message(payload.as_ref()),
                "timer callback panicked"
            );
        }
    }
}

/// Handle to a scheduled timer.
///
/// Dropping the handle does not cancel the timer.
#[derive(Clone)]
pub struct TimerHandle {
    inner: Arc<TimerInner>,
}

impl TimerHandle {
    pub(crate) const fn new(inner: Arc<TimerInner>) -> Self {
        Self { inner }
    }

    /// Identifier of the timer.
    #[must_use]
    pub fn id(&self) -> TimerId {
        self.inner.id()
    }

    /// Whether the timer was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Whether the timer can never fire again (fired one-shot or cancelled).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Whether the timer was created with `schedule_recurring`.
    #[must_use]
    pub fn is_recurring(&self) -> bool {
        self.inner.recurrence().is_some()
    }

    /// Cancel the timer. Idempotent; returns whether this call cancelled it.
    ///
    /// Once this returns, the callback is never started again.
    pub fn cancel(&self) -> bool {
        self.inner.cancel()
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("id", &self.id())
            .field("recurring", &self.is_recurring())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
