//! Shared hashed timing wheel for delayed and periodic callbacks.
//!
//! One driver thread advances the wheel by one bucket every `tick_interval`.
//! Timers are hashed into buckets by their absolute deadline tick; timers
//! further out than one revolution carry a rotation counter. Due callbacks are
//! handed to a [`Dispatch`] implementation and never run on the driver thread.
//!
//! # Accuracy
//!
//! Tick `n` is processed no earlier than `start + n * tick_interval`, and a
//! timer is placed on the first tick at or after its deadline, so a callback
//! fires between `delay` and `delay + tick_interval` after scheduling (plus
//! dispatch latency). A driver that wakes late catches up on every missed tick.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use ingest_runtime::core::TimingWheel;
//!
//! let wheel = TimingWheel::new(Duration::from_millis(100))?;
//! let timeout = wheel.schedule(Duration::from_secs(5), || tracing::warn!("ack timed out"))?;
//! let flush = wheel.schedule_recurring(Duration::from_secs(1), move || batcher.flush())?;
//!
//! wheel.cancel(&timeout);
//! wheel.stop();
//! ```

mod buckets;
mod timer;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::config::WheelConfig;
use crate::core::WheelError;
use crate::runtime::dispatch::{Dispatch, ThreadDispatcher};

use self::buckets::{Buckets, Entry};
use self::timer::{Recurrence, TimerInner};

pub use self::timer::{TimerHandle, TimerId};

/// Upper bound on the bucket count.
const MAX_BUCKETS: usize = 1 << 20;

struct WheelShared {
    tick_interval: Duration,
    tick_nanos: u128,
    start: Instant,
    buckets: Mutex<Buckets>,
    dispatcher: Arc<dyn Dispatch>,
    stopped: AtomicBool,
    next_id: AtomicU64,
}

/// Hashed timing wheel with a single driver thread.
pub struct TimingWheel {
    shared: Arc<WheelShared>,
    stop_tx: Mutex<Option<Sender<()>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl TimingWheel {
    /// Create a wheel with `tick_interval` and default bucket and dispatch sizing.
    ///
    /// # Errors
    ///
    /// `WheelError::InvalidConfig` for a zero tick interval, `WheelError::Internal`
    /// if the driver or dispatch threads cannot be spawned.
    pub fn new(tick_interval: Duration) -> Result<Self, WheelError> {
        let defaults = WheelConfig::default();
        let dispatcher = spawn_thread_dispatcher(defaults.dispatch_threads)?;
        Self::with_dispatcher(tick_interval, defaults.buckets, dispatcher)
    }

    /// Create a wheel from configuration, dispatching on dedicated threads.
    ///
    /// # Errors
    ///
    /// Same as [`TimingWheel::new`].
    pub fn with_config(config: &WheelConfig) -> Result<Self, WheelError> {
        config.validate().map_err(WheelError::InvalidConfig)?;
        let dispatcher = spawn_thread_dispatcher(config.dispatch_threads)?;
        Self::with_dispatcher(config.tick_interval(), config.buckets, dispatcher)
    }

    /// Create a wheel that runs due callbacks through `dispatcher`.
    ///
    /// # Errors
    ///
    /// `WheelError::InvalidConfig` for a zero tick interval or a bucket count of
    /// zero or above 2^20, `WheelError::Internal` if the driver cannot be spawned.
    pub fn with_dispatcher(
        tick_interval: Duration,
        buckets: usize,
        dispatcher: Arc<dyn Dispatch>,
    ) -> Result<Self, WheelError> {
        if tick_interval.is_zero() {
            return Err(WheelError::InvalidConfig(
                "tick_interval must be greater than 0".into(),
            ));
        }
        if buckets == 0 || buckets > MAX_BUCKETS {
            return Err(WheelError::InvalidConfig(format!(
                "buckets must be between 1 and {MAX_BUCKETS}, got {buckets}"
            )));
        }

        let shared = Arc::new(WheelShared {
            tick_interval,
            tick_nanos: tick_interval.as_nanos(),
            start: Instant::now(),
            buckets: Mutex::new(Buckets::new(buckets)),
            dispatcher,
            stopped: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        });

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let driver_shared = Arc::clone(&shared);
        let driver = thread::Builder::new()
            .name("timing-wheel-driver".into())
            .spawn(move || run_driver(&driver_shared, &stop_rx))
            .map_err(|e| WheelError::Internal(format!("failed to spawn driver: {e}")))?;

        info!(
            tick_interval_ms = u64::try_from(tick_interval.as_millis()).unwrap_or(u64::MAX),
            buckets = shared.buckets.lock().bucket_count(),
            "TimingWheel started"
        );

        Ok(Self {
            shared,
            stop_tx: Mutex::new(Some(stop_tx)),
            driver: Mutex::new(Some(driver)),
        })
    }

    /// Run `callback` once, `delay` from now (within one tick).
    ///
    /// # Errors
    ///
    /// `WheelError::Stopped` after [`TimingWheel::stop`],
    /// `WheelError::InvalidSchedule` if the deadline overflows the tick counter.
    pub fn schedule<F>(&self, delay: Duration, callback: F) -> Result<TimerHandle, WheelError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ensure_running()?;
        let deadline = self.now_offset() + delay.as_nanos();
        let deadline_tick = self.tick_at(deadline)?;
        let timer = Arc::new(TimerInner::once(self.next_id(), Box::new(callback)));
        self.insert(timer, deadline_tick, 0)
    }

    /// Run `callback` once at `deadline` (within one tick).
    ///
    /// # Errors
    ///
    /// `WheelError::InvalidSchedule` if `deadline` is already in the past,
    /// `WheelError::Stopped` after [`TimingWheel::stop`].
    pub fn schedule_at<F>(&self, deadline: Instant, callback: F) -> Result<TimerHandle, WheelError>
    where
        F: FnOnce() + Send + 'static,
    {
        let now = Instant::now();
        let Some(delay) = deadline.checked_duration_since(now) else {
            return Err(WheelError::InvalidSchedule(format!(
                "deadline is {:?} in the past",
                now.duration_since(deadline)
            )));
        };
        self.schedule(delay, callback)
    }

    /// Run `callback` every `period` until cancelled.
    ///
    /// Occurrence `n` is due `n * period` after this call, so rounding to ticks
    /// does not accumulate. An occurrence that comes due while the previous one
    /// is still running is skipped. Periods shorter than one tick fire at most
    /// once per tick.
    ///
    /// # Errors
    ///
    /// `WheelError::InvalidSchedule` for a zero period or an overflowing deadline,
    /// `WheelError::Stopped` after [`TimingWheel::stop`].
    pub fn schedule_recurring<F>(
        &self,
        period: Duration,
        callback: F,
    ) -> Result<TimerHandle, WheelError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        if period.is_zero() {
            return Err(WheelError::InvalidSchedule(
                "period must be greater than 0".into(),
            ));
        }
        self.ensure_running()?;
        let recurrence = Recurrence {
            origin: self.now_offset(),
            period: period.as_nanos(),
        };
        let deadline_tick = self.tick_at(recurrence.origin + recurrence.period)?;
        let timer = Arc::new(TimerInner::recurring(
            self.next_id(),
            Box::new(callback),
            recurrence,
        ));
        self.insert(timer, deadline_tick, 1)
    }

    /// Cancel a timer. Idempotent; returns whether this call cancelled it.
    ///
    /// After this returns the callback is never started again, even if its
    /// tick is being processed concurrently. A one-shot callback that already
    /// started is not interrupted.
    pub fn cancel(&self, handle: &TimerHandle) -> bool {
        let cancelled = handle.cancel();
        if cancelled {
            debug!(timer_id = handle.id(), "timer cancelled");
        }
        cancelled
    }

    /// Halt the driver and wait for it to exit. Idempotent.
    ///
    /// No tick is processed after this returns. Callbacks already handed to
    /// the dispatcher may still complete; timers still on the wheel are
    /// dropped without running.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        // Dropping the sender wakes the driver immediately.
        drop(self.stop_tx.lock().take());

        let driver = self.driver.lock().take();
        if let Some(driver) = driver {
            if driver.join().is_err() {
                warn!("timing wheel driver panicked");
            }
            let abandoned = self.shared.buckets.lock().drain_all();
            self.shared.dispatcher.close();
            info!(abandoned_timers = abandoned.len(), "TimingWheel stopped");
            // Callbacks are dropped outside the bucket lock.
            drop(abandoned);
        }
    }

    /// Duration of one tick.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        self.shared.tick_interval
    }

    /// Number of buckets (a power of two).
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.shared.buckets.lock().bucket_count()
    }

    /// Timers held by the wheel, including cancelled ones not yet swept.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.shared.buckets.lock().len()
    }

    /// Ticks processed since the wheel started.
    #[must_use]
    pub fn current_tick(&self) -> u64 {
        self.shared.buckets.lock().current_tick()
    }

    /// Whether [`TimingWheel::stop`] has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    fn ensure_running(&self) -> Result<(), WheelError> {
        if self.is_stopped() {
            Err(WheelError::Stopped)
        } else {
            Ok(())
        }
    }

    fn next_id(&self) -> TimerId {
        self.shared.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn now_offset(&self) -> u128 {
        self.shared.start.elapsed().as_nanos()
    }

    /// First tick at or after `offset` nanoseconds since start.
    fn tick_at(&self, offset: u128) -> Result<u64, WheelError> {
        u64::try_from(offset.div_ceil(self.shared.tick_nanos))
            .map_err(|_| WheelError::InvalidSchedule("deadline overflows the wheel".into()))
    }

    fn insert(
        &self,
        timer: Arc<TimerInner>,
        deadline_tick: u64,
        occurrence: u64,
    ) -> Result<TimerHandle, WheelError> {
        let handle = TimerHandle::new(Arc::clone(&timer));
        {
            let mut buckets = self.shared.buckets.lock();
            // Re-checked under the lock so nothing lands after `stop` drained.
            self.ensure_running()?;
            buckets.insert(timer, deadline_tick, occurrence);
        }
        trace!(timer_id = handle.id(), deadline_tick, "timer scheduled");
        Ok(handle)
    }
}

impl Drop for TimingWheel {
    fn drop(&mut self) {
        // Signal the driver but don't join it here.
        self.shared.stopped.store(true, Ordering::Release);
        drop(self.stop_tx.lock().take());
        self.shared.dispatcher.close();
    }
}

fn spawn_thread_dispatcher(threads: usize) -> Result<Arc<dyn Dispatch>, WheelError> {
    ThreadDispatcher::new("wheel-dispatch", threads)
        .map(|d| Arc::new(d) as Arc<dyn Dispatch>)
        .map_err(|e| WheelError::Internal(format!("failed to spawn dispatch threads: {e}")))
}

/// Driver loop: sleep until the next tick boundary, then process every tick
/// that has elapsed.
fn run_driver(shared: &WheelShared, stop_rx: &Receiver<()>) {
    debug!("timing wheel driver started");
    let mut due: Vec<Entry> = Vec::new();
    let mut fire: Vec<Arc<TimerInner>> = Vec::new();
    let mut processed = 0_u64;

    loop {
        let next_boundary = shared.tick_nanos * u128::from(processed + 1);
        let wait = next_boundary.saturating_sub(shared.start.elapsed().as_nanos());
        let wait = Duration::from_nanos(u64::try_from(wait).unwrap_or(u64::MAX));

        match stop_rx.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        if shared.stopped.load(Ordering::Acquire) {
            break;
        }

        let target = shared.start.elapsed().as_nanos() / shared.tick_nanos;
        let target = u64::try_from(target).unwrap_or(u64::MAX);
        if target <= processed {
            continue;
        }

        {
            let mut buckets = shared.buckets.lock();
            while buckets.current_tick() < target {
                buckets.advance(&mut due);
                let tick = buckets.current_tick();
                for entry in due.drain(..) {
                    if let Some(recurrence) = entry.timer.recurrence() {
                        let (occurrence, deadline_tick) =
                            next_occurrence(recurrence, entry.occurrence, tick, shared.tick_nanos);
                        buckets.insert(Arc::clone(&entry.timer), deadline_tick, occurrence);
                    }
                    fire.push(entry.timer);
                }
            }
            processed = buckets.current_tick();
        }

        if target > processed + 1 {
            trace!(ticks = target - processed, "driver caught up on missed ticks");
        }

        for timer in fire.drain(..) {
            trace!(timer_id = timer.id(), tick = processed, "dispatching timer");
            shared.dispatcher.dispatch(Box::new(move || {
                timer.fire();
            }));
        }
    }

    debug!(tick = processed, "timing wheel driver exiting");
}

/// Next occurrence of a recurring timer that falls strictly after `tick`.
///
/// Returns the occurrence number and its deadline tick.
fn next_occurrence(
    recurrence: Recurrence,
    fired_occurrence: u64,
    tick: u64,
    tick_nanos: u128,
) -> (u64, u64) {
    // Smallest n with origin + n * period > tick * tick_nanos.
    let elapsed = (u128::from(tick) * tick_nanos).saturating_sub(recurrence.origin);
    let first_future = u64::try_from(elapsed / recurrence.period + 1).unwrap_or(u64::MAX);
    let occurrence = first_future.max(fired_occurrence.saturating_add(1));

    let offset = recurrence.origin + u128::from(occurrence) * recurrence.period;
    let deadline_tick = u64::try_from(offset.div_ceil(tick_nanos)).unwrap_or(u64::MAX);
    (occurrence, deadline_tick)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_occurrence_exact_multiple() {
        let recurrence = Recurrence {
            origin: 0,
            period: 30,
        };
        // Tick = 10ns, period = 3 ticks: occurrence 1 at tick 3, 2 at tick 6.
        assert_eq!(next_occurrence(recurrence, 1, 3, 10), (2, 6));
        assert_eq!(next_occurrence(recurrence, 2, 6, 10), (3, 9));
    }

    #[test]
    fn test_next_occurrence_does_not_drift() {
        let recurrence = Recurrence {
            origin: 5,
            period: 25,
        };
        // Occurrences at 30, 55, 80, 105ns -> ticks 3, 6, 8, 11.
        let (n2, t2) = next_occurrence(recurrence, 1, 3, 10);
        assert_eq!((n2, t2), (2, 6));
        let (n3, t3) = next_occurrence(recurrence, n2, t2, 10);
        assert_eq!((n3, t3), (3, 8));
        let (n4, t4) = next_occurrence(recurrence, n3, t3, 10);
        assert_eq!((n4, t4), (4, 11));
    }

    #[test]
    fn test_next_occurrence_skips_when_period_shorter_than_tick() {
        let recurrence = Recurrence {
            origin: 0,
            period: 3,
        };
        // At tick 1 (10ns) occurrences 1..=3 are past; next is 4 at 12ns -> tick 2.
        assert_eq!(next_occurrence(recurrence, 1, 1, 10), (4, 2));
    }

    #[test]
    fn test_zero_tick_interval_rejected() {
        let dispatcher = spawn_thread_dispatcher(1).unwrap();
        let err = TimingWheel::with_dispatcher(Duration::ZERO, 8, dispatcher)
            .err()
            .unwrap();
        assert!(matches!(err, WheelError::InvalidConfig(_)));
    }

    #[test]
    fn test_bucket_bounds_rejected() {
        let dispatcher = spawn_thread_dispatcher(1).unwrap();
        assert!(
            TimingWheel::with_dispatcher(Duration::from_millis(1), 0, Arc::clone(&dispatcher))
                .is_err()
        );
        assert!(
            TimingWheel::with_dispatcher(Duration::from_millis(1), MAX_BUCKETS + 1, dispatcher)
                .is_err()
        );
    }

    #[test]
    fn test_stop_is_idempotent_and_rejects_schedules() {
        let wheel = TimingWheel::new(Duration::from_millis(5)).unwrap();
        wheel.stop();
        wheel.stop();
        assert!(wheel.is_stopped());
        assert!(matches!(
            wheel.schedule(Duration::from_millis(1), || {}),
            Err(WheelError::Stopped)
        ));
    }

    #[test]
    fn test_stop_drops_pending_timers() {
        struct Flag(Arc<AtomicBool>);
        impl Drop for Flag {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicBool::new(false));
        let flag = Flag(Arc::clone(&dropped));
        let wheel = TimingWheel::new(Duration::from_millis(5)).unwrap();
        wheel
            .schedule(Duration::from_secs(60), move || {
                let _keep = &flag;
            })
            .unwrap();
        assert_eq!(wheel.pending_timers(), 1);

        wheel.stop();
        assert_eq!(wheel.pending_timers(), 0);
        assert!(dropped.load(Ordering::SeqCst));
    }
}
