//! Integration tests for TimingWheel
//!
//! Covers firing accuracy, cancellation races, recurring timers and
//! dispatch isolation.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded};
use ingest_runtime::config::WheelConfig;
use ingest_runtime::core::{TimerHandle, TimingWheel, WheelError};
use parking_lot::Mutex;

/// Allowance for scheduler jitter on loaded machines.
const SLACK: Duration = Duration::from_millis(150);

fn wheel(tick_ms: u64, buckets: usize) -> TimingWheel {
    TimingWheel::with_config(&WheelConfig {
        tick_interval_ms: tick_ms,
        buckets,
        dispatch_threads: 1,
    })
    .expect("Failed to create wheel")
}

#[test]
fn test_one_shot_fires_within_one_tick() {
    println!("\n=== test_one_shot_fires_within_one_tick ===");

    let tick = Duration::from_millis(10);
    let wheel = wheel(10, 64);
    let (tx, rx) = unbounded();

    let delays = [50_u64, 120, 300];
    let start = Instant::now();
    for delay in delays {
        let tx = tx.clone();
        wheel
            .schedule(Duration::from_millis(delay), move || {
                let _ = tx.send((delay, Instant::now()));
            })
            .unwrap();
    }

    for _ in delays {
        let (delay, fired_at) = rx.recv_timeout(Duration::from_secs(5)).expect("timer did not fire");
        let elapsed = fired_at - start;
        let delay = Duration::from_millis(delay);
        println!("delay={delay:?} fired after {elapsed:?}");
        assert!(elapsed >= delay, "fired early: {elapsed:?} < {delay:?}");
        assert!(elapsed < delay + tick + SLACK, "fired late: {elapsed:?}");
    }

    wheel.stop();
    println!("=== test_one_shot_fires_within_one_tick PASSED ===\n");
}

#[test]
fn test_delay_beyond_one_revolution() {
    println!("\n=== test_delay_beyond_one_revolution ===");

    // 8 buckets of 5ms: a 130ms delay needs three revolutions.
    let wheel = wheel(5, 8);
    let (tx, rx) = bounded(1);
    let start = Instant::now();
    wheel
        .schedule(Duration::from_millis(130), move || {
            let _ = tx.send(Instant::now());
        })
        .unwrap();

    let elapsed = rx.recv_timeout(Duration::from_secs(5)).unwrap() - start;
    println!("Fired after {elapsed:?}");
    assert!(elapsed >= Duration::from_millis(130));
    assert!(elapsed < Duration::from_millis(135) + SLACK);

    wheel.stop();
    println!("=== test_delay_beyond_one_revolution PASSED ===\n");
}

#[test]
fn test_schedule_at() {
    let wheel = wheel(5, 64);
    let (tx, rx) = bounded(1);
    let deadline = Instant::now() + Duration::from_millis(40);
    wheel
        .schedule_at(deadline, move || {
            let _ = tx.send(Instant::now());
        })
        .unwrap();

    let fired_at = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(fired_at >= deadline);

    let past = Instant::now().checked_sub(Duration::from_millis(10)).unwrap();
    assert!(matches!(
        wheel.schedule_at(past, || {}),
        Err(WheelError::InvalidSchedule(_))
    ));
    wheel.stop();
}

#[test]
fn test_zero_period_rejected() {
    let wheel = wheel(5, 64);
    assert!(matches!(
        wheel.schedule_recurring(Duration::ZERO, || {}),
        Err(WheelError::InvalidSchedule(_))
    ));
    wheel.stop();
}

#[test]
fn test_cancel_before_deadline() {
    println!("\n=== test_cancel_before_deadline ===");

    let wheel = wheel(5, 64);
    let fired = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fired);
    let handle = wheel
        .schedule(Duration::from_millis(50), move || {
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();

    assert!(wheel.cancel(&handle));
    assert!(!wheel.cancel(&handle));
    assert!(handle.is_cancelled());

    thread::sleep(Duration::from_millis(150));
    assert!(!fired.load(Ordering::SeqCst));

    wheel.stop();
    println!("=== test_cancel_before_deadline PASSED ===\n");
}

/// A cancel and a fire never both succeed: either cancel returns true and the
/// callback never runs, or cancel returns false and it runs exactly once.
#[test]
fn test_cancel_race_has_single_winner() {
    println!("\n=== test_cancel_race_has_single_winner ===");

    let wheel = Arc::new(wheel(1, 64));
    let timers: Vec<(TimerHandle, Arc<AtomicUsize>)> = (0..200)
        .map(|_| {
            let runs = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&runs);
            let handle = wheel
                .schedule(Duration::from_millis(20), move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            (handle, runs)
        })
        .collect();

    // Cancel while the deadline tick is being processed.
    thread::sleep(Duration::from_millis(19));
    let outcomes: Vec<bool> = timers.iter().map(|(h, _)| wheel.cancel(h)).collect();

    thread::sleep(Duration::from_millis(200));
    let mut cancelled = 0;
    for ((_, runs), won) in timers.iter().zip(&outcomes) {
        let runs = runs.load(Ordering::SeqCst);
        if *won {
            cancelled += 1;
            assert_eq!(runs, 0);
        } else {
            assert_eq!(runs, 1);
        }
    }
    println!("cancelled={cancelled} fired={}", timers.len() - cancelled);

    wheel.stop();
    println!("=== test_cancel_race_has_single_winner PASSED ===\n");
}

#[test]
fn test_recurring_fire_count() {
    println!("\n=== test_recurring_fire_count ===");

    let wheel = wheel(5, 64);
    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);

    let period = Duration::from_millis(50);
    let handle = wheel
        .schedule_recurring(period, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert!(handle.is_recurring());

    let window = Duration::from_millis(600);
    thread::sleep(window);
    assert!(wheel.cancel(&handle));
    let fired = count.load(Ordering::SeqCst);
    println!("Fired {fired} times in {window:?}");

    // floor(600 / 50) - 1
    assert!(fired >= 11, "only {fired} occurrences");
    assert!(fired <= 12, "{fired} occurrences");

    thread::sleep(Duration::from_millis(150));
    assert_eq!(count.load(Ordering::SeqCst), fired);

    wheel.stop();
    println!("=== test_recurring_fire_count PASSED ===\n");
}

/// A recurring timer cancelled from its own k-th callback fires exactly k times.
#[test]
fn test_recurring_cancel_after_kth_firing() {
    println!("\n=== test_recurring_cancel_after_kth_firing ===");

    let wheel = wheel(2, 64);
    let count = Arc::new(AtomicUsize::new(0));
    let slot: Arc<Mutex<Option<TimerHandle>>> = Arc::new(Mutex::new(None));

    let counter = Arc::clone(&count);
    let own = Arc::clone(&slot);
    let handle = wheel
        .schedule_recurring(Duration::from_millis(10), move || {
            if counter.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                if let Some(me) = own.lock().as_ref() {
                    me.cancel();
                }
            }
        })
        .unwrap();
    *slot.lock() = Some(handle.clone());

    thread::sleep(Duration::from_millis(200));
    assert_eq!(count.load(Ordering::SeqCst), 3);
    assert!(handle.is_cancelled());

    slot.lock().take();
    wheel.stop();
    println!("=== test_recurring_cancel_after_kth_firing PASSED ===\n");
}

/// Schedule an 800ms callback at 10ms and a reporting one at 50ms; return how
/// long the second took to fire.
fn second_timer_latency(wheel: &TimingWheel) -> Duration {
    let (tx, rx) = bounded(1);

    wheel
        .schedule(Duration::from_millis(10), || {
            thread::sleep(Duration::from_millis(800));
        })
        .unwrap();
    let start = Instant::now();
    wheel
        .schedule(Duration::from_millis(50), move || {
            let _ = tx.send(Instant::now());
        })
        .unwrap();

    rx.recv_timeout(Duration::from_secs(5)).unwrap() - start
}

/// A slow callback does not hold up other timers, even with a single core
/// dispatch thread.
#[test]
fn test_slow_callback_does_not_block_other_timers() {
    println!("\n=== test_slow_callback_does_not_block_other_timers ===");

    let wheel = wheel(5, 64);
    let elapsed = second_timer_latency(&wheel);
    println!("Second timer fired after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(55) + SLACK);

    wheel.stop();
    println!("=== test_slow_callback_does_not_block_other_timers PASSED ===\n");
}

#[test]
fn test_slow_callback_with_default_dispatch() {
    let wheel = TimingWheel::new(Duration::from_millis(5)).unwrap();
    let elapsed = second_timer_latency(&wheel);
    println!("Second timer fired after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(55) + SLACK);
    wheel.stop();
}

#[test]
fn test_panicking_callback_does_not_stop_wheel() {
    let wheel = wheel(5, 64);
    let (tx, rx) = bounded(1);

    wheel
        .schedule(Duration::from_millis(10), || panic!("flush failed"))
        .unwrap();
    wheel
        .schedule(Duration::from_millis(40), move || {
            let _ = tx.send(());
        })
        .unwrap();

    assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    wheel.stop();
}

#[test]
fn test_stop_discards_pending_and_rejects_new() {
    let wheel = wheel(5, 64);
    let fired = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fired);
    wheel
        .schedule(Duration::from_millis(100), move || {
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();

    wheel.stop();
    assert!(wheel.is_stopped());
    assert_eq!(wheel.pending_timers(), 0);
    assert!(matches!(
        wheel.schedule(Duration::from_millis(1), || {}),
        Err(WheelError::Stopped)
    ));

    thread::sleep(Duration::from_millis(200));
    assert!(!fired.load(Ordering::SeqCst));
}

#[test]
fn test_bucket_count_is_power_of_two() {
    let wheel = wheel(5, 500);
    assert_eq!(wheel.bucket_count(), 512);
    assert_eq!(wheel.tick_interval(), Duration::from_millis(5));
    wheel.stop();
}

#[cfg(feature = "tokio-runtime")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_dispatcher() {
    use ingest_runtime::runtime::{Dispatch, TokioDispatcher};

    println!("\n=== test_tokio_dispatcher ===");

    let dispatcher: Arc<dyn Dispatch> =
        Arc::new(TokioDispatcher::current().expect("inside a tokio runtime"));
    let wheel = TimingWheel::with_dispatcher(Duration::from_millis(5), 64, dispatcher).unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel();

    wheel
        .schedule(Duration::from_millis(20), move || {
            let _ = tx.send(());
        })
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("timer did not fire")
        .unwrap();

    wheel.stop();
    println!("=== test_tokio_dispatcher PASSED ===\n");
}
