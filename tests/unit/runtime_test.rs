//! Tests for runtime helpers and dispatchers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ingest_runtime::runtime::{Dispatch, PoolKind, RetryPolicy, ThreadDispatcher};

#[test]
fn test_default_retry_policy() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.max_retries, 5);
    assert_eq!(policy.backoff_for(1), Duration::from_secs(1));
    assert_eq!(policy.backoff_for(3), Duration::from_secs(4));
    assert_eq!(policy.backoff_for(10), Duration::from_secs(30));
}

#[test]
fn test_pool_kind_serde() {
    assert_eq!(serde_json::to_string(&PoolKind::Parsing).unwrap(), "\"parsing\"");
    let kind: PoolKind = serde_json::from_str("\"writing\"").unwrap();
    assert_eq!(kind, PoolKind::Writing);
}

#[test]
fn test_thread_dispatcher_runs_every_task() {
    let dispatcher = ThreadDispatcher::new("unit-dispatch", 3).unwrap();
    assert_eq!(dispatcher.thread_count(), 3);

    let count = Arc::new(AtomicUsize::new(0));
    for _ in 0..50 {
        let counter = Arc::clone(&count);
        dispatcher.dispatch(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
    }

    dispatcher.join();
    assert_eq!(count.load(Ordering::SeqCst), 50);
}

#[cfg(feature = "tokio-runtime")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_dispatcher_runs_task() {
    use ingest_runtime::runtime::TokioDispatcher;

    let dispatcher = TokioDispatcher::new(tokio::runtime::Handle::current());
    let (tx, rx) = tokio::sync::oneshot::channel();
    dispatcher.dispatch(Box::new(move || {
        let _ = tx.send(123);
    }));

    let result = rx.await.expect("oneshot result");
    assert_eq!(result, 123);
}

#[cfg(feature = "tokio-runtime")]
#[test]
fn test_tokio_dispatcher_outside_runtime() {
    use ingest_runtime::runtime::TokioDispatcher;

    assert!(TokioDispatcher::current().is_none());

    let dispatcher = TokioDispatcher::with_worker_threads(1).unwrap();
    let (tx, rx) = crossbeam_channel::bounded(1);
    dispatcher.dispatch(Box::new(move || {
        let _ = tx.send(());
    }));
    assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
}
