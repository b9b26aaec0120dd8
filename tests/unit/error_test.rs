//! Tests for error types

use ingest_runtime::config::ConfigError;
use ingest_runtime::core::{FailureKind, PoolError, RuntimeError, UnitFailure, WheelError};

#[test]
fn test_overloaded_error() {
    let err = PoolError::Overloaded {
        pool: "parsing".to_string(),
        capacity: 8,
        queue_limit: 800,
    };
    assert_eq!(
        format!("{err}"),
        "pool `parsing` overloaded: 8 slots busy, 800 units queued"
    );
    assert!(err.is_overload());
}

#[test]
fn test_shut_down_error() {
    let err = PoolError::ShutDown;
    assert_eq!(format!("{err}"), "pool has been shut down");
    assert!(!err.is_overload());
}

#[test]
fn test_wheel_errors() {
    assert_eq!(
        format!("{}", WheelError::Stopped),
        "timing wheel has been stopped"
    );
    assert_eq!(
        format!("{}", WheelError::InvalidSchedule("period must be greater than 0".into())),
        "invalid schedule: period must be greater than 0"
    );
}

#[test]
fn test_runtime_error_conversions() {
    let err: RuntimeError = PoolError::ShutDown.into();
    assert_eq!(format!("{err}"), "pool error: pool has been shut down");

    let err: RuntimeError = WheelError::Stopped.into();
    assert_eq!(format!("{err}"), "timing wheel error: timing wheel has been stopped");

    let err: RuntimeError =
        ConfigError::Invalid("wheel: buckets must be greater than 0".into()).into();
    assert_eq!(
        format!("{err}"),
        "invalid configuration: wheel: buckets must be greater than 0"
    );
}

#[test]
fn test_runtime_error_into_anyhow() {
    fn start() -> ingest_runtime::core::AppResult<()> {
        Err(RuntimeError::from(PoolError::ShutDown).into())
    }
    let err = start().unwrap_err();
    assert!(err.downcast_ref::<RuntimeError>().is_some());
}

#[test]
fn test_unit_failure_display_without_id() {
    let failure = UnitFailure {
        pool: "writing".into(),
        unit_id: None,
        label: Some("batch-3".into()),
        kind: FailureKind::DeadlineExpired,
    };
    assert_eq!(
        failure.to_string(),
        "[writing] (batch-3): start deadline expired before a slot was free"
    );
}
