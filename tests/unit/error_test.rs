//! Tests for error types

use prometheus_process_pool::core::{describe_error, PoolError};
use prometheus_process_pool::worker::WorkerError;

#[test]
fn test_initialization_error() {
    let err = PoolError::Initialization("Cannot find module 'x'".to_string());
    assert_eq!(
        format!("{}", err),
        "Unable to initialize worker.\nCannot find module 'x'"
    );
}

#[test]
fn test_worker_lifecycle_errors() {
    assert_eq!(
        format!("{}", PoolError::WorkerStopped(3)),
        "worker 3 was stopped before the job completed"
    );
    assert_eq!(
        format!("{}", PoolError::WorkerExited(4)),
        "worker 4 exited unexpectedly"
    );
}

#[test]
fn test_errors_are_cloneable_for_fan_out() {
    let err = PoolError::Initialization("bad".to_string());
    let copies: Vec<PoolError> = (0..3).map(|_| err.clone()).collect();
    assert!(copies.iter().all(|e| e == &err));
}

#[test]
fn test_worker_errors() {
    assert_eq!(
        format!("{}", WorkerError::NotInitialized),
        "worker has not been initialized"
    );
    assert_eq!(
        format!("{}", WorkerError::HandlerNotFound("say".to_string())),
        "no handler registered for `say`"
    );
}

#[test]
fn test_describe_worker_error_through_anyhow() {
    let err = anyhow::Error::from(WorkerError::Remote("pool said no".to_string()));
    assert_eq!(describe_error(&err), "pool said no");
}
