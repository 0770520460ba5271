//! Error types for pool and scheduler operations.

use thiserror::Error;

/// Errors produced by the pool, its scheduler and its workers.
///
/// Variants carry owned text rather than source errors so a single failure
/// (for example a failed worker handshake) can be cloned into every job it
/// rejects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The worker could not load or construct its entry module.
    #[error("Unable to initialize worker.\n{0}")]
    Initialization(String),
    /// The worker-side handler failed while processing a job.
    #[error("{0}")]
    Handler(String),
    /// The caller asked for something the pool cannot do.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    /// The job was held by a worker that has been stopped.
    #[error("worker {0} was stopped before the job completed")]
    WorkerStopped(u64),
    /// The worker's channel closed unexpectedly.
    #[error("worker {0} exited unexpectedly")]
    WorkerExited(u64),
    /// The pool was dropped while the job was still waiting.
    #[error("job abandoned: pool dropped before it was serviced")]
    Abandoned,
    /// Spawning a worker process failed.
    #[error("failed to spawn worker: {0}")]
    Spawn(String),
    /// A payload could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The pool was used outside of a tokio runtime.
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl From<serde_json::Error> for PoolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

/// Text sent over the wire for a failed handler.
///
/// Uses the descriptive form (message plus cause chain, never a backtrace),
/// falling back to the display form and finally to `"Unknown error"` when
/// both are empty.
pub fn describe_error(err: &anyhow::Error) -> String {
    let detailed = format!("{err:#}");
    if !detailed.trim().is_empty() {
        return detailed;
    }
    let plain = err.to_string();
    if plain.trim().is_empty() {
        "Unknown error".to_string()
    } else {
        plain
    }
}
