//! Errors raised inside a worker.

use thiserror::Error;

/// Errors produced by the worker runtime and its context.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// No module or function is registered under the requested path.
    #[error("Cannot find module '{0}'")]
    ModuleNotFound(String),
    /// The module factory failed.
    #[error("{0}")]
    ModuleConstruction(String),
    /// The loaded module has no handler with this name.
    #[error("no handler registered for `{0}`")]
    HandlerNotFound(String),
    /// A request arrived before the handshake.
    #[error("worker has not been initialized")]
    NotInitialized,
    /// A second handshake arrived.
    #[error("worker is already initialized")]
    AlreadyInitialized,
    /// The pool-side handler replied with an error.
    #[error("{0}")]
    Remote(String),
    /// The link to the pool is closed.
    #[error("link to the pool is closed")]
    Disconnected,
    /// A payload could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
