//! Worker side of the pool: module registration, handler dispatch and the
//! subprocess entry point.

pub mod context;
pub mod error;
pub mod handler;
pub mod mode;
pub mod registry;
pub mod runtime;
pub mod stdio;

pub use context::WorkerContext;
pub use error::WorkerError;
pub use handler::{Completion, Handler, HandlerTable, Outcome};
pub use mode::{is_worker, WORKER_ENV};
pub use registry::{ModuleRegistry, WorkerModule};
pub use runtime::WorkerRuntime;
pub use stdio::run_worker_main;
