//! Supervisor-side scheduling: jobs, workers, the dispatch engine and the
//! pool that owns them.

pub mod error;
pub mod job;
pub mod message;
pub mod notification;
pub mod pool;
pub mod scheduler;
pub mod spawn;
pub mod worker;

pub use error::{describe_error, AppResult, PoolError};
pub use job::{JobHandle, JobId, JobOutcome};
pub use message::{reply_result, Message, INIT_KIND};
pub use notification::{NotificationHandler, NotificationHandlers};
pub use pool::Pool;
pub use scheduler::PoolStats;
pub use spawn::{SpawnOptions, WorkerLink, WorkerSpawner};
pub use worker::{WorkerId, WorkerSnapshot, WorkerState};
