//! # Prometheus Process Pool
//!
//! A pool of worker processes that service jobs from one FIFO queue over a
//! correlated request/reply protocol.
//!
//! The supervising side enqueues jobs (`invoke` for a named method, `send` for
//! the entry module's default handler) and gets back a future per job. A
//! scheduler hands each job to the first available worker; every worker runs
//! at most one job at a time and answers with a reply carrying the job's id.
//!
//! ## Key Features
//!
//! - **Strict FIFO dispatch**: no priorities, no starvation surprises
//! - **Correlated replies**: replies settle exactly the job they name
//! - **Elastic sizing**: `resize`, `grow` and `shrink` at run time, idle workers evicted first
//! - **Two-way messaging**: workers can notify the pool or invoke pool-side handlers
//! - **Pluggable spawning**: child processes over stdio, or in-process tasks
//!
//! ## Supervisor side
//!
//! ```rust,ignore
//! use prometheus_process_pool::builders::PoolBuilder;
//! use prometheus_process_pool::config::PoolConfig;
//! use prometheus_process_pool::infra::ProcessSpawner;
//!
//! let pool = PoolBuilder::new("modules/api", PoolConfig::new().with_size(4))
//!     .spawner(ProcessSpawner::new("target/release/api-worker"))
//!     .build()?;
//!
//! let greeting: String = pool.invoke("say", "hello")?.json().await?;
//! pool.resize(2)?;
//! pool.stop();
//! ```
//!
//! ## Worker side
//!
//! ```rust,ignore
//! use prometheus_process_pool::worker::{run_worker_main, Handler, ModuleRegistry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = ModuleRegistry::new()
//!         .module("modules/api", Api::new)
//!         .function("modules/echo", Handler::sync(anyhow::Ok));
//!     run_worker_main(registry).await
//! }
//! ```
//!
//! For complete examples, see:
//! - `src/bin/prometheus-pool-worker.rs` - Diagnostic worker host
//! - `tests/process_test.rs` - End-to-end tests against real subprocesses

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Supervisor-side scheduling: jobs, workers, the dispatch engine and the pool.
pub mod core;
/// Configuration models for pools and their workers.
pub mod config;
/// Builders to construct pools from configuration.
pub mod builders;
/// Worker spawners: child processes and in-process tasks.
pub mod infra;
/// Worker side: module registry, handler dispatch and the subprocess entry point.
pub mod worker;
/// Shared utilities.
pub mod util;

pub use builders::PoolBuilder;
pub use config::PoolConfig;
pub use core::{JobHandle, Pool, PoolError, PoolStats};
pub use infra::{InProcessSpawner, ProcessSpawner};
