//! Configuration models for pools and their workers.

pub mod pool;

pub use pool::{PoolConfig, ARGS_ENV, DEFAULT_POOL_SIZE, SIZE_ENV, WORKDIR_ENV};
