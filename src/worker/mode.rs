//! Process-wide "am I a worker" flag.

use std::sync::OnceLock;

/// Environment variable set to `1` on every worker process the pool spawns.
pub const WORKER_ENV: &str = "PROMETHEUS_POOL_WORKER";

static IS_WORKER: OnceLock<bool> = OnceLock::new();

/// Whether this process was spawned as a pool worker.
///
/// Read once from [`WORKER_ENV`]; later changes to the environment are not
/// observed.
pub fn is_worker() -> bool {
    *IS_WORKER.get_or_init(|| std::env::var(WORKER_ENV).is_ok_and(|v| v == "1"))
}
