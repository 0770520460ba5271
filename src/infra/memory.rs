//! In-process workers for tests, benchmarks and single-binary deployments.

use tokio::sync::mpsc;
use tracing::trace;

use crate::core::{PoolError, SpawnOptions, WorkerLink, WorkerSpawner};
use crate::worker::{ModuleRegistry, WorkerRuntime};

/// Runs each worker as a tokio task serving a [`ModuleRegistry`].
///
/// Workers share the parent's address space, so spawn options (working
/// directory, environment, arguments) do not apply.
#[derive(Debug, Clone)]
pub struct InProcessSpawner {
    runtime: WorkerRuntime,
}

impl InProcessSpawner {
    /// Spawn workers serving `registry`.
    #[must_use]
    pub fn new(registry: ModuleRegistry) -> Self {
        Self {
            runtime: WorkerRuntime::new(registry),
        }
    }
}

impl WorkerSpawner for InProcessSpawner {
    fn spawn(&self, options: &SpawnOptions) -> Result<WorkerLink, PoolError> {
        if options != &SpawnOptions::default() {
            trace!("spawn options ignored by in-process workers");
        }
        let (to_worker, inbound) = mpsc::unbounded_channel();
        let (outbound, from_worker) = mpsc::unbounded_channel();
        let runtime = self.runtime.clone();
        tokio::spawn(async move { runtime.serve(inbound, outbound).await });
        Ok(WorkerLink::new(to_worker, from_worker))
    }
}
