//! Spawn contract between the pool and whatever runs its workers.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tokio::sync::mpsc;

use super::error::PoolError;
use super::message::Message;

/// Settings applied to every worker the pool spawns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnOptions {
    /// Working directory of the worker; inherits the parent's when `None`.
    pub working_directory: Option<PathBuf>,
    /// Replacement environment; inherits the parent's when `None`.
    pub environment: Option<BTreeMap<String, String>>,
    /// Extra arguments passed to the worker entry point.
    pub extra_args: Vec<String>,
}

/// Duplex message channel to one running worker.
///
/// Dropping `outbound` disconnects the worker. `inbound` yielding `None`
/// means the worker has exited or closed its side.
#[derive(Debug)]
pub struct WorkerLink {
    /// Messages to the worker.
    pub outbound: mpsc::UnboundedSender<Message>,
    /// Messages from the worker.
    pub inbound: mpsc::UnboundedReceiver<Message>,
    /// OS process id, when the worker is a subprocess.
    pub pid: Option<u32>,
}

impl WorkerLink {
    /// Assemble a link from its two channel halves.
    pub fn new(
        outbound: mpsc::UnboundedSender<Message>,
        inbound: mpsc::UnboundedReceiver<Message>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            pid: None,
        }
    }

    /// Attach the OS process id.
    #[must_use]
    pub fn with_pid(mut self, pid: Option<u32>) -> Self {
        self.pid = pid;
        self
    }
}

/// Abstraction for starting workers.
///
/// Implementations are called from within a tokio runtime and must not
/// block: any I/O belongs in tasks they spawn.
pub trait WorkerSpawner: Send + Sync + 'static {
    /// Start one worker and return the link to it.
    fn spawn(&self, options: &SpawnOptions) -> Result<WorkerLink, PoolError>;
}
