//! Supervisor-side view of one worker: its lifecycle state, local queue and
//! pending-response table.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::error::PoolError;
use super::job::{Job, JobId};
use super::message::Message;

/// Identifier of a worker within one pool.
pub type WorkerId = u64;

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// No in-flight job; ready to receive one.
    Available,
    /// Exactly one job in flight.
    Executing,
    /// Terminal. The worker is no longer part of the active set.
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::Executing => write!(f, "executing"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Point-in-time view of a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    /// Worker identifier.
    pub id: WorkerId,
    /// OS process id, if known.
    pub pid: Option<u32>,
    /// Current lifecycle state.
    pub state: WorkerState,
    /// Whether the worker completed its handshake.
    pub ready: bool,
    /// Jobs queued specifically for this worker.
    pub queued_jobs: usize,
    /// Ids of the jobs currently in flight.
    pub in_flight: Vec<JobId>,
}

/// One supervised worker.
pub(crate) struct Worker {
    id: WorkerId,
    pid: Option<u32>,
    state: WorkerState,
    ready: bool,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    jobs: VecDeque<Job>,
    pending: HashMap<JobId, Job>,
}

impl Worker {
    pub fn new(id: WorkerId, outbound: mpsc::UnboundedSender<Message>, pid: Option<u32>) -> Self {
        Self {
            id,
            pid,
            state: WorkerState::Available,
            ready: false,
            outbound: Some(outbound),
            jobs: VecDeque::new(),
            pending: HashMap::new(),
        }
    }

    pub const fn id(&self) -> WorkerId {
        self.id
    }

    pub const fn state(&self) -> WorkerState {
        self.state
    }

    pub const fn is_available(&self) -> bool {
        matches!(self.state, WorkerState::Available)
    }

    pub const fn is_connected(&self) -> bool {
        self.outbound.is_some()
    }

    pub fn mark_ready(&mut self) {
        self.ready = true;
    }

    pub fn has_queued_jobs(&self) -> bool {
        !self.jobs.is_empty()
    }

    pub fn has_pending_jobs(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn queued_len(&self) -> usize {
        self.jobs.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether the handshake is still in flight.
    pub fn is_handshaking(&self) -> bool {
        self.pending.values().any(Job::is_handshake)
    }

    /// Append a job to the local queue.
    pub fn push_job(&mut self, job: Job) {
        self.jobs.push_back(job);
    }

    /// Oldest job in the local queue.
    pub fn pop_job(&mut self) -> Option<Job> {
        self.jobs.pop_front()
    }

    /// Move `job` into the pending table and transmit it.
    ///
    /// Returns the job back if the link is already closed.
    pub fn dispatch(&mut self, job: Job) -> Result<(), Job> {
        let Some(outbound) = self.outbound.as_ref() else {
            return Err(job);
        };
        if outbound.send(job.to_message()).is_err() {
            return Err(job);
        }
        trace!(worker_id = self.id, job_id = job.id, kind = ?job.kind, "dispatched job");
        self.state = WorkerState::Executing;
        self.pending.insert(job.id, job);
        Ok(())
    }

    /// Take the pending job answered by a reply with `id`.
    ///
    /// Returns the worker to `Available` only if it was `Executing`.
    pub fn take_pending(&mut self, id: JobId) -> Option<Job> {
        let job = self.pending.remove(&id)?;
        if self.state == WorkerState::Executing {
            self.state = WorkerState::Available;
        }
        Some(job)
    }

    /// Move the worker to its terminal state.
    pub fn mark_stopped(&mut self) {
        self.state = WorkerState::Stopped;
    }

    /// Close the channel to the worker.
    pub fn disconnect(&mut self) {
        if self.outbound.take().is_some() {
            debug!(worker_id = self.id, "worker disconnected");
        }
    }

    /// Sender half of the link, for replies to worker-side requests.
    pub fn outbound(&self) -> Option<mpsc::UnboundedSender<Message>> {
        self.outbound.clone()
    }

    /// Reject every job queued for this worker, returning how many there were.
    pub fn reject_queue(&mut self, error: &PoolError) -> usize {
        let count = self.jobs.len();
        for job in self.jobs.drain(..) {
            job.reject(error.clone());
        }
        count
    }

    /// Reject every in-flight job, returning how many there were.
    pub fn reject_pending(&mut self, error: &PoolError) -> usize {
        let count = self.pending.len();
        for (_, job) in self.pending.drain() {
            job.reject(error.clone());
        }
        count
    }

    /// Sort key for resize-down: idle before busy, then shorter local queue.
    pub fn eviction_key(&self) -> (bool, usize) {
        (self.state != WorkerState::Available, self.jobs.len())
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        let mut in_flight: Vec<JobId> = self.pending.keys().copied().collect();
        in_flight.sort_unstable();
        WorkerSnapshot {
            id: self.id,
            pid: self.pid,
            state: self.state,
            ready: self.ready,
            queued_jobs: self.jobs.len(),
            in_flight,
        }
    }
}

/// Ids of the first `count` workers to stop when shrinking, in eviction order.
pub(crate) fn eviction_order(workers: &[Worker], count: usize) -> Vec<WorkerId> {
    let mut ordered: Vec<&Worker> = workers.iter().collect();
    // Stable sort keeps pool order among equal keys.
    ordered.sort_by_key(|worker| worker.eviction_key());
    ordered.into_iter().take(count).map(Worker::id).collect()
}
