//! Pool-wide dispatch engine.
//!
//! The scheduler owns the active worker set, the workers draining after a
//! resize-down, and the pool-global FIFO queue. Every mutation runs to
//! completion under the pool's single scheduler lock, so dispatch decisions
//! never race with reply handling.
//!
//! # Dispatch policy
//!
//! After every enqueue and every settled reply:
//!
//! 1. If a specific worker was targeted and it is available with local work,
//!    its oldest local job is dispatched.
//! 2. Otherwise the first available worker (in pool order) receives the oldest
//!    job of the global queue.
//!
//! The check repeats until no available worker or no queued job is left.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::error::PoolError;
use super::job::{Job, JobHandle, JobId};
use super::message::Message;
use super::worker::{eviction_order, Worker, WorkerId, WorkerSnapshot, WorkerState};

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Workers in the active set.
    pub worker_count: usize,
    /// Active workers ready for a job.
    pub available_workers: usize,
    /// Active workers with a job in flight.
    pub executing_workers: usize,
    /// Stopped workers still finishing an in-flight job.
    pub draining_workers: usize,
    /// Jobs waiting in the pool-global queue.
    pub queued_jobs: usize,
    /// Jobs dispatched and awaiting a reply.
    pub in_flight_jobs: usize,
    /// Total caller jobs enqueued.
    pub submitted_jobs: u64,
    /// Total caller jobs resolved successfully.
    pub completed_jobs: u64,
    /// Total caller jobs rejected.
    pub failed_jobs: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: u64,
    completed: u64,
    failed: u64,
}

pub(crate) struct Scheduler {
    workers: Vec<Worker>,
    draining: Vec<Worker>,
    queue: VecDeque<Job>,
    next_job_id: JobId,
    next_worker_id: WorkerId,
    /// Slots promised to workers that are still being spawned.
    reserved: usize,
    accepting: bool,
    counters: Counters,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            workers: Vec::new(),
            draining: Vec::new(),
            queue: VecDeque::new(),
            next_job_id: 1,
            next_worker_id: 1,
            reserved: 0,
            accepting: true,
            counters: Counters::default(),
        }
    }

    fn next_id(&mut self) -> JobId {
        let id = self.next_job_id;
        self.next_job_id += 1;
        id
    }

    pub const fn is_accepting(&self) -> bool {
        self.accepting
    }

    pub fn active_len(&self) -> usize {
        self.workers.len()
    }

    /// Claim up to `count` worker slots below `max_workers`, returning how
    /// many were granted. Each granted slot is consumed by [`add_worker`] or
    /// handed back with [`release`].
    ///
    /// [`add_worker`]: Scheduler::add_worker
    /// [`release`]: Scheduler::release
    pub fn reserve(&mut self, count: usize, max_workers: usize) -> Result<usize, PoolError> {
        if !self.accepting {
            return Err(PoolError::InvalidOperation("pool has been stopped".into()));
        }
        let room = max_workers.saturating_sub(self.workers.len() + self.reserved);
        let granted = count.min(room);
        self.reserved += granted;
        Ok(granted)
    }

    /// Return reserved slots that will not be filled.
    pub fn release(&mut self, count: usize) {
        self.reserved = self.reserved.saturating_sub(count);
    }

    /// Enqueue a caller job globally or against `target`, then try to
    /// dispatch.
    pub fn enqueue(
        &mut self,
        kind: Option<String>,
        payload: Value,
        target: Option<WorkerId>,
    ) -> JobHandle {
        let id = self.next_id();
        let (job, handle) = Job::for_caller(id, kind, payload);
        self.counters.submitted += 1;
        trace!(job_id = id, ?target, "job enqueued");
        self.push(job, target);
        handle
    }

    fn push(&mut self, job: Job, target: Option<WorkerId>) {
        match target {
            Some(worker_id) => match self.position(worker_id) {
                Some(idx) => self.workers[idx].push_job(job),
                None => {
                    self.counters.failed += 1;
                    job.reject(PoolError::WorkerStopped(worker_id));
                }
            },
            None => self.queue.push_back(job),
        }
        self.dispatch(target);
    }

    /// Add a freshly spawned worker and queue its handshake.
    pub fn add_worker(
        &mut self,
        outbound: mpsc::UnboundedSender<Message>,
        pid: Option<u32>,
        entry_module: &str,
    ) -> WorkerId {
        let worker_id = self.next_worker_id;
        self.next_worker_id += 1;
        self.reserved = self.reserved.saturating_sub(1);
        self.workers.push(Worker::new(worker_id, outbound, pid));

        let handshake = Job::handshake(self.next_id(), entry_module);
        self.push(handshake, Some(worker_id));
        worker_id
    }

    /// Run the dispatch policy.
    pub fn dispatch(&mut self, target: Option<WorkerId>) {
        if let Some(worker_id) = target {
            self.finalize_if_drained(worker_id);
        }
        if !self.accepting {
            return;
        }
        while self.dispatch_next(target) {}
    }

    fn dispatch_next(&mut self, target: Option<WorkerId>) -> bool {
        if let Some(idx) = target.and_then(|worker_id| self.position(worker_id)) {
            let worker = &mut self.workers[idx];
            if worker.is_available() {
                if let Some(job) = worker.pop_job() {
                    return self.transmit(idx, job);
                }
            }
        }

        if self.queue.is_empty() {
            return false;
        }
        let Some(idx) = self.workers.iter().position(Worker::is_available) else {
            return false;
        };
        match self.queue.pop_front() {
            Some(job) => self.transmit(idx, job),
            None => false,
        }
    }

    fn transmit(&mut self, idx: usize, job: Job) -> bool {
        let Err(job) = self.workers[idx].dispatch(job) else {
            return true;
        };

        let worker_id = self.workers[idx].id();
        warn!(worker_id = worker_id, job_id = job.id, "worker link closed before dispatch");
        if job.is_handshake() {
            self.fail_initialization(
                worker_id,
                format!("worker {worker_id} exited before it could be initialized"),
            );
        } else {
            // Never transmitted, so another worker may still take it.
            self.queue.push_front(job);
            self.remove_exited(worker_id);
        }
        true
    }

    /// Settle the job answered by a reply from `worker_id`.
    pub fn on_reply(&mut self, worker_id: WorkerId, id: JobId, result: Result<Value, String>) {
        let Some(job) = self
            .find_mut(worker_id)
            .and_then(|worker| worker.take_pending(id))
        else {
            debug!(worker_id = worker_id, job_id = id, "reply for unknown job ignored");
            return;
        };

        if job.is_handshake() {
            match result {
                Ok(_) => match self.position(worker_id) {
                    Some(idx) => {
                        self.workers[idx].mark_ready();
                        info!(worker_id = worker_id, "worker initialized");
                    }
                    None => debug!(worker_id = worker_id, "retired worker acknowledged handshake"),
                },
                Err(error) => self.fail_initialization(worker_id, error),
            }
        } else {
            match result {
                Ok(value) => {
                    self.counters.completed += 1;
                    job.settle(Ok(value));
                }
                Err(error) => {
                    self.counters.failed += 1;
                    debug!(worker_id = worker_id, job_id = id, %error, "job failed");
                    job.reject(PoolError::Handler(error));
                }
            }
        }

        self.dispatch(Some(worker_id));
    }

    /// Remove a worker whose handshake failed and cascade the failure.
    ///
    /// Jobs queued for the worker are rejected. If no active worker remains,
    /// the global queue is rejected too since nothing can service it.
    pub fn fail_initialization(&mut self, worker_id: WorkerId, reason: String) {
        let error = PoolError::Initialization(reason);

        if let Some(mut worker) = self.remove_any(worker_id) {
            worker.mark_stopped();
            let rejected = worker.reject_queue(&error) + worker.reject_pending(&error);
            self.counters.failed += rejected as u64;
            worker.disconnect();
            warn!(worker_id = worker_id, rejected = rejected, %error, "worker failed to initialize");
        }

        if self.workers.is_empty() && !self.queue.is_empty() {
            let rejected = self.reject_queue(&error);
            warn!(rejected = rejected, "no workers left, rejected the pool queue");
        }
    }

    /// Handle the link of `worker_id` closing.
    pub fn on_disconnect(&mut self, worker_id: WorkerId) {
        if let Some(idx) = self.position(worker_id) {
            if self.workers[idx].is_handshaking() {
                self.fail_initialization(
                    worker_id,
                    format!("worker {worker_id} exited before completing initialization"),
                );
            } else {
                self.remove_exited(worker_id);
            }
        } else if let Some(idx) = self.draining.iter().position(|w| w.id() == worker_id) {
            let mut worker = self.draining.remove(idx);
            let rejected = worker.reject_pending(&PoolError::WorkerExited(worker_id));
            self.counters.failed += rejected as u64;
            worker.disconnect();
            debug!(worker_id = worker_id, rejected = rejected, "draining worker exited");
        }

        self.dispatch(None);
    }

    fn remove_exited(&mut self, worker_id: WorkerId) {
        let Some(mut worker) = self.remove_any(worker_id) else {
            return;
        };
        worker.mark_stopped();
        let error = PoolError::WorkerExited(worker_id);
        let rejected = worker.reject_pending(&error) + worker.reject_queue(&error);
        self.counters.failed += rejected as u64;
        worker.disconnect();
        warn!(worker_id = worker_id, rejected = rejected, "worker exited unexpectedly");
    }

    /// Stop one worker immediately, rejecting whatever it holds.
    pub fn stop_worker(&mut self, worker_id: WorkerId) -> bool {
        let Some(mut worker) = self.remove_any(worker_id) else {
            return false;
        };
        worker.mark_stopped();
        let error = PoolError::WorkerStopped(worker_id);
        let rejected = worker.reject_pending(&error) + worker.reject_queue(&error);
        self.counters.failed += rejected as u64;
        worker.disconnect();
        info!(worker_id = worker_id, rejected = rejected, "worker stopped");
        true
    }

    /// Stop `count` workers chosen by eviction order.
    ///
    /// A retired worker with a job in flight keeps its link open until the
    /// reply arrives; the dispatch check then disconnects it.
    pub fn retire(&mut self, count: usize) -> Vec<WorkerId> {
        let victims = eviction_order(&self.workers, count);
        for &worker_id in &victims {
            let Some(mut worker) = self.remove_active(worker_id) else {
                continue;
            };
            worker.mark_stopped();
            let rejected = worker.reject_queue(&PoolError::WorkerStopped(worker_id));
            self.counters.failed += rejected as u64;
            if worker.has_pending_jobs() {
                debug!(worker_id = worker_id, "worker draining in-flight job");
                self.draining.push(worker);
            } else {
                worker.disconnect();
            }
        }
        victims
    }

    /// Stop every worker and refuse further dispatch.
    pub fn stop_all(&mut self) {
        self.accepting = false;
        let ids: Vec<WorkerId> = self
            .workers
            .iter()
            .chain(self.draining.iter())
            .map(Worker::id)
            .collect();
        for worker_id in ids {
            self.stop_worker(worker_id);
        }
    }

    /// Reject every job in the global queue.
    pub fn reject_queue(&mut self, error: &PoolError) -> usize {
        let count = self.queue.len();
        for job in self.queue.drain(..) {
            job.reject(error.clone());
        }
        self.counters.failed += count as u64;
        count
    }

    /// Sender half of a worker's link (active or draining).
    pub fn outbound(&self, worker_id: WorkerId) -> Option<mpsc::UnboundedSender<Message>> {
        self.workers
            .iter()
            .chain(self.draining.iter())
            .find(|w| w.id() == worker_id)
            .and_then(Worker::outbound)
    }

    pub fn stats(&self) -> PoolStats {
        let count_state = |state: WorkerState| {
            self.workers.iter().filter(|w| w.state() == state).count()
        };
        PoolStats {
            worker_count: self.workers.len(),
            available_workers: count_state(WorkerState::Available),
            executing_workers: count_state(WorkerState::Executing),
            draining_workers: self.draining.len(),
            queued_jobs: self.queue.len() + self.workers.iter().map(Worker::queued_len).sum::<usize>(),
            in_flight_jobs: self
                .workers
                .iter()
                .chain(self.draining.iter())
                .map(Worker::pending_len)
                .sum(),
            submitted_jobs: self.counters.submitted,
            completed_jobs: self.counters.completed,
            failed_jobs: self.counters.failed,
        }
    }

    pub fn snapshots(&self) -> Vec<WorkerSnapshot> {
        self.workers.iter().map(Worker::snapshot).collect()
    }

    fn finalize_if_drained(&mut self, worker_id: WorkerId) {
        let Some(idx) = self.draining.iter().position(|w| w.id() == worker_id) else {
            return;
        };
        let worker = &self.draining[idx];
        if worker.is_connected()
            && worker.state() == WorkerState::Stopped
            && !worker.has_queued_jobs()
            && !worker.has_pending_jobs()
        {
            let mut worker = self.draining.remove(idx);
            worker.disconnect();
            info!(worker_id = worker_id, "drained worker disconnected");
        }
    }

    fn position(&self, worker_id: WorkerId) -> Option<usize> {
        self.workers.iter().position(|w| w.id() == worker_id)
    }

    fn find_mut(&mut self, worker_id: WorkerId) -> Option<&mut Worker> {
        self.workers
            .iter_mut()
            .chain(self.draining.iter_mut())
            .find(|w| w.id() == worker_id)
    }

    fn remove_active(&mut self, worker_id: WorkerId) -> Option<Worker> {
        self.position(worker_id).map(|idx| self.workers.remove(idx))
    }

    fn remove_any(&mut self, worker_id: WorkerId) -> Option<Worker> {
        self.remove_active(worker_id).or_else(|| {
            self.draining
                .iter()
                .position(|w| w.id() == worker_id)
                .map(|idx| self.draining.remove(idx))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::INIT_KIND;
    use serde_json::json;

    struct Harness {
        scheduler: Scheduler,
        links: Vec<mpsc::UnboundedReceiver<Message>>,
    }

    impl Harness {
        fn with_ready_workers(count: usize) -> Self {
            let mut harness = Self {
                scheduler: Scheduler::new(),
                links: Vec::new(),
            };
            for _ in 0..count {
                let (tx, mut rx) = mpsc::unbounded_channel();
                let worker_id = harness.scheduler.add_worker(tx, None, "modules/api");
                let init_id = match rx.try_recv().unwrap() {
                    Message::Request { id, kind, .. } => {
                        assert_eq!(kind.as_deref(), Some(INIT_KIND));
                        id
                    }
                    other => panic!("expected handshake, got {other:?}"),
                };
                harness.scheduler.on_reply(worker_id, init_id, Ok(Value::Null));
                harness.links.push(rx);
            }
            harness
        }

        fn next_request(&mut self, worker: usize) -> Option<JobId> {
            match self.links[worker].try_recv() {
                Ok(Message::Request { id, .. }) => Some(id),
                _ => None,
            }
        }
    }

    #[test]
    fn test_handshake_ids_share_the_job_counter() {
        let harness = Harness::with_ready_workers(2);
        let stats = harness.scheduler.stats();
        assert_eq!(stats.worker_count, 2);
        assert_eq!(stats.available_workers, 2);
        assert_eq!(stats.submitted_jobs, 0);
        assert_eq!(harness.scheduler.next_job_id, 3);
    }

    #[test]
    fn test_queued_jobs_dispatch_fifo_as_workers_free_up() {
        let mut h = Harness::with_ready_workers(2);
        let handles: Vec<JobHandle> = (0..4)
            .map(|i| h.scheduler.enqueue(Some("say".into()), json!(i), None))
            .collect();
        let ids: Vec<JobId> = handles.iter().map(JobHandle::id).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        assert_eq!(h.next_request(0), Some(ids[0]));
        assert_eq!(h.next_request(1), Some(ids[1]));
        assert_eq!(h.scheduler.stats().queued_jobs, 2);

        h.scheduler.on_reply(2, ids[1], Ok(json!("ok")));
        assert_eq!(h.next_request(1), Some(ids[2]));
        assert_eq!(h.next_request(0), None);

        h.scheduler.on_reply(1, ids[0], Ok(json!("ok")));
        assert_eq!(h.next_request(0), Some(ids[3]));
        assert_eq!(h.scheduler.stats().queued_jobs, 0);
    }

    #[test]
    fn test_reply_from_wrong_worker_is_ignored() {
        let mut h = Harness::with_ready_workers(2);
        let handle = h.scheduler.enqueue(Some("say".into()), json!(1), None);
        assert_eq!(h.next_request(0), Some(handle.id()));

        h.scheduler.on_reply(2, handle.id(), Ok(json!("spoofed")));
        assert_eq!(h.scheduler.stats().executing_workers, 1);
        assert_eq!(h.scheduler.stats().completed_jobs, 0);
    }

    #[test]
    fn test_failed_handshake_cascades_to_global_queue() {
        let mut scheduler = Scheduler::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker_id = scheduler.add_worker(tx, None, "missing");
        let init_id = match rx.try_recv().unwrap() {
            Message::Request { id, .. } => id,
            other => panic!("unexpected {other:?}"),
        };
        let mut handle = scheduler.enqueue(Some("say".into()), json!("hello"), None);

        scheduler.on_reply(worker_id, init_id, Err("Cannot find module 'missing'".into()));

        assert_eq!(scheduler.active_len(), 0);
        match handle.try_recv_outcome() {
            Some(Err(PoolError::Initialization(reason))) => {
                assert!(reason.contains("Cannot find module"));
            }
            other => panic!("expected initialization error, got {other:?}"),
        }
        assert_eq!(scheduler.stats().queued_jobs, 0);
    }

    #[test]
    fn test_retire_keeps_busy_worker_draining() {
        let mut h = Harness::with_ready_workers(2);
        let handle = h.scheduler.enqueue(Some("say".into()), json!(1), None);
        assert_eq!(h.next_request(0), Some(handle.id()));

        let retired = h.scheduler.retire(2);
        assert_eq!(retired, vec![2, 1]);
        assert_eq!(h.scheduler.stats().draining_workers, 1);
        assert!(h.links[1].try_recv().is_err());

        h.scheduler.on_reply(1, handle.id(), Ok(json!("late")));
        assert_eq!(h.scheduler.stats().draining_workers, 0);
        assert_eq!(h.scheduler.stats().completed_jobs, 1);
        assert!(matches!(
            h.links[0].try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_stop_all_blocks_dispatch() {
        let mut h = Harness::with_ready_workers(1);
        h.scheduler.stop_all();
        let _handle = h.scheduler.enqueue(Some("say".into()), json!(1), None);

        assert!(!h.scheduler.is_accepting());
        assert_eq!(h.scheduler.active_len(), 0);
        assert_eq!(h.scheduler.stats().queued_jobs, 1);
    }

    #[test]
    fn test_transmit_failure_requeues_job() {
        let mut h = Harness::with_ready_workers(2);
        // Worker 1 has gone away but its exit has not been observed yet.
        h.links.remove(0);

        let handle = h.scheduler.enqueue(Some("say".into()), json!(1), None);
        assert_eq!(h.next_request(0), Some(handle.id()));
        assert_eq!(h.scheduler.active_len(), 1);
    }

    #[test]
    fn test_reservations_count_toward_the_cap() {
        let mut h = Harness::with_ready_workers(1);
        assert_eq!(h.scheduler.reserve(3, 2).unwrap(), 1);
        // The pending slot is still held, so nothing is left.
        assert_eq!(h.scheduler.reserve(1, 2).unwrap(), 0);

        let (tx, _rx) = mpsc::unbounded_channel();
        h.scheduler.add_worker(tx, None, "modules/api");
        assert_eq!(h.scheduler.active_len(), 2);
        assert_eq!(h.scheduler.reserve(1, 2).unwrap(), 0);
    }

    #[test]
    fn test_released_reservation_frees_the_slot() {
        let mut h = Harness::with_ready_workers(1);
        assert_eq!(h.scheduler.reserve(1, 2).unwrap(), 1);
        h.scheduler.release(1);
        assert_eq!(h.scheduler.reserve(1, 2).unwrap(), 1);
    }

    #[test]
    fn test_reserve_after_stop_fails() {
        let mut h = Harness::with_ready_workers(1);
        h.scheduler.stop_all();
        assert!(matches!(
            h.scheduler.reserve(1, 4),
            Err(PoolError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_retired_worker_ack_does_not_rejoin() {
        let mut h = Harness {
            scheduler: Scheduler::new(),
            links: Vec::new(),
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker_id = h.scheduler.add_worker(tx, None, "modules/api");
        let Ok(Message::Request { id: init_id, .. }) = rx.try_recv() else {
            panic!("expected handshake");
        };

        assert_eq!(h.scheduler.retire(1), vec![worker_id]);
        h.scheduler.on_reply(worker_id, init_id, Ok(Value::Null));

        assert_eq!(h.scheduler.active_len(), 0);
        assert_eq!(h.scheduler.stats().draining_workers, 0);
    }

    impl JobHandle {
        fn try_recv_outcome(&mut self) -> Option<crate::core::job::JobOutcome> {
            futures::FutureExt::now_or_never(self)
        }
    }
}
