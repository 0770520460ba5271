//! The process pool: public entry point tying the scheduler, the spawner and
//! the per-worker link tasks together.
//!
//! ```rust,ignore
//! use prometheus_process_pool::{Pool, PoolConfig, ProcessSpawner};
//!
//! let pool = Pool::new(
//!     "modules/api",
//!     PoolConfig::new().with_size(4),
//!     ProcessSpawner::current_exe()?,
//! )?;
//! let greeting: String = pool.invoke("say", "hello")?.json().await?;
//! ```

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::error::{describe_error, PoolError};
use super::job::{JobHandle, JobId};
use super::message::{reply_result, Message};
use super::notification::NotificationHandlers;
use super::scheduler::{PoolStats, Scheduler};
use super::spawn::{SpawnOptions, WorkerLink, WorkerSpawner};
use super::worker::{WorkerId, WorkerSnapshot};
use crate::config::PoolConfig;

/// A pool of worker processes servicing jobs from one FIFO queue.
///
/// Cloning is cheap; all clones share the same workers. Dropping the last
/// clone disconnects every worker.
#[derive(Clone)]
pub struct Pool {
    shared: Arc<Shared>,
}

struct Shared {
    entry_module: String,
    options: SpawnOptions,
    max_workers: usize,
    spawner: Arc<dyn WorkerSpawner>,
    handlers: NotificationHandlers,
    scheduler: Mutex<Scheduler>,
}

impl Pool {
    /// Create a pool and spawn its initial workers.
    ///
    /// Every worker is initialized with `entry_module` in the background;
    /// jobs enqueued before a worker is ready simply wait.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, when called outside a tokio runtime,
    /// or when the spawner cannot start a worker.
    pub fn new(
        entry_module: impl Into<String>,
        config: PoolConfig,
        spawner: impl WorkerSpawner,
    ) -> Result<Self, PoolError> {
        Self::with_parts(
            entry_module.into(),
            &config,
            NotificationHandlers::new(),
            Arc::new(spawner),
        )
    }

    pub(crate) fn with_parts(
        entry_module: String,
        config: &PoolConfig,
        handlers: NotificationHandlers,
        spawner: Arc<dyn WorkerSpawner>,
    ) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;
        tokio::runtime::Handle::try_current().map_err(|e| PoolError::Runtime(e.to_string()))?;

        let size = config.effective_size();
        let pool = Self {
            shared: Arc::new(Shared {
                entry_module,
                options: config.spawn_options(),
                max_workers: config.max_workers(),
                spawner,
                handlers,
                scheduler: Mutex::new(Scheduler::new()),
            }),
        };

        info!(
            entry_module = %pool.shared.entry_module,
            size = size,
            max_workers = pool.shared.max_workers,
            "process pool created"
        );
        pool.grow(size)?;
        Ok(pool)
    }

    /// Enqueue a request for the method `kind`.
    ///
    /// # Errors
    ///
    /// Fails only if `payload` cannot be serialized; handler failures surface
    /// through the returned handle.
    pub fn invoke(&self, kind: &str, payload: impl Serialize) -> Result<JobHandle, PoolError> {
        let payload = serde_json::to_value(payload)?;
        Ok(self
            .shared
            .scheduler
            .lock()
            .enqueue(Some(kind.to_string()), payload, None))
    }

    /// Enqueue a request for the entry module's default handler.
    ///
    /// # Errors
    ///
    /// Fails only if `payload` cannot be serialized.
    pub fn send(&self, payload: impl Serialize) -> Result<JobHandle, PoolError> {
        let payload = serde_json::to_value(payload)?;
        Ok(self.shared.scheduler.lock().enqueue(None, payload, None))
    }

    /// Grow or shrink the pool to `size` workers (capped at the core count).
    ///
    /// # Errors
    ///
    /// See [`Pool::grow`].
    pub fn resize(&self, size: usize) -> Result<(), PoolError> {
        let target = size.min(self.shared.max_workers);
        let current = self.size();
        match target.cmp(&current) {
            std::cmp::Ordering::Greater => self.grow(target - current),
            std::cmp::Ordering::Less => self.shrink(current - target),
            std::cmp::Ordering::Equal => Ok(()),
        }
    }

    /// Spawn `count` additional workers.
    ///
    /// # Errors
    ///
    /// Fails if the pool was stopped or a worker cannot be spawned. Workers
    /// spawned before the failure stay in the pool.
    pub fn grow(&self, count: usize) -> Result<(), PoolError> {
        let granted = self
            .shared
            .scheduler
            .lock()
            .reserve(count, self.shared.max_workers)?;
        if granted < count {
            warn!(requested = count, granted = granted, "worker count capped at core count");
        }

        for spawned in 0..granted {
            let unfilled = granted - spawned;
            let WorkerLink {
                outbound,
                inbound,
                pid,
            } = match self.shared.spawner.spawn(&self.shared.options) {
                Ok(link) => link,
                Err(err) => {
                    self.shared.scheduler.lock().release(unfilled);
                    return Err(err);
                }
            };

            let worker_id = {
                let mut scheduler = self.shared.scheduler.lock();
                if !scheduler.is_accepting() {
                    scheduler.release(unfilled);
                    debug!(pid = ?pid, "pool stopped while growing, dropping new worker");
                    return Err(PoolError::InvalidOperation("pool has been stopped".into()));
                }
                scheduler.add_worker(outbound, pid, &self.shared.entry_module)
            };
            debug!(worker_id = worker_id, pid = ?pid, "worker spawned");
            self.listen(worker_id, inbound);
        }
        Ok(())
    }

    /// Stop `count` workers, idle ones first.
    ///
    /// A worker with a job in flight lets it finish before disconnecting.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidOperation`] when `count` is zero.
    pub fn shrink(&self, count: usize) -> Result<(), PoolError> {
        if count == 0 {
            return Err(PoolError::InvalidOperation(
                "number of workers to remove must be greater than 0".into(),
            ));
        }
        let retired = self.shared.scheduler.lock().retire(count);
        info!(retired = ?retired, "pool shrunk");
        Ok(())
    }

    /// Stop one worker immediately. Returns whether it was found.
    pub fn stop_worker(&self, worker_id: WorkerId) -> bool {
        self.shared.scheduler.lock().stop_worker(worker_id)
    }

    /// Stop every worker. Jobs still queued stay queued and are never
    /// dispatched; use [`Pool::reject_queue`] to release their callers.
    pub fn stop(&self) {
        self.shared.scheduler.lock().stop_all();
        info!("process pool stopped");
    }

    /// Reject every job in the global queue with `error`, returning how many
    /// were rejected.
    pub fn reject_queue(&self, error: PoolError) -> usize {
        self.shared.scheduler.lock().reject_queue(&error)
    }

    /// Number of workers in the active set.
    #[must_use]
    pub fn size(&self) -> usize {
        self.shared.scheduler.lock().active_len()
    }

    /// Upper bound on live workers.
    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.shared.max_workers
    }

    /// Entry module every worker is initialized with.
    #[must_use]
    pub fn entry_module(&self) -> &str {
        &self.shared.entry_module
    }

    /// Utilization snapshot.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.shared.scheduler.lock().stats()
    }

    /// Per-worker snapshot of the active set, in pool order.
    #[must_use]
    pub fn workers(&self) -> Vec<WorkerSnapshot> {
        self.shared.scheduler.lock().snapshots()
    }

    fn listen(&self, worker_id: WorkerId, mut inbound: mpsc::UnboundedReceiver<Message>) {
        let weak = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                shared.on_message(worker_id, message);
            }
            on_link_closed(&weak, worker_id);
        });
    }
}

fn on_link_closed(weak: &Weak<Shared>, worker_id: WorkerId) {
    if let Some(shared) = weak.upgrade() {
        shared.scheduler.lock().on_disconnect(worker_id);
    }
}

impl Shared {
    fn on_message(&self, worker_id: WorkerId, message: Message) {
        match message {
            Message::Reply { id, payload, error } => {
                self.scheduler
                    .lock()
                    .on_reply(worker_id, id, reply_result(payload, error));
            }
            // Fire-and-forget: the reader keeps draining the link meanwhile.
            Message::Notification { kind, payload } => match self.handlers.get(&kind) {
                Some(handler) => {
                    tokio::spawn(async move {
                        if let Err(err) = handler.handle(payload).await {
                            warn!(worker_id = worker_id, kind = %kind, error = %err, "notification handler failed");
                        }
                    });
                }
                None => trace!(worker_id = worker_id, kind = %kind, "notification ignored"),
            },
            Message::Request { id, kind, payload } => {
                self.on_worker_request(worker_id, id, kind.unwrap_or_default(), payload);
            }
        }
    }

    fn on_worker_request(&self, worker_id: WorkerId, id: JobId, kind: String, payload: Value) {
        let Some(outbound) = self.scheduler.lock().outbound(worker_id) else {
            return;
        };
        let Some(handler) = self.handlers.get(&kind) else {
            debug!(worker_id = worker_id, kind = %kind, "no handler for worker request");
            let error = format!("no notification handler registered for `{kind}`");
            let _ = outbound.send(Message::reply(id, Err(error)));
            return;
        };

        tokio::spawn(async move {
            let result = handler.handle(payload).await.map_err(|e| describe_error(&e));
            if outbound.send(Message::reply(id, result)).is_err() {
                debug!(worker_id = worker_id, request_id = id, "worker gone before reply");
            }
        });
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        debug!(entry_module = %self.entry_module, "process pool dropped");
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("entry_module", &self.shared.entry_module)
            .field("max_workers", &self.shared.max_workers)
            .field("handlers", &self.shared.handlers)
            .finish_non_exhaustive()
    }
}
