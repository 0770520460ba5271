//! Shared helpers for integration tests.
//!
//! `ScriptedSpawner` hands out in-memory links whose worker ends are driven
//! directly by the test body, so every scheduling decision can be observed.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use prometheus_process_pool::core::{
    JobId, Message, PoolError, SpawnOptions, WorkerLink, WorkerSpawner, INIT_KIND,
};
use prometheus_process_pool::{Pool, PoolBuilder, PoolConfig};
use serde_json::Value;
use tokio::sync::mpsc;

pub const TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// FAKE WORKERS
// ============================================================================

/// Worker end of a scripted link.
pub struct FakeWorker {
    to_pool: mpsc::UnboundedSender<Message>,
    from_pool: mpsc::UnboundedReceiver<Message>,
}

/// A request observed by a fake worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: JobId,
    pub kind: Option<String>,
    pub payload: Value,
}

impl FakeWorker {
    /// Next message from the pool; panics on timeout or closed link.
    pub async fn recv(&mut self) -> Message {
        match tokio::time::timeout(TIMEOUT, self.from_pool.recv()).await {
            Ok(Some(message)) => message,
            Ok(None) => panic!("link closed while waiting for a message"),
            Err(_) => panic!("timed out waiting for a message"),
        }
    }

    /// Next request from the pool.
    pub async fn recv_request(&mut self) -> Request {
        match self.recv().await {
            Message::Request { id, kind, payload } => Request { id, kind, payload },
            other => panic!("expected request, got {other:?}"),
        }
    }

    /// Request already delivered, if any.
    pub fn try_request(&mut self) -> Option<Request> {
        match self.from_pool.try_recv() {
            Ok(Message::Request { id, kind, payload }) => Some(Request { id, kind, payload }),
            Ok(other) => panic!("expected request, got {other:?}"),
            Err(_) => None,
        }
    }

    /// Receive the handshake and acknowledge it.
    pub async fn accept_init(&mut self) -> JobId {
        let request = self.recv_request().await;
        assert_eq!(request.kind.as_deref(), Some(INIT_KIND));
        self.send(Message::ack(request.id));
        request.id
    }

    /// Receive the handshake and fail it with `error`.
    pub async fn reject_init(&mut self, error: &str) -> JobId {
        let request = self.recv_request().await;
        assert_eq!(request.kind.as_deref(), Some(INIT_KIND));
        self.reply_err(request.id, error);
        request.id
    }

    pub fn reply_ok(&self, id: JobId, payload: Value) {
        self.send(Message::reply(id, Ok(payload)));
    }

    pub fn reply_err(&self, id: JobId, error: &str) {
        self.send(Message::reply(id, Err(error.to_string())));
    }

    pub fn send(&self, message: Message) {
        // The pool may already have dropped the worker.
        let _ = self.to_pool.send(message);
    }

    /// Wait until the pool closes its side, discarding anything still queued.
    pub async fn is_disconnected(&mut self) -> bool {
        tokio::time::timeout(TIMEOUT, async {
            while self.from_pool.recv().await.is_some() {}
        })
        .await
        .is_ok()
    }

    /// Whether the pool side is still open, without waiting.
    pub fn is_connected(&mut self) -> bool {
        !matches!(
            self.from_pool.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        )
    }

    /// Simulate the worker process exiting.
    pub fn exit(self) {
        drop(self);
    }
}

// ============================================================================
// SPAWNER
// ============================================================================

/// Spawner recording the worker end of every link it creates.
#[derive(Clone, Default)]
pub struct ScriptedSpawner {
    spawned: Arc<Mutex<VecDeque<FakeWorker>>>,
    spawn_delay: Duration,
}

impl ScriptedSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawner whose every spawn blocks the calling thread for `delay`.
    pub fn with_spawn_delay(delay: Duration) -> Self {
        Self {
            spawn_delay: delay,
            ..Self::default()
        }
    }

    /// Oldest worker not yet taken by the test.
    pub fn take(&self) -> FakeWorker {
        self.spawned
            .lock()
            .pop_front()
            .expect("no spawned worker left to take")
    }

    pub fn take_all(&self) -> Vec<FakeWorker> {
        self.spawned.lock().drain(..).collect()
    }
}

impl WorkerSpawner for ScriptedSpawner {
    fn spawn(&self, _options: &SpawnOptions) -> Result<WorkerLink, PoolError> {
        if !self.spawn_delay.is_zero() {
            std::thread::sleep(self.spawn_delay);
        }
        let (to_worker, from_pool) = mpsc::unbounded_channel();
        let (to_pool, from_worker) = mpsc::unbounded_channel();
        self.spawned.lock().push_back(FakeWorker { to_pool, from_pool });
        Ok(WorkerLink::new(to_worker, from_worker))
    }
}

// ============================================================================
// POOLS
// ============================================================================

/// Builder for a scripted pool of `size` workers, uncapped by the host.
pub fn scripted_builder(size: usize, spawner: &ScriptedSpawner) -> PoolBuilder {
    PoolBuilder::new("modules/api", PoolConfig::new())
        .size(size)
        .hardware_concurrency(16)
        .spawner(spawner.clone())
}

/// Pool of `size` scripted workers that all completed their handshake.
pub async fn ready_pool(size: usize) -> (Pool, Vec<FakeWorker>) {
    let spawner = ScriptedSpawner::new();
    let pool = scripted_builder(size, &spawner).build().expect("pool");
    ready_workers(pool, &spawner).await
}

/// Accept the handshake of every worker spawned since the last call and wait
/// until the whole active set is ready.
pub async fn ready_workers(pool: Pool, spawner: &ScriptedSpawner) -> (Pool, Vec<FakeWorker>) {
    let mut workers = spawner.take_all();
    for worker in &mut workers {
        worker.accept_init().await;
    }
    let probe = pool.clone();
    wait_until(move || {
        let stats = probe.stats();
        stats.available_workers == stats.worker_count
    })
    .await;
    (pool, workers)
}

// ============================================================================
// WAITING
// ============================================================================

/// Poll `condition` until it holds; panics after [`TIMEOUT`].
pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met before timeout"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Await `future`, panicking after [`TIMEOUT`].
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(TIMEOUT, future)
        .await
        .expect("timed out")
}
