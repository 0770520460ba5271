//! Worker-side handle for talking back to the pool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use super::error::WorkerError;
use crate::core::{JobId, Message};

type Call = oneshot::Sender<Result<Value, String>>;

/// Lets module code notify the pool or invoke pool-side handlers.
///
/// Cheap to clone; given to module factories at initialization.
#[derive(Clone)]
pub struct WorkerContext {
    inner: Arc<Inner>,
}

struct Inner {
    outbound: mpsc::UnboundedSender<Message>,
    calls: Mutex<HashMap<JobId, Call>>,
    next_id: AtomicU64,
}

impl WorkerContext {
    pub(crate) fn new(outbound: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            inner: Arc::new(Inner {
                outbound,
                calls: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Send a fire-and-forget notification to the pool.
    ///
    /// # Errors
    ///
    /// Fails if the payload cannot be serialized or the link is closed.
    pub fn notify(&self, kind: &str, payload: impl Serialize) -> Result<(), WorkerError> {
        let message = Message::notification(kind, serde_json::to_value(payload)?);
        self.inner
            .outbound
            .send(message)
            .map_err(|_| WorkerError::Disconnected)
    }

    /// Invoke the pool-side handler registered for `kind` and wait for its
    /// reply.
    ///
    /// # Errors
    ///
    /// [`WorkerError::Remote`] carries the pool-side failure text;
    /// [`WorkerError::Disconnected`] means the pool went away first.
    pub async fn invoke(&self, kind: &str, payload: impl Serialize) -> Result<Value, WorkerError> {
        let payload = serde_json::to_value(payload)?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.calls.lock().insert(id, tx);

        let request = Message::request(id, Some(kind.to_string()), payload);
        if self.inner.outbound.send(request).is_err() {
            self.inner.calls.lock().remove(&id);
            return Err(WorkerError::Disconnected);
        }

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(WorkerError::Remote(error)),
            Err(_) => Err(WorkerError::Disconnected),
        }
    }

    /// Settle the outstanding call `id`. Returns whether it was known.
    pub(crate) fn resolve(&self, id: JobId, result: Result<Value, String>) -> bool {
        let call = self.inner.calls.lock().remove(&id);
        call.is_some_and(|tx| {
            let _ = tx.send(result);
            true
        })
    }

    /// Fail every outstanding call with [`WorkerError::Disconnected`].
    pub(crate) fn disconnect(&self) {
        self.inner.calls.lock().clear();
    }

    pub(crate) fn send(&self, message: Message) -> bool {
        self.inner.outbound.send(message).is_ok()
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.inner.calls.lock().len()
    }
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("outstanding", &self.outstanding())
            .finish_non_exhaustive()
    }
}
