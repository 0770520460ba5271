//! Jobs (envelopes) and the futures callers hold while they are serviced.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;

use super::error::PoolError;
use super::message::Message;

/// Correlation identifier of a job.
pub type JobId = u64;

/// Outcome delivered to whoever waits on a job.
pub type JobOutcome = Result<Value, PoolError>;

/// Where a job's outcome goes once a reply arrives.
#[derive(Debug)]
pub(crate) enum ReplyTo {
    /// A caller holding a [`JobHandle`].
    Caller(oneshot::Sender<JobOutcome>),
    /// The worker handshake; its outcome drives the worker state machine.
    Handshake,
}

/// One unit of work waiting in a queue or in a worker's pending table.
#[derive(Debug)]
pub(crate) struct Job {
    pub id: JobId,
    pub kind: Option<String>,
    pub payload: Value,
    pub reply_to: ReplyTo,
}

impl Job {
    /// Create a job addressed to a caller, returning the caller's handle.
    pub fn for_caller(id: JobId, kind: Option<String>, payload: Value) -> (Self, JobHandle) {
        let (tx, rx) = oneshot::channel();
        let job = Self {
            id,
            kind,
            payload,
            reply_to: ReplyTo::Caller(tx),
        };
        (job, JobHandle { id, rx })
    }

    /// Create the handshake job carrying the entry module path.
    pub fn handshake(id: JobId, module: &str) -> Self {
        Self {
            id,
            kind: Some(super::message::INIT_KIND.to_string()),
            payload: Value::String(module.to_string()),
            reply_to: ReplyTo::Handshake,
        }
    }

    /// Whether this is the worker handshake.
    pub const fn is_handshake(&self) -> bool {
        matches!(self.reply_to, ReplyTo::Handshake)
    }

    /// The request message transmitted to the worker.
    pub fn to_message(&self) -> Message {
        Message::request(self.id, self.kind.clone(), self.payload.clone())
    }

    /// Settle a caller job. Handshake jobs are settled by the scheduler.
    pub fn settle(self, outcome: JobOutcome) {
        if let ReplyTo::Caller(tx) = self.reply_to {
            // The caller may have dropped its handle; nothing to do then.
            let _ = tx.send(outcome);
        }
    }

    /// Reject the job with `error`.
    pub fn reject(self, error: PoolError) {
        self.settle(Err(error));
    }
}

/// Future resolving to the outcome of an enqueued job.
///
/// Resolves with the handler's result, the error it produced, or
/// [`PoolError::Abandoned`] if the pool is dropped before the job is serviced.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    rx: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    /// Correlation id assigned to the job.
    #[must_use]
    pub const fn id(&self) -> JobId {
        self.id
    }

    /// Wait for the result and deserialize it into `R`.
    pub async fn json<R: DeserializeOwned>(self) -> Result<R, PoolError> {
        let value = self.await?;
        Ok(serde_json::from_value(value)?)
    }
}

impl Future for JobHandle {
    type Output = JobOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(PoolError::Abandoned)),
            Poll::Pending => Poll::Pending,
        }
    }
}
