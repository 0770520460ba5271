//! Worker-side handlers and the dispatcher that runs them.
//!
//! A handler receives the request payload and a [`Completion`]. It may answer
//! through the completion (immediately or from a task it spawns), or return a
//! deferred future producing the answer. The dispatcher races both; the first
//! to produce a value wins. An error returned synchronously, or a panic in
//! either path, becomes an error reply.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::core::describe_error;

/// One-shot channel a handler uses to deliver its result.
#[derive(Debug)]
pub struct Completion {
    tx: oneshot::Sender<anyhow::Result<Value>>,
}

impl Completion {
    fn channel() -> (Self, oneshot::Receiver<anyhow::Result<Value>>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Deliver a result.
    pub fn complete(self, result: anyhow::Result<Value>) {
        // The dispatcher may already have taken a deferred result.
        let _ = self.tx.send(result);
    }

    /// Deliver a successful value.
    pub fn resolve(self, value: Value) {
        self.complete(Ok(value));
    }

    /// Deliver an error.
    pub fn reject(self, error: impl Into<anyhow::Error>) {
        self.complete(Err(error.into()));
    }

    /// Whether the dispatcher stopped listening.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// What a handler did with its request.
pub enum Outcome {
    /// The answer goes (or went) through the [`Completion`].
    Pending,
    /// The answer is produced by this future.
    Deferred(BoxFuture<'static, anyhow::Result<Value>>),
}

type Method = Arc<dyn Fn(Value, Completion) -> anyhow::Result<Outcome> + Send + Sync>;

/// A callable worker method.
#[derive(Clone)]
pub struct Handler {
    method: Method,
}

impl Handler {
    /// Wrap a raw method supporting both conventions.
    pub fn new<F>(method: F) -> Self
    where
        F: Fn(Value, Completion) -> anyhow::Result<Outcome> + Send + Sync + 'static,
    {
        Self {
            method: Arc::new(method),
        }
    }

    /// Handler answering through its [`Completion`].
    pub fn callback<F>(method: F) -> Self
    where
        F: Fn(Value, Completion) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::new(move |payload, completion| {
            method(payload, completion)?;
            Ok(Outcome::Pending)
        })
    }

    /// Handler answering with a future.
    pub fn deferred<F, Fut>(method: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self::new(move |payload, _completion| Ok(Outcome::Deferred(Box::pin(method(payload)))))
    }

    /// Handler computing its answer synchronously.
    pub fn sync<F>(method: F) -> Self
    where
        F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::new(move |payload, completion| {
            completion.resolve(method(payload)?);
            Ok(Outcome::Pending)
        })
    }

    /// Run the handler and return the reply it produced.
    pub async fn call(&self, payload: Value) -> Result<Value, String> {
        let (completion, mut done) = Completion::channel();
        let method = Arc::clone(&self.method);

        let deferred = match std::panic::catch_unwind(AssertUnwindSafe(|| method(payload, completion)))
        {
            Err(panic) => return Err(panic_text(&*panic)),
            Ok(Err(err)) => return Err(describe_error(&err)),
            Ok(Ok(Outcome::Pending)) => None,
            Ok(Ok(Outcome::Deferred(future))) => Some(future),
        };

        let Some(future) = deferred else {
            return match done.await {
                Ok(result) => result.map_err(|e| describe_error(&e)),
                Err(_) => Err("handler dropped its completion without answering".to_string()),
            };
        };

        let mut future = AssertUnwindSafe(future).catch_unwind();
        tokio::select! {
            Ok(result) = &mut done => result.map_err(|e| describe_error(&e)),
            outcome = &mut future => match outcome {
                Ok(result) => result.map_err(|e| describe_error(&e)),
                Err(panic) => Err(panic_text(&*panic)),
            },
        }
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler").finish_non_exhaustive()
    }
}

fn panic_text(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Methods of a loaded module, keyed by name, plus an optional default
/// handler for requests without a kind.
#[derive(Clone, Debug, Default)]
pub struct HandlerTable {
    methods: HashMap<String, Handler>,
    default: Option<Handler>,
}

impl HandlerTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` as the method `name`.
    pub fn register(&mut self, name: impl Into<String>, handler: Handler) -> &mut Self {
        self.methods.insert(name.into(), handler);
        self
    }

    /// Set the handler for requests without a kind.
    pub fn set_default(&mut self, handler: Handler) -> &mut Self {
        self.default = Some(handler);
        self
    }

    /// Method registered as `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Handler> {
        self.methods.get(name)
    }

    /// Handler for requests without a kind.
    #[must_use]
    pub const fn default_handler(&self) -> Option<&Handler> {
        self.default.as_ref()
    }

    /// Registered method names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of named methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether no named method is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_callback_completes_later() {
        let handler = Handler::callback(|payload, completion| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                completion.resolve(json!(format!("{} world", payload.as_str().unwrap_or(""))));
            });
            Ok(())
        });
        assert_eq!(handler.call(json!("hello")).await, Ok(json!("hello world")));
    }

    #[tokio::test]
    async fn test_deferred_result() {
        let handler = Handler::deferred(|payload| async move { anyhow::Ok(payload) });
        assert_eq!(handler.call(json!([1, 2])).await, Ok(json!([1, 2])));
    }

    #[tokio::test]
    async fn test_completion_beats_pending_future() {
        let handler = Handler::new(|_payload, completion| {
            completion.resolve(json!("fast"));
            Ok(Outcome::Deferred(Box::pin(futures::future::pending::<anyhow::Result<Value>>())))
        });
        assert_eq!(handler.call(Value::Null).await, Ok(json!("fast")));
    }

    #[tokio::test]
    async fn test_synchronous_error_becomes_reply() {
        let handler = Handler::sync(|_| Err(anyhow::anyhow!("boom")));
        let err = handler.call(Value::Null).await.unwrap_err();
        assert!(err.contains("boom"));
    }

    #[tokio::test]
    async fn test_panic_becomes_reply() {
        let handler = Handler::sync(|_| panic!("exploded"));
        assert_eq!(handler.call(Value::Null).await, Err("exploded".to_string()));

        let deferred = Handler::deferred(|_| async move {
            if true {
                panic!("late explosion");
            }
            anyhow::Ok(Value::Null)
        });
        assert_eq!(deferred.call(Value::Null).await, Err("late explosion".to_string()));
    }

    #[tokio::test]
    async fn test_dropped_completion_is_an_error() {
        let handler = Handler::callback(|_payload, _completion| Ok(()));
        assert!(handler.call(Value::Null).await.is_err());
    }

    #[test]
    fn test_table_names_sorted() {
        let mut table = HandlerTable::new();
        table
            .register("say", Handler::sync(anyhow::Ok))
            .register("echo", Handler::sync(anyhow::Ok));
        assert_eq!(table.names(), vec!["echo", "say"]);
        assert!(table.default_handler().is_none());
    }
}
