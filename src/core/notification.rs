//! Pool-side handlers for messages initiated by workers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// Handler invoked when a worker sends a notification or request of a given
/// kind.
///
/// For plain notifications the result is discarded. For worker-side requests
/// the result (or error) is sent back as the reply.
///
/// Any `Fn(Value) -> impl Future<Output = anyhow::Result<Value>>` closure is a
/// handler:
///
/// ```rust,ignore
/// builder.on_notification("workerSaid", |payload| async move {
///     tracing::info!(%payload, "worker said");
///     anyhow::Ok(serde_json::Value::Null)
/// });
/// ```
#[async_trait]
pub trait NotificationHandler: Send + Sync + 'static {
    /// Handle one message payload.
    async fn handle(&self, payload: Value) -> anyhow::Result<Value>;
}

#[async_trait]
impl<F, Fut> NotificationHandler for F
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn handle(&self, payload: Value) -> anyhow::Result<Value> {
        (self)(payload).await
    }
}

/// Registered handlers keyed by kind.
#[derive(Clone, Default)]
pub struct NotificationHandlers {
    handlers: HashMap<String, Arc<dyn NotificationHandler>>,
}

impl NotificationHandlers {
    /// Create an empty handler set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`, replacing any previous one.
    pub fn insert(&mut self, kind: impl Into<String>, handler: impl NotificationHandler) {
        self.handlers.insert(kind.into(), Arc::new(handler));
    }

    /// Handler registered for `kind`.
    #[must_use]
    pub fn get(&self, kind: &str) -> Option<Arc<dyn NotificationHandler>> {
        self.handlers.get(kind).cloned()
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for NotificationHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&String> = self.handlers.keys().collect();
        kinds.sort();
        f.debug_struct("NotificationHandlers")
            .field("kinds", &kinds)
            .finish()
    }
}
