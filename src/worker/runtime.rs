//! Worker-side message loop.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::context::WorkerContext;
use super::error::WorkerError;
use super::handler::HandlerTable;
use super::registry::ModuleRegistry;
use crate::core::{reply_result, Message, INIT_KIND};

/// Serves the pool protocol on behalf of the modules in a [`ModuleRegistry`].
#[derive(Clone, Debug)]
pub struct WorkerRuntime {
    registry: Arc<ModuleRegistry>,
}

impl WorkerRuntime {
    /// Create a runtime serving `registry`.
    #[must_use]
    pub fn new(registry: ModuleRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// Registry this runtime loads modules from.
    #[must_use]
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Process messages from the pool until `inbound` closes.
    ///
    /// Each request runs in its own task so slow handlers never stall replies
    /// to calls the worker made itself.
    pub async fn serve(
        &self,
        mut inbound: mpsc::UnboundedReceiver<Message>,
        outbound: mpsc::UnboundedSender<Message>,
    ) {
        let context = WorkerContext::new(outbound);
        let mut table: Option<Arc<HandlerTable>> = None;

        while let Some(message) = inbound.recv().await {
            match message {
                Message::Request { id, kind, payload } if kind.as_deref() == Some(INIT_KIND) => {
                    let reply = match self.initialize(table.is_some(), &payload, &context) {
                        Ok(loaded) => {
                            table = Some(Arc::new(loaded));
                            Message::ack(id)
                        }
                        Err(err) => {
                            warn!(error = %err, "worker initialization failed");
                            Message::reply(id, Err(err.to_string()))
                        }
                    };
                    context.send(reply);
                }
                Message::Request { id, kind, payload } => {
                    let Some(table) = table.clone() else {
                        context.send(Message::reply(id, Err(WorkerError::NotInitialized.to_string())));
                        continue;
                    };
                    let context = context.clone();
                    tokio::spawn(async move {
                        let result = dispatch(&table, kind.as_deref(), payload).await;
                        if !context.send(Message::reply(id, result)) {
                            debug!(job_id = id, "pool gone before reply");
                        }
                    });
                }
                Message::Reply { id, payload, error } => {
                    if !context.resolve(id, reply_result(payload, error)) {
                        debug!(request_id = id, "reply for unknown call ignored");
                    }
                }
                Message::Notification { kind, payload } => {
                    let handler = table.as_ref().and_then(|t| t.get(&kind)).cloned();
                    match handler {
                        Some(handler) => {
                            tokio::spawn(async move {
                                if let Err(error) = handler.call(payload).await {
                                    warn!(kind = %kind, %error, "notification handler failed");
                                }
                            });
                        }
                        None => trace!(kind = %kind, "notification ignored"),
                    }
                }
            }
        }

        context.disconnect();
        debug!("pool link closed, worker runtime exiting");
    }

    fn initialize(
        &self,
        initialized: bool,
        payload: &Value,
        context: &WorkerContext,
    ) -> Result<HandlerTable, WorkerError> {
        if initialized {
            return Err(WorkerError::AlreadyInitialized);
        }
        let path = payload
            .as_str()
            .ok_or_else(|| WorkerError::ModuleNotFound(payload.to_string()))?;
        let table = self.registry.load(path, context.clone())?;
        info!(module = path, methods = table.len(), "worker initialized");
        Ok(table)
    }
}

async fn dispatch(table: &HandlerTable, kind: Option<&str>, payload: Value) -> Result<Value, String> {
    let handler = match kind {
        Some(name) => table.get(name),
        None => table.default_handler(),
    };
    match handler {
        Some(handler) => handler.call(payload).await,
        None => Err(WorkerError::HandlerNotFound(kind.unwrap_or("default").to_string()).to_string()),
    }
}
