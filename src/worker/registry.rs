//! Registry of loadable worker modules.
//!
//! Workers cannot load code at run time, so every module a pool may name as
//! its entry point is compiled into the worker binary and registered here
//! under a path string. The handshake looks the path up and builds the
//! worker's [`HandlerTable`] from it.

use std::collections::HashMap;
use std::sync::Arc;

use super::context::WorkerContext;
use super::error::WorkerError;
use super::handler::{Handler, HandlerTable};
use crate::core::describe_error;

/// A module exposing named methods to the pool.
///
/// ```rust,ignore
/// struct Api;
///
/// impl WorkerModule for Api {
///     fn register(self: Arc<Self>, table: &mut HandlerTable) {
///         table.register("say", Handler::sync(|payload| {
///             anyhow::Ok(json!(format!("{} world", payload.as_str().unwrap_or_default())))
///         }));
///     }
/// }
/// ```
pub trait WorkerModule: Send + Sync + 'static {
    /// Register the module's methods (and optionally a default handler).
    fn register(self: Arc<Self>, table: &mut HandlerTable);
}

type Factory = Arc<dyn Fn(WorkerContext) -> anyhow::Result<Arc<dyn WorkerModule>> + Send + Sync>;

#[derive(Clone)]
enum Target {
    Module(Factory),
    Function(Handler),
}

/// Map from entry module path to what the worker loads for it.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    targets: HashMap<String, Target>,
}

impl ModuleRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module constructed by `factory` at handshake time.
    #[must_use]
    pub fn module<M, F>(mut self, path: impl Into<String>, factory: F) -> Self
    where
        M: WorkerModule,
        F: Fn(WorkerContext) -> anyhow::Result<M> + Send + Sync + 'static,
    {
        let factory: Factory =
            Arc::new(move |ctx: WorkerContext| -> anyhow::Result<Arc<dyn WorkerModule>> {
                Ok(Arc::new(factory(ctx)?))
            });
        self.targets.insert(path.into(), Target::Module(factory));
        self
    }

    /// Register a single function; it becomes the default handler.
    #[must_use]
    pub fn function(mut self, path: impl Into<String>, handler: Handler) -> Self {
        self.targets.insert(path.into(), Target::Function(handler));
        self
    }

    /// Whether `path` is registered.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.targets.contains_key(path)
    }

    /// Registered paths, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.targets.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    /// Resolve `path` and build the handler table for it.
    pub(crate) fn load(&self, path: &str, ctx: WorkerContext) -> Result<HandlerTable, WorkerError> {
        let mut table = HandlerTable::new();
        match self.targets.get(path) {
            None => return Err(WorkerError::ModuleNotFound(path.to_string())),
            Some(Target::Function(handler)) => {
                table.set_default(handler.clone());
            }
            Some(Target::Module(factory)) => {
                let module =
                    factory(ctx).map_err(|e| WorkerError::ModuleConstruction(describe_error(&e)))?;
                module.register(&mut table);
            }
        }
        Ok(table)
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("paths", &self.paths())
            .finish()
    }
}
