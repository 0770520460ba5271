//! Builder assembling configuration, notification handlers and a spawner
//! into a [`Pool`].

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::PoolConfig;
use crate::core::{NotificationHandler, NotificationHandlers, Pool, PoolError, WorkerSpawner};
use crate::infra::ProcessSpawner;

/// Builds a [`Pool`].
///
/// ```rust,ignore
/// let pool = PoolBuilder::new("modules/api", PoolConfig::from_env()?)
///     .size(4)
///     .on_notification("progress", |payload: Value| async move {
///         tracing::info!(%payload, "progress");
///         anyhow::Ok(Value::Null)
///     })
///     .spawner(ProcessSpawner::new("target/release/api-worker"))
///     .build()?;
/// ```
pub struct PoolBuilder {
    entry_module: String,
    config: PoolConfig,
    handlers: NotificationHandlers,
    spawner: Option<Arc<dyn WorkerSpawner>>,
}

impl PoolBuilder {
    /// Start from `config` for workers initialized with `entry_module`.
    pub fn new(entry_module: impl Into<String>, config: PoolConfig) -> Self {
        Self {
            entry_module: entry_module.into(),
            config,
            handlers: NotificationHandlers::new(),
            spawner: None,
        }
    }

    /// Entry module the workers will load.
    #[must_use]
    pub fn entry_module(&self) -> &str {
        &self.entry_module
    }

    /// Configuration collected so far.
    #[must_use]
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Number of workers to start.
    #[must_use]
    pub fn size(mut self, size: usize) -> Self {
        self.config = self.config.with_size(size);
        self
    }

    /// Working directory of the workers.
    #[must_use]
    pub fn working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config = self.config.with_working_directory(dir);
        self
    }

    /// Add a variable to the worker environment.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config = self.config.with_env(key, value);
        self
    }

    /// Append a worker argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.config = self.config.with_arg(arg);
        self
    }

    /// Override the detected host core count.
    #[must_use]
    pub fn hardware_concurrency(mut self, cores: usize) -> Self {
        self.config = self.config.with_hardware_concurrency(cores);
        self
    }

    /// Handle notifications and requests of `kind` sent by workers.
    #[must_use]
    pub fn on_notification(mut self, kind: impl Into<String>, handler: impl NotificationHandler) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    /// Use `spawner` instead of re-running the current executable.
    #[must_use]
    pub fn spawner(mut self, spawner: impl WorkerSpawner) -> Self {
        self.spawner = Some(Arc::new(spawner));
        self
    }

    /// Create the pool and spawn its workers.
    ///
    /// # Errors
    ///
    /// See [`Pool::new`].
    pub fn build(self) -> Result<Pool, PoolError> {
        let spawner: Arc<dyn WorkerSpawner> = match self.spawner {
            Some(spawner) => spawner,
            None => Arc::new(ProcessSpawner::current_exe()?),
        };
        Pool::with_parts(self.entry_module, &self.config, self.handlers, spawner)
    }
}

impl std::fmt::Debug for PoolBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolBuilder")
            .field("entry_module", &self.entry_module)
            .field("config", &self.config)
            .field("handlers", &self.handlers)
            .field("custom_spawner", &self.spawner.is_some())
            .finish()
    }
}
