//! Pool configuration structures.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::SpawnOptions;

/// Worker count used when the configured size is zero.
pub const DEFAULT_POOL_SIZE: usize = 2;

/// Environment variable overriding [`PoolConfig::size`].
pub const SIZE_ENV: &str = "PROMETHEUS_POOL_SIZE";
/// Environment variable overriding [`PoolConfig::working_directory`].
pub const WORKDIR_ENV: &str = "PROMETHEUS_POOL_WORKDIR";
/// Environment variable overriding [`PoolConfig::extra_args`] (whitespace separated).
pub const ARGS_ENV: &str = "PROMETHEUS_POOL_ARGS";

/// Pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of workers to start. Zero selects [`DEFAULT_POOL_SIZE`].
    pub size: usize,
    /// Working directory for worker processes.
    pub working_directory: Option<PathBuf>,
    /// Replacement environment for worker processes.
    pub environment: Option<BTreeMap<String, String>>,
    /// Extra arguments passed to every worker.
    pub extra_args: Vec<String>,
    /// Override for the host core count used to cap the pool size.
    pub hardware_concurrency: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_POOL_SIZE,
            working_directory: None,
            environment: None,
            extra_args: Vec::new(),
            hardware_concurrency: None,
        }
    }
}

impl PoolConfig {
    /// Create a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of workers.
    #[must_use]
    pub const fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Set the working directory of the workers.
    #[must_use]
    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Add one environment variable to the worker environment.
    ///
    /// Setting any variable switches the workers from inheriting the parent
    /// environment to the explicit one.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Append an extra worker argument.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Override the detected host core count.
    #[must_use]
    pub const fn with_hardware_concurrency(mut self, cores: usize) -> Self {
        self.hardware_concurrency = Some(cores);
        self
    }

    /// Upper bound on live workers.
    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.hardware_concurrency.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Number of workers the pool starts with.
    #[must_use]
    pub fn effective_size(&self) -> usize {
        let requested = if self.size == 0 {
            DEFAULT_POOL_SIZE
        } else {
            self.size
        };
        requested.min(self.max_workers())
    }

    /// Settings forwarded to the spawner for every worker.
    #[must_use]
    pub fn spawn_options(&self) -> SpawnOptions {
        SpawnOptions {
            working_directory: self.working_directory.clone(),
            environment: self.environment.clone(),
            extra_args: self.extra_args.clone(),
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.hardware_concurrency == Some(0) {
            return Err("hardware_concurrency must be greater than 0".into());
        }
        if let Some(dir) = &self.working_directory {
            if dir.as_os_str().is_empty() {
                return Err("working_directory must not be empty".into());
            }
        }
        if let Some(env) = &self.environment {
            if let Some(key) = env.keys().find(|k| k.is_empty() || k.contains('=')) {
                return Err(format!("invalid environment variable name `{key}`"));
            }
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from the process environment, loading `.env` first
    /// if present.
    pub fn from_env() -> Result<Self, String> {
        // A missing .env file is not an error.
        let _ = dotenvy::dotenv();

        let mut cfg = Self::default();
        if let Ok(size) = std::env::var(SIZE_ENV) {
            cfg.size = size
                .trim()
                .parse()
                .map_err(|e| format!("{SIZE_ENV} must be a non-negative integer: {e}"))?;
        }
        if let Ok(dir) = std::env::var(WORKDIR_ENV) {
            cfg.working_directory = Some(PathBuf::from(dir));
        }
        if let Ok(args) = std::env::var(ARGS_ENV) {
            cfg.extra_args = args.split_whitespace().map(str::to_string).collect();
        }
        cfg.validate()?;
        Ok(cfg)
    }
}
