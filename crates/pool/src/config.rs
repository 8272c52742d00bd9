//! Pool configuration.

use std::num::NonZeroUsize;
use std::thread;

use thiserror::Error;
use tracing::{debug, warn};

/// Environment variable overriding [`PoolConfig::max_workers`].
pub const ENV_MAX_WORKERS: &str = "FMUPOOL_MAX_WORKERS";

/// Environment variable overriding [`PoolConfig::mailbox_capacity`].
pub const ENV_MAILBOX_CAPACITY: &str = "FMUPOOL_MAILBOX_CAPACITY";

const DEFAULT_MAILBOX_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("max_workers must be at least 1")]
    ZeroWorkers,

    #[error("mailbox_capacity must be at least 1")]
    ZeroMailboxCapacity,

    #[error("invalid value for {var}: {value:?} (expected a positive integer)")]
    InvalidEnv { var: &'static str, value: String },
}

/// Pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Requested concurrency ceiling (clamped, see [`PoolConfig::effective_workers`]).
    pub max_workers: usize,
    /// Bounded capacity of the result mailbox.
    pub mailbox_capacity: usize,
    /// Name for logging and thread names.
    pub name: String,
    /// Parallelism to clamp against; `None` asks the OS.
    pub available_parallelism: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: detected_parallelism(),
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            name: "fmupool".to_string(),
            available_parallelism: None,
        }
    }
}

impl PoolConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.max_workers = max;
        self
    }

    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    /// Pretend the machine has `cpus` hardware threads (containers, tests).
    pub fn with_available_parallelism(mut self, cpus: usize) -> Self {
        self.available_parallelism = Some(cpus);
        self
    }

    /// Defaults overridden by `FMUPOOL_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`PoolConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        match lookup(ENV_MAX_WORKERS) {
            Some(raw) => config.max_workers = parse_positive(ENV_MAX_WORKERS, &raw)?,
            None => debug!(var = ENV_MAX_WORKERS, default = config.max_workers, "not set; using default"),
        }
        match lookup(ENV_MAILBOX_CAPACITY) {
            Some(raw) => config.mailbox_capacity = parse_positive(ENV_MAILBOX_CAPACITY, &raw)?,
            None => debug!(
                var = ENV_MAILBOX_CAPACITY,
                default = config.mailbox_capacity,
                "not set; using default"
            ),
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::ZeroMailboxCapacity);
        }
        Ok(())
    }

    /// The concurrency ceiling actually used: at most one less than the
    /// available parallelism (the controller keeps a core), never below 1.
    pub fn effective_workers(&self) -> usize {
        let cpus = self.available_parallelism.unwrap_or_else(detected_parallelism);
        let cap = cpus.saturating_sub(1).max(1);
        let effective = self.max_workers.min(cap).max(1);
        if effective < self.max_workers {
            warn!(
                pool = %self.name,
                requested = self.max_workers,
                effective,
                cpus,
                "concurrency ceiling clamped to available parallelism"
            );
        }
        effective
    }
}

fn detected_parallelism() -> usize {
    thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

fn parse_positive(var: &'static str, raw: &str) -> Result<usize, ConfigError> {
    match raw.trim().parse::<usize>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(ConfigError::InvalidEnv {
            var,
            value: raw.to_string(),
        }),
    }
}
