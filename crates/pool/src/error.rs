//! Batch-level errors.
//!
//! Per-job failures never show up here: they are `Outcome::Failure` values in
//! the job's slot. A `PoolError` means the batch itself could not complete.

use std::io;

use thiserror::Error;

use fmupool_core::{JobIndex, SpecError};

use crate::config::ConfigError;

pub type PoolResult<T> = Result<T, PoolError>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("job {index} has an invalid configuration: {source}")]
    InvalidJob {
        index: JobIndex,
        #[source]
        source: SpecError,
    },

    /// The worker for `index` could not be started; the batch was aborted
    /// after every already-running worker finished.
    #[error("failed to launch worker for job {index}: {source}")]
    Launch {
        index: JobIndex,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn {what} thread: {source}")]
    Thread {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    /// The result or completion channel broke; no partial results are returned.
    #[error("result channel failure: {0}")]
    Channel(String),

    #[error("no outcome collected for job {0}")]
    MissingOutcome(JobIndex),
}

impl PoolError {
    pub fn channel(msg: impl Into<String>) -> Self {
        Self::Channel(msg.into())
    }
}
