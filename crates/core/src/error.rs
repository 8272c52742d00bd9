//! Error model shared by the pool and its collaborators.

use thiserror::Error;

/// Result type used when building job configurations.
pub type SpecResult<T> = Result<T, SpecError>;

/// A job configuration was rejected before any worker was launched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SpecError {
    /// Neither an explicit output selection nor an `options.filter` fallback was given.
    #[error("missing output selection (set `name_output` or `options.filter`)")]
    MissingOutputSelection,

    /// Every job needs at least one attempt.
    #[error("retry limit must be at least 1, got {0}")]
    InvalidRetryLimit(u32),

    /// A field had the wrong shape (e.g. a number where a list was expected).
    #[error("malformed job configuration: {0}")]
    Malformed(String),
}

impl SpecError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

/// Failure raised by the external simulation collaborator.
///
/// Serialisable as text only: live error objects never cross the worker
/// boundary, the pool records `to_string()` of the last one.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The model or options were rejected by the engine.
    #[error("invalid simulation input: {0}")]
    InvalidInput(String),

    /// The solver failed to converge.
    #[error("simulation diverged: {0}")]
    Diverged(String),

    /// Anything else (I/O, result extraction, engine bugs).
    #[error("simulation engine error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn diverged(msg: impl Into<String>) -> Self {
        Self::Diverged(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
