//! Error types for cache operations

use thiserror::Error;

/// Main error type for all cache operations
///
/// The enum is `Clone` so that a single-flight executor can publish one
/// outcome to any number of waiters.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// The supplied loader failed
    #[error("loader failed: {0}")]
    Loader(String),

    /// A coalesced execution failed; wraps the executor's error as seen by waiters
    #[error("coalesced execution failed")]
    Execution(#[source] Box<CacheError>),

    /// A single-flight waiter's bounded wait elapsed
    #[error("single-flight call timed out")]
    Timeout,

    /// The external key-value store could not be reached or refused the operation
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Serialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Construct a loader failure from any displayable cause
    pub fn loader(cause: impl std::fmt::Display) -> Self {
        CacheError::Loader(cause.to_string())
    }

    /// The error an executor's failure surfaces as to coalesced waiters
    pub fn into_execution(self) -> Self {
        CacheError::Execution(Box::new(self))
    }

    /// Peel the `Execution` wrapper, if any, yielding the executor's own error
    pub fn execution_cause(&self) -> &CacheError {
        match self {
            CacheError::Execution(inner) => inner,
            other => other,
        }
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
