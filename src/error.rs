//! Crate level errors.
//!
//! Most cache operations never fail: looking up an unknown partition key,
//! polling an empty queue or asking for an unknown broker yields an empty
//! result, and callers treat "not found" as a normal outcome. Errors are
//! reserved for:
//!
//! - invalid configuration,
//! - a rebalance event that cannot be delivered because the consumer side of
//!   the delivery channel is gone,
//! - a detected inconsistency between the registry's indices, which is a bug
//!   and is treated as fatal by the test suite.

use std::result;
use thiserror::Error as ThisError;

pub type Result<T> = result::Result<T, CacheError>;

/// Errors reported by the partition cache.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum CacheError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The receiving half of the event delivery channel was dropped.
    #[error("Event delivery channel closed")]
    EventChannelClosed,

    /// Registry indices or allocation state disagree with each other.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl CacheError {
    /// Returns true for errors that indicate a bug rather than bad input.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CacheError::InvariantViolation(_))
    }
}

impl From<Box<dyn std::error::Error>> for CacheError {
    fn from(e: Box<dyn std::error::Error>) -> Self {
        CacheError::Config(e.to_string())
    }
}

impl From<Vec<String>> for CacheError {
    fn from(errors: Vec<String>) -> Self {
        CacheError::Config(errors.join("; "))
    }
}
