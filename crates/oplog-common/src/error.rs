//! Error types for OpLog
//!
//! Errors fall into four classes: contention (lost a race, retry somewhere
//! else), exhaustion (a sequence range or retry budget ran out),
//! infrastructure (store/network failures, always propagated), and handler
//! outcomes (which never surface here — see the reader's `Outcome` type).

use thiserror::Error;

/// Common result type for OpLog operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for OpLog
#[derive(Debug, Error)]
pub enum Error {
    // Contention errors
    #[error("sequence record changed since read: compare-and-swap not applied")]
    StaleSequence,

    #[error("lease already held on object: {object}")]
    LeaseHeld { object: String },

    #[error("object already exists: {0}")]
    ObjectExists(String),

    // Exhaustion errors
    #[error("partition {partition} has reached its sequence limit")]
    PartitionExhausted { partition: u32 },

    #[error("no allocatable partition found after {attempts} attempts")]
    PoolExhausted { attempts: u32 },

    // Infrastructure errors
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("corrupt object content: {0}")]
    Corrupt(String),

    #[error("object store error: {0}")]
    Store(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("pool not initialized: {0}")]
    NotInitialized(String),

    #[error("component is closed")]
    Closed,
}

impl Error {
    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a corrupt-content error
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    /// Check if this error is a resolvable race (retry with a different
    /// partition or position)
    #[must_use]
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            Self::StaleSequence | Self::LeaseHeld { .. } | Self::ObjectExists(_)
        )
    }

    /// Check if this error means a sequence range or retry budget ran out
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(
            self,
            Self::PartitionExhausted { .. } | Self::PoolExhausted { .. }
        )
    }
}
