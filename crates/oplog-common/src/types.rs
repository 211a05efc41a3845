//! Core type definitions for OpLog

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of a lease holder.
///
/// Every writer and reader instance carries its own holder id so that lease
/// renewal only succeeds for the instance that acquired the lease, even when
/// many processes share the same store.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct HolderId(String);

impl HolderId {
    /// Generate a holder id for a writer instance
    #[must_use]
    pub fn writer() -> Self {
        Self(format!("writer:{}", Uuid::new_v4()))
    }

    /// Generate a holder id for a reader instance
    #[must_use]
    pub fn reader() -> Self {
        Self(format!("reader:{}", Uuid::new_v4()))
    }

    /// Create from an existing identity string
    #[must_use]
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the holder id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HolderId({})", self.0)
    }
}
