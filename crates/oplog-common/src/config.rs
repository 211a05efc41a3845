//! Configuration types for OpLog
//!
//! This module defines the tunables for the writer, reader, and sequence
//! allocator. Defaults match the behavior of a production deployment:
//! hour-long leases bound the damage of a crashed holder, batches close
//! after 1024 entries, and an idle reader backs off to a three-minute sweep.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for one partitioned queue
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Object-name prefix; also the name of the queue's control object
    pub prefix: String,
    /// Writer tunables
    pub writer: WriterConfig,
    /// Reader tunables
    pub reader: ReaderConfig,
}

impl QueueConfig {
    /// Config with the given prefix and default tunables
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            writer: WriterConfig::default(),
            reader: ReaderConfig::default(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::new("oplog")
    }
}

/// Writer tunables
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Entries per session before an immediate flush
    pub batch_threshold: usize,
    /// Quiescence period after which an open session is flushed
    pub idle_flush: Duration,
    /// Re-arm period for a flush deferred by an open transaction
    pub deferred_flush: Duration,
    /// Exclusive lease duration on the open entry-object
    pub lease_duration: Duration,
    /// Maximum tail-position races before `append` gives up
    pub max_open_attempts: u32,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_threshold: 1024,
            idle_flush: Duration::from_secs(3600),
            deferred_flush: Duration::from_secs(60),
            lease_duration: Duration::from_secs(3600),
            max_open_attempts: 64,
        }
    }
}

/// Reader tunables
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Delay before the next sweep when the last one handled nothing
    pub sweep_backoff: Duration,
    /// Exclusive lease duration on a claimed entry-object
    pub lease_duration: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            sweep_backoff: Duration::from_secs(180),
            lease_duration: Duration::from_secs(3600),
        }
    }
}

/// Sequence allocator tunables
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AllocatorConfig {
    /// Maximum partition attempts per `generate` call
    pub max_attempts: u32,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self { max_attempts: 64 }
    }
}
