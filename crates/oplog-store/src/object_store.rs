//! Object store collaborator trait
//!
//! Every primitive here is assumed to be atomic at the storage fabric:
//! the queue core never re-implements atomicity on top of them. All calls
//! are network I/O points and may block or time out.

use async_trait::async_trait;
use bytes::Bytes;
use oplog_common::{HolderId, Result};
use std::time::Duration;

/// Atomic per-object operations provided by the storage fabric.
///
/// Errors are reported through the common taxonomy: races surface as
/// contention variants (`ObjectExists`, `StaleSequence`, `LeaseHeld`) that
/// callers resolve by retrying elsewhere, everything else is infrastructure
/// and propagates unchanged.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create an object. With `exclusive` set, fails with
    /// [`Error::ObjectExists`](oplog_common::Error::ObjectExists) when the
    /// object is already present; otherwise an existing object is left as is.
    async fn create(&self, name: &str, exclusive: bool) -> Result<()>;

    /// Remove an object and everything attached to it (header, content,
    /// lease).
    async fn remove(&self, name: &str) -> Result<()>;

    /// Check whether an object exists.
    async fn exists(&self, name: &str) -> Result<bool>;

    /// Read the object's header. An object that never had its header
    /// written returns empty bytes.
    async fn read_header(&self, name: &str) -> Result<Bytes>;

    /// Atomically replace the object's header, but only if its current
    /// value equals `expected`. A mismatch fails with
    /// [`Error::StaleSequence`](oplog_common::Error::StaleSequence) and
    /// leaves the stored value untouched.
    async fn compare_and_swap_header(&self, name: &str, expected: &[u8], new: &[u8]) -> Result<()>;

    /// Append bytes to the object's content.
    async fn append(&self, name: &str, data: &[u8]) -> Result<()>;

    /// Read the object's full content.
    async fn read_all(&self, name: &str) -> Result<Bytes>;

    /// Acquire an exclusive lease on the object. The lease expires on its
    /// own after `duration`. Re-acquiring with the same `(lock_id, holder)`
    /// renews it; any other live lease fails with
    /// [`Error::LeaseHeld`](oplog_common::Error::LeaseHeld).
    async fn lock_exclusive(
        &self,
        name: &str,
        lock_id: &str,
        holder: &HolderId,
        duration: Duration,
    ) -> Result<()>;

    /// Release a lease previously acquired by this `(lock_id, holder)`.
    /// Releasing an already-expired or absent lease is not an error.
    async fn unlock(&self, name: &str, lock_id: &str, holder: &HolderId) -> Result<()>;
}
