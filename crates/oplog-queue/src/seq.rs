//! Durable sequence records
//!
//! A sequence record is a `(current, limit)` pair stored as an object's
//! header and advanced only through compare-and-swap: a writer supplies the
//! record it last read, and the swap fails with `StaleSequence` when anyone
//! advanced the record in between. Invariant: `current <= limit`.

use oplog_common::{Error, Result};
use oplog_store::ObjectStore;

/// Encoded size of a sequence record header
pub const RECORD_LEN: usize = 16;

/// Durable `(current, limit)` counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceRecord {
    /// Next value to hand out
    pub current: u64,
    /// First value that must never be handed out
    pub limit: u64,
}

impl SequenceRecord {
    /// Create a record, enforcing `current <= limit`
    pub fn new(current: u64, limit: u64) -> Result<Self> {
        if current > limit {
            return Err(Error::InvalidArgument(format!(
                "sequence current {current} exceeds limit {limit}"
            )));
        }
        Ok(Self { current, limit })
    }

    /// Whether the record refuses further advancement
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.current == self.limit
    }

    /// Encode as a 16-byte little-endian header
    #[must_use]
    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut buf = [0u8; RECORD_LEN];
        buf[..8].copy_from_slice(&self.current.to_le_bytes());
        buf[8..].copy_from_slice(&self.limit.to_le_bytes());
        buf
    }

    /// Decode from header bytes
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != RECORD_LEN {
            return Err(Error::corrupt(format!(
                "sequence record is {} bytes, expected {RECORD_LEN}",
                data.len()
            )));
        }
        let mut word = [0u8; 8];
        word.copy_from_slice(&data[..8]);
        let current = u64::from_le_bytes(word);
        word.copy_from_slice(&data[8..]);
        let limit = u64::from_le_bytes(word);
        if current > limit {
            return Err(Error::corrupt(format!(
                "sequence record current {current} exceeds limit {limit}"
            )));
        }
        Ok(Self { current, limit })
    }

    /// Read the record stored at `name`.
    ///
    /// An object with an empty header means the pool bootstrap never
    /// finished; that is reported as `NotInitialized` rather than a decode
    /// error.
    pub async fn read(store: &dyn ObjectStore, name: &str) -> Result<Self> {
        let header = store.read_header(name).await?;
        if header.is_empty() {
            return Err(Error::NotInitialized(name.to_string()));
        }
        Self::decode(&header)
    }

    /// Advance the record at `name` from the value this copy holds.
    ///
    /// Fails with `StaleSequence` when the stored record no longer matches
    /// `self`, and refuses to advance an exhausted record.
    pub async fn advance(&self, store: &dyn ObjectStore, name: &str) -> Result<()> {
        if self.is_exhausted() {
            return Err(Error::InvalidArgument(format!(
                "sequence record at {name} is exhausted"
            )));
        }
        let next = Self {
            current: self.current + 1,
            limit: self.limit,
        };
        store
            .compare_and_swap_header(name, &self.encode(), &next.encode())
            .await
    }

    /// Create the object at `name` and install this record as its header.
    ///
    /// The create is non-exclusive; installing the header races through the
    /// same compare-and-swap as every other write, expecting an empty
    /// header.
    pub async fn install(&self, store: &dyn ObjectStore, name: &str) -> Result<()> {
        store.create(name, false).await?;
        store
            .compare_and_swap_header(name, &[], &self.encode())
            .await
    }
}
