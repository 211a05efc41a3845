//! Partition and object naming
//!
//! Object names are a pure function of `(prefix, partition, role)` and are
//! the queue's only persisted schema — the layout below is the on-disk
//! format and must stay stable:
//!
//! - control object: `{prefix}` (header holds the partition-count exponent)
//! - allocator record: `{prefix}.{partition:04x}`
//! - head record: `{prefix}.{partition:04x}.head`
//! - tail record: `{prefix}.{partition:04x}.tail`
//! - entry-object: `{prefix}.{partition:04x}.{position:08x}`

use oplog_common::{Error, Result};
use rand::Rng;

/// Largest supported partition-count exponent
pub const MAX_BITS: u8 = 8;

/// Deterministic naming for one partitioned pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionIndex {
    prefix: String,
    bits: u8,
}

impl PartitionIndex {
    /// Create an index over `2^bits` partitions
    pub fn new(prefix: impl Into<String>, bits: u8) -> Result<Self> {
        if bits < 1 || bits > MAX_BITS {
            return Err(Error::InvalidArgument(format!(
                "partition bits must be in 1..={MAX_BITS}, got {bits}"
            )));
        }
        Ok(Self {
            prefix: prefix.into(),
            bits,
        })
    }

    /// The partition-count exponent
    #[must_use]
    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// Number of partitions
    #[must_use]
    pub fn partition_count(&self) -> u32 {
        1 << self.bits
    }

    /// Pick a partition uniformly at random
    #[must_use]
    pub fn random_partition(&self) -> u32 {
        rand::thread_rng().gen_range(0..self.partition_count())
    }

    /// Name of the control object
    #[must_use]
    pub fn control(&self) -> String {
        self.prefix.clone()
    }

    /// Name of a partition's allocator sequence record
    #[must_use]
    pub fn record(&self, partition: u32) -> String {
        format!("{}.{partition:04x}", self.prefix)
    }

    /// Name of a partition's head sequence record
    #[must_use]
    pub fn head(&self, partition: u32) -> String {
        format!("{}.{partition:04x}.head", self.prefix)
    }

    /// Name of a partition's tail sequence record
    #[must_use]
    pub fn tail(&self, partition: u32) -> String {
        format!("{}.{partition:04x}.tail", self.prefix)
    }

    /// Name of the entry-object at a partition position
    #[must_use]
    pub fn entry(&self, partition: u32, position: u64) -> String {
        format!("{}.{partition:04x}.{position:08x}", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_names() {
        let index = PartitionIndex::new("oplog", 2).unwrap();
        assert_eq!(index.control(), "oplog");
        assert_eq!(index.record(3), "oplog.0003");
        assert_eq!(index.head(0), "oplog.0000.head");
        assert_eq!(index.tail(1), "oplog.0001.tail");
        assert_eq!(index.entry(2, 0x1f), "oplog.0002.0000001f");
    }

    #[test]
    fn test_bits_bounds() {
        assert!(PartitionIndex::new("oplog", 0).is_err());
        assert!(PartitionIndex::new("oplog", 9).is_err());
        assert_eq!(PartitionIndex::new("oplog", 4).unwrap().partition_count(), 16);
    }

    #[test]
    fn test_random_partition_in_range() {
        let index = PartitionIndex::new("oplog", 3).unwrap();
        for _ in 0..100 {
            assert!(index.random_partition() < 8);
        }
    }
}
