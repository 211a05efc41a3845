//! Partitioned sequence allocator
//!
//! Hands out globally-unique integers from a pool of per-partition
//! sequence records. Allocation is pure optimistic concurrency: read a
//! random partition's record, compare-and-swap it forward, and retry on a
//! lost race or an exhausted partition. No lock is ever held.
//!
//! Each partition's record counts `0..2^(64-bits)-1`; the partition id is
//! composed into the high-order bits of the returned value, so values from
//! different partitions never collide.

use crate::naming::PartitionIndex;
use crate::pool;
use crate::seq::SequenceRecord;
use oplog_common::{AllocatorConfig, Error, Result};
use oplog_store::ObjectStore;
use std::sync::Arc;
use tracing::{debug, info};

/// Generator of globally-unique sequence numbers
pub struct SequenceAllocator {
    store: Arc<dyn ObjectStore>,
    index: PartitionIndex,
    config: AllocatorConfig,
}

impl std::fmt::Debug for SequenceAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceAllocator")
            .field("index", &self.index)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SequenceAllocator {
    /// Create the allocator pool: `2^bits` sequence records plus the
    /// control object recording `bits`.
    ///
    /// Run exactly once per prefix, before any `open`. Partial completion
    /// leaves the pool unusable; there is no repair path here.
    pub async fn init_pool(store: &dyn ObjectStore, prefix: &str, bits: u8) -> Result<()> {
        let index = PartitionIndex::new(prefix, bits)?;
        info!("Initializing allocator pool '{prefix}' with {bits} partition bits");

        let span = 1u64 << (64 - u32::from(bits));
        let record = SequenceRecord::new(0, span - 1)?;
        for partition in 0..index.partition_count() {
            record.install(store, &index.record(partition)).await?;
        }

        pool::write_control(store, &index).await
    }

    /// Open an allocator against an initialized pool
    pub async fn open(
        store: Arc<dyn ObjectStore>,
        prefix: &str,
        config: AllocatorConfig,
    ) -> Result<Self> {
        let bits = pool::discover_bits(store.as_ref(), prefix).await?;
        let index = PartitionIndex::new(prefix, bits)?;
        Ok(Self {
            store,
            index,
            config,
        })
    }

    /// Allocate the next unique value.
    ///
    /// Makes at most `max_attempts` partition attempts; contention and
    /// per-partition exhaustion are retried against fresh random
    /// partitions, anything else propagates. Returns `PoolExhausted` once
    /// the attempt budget is spent.
    pub async fn generate(&self) -> Result<u64> {
        let shift = 64 - u32::from(self.index.bits());

        for _ in 0..self.config.max_attempts {
            let partition = self.index.random_partition();
            let name = self.index.record(partition);

            let record = SequenceRecord::read(self.store.as_ref(), &name).await?;
            if record.is_exhausted() {
                debug!("Partition {partition} exhausted, retrying elsewhere");
                continue;
            }

            match record.advance(self.store.as_ref(), &name).await {
                Ok(()) => return Ok((u64::from(partition) << shift) | record.current),
                Err(Error::StaleSequence) => {
                    debug!("Lost sequence race on partition {partition}, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::PoolExhausted {
            attempts: self.config.max_attempts,
        })
    }
}
