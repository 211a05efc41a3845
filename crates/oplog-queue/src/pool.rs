//! Pool bootstrap and discovery
//!
//! A pool is a control object plus per-partition sequence records. The
//! control object's header records the partition-count exponent so that
//! writers and readers opened later can discover the layout.
//!
//! Bootstrap is NOT safe against partial completion: run it exactly once,
//! before any writer, reader, or allocator is opened against the prefix.

use crate::naming::{MAX_BITS, PartitionIndex};
use crate::seq::SequenceRecord;
use oplog_common::{Error, Result};
use oplog_store::ObjectStore;
use tracing::info;

/// Create the head and tail records for every partition of a queue, then
/// the control object recording `bits`.
pub async fn init_queue(store: &dyn ObjectStore, prefix: &str, bits: u8) -> Result<()> {
    let index = PartitionIndex::new(prefix, bits)?;
    info!("Initializing queue pool '{prefix}' with {bits} partition bits");

    let start = SequenceRecord::new(0, u64::MAX)?;
    for partition in 0..index.partition_count() {
        start.install(store, &index.head(partition)).await?;
        start.install(store, &index.tail(partition)).await?;
    }

    write_control(store, &index).await
}

/// Write the control object for an already-populated pool
pub(crate) async fn write_control(store: &dyn ObjectStore, index: &PartitionIndex) -> Result<()> {
    let control = index.control();
    store.create(&control, false).await?;
    store
        .compare_and_swap_header(&control, &[], &[index.bits()])
        .await
}

/// Read the partition-count exponent back from a pool's control object
pub async fn discover_bits(store: &dyn ObjectStore, prefix: &str) -> Result<u8> {
    let header = match store.read_header(prefix).await {
        Ok(header) => header,
        Err(Error::NotFound(_)) => return Err(Error::NotInitialized(prefix.to_string())),
        Err(e) => return Err(e),
    };
    if header.is_empty() {
        return Err(Error::NotInitialized(prefix.to_string()));
    }
    if header.len() != 1 || header[0] < 1 || header[0] > MAX_BITS {
        return Err(Error::corrupt(format!(
            "control object {prefix} holds an invalid partition exponent"
        )));
    }
    Ok(header[0])
}
