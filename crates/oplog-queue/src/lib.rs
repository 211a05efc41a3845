//! OpLog Queue - Partitioned durable log/queue
//!
//! Serializes and recovers interrupted multi-step metadata operations on
//! top of an object store. Writers batch entries into per-partition
//! entry-objects under exclusive leases; a background reader sweeps the
//! partitions, dispatches entries to a handler, and cleans up consumed
//! objects. Sequence positions are handed out through compare-and-swap
//! counters, so any number of writers and readers may run concurrently
//! across processes against the same store.

pub mod alloc;
pub mod codec;
pub mod naming;
pub mod pool;
pub mod reader;
pub mod seq;
pub mod txn;
pub mod writer;

pub use alloc::SequenceAllocator;
pub use naming::PartitionIndex;
pub use pool::init_queue;
pub use reader::{EntryHandler, LogReader, Outcome};
pub use seq::SequenceRecord;
pub use txn::TransactionGuard;
pub use writer::LogWriter;

/// Lock id under which all queue leases are taken
pub(crate) const LOCK_ID: &str = "oplog";
