//! Background log reader
//!
//! The reader sweeps partitions round-robin, claims the oldest unread
//! entry-object of the first partition it can lease, and dispatches each
//! decoded entry to the application's handler. Handler outcomes decide an
//! entry's fate: `Done` consumes it, `Retry` re-appends it through a
//! writer (losing its original position), `Fatal` drops it. A consumed
//! object is deleted and the partition's head record advanced. The sweep
//! reschedules itself: immediately after useful work, with a backoff when
//! everything was idle.
//!
//! Claiming at most one partition per sweep keeps a single reader from
//! starving writers across the whole pool between backoffs.

use crate::LOCK_ID;
use crate::codec;
use crate::naming::PartitionIndex;
use crate::pool;
use crate::seq::SequenceRecord;
use crate::writer::LogWriter;
use async_trait::async_trait;
use bytes::Bytes;
use oplog_common::{Error, HolderId, QueueConfig, ReaderConfig, Result};
use oplog_store::ObjectStore;
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Fate of a delivered entry, decided by the handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Entry is consumed permanently
    Done,
    /// Transient failure: re-queue the entry for a later sweep
    Retry,
    /// Permanent failure: drop the entry
    Fatal,
}

/// Application callback deciding the fate of each delivered entry.
///
/// Returning `Fatal` for transient causes breaks the no-poison-loop
/// guarantee the queue otherwise provides, so handlers should reserve it
/// for errors that cannot succeed on any later attempt.
#[async_trait]
pub trait EntryHandler: Send + Sync {
    async fn handle(&self, entry: Bytes) -> Outcome;
}

struct ReaderInner {
    store: Arc<dyn ObjectStore>,
    index: PartitionIndex,
    config: ReaderConfig,
    holder: HolderId,
    handler: Arc<dyn EntryHandler>,
    /// Re-append path for `Retry` outcomes
    requeue: LogWriter,
    /// Partition the next sweep starts from
    cursor: AtomicU32,
}

/// Background consumer for one partitioned queue
pub struct LogReader {
    inner: Arc<ReaderInner>,
    shutdown: watch::Sender<bool>,
    task: SyncMutex<Option<JoinHandle<()>>>,
}

impl LogReader {
    /// Open a reader against an initialized queue and start sweeping.
    ///
    /// The first sweep runs immediately. Stopped by [`close`](Self::close).
    pub async fn open(
        store: Arc<dyn ObjectStore>,
        config: &QueueConfig,
        handler: Arc<dyn EntryHandler>,
    ) -> Result<Self> {
        let bits = pool::discover_bits(store.as_ref(), &config.prefix).await?;
        let index = PartitionIndex::new(&config.prefix, bits)?;
        let holder = HolderId::reader();
        info!(
            "Opening log reader on '{}' ({bits} partition bits) as {holder}",
            config.prefix
        );

        let requeue = LogWriter::open(Arc::clone(&store), config).await?;

        let inner = Arc::new(ReaderInner {
            store,
            index,
            config: config.reader.clone(),
            holder,
            handler,
            requeue,
            cursor: AtomicU32::new(0),
        });

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(sweep_loop(Arc::clone(&inner), shutdown_rx));

        Ok(Self {
            inner,
            shutdown,
            task: SyncMutex::new(Some(task)),
        })
    }

    /// Stop sweeping and release everything: waits for the in-flight sweep,
    /// then closes the requeue writer. No lease survives this call.
    pub async fn close(&self) {
        let _ = self.shutdown.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.inner.requeue.close().await;
    }
}

async fn sweep_loop(inner: Arc<ReaderInner>, mut shutdown: watch::Receiver<bool>) {
    let mut delay = Duration::ZERO;
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            () = tokio::time::sleep(delay) => {
                let handled = inner.sweep().await;
                delay = if handled {
                    Duration::ZERO
                } else {
                    inner.config.sweep_backoff
                };
            }
        }
    }
}

impl ReaderInner {
    /// One sweep: claim and drain at most one partition.
    ///
    /// Returns whether any entry was handled (`Done` or `Retry`), which
    /// drives the rescheduling delay. Per-partition failures are logged and
    /// skipped; they never end the sweep.
    async fn sweep(&self) -> bool {
        let count = self.index.partition_count();
        let start = self.cursor.load(Ordering::Relaxed);
        let mut claimed = None;

        for step in 0..count {
            let partition = (start + step) % count;

            let head = match SequenceRecord::read(self.store.as_ref(), &self.index.head(partition))
                .await
            {
                Ok(head) => head,
                Err(e) => {
                    warn!("Failed to read head record of partition {partition}: {e}");
                    continue;
                }
            };
            let tail = match SequenceRecord::read(self.store.as_ref(), &self.index.tail(partition))
                .await
            {
                Ok(tail) => tail,
                Err(e) => {
                    warn!("Failed to read tail record of partition {partition}: {e}");
                    continue;
                }
            };
            if head.current == tail.current {
                continue;
            }

            let object = self.index.entry(partition, head.current);
            match self.store.exists(&object).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("No entry-object at head position of partition {partition}");
                    continue;
                }
                Err(e) => {
                    warn!("Failed to stat entry-object {object}: {e}");
                    continue;
                }
            }

            match self
                .store
                .lock_exclusive(&object, LOCK_ID, &self.holder, self.config.lease_duration)
                .await
            {
                Ok(()) => {
                    claimed = Some((partition, head, object));
                    break;
                }
                Err(e) if e.is_contention() => {
                    debug!("Entry-object {object} busy: {e}");
                }
                Err(e) => warn!("Failed to lease entry-object {object}: {e}"),
            }
        }

        let Some((partition, head, object)) = claimed else {
            return false;
        };
        self.cursor.store((partition + 1) % count, Ordering::Relaxed);

        let drained = self.drain_object(&object).await;

        if drained.consumed {
            // removal takes the lease with it
            if let Err(e) = self.store.remove(&object).await {
                warn!("Failed to remove consumed entry-object {object}: {e}");
            }
            match head
                .advance(self.store.as_ref(), &self.index.head(partition))
                .await
            {
                Ok(()) | Err(Error::StaleSequence) => {}
                Err(e) => warn!("Failed to advance head of partition {partition}: {e}"),
            }
        } else if let Err(e) = self.store.unlock(&object, LOCK_ID, &self.holder).await {
            warn!("Failed to release reader lease on {object}: {e}");
        }

        // Re-queued entries only become consumable once their session closes
        if drained.retried {
            self.requeue.flush().await;
        }

        drained.handled
    }

    /// Read, decode, and dispatch every entry of a claimed object
    async fn drain_object(&self, object: &str) -> DrainResult {
        let data = match self.store.read_all(object).await {
            Ok(data) => data,
            Err(e) => {
                // leave the object for a later sweep
                warn!("Failed to read entry-object {object}: {e}");
                return DrainResult::skipped();
            }
        };

        let entries = match codec::decode_entries(&data) {
            Ok(entries) => entries,
            Err(e) => {
                error!("Dropping undecodable entry-object {object}: {e}");
                return DrainResult {
                    handled: false,
                    retried: false,
                    consumed: true,
                };
            }
        };

        debug!("Draining {} entries from {object}", entries.len());
        let mut handled = false;
        let mut retried = false;

        for entry in entries {
            match self.handler.handle(entry.clone()).await {
                Outcome::Done => handled = true,
                Outcome::Retry => match self.requeue.append(&entry).await {
                    Ok(()) => {
                        handled = true;
                        retried = true;
                    }
                    Err(e) => error!("Failed to re-queue entry from {object}: {e}"),
                },
                Outcome::Fatal => error!("Dropping entry from {object} after fatal handler outcome"),
            }
        }

        DrainResult {
            handled,
            retried,
            consumed: true,
        }
    }
}

struct DrainResult {
    handled: bool,
    retried: bool,
    consumed: bool,
}

impl DrainResult {
    fn skipped() -> Self {
        Self {
            handled: false,
            retried: false,
            consumed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oplog_common::WriterConfig;
    use oplog_store::MemoryStore;
    use std::collections::VecDeque;

    /// Handler recording every delivery and following a scripted outcome
    /// sequence, `Done` once the script is spent.
    struct ScriptedHandler {
        seen: SyncMutex<Vec<Bytes>>,
        script: SyncMutex<VecDeque<Outcome>>,
    }

    impl ScriptedHandler {
        fn new(script: Vec<Outcome>) -> Arc<Self> {
            Arc::new(Self {
                seen: SyncMutex::new(Vec::new()),
                script: SyncMutex::new(script.into()),
            })
        }

        fn seen(&self) -> Vec<Bytes> {
            self.seen.lock().clone()
        }
    }

    #[async_trait]
    impl EntryHandler for ScriptedHandler {
        async fn handle(&self, entry: Bytes) -> Outcome {
            self.seen.lock().push(entry);
            self.script.lock().pop_front().unwrap_or(Outcome::Done)
        }
    }

    fn test_config() -> QueueConfig {
        QueueConfig {
            prefix: "oplog".to_string(),
            writer: WriterConfig::default(),
            reader: ReaderConfig {
                sweep_backoff: Duration::from_millis(20),
                lease_duration: Duration::from_secs(3600),
            },
        }
    }

    async fn setup(store: &Arc<MemoryStore>) -> LogWriter {
        pool::init_queue(store.as_ref(), "oplog", 2).await.unwrap();
        LogWriter::open(Arc::clone(store) as Arc<dyn ObjectStore>, &test_config())
            .await
            .unwrap()
    }

    async fn open_reader(store: &Arc<MemoryStore>, handler: Arc<dyn EntryHandler>) -> LogReader {
        LogReader::open(
            Arc::clone(store) as Arc<dyn ObjectStore>,
            &test_config(),
            handler,
        )
        .await
        .unwrap()
    }

    fn entry_objects(store: &MemoryStore) -> Vec<String> {
        store
            .object_names()
            .into_iter()
            .filter(|name| {
                let parts: Vec<&str> = name.split('.').collect();
                parts.len() == 3 && parts[2] != "head" && parts[2] != "tail"
            })
            .collect()
    }

    async fn wait_until(mut probe: impl FnMut() -> bool) {
        for _ in 0..200 {
            if probe() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 2s");
    }

    #[tokio::test]
    async fn test_batch_delivered_in_append_order() {
        let store = Arc::new(MemoryStore::new());
        let writer = setup(&store).await;

        for payload in [b"e0", b"e1", b"e2", b"e3", b"e4"] {
            writer.append(payload).await.unwrap();
        }
        writer.close().await;

        let handler = ScriptedHandler::new(Vec::new());
        let reader = open_reader(&store, Arc::clone(&handler) as Arc<dyn EntryHandler>).await;

        wait_until(|| handler.seen().len() == 5).await;
        let seen = handler.seen();
        let expected: Vec<&[u8]> = vec![b"e0", b"e1", b"e2", b"e3", b"e4"];
        assert_eq!(seen.iter().map(|b| b.as_ref()).collect::<Vec<&[u8]>>(), expected);

        // The consumed object is gone and the partition is empty again
        wait_until(|| entry_objects(&store).is_empty()).await;
        reader.close().await;
    }

    #[tokio::test]
    async fn test_done_entry_never_redelivered() {
        let store = Arc::new(MemoryStore::new());
        let writer = setup(&store).await;
        writer.append(b"once").await.unwrap();
        writer.close().await;

        let handler = ScriptedHandler::new(Vec::new());
        let reader = open_reader(&store, Arc::clone(&handler) as Arc<dyn EntryHandler>).await;

        wait_until(|| handler.seen().len() == 1).await;

        // Several idle sweeps later, still exactly one delivery
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(handler.seen().len(), 1);
        assert!(entry_objects(&store).is_empty());

        reader.close().await;
    }

    #[tokio::test]
    async fn test_retry_redelivers_exactly_once_more() {
        let store = Arc::new(MemoryStore::new());
        let writer = setup(&store).await;
        writer.append(b"flaky-op").await.unwrap();
        writer.close().await;

        let handler = ScriptedHandler::new(vec![Outcome::Retry]);
        let reader = open_reader(&store, Arc::clone(&handler) as Arc<dyn EntryHandler>).await;

        // First delivery returns Retry, the re-queued copy returns Done
        wait_until(|| handler.seen().len() == 2).await;
        let seen = handler.seen();
        assert_eq!(seen[0].as_ref(), b"flaky-op");
        assert_eq!(seen[1].as_ref(), b"flaky-op");

        // A further sweep finds the whole pool empty
        wait_until(|| entry_objects(&store).is_empty()).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(handler.seen().len(), 2);

        reader.close().await;
    }

    #[tokio::test]
    async fn test_fatal_entry_dropped_without_retry() {
        let store = Arc::new(MemoryStore::new());
        let writer = setup(&store).await;
        writer.append(b"poison").await.unwrap();
        writer.close().await;

        let handler = ScriptedHandler::new(vec![Outcome::Fatal]);
        let reader = open_reader(&store, Arc::clone(&handler) as Arc<dyn EntryHandler>).await;

        wait_until(|| entry_objects(&store).is_empty()).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(handler.seen().len(), 1);

        reader.close().await;
    }

    #[tokio::test]
    async fn test_writer_lease_blocks_delivery_until_flush() {
        let store = Arc::new(MemoryStore::new());
        let writer = setup(&store).await;
        writer.append(b"pending").await.unwrap();

        let handler = ScriptedHandler::new(Vec::new());
        let reader = open_reader(&store, Arc::clone(&handler) as Arc<dyn EntryHandler>).await;

        // The open session's lease keeps the reader out
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(handler.seen().is_empty());

        writer.flush().await;
        wait_until(|| handler.seen().len() == 1).await;

        writer.close().await;
        reader.close().await;
    }

    #[tokio::test]
    async fn test_drains_every_partition() {
        let store = Arc::new(MemoryStore::new());
        let writer = setup(&store).await;

        // Separate sessions: the objects may land on different partitions
        writer.append(b"first").await.unwrap();
        writer.flush().await;
        writer.append(b"second").await.unwrap();
        writer.flush().await;
        writer.close().await;

        let handler = ScriptedHandler::new(Vec::new());
        let reader = open_reader(&store, Arc::clone(&handler) as Arc<dyn EntryHandler>).await;

        wait_until(|| handler.seen().len() == 2).await;
        let mut seen: Vec<Vec<u8>> = handler.seen().iter().map(|b| b.to_vec()).collect();
        seen.sort();
        assert_eq!(seen, vec![b"first".to_vec(), b"second".to_vec()]);
        wait_until(|| entry_objects(&store).is_empty()).await;

        reader.close().await;
    }

    #[tokio::test]
    async fn test_corrupt_object_is_dropped() {
        let store = Arc::new(MemoryStore::new());
        let writer = setup(&store).await;
        writer.append(b"good").await.unwrap();
        writer.close().await;

        // A dangling partial frame poisons the decode
        let object = entry_objects(&store).pop().unwrap();
        store.append(&object, &[0xff, 0xff]).await.unwrap();

        let handler = ScriptedHandler::new(Vec::new());
        let reader = open_reader(&store, Arc::clone(&handler) as Arc<dyn EntryHandler>).await;

        // The poisoned object is removed without any delivery
        wait_until(|| entry_objects(&store).is_empty()).await;
        assert!(handler.seen().is_empty());

        reader.close().await;
    }
}
