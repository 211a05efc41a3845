//! Batching log writer
//!
//! A writer lazily opens a session against a random partition: it claims
//! the partition's tail position with an exclusive create, takes a
//! long-duration lease on the new entry-object, and appends framed entries
//! to it. The session closes — releasing the lease and making the object
//! consumable — on an explicit flush, when the batch threshold is reached,
//! or when the idle timer fires. While a transaction guard is held,
//! automatic flushes are deferred and re-armed so that a caller can land a
//! group of related entries before any of them become visible.

use crate::LOCK_ID;
use crate::codec;
use crate::naming::PartitionIndex;
use crate::pool;
use crate::seq::SequenceRecord;
use crate::txn::{TransactionGuard, TransactionState};
use oplog_common::{Error, HolderId, QueueConfig, Result, WriterConfig};
use oplog_store::ObjectStore;
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One open writer session: an exclusively-leased entry-object at a
/// claimed tail position.
struct Session {
    partition: u32,
    position: u64,
    object: String,
    count: usize,
}

/// Deadline-based flush scheduling shared between the writer, its
/// background flusher task, and transaction guards.
pub(crate) struct FlushTimer {
    deadline: SyncMutex<Option<Instant>>,
    changed: Notify,
}

impl FlushTimer {
    pub(crate) fn new() -> Self {
        Self {
            deadline: SyncMutex::new(None),
            changed: Notify::new(),
        }
    }

    /// (Re-)arm the timer `delay` from now
    pub(crate) fn arm(&self, delay: Duration) {
        *self.deadline.lock() = Some(Instant::now() + delay);
        self.changed.notify_one();
    }

    fn cancel(&self) {
        *self.deadline.lock() = None;
        self.changed.notify_one();
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.deadline.lock().is_some()
    }

    fn current(&self) -> Option<Instant> {
        *self.deadline.lock()
    }

    fn due(&self) -> bool {
        self.deadline.lock().is_some_and(|d| Instant::now() >= d)
    }
}

struct WriterInner {
    store: Arc<dyn ObjectStore>,
    index: PartitionIndex,
    config: WriterConfig,
    holder: HolderId,
    session: Mutex<Option<Session>>,
    timer: Arc<FlushTimer>,
    txn: Arc<TransactionState>,
    closed: AtomicBool,
}

/// Appender for one partitioned queue
pub struct LogWriter {
    inner: Arc<WriterInner>,
    shutdown: watch::Sender<bool>,
    task: SyncMutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for LogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogWriter").finish_non_exhaustive()
    }
}

impl LogWriter {
    /// Open a writer against an initialized queue.
    ///
    /// Spawns the idle-flush task; it is stopped by [`close`](Self::close).
    pub async fn open(store: Arc<dyn ObjectStore>, config: &QueueConfig) -> Result<Self> {
        let bits = pool::discover_bits(store.as_ref(), &config.prefix).await?;
        let index = PartitionIndex::new(&config.prefix, bits)?;
        let holder = HolderId::writer();
        info!(
            "Opening log writer on '{}' ({bits} partition bits) as {holder}",
            config.prefix
        );

        let inner = Arc::new(WriterInner {
            store,
            index,
            config: config.writer.clone(),
            holder,
            session: Mutex::new(None),
            timer: Arc::new(FlushTimer::new()),
            txn: Arc::new(TransactionState::new()),
            closed: AtomicBool::new(false),
        });

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(flush_loop(Arc::clone(&inner), shutdown_rx));

        Ok(Self {
            inner,
            shutdown,
            task: SyncMutex::new(Some(task)),
        })
    }

    /// Append one entry.
    ///
    /// Opens a session on demand. Tail races, lease conflicts, and a
    /// vanished session object are retried against fresh positions, bounded
    /// by `max_open_attempts`; infrastructure errors propagate unchanged.
    pub async fn append(&self, payload: &[u8]) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        let frame = codec::encode_entry(payload)?;
        let inner = &self.inner;
        let mut session = inner.session.lock().await;
        // re-check under the session lock so no session outlives close()
        if inner.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }

        for _ in 0..inner.config.max_open_attempts {
            if session.is_none() {
                *session = Some(inner.open_session().await?);
            }
            let Some(open) = session.as_mut() else {
                continue;
            };

            match inner.append_to(open, &frame).await {
                Ok(()) => {
                    open.count += 1;
                    let delay = if open.count >= inner.config.batch_threshold {
                        Duration::ZERO
                    } else {
                        inner.config.idle_flush
                    };
                    inner.timer.arm(delay);
                    return Ok(());
                }
                Err(e) if e.is_contention() || matches!(e, Error::NotFound(_)) => {
                    debug!(
                        "Writer session on {} invalidated, reopening: {e}",
                        open.object
                    );
                    *session = None;
                    inner.timer.cancel();
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::PoolExhausted {
            attempts: inner.config.max_open_attempts,
        })
    }

    /// Close the current session, releasing its lease and making the
    /// entry-object consumable. A no-op without an open session.
    pub async fn flush(&self) {
        let mut session = self.inner.session.lock().await;
        self.inner.do_flush(&mut session).await;
    }

    /// Defer automatic flushes until the returned guard (and any nested
    /// ones) is dropped. `append` is unaffected.
    #[must_use]
    pub fn transaction(&self) -> TransactionGuard {
        TransactionGuard::begin(Arc::clone(&self.inner.txn), Arc::clone(&self.inner.timer))
    }

    /// Stop the flusher task and flush any open session. No lease survives
    /// this call. Further `append` calls fail with `Closed`.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.flush().await;
    }
}

impl WriterInner {
    /// Claim a tail position on a random partition.
    ///
    /// A lost exclusive create means another writer took the slot: the tail
    /// record is pushed forward (best effort) and the next position tried.
    async fn open_session(&self) -> Result<Session> {
        let partition = self.index.random_partition();
        let tail_name = self.index.tail(partition);

        for _ in 0..self.config.max_open_attempts {
            let tail = SequenceRecord::read(self.store.as_ref(), &tail_name).await?;
            let object = self.index.entry(partition, tail.current);

            match self.store.create(&object, true).await {
                Ok(()) => {
                    match self
                        .store
                        .lock_exclusive(&object, LOCK_ID, &self.holder, self.config.lease_duration)
                        .await
                    {
                        Ok(()) => {}
                        Err(e) if e.is_contention() || matches!(e, Error::NotFound(_)) => {
                            debug!("Lost fresh entry-object {object} before leasing: {e}");
                            continue;
                        }
                        Err(e) => return Err(e),
                    }

                    // Best effort; a racing writer may already have pushed it
                    match tail.advance(self.store.as_ref(), &tail_name).await {
                        Ok(()) | Err(Error::StaleSequence) => {}
                        Err(e) => warn!("Failed to advance tail of partition {partition}: {e}"),
                    }

                    debug!(
                        "Opened writer session on partition {partition} position {}",
                        tail.current
                    );
                    return Ok(Session {
                        partition,
                        position: tail.current,
                        object,
                        count: 0,
                    });
                }
                Err(Error::ObjectExists(_)) => {
                    debug!(
                        "Tail position {} of partition {partition} already taken",
                        tail.current
                    );
                    match tail.advance(self.store.as_ref(), &tail_name).await {
                        Ok(()) | Err(Error::StaleSequence) => {}
                        Err(e) => return Err(e),
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::PoolExhausted {
            attempts: self.config.max_open_attempts,
        })
    }

    /// Renew the session lease and append one framed entry
    async fn append_to(&self, session: &Session, frame: &[u8]) -> Result<()> {
        self.store
            .lock_exclusive(
                &session.object,
                LOCK_ID,
                &self.holder,
                self.config.lease_duration,
            )
            .await?;
        self.store.append(&session.object, frame).await
    }

    /// Timer-driven flush: defers while a transaction is open
    async fn auto_flush(&self) {
        let mut session = self.session.lock().await;
        if !self.timer.due() {
            return;
        }
        if self.txn.is_held() {
            debug!("Transaction open, deferring automatic flush");
            self.timer.arm(self.config.deferred_flush);
            return;
        }
        self.do_flush(&mut session).await;
    }

    async fn do_flush(&self, session: &mut Option<Session>) {
        self.timer.cancel();
        if let Some(open) = session.take() {
            debug!(
                "Closing writer session on partition {} position {} ({} entries)",
                open.partition, open.position, open.count
            );
            if let Err(e) = self.store.unlock(&open.object, LOCK_ID, &self.holder).await {
                warn!("Failed to release writer lease on {}: {e}", open.object);
            }
        }
    }
}

async fn flush_loop(inner: Arc<WriterInner>, mut shutdown: watch::Receiver<bool>) {
    loop {
        let deadline = inner.timer.current();
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = inner.timer.changed.notified() => {}
            () = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            } => {
                inner.auto_flush().await;
            }
        }
    }
}
