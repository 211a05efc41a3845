//! Transaction guard
//!
//! While at least one guard from a writer is alive, that writer's
//! automatic flushes are deferred, so a caller can append several related
//! entries before the first one becomes consumable. Guards nest; dropping
//! the last one nudges the flusher so a deferred flush runs promptly.

use crate::writer::FlushTimer;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::Duration;

/// Nesting-counted transaction flag owned by one writer
pub(crate) struct TransactionState {
    depth: AtomicUsize,
}

impl TransactionState {
    pub(crate) fn new() -> Self {
        Self {
            depth: AtomicUsize::new(0),
        }
    }

    pub(crate) fn is_held(&self) -> bool {
        self.depth.load(Ordering::SeqCst) > 0
    }
}

/// RAII scope deferring a writer's automatic flushes.
///
/// Obtained from [`LogWriter::transaction`](crate::LogWriter::transaction).
/// Scopes are strictly nested by construction.
pub struct TransactionGuard {
    state: Arc<TransactionState>,
    timer: Arc<FlushTimer>,
}

impl TransactionGuard {
    pub(crate) fn begin(state: Arc<TransactionState>, timer: Arc<FlushTimer>) -> Self {
        state.depth.fetch_add(1, Ordering::SeqCst);
        Self { state, timer }
    }
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        let was = self.state.depth.fetch_sub(1, Ordering::SeqCst);
        if was == 1 && self.timer.is_armed() {
            // a deferred flush may be waiting on this transaction
            self.timer.arm(Duration::ZERO);
        }
    }
}
