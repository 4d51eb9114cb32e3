//! Priority-ordered queue of pending operations, FIFO within a priority.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use tokio::sync::Notify;

use crate::serialization::entry::{EntryKey, FifoRunnableEntry};

/// Pending entries ordered by [`EntryKey`].
///
/// Safe to share between the enqueueing callers and the single worker that
/// takes entries out.
#[derive(Debug, Default)]
pub(crate) struct OperationPriorityFifoQueue {
    entries: Mutex<BTreeMap<EntryKey, FifoRunnableEntry>>,
    available: Notify,
}

impl OperationPriorityFifoQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert an entry. Never blocks.
    pub(crate) fn add(&self, entry: FifoRunnableEntry) {
        self.entries.lock().insert(entry.key(), entry);
        self.available.notify_one();
    }

    /// Wait until an entry is available, then remove and return the first.
    pub(crate) async fn take(&self) -> FifoRunnableEntry {
        loop {
            if let Some(entry) = self.take_now() {
                return entry;
            }
            self.available.notified().await;
        }
    }

    /// Remove and return the first entry, if any.
    pub(crate) fn take_now(&self) -> Option<FifoRunnableEntry> {
        self.entries.lock().pop_first().map(|(_, entry)| entry)
    }

    /// Remove a specific entry before it is taken. Returns whether it was
    /// still queued.
    pub(crate) fn remove(&self, key: EntryKey) -> bool {
        self.entries.lock().remove(&key).is_some()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
