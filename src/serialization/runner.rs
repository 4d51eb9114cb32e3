//! The worker loop shared by every queue scope.
//!
//! One worker per queue takes the next entry, starts it on the interaction
//! context and then waits for the entry's [`QueueSemaphore`] before taking
//! the next one. This gate is the only thing that keeps two operations of
//! the same scope from touching the radio at the same time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::Error;
use crate::observer::OperationObserver;
use crate::operation::{operation_channel, Operation, OperationHandle};
use crate::serialization::entry::FifoRunnableEntry;
use crate::serialization::priority_queue::OperationPriorityFifoQueue;
use crate::serialization::{InteractionContext, QueueReleaser, QueueSemaphore};

/// State shared by the submitting side of a queue.
pub(crate) struct QueueCore {
    queue: Arc<OperationPriorityFifoQueue>,
    sequence: AtomicU64,
    observer: Option<Arc<dyn OperationObserver>>,
}

impl QueueCore {
    pub(crate) fn new(observer: Option<Arc<dyn OperationObserver>>) -> Self {
        Self {
            queue: Arc::new(OperationPriorityFifoQueue::new()),
            sequence: AtomicU64::new(0),
            observer,
        }
    }

    pub(crate) fn queue(&self) -> &Arc<OperationPriorityFifoQueue> {
        &self.queue
    }

    /// Wrap the operation in an entry and queue it.
    pub(crate) fn submit<O: Operation>(&self, operation: O) -> OperationHandle<O::Output> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let (emitter, mut handle) = operation_channel();
        let entry = FifoRunnableEntry::new(sequence, operation, emitter);

        let key = entry.key();
        let info = entry.info().clone();
        let queue = Arc::downgrade(&self.queue);
        let observer = self.observer.clone();

        debug!("QUEUED   {}", info);
        if let Some(observer) = &self.observer {
            observer.on_queued(&info);
        }

        handle.set_on_dispose(move || {
            let Some(queue) = queue.upgrade() else {
                return;
            };
            if queue.remove(key) {
                debug!("REMOVED  {}", info);
                if let Some(observer) = &observer {
                    observer.on_removed(&info);
                }
            }
        });

        self.queue.add(entry);
        handle
    }
}

/// The worker that executes a queue's entries one at a time.
pub(crate) struct QueueRunner {
    label: String,
    queue: Arc<OperationPriorityFifoQueue>,
    context: InteractionContext,
    observer: Option<Arc<dyn OperationObserver>>,
}

impl QueueRunner {
    pub(crate) fn new(
        label: impl Into<String>,
        core: &QueueCore,
        context: InteractionContext,
    ) -> Self {
        Self {
            label: label.into(),
            queue: core.queue.clone(),
            context,
            observer: core.observer.clone(),
        }
    }

    /// Start the worker on its interaction context.
    ///
    /// The worker stops once `stop` carries an error or its sender is
    /// dropped, then fails everything still queued.
    pub(crate) fn spawn(self, stop: watch::Receiver<Option<Error>>) -> JoinHandle<()> {
        let context = self.context.clone();
        context.spawn(self.run(stop))
    }

    async fn run(self, mut stop: watch::Receiver<Option<Error>>) {
        debug!("{} worker started", self.label);

        let reason = loop {
            let entry = tokio::select! {
                biased;
                reason = terminated(&mut stop) => break reason,
                entry = self.queue.take() => entry,
            };

            let info = entry.info().clone();

            if entry.is_disposed() {
                debug!("SKIPPED  {} (result handle already dropped)", info);
                if let Some(observer) = &self.observer {
                    observer.on_removed(&info);
                }
                continue;
            }

            let entry = match admit(entry, &stop) {
                Ok(entry) => entry,
                Err(reason) => break reason,
            };

            debug!("STARTED  {}", info);
            if let Some(observer) = &self.observer {
                observer.on_started(&info);
            }

            let started_at = Instant::now();
            let semaphore = Arc::new(QueueSemaphore::new());
            let in_flight = entry.run(QueueReleaser::new(semaphore.clone()), &self.context);

            tokio::select! {
                biased;
                _ = semaphore.await_release() => {}
                reason = terminated(&mut stop) => {
                    debug!("INTERRUPTED {}", info);
                    in_flight.try_error(reason.clone());
                    semaphore.release();
                    break reason;
                }
            }

            let elapsed = started_at.elapsed();
            debug!("FINISHED {} in {} ms", info, elapsed.as_millis());
            if let Some(observer) = &self.observer {
                observer.on_finished(&info, elapsed);
            }
        };

        let drained = drain(&self.queue, &reason);
        info!(
            "{} worker terminated ({}), {} pending operations failed",
            self.label, reason, drained
        );
    }
}

/// Hand back `entry` unless the queue was stopped after it was taken, in
/// which case it is failed with the stop reason.
fn admit(
    entry: FifoRunnableEntry,
    stop: &watch::Receiver<Option<Error>>,
) -> std::result::Result<FifoRunnableEntry, Error> {
    let stopped = stop.borrow().clone();
    match stopped {
        Some(reason) => {
            debug!("ABORTED  {} (queue stopped)", entry.info());
            entry.fail(reason.clone());
            Err(reason)
        }
        None => Ok(entry),
    }
}

/// Resolve every queued entry with `error`. Returns how many were failed.
pub(crate) fn drain(queue: &OperationPriorityFifoQueue, error: &Error) -> usize {
    let mut drained = 0;
    while let Some(entry) = queue.take_now() {
        if entry.fail(error.clone()) {
            drained += 1;
        }
    }
    drained
}

/// Resolves with the termination reason once the queue is stopped.
async fn terminated(stop: &mut watch::Receiver<Option<Error>>) -> Error {
    loop {
        let current = stop.borrow_and_update().clone();
        if let Some(reason) = current {
            return reason;
        }
        if stop.changed().await.is_err() {
            let last = stop.borrow().clone();
            return last.unwrap_or(Error::QueueClosed);
        }
    }
}
