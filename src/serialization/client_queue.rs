//! Queue for operations that are not tied to a connection.

use std::sync::Arc;
use tokio::sync::watch;

use crate::error::Error;
use crate::observer::OperationObserver;
use crate::operation::{Operation, OperationHandle};
use crate::serialization::runner::{QueueCore, QueueRunner};
use crate::serialization::InteractionContext;

struct ClientQueueInner {
    core: QueueCore,
    // Dropping the sender stops the worker.
    _stop: watch::Sender<Option<Error>>,
}

/// Serializes client-level operations such as scanning and connecting.
///
/// Clones share the same queue and worker. The worker runs until the last
/// clone is dropped; anything still queued then fails with
/// [`Error::QueueClosed`].
#[derive(Clone)]
pub struct ClientOperationQueue {
    inner: Arc<ClientQueueInner>,
}

impl ClientOperationQueue {
    /// Create a queue whose worker and operations run on `context`.
    pub fn new(context: InteractionContext) -> Self {
        Self::build(context, None)
    }

    /// Create a queue that reports lifecycle events to `observer`.
    pub fn with_observer(context: InteractionContext, observer: Arc<dyn OperationObserver>) -> Self {
        Self::build(context, Some(observer))
    }

    fn build(context: InteractionContext, observer: Option<Arc<dyn OperationObserver>>) -> Self {
        let core = QueueCore::new(observer);
        let (stop_tx, stop_rx) = watch::channel(None);

        QueueRunner::new("Client operation queue", &core, context).spawn(stop_rx);

        Self {
            inner: Arc::new(ClientQueueInner {
                core,
                _stop: stop_tx,
            }),
        }
    }

    /// Queue an operation for execution.
    ///
    /// Dropping the returned handle before the operation starts removes it
    /// from the queue.
    pub fn queue<O: Operation>(&self, operation: O) -> OperationHandle<O::Output> {
        self.inner.core.submit(operation)
    }

    /// Number of operations waiting to start.
    pub fn pending(&self) -> usize {
        self.inner.core.queue().len()
    }
}

impl std::fmt::Debug for ClientOperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOperationQueue")
            .field("pending", &self.pending())
            .finish()
    }
}
