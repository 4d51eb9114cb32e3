//! Queue for operations of a single connection.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::ble::disconnection::DisconnectionRouter;
use crate::error::Error;
use crate::observer::OperationObserver;
use crate::operation::{Operation, OperationHandle};
use crate::serialization::runner::{drain, QueueCore, QueueRunner};
use crate::serialization::InteractionContext;

/// Notified when the external interest in a connection starts and ends.
pub trait ConnectionSubscriptionWatcher: Send + Sync {
    /// The connection got its first subscriber.
    fn on_connection_subscribed(&self);

    /// The last subscriber went away.
    fn on_connection_unsubscribed(&self);
}

struct ConnectionQueueInner {
    address: String,
    core: QueueCore,
    context: InteractionContext,
    router: DisconnectionRouter,
    terminal: Mutex<Option<Error>>,
    stop: watch::Sender<Option<Error>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ConnectionQueueInner {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.get_mut().take() {
            watcher.abort();
        }
    }
}

/// Serializes the operations of one connection.
///
/// Once terminated, every pending operation fails with the terminal error
/// and every later [`queue`](Self::queue) call fails with it immediately.
#[derive(Clone)]
pub struct ConnectionOperationQueue {
    inner: Arc<ConnectionQueueInner>,
}

impl ConnectionOperationQueue {
    /// Create the queue of the connection to `router`'s device.
    pub fn new(
        router: DisconnectionRouter,
        context: InteractionContext,
        observer: Option<Arc<dyn OperationObserver>>,
    ) -> Self {
        let address = router.address().to_string();
        let core = QueueCore::new(observer);
        let (stop, stop_rx) = watch::channel(None);

        QueueRunner::new(
            format!("Connection operation queue ({})", address),
            &core,
            context.clone(),
        )
        .spawn(stop_rx);

        Self {
            inner: Arc::new(ConnectionQueueInner {
                address,
                core,
                context,
                router,
                terminal: Mutex::new(None),
                stop,
                watcher: Mutex::new(None),
            }),
        }
    }

    /// The address of the connected device.
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    /// Queue an operation for execution on this connection.
    pub fn queue<O: Operation>(&self, operation: O) -> OperationHandle<O::Output> {
        let terminal = self.inner.terminal.lock();
        if let Some(error) = terminal.as_ref() {
            debug!("Rejecting {} on terminated queue ({})", operation.name(), self.inner.address);
            return OperationHandle::failed(error.clone());
        }
        self.inner.core.submit(operation)
    }

    /// Stop the queue and fail everything pending with `error`.
    ///
    /// Only the first call has an effect. Returns whether this call
    /// terminated the queue.
    pub fn terminate(&self, error: Error) -> bool {
        {
            let mut terminal = self.inner.terminal.lock();
            if terminal.is_some() {
                return false;
            }
            info!(
                "Connection operation queue to be terminated ({}): {}",
                self.inner.address, error
            );
            *terminal = Some(error.clone());
        }

        self.inner.stop.send_replace(Some(error.clone()));
        let drained = drain(self.inner.core.queue(), &error);
        debug!("{} pending operations failed on {}", drained, self.inner.address);
        true
    }

    /// The error the queue was terminated with, if any.
    pub fn terminal_error(&self) -> Option<Error> {
        self.inner.terminal.lock().clone()
    }

    /// Whether the queue was terminated.
    pub fn is_terminated(&self) -> bool {
        self.inner.terminal.lock().is_some()
    }

    /// Number of operations waiting to start.
    pub fn pending(&self) -> usize {
        self.inner.core.queue().len()
    }

    fn from_weak(inner: &Weak<ConnectionQueueInner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }
}

impl ConnectionSubscriptionWatcher for ConnectionOperationQueue {
    fn on_connection_subscribed(&self) {
        let router = self.inner.router.clone();
        let queue = Arc::downgrade(&self.inner);

        let watcher = self.inner.context.spawn(async move {
            let error = router.first_disconnection().await;
            if let Some(queue) = ConnectionOperationQueue::from_weak(&queue) {
                queue.terminate(error);
            }
        });

        if let Some(previous) = self.inner.watcher.lock().replace(watcher) {
            previous.abort();
        }
    }

    fn on_connection_unsubscribed(&self) {
        if let Some(watcher) = self.inner.watcher.lock().take() {
            watcher.abort();
        }
        self.terminate(Error::DisconnectedByRequest {
            address: self.inner.address.clone(),
        });
    }
}

impl std::fmt::Debug for ConnectionOperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionOperationQueue")
            .field("address", &self.inner.address)
            .field("pending", &self.pending())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}
