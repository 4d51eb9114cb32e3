//! The execution context all hardware-facing calls are funneled through.
//!
//! Several Bluetooth stacks misbehave when calls originate from arbitrary
//! threads. Queues spawn their worker and every operation they run on an
//! [`InteractionContext`], so a dedicated context guarantees that all
//! hardware calls happen on one thread.

use std::future::Future;
use std::sync::Arc;
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Keeps the dedicated thread alive while any context clone exists.
#[derive(Debug)]
struct ThreadGuard {
    name: String,
    _stop: oneshot::Sender<()>,
}

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        debug!("Stopping interaction thread {}", self.name);
    }
}

/// A fixed execution context for operations and queue workers.
#[derive(Debug, Clone)]
pub struct InteractionContext {
    handle: Handle,
    _guard: Option<Arc<ThreadGuard>>,
}

impl InteractionContext {
    /// Start a named thread running a single-threaded runtime.
    ///
    /// The thread exits once the last clone of the returned context is
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread or its runtime cannot be created.
    pub fn dedicated(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (handle_tx, handle_rx) = std::sync::mpsc::channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let runtime = match Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = handle_tx.send(Err(e.to_string()));
                        return;
                    }
                };

                let _ = handle_tx.send(Ok(runtime.handle().clone()));

                runtime.block_on(async {
                    let _ = stop_rx.await;
                });
            })
            .map_err(|e| Error::Internal(format!("Failed to spawn {}: {}", name, e)))?;

        let handle = handle_rx
            .recv()
            .map_err(|_| Error::Internal(format!("Interaction thread {} exited early", name)))?
            .map_err(|reason| {
                Error::Internal(format!("Failed to build runtime for {}: {}", name, reason))
            })?;

        info!("Started interaction thread {}", name);

        Ok(Self {
            handle,
            _guard: Some(Arc::new(ThreadGuard {
                name,
                _stop: stop_tx,
            })),
        })
    }

    /// Use an existing runtime.
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            _guard: None,
        }
    }

    /// Use the runtime the caller is running on.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn current() -> Self {
        Self::from_handle(Handle::current())
    }

    /// The runtime handle behind this context.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Spawn a task on this context.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }
}
