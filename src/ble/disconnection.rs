//! Routing of every disconnection source into a single error.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::Error;

/// Collects disconnection signals for one connection. The first signal wins
/// and is kept for the rest of the connection's life.
#[derive(Debug, Clone)]
pub struct DisconnectionRouter {
    address: Arc<str>,
    first: Arc<watch::Sender<Option<Error>>>,
}

impl DisconnectionRouter {
    /// Create a router for the device at `address`.
    pub fn new(address: impl Into<String>) -> Self {
        let (first, _) = watch::channel(None);
        Self {
            address: Arc::from(address.into()),
            first: Arc::new(first),
        }
    }

    /// The address of the device this router belongs to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The link was lost with the given stack status, if known.
    pub fn on_disconnected(&self, status: Option<i32>) -> bool {
        self.route(Error::Disconnected {
            address: self.address.to_string(),
            status,
        })
    }

    /// The adapter changed state. Only an unusable adapter disconnects.
    pub fn on_adapter_state_changed(&self, usable: bool) -> bool {
        if usable {
            return false;
        }
        debug!("Adapter became unusable while connected to {}", self.address);
        self.route(Error::AdapterDisabled {
            address: self.address.to_string(),
        })
    }

    /// Route an arbitrary error, such as a GATT-level failure, as the
    /// disconnection cause. Returns `false` if a cause was already recorded.
    pub fn route(&self, error: Error) -> bool {
        let accepted = self.first.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(error.clone());
            true
        });

        if accepted {
            info!("Disconnection of {} routed: {}", self.address, error);
        }

        accepted
    }

    /// The recorded disconnection cause, if any.
    pub fn disconnection(&self) -> Option<Error> {
        self.first.borrow().clone()
    }

    /// Resolves with the first disconnection cause.
    pub async fn first_disconnection(&self) -> Error {
        let mut rx = self.first.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(error) = current {
                return error;
            }
            if rx.changed().await.is_err() {
                // Unreachable while `self` holds the sender.
                std::future::pending::<()>().await;
            }
        }
    }
}
