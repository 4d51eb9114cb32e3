//! Entry point for scanning and connecting.
//!
//! A [`BleClient`] owns the adapter, the interaction context every hardware
//! call runs on, and the client-level operation queue shared by scans and
//! connection attempts.

use btleplug::api::{Central, Manager as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::ble::operations;
use crate::ble::BleConnection;
use crate::config::{ConnectionSetup, TimeoutConfiguration};
use crate::error::{Error, Result};
use crate::observer::OperationObserver;
use crate::operation::{Operation, OperationHandle};
use crate::serialization::{ClientOperationQueue, InteractionContext};

/// Name of the thread all hardware calls run on.
pub const INTERACTION_THREAD_NAME: &str = "ble-interaction";

/// Scans for and connects to peripherals on one adapter.
pub struct BleClient {
    adapter: Adapter,
    context: InteractionContext,
    queue: ClientOperationQueue,
    observer: Option<Arc<dyn OperationObserver>>,
    timeout: TimeoutConfiguration,
    is_scanning: AtomicBool,
}

impl BleClient {
    /// Create a client on the first available adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available or the interaction
    /// thread cannot be started.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        let context = InteractionContext::dedicated(INTERACTION_THREAD_NAME)?;
        Ok(Self::with_adapter(adapter, context, None))
    }

    /// Create a client with a specific adapter and interaction context.
    pub fn with_adapter(
        adapter: Adapter,
        context: InteractionContext,
        observer: Option<Arc<dyn OperationObserver>>,
    ) -> Self {
        let queue = match &observer {
            Some(observer) => ClientOperationQueue::with_observer(context.clone(), observer.clone()),
            None => ClientOperationQueue::new(context.clone()),
        };

        Self {
            adapter,
            context,
            queue,
            observer,
            timeout: TimeoutConfiguration::default(),
            is_scanning: AtomicBool::new(false),
        }
    }

    /// Set the timeout of scan operations.
    pub fn with_timeout(mut self, timeout: TimeoutConfiguration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// The context hardware calls run on.
    pub fn context(&self) -> &InteractionContext {
        &self.context
    }

    /// The client-level operation queue.
    pub fn operation_queue(&self) -> &ClientOperationQueue {
        &self.queue
    }

    /// Queue a custom client-level operation.
    pub fn queue<O: Operation>(&self, operation: O) -> OperationHandle<O::Output> {
        self.queue.queue(operation)
    }

    /// Start scanning.
    ///
    /// # Errors
    ///
    /// Returns an error if scanning cannot be started.
    pub async fn start_scan(&self, filter: ScanFilter) -> Result<()> {
        if self.is_scanning.load(Ordering::SeqCst) {
            debug!("Already scanning, ignoring start request");
            return Ok(());
        }

        info!("Starting BLE scan");
        self.queue
            .queue(operations::start_scan(self.adapter.clone(), filter, self.timeout))
            .single()
            .await?;
        self.is_scanning.store(true, Ordering::SeqCst);

        Ok(())
    }

    /// Stop scanning.
    pub async fn stop_scan(&self) -> Result<()> {
        if !self.is_scanning.load(Ordering::SeqCst) {
            debug!("Not scanning, ignoring stop request");
            return Ok(());
        }

        info!("Stopping BLE scan");
        self.queue
            .queue(operations::stop_scan(self.adapter.clone(), self.timeout))
            .single()
            .await?;
        self.is_scanning.store(false, Ordering::SeqCst);

        Ok(())
    }

    /// Check if currently scanning.
    pub fn is_scanning(&self) -> bool {
        self.is_scanning.load(Ordering::SeqCst)
    }

    /// Peripherals the adapter currently knows about.
    pub async fn peripherals(&self) -> Result<Vec<Peripheral>> {
        Ok(self.adapter.peripherals().await?)
    }

    /// Connect to a peripheral.
    ///
    /// The connect call is serialized with scans and other connection
    /// attempts on the client queue. The returned connection owns its own
    /// queue for GATT operations.
    pub async fn connect(
        &self,
        peripheral: Peripheral,
        setup: ConnectionSetup,
    ) -> Result<BleConnection> {
        BleConnection::establish(
            peripheral,
            self.adapter.clone(),
            self.queue.clone(),
            self.context.clone(),
            setup,
            self.observer.clone(),
        )
        .await
    }
}

impl std::fmt::Debug for BleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleClient")
            .field("queue", &self.queue)
            .field("timeout", &self.timeout)
            .field("is_scanning", &self.is_scanning())
            .finish_non_exhaustive()
    }
}
