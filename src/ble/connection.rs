//! An established connection to a peripheral.
//!
//! Every GATT call on a [`BleConnection`] goes through the connection's own
//! [`ConnectionOperationQueue`]. The connection lives as long as any clone
//! of it does; dropping the last clone terminates the queue and queues a
//! disconnect on the client queue.

use btleplug::api::{
    Central, CentralEvent, CentralState, Characteristic, Descriptor, Peripheral as _, Service,
    WriteType,
};
use btleplug::platform::{Adapter, Peripheral};
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::disconnection::DisconnectionRouter;
use crate::ble::operations::{self, IllegalOperationCheck};
use crate::config::ConnectionSetup;
use crate::error::{Error, Result};
use crate::observer::OperationObserver;
use crate::operation::{Operation, OperationHandle, Priority};
use crate::serialization::{
    ClientOperationQueue, ConnectionOperationQueue, ConnectionSubscriptionWatcher,
    InteractionContext,
};

/// Connection state of a peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// Not connected.
    #[default]
    Disconnected,
    /// Currently attempting to connect.
    Connecting,
    /// Connected and accepting operations.
    Connected,
    /// Currently disconnecting.
    Disconnecting,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// Event for connection state changes.
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    /// Address of the peripheral.
    pub address: String,
    /// The new connection state.
    pub state: ConnectionState,
}

/// Connection state shared between the connection and its monitor task.
#[derive(Debug)]
struct StateCell {
    address: String,
    state: RwLock<ConnectionState>,
    event_tx: broadcast::Sender<ConnectionEvent>,
}

impl StateCell {
    fn new(address: String) -> Self {
        let (event_tx, _) = broadcast::channel(16);
        Self {
            address,
            state: RwLock::new(ConnectionState::Disconnected),
            event_tx,
        }
    }

    fn get(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Update the state and emit an event if it changed.
    fn set(&self, new_state: ConnectionState) {
        let old_state = std::mem::replace(&mut *self.state.write(), new_state);

        if old_state != new_state {
            debug!(
                "Connection state of {} changed: {} -> {}",
                self.address, old_state, new_state
            );
            let _ = self.event_tx.send(ConnectionEvent {
                address: self.address.clone(),
                state: new_state,
            });
        }
    }
}

struct ConnectionLease {
    peripheral: Peripheral,
    queue: ConnectionOperationQueue,
    router: DisconnectionRouter,
    setup: ConnectionSetup,
    client_queue: ClientOperationQueue,
    context: InteractionContext,
    state: Arc<StateCell>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.get_mut().take() {
            monitor.abort();
        }

        let link_lost = self.router.disconnection().is_some();
        self.queue.on_connection_unsubscribed();

        if link_lost {
            self.state.set(ConnectionState::Disconnected);
            return;
        }

        info!("Releasing connection to {}", self.state.address);
        self.state.set(ConnectionState::Disconnecting);

        let disconnect = self.client_queue.queue(
            operations::disconnect(self.peripheral.clone(), self.setup.timeout_configuration())
                .with_priority(Priority::High),
        );
        let state = self.state.clone();
        self.context.spawn(async move {
            if let Err(e) = disconnect.single().await {
                warn!("Failed to disconnect from {}: {}", state.address, e);
            }
            state.set(ConnectionState::Disconnected);
        });
    }
}

/// A live connection to a peripheral.
///
/// Clones share the connection. Operations queued after the link was lost
/// fail immediately with the disconnection cause.
#[derive(Clone)]
pub struct BleConnection {
    lease: Arc<ConnectionLease>,
}

impl BleConnection {
    /// Connect to `peripheral` through the client queue.
    pub(crate) async fn establish(
        peripheral: Peripheral,
        adapter: Adapter,
        client_queue: ClientOperationQueue,
        context: InteractionContext,
        setup: ConnectionSetup,
        observer: Option<Arc<dyn OperationObserver>>,
    ) -> Result<Self> {
        let address = peripheral.address().to_string();
        let state = Arc::new(StateCell::new(address.clone()));
        let timeout = setup.timeout_configuration();

        state.set(ConnectionState::Connecting);
        info!("Connecting to {}", address);

        let connected = client_queue
            .queue(operations::connect(peripheral.clone(), timeout))
            .single()
            .await;
        if let Err(e) = connected {
            warn!("Failed to connect to {}: {}", address, e);
            state.set(ConnectionState::Disconnected);
            return Err(e);
        }

        let router = DisconnectionRouter::new(address.clone());
        let queue = ConnectionOperationQueue::new(router.clone(), context.clone(), observer);
        queue.on_connection_subscribed();

        let monitor = context.spawn(monitor_link(
            adapter,
            peripheral.clone(),
            router.clone(),
            state.clone(),
        ));

        let connection = Self {
            lease: Arc::new(ConnectionLease {
                peripheral,
                queue,
                router,
                setup,
                client_queue,
                context,
                state,
                monitor: Mutex::new(Some(monitor)),
            }),
        };

        if connection.lease.setup.discover_services {
            if let Err(e) = connection.discover_services().await {
                warn!("Failed to discover services of {}: {}", address, e);
            }
        }

        connection.lease.state.set(ConnectionState::Connected);
        info!("Connected to {}", address);

        Ok(connection)
    }

    /// Address of the connected peripheral.
    pub fn address(&self) -> &str {
        &self.lease.state.address
    }

    /// The underlying peripheral.
    pub fn peripheral(&self) -> &Peripheral {
        &self.lease.peripheral
    }

    /// The queue that serializes this connection's operations.
    pub fn operation_queue(&self) -> &ConnectionOperationQueue {
        &self.lease.queue
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.lease.state.get()
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Subscribe to connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.lease.state.event_tx.subscribe()
    }

    /// The cause of the disconnection, once the link is gone.
    pub fn disconnection(&self) -> Option<Error> {
        self.lease.router.disconnection()
    }

    /// Queue a custom operation on this connection.
    pub fn queue<O: Operation>(&self, operation: O) -> OperationHandle<O::Output> {
        self.lease.queue.queue(operation)
    }

    /// Discover the services of the peripheral.
    pub async fn discover_services(&self) -> Result<Vec<Service>> {
        self.queue(operations::discover_services(
            self.lease.peripheral.clone(),
            self.lease.setup.timeout_configuration(),
        ))
        .single()
        .await
    }

    /// Look up a discovered characteristic.
    pub fn characteristic(&self, uuid: Uuid) -> Result<Characteristic> {
        self.lease
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(Error::CharacteristicNotFound { uuid })
    }

    /// Look up a descriptor of a discovered characteristic.
    pub fn descriptor(&self, characteristic: Uuid, uuid: Uuid) -> Result<Descriptor> {
        self.characteristic(characteristic)?
            .descriptors
            .into_iter()
            .find(|d| d.uuid == uuid)
            .ok_or(Error::DescriptorNotFound { uuid })
    }

    /// Read a characteristic value.
    pub async fn read_characteristic(&self, uuid: Uuid) -> Result<Vec<u8>> {
        let characteristic = self.characteristic(uuid)?;
        self.queue(operations::read_characteristic(
            self.lease.peripheral.clone(),
            characteristic,
            self.illegal_operation_check(),
            self.lease.setup.timeout_configuration(),
        ))
        .single()
        .await
    }

    /// Write a characteristic value.
    pub async fn write_characteristic(
        &self,
        uuid: Uuid,
        data: impl Into<Bytes>,
        write_type: WriteType,
    ) -> Result<()> {
        let characteristic = self.characteristic(uuid)?;
        self.queue(operations::write_characteristic(
            self.lease.peripheral.clone(),
            characteristic,
            data.into(),
            write_type,
            self.illegal_operation_check(),
            self.lease.setup.timeout_configuration(),
        ))
        .single()
        .await
    }

    /// Write a payload longer than one packet in `batch_size` byte batches.
    ///
    /// No other operation of this connection runs until the last batch is
    /// written or one of them fails. Returns the written payload.
    pub async fn write_characteristic_long(
        &self,
        uuid: Uuid,
        data: impl Into<Bytes>,
        batch_size: usize,
    ) -> Result<Bytes> {
        let characteristic = self.characteristic(uuid)?;
        self.queue(operations::long_write_characteristic(
            self.lease.peripheral.clone(),
            characteristic,
            data.into(),
            batch_size,
            self.illegal_operation_check(),
            self.lease.setup.timeout_configuration(),
        ))
        .single()
        .await
    }

    /// Read a descriptor value.
    pub async fn read_descriptor(&self, characteristic: Uuid, uuid: Uuid) -> Result<Vec<u8>> {
        let descriptor = self.descriptor(characteristic, uuid)?;
        self.queue(operations::read_descriptor(
            self.lease.peripheral.clone(),
            descriptor,
            self.lease.setup.timeout_configuration(),
        ))
        .single()
        .await
    }

    /// Write a descriptor value.
    pub async fn write_descriptor(
        &self,
        characteristic: Uuid,
        uuid: Uuid,
        data: impl Into<Bytes>,
    ) -> Result<()> {
        let descriptor = self.descriptor(characteristic, uuid)?;
        self.queue(operations::write_descriptor(
            self.lease.peripheral.clone(),
            descriptor,
            data.into(),
            self.lease.setup.timeout_configuration(),
        ))
        .single()
        .await
    }

    /// Enable notifications of a characteristic and stream its values.
    ///
    /// The stream ends when the connection is lost.
    pub async fn setup_notification(&self, uuid: Uuid) -> Result<BoxStream<'static, Vec<u8>>> {
        let characteristic = self.characteristic(uuid)?;

        // Listen first so values sent right after enabling are not lost.
        let notifications = self.lease.peripheral.notifications().await?;

        self.queue(operations::enable_notifications(
            self.lease.peripheral.clone(),
            characteristic,
            self.illegal_operation_check(),
            self.lease.setup.timeout_configuration(),
        ))
        .single()
        .await?;

        let router = self.lease.router.clone();
        Ok(notifications
            .filter_map(move |notification| async move {
                (notification.uuid == uuid).then_some(notification.value)
            })
            .take_until(async move {
                router.first_disconnection().await;
            })
            .boxed())
    }

    /// Disable notifications of a characteristic.
    pub async fn disable_notification(&self, uuid: Uuid) -> Result<()> {
        let characteristic = self.characteristic(uuid)?;
        self.queue(operations::disable_notifications(
            self.lease.peripheral.clone(),
            characteristic,
            self.lease.setup.timeout_configuration(),
        ))
        .single()
        .await
    }

    /// Disconnect now instead of waiting for the last clone to drop.
    ///
    /// Everything pending on the connection fails with
    /// [`Error::DisconnectedByRequest`].
    pub async fn disconnect(&self) -> Result<()> {
        let cause = Error::DisconnectedByRequest {
            address: self.address().to_string(),
        };
        if !self.lease.router.route(cause) {
            debug!("{} already disconnected", self.address());
            return Ok(());
        }

        if let Some(monitor) = self.lease.monitor.lock().take() {
            monitor.abort();
        }
        self.lease.queue.on_connection_unsubscribed();
        self.lease.state.set(ConnectionState::Disconnecting);

        let result = self
            .lease
            .client_queue
            .queue(
                operations::disconnect(
                    self.lease.peripheral.clone(),
                    self.lease.setup.timeout_configuration(),
                )
                .with_priority(Priority::High),
            )
            .single()
            .await;

        self.lease.state.set(ConnectionState::Disconnected);
        result
    }

    fn illegal_operation_check(&self) -> IllegalOperationCheck {
        IllegalOperationCheck::from(&self.lease.setup)
    }
}

impl std::fmt::Debug for BleConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleConnection")
            .field("address", &self.address())
            .field("state", &self.state())
            .field("queue", &self.lease.queue)
            .finish()
    }
}

/// Route adapter events concerning `peripheral` into its router.
async fn monitor_link(
    adapter: Adapter,
    peripheral: Peripheral,
    router: DisconnectionRouter,
    state: Arc<StateCell>,
) {
    let id = peripheral.id();
    let mut events = match adapter.events().await {
        Ok(events) => events,
        Err(e) => {
            warn!("Failed to get adapter events for {}: {}", router.address(), e);
            router.first_disconnection().await;
            state.set(ConnectionState::Disconnected);
            return;
        }
    };

    match adapter.adapter_state().await {
        Ok(current) => {
            route_adapter_state(&router, current);
        }
        Err(e) => debug!("Adapter state of {} unknown: {}", router.address(), e),
    }

    loop {
        tokio::select! {
            _ = router.first_disconnection() => break,
            event = events.next() => match event {
                Some(CentralEvent::DeviceDisconnected(disconnected)) if disconnected == id => {
                    router.on_disconnected(None);
                }
                Some(CentralEvent::StateUpdate(current)) => {
                    route_adapter_state(&router, current);
                }
                Some(event) => trace!("Ignoring adapter event {:?}", event),
                None => {
                    router.route(Error::BluetoothUnavailable);
                    break;
                }
            },
        }
    }

    state.set(ConnectionState::Disconnected);
    debug!("Link monitor of {} ended", router.address());
}

/// Disconnect `router` if the adapter is off. Returns whether it was routed.
fn route_adapter_state(router: &DisconnectionRouter, state: CentralState) -> bool {
    match state {
        CentralState::PoweredOff => router.on_adapter_state_changed(false),
        _ => false,
    }
}
