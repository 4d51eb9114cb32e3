//! Error types for the ble-operation-queue crate.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

/// The kind of hardware call an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OperationType {
    /// Connection establishment or teardown.
    ConnectionState,
    /// GATT service discovery.
    ServiceDiscovery,
    /// Characteristic read.
    CharacteristicRead,
    /// Characteristic write.
    CharacteristicWrite,
    /// Characteristic write split into several batches.
    CharacteristicLongWrite,
    /// Descriptor read.
    DescriptorRead,
    /// Descriptor write.
    DescriptorWrite,
    /// Enabling or disabling characteristic notifications.
    NotificationSetup,
    /// Starting a scan.
    ScanStart,
    /// Stopping a scan.
    ScanStop,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionState => write!(f, "CONNECTION_STATE"),
            Self::ServiceDiscovery => write!(f, "SERVICE_DISCOVERY"),
            Self::CharacteristicRead => write!(f, "CHARACTERISTIC_READ"),
            Self::CharacteristicWrite => write!(f, "CHARACTERISTIC_WRITE"),
            Self::CharacteristicLongWrite => write!(f, "CHARACTERISTIC_LONG_WRITE"),
            Self::DescriptorRead => write!(f, "DESCRIPTOR_READ"),
            Self::DescriptorWrite => write!(f, "DESCRIPTOR_WRITE"),
            Self::NotificationSetup => write!(f, "NOTIFICATION_SETUP"),
            Self::ScanStart => write!(f, "SCAN_START"),
            Self::ScanStop => write!(f, "SCAN_STOP"),
        }
    }
}

/// The main error type for this crate.
///
/// Errors are cloneable because a single terminal error (for example a
/// disconnection) is delivered to every operation still pending on a queue.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(Arc<btleplug::Error>),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// The hardware call that begins an operation failed immediately.
    #[error("Cannot start {operation} on {address}: {reason}")]
    CannotStart {
        /// The kind of operation that failed to start.
        operation: OperationType,
        /// Address of the device the operation targeted.
        address: String,
        /// Why the start call was rejected.
        reason: String,
    },

    /// No terminal callback arrived within the configured window.
    #[error("Timed out waiting for {operation} on {address}")]
    Timeout {
        /// The kind of operation that timed out.
        operation: OperationType,
        /// Address of the device the operation targeted.
        address: String,
    },

    /// The link to the device was lost.
    #[error("Disconnected from {address} (status: {status:?})")]
    Disconnected {
        /// Address of the disconnected device.
        address: String,
        /// Status code reported by the stack, if known.
        status: Option<i32>,
    },

    /// The connection was released because nobody uses it anymore.
    #[error("Disconnected from {address} by request")]
    DisconnectedByRequest {
        /// Address of the disconnected device.
        address: String,
    },

    /// The Bluetooth adapter became unusable while connected.
    #[error("Bluetooth adapter disabled while connected to {address}")]
    AdapterDisabled {
        /// Address of the device that was connected.
        address: String,
    },

    /// The characteristic does not support the requested operation.
    #[error("Characteristic {uuid} does not support {operation} (properties: {properties})")]
    IllegalOperation {
        /// UUID of the characteristic.
        uuid: Uuid,
        /// The rejected operation.
        operation: OperationType,
        /// The properties the characteristic advertises.
        properties: String,
    },

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: Uuid,
    },

    /// Descriptor not found on the device.
    #[error("Descriptor not found: {uuid}")]
    DescriptorNotFound {
        /// The UUID of the descriptor that was not found.
        uuid: Uuid,
    },

    /// An operation panicked while running.
    #[error("Operation {operation} panicked: {message}")]
    OperationPanicked {
        /// Name of the operation.
        operation: String,
        /// The panic payload, if it was a string.
        message: String,
    },

    /// The queue was shut down before the operation could run.
    #[error("Operation queue closed")]
    QueueClosed,

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error terminates a connection scope.
    pub fn is_disconnection(&self) -> bool {
        matches!(
            self,
            Self::Disconnected { .. } | Self::DisconnectedByRequest { .. } | Self::AdapterDisabled { .. }
        )
    }
}

impl From<btleplug::Error> for Error {
    fn from(error: btleplug::Error) -> Self {
        Self::Bluetooth(Arc::new(error))
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
