//! # ble-operation-queue
//!
//! Serialized, priority-ordered execution of Bluetooth Low Energy operations
//! on top of [btleplug](https://docs.rs/btleplug).
//!
//! Bluetooth stacks accept one outstanding GATT call per scope. Issuing a
//! second call before the first one answered tends to drop one of them
//! silently. This library puts every call behind a queue that starts one
//! operation at a time and waits for it to release the radio.
//!
//! ## Features
//!
//! - **Priority Scheduling**: High, Normal and Low classes, FIFO within a class
//! - **Release Gate**: The next operation starts only after the running one releases the queue
//! - **Client and Connection Scopes**: Scans and connects share one queue, each connection has its own
//! - **Termination**: A lost link fails everything pending on the connection with the cause
//! - **Cancellation**: Dropping a result handle removes the operation from the queue
//! - **Timeouts**: Every hardware call is bounded, with an optional fallback
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ble_operation_queue::{BleClient, ConnectionSetup, Result};
//! use btleplug::api::ScanFilter;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = BleClient::new().await?;
//!     client.start_scan(ScanFilter::default()).await?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!     client.stop_scan().await?;
//!
//!     if let Some(peripheral) = client.peripherals().await?.into_iter().next() {
//!         let connection = client.connect(peripheral, ConnectionSetup::default()).await?;
//!         for service in connection.discover_services().await? {
//!             println!("Service {}", service.uuid);
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Custom Operations
//!
//! Anything that needs exclusive access to the radio can implement
//! [`Operation`] and be queued with [`BleClient::queue`] or
//! [`BleConnection::queue`].
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for configuration and status types

// Public modules
pub mod ble;
pub mod client;
pub mod config;
pub mod error;
pub mod observer;
pub mod operation;
pub mod serialization;

// Re-exports for convenience
pub use client::BleClient;
pub use config::{
    ConnectionSetup, TimeoutConfiguration, DEFAULT_LONG_WRITE_BATCH_SIZE, DEFAULT_OPERATION_TIMEOUT,
};
pub use error::{Error, OperationType, Result};
pub use observer::{OperationInfo, OperationObserver};
pub use operation::{Emitter, Operation, OperationHandle, Priority, QueueReleasingEmitter};

// Re-export commonly used types from submodules
pub use ble::{
    BleConnection, ConnectionEvent, ConnectionState, DisconnectionRouter, IllegalOperationCheck,
    LongWriteOperation, SingleResponseOperation,
};
pub use serialization::{
    ClientOperationQueue, ConnectionOperationQueue, ConnectionSubscriptionWatcher,
    InteractionContext, QueueReleaser, QueueSemaphore,
};
