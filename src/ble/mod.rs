//! Bluetooth Low Energy operations and connections.
//!
//! This module contains the btleplug-backed side of the crate:
//! - Queueable operations for every GATT and scan call
//! - Routing of disconnection causes
//! - Connection lifecycle management

pub mod connection;
pub mod disconnection;
pub mod operations;

pub use connection::{BleConnection, ConnectionEvent, ConnectionState};
pub use disconnection::DisconnectionRouter;
pub use operations::{IllegalOperationCheck, LongWriteOperation, SingleResponseOperation};
