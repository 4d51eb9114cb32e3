//! Serialized execution of operations.
//!
//! The Bluetooth stack accepts only one outstanding call per scope. A queue
//! hands the radio to one operation at a time, in priority order, and waits
//! for that operation to release it before starting the next.
//!
//! - [`ClientOperationQueue`] serializes operations not tied to a connection.
//! - [`ConnectionOperationQueue`] serializes operations of one connection and
//!   fails everything pending once the connection goes away.

pub mod client_queue;
pub mod connection_queue;
pub(crate) mod entry;
pub mod interaction;
pub(crate) mod priority_queue;
pub(crate) mod runner;
pub mod semaphore;

pub use client_queue::ClientOperationQueue;
pub use connection_queue::{ConnectionOperationQueue, ConnectionSubscriptionWatcher};
pub use interaction::InteractionContext;
pub use semaphore::{QueueReleaser, QueueSemaphore};
