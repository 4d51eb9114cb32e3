//! Optional hook for operation lifecycle events.

use chrono::{DateTime, Utc};
use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use crate::operation::Priority;

/// Describes a queued operation in lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OperationInfo {
    /// Name reported by the operation.
    pub name: Cow<'static, str>,
    /// Sequence number assigned when it was queued.
    pub sequence: u64,
    /// Scheduling class.
    pub priority: Priority,
    /// When it was queued.
    pub queued_at: DateTime<Utc>,
}

impl fmt::Display for OperationInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.sequence)
    }
}

/// Receives lifecycle events from a queue.
///
/// Every method has an empty default, so implementors only override what
/// they need.
#[cfg_attr(test, mockall::automock)]
pub trait OperationObserver: Send + Sync {
    /// The operation entered the queue.
    fn on_queued(&self, _operation: &OperationInfo) {}

    /// The operation was handed the radio.
    fn on_started(&self, _operation: &OperationInfo) {}

    /// The operation released the radio.
    fn on_finished(&self, _operation: &OperationInfo, _elapsed: Duration) {}

    /// The operation was withdrawn before it started.
    fn on_removed(&self, _operation: &OperationInfo) {}
}
