//! Timeout and connection configuration.

use std::time::Duration;

/// Default time an operation may wait for its terminal callback.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Batch size of a long write on a link with the default ATT MTU of 23.
pub const DEFAULT_LONG_WRITE_BATCH_SIZE: usize = 20;

/// How long an operation waits for the hardware to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeoutConfiguration {
    /// Maximum time between starting the operation and its terminal callback.
    pub timeout: Duration,
}

impl TimeoutConfiguration {
    /// Create a timeout configuration with the given window.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TimeoutConfiguration {
    fn default() -> Self {
        Self::new(DEFAULT_OPERATION_TIMEOUT)
    }
}

/// Options applied when establishing a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnectionSetup {
    /// Timeout applied to every operation queued on the connection.
    pub operation_timeout: Duration,
    /// Whether services are discovered right after connecting.
    pub discover_services: bool,
    /// Log a warning instead of failing when a characteristic lacks the
    /// property an operation needs.
    pub suppress_illegal_operation_check: bool,
}

impl ConnectionSetup {
    /// Set the per-operation timeout.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set whether services are discovered after connecting.
    pub fn with_service_discovery(mut self, discover: bool) -> Self {
        self.discover_services = discover;
        self
    }

    /// Set whether illegal operations only produce a warning.
    pub fn with_suppressed_illegal_operation_check(mut self, suppress: bool) -> Self {
        self.suppress_illegal_operation_check = suppress;
        self
    }

    /// The timeout configuration derived from this setup.
    pub fn timeout_configuration(&self) -> TimeoutConfiguration {
        TimeoutConfiguration::new(self.operation_timeout)
    }
}

impl Default for ConnectionSetup {
    fn default() -> Self {
        Self {
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            discover_services: true,
            suppress_illegal_operation_check: false,
        }
    }
}
