//! Error types for heightscale-core.
//!
//! Device-side failures are returned as values so the controlling layer
//! can retry or report status. Decode rejections are not errors at all;
//! they never leave the monitoring task.
//!
//! ## Retry vs Reconnect
//!
//! | Error Type | Strategy |
//! |------------|----------|
//! | [`Error::DeviceNotFound`] | Retry the connect with backoff; the scale sleeps until stepped on |
//! | [`Error::Timeout`] | Retry with backoff |
//! | [`Error::ConnectionFailed`] | Retry with backoff |
//! | [`Error::AdapterNotReady`] | Wait for the adapter, then retry |
//! | [`Error::PermissionDenied`] | Do not retry, grant Bluetooth access |
//! | [`Error::ScanInProgress`] | Wait for the running scan to finish |
//! | [`Error::ConnectInProgress`] | Wait for the running connect to finish |
//! | [`Error::SessionClosed`] | Do not retry, the session was torn down |
//! | [`Error::InvalidConfig`] | Do not retry, fix configuration |

use std::time::Duration;

use thiserror::Error;

use crate::transport::AdapterState;

/// Errors that can occur while talking to the scale.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Device not found during scan or connection.
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceNotFoundReason),

    /// The adapter is not powered on.
    #[error("Bluetooth adapter not ready ({0})")]
    AdapterNotReady(AdapterState),

    /// The platform refused Bluetooth access.
    #[error("Bluetooth permission denied")]
    PermissionDenied,

    /// Operation attempted while not connected to the scale.
    #[error("Not connected to device")]
    NotConnected,

    /// Required BLE characteristic not found on device.
    #[error("Characteristic not found: {uuid} (searched in {service_count} services)")]
    CharacteristicNotFound {
        /// The UUID that was not found.
        uuid: String,
        /// Number of services that were searched.
        service_count: usize,
    },

    /// Connection failed with specific reason.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// The device identifier that failed to connect.
        device_id: Option<String>,
        /// The structured reason for the failure.
        reason: ConnectionFailureReason,
    },

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Another scan is already running on this session.
    #[error("A scan is already in progress")]
    ScanInProgress,

    /// Another connect is already running on this session.
    #[error("A connection attempt is already in progress")]
    ConnectInProgress,

    /// A notification subscription is already active.
    #[error("Already monitoring measurements")]
    AlreadyMonitoring,

    /// The session was torn down and cannot be reused.
    #[error("Session has been torn down")]
    SessionClosed,

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Why a connection attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionFailureReason {
    /// Connected, but the measurement service or characteristic was missing.
    DiscoveryFailed(String),
    /// Generic BLE error.
    BleError(String),
    /// Other/unknown error.
    Other(String),
}

impl std::fmt::Display for ConnectionFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DiscoveryFailed(msg) => write!(f, "service discovery failed: {}", msg),
            Self::BleError(msg) => write!(f, "BLE error: {}", msg),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

/// Reason why a device was not found.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum DeviceNotFoundReason {
    /// Device with specified address was never discovered.
    NotFound { identifier: String },
    /// Scan timed out before finding device.
    ScanTimeout { duration: Duration },
    /// No Bluetooth adapter available.
    NoAdapter,
}

impl std::fmt::Display for DeviceNotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { identifier } => write!(f, "device '{}' not found", identifier),
            Self::ScanTimeout { duration } => write!(f, "scan timed out after {:?}", duration),
            Self::NoAdapter => write!(f, "no Bluetooth adapter available"),
        }
    }
}

impl Error {
    /// Create a device not found error for a specific identifier.
    pub fn device_not_found(identifier: impl Into<String>) -> Self {
        Self::DeviceNotFound(DeviceNotFoundReason::NotFound {
            identifier: identifier.into(),
        })
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a characteristic not found error.
    pub fn characteristic_not_found(uuid: impl Into<String>, service_count: usize) -> Self {
        Self::CharacteristicNotFound {
            uuid: uuid.into(),
            service_count,
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create a connection failure with structured reason.
    pub fn connection_failed(device_id: Option<String>, reason: ConnectionFailureReason) -> Self {
        Self::ConnectionFailed { device_id, reason }
    }

    /// Whether a later attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Bluetooth(_)
                | Self::DeviceNotFound(DeviceNotFoundReason::ScanTimeout { .. })
                | Self::DeviceNotFound(DeviceNotFoundReason::NotFound { .. })
                | Self::AdapterNotReady(_)
                | Self::NotConnected
                | Self::CharacteristicNotFound { .. }
                | Self::ConnectionFailed { .. }
                | Self::Timeout { .. }
                | Self::ScanInProgress
                | Self::ConnectInProgress
        )
    }
}

/// Result type alias using heightscale-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
