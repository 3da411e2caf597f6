//! The Bluetooth surface the scale session depends on.
//!
//! [`BleTransport`] is intentionally narrow: it covers the handful of
//! operations needed to find one scale, connect, confirm the measurement
//! characteristic exists, and subscribe to it. No writes are ever made to
//! the device. [`crate::btle::BtleplugTransport`] implements it over real
//! hardware and [`crate::mock::MockTransport`] implements it for tests.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::Stream;
use uuid::Uuid;

use heightscale_types::uuids::is_known_scale_name;

use crate::error::Result;

/// Power state reported by the Bluetooth adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdapterState {
    /// The adapter has not reported a state yet, or reported something unexpected.
    #[default]
    Unknown,
    /// Bluetooth is switched off.
    PoweredOff,
    /// Bluetooth is on and usable.
    PoweredOn,
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::PoweredOff => write!(f, "powered off"),
            Self::PoweredOn => write!(f, "powered on"),
        }
    }
}

/// A device seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredScale {
    /// Connection identifier (MAC address, or peripheral UUID on macOS).
    pub address: String,
    /// Advertised local name, if any.
    pub name: Option<String>,
    /// RSSI signal strength.
    pub rssi: Option<i16>,
}

impl DiscoveredScale {
    /// Whether the advertised name belongs to the supported scale family.
    pub fn looks_like_scale(&self) -> bool {
        self.name.as_deref().is_some_and(is_known_scale_name)
    }
}

/// Devices reported while a scan is running. Ends when the scan stops or fails.
pub type DiscoveryStream = Pin<Box<dyn Stream<Item = DiscoveredScale> + Send>>;

/// Raw notification payloads in arrival order. Ends when the link drops.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// Bluetooth operations used by [`crate::ScaleSession`].
///
/// Implementations must fail (or end their streams) rather than hang:
/// every call either completes, errors, or is bounded by a transport
/// timeout.
#[async_trait]
pub trait BleTransport: Send + Sync + 'static {
    /// Current adapter power state.
    async fn adapter_state(&self) -> AdapterState;

    /// Ask the platform for Bluetooth access. Returns `false` if refused.
    async fn request_permissions(&self) -> bool;

    /// Begin an unfiltered scan.
    async fn start_scan(&self) -> Result<DiscoveryStream>;

    /// Stop scanning. Safe to call when no scan is running.
    async fn stop_scan(&self) -> Result<()>;

    /// Open a connection to a device previously reported by a scan.
    async fn connect(&self, address: &str) -> Result<()>;

    /// Discover services and confirm `characteristic` exists under `service`.
    async fn discover(&self, address: &str, service: Uuid, characteristic: Uuid) -> Result<()>;

    /// Enable notifications on `characteristic` and stream their payloads.
    async fn subscribe(&self, address: &str, characteristic: Uuid) -> Result<NotificationStream>;

    /// Disable notifications on `characteristic`.
    async fn unsubscribe(&self, address: &str, characteristic: Uuid) -> Result<()>;

    /// Close the connection. Safe to call when not connected.
    async fn disconnect(&self, address: &str) -> Result<()>;

    /// Release every adapter-level resource. The transport is unusable afterwards.
    async fn shutdown(&self);
}
