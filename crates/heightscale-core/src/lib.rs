//! BLE session, connection mode control and remote sync for body-composition scales.
//!
//! This crate talks to one Bluetooth body-composition scale, turns its
//! notifications into [`Measurement`]s, decides which data path is live,
//! and forwards measurements to a remote collector on a best-effort basis.
//!
//! # Features
//!
//! - **Device session**: scan, connect, monitor and tear down through [`ScaleSession`]
//! - **Transport seam**: [`BleTransport`] over btleplug, or [`MockTransport`] in tests
//! - **Auto-reconnection**: [`connect_with_backoff`] with configurable backoff
//! - **Connection mode**: [`ModeController`] picks `ble`, `remote` or `offline` each poll
//! - **Remote sync**: [`sync_all`] and [`deliver_live`] with per-item failure isolation
//! - **Collector client**: HTTP client behind the `collector-client` feature
//!
//! # Platform Differences
//!
//! On Linux and Windows the scale is identified by its MAC address. On
//! macOS, CoreBluetooth hides MAC addresses and the transport reports the
//! peripheral UUID instead; configure that UUID as the scale address there.
//!
//! # Quick Start
//!
//! ```no_run
//! use heightscale_core::{BtleplugTransport, ScaleSession, SessionConfig};
//! use heightscale_core::types::Measurement;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = BtleplugTransport::new().await?;
//!     let session = ScaleSession::shared(transport, SessionConfig::default());
//!
//!     session.connect().await?;
//!
//!     let (tx, mut rx) = tokio::sync::mpsc::channel::<Measurement>(16);
//!     session.start_monitoring(tx).await?;
//!
//!     if let Some(m) = rx.recv().await {
//!         println!("{:.2} kg, {} ohm", m.weight(), m.impedance());
//!     }
//!
//!     session.teardown().await;
//!     Ok(())
//! }
//! ```

pub mod btle;
#[cfg(feature = "collector-client")]
pub mod collector;
pub mod error;
pub mod mock;
pub mod mode;
pub mod reconnect;
pub mod session;
pub mod sync;
pub mod transport;
pub mod util;

pub use heightscale_types as types;

pub use btle::{BtleplugTransport, ConnectionConfig};
pub use error::{ConnectionFailureReason, DeviceNotFoundReason, Error, Result};
pub use mock::{MockTransport, MockTransportBuilder};
pub use mode::{ConnectionMode, ModeController, ModeInputs, ModeSources, SessionSources, derive_mode};
pub use reconnect::{ReconnectOptions, connect_with_backoff};
pub use session::{MeasurementSink, ScaleSession, SessionConfig, SessionState, SharedSession};
pub use sync::{Collector, SyncError, SyncOutcome, SyncRecord, SyncReport, deliver_live, sync_all};
pub use transport::{AdapterState, BleTransport, DiscoveredScale};
pub use util::{create_identifier, format_peripheral_id};

#[cfg(feature = "collector-client")]
pub use collector::{CollectorClient, CollectorError, RemoteMeasurement};
#[cfg(feature = "collector-client")]
pub use sync::sync_all_to;

pub use heightscale_types::uuids;
pub use heightscale_types::{Measurement, ScaleAddress, TargetBmi};
