//! Platform-agnostic types for BLE body-composition scales.
//!
//! This crate holds everything that does not need a Bluetooth stack:
//! the measurement value type, the notification decoder, configuration
//! newtypes, and the GATT identifiers of the scale.
//!
//! # Features
//!
//! - [`Measurement`] value type (serde-serializable behind the `serde` feature)
//! - Pure [`decode`] function with typed [`DecodeRejection`] reasons
//! - [`TargetBmi`] and [`ScaleAddress`] with load-time validation
//! - UUID constants for the Body Composition service
//!
//! # Example
//!
//! ```
//! use heightscale_types::{TargetBmi, decode};
//!
//! let mut frame = [0u8; 13];
//! frame[1] = 0x20; // stabilized
//! frame[9..11].copy_from_slice(&500u16.to_le_bytes());
//! frame[11..13].copy_from_slice(&14000u16.to_le_bytes());
//!
//! let m = decode(&frame, TargetBmi::default()).unwrap();
//! assert!((m.weight() - 70.0).abs() < 1e-9);
//! ```

pub mod decode;
pub mod error;
pub mod types;
pub mod uuid;

pub use decode::{decode, decode_at};
pub use error::{DecodeRejection, ParseError, ParseResult};
pub use types::{Measurement, ScaleAddress, TargetBmi};
pub use uuid as uuids;
