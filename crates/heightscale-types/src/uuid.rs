//! Bluetooth UUIDs and identifiers for body-composition scales.
//!
//! The scale exposes the standard Body Composition service and pushes
//! its weight/impedance frames on the Body Composition Measurement
//! characteristic. Nothing is ever written to the device.

use uuid::{Uuid, uuid};

// --- Standard BLE Service UUIDs ---

/// Body Composition service.
pub const BODY_COMPOSITION_SERVICE: Uuid = uuid!("0000181b-0000-1000-8000-00805f9b34fb");

// --- Characteristic UUIDs ---

/// Body Composition Measurement characteristic (notify).
pub const BODY_COMPOSITION_MEASUREMENT: Uuid = uuid!("00002a9c-0000-1000-8000-00805f9b34fb");

// --- Device identification ---

/// Factory address of the paired scale, used when none is configured.
pub const DEFAULT_SCALE_ADDRESS: &str = "0C:95:41:CB:23:FF";

/// Advertised local names of the supported scale family.
pub const KNOWN_SCALE_NAMES: &[&str] = &["MIBCS", "MIBFS", "MI_SCALE"];

/// Check whether an advertised name belongs to the supported scale family.
pub fn is_known_scale_name(name: &str) -> bool {
    let name = name.trim();
    KNOWN_SCALE_NAMES
        .iter()
        .any(|known| name.eq_ignore_ascii_case(known))
}
