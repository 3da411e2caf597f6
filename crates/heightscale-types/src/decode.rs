//! Decoding of body-composition measurement notifications.
//!
//! The scale pushes a fixed 13-byte frame on every weight change:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 1 | 1 | control flags (bit 5 = stabilized) |
//! | 9 | 2 | impedance, ohms (LE) |
//! | 11 | 2 | weight, 1/200 kg (LE) |
//!
//! The remaining bytes carry vendor fields that are not used here.

use bytes::Buf;
use time::OffsetDateTime;

use crate::error::DecodeRejection;
use crate::types::{Measurement, TargetBmi};

/// Minimum notification length.
pub const MIN_PAYLOAD_BYTES: usize = 13;

/// Control-byte bit set once the reading has settled.
pub const STABILIZED_MASK: u8 = 0x20;

/// Impedance at or above this value is treated as "no skin contact".
pub const IMPEDANCE_LIMIT: u16 = 3000;

/// Raw weight units per kilogram.
pub const WEIGHT_DIVISOR: f64 = 200.0;

const CONTROL_OFFSET: usize = 1;
const IMPEDANCE_OFFSET: usize = 9;

/// Decode a raw notification, stamping it with the current time.
///
/// ```
/// use heightscale_types::{DecodeRejection, TargetBmi, decode};
///
/// let short = [0u8; 4];
/// assert!(matches!(
///     decode(&short, TargetBmi::default()),
///     Err(DecodeRejection::TooShort { expected: 13, actual: 4 })
/// ));
/// ```
pub fn decode(bytes: &[u8], target_bmi: TargetBmi) -> Result<Measurement, DecodeRejection> {
    decode_at(bytes, target_bmi, OffsetDateTime::now_utc())
}

/// Decode a raw notification with an explicit timestamp.
///
/// Gates run in a fixed order: length, stabilized flag, impedance, weight.
pub fn decode_at(
    bytes: &[u8],
    target_bmi: TargetBmi,
    at: OffsetDateTime,
) -> Result<Measurement, DecodeRejection> {
    if bytes.len() < MIN_PAYLOAD_BYTES {
        return Err(DecodeRejection::TooShort {
            expected: MIN_PAYLOAD_BYTES,
            actual: bytes.len(),
        });
    }

    let stabilized = bytes[CONTROL_OFFSET] & STABILIZED_MASK != 0;
    let mut fields = &bytes[IMPEDANCE_OFFSET..MIN_PAYLOAD_BYTES];
    let impedance = fields.get_u16_le();
    let weight_raw = fields.get_u16_le();

    if !stabilized {
        return Err(DecodeRejection::NotStabilized);
    }
    if impedance >= IMPEDANCE_LIMIT {
        return Err(DecodeRejection::ImpedanceOutOfRange { impedance });
    }
    if weight_raw == 0 {
        return Err(DecodeRejection::ZeroWeight);
    }

    let weight = f64::from(weight_raw) / WEIGHT_DIVISOR;
    let height = target_bmi.height_for(weight);
    Ok(Measurement::new(weight, impedance, height, at))
}
