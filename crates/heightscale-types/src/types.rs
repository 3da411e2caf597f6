//! Core types for scale measurements.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{ParseError, ParseResult};
use crate::uuid::DEFAULT_SCALE_ADDRESS;

/// A settled body-composition reading.
///
/// Measurements are produced by [`crate::decode`] from notifications that
/// passed every validity gate, so `weight` and `height` are always positive.
/// Persisted measurements are restored through serde, which rejects
/// records that break that rule; there is no public constructor.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "MeasurementRecord"))]
pub struct Measurement {
    weight: f64,
    impedance: u16,
    height: f64,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    timestamp: OffsetDateTime,
}

impl Measurement {
    pub(crate) fn new(weight: f64, impedance: u16, height: f64, timestamp: OffsetDateTime) -> Self {
        Self {
            weight,
            impedance,
            height,
            timestamp,
        }
    }

    /// Body weight in kilograms.
    #[must_use]
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Bioelectrical impedance in ohms.
    #[must_use]
    pub fn impedance(&self) -> u16 {
        self.impedance
    }

    /// Height in meters.
    ///
    /// This is **not measured**. The scale has no stature sensor; the value
    /// is back-solved from weight and the configured target BMI (see
    /// [`TargetBmi::height_for`]).
    #[must_use]
    pub fn height(&self) -> f64 {
        self.height
    }

    /// Wall-clock time at which the notification was decoded.
    #[must_use]
    pub fn timestamp(&self) -> OffsetDateTime {
        self.timestamp
    }
}

/// Wire form of [`Measurement`], checked before it becomes one.
#[cfg(feature = "serde")]
#[derive(Deserialize)]
struct MeasurementRecord {
    weight: f64,
    impedance: u16,
    height: f64,
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
}

#[cfg(feature = "serde")]
impl TryFrom<MeasurementRecord> for Measurement {
    type Error = ParseError;

    fn try_from(record: MeasurementRecord) -> ParseResult<Self> {
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(record.weight) {
            return Err(ParseError::InvalidMeasurement(format!(
                "weight {}",
                record.weight
            )));
        }
        if !positive(record.height) {
            return Err(ParseError::InvalidMeasurement(format!(
                "height {}",
                record.height
            )));
        }
        Ok(Self::new(
            record.weight,
            record.impedance,
            record.height,
            record.timestamp,
        ))
    }
}

/// Target body-mass index used to approximate height.
///
/// Defaults to 21.0. Configuration hands it over as a decimal string;
/// anything missing or unusable silently falls back to the default.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetBmi(f64);

impl TargetBmi {
    /// BMI used when configuration does not provide a usable value.
    pub const DEFAULT: f64 = 21.0;

    /// Create a target BMI, rejecting non-finite and non-positive values.
    #[must_use]
    pub fn new(value: f64) -> Option<Self> {
        (value.is_finite() && value > 0.0).then_some(Self(value))
    }

    /// Parse a configuration string, falling back to [`Self::DEFAULT`].
    ///
    /// ```
    /// use heightscale_types::TargetBmi;
    ///
    /// assert_eq!(TargetBmi::parse_or_default("23.5").value(), 23.5);
    /// assert_eq!(TargetBmi::parse_or_default("tall").value(), 21.0);
    /// assert_eq!(TargetBmi::parse_or_default("").value(), 21.0);
    /// ```
    #[must_use]
    pub fn parse_or_default(raw: &str) -> Self {
        raw.parse().unwrap_or_default()
    }

    /// The BMI value.
    #[must_use]
    pub fn value(self) -> f64 {
        self.0
    }

    /// Approximate height in meters for a given weight in kilograms.
    ///
    /// Solves `bmi = weight / height²` for height. This is a deliberate
    /// stand-in for a real stature reading and is only as good as the
    /// configured target BMI.
    #[must_use]
    pub fn height_for(self, weight_kg: f64) -> f64 {
        (weight_kg / self.0).sqrt()
    }
}

impl Default for TargetBmi {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

impl FromStr for TargetBmi {
    type Err = ParseError;

    fn from_str(s: &str) -> ParseResult<Self> {
        s.trim()
            .parse::<f64>()
            .ok()
            .and_then(Self::new)
            .ok_or_else(|| ParseError::InvalidTargetBmi(s.to_string()))
    }
}

impl fmt::Display for TargetBmi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the single scale this installation talks to.
///
/// Linux and Windows report MAC addresses (`0C:95:41:CB:23:FF`); macOS
/// reports a CoreBluetooth UUID instead. Both forms are accepted and
/// normalized to upper case. Comparison against discovered devices is
/// case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScaleAddress(String);

impl ScaleAddress {
    /// The normalized identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a discovered device identifier refers to this scale.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        let candidate = candidate.trim();
        match normalize_mac(candidate) {
            Some(mac) => mac == self.0,
            None => self.0.eq_ignore_ascii_case(candidate),
        }
    }
}

impl Default for ScaleAddress {
    fn default() -> Self {
        Self(DEFAULT_SCALE_ADDRESS.to_string())
    }
}

impl FromStr for ScaleAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> ParseResult<Self> {
        let trimmed = s.trim();
        if let Some(mac) = normalize_mac(trimmed) {
            return Ok(Self(mac));
        }
        if ::uuid::Uuid::parse_str(trimmed).is_ok() {
            return Ok(Self(trimmed.to_ascii_uppercase()));
        }
        Err(ParseError::InvalidAddress(s.to_string()))
    }
}

impl fmt::Display for ScaleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize_mac(s: &str) -> Option<String> {
    let octets: Vec<&str> = s.split([':', '-']).collect();
    let well_formed = octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));
    well_formed.then(|| octets.join(":").to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_bmi_default() {
        assert_eq!(TargetBmi::default().value(), 21.0);
    }

    #[test]
    fn test_target_bmi_rejects_unusable_values() {
        assert!(TargetBmi::new(0.0).is_none());
        assert!(TargetBmi::new(-3.0).is_none());
        assert!(TargetBmi::new(f64::NAN).is_none());
        assert!(TargetBmi::new(f64::INFINITY).is_none());
        assert!(TargetBmi::new(18.5).is_some());
    }

    #[test]
    fn test_target_bmi_parse_falls_back_silently() {
        for raw in ["", "abc", "NaN", "inf", "0", "-21", "21kg"] {
            assert_eq!(TargetBmi::parse_or_default(raw), TargetBmi::default(), "{raw:?}");
        }
        assert_eq!(TargetBmi::parse_or_default(" 22.5 ").value(), 22.5);
    }

    #[test]
    fn test_target_bmi_from_str_error() {
        let err = "x".parse::<TargetBmi>().unwrap_err();
        assert_eq!(err, ParseError::InvalidTargetBmi("x".to_string()));
    }

    #[test]
    fn test_height_for() {
        let bmi = TargetBmi::default();
        assert!((bmi.height_for(70.0) - (70.0f64 / 21.0).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_scale_address_normalizes_mac() {
        let addr: ScaleAddress = "0c-95-41-cb-23-ff".parse().unwrap();
        assert_eq!(addr.as_str(), "0C:95:41:CB:23:FF");
        assert_eq!(addr, ScaleAddress::default());
    }

    #[test]
    fn test_scale_address_accepts_platform_uuid() {
        let addr: ScaleAddress = "6a1f0c2e-3b4d-4e5f-8a9b-0c1d2e3f4a5b".parse().unwrap();
        assert!(addr.matches("6A1F0C2E-3B4D-4E5F-8A9B-0C1D2E3F4A5B"));
    }

    #[test]
    fn test_scale_address_rejects_garbage() {
        for raw in ["", "0C:95:41:CB:23", "0C:95:41:CB:23:GG", "scale"] {
            assert!(raw.parse::<ScaleAddress>().is_err(), "{raw:?}");
        }
    }

    #[test]
    fn test_scale_address_matches_case_insensitive() {
        let addr = ScaleAddress::default();
        assert!(addr.matches("0c:95:41:cb:23:ff"));
        assert!(addr.matches("0C:95:41:CB:23:FF"));
        assert!(!addr.matches("0C:95:41:CB:23:FE"));
        assert!(!addr.matches("MIBCS"));
    }
}
