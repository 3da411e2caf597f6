//! Error types for heightscale-types.

use thiserror::Error;

/// Errors that can occur when parsing configuration values into typed form.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    /// Target BMI was not a finite positive number.
    #[error("Invalid target BMI: {0}")]
    InvalidTargetBmi(String),

    /// Scale address was not a recognizable device identifier.
    #[error("Invalid scale address: {0}")]
    InvalidAddress(String),

    /// A persisted measurement had a non-positive or non-finite weight or height.
    #[error("Invalid measurement: {0}")]
    InvalidMeasurement(String),
}

/// Result type alias using heightscale-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Reasons a raw notification did not produce a measurement.
///
/// Rejections are expected during normal operation: the scale streams
/// unsettled readings while someone steps on it, and impedance is only
/// meaningful once bare feet are on the electrodes.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeRejection {
    /// Payload is shorter than the fixed notification layout.
    #[error("payload requires {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum payload length.
        expected: usize,
        /// Length actually received.
        actual: usize,
    },

    /// The scale has not settled on a reading yet.
    #[error("reading not stabilized")]
    NotStabilized,

    /// Impedance is at or above the plausibility threshold.
    #[error("impedance {impedance} ohm out of range")]
    ImpedanceOutOfRange {
        /// Raw impedance value in ohms.
        impedance: u16,
    },

    /// Stabilized reading with no load on the platform.
    #[error("zero weight")]
    ZeroWeight,
}
