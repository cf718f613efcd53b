//! Unit conversion between local byte counters and the parent's GB figures.
//!
//! The parent accounts in binary gigabytes (1024³ bytes) with six decimal
//! places. Conversions happen once, at the wire boundary.

use crate::error::{ProtocolError, ProtocolResult};

/// Bytes in one parent accounting unit.
pub const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// Decimal places kept when reporting GB figures to the parent.
pub const GB_PRECISION: i32 = 6;

/// Converts a byte count into GB without rounding.
pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GB as f64
}

/// Rounds a GB figure to [`GB_PRECISION`] decimal places.
pub fn round_gb(gb: f64) -> f64 {
    let scale = 10f64.powi(GB_PRECISION);
    (gb * scale).round() / scale
}

/// Converts a GB figure from the parent into bytes, truncating the fraction.
///
/// `field` names the payload field for the error message.
pub fn gb_to_bytes(field: &'static str, gb: f64) -> ProtocolResult<u64> {
    if !gb.is_finite() || gb < 0.0 {
        return Err(ProtocolError::InvalidUsage { field, value: gb });
    }
    let bytes = gb * BYTES_PER_GB as f64;
    if bytes >= u64::MAX as f64 {
        return Err(ProtocolError::InvalidUsage { field, value: gb });
    }
    Ok(bytes as u64)
}
