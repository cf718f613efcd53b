//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol conversions.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while converting parent payloads into local records.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    /// A usage figure was negative, NaN or infinite.
    #[error("invalid usage value for {field}: {value}")]
    InvalidUsage {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value.
        value: f64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::InvalidUsage {
            field: "usage_limit_GB",
            value: -1.0,
        };
        assert!(err.to_string().contains("usage_limit_GB"));
        assert!(err.to_string().contains("-1"));
    }
}
