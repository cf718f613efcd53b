//! Error types for the user store.

use std::io;
use thiserror::Error;
use uuid::Uuid;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The store cannot be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Snapshot could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// Snapshot could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Snapshot was written by an incompatible version.
    #[error("unsupported snapshot version: {0}")]
    UnsupportedVersion(u16),

    /// Insert of a uuid that already exists.
    #[error("user already exists: {0}")]
    DuplicateUser(Uuid),

    /// Update of a uuid that does not exist.
    #[error("user not found: {0}")]
    UserNotFound(Uuid),
}

impl StoreError {
    /// Returns true if the error concerns connectivity rather than data.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(StoreError::Unavailable("socket".into()).is_unavailable());
        assert!(StoreError::Io(io::Error::new(io::ErrorKind::Other, "x")).is_unavailable());
        assert!(!StoreError::UserNotFound(Uuid::nil()).is_unavailable());
    }

    #[test]
    fn error_display() {
        let err = StoreError::UnsupportedVersion(9);
        assert_eq!(err.to_string(), "unsupported snapshot version: 9");
    }
}
