//! Error types for the sync engine.

use crate::config::ConfigError;
use panelsync_protocol::ProtocolError;
use panelsync_store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {0}")]
    Transport(String),

    /// The request did not complete within its timeout.
    #[error("operation timed out")]
    Timeout,

    /// The parent answered with an unexpected status.
    #[error("parent returned HTTP {status}: {body}")]
    HttpStatus {
        /// Status code.
        status: u16,
        /// Leading part of the response body.
        body: String,
    },

    /// The parent's payload did not match the expected schema.
    #[error("decode error: {0}")]
    Decode(String),

    /// A payload decoded but carried invalid values.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// User store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Local state file error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Confirmation ledger could not be read or written.
    #[error("ledger error: {0}")]
    Ledger(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Another cycle holds the lease.
    #[error("another sync cycle is in progress (lease {0})")]
    CycleInProgress(PathBuf),

    /// The proxy activation client failed.
    #[error("activation failed: {0}")]
    Activation(String),
}

impl SyncError {
    /// Returns true if the parent reported the resource as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::HttpStatus { status: 404, .. })
    }

    /// Returns true if the error came from the network rather than local state.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            SyncError::Transport(_)
                | SyncError::Timeout
                | SyncError::HttpStatus { .. }
                | SyncError::Decode(_)
        )
    }

    /// Returns true if the local user store could not be reached.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, SyncError::Store(e) if e.is_unavailable())
    }
}
