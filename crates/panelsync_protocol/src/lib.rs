//! # PanelSync Protocol
//!
//! User record model and parent wire schema for PanelSync.
//!
//! This crate provides:
//! - `UserRecord` with its parent-owned `ParentFields`
//! - `ParentUser` and the usage payloads exchanged with the parent panel
//! - Byte/GB conversion used at the wire boundary
//! - `UsageDelta` for accumulative traffic reporting
//! - Inbound tag classification for user activation
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Ownership Rules
//!
//! - `uuid` is the only join key between parent and child
//! - Every field in `ParentFields` flows parent → child
//! - `current_usage` and `last_online` flow child → parent and are never
//!   overwritten by a pull

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod delta;
mod error;
mod inbound;
mod units;
mod user;
mod wire;

pub use delta::UsageDelta;
pub use error::{ProtocolError, ProtocolResult};
pub use inbound::{activation_email, classify_tag, ActivationEntry, InboundProtocol, InboundTarget};
pub use units::{bytes_to_gb, gb_to_bytes, round_gb, BYTES_PER_GB, GB_PRECISION};
pub use user::{AdminId, ParentFields, UserMode, UserRecord, DEFAULT_MAX_IPS};
pub use wire::{ParentUser, UsageResponse, UsageUpdate};
