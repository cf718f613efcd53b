//! # PanelSync Engine
//!
//! Traffic metering and user reconciliation between a child node and its
//! parent panel.
//!
//! This crate provides:
//! - Sync state machine (recover → collect → push → reset → users → activate)
//! - Accumulative traffic push with per-uuid confirmation
//! - A durable confirmation ledger that makes the counter reset crash-safe
//! - User reconciliation with soft-blocking
//! - HTTP client abstraction for the parent API
//! - Cycle lease, status file and TOML configuration
//!
//! ## Architecture
//!
//! The child sends only what it metered since the last confirmed report;
//! the parent adds it to its running total. Identity and policy fields flow
//! the other way and are overwritten on the child every cycle.
//!
//! ## Key Invariants
//!
//! - `current_usage` decreases only by bytes the parent confirmed, per uuid
//! - Confirmed bytes are deducted before anything is collected again
//! - Users are never deleted locally; absence upstream disables them
//! - At most one cycle runs at a time

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod activation;
mod collector;
mod config;
mod error;
mod http;
mod lease;
mod ledger;
mod parent;
mod reset;
mod state;
mod status;
mod traffic;
mod users;

pub use activation::{
    activation_plan, Activator, CommandActivator, NoopActivator, RecordingActivator,
    DEFAULT_ACTIVATION_TIMEOUT,
};
pub use collector::collect_deltas;
pub use config::{
    load_config, parse_config, ActivationSection, ConfigError, ConfigFile, ParentSection,
    StoreSection, SyncConfig, SyncSection, DEFAULT_CONFIG_PATH,
};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpMethod, HttpParentApi, HttpRequest, HttpResponse, ReqwestClient, API_KEY_HEADER};
pub use lease::CycleLease;
pub use ledger::{ConfirmationLedger, LedgerEntry};
pub use parent::{MockParentApi, ParentApi};
pub use reset::{recover_pending, reset_confirmed};
pub use state::{CycleReport, SyncEngine, SyncState, SyncStats};
pub use status::{CycleCounters, Phase, StatusReport, StatusTotals};
pub use traffic::{push_deltas, TrafficOutcome};
pub use users::{reconcile_users, UserSyncOutcome};
