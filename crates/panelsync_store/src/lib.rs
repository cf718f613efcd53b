//! # PanelSync Store
//!
//! Transactional user record store for PanelSync.
//!
//! This crate provides:
//! - The `UserStore` trait consumed by the sync engine
//! - `WriteBatch` mutations evaluated against the state at commit time
//! - `MemoryUserStore`, an in-memory store with fault injection
//! - `FileUserStore`, a single-file CBOR store safe for multiple processes
//!
//! ## Key Invariants
//!
//! - Records are keyed by uuid and are never deleted
//! - A batch is applied completely or not at all
//! - `current_usage` only decreases through `Mutation::DeductUsage`

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod durable;
mod error;
mod file;
mod memory;
mod traits;

pub use batch::{CommitReport, Mutation, WriteBatch};
pub use durable::write_atomic;
pub use error::{StoreError, StoreResult};
pub use file::FileUserStore;
pub use memory::MemoryUserStore;
pub use traits::{EnableFlag, UserStore};
