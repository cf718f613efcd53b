//! # PanelSync Testkit
//!
//! Test utilities for PanelSync.
//!
//! This crate provides:
//! - Record and listing fixtures
//! - A restartable engine harness over in-memory doubles
//! - Property-based test generators using proptest
//! - Crash models for the traffic reset
//!
//! ## Usage
//!
//! ```rust,ignore
//! use panelsync_testkit::prelude::*;
//!
//! #[test]
//! fn new_user_is_created() {
//!     let node = TestNode::new();
//!     node.parent().set_users(vec![parent_user("alice")]);
//!     assert_eq!(node.cycle().counters.created, 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
