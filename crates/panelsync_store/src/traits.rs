//! The user store abstraction.

use crate::batch::{CommitReport, WriteBatch};
use crate::error::StoreResult;
use panelsync_protocol::UserRecord;
use uuid::Uuid;

/// Identity and enable state of a local user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnableFlag {
    /// User identity.
    pub uuid: Uuid,
    /// Display name.
    pub name: String,
    /// Current enable flag.
    pub enable: bool,
}

/// Transactional access to local user records.
///
/// This trait abstracts the child's user table so the engine can run against
/// a relational adapter, the file store, or an in-memory double.
pub trait UserStore: Send + Sync {
    /// Returns every user whose `current_usage` is strictly greater than
    /// `threshold` bytes, in ascending uuid order.
    fn users_above_usage(&self, threshold: u64) -> StoreResult<Vec<UserRecord>>;

    /// Returns one user by uuid.
    fn user(&self, uuid: &Uuid) -> StoreResult<Option<UserRecord>>;

    /// Returns uuid, name and enable flag of every user.
    fn enable_flags(&self) -> StoreResult<Vec<EnableFlag>>;

    /// Commits a batch atomically.
    fn commit(&self, batch: WriteBatch) -> StoreResult<CommitReport>;
}
