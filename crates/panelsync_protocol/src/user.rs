//! Local user records.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Concurrent IP limit given to every user created from the parent.
pub const DEFAULT_MAX_IPS: u32 = 1000;

/// Identifier of the local administrator that owns synced users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdminId(pub u32);

impl Default for AdminId {
    fn default() -> Self {
        Self(1)
    }
}

impl fmt::Display for AdminId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Package reset mode of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserMode {
    /// Usage is never reset automatically.
    NoReset,
    /// Usage resets every month.
    Monthly,
    /// Usage resets every week.
    Weekly,
    /// Usage resets every day.
    Daily,
}

impl UserMode {
    /// Returns the wire name of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            UserMode::NoReset => "no_reset",
            UserMode::Monthly => "monthly",
            UserMode::Weekly => "weekly",
            UserMode::Daily => "daily",
        }
    }
}

impl fmt::Display for UserMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields owned by the parent panel.
///
/// These are overwritten on the child every cycle and never pushed back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentFields {
    /// Display name.
    pub name: String,
    /// Traffic allowance in bytes.
    pub usage_limit: u64,
    /// Package length in days.
    pub package_days: u32,
    /// Reset mode.
    pub mode: UserMode,
    /// Whether the user may connect.
    pub enable: bool,
    /// Free-form admin comment.
    pub comment: String,
    /// First day of the current package.
    pub start_date: Option<NaiveDate>,
    /// Day usage was last reset on the parent.
    pub last_reset_time: Option<NaiveDate>,
    /// Linked Telegram account.
    pub telegram_id: Option<i64>,
    /// Ed25519 private key.
    pub ed25519_private_key: String,
    /// Ed25519 public key.
    pub ed25519_public_key: String,
    /// WireGuard private key.
    pub wg_pk: String,
    /// WireGuard pre-shared key.
    pub wg_psk: String,
    /// WireGuard public key.
    pub wg_pub: String,
    /// Local administrator the user is attributed to.
    pub added_by: AdminId,
}

/// A user record as held by the child's store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Stable identity shared with the parent.
    pub uuid: Uuid,
    /// Parent-owned fields.
    pub fields: ParentFields,
    /// Bytes used since the last confirmed report to the parent.
    pub current_usage: u64,
    /// Last time the traffic layer saw this user online.
    pub last_online: Option<NaiveDateTime>,
    /// Concurrent IP limit, set once at creation.
    pub max_ips: u32,
    /// Number of confirmed deductions applied to `current_usage`.
    ///
    /// A deduction names the epoch it was collected at and is applied only
    /// while the record is still at that epoch.
    #[serde(default)]
    pub reset_epoch: u64,
}

impl UserRecord {
    /// Creates a fresh record from parent-owned fields.
    ///
    /// Child-owned counters start empty and `max_ips` takes its default.
    pub fn from_parent(uuid: Uuid, fields: ParentFields) -> Self {
        Self {
            uuid,
            fields,
            current_usage: 0,
            last_online: None,
            max_ips: DEFAULT_MAX_IPS,
            reset_epoch: 0,
        }
    }

    /// Returns the display name.
    pub fn name(&self) -> &str {
        &self.fields.name
    }

    /// Returns true if the user is enabled.
    pub fn is_enabled(&self) -> bool {
        self.fields.enable
    }
}
