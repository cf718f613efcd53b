//! Usage deltas reported to the parent.

use crate::units::{bytes_to_gb, round_gb};
use crate::user::UserRecord;
use chrono::NaiveDateTime;
use uuid::Uuid;

/// Locally observed usage that has not yet been merged into the parent.
///
/// A delta lives for one cycle only. `bytes` is the exact counter value that
/// was read, so a confirmed push can later be subtracted from the local
/// counter without touching usage that accrued afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageDelta {
    /// User identity.
    pub uuid: Uuid,
    /// Display name, for diagnostics only.
    pub name: String,
    /// Counter value at collection time.
    pub bytes: u64,
    /// The same amount in GB, rounded to the parent's precision.
    pub amount_gb: f64,
    /// Snapshot of `last_online` at collection time.
    pub last_online: Option<NaiveDateTime>,
    /// The record's `reset_epoch` at collection time.
    pub epoch: u64,
}

impl UsageDelta {
    /// Builds a delta from a record, or `None` if the converted amount does
    /// not exceed `min_gb`.
    pub fn from_record(record: &UserRecord, min_gb: f64) -> Option<Self> {
        let amount_gb = round_gb(bytes_to_gb(record.current_usage));
        if amount_gb <= min_gb {
            return None;
        }
        Some(Self {
            uuid: record.uuid,
            name: record.fields.name.clone(),
            bytes: record.current_usage,
            amount_gb,
            last_online: record.last_online,
            epoch: record.reset_epoch,
        })
    }
}
