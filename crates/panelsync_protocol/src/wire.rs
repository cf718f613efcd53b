//! JSON payloads exchanged with the parent panel.
//!
//! The parent is loosely typed (`enable` arrives as a boolean or an integer,
//! optional strings arrive as `null`). Everything is normalised here so the
//! reconciliation code only ever sees [`ParentFields`].

use crate::error::ProtocolResult;
use crate::units::gb_to_bytes;
use crate::user::{AdminId, ParentFields, UserMode};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// A user as enumerated by `GET /user/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentUser {
    /// Stable identity.
    pub uuid: Uuid,
    /// Display name.
    pub name: String,
    /// Allowance in GB.
    #[serde(rename = "usage_limit_GB")]
    pub usage_limit_gb: f64,
    /// Package length in days.
    pub package_days: u32,
    /// Reset mode.
    pub mode: UserMode,
    /// Whether the user may connect.
    #[serde(deserialize_with = "deserialize_flag")]
    pub enable: bool,
    /// Admin comment.
    #[serde(default)]
    pub comment: Option<String>,
    /// First day of the package.
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    /// Last reset day.
    #[serde(default)]
    pub last_reset_time: Option<NaiveDate>,
    /// Linked Telegram account.
    #[serde(default)]
    pub telegram_id: Option<i64>,
    /// Ed25519 private key.
    #[serde(default)]
    pub ed25519_private_key: Option<String>,
    /// Ed25519 public key.
    #[serde(default)]
    pub ed25519_public_key: Option<String>,
    /// WireGuard private key.
    #[serde(default)]
    pub wg_pk: Option<String>,
    /// WireGuard pre-shared key.
    #[serde(default)]
    pub wg_psk: Option<String>,
    /// WireGuard public key.
    #[serde(default)]
    pub wg_pub: Option<String>,
}

impl ParentUser {
    /// Converts the payload into local parent-owned fields.
    ///
    /// The allowance is converted from GB to bytes here and nowhere else.
    pub fn to_fields(&self, owner: AdminId) -> ProtocolResult<ParentFields> {
        Ok(ParentFields {
            name: self.name.clone(),
            usage_limit: gb_to_bytes("usage_limit_GB", self.usage_limit_gb)?,
            package_days: self.package_days,
            mode: self.mode,
            enable: self.enable,
            comment: self.comment.clone().unwrap_or_default(),
            start_date: self.start_date,
            last_reset_time: self.last_reset_time,
            telegram_id: self.telegram_id,
            ed25519_private_key: self.ed25519_private_key.clone().unwrap_or_default(),
            ed25519_public_key: self.ed25519_public_key.clone().unwrap_or_default(),
            wg_pk: self.wg_pk.clone().unwrap_or_default(),
            wg_psk: self.wg_psk.clone().unwrap_or_default(),
            wg_pub: self.wg_pub.clone().unwrap_or_default(),
            added_by: owner,
        })
    }
}

/// Response body of `GET /user/{uuid}/`; only the usage figure is read.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageResponse {
    /// Accumulated usage on the parent in GB.
    #[serde(rename = "current_usage_GB", default)]
    pub current_usage_gb: f64,
}

/// Request body of `PATCH /user/{uuid}/`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageUpdate {
    /// New accumulated usage in GB.
    #[serde(rename = "current_usage_GB")]
    pub current_usage_gb: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Int(i64),
}

fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(i) => i != 0,
    })
}
