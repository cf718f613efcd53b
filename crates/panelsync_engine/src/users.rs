//! User record reconciliation (parent → child).
//!
//! The parent is authoritative for identity and policy fields. For every
//! parent user the local record is created or has its parent-owned fields
//! overwritten; local users the parent no longer lists are disabled, never
//! deleted. Child-owned counters are left alone. All changes of one cycle
//! are committed as a single batch.

use crate::error::SyncResult;
use panelsync_protocol::{AdminId, ParentUser, UserRecord};
use panelsync_store::{EnableFlag, UserStore, WriteBatch};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// Result of one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserSyncOutcome {
    /// Parent users processed.
    pub synced: usize,
    /// Uuids created locally, in parent order.
    pub created: Vec<Uuid>,
    /// Created uuids that are enabled and should be activated.
    pub to_activate: Vec<Uuid>,
    /// Existing users whose parent-owned fields changed.
    pub updated: usize,
    /// Users that went from enabled to disabled.
    pub blocked: usize,
    /// Users that went from disabled to enabled.
    pub unblocked: usize,
    /// Parent entries skipped because they could not be converted.
    pub skipped: usize,
    /// Rows the commit actually changed.
    pub changed: usize,
}

/// Reconciles the local user set against `parent_users`.
pub fn reconcile_users<S: UserStore + ?Sized>(
    store: &S,
    parent_users: &[ParentUser],
    owner: AdminId,
    default_max_ips: u32,
) -> SyncResult<UserSyncOutcome> {
    let local: BTreeMap<Uuid, EnableFlag> = store
        .enable_flags()?
        .into_iter()
        .map(|flag| (flag.uuid, flag))
        .collect();

    let mut outcome = UserSyncOutcome::default();
    let mut batch = WriteBatch::new();
    let mut replace_slots = Vec::new();
    let mut seen = HashSet::with_capacity(parent_users.len());

    for user in parent_users {
        if !seen.insert(user.uuid) {
            tracing::warn!(uuid = %user.uuid, "duplicate uuid in parent listing, ignoring repeat");
            continue;
        }
        let fields = match user.to_fields(owner) {
            Ok(fields) => fields,
            Err(e) => {
                tracing::warn!(uuid = %user.uuid, name = %user.name, error = %e, "skipping malformed parent user");
                outcome.skipped += 1;
                continue;
            }
        };

        match local.get(&user.uuid) {
            Some(flag) => {
                let was_enabled = flag.enable;
                if was_enabled && !fields.enable {
                    outcome.blocked += 1;
                    tracing::info!(uuid = %user.uuid, name = %user.name, "user blocked by parent");
                } else if !was_enabled && fields.enable {
                    outcome.unblocked += 1;
                    tracing::info!(uuid = %user.uuid, name = %user.name, "user unblocked by parent");
                }
                replace_slots.push(batch.len());
                batch.replace_fields(user.uuid, fields);
            }
            None => {
                let enabled = fields.enable;
                let mut record = UserRecord::from_parent(user.uuid, fields);
                record.max_ips = default_max_ips;
                batch.insert(record);
                outcome.created.push(user.uuid);
                if enabled {
                    outcome.to_activate.push(user.uuid);
                }
                tracing::info!(uuid = %user.uuid, name = %user.name, "user created");
            }
        }
        outcome.synced += 1;
    }

    for flag in local.values() {
        if flag.enable && !seen.contains(&flag.uuid) {
            batch.disable(flag.uuid);
            outcome.blocked += 1;
            tracing::info!(uuid = %flag.uuid, name = %flag.name, "user absent on parent, soft-blocked");
        }
    }

    let report = store.commit(batch)?;
    outcome.updated = replace_slots
        .iter()
        .filter(|slot| report.changed_at(**slot))
        .count();
    outcome.changed = report.changed();

    tracing::info!(
        synced = outcome.synced,
        created = outcome.created.len(),
        updated = outcome.updated,
        blocked = outcome.blocked,
        unblocked = outcome.unblocked,
        "users reconciled"
    );
    Ok(outcome)
}
