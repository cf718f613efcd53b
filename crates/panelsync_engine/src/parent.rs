//! Typed access to the parent panel.

use crate::error::{SyncError, SyncResult};
use panelsync_protocol::ParentUser;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// The parent's user API.
///
/// This trait abstracts the control plane so the engine can run against
/// the HTTP client or an in-memory double.
pub trait ParentApi: Send + Sync {
    /// Fetches the accumulated usage of one user in GB.
    ///
    /// Returns `Ok(None)` if the parent does not know the user.
    fn fetch_usage(&self, uuid: &Uuid) -> SyncResult<Option<f64>>;

    /// Overwrites the accumulated usage of one user in GB.
    fn update_usage(&self, uuid: &Uuid, total_gb: f64) -> SyncResult<()>;

    /// Enumerates every user on the parent.
    fn list_users(&self) -> SyncResult<Vec<ParentUser>>;
}

#[derive(Debug, Default)]
struct MockState {
    usage: BTreeMap<Uuid, f64>,
    users: Vec<ParentUser>,
    fail_fetch: BTreeSet<Uuid>,
    fail_update: BTreeSet<Uuid>,
    lose_ack: BTreeSet<Uuid>,
    fail_list: bool,
    updates: Vec<(Uuid, f64)>,
}

/// An in-memory parent for testing.
///
/// Usage totals live in a map; a missing entry behaves like a 404. Failures
/// can be injected per uuid.
#[derive(Debug, Default)]
pub struct MockParentApi {
    state: Mutex<MockState>,
}

impl MockParentApi {
    /// Creates an empty mock parent.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the accumulated usage of a user.
    pub fn set_usage(&self, uuid: Uuid, gb: f64) {
        self.state.lock().usage.insert(uuid, gb);
    }

    /// Returns the accumulated usage of a user, if known.
    pub fn usage(&self, uuid: &Uuid) -> Option<f64> {
        self.state.lock().usage.get(uuid).copied()
    }

    /// Replaces the enumerated user set.
    pub fn set_users(&self, users: Vec<ParentUser>) {
        self.state.lock().users = users;
    }

    /// Adds or replaces one enumerated user.
    pub fn upsert_user(&self, user: ParentUser) {
        let mut state = self.state.lock();
        match state.users.iter_mut().find(|u| u.uuid == user.uuid) {
            Some(existing) => *existing = user,
            None => state.users.push(user),
        }
    }

    /// Removes one enumerated user.
    pub fn remove_user(&self, uuid: &Uuid) {
        self.state.lock().users.retain(|u| u.uuid != *uuid);
    }

    /// Makes usage fetches for `uuid` fail.
    pub fn fail_fetch_for(&self, uuid: Uuid) {
        self.state.lock().fail_fetch.insert(uuid);
    }

    /// Makes usage updates for `uuid` fail without applying.
    pub fn fail_update_for(&self, uuid: Uuid) {
        self.state.lock().fail_update.insert(uuid);
    }

    /// Makes usage updates for `uuid` apply but report a timeout.
    pub fn lose_ack_for(&self, uuid: Uuid) {
        self.state.lock().lose_ack.insert(uuid);
    }

    /// Clears all injected per-uuid failures.
    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.fail_fetch.clear();
        state.fail_update.clear();
        state.lose_ack.clear();
        state.fail_list = false;
    }

    /// Makes the bulk enumeration fail.
    pub fn set_list_failure(&self, fail: bool) {
        self.state.lock().fail_list = fail;
    }

    /// Returns every update request received, in order.
    pub fn updates(&self) -> Vec<(Uuid, f64)> {
        self.state.lock().updates.clone()
    }
}

impl ParentApi for MockParentApi {
    fn fetch_usage(&self, uuid: &Uuid) -> SyncResult<Option<f64>> {
        let state = self.state.lock();
        if state.fail_fetch.contains(uuid) {
            return Err(SyncError::HttpStatus {
                status: 500,
                body: "injected fetch failure".into(),
            });
        }
        Ok(state.usage.get(uuid).copied())
    }

    fn update_usage(&self, uuid: &Uuid, total_gb: f64) -> SyncResult<()> {
        let mut state = self.state.lock();
        state.updates.push((*uuid, total_gb));
        if state.fail_update.contains(uuid) {
            return Err(SyncError::HttpStatus {
                status: 500,
                body: "injected update failure".into(),
            });
        }
        state.usage.insert(*uuid, total_gb);
        if state.lose_ack.contains(uuid) {
            return Err(SyncError::Timeout);
        }
        Ok(())
    }

    fn list_users(&self) -> SyncResult<Vec<ParentUser>> {
        let state = self.state.lock();
        if state.fail_list {
            return Err(SyncError::Transport("injected list failure".into()));
        }
        Ok(state.users.clone())
    }
}
