//! In-memory user store.

use crate::batch::{CommitReport, WriteBatch};
use crate::error::{StoreError, StoreResult};
use crate::traits::{EnableFlag, UserStore};
use chrono::NaiveDateTime;
use panelsync_protocol::UserRecord;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use uuid::Uuid;

/// An in-memory user store.
///
/// Supports fault injection so connectivity and commit failures can be
/// exercised without a real database.
#[derive(Debug)]
pub struct MemoryUserStore {
    records: RwLock<BTreeMap<Uuid, UserRecord>>,
    available: AtomicBool,
    failing_commits: AtomicU32,
    commits: AtomicU64,
}

impl MemoryUserStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
            failing_commits: AtomicU32::new(0),
            commits: AtomicU64::new(0),
        }
    }

    /// Creates a store seeded with `records`.
    pub fn with_records(records: impl IntoIterator<Item = UserRecord>) -> Self {
        let store = Self::new();
        {
            let mut map = store.records.write();
            for record in records {
                map.insert(record.uuid, record);
            }
        }
        store
    }

    /// Inserts or replaces a record directly, bypassing batches.
    pub fn put(&self, record: UserRecord) {
        self.records.write().insert(record.uuid, record);
    }

    /// Simulates the traffic layer recording usage for a user.
    pub fn record_usage(&self, uuid: Uuid, bytes: u64, at: NaiveDateTime) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.record_usage(uuid, bytes, at);
        self.commit(batch).map(|_| ())
    }

    /// Returns a copy of one record.
    pub fn get(&self, uuid: &Uuid) -> Option<UserRecord> {
        self.records.read().get(uuid).cloned()
    }

    /// Returns copies of all records in uuid order.
    pub fn records(&self) -> Vec<UserRecord> {
        self.records.read().values().cloned().collect()
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Number of non-empty batches committed so far.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Makes every operation fail with [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Makes the next `count` commits fail.
    pub fn fail_next_commits(&self, count: u32) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".into()))
        }
    }
}

impl Default for MemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

impl UserStore for MemoryUserStore {
    fn users_above_usage(&self, threshold: u64) -> StoreResult<Vec<UserRecord>> {
        self.check_available()?;
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| r.current_usage > threshold)
            .cloned()
            .collect())
    }

    fn user(&self, uuid: &Uuid) -> StoreResult<Option<UserRecord>> {
        self.check_available()?;
        Ok(self.get(uuid))
    }

    fn enable_flags(&self) -> StoreResult<Vec<EnableFlag>> {
        self.check_available()?;
        Ok(self
            .records
            .read()
            .values()
            .map(|r| EnableFlag {
                uuid: r.uuid,
                name: r.fields.name.clone(),
                enable: r.fields.enable,
            })
            .collect())
    }

    fn commit(&self, batch: WriteBatch) -> StoreResult<CommitReport> {
        self.check_available()?;
        if self
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Unavailable("injected commit failure".into()));
        }

        let report = batch.apply(&mut self.records.write())?;
        if !batch.is_empty() {
            self.commits.fetch_add(1, Ordering::SeqCst);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use panelsync_protocol::{AdminId, ParentFields, UserMode};

    fn record(usage: u64) -> UserRecord {
        let mut record = UserRecord::from_parent(
            Uuid::new_v4(),
            ParentFields {
                name: "dave".into(),
                usage_limit: 0,
                package_days: 30,
                mode: UserMode::Weekly,
                enable: true,
                comment: String::new(),
                start_date: None,
                last_reset_time: None,
                telegram_id: None,
                ed25519_private_key: String::new(),
                ed25519_public_key: String::new(),
                wg_pk: String::new(),
                wg_psk: String::new(),
                wg_pub: String::new(),
                added_by: AdminId::default(),
            },
        );
        record.current_usage = usage;
        record
    }

    #[test]
    fn threshold_query_is_strict() {
        let store = MemoryUserStore::with_records([record(999), record(1000), record(1001)]);
        let above = store.users_above_usage(1000).unwrap();
        assert_eq!(above.len(), 1);
        assert_eq!(above[0].current_usage, 1001);
    }

    #[test]
    fn unavailable_store_fails_everything() {
        let store = MemoryUserStore::with_records([record(5)]);
        store.set_available(false);
        assert!(store.users_above_usage(0).is_err());
        assert!(store.enable_flags().is_err());
        assert!(store.commit(WriteBatch::new()).is_err());

        store.set_available(true);
        assert_eq!(store.enable_flags().unwrap().len(), 1);
    }

    #[test]
    fn injected_commit_failures_are_consumed() {
        let r = record(50);
        let uuid = r.uuid;
        let store = MemoryUserStore::with_records([r]);
        store.fail_next_commits(1);

        let mut batch = WriteBatch::new();
        batch.deduct_usage(uuid, 50, 0);
        assert!(store.commit(batch.clone()).is_err());
        assert_eq!(store.get(&uuid).unwrap().current_usage, 50);

        store.commit(batch).unwrap();
        assert_eq!(store.get(&uuid).unwrap().current_usage, 0);
        assert_eq!(store.commit_count(), 1);
    }

    #[test]
    fn record_usage_helper() {
        let r = record(0);
        let uuid = r.uuid;
        let store = MemoryUserStore::with_records([r]);
        let at = NaiveDate::from_ymd_opt(2025, 6, 1)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        store.record_usage(uuid, 2048, at).unwrap();
        let stored = store.get(&uuid).unwrap();
        assert_eq!(stored.current_usage, 2048);
        assert_eq!(stored.last_online, Some(at));
    }
}
