//! File-backed user store.
//!
//! All records live in one CBOR snapshot:
//!
//! ```text
//! <dir>/
//! ├─ users.cbor        # Snapshot { version, users }
//! └─ users.cbor.lock   # Advisory lock shared with other processes
//! ```
//!
//! Reads take a shared lock and reload the snapshot. Commits take an
//! exclusive lock, reload, apply the batch and rewrite the snapshot
//! atomically, so a concurrent writer's changes are never lost.

use crate::batch::{CommitReport, WriteBatch};
use crate::durable::write_atomic;
use crate::error::{StoreError, StoreResult};
use crate::traits::{EnableFlag, UserStore};
use chrono::NaiveDateTime;
use fs2::FileExt;
use panelsync_protocol::UserRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Snapshot format version.
const SNAPSHOT_VERSION: u16 = 1;

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u16,
    users: Vec<UserRecord>,
}

/// A user store persisted to a single CBOR file.
#[derive(Debug)]
pub struct FileUserStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileUserStore {
    /// Opens the store at `path`, creating an empty snapshot if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created or an
    /// existing snapshot cannot be decoded.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }

        let mut lock_name = path
            .file_name()
            .map(OsString::from)
            .ok_or_else(|| StoreError::Unavailable(format!("not a file path: {}", path.display())))?;
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);

        let store = Self { path, lock_path };
        {
            let lock = store.lock_file()?;
            lock.lock_exclusive()?;
            if !store.path.exists() {
                store.save(&BTreeMap::new())?;
                tracing::info!(path = %store.path.display(), "created empty user store");
            } else {
                store.load()?;
            }
        }
        Ok(store)
    }

    /// Returns the snapshot path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records observed traffic for a user, as the traffic layer does.
    pub fn record_usage(&self, uuid: Uuid, bytes: u64, at: NaiveDateTime) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.record_usage(uuid, bytes, at);
        self.commit(batch).map(|_| ())
    }

    /// Returns every record in uuid order.
    pub fn records(&self) -> StoreResult<Vec<UserRecord>> {
        Ok(self.read()?.into_values().collect())
    }

    fn lock_file(&self) -> StoreResult<File> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)?)
    }

    fn read(&self) -> StoreResult<BTreeMap<Uuid, UserRecord>> {
        let lock = self.lock_file()?;
        lock.lock_shared()?;
        self.load()
    }

    fn load(&self) -> StoreResult<BTreeMap<Uuid, UserRecord>> {
        let data = fs::read(&self.path)?;
        if data.is_empty() {
            return Ok(BTreeMap::new());
        }

        let snapshot: Snapshot =
            ciborium::from_reader(data.as_slice()).map_err(|e| StoreError::Decode(e.to_string()))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::UnsupportedVersion(snapshot.version));
        }
        Ok(snapshot
            .users
            .into_iter()
            .map(|record| (record.uuid, record))
            .collect())
    }

    fn save(&self, records: &BTreeMap<Uuid, UserRecord>) -> StoreResult<()> {
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            users: records.values().cloned().collect(),
        };
        let mut data = Vec::new();
        ciborium::into_writer(&snapshot, &mut data).map_err(|e| StoreError::Encode(e.to_string()))?;
        write_atomic(&self.path, &data)?;
        Ok(())
    }
}

impl UserStore for FileUserStore {
    fn users_above_usage(&self, threshold: u64) -> StoreResult<Vec<UserRecord>> {
        Ok(self
            .read()?
            .into_values()
            .filter(|r| r.current_usage > threshold)
            .collect())
    }

    fn user(&self, uuid: &Uuid) -> StoreResult<Option<UserRecord>> {
        Ok(self.read()?.remove(uuid))
    }

    fn enable_flags(&self) -> StoreResult<Vec<EnableFlag>> {
        Ok(self
            .read()?
            .into_values()
            .map(|r| EnableFlag {
                uuid: r.uuid,
                name: r.fields.name,
                enable: r.fields.enable,
            })
            .collect())
    }

    fn commit(&self, batch: WriteBatch) -> StoreResult<CommitReport> {
        if batch.is_empty() {
            return Ok(CommitReport::default());
        }

        let lock = self.lock_file()?;
        lock.lock_exclusive()?;

        let mut records = self.load()?;
        let report = batch.apply(&mut records)?;
        self.save(&records)?;

        tracing::debug!(
            mutations = batch.len(),
            changed = report.changed(),
            "committed user batch"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use panelsync_protocol::{AdminId, ParentFields, UserMode};
    use tempfile::tempdir;

    fn record(name: &str, usage: u64) -> UserRecord {
        let mut record = UserRecord::from_parent(
            Uuid::new_v4(),
            ParentFields {
                name: name.into(),
                usage_limit: 10 * 1024 * 1024 * 1024,
                package_days: 30,
                mode: UserMode::NoReset,
                enable: true,
                comment: "vip".into(),
                start_date: NaiveDate::from_ymd_opt(2025, 1, 1),
                last_reset_time: None,
                telegram_id: Some(4242),
                ed25519_private_key: "priv".into(),
                ed25519_public_key: "pub".into(),
                wg_pk: "wgpk".into(),
                wg_psk: "wgpsk".into(),
                wg_pub: "wgpub".into(),
                added_by: AdminId::default(),
            },
        );
        record.current_usage = usage;
        record
    }

    #[test]
    fn open_creates_empty_store() {
        let dir = tempdir().unwrap();
        let store = FileUserStore::open(dir.path().join("data/users.cbor")).unwrap();
        assert!(store.path().exists());
        assert!(store.records().unwrap().is_empty());
    }

    #[test]
    fn commits_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.cbor");
        let alice = record("alice", 2_000_000);
        let uuid = alice.uuid;

        {
            let store = FileUserStore::open(&path).unwrap();
            let mut batch = WriteBatch::new();
            batch.insert(alice.clone());
            store.commit(batch).unwrap();
        }

        let store = FileUserStore::open(&path).unwrap();
        assert_eq!(store.user(&uuid).unwrap(), Some(alice));
        assert_eq!(store.users_above_usage(1_000_000).unwrap().len(), 1);
    }

    #[test]
    fn two_handles_see_each_others_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.cbor");
        let bob = record("bob", 500);
        let uuid = bob.uuid;

        let engine_side = FileUserStore::open(&path).unwrap();
        let traffic_side = FileUserStore::open(&path).unwrap();

        let mut batch = WriteBatch::new();
        batch.insert(bob);
        engine_side.commit(batch).unwrap();

        let at = NaiveDate::from_ymd_opt(2025, 2, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        traffic_side.record_usage(uuid, 700, at).unwrap();

        let mut deduct = WriteBatch::new();
        deduct.deduct_usage(uuid, 500, 0);
        engine_side.commit(deduct).unwrap();

        let stored = traffic_side.user(&uuid).unwrap().unwrap();
        assert_eq!(stored.current_usage, 700);
        assert_eq!(stored.last_online, Some(at));
    }

    #[test]
    fn failed_batch_does_not_touch_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.cbor");
        let store = FileUserStore::open(&path).unwrap();
        let carol = record("carol", 1);
        let mut batch = WriteBatch::new();
        batch.insert(carol.clone());
        store.commit(batch).unwrap();
        let before = fs::read(&path).unwrap();

        let mut bad = WriteBatch::new();
        bad.disable(carol.uuid);
        bad.insert(carol);
        assert!(matches!(store.commit(bad), Err(StoreError::DuplicateUser(_))));
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn garbage_snapshot_is_a_decode_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.cbor");
        fs::write(&path, [0xff, 0x00, 0x13]).unwrap();
        assert!(matches!(
            FileUserStore::open(&path),
            Err(StoreError::Decode(_))
        ));
    }

    #[test]
    fn enable_flags_cover_all_users() {
        let dir = tempdir().unwrap();
        let store = FileUserStore::open(dir.path().join("users.cbor")).unwrap();
        let mut disabled = record("dan", 0);
        disabled.fields.enable = false;
        let enabled = record("erin", 0);

        let mut batch = WriteBatch::new();
        batch.insert(disabled.clone());
        batch.insert(enabled.clone());
        store.commit(batch).unwrap();

        let flags = store.enable_flags().unwrap();
        assert_eq!(flags.len(), 2);
        assert!(flags
            .iter()
            .any(|f| f.uuid == disabled.uuid && !f.enable && f.name == "dan"));
        assert!(flags.iter().any(|f| f.uuid == enabled.uuid && f.enable));
    }
}
