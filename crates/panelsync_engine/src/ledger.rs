//! Durable record of pushes the parent has confirmed.
//!
//! A push that the parent acknowledged is written here before the local
//! counter is touched. If the process dies, or the counter reset fails,
//! the next cycle finds the entry and deducts the bytes before collecting
//! again, so the same traffic is never reported twice.
//!
//! Each entry carries the record epoch it was collected at. The store
//! ignores a deduction whose epoch has already passed, so settling an
//! entry twice is harmless.

use crate::error::{SyncError, SyncResult};
use panelsync_protocol::UsageDelta;
use panelsync_store::write_atomic;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const LEDGER_VERSION: u16 = 1;

#[derive(Serialize, Deserialize)]
struct LedgerFile {
    version: u16,
    entries: Vec<LedgerEntry>,
}

/// Bytes confirmed by the parent but not yet settled locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// User identity.
    pub uuid: Uuid,
    /// Confirmed bytes.
    pub bytes: u64,
    /// `reset_epoch` of the record when the bytes were collected.
    #[serde(default)]
    pub epoch: u64,
}

impl LedgerEntry {
    /// Entry for a confirmed delta.
    pub fn for_delta(delta: &UsageDelta) -> Self {
        Self {
            uuid: delta.uuid,
            bytes: delta.bytes,
            epoch: delta.epoch,
        }
    }
}

/// Confirmed-but-unsettled pushes, persisted as CBOR.
#[derive(Debug)]
pub struct ConfirmationLedger {
    path: Option<PathBuf>,
    entries: BTreeMap<Uuid, LedgerEntry>,
}

impl ConfirmationLedger {
    /// Opens the ledger at `path`; a missing file is an empty ledger.
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let data = fs::read(&path)?;
            decode(&data)?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: Some(path),
            entries,
        })
    }

    /// Creates a ledger that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: BTreeMap::new(),
        }
    }

    /// Returns true if nothing is waiting to be settled.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the unsettled entries in uuid order.
    pub fn pending(&self) -> Vec<LedgerEntry> {
        self.entries.values().copied().collect()
    }

    /// Returns the unsettled bytes of one user.
    pub fn pending_for(&self, uuid: &Uuid) -> Option<u64> {
        self.entries.get(uuid).map(|entry| entry.bytes)
    }

    /// Durably records a confirmed push.
    ///
    /// A uuid holds at most one unsettled entry. If the write fails the
    /// entry is not kept in memory either.
    pub fn record(&mut self, entry: LedgerEntry) -> SyncResult<()> {
        if self.entries.contains_key(&entry.uuid) {
            return Err(SyncError::Ledger(format!(
                "unsettled confirmation already recorded for {}",
                entry.uuid
            )));
        }
        self.entries.insert(entry.uuid, entry);
        if let Err(e) = self.persist() {
            self.entries.remove(&entry.uuid);
            return Err(e);
        }
        Ok(())
    }

    /// Removes entries whose deduction has been committed.
    pub fn settle(&mut self, uuids: impl IntoIterator<Item = Uuid>) -> SyncResult<()> {
        let before = self.entries.len();
        for uuid in uuids {
            self.entries.remove(&uuid);
        }
        if self.entries.len() == before {
            return Ok(());
        }
        self.persist()
    }

    fn persist(&self) -> SyncResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }

        let file = LedgerFile {
            version: LEDGER_VERSION,
            entries: self.pending(),
        };
        let mut data = Vec::new();
        ciborium::into_writer(&file, &mut data).map_err(|e| SyncError::Ledger(e.to_string()))?;
        write_atomic(path, &data)?;
        Ok(())
    }
}

fn decode(data: &[u8]) -> SyncResult<BTreeMap<Uuid, LedgerEntry>> {
    if data.is_empty() {
        return Ok(BTreeMap::new());
    }
    let file: LedgerFile =
        ciborium::from_reader(data).map_err(|e| SyncError::Ledger(e.to_string()))?;
    if file.version != LEDGER_VERSION {
        return Err(SyncError::Ledger(format!(
            "unsupported ledger version {}",
            file.version
        )));
    }

    let mut entries = BTreeMap::new();
    for entry in file.entries {
        if entries.insert(entry.uuid, entry).is_some() {
            return Err(SyncError::Ledger(format!(
                "duplicate ledger entry for {}",
                entry.uuid
            )));
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(uuid: Uuid, bytes: u64) -> LedgerEntry {
        LedgerEntry {
            uuid,
            bytes,
            epoch: 3,
        }
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state/confirmed.cbor");
        let uuid = Uuid::new_v4();

        {
            let mut ledger = ConfirmationLedger::open(&path).unwrap();
            assert!(ledger.is_empty());
            ledger.record(entry(uuid, 1_500_000)).unwrap();
        }

        let ledger = ConfirmationLedger::open(&path).unwrap();
        assert_eq!(ledger.pending(), vec![entry(uuid, 1_500_000)]);
    }

    #[test]
    fn one_unsettled_entry_per_uuid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("confirmed.cbor");
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let mut ledger = ConfirmationLedger::open(&path).unwrap();
        ledger.record(entry(a, 10)).unwrap();
        assert!(matches!(
            ledger.record(entry(a, 5)),
            Err(SyncError::Ledger(_))
        ));
        ledger.record(entry(b, 7)).unwrap();
        assert_eq!(ledger.pending_for(&a), Some(10));

        ledger.settle([a]).unwrap();
        let reopened = ConfirmationLedger::open(&path).unwrap();
        assert_eq!(reopened.pending_for(&a), None);
        assert_eq!(reopened.pending_for(&b), Some(7));
    }

    #[test]
    fn failed_write_is_not_kept_in_memory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("confirmed.cbor");
        fs::create_dir(dir.path().join("confirmed.cbor.tmp")).unwrap();
        let uuid = Uuid::new_v4();

        let mut ledger = ConfirmationLedger::open(&path).unwrap();
        assert!(ledger.record(entry(uuid, 10)).is_err());
        assert!(ledger.is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn corrupt_ledger_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("confirmed.cbor");
        fs::write(&path, b"not cbor at all").unwrap();
        assert!(matches!(
            ConfirmationLedger::open(&path),
            Err(SyncError::Ledger(_))
        ));
    }

    #[test]
    fn in_memory_ledger_never_touches_disk() {
        let mut ledger = ConfirmationLedger::in_memory();
        ledger.record(entry(Uuid::nil(), 1)).unwrap();
        assert!(!ledger.is_empty());
        ledger.settle([Uuid::nil()]).unwrap();
        assert!(ledger.is_empty());
    }
}
