//! Local counter reset, gated per uuid on confirmed pushes.
//!
//! This is the only place `current_usage` decreases. Each confirmed uuid
//! has exactly the bytes the parent accepted subtracted, so traffic that
//! accrued after collection stays for the next cycle.
//!
//! The store commit and the ledger settle are separate writes. A deduction
//! names the record epoch it was collected at, so replaying an entry whose
//! deduction already committed changes nothing.

use crate::error::SyncResult;
use crate::ledger::{ConfirmationLedger, LedgerEntry};
use panelsync_store::{UserStore, WriteBatch};

/// Deducts `confirmed` from the local counters in one transaction, then
/// settles those entries in the ledger.
///
/// Returns the number of counters that changed. If the commit fails
/// nothing is deducted. If the settle fails the deduction stays committed
/// and the ledger keeps the entries; applying them again is a no-op.
pub fn reset_confirmed<S: UserStore + ?Sized>(
    store: &S,
    ledger: &mut ConfirmationLedger,
    confirmed: &[LedgerEntry],
) -> SyncResult<usize> {
    if confirmed.is_empty() {
        return Ok(0);
    }

    let mut batch = WriteBatch::new();
    for entry in confirmed {
        batch.deduct_usage(entry.uuid, entry.bytes, entry.epoch);
    }
    let report = store.commit(batch)?;

    for (entry, changed) in confirmed.iter().zip(report.outcomes()) {
        if *changed {
            tracing::debug!(uuid = %entry.uuid, bytes = entry.bytes, "local counter reduced");
        } else {
            tracing::warn!(uuid = %entry.uuid, "counter already settled, zero or missing");
        }
    }

    ledger.settle(confirmed.iter().map(|entry| entry.uuid))?;
    tracing::info!(reset = report.changed(), "local traffic counters reset");
    Ok(report.changed())
}

/// Applies every unsettled ledger entry left by an earlier cycle.
pub fn recover_pending<S: UserStore + ?Sized>(
    store: &S,
    ledger: &mut ConfirmationLedger,
) -> SyncResult<usize> {
    let pending = ledger.pending();
    if pending.is_empty() {
        return Ok(0);
    }
    tracing::warn!(
        entries = pending.len(),
        "applying confirmed pushes left unsettled by an earlier cycle"
    );
    reset_confirmed(store, ledger, &pending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use panelsync_protocol::{AdminId, ParentFields, UserMode, UserRecord};
    use panelsync_store::MemoryUserStore;
    use std::fs;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn record(usage: u64) -> UserRecord {
        let mut record = UserRecord::from_parent(
            Uuid::new_v4(),
            ParentFields {
                name: "frank".into(),
                usage_limit: 0,
                package_days: 7,
                mode: UserMode::Daily,
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

    fn entry(record: &UserRecord) -> LedgerEntry {
        LedgerEntry {
            uuid: record.uuid,
            bytes: record.current_usage,
            epoch: record.reset_epoch,
        }
    }

    #[test]
    fn only_confirmed_uuids_are_reset() {
        let confirmed = record(2_000_000);
        let unconfirmed = record(3_000_000);
        let store = MemoryUserStore::with_records([confirmed.clone(), unconfirmed.clone()]);
        let mut ledger = ConfirmationLedger::in_memory();
        ledger.record(entry(&confirmed)).unwrap();

        let entries = ledger.pending();
        let reset = reset_confirmed(&store, &mut ledger, &entries).unwrap();

        assert_eq!(reset, 1);
        assert_eq!(store.get(&confirmed.uuid).unwrap().current_usage, 0);
        assert_eq!(store.get(&unconfirmed.uuid).unwrap().current_usage, 3_000_000);
        assert!(ledger.is_empty());
    }

    #[test]
    fn accrual_after_collection_survives() {
        let r = record(2_000_000);
        let store = MemoryUserStore::with_records([r.clone()]);
        let at = chrono::Utc::now().naive_utc();
        store.record_usage(r.uuid, 40_000, at).unwrap();

        reset_confirmed(&store, &mut ConfirmationLedger::in_memory(), &[entry(&r)]).unwrap();

        assert_eq!(store.get(&r.uuid).unwrap().current_usage, 40_000);
    }

    #[test]
    fn failed_commit_keeps_ledger_entries() {
        let r = record(2_000_000);
        let store = MemoryUserStore::with_records([r.clone()]);
        let mut ledger = ConfirmationLedger::in_memory();
        ledger.record(entry(&r)).unwrap();
        store.fail_next_commits(1);

        let entries = ledger.pending();
        assert!(reset_confirmed(&store, &mut ledger, &entries).is_err());
        assert_eq!(ledger.pending_for(&r.uuid), Some(2_000_000));
        assert_eq!(store.get(&r.uuid).unwrap().current_usage, 2_000_000);

        assert_eq!(recover_pending(&store, &mut ledger).unwrap(), 1);
        assert!(ledger.is_empty());
        assert_eq!(store.get(&r.uuid).unwrap().current_usage, 0);
    }

    #[test]
    fn failed_settle_does_not_deduct_twice() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("confirmed.cbor");
        let blocker = dir.path().join("confirmed.cbor.tmp");
        let r = record(5_000_000);
        let store = MemoryUserStore::with_records([r.clone()]);
        let mut ledger = ConfirmationLedger::open(&path).unwrap();
        ledger.record(entry(&r)).unwrap();

        fs::create_dir(&blocker).unwrap();
        let entries = ledger.pending();
        assert!(reset_confirmed(&store, &mut ledger, &entries).is_err());
        assert_eq!(store.get(&r.uuid).unwrap().current_usage, 0);
        fs::remove_dir(&blocker).unwrap();

        let at = chrono::Utc::now().naive_utc();
        store.record_usage(r.uuid, 3_000_000, at).unwrap();

        let mut reopened = ConfirmationLedger::open(&path).unwrap();
        assert_eq!(reopened.pending_for(&r.uuid), Some(5_000_000));
        assert_eq!(recover_pending(&store, &mut reopened).unwrap(), 0);
        assert!(reopened.is_empty());
        assert!(ConfirmationLedger::open(&path).unwrap().is_empty());
        assert_eq!(store.get(&r.uuid).unwrap().current_usage, 3_000_000);
    }

    #[test]
    fn nothing_pending_is_a_no_op() {
        let store = MemoryUserStore::new();
        assert_eq!(
            recover_pending(&store, &mut ConfirmationLedger::in_memory()).unwrap(),
            0
        );
        assert_eq!(store.commit_count(), 0);
    }
}
