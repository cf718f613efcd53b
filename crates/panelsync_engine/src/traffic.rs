//! Accumulative traffic push.
//!
//! Each delta is merged independently: read the parent's running total,
//! add the delta, write the sum back. Only a push the parent acknowledged
//! makes the uuid eligible for a local counter reset.

use crate::error::SyncError;
use crate::ledger::{ConfirmationLedger, LedgerEntry};
use crate::parent::ParentApi;
use panelsync_protocol::UsageDelta;
use uuid::Uuid;

/// Tolerance when checking whether an unacknowledged write landed.
const VERIFY_EPSILON: f64 = 1e-9;

/// Result of pushing one cycle's deltas.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrafficOutcome {
    /// Number of deltas attempted.
    pub attempted: usize,
    /// Pushes the parent confirmed, with the bytes they covered.
    pub confirmed: Vec<LedgerEntry>,
    /// Uuids skipped or rejected this cycle.
    pub failed: Vec<Uuid>,
    /// Confirmed pushes whose ledger write failed. Their reset still runs
    /// this cycle but would not survive a crash before it.
    pub unrecorded: usize,
}

impl TrafficOutcome {
    /// Returns true if every delta was confirmed.
    pub fn all_succeeded(&self) -> bool {
        self.confirmed.len() == self.attempted
    }

    /// Number of confirmed pushes.
    pub fn success_count(&self) -> usize {
        self.confirmed.len()
    }

    /// Returns true if `uuid` was confirmed.
    pub fn is_confirmed(&self, uuid: &Uuid) -> bool {
        self.confirmed.iter().any(|entry| entry.uuid == *uuid)
    }
}

/// Pushes every delta and records confirmations in `ledger`.
///
/// Never fails as a whole; per-uuid errors are logged and the uuid is left
/// for the next cycle.
pub fn push_deltas<P: ParentApi + ?Sized>(
    parent: &P,
    ledger: &mut ConfirmationLedger,
    deltas: &[UsageDelta],
) -> TrafficOutcome {
    let mut outcome = TrafficOutcome {
        attempted: deltas.len(),
        ..TrafficOutcome::default()
    };

    for delta in deltas {
        let uuid = delta.uuid;
        let remote = match parent.fetch_usage(&uuid) {
            Ok(Some(gb)) => gb,
            Ok(None) => {
                tracing::warn!(%uuid, name = %delta.name, "user not found on parent, starting from zero");
                0.0
            }
            Err(e) => {
                tracing::error!(%uuid, name = %delta.name, error = %e, "failed to read parent usage, skipping");
                outcome.failed.push(uuid);
                continue;
            }
        };

        let total = remote + delta.amount_gb;
        tracing::info!(
            %uuid,
            name = %delta.name,
            parent_gb = remote,
            local_gb = delta.amount_gb,
            total_gb = total,
            "pushing usage"
        );

        match parent.update_usage(&uuid, total) {
            Ok(()) => {}
            Err(e) if landed_despite(parent, &uuid, total, &e) => {
                tracing::warn!(%uuid, error = %e, "update acknowledged late, parent holds the new total");
            }
            Err(e) if e.is_not_found() => {
                tracing::warn!(%uuid, name = %delta.name, "user removed from parent before update, keeping local usage");
                outcome.failed.push(uuid);
                continue;
            }
            Err(e) => {
                tracing::error!(%uuid, name = %delta.name, error = %e, "failed to push usage");
                outcome.failed.push(uuid);
                continue;
            }
        }

        let entry = LedgerEntry::for_delta(delta);
        if let Err(e) = ledger.record(entry) {
            tracing::error!(%uuid, error = %e, "failed to record confirmation, reset relies on this cycle");
            outcome.unrecorded += 1;
        }
        outcome.confirmed.push(entry);
    }

    if outcome.all_succeeded() {
        tracing::info!(
            updated = outcome.success_count(),
            "traffic fully synced"
        );
    } else {
        tracing::warn!(
            updated = outcome.success_count(),
            attempted = outcome.attempted,
            "traffic partially synced"
        );
    }
    outcome
}

/// After an ambiguous failure (no response), checks whether the parent
/// already holds `total`.
fn landed_despite<P: ParentApi + ?Sized>(
    parent: &P,
    uuid: &Uuid,
    total: f64,
    err: &SyncError,
) -> bool {
    if !matches!(err, SyncError::Timeout | SyncError::Transport(_)) {
        return false;
    }
    matches!(parent.fetch_usage(uuid), Ok(Some(gb)) if (gb - total).abs() < VERIFY_EPSILON)
}
