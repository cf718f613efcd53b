//! Traffic delta collection.

use crate::error::SyncResult;
use panelsync_protocol::UsageDelta;
use panelsync_store::UserStore;

/// Reads every user above `threshold` bytes and converts their counters
/// into deltas, dropping those that do not exceed `min_gb`.
///
/// Deltas keep the store's scan order (ascending uuid).
pub fn collect_deltas<S: UserStore + ?Sized>(
    store: &S,
    threshold: u64,
    min_gb: f64,
) -> SyncResult<Vec<UsageDelta>> {
    let candidates = store.users_above_usage(threshold)?;
    let scanned = candidates.len();

    let deltas: Vec<UsageDelta> = candidates
        .iter()
        .filter_map(|record| {
            let delta = UsageDelta::from_record(record, min_gb);
            if delta.is_none() {
                tracing::debug!(uuid = %record.uuid, bytes = record.current_usage, "delta below minimum");
            }
            delta
        })
        .collect();

    tracing::info!(scanned, collected = deltas.len(), "collected traffic deltas");
    Ok(deltas)
}
