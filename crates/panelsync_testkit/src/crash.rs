//! Crash models for the traffic reset.
//!
//! The traffic phases are replayed from their building blocks so a run can
//! stop at a chosen point, the way a killed process would. Two reset
//! policies are modelled:
//!
//! - the engine's: confirmations go to the durable ledger and each uuid is
//!   reduced by exactly the bytes the parent accepted for it
//! - a naive one: confirmations live in memory only and counters are
//!   zeroed once the whole batch succeeded
//!
//! ## Usage
//!
//! ```rust,ignore
//! use panelsync_testkit::prelude::*;
//!
//! let (node, uuids) = scenarios::metered_node(&[5_000_000]);
//! interrupted_cycle(&node, CrashPoint::AfterPush);
//! node.restart().cycle();
//! ```

use crate::fixtures::TestNode;
use panelsync_engine::{
    collect_deltas, push_deltas, recover_pending, reset_confirmed, ConfirmationLedger,
    TrafficOutcome,
};
use panelsync_store::{UserStore, WriteBatch};

/// Points at which a cycle can be interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// The process dies after the parent acknowledged, before any reset.
    AfterPush,
    /// The reset commit fails and the process dies.
    ResetCommitFails,
    /// The reset commits but the ledger cannot be rewritten, and the
    /// process dies.
    SettleFails,
}

/// Runs the engine's traffic phases on `node` up to `crash`.
///
/// The ledger is the node's durable one, so a restarted node sees what this
/// run confirmed.
pub fn interrupted_cycle(node: &TestNode, crash: CrashPoint) -> TrafficOutcome {
    let config = node.config();
    let mut ledger =
        ConfirmationLedger::open(config.ledger_path()).expect("Failed to open ledger");
    recover_pending(node.store(), &mut ledger).expect("Failed to recover ledger");

    let deltas = collect_deltas(node.store(), config.usage_threshold, config.min_delta_gb)
        .expect("Failed to collect deltas");
    let outcome = push_deltas(node.parent(), &mut ledger, &deltas);

    match crash {
        CrashPoint::AfterPush => {}
        CrashPoint::ResetCommitFails => {
            node.store().fail_next_commits(1);
            assert!(
                reset_confirmed(node.store(), &mut ledger, &outcome.confirmed).is_err(),
                "Injected commit failure should surface"
            );
        }
        CrashPoint::SettleFails => {
            let blocker = config.ledger_path().with_extension("cbor.tmp");
            std::fs::create_dir_all(&blocker).expect("Failed to block ledger rewrite");
            assert!(
                reset_confirmed(node.store(), &mut ledger, &outcome.confirmed).is_err(),
                "Blocked ledger rewrite should surface"
            );
            std::fs::remove_dir(&blocker).expect("Failed to unblock ledger rewrite");
        }
    }
    outcome
}

/// Runs the traffic phases with the naive reset policy.
///
/// Confirmations are kept in memory, and counters are zeroed only if every
/// push succeeded. With `crash` set the run stops before the reset.
pub fn naive_cycle(node: &TestNode, crash: Option<CrashPoint>) -> TrafficOutcome {
    let config = node.config();
    let mut volatile = ConfirmationLedger::in_memory();

    let deltas = collect_deltas(node.store(), config.usage_threshold, config.min_delta_gb)
        .expect("Failed to collect deltas");
    let outcome = push_deltas(node.parent(), &mut volatile, &deltas);

    if crash.is_some() || !outcome.all_succeeded() {
        return outcome;
    }
    let mut batch = WriteBatch::new();
    for delta in &deltas {
        batch.deduct_usage(delta.uuid, u64::MAX, delta.epoch);
    }
    node.store().commit(batch).expect("Failed to zero counters");
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::scenarios;

    #[test]
    fn interrupted_cycle_leaves_counters() {
        let (node, uuids) = scenarios::metered_node(&[5_000_000]);
        let outcome = interrupted_cycle(&node, CrashPoint::AfterPush);

        assert!(outcome.is_confirmed(&uuids[0]));
        assert_eq!(node.local_usage(&uuids[0]), 5_000_000);
    }

    #[test]
    fn naive_cycle_zeroes_on_full_success() {
        let (node, uuids) = scenarios::metered_node(&[5_000_000, 3_000_000]);
        let outcome = naive_cycle(&node, None);

        assert!(outcome.all_succeeded());
        assert_eq!(node.local_usage(&uuids[0]), 0);
        assert_eq!(node.local_usage(&uuids[1]), 0);
    }
}
