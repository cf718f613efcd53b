//! Sync engine state machine.

use crate::activation::Activator;
use crate::collector::collect_deltas;
use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::lease::CycleLease;
use crate::ledger::ConfirmationLedger;
use crate::parent::ParentApi;
use crate::reset::{recover_pending, reset_confirmed};
use crate::status::{CycleCounters, Phase, StatusReport};
use crate::traffic::push_deltas;
use crate::users::reconcile_users;
use chrono::{DateTime, Utc};
use panelsync_store::UserStore;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Engine is idle, not syncing.
    Idle,
    /// Applying confirmations left by an earlier cycle.
    Recovering,
    /// Reading local traffic counters.
    Collecting,
    /// Pushing deltas to the parent.
    PushingTraffic,
    /// Deducting confirmed traffic locally.
    ResettingCounters,
    /// Pulling and applying the parent user set.
    ReconcilingUsers,
    /// Handing new users to the proxy.
    Activating,
    /// Engine has completed a sync cycle.
    Synced,
    /// The last cycle finished with failures.
    Error,
}

impl SyncState {
    /// Returns true if the engine is in an active sync state.
    pub fn is_active(&self) -> bool {
        !matches!(self, SyncState::Idle | SyncState::Synced | SyncState::Error)
    }

    /// Returns true if the engine can start a new sync.
    pub fn can_start_sync(&self) -> bool {
        !self.is_active()
    }
}

/// Statistics about sync cycles run by this engine instance.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of sync cycles completed.
    pub cycles_completed: u64,
    /// Cycles that finished with failures.
    pub cycles_failed: u64,
    /// Confirmed traffic pushes.
    pub traffic_synced: u64,
    /// Users created.
    pub users_created: u64,
    /// Users disabled.
    pub users_blocked: u64,
    /// Last sync time.
    pub last_sync_time: Option<Instant>,
    /// Last failed phase.
    pub last_error: Option<String>,
}

/// Result of a sync cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// When the cycle started.
    pub started_at: DateTime<Utc>,
    /// Counters of this cycle.
    pub counters: CycleCounters,
    /// Phases that failed.
    pub failed_phases: Vec<Phase>,
    /// True if no phase failed (activation excepted) and every delta was
    /// confirmed.
    pub success: bool,
    /// Duration of the sync cycle.
    pub duration: Duration,
}

impl CycleReport {
    /// Returns true if `phase` failed.
    pub fn phase_failed(&self, phase: Phase) -> bool {
        self.failed_phases.contains(&phase)
    }
}

/// The sync engine runs reconciliation cycles against the parent.
///
/// Phases run in a fixed order:
/// 1. Recover confirmations left unsettled by an earlier cycle
/// 2. Collect local deltas
/// 3. Push deltas to the parent (skipped if none)
/// 4. Reset counters of confirmed uuids
/// 5. Reconcile users
/// 6. Activate newly created users
///
/// A failing phase is logged and recorded; later phases still run, except
/// that traffic is never collected while earlier confirmations are
/// unsettled.
pub struct SyncEngine<S: UserStore, P: ParentApi, A: Activator> {
    config: SyncConfig,
    store: Arc<S>,
    parent: Arc<P>,
    activator: Arc<A>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
}

impl<S: UserStore, P: ParentApi, A: Activator> SyncEngine<S, P, A> {
    /// Creates a new sync engine.
    pub fn new(config: SyncConfig, store: S, parent: P, activator: A) -> Self {
        Self::with_shared(config, Arc::new(store), Arc::new(parent), Arc::new(activator))
    }

    /// Creates a sync engine over shared collaborators.
    pub fn with_shared(config: SyncConfig, store: Arc<S>, parent: Arc<P>, activator: Arc<A>) -> Self {
        Self {
            config,
            store,
            parent,
            activator,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the user store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Gets the parent API.
    pub fn parent(&self) -> &P {
        &self.parent
    }

    /// Gets the activation client.
    pub fn activator(&self) -> &A {
        &self.activator
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    /// Runs one full reconciliation cycle.
    ///
    /// # Errors
    ///
    /// Only fails if the cycle could not start: another cycle holds the
    /// lease ([`crate::SyncError::CycleInProgress`]) or the lease file is
    /// unusable. Phase failures are reported in the returned
    /// [`CycleReport`].
    pub fn run_cycle(&self) -> SyncResult<CycleReport> {
        let _lease = CycleLease::try_acquire(self.config.lease_path())?;
        let started_at = Utc::now();
        let start = Instant::now();
        tracing::info!("starting sync cycle");

        let mut counters = CycleCounters::default();
        let mut failed = Vec::new();

        let traffic_ok = self.sync_traffic(&mut counters, &mut failed);
        let to_activate = self.sync_users(&mut counters, &mut failed);
        self.activate(&to_activate, &mut counters, &mut failed);

        let success = traffic_ok && failed.iter().all(|phase| *phase == Phase::Activation);
        let report = CycleReport {
            started_at,
            counters,
            failed_phases: failed,
            success,
            duration: start.elapsed(),
        };

        self.write_status(&report);
        self.record_stats(&report);
        self.set_state(if success {
            SyncState::Synced
        } else {
            SyncState::Error
        });

        if success {
            tracing::info!(duration_ms = report.duration.as_millis() as u64, "sync cycle completed");
        } else {
            tracing::warn!(
                duration_ms = report.duration.as_millis() as u64,
                failed = ?report.failed_phases,
                traffic_failed = report.counters.traffic_failed,
                "sync cycle completed with errors"
            );
        }
        Ok(report)
    }

    /// Recovery, collection, push and reset. Returns true if every
    /// collected delta was confirmed and recorded, and no traffic phase
    /// failed.
    fn sync_traffic(&self, counters: &mut CycleCounters, failed: &mut Vec<Phase>) -> bool {
        self.set_state(SyncState::Recovering);
        let mut ledger = match ConfirmationLedger::open(self.config.ledger_path()) {
            Ok(ledger) => ledger,
            Err(e) => {
                tracing::error!(error = %e, "cannot open confirmation ledger, traffic sync skipped");
                failed.push(Phase::Recovery);
                return false;
            }
        };
        match recover_pending(&*self.store, &mut ledger) {
            Ok(recovered) => counters.recovered_resets = recovered,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "cannot settle earlier confirmations, traffic sync skipped to avoid double counting"
                );
                failed.push(Phase::Recovery);
                return false;
            }
        }

        self.set_state(SyncState::Collecting);
        let deltas = match collect_deltas(
            &*self.store,
            self.config.usage_threshold,
            self.config.min_delta_gb,
        ) {
            Ok(deltas) => deltas,
            Err(e) => {
                tracing::error!(error = %e, store_down = e.is_store_unavailable(), "failed to collect traffic");
                failed.push(Phase::Collect);
                return false;
            }
        };
        counters.collected = deltas.len();
        if deltas.is_empty() {
            tracing::info!("no traffic to report");
            return true;
        }

        self.set_state(SyncState::PushingTraffic);
        let outcome = push_deltas(&*self.parent, &mut ledger, &deltas);
        counters.traffic_synced = outcome.success_count();
        counters.traffic_failed = outcome.attempted - outcome.success_count();
        counters.ledger_failures = outcome.unrecorded;

        self.set_state(SyncState::ResettingCounters);
        match reset_confirmed(&*self.store, &mut ledger, &outcome.confirmed) {
            Ok(reset) => counters.counters_reset = reset,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "failed to reset confirmed counters, they will be settled next cycle"
                );
                failed.push(Phase::Reset);
                return false;
            }
        }

        if outcome.unrecorded > 0 {
            tracing::warn!(
                unrecorded = outcome.unrecorded,
                "some confirmations were not made durable this cycle"
            );
        }
        outcome.all_succeeded() && outcome.unrecorded == 0
    }

    /// Pulls the parent user set and applies it. Returns the uuids to
    /// activate.
    fn sync_users(&self, counters: &mut CycleCounters, failed: &mut Vec<Phase>) -> Vec<Uuid> {
        self.set_state(SyncState::ReconcilingUsers);
        let users = match self.parent.list_users() {
            Ok(users) => users,
            Err(e) => {
                tracing::error!(error = %e, remote = e.is_remote(), "failed to list parent users");
                failed.push(Phase::Users);
                return Vec::new();
            }
        };
        tracing::info!(count = users.len(), "fetched parent users");

        match reconcile_users(
            &*self.store,
            &users,
            self.config.owner,
            self.config.default_max_ips,
        ) {
            Ok(outcome) => {
                counters.synced = outcome.synced;
                counters.created = outcome.created.len();
                counters.updated = outcome.updated;
                counters.blocked = outcome.blocked;
                counters.unblocked = outcome.unblocked;
                outcome.to_activate
            }
            Err(e) => {
                tracing::error!(error = %e, store_down = e.is_store_unavailable(), "failed to reconcile users");
                failed.push(Phase::Users);
                Vec::new()
            }
        }
    }

    fn activate(&self, uuids: &[Uuid], counters: &mut CycleCounters, failed: &mut Vec<Phase>) {
        if uuids.is_empty() {
            return;
        }
        self.set_state(SyncState::Activating);
        match self.activator.activate(uuids) {
            Ok(()) => {
                counters.activated = uuids.len();
                tracing::info!(count = uuids.len(), "new users activated");
            }
            Err(e) => {
                tracing::warn!(error = %e, count = uuids.len(), "activation failed, users stay committed");
                failed.push(Phase::Activation);
            }
        }
    }

    fn write_status(&self, report: &CycleReport) {
        let path = self.config.status_path();
        let previous = StatusReport::load(&path).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "ignoring unreadable status file");
            None
        });
        let status = StatusReport::next(previous.as_ref(), report);
        if let Err(e) = status.save(&path) {
            tracing::warn!(error = %e, path = %path.display(), "failed to write status file");
        }
    }

    fn record_stats(&self, report: &CycleReport) {
        let mut stats = self.stats.write();
        stats.cycles_completed += 1;
        if !report.success {
            stats.cycles_failed += 1;
            stats.last_error = report
                .failed_phases
                .first()
                .map(|phase| format!("{phase} phase failed"))
                .or_else(|| Some("traffic partially synced".into()));
        } else {
            stats.last_error = None;
        }
        stats.traffic_synced += report.counters.traffic_synced as u64;
        stats.users_created += report.counters.created as u64;
        stats.users_blocked += report.counters.blocked as u64;
        stats.last_sync_time = Some(Instant::now());
    }
}
