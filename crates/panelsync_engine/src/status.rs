//! Status file for external monitors.
//!
//! After every cycle the engine rewrites `status.json` atomically. Running
//! totals and the consecutive failure count are carried over from the
//! previous file, so a monitor only needs to read one document.

use crate::error::{SyncError, SyncResult};
use crate::state::CycleReport;
use chrono::{DateTime, Utc};
use panelsync_store::write_atomic;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// A step of the reconciliation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Applying confirmations left by an earlier cycle.
    Recovery,
    /// Reading local counters.
    Collect,
    /// Deducting confirmed traffic.
    Reset,
    /// Pulling and applying the parent user set.
    Users,
    /// Activating new users in the proxy.
    Activation,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Recovery => "recovery",
            Phase::Collect => "collect",
            Phase::Reset => "reset",
            Phase::Users => "users",
            Phase::Activation => "activation",
        };
        f.write_str(name)
    }
}

/// Counters of one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleCounters {
    /// Deltas collected.
    pub collected: usize,
    /// Deltas the parent confirmed.
    pub traffic_synced: usize,
    /// Deltas that were not confirmed.
    pub traffic_failed: usize,
    /// Local counters reduced after confirmation.
    pub counters_reset: usize,
    /// Counters reduced from an earlier cycle's confirmations.
    pub recovered_resets: usize,
    /// Confirmed pushes whose ledger write failed.
    #[serde(default)]
    pub ledger_failures: usize,
    /// Parent users processed.
    pub synced: usize,
    /// Users created locally.
    pub created: usize,
    /// Users whose parent-owned fields changed.
    pub updated: usize,
    /// Users disabled.
    pub blocked: usize,
    /// Users re-enabled.
    pub unblocked: usize,
    /// Users handed to the activation client.
    pub activated: usize,
}

/// Totals across all cycles recorded in the status file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTotals {
    /// Cycles run.
    pub cycles: u64,
    /// Cycles that succeeded.
    pub successful_cycles: u64,
    /// Confirmed traffic pushes.
    pub traffic_synced: u64,
    /// Users created.
    pub created: u64,
    /// Users disabled.
    pub blocked: u64,
    /// Users re-enabled.
    pub unblocked: u64,
    /// Users activated.
    pub activated: u64,
}

impl StatusTotals {
    fn add(&mut self, counters: &CycleCounters, success: bool) {
        self.cycles += 1;
        if success {
            self.successful_cycles += 1;
        }
        self.traffic_synced += counters.traffic_synced as u64;
        self.created += counters.created as u64;
        self.blocked += counters.blocked as u64;
        self.unblocked += counters.unblocked as u64;
        self.activated += counters.activated as u64;
    }
}

/// Contents of `status.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// When the last cycle started.
    pub last_cycle_at: DateTime<Utc>,
    /// Whether the last cycle succeeded.
    pub success: bool,
    /// Duration of the last cycle in milliseconds.
    pub duration_ms: u64,
    /// Counters of the last cycle.
    pub counters: CycleCounters,
    /// Phases that failed in the last cycle.
    pub failed_phases: Vec<Phase>,
    /// Totals since the status file was created.
    pub totals: StatusTotals,
    /// Failed cycles since the last success.
    pub consecutive_failures: u32,
    /// When the last successful cycle started.
    pub last_success_at: Option<DateTime<Utc>>,
}

impl StatusReport {
    /// Builds the status following `previous` with the results of `report`.
    pub fn next(previous: Option<&StatusReport>, report: &CycleReport) -> Self {
        let mut totals = previous.map(|p| p.totals).unwrap_or_default();
        totals.add(&report.counters, report.success);

        let consecutive_failures = if report.success {
            0
        } else {
            previous
                .map(|p| p.consecutive_failures.saturating_add(1))
                .unwrap_or(1)
        };
        let last_success_at = if report.success {
            Some(report.started_at)
        } else {
            previous.and_then(|p| p.last_success_at)
        };

        Self {
            last_cycle_at: report.started_at,
            success: report.success,
            duration_ms: u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
            counters: report.counters,
            failed_phases: report.failed_phases.clone(),
            totals,
            consecutive_failures,
            last_success_at,
        }
    }

    /// Reads the status file; a missing file is `None`.
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Option<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(path)?;
        let status = serde_json::from_slice(&data)
            .map_err(|e| SyncError::Decode(format!("{}: {e}", path.display())))?;
        Ok(Some(status))
    }

    /// Writes the status file atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> SyncResult<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }
        let data = serde_json::to_vec_pretty(self).map_err(std::io::Error::from)?;
        write_atomic(path, &data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn report(success: bool, created: usize) -> CycleReport {
        CycleReport {
            started_at: Utc::now(),
            counters: CycleCounters {
                created,
                traffic_synced: 2,
                ..CycleCounters::default()
            },
            failed_phases: if success { Vec::new() } else { vec![Phase::Users] },
            success,
            duration: Duration::from_millis(1500),
        }
    }

    #[test]
    fn totals_and_failures_carry_over() {
        let first = StatusReport::next(None, &report(true, 3));
        assert_eq!(first.totals.cycles, 1);
        assert_eq!(first.consecutive_failures, 0);
        assert!(first.last_success_at.is_some());

        let second = StatusReport::next(Some(&first), &report(false, 1));
        let third = StatusReport::next(Some(&second), &report(false, 0));

        assert_eq!(third.totals.cycles, 3);
        assert_eq!(third.totals.successful_cycles, 1);
        assert_eq!(third.totals.created, 4);
        assert_eq!(third.totals.traffic_synced, 6);
        assert_eq!(third.consecutive_failures, 2);
        assert_eq!(third.last_success_at, first.last_success_at);
        assert_eq!(third.failed_phases, vec![Phase::Users]);
        assert_eq!(third.duration_ms, 1500);
    }

    #[test]
    fn save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("status.json");
        assert_eq!(StatusReport::load(&path).unwrap(), None);

        let status = StatusReport::next(None, &report(false, 0));
        status.save(&path).unwrap();
        assert_eq!(StatusReport::load(&path).unwrap(), Some(status));

        let json: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(json["failed_phases"], serde_json::json!(["users"]));
        assert_eq!(json["counters"]["traffic_synced"], 2);
        assert_eq!(json["counters"]["ledger_failures"], 0);
    }

    #[test]
    fn counters_without_ledger_failures_still_load() {
        let json = serde_json::json!({
            "collected": 1,
            "traffic_synced": 1,
            "traffic_failed": 0,
            "counters_reset": 1,
            "recovered_resets": 0,
            "synced": 2,
            "created": 0,
            "updated": 0,
            "blocked": 0,
            "unblocked": 0,
            "activated": 0
        });
        let counters: CycleCounters = serde_json::from_value(json).unwrap();
        assert_eq!(counters.ledger_failures, 0);
        assert_eq!(counters.synced, 2);
    }

    #[test]
    fn phase_display() {
        assert_eq!(Phase::Recovery.to_string(), "recovery");
        assert_eq!(Phase::Activation.to_string(), "activation");
    }
}
