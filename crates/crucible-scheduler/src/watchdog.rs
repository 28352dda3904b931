// crucible-scheduler/src/watchdog.rs
// ============================================================================
// Module: Crucible Watchdog
// Description: In-flight anomaly detection over heartbeats.
// Purpose: Surface stalls, contractivity spikes, and reflexivity drops.
// Dependencies: crucible-core, serde_json
// ============================================================================

//! ## Overview
//! The watchdog keeps the last seen `(ρ, SR)` pair per plan and the last
//! heartbeat time per task. A contractivity spike triggers a rollback action,
//! a reflexivity drop freezes promotion, and a silent task raises a stall
//! alert. Alerts never stop the task themselves; downstream consumers (the
//! canary manager or governance) act on the recorded signal.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::MutexGuard;

use crucible_core::EventKind;
use crucible_core::Heartbeat;
use crucible_core::Ledger;
use crucible_core::LedgerError;
use crucible_core::PlanId;
use crucible_core::TaskId;
use serde_json::json;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Watchdog thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchdogConfig {
    /// Heartbeat silence (ms) before a stall alert.
    pub stall_after_ms: i64,
    /// Contractivity increase triggering rollback.
    pub rho_spike: f64,
    /// Reflexivity decrease triggering promotion freeze.
    pub sr_drop: f64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            stall_after_ms: 600_000,
            rho_spike: 0.05,
            sr_drop: 0.05,
        }
    }
}

// ============================================================================
// SECTION: Actions
// ============================================================================

/// Action the watchdog triggered from one observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogAction {
    /// Contractivity spiked; rollback was signaled.
    Rollback {
        /// Affected plan.
        plan_id: PlanId,
    },
    /// Reflexivity dropped; promotion freeze was signaled.
    FreezePromotion {
        /// Affected plan.
        plan_id: PlanId,
    },
    /// A task went silent past the stall threshold.
    Stall {
        /// Silent task.
        task_id: TaskId,
    },
}

// ============================================================================
// SECTION: Watchdog
// ============================================================================

/// Tracked per-plan risk pair.
#[derive(Debug, Clone, Copy)]
struct RiskPair {
    /// Last seen contractivity proxy.
    rho: f64,
    /// Last seen reflexivity score.
    sr_score: f64,
}

/// Heartbeat-driven anomaly detector.
#[derive(Debug)]
pub struct Watchdog {
    /// Thresholds.
    config: WatchdogConfig,
    /// Last seen risk pair per plan.
    last_by_plan: Mutex<BTreeMap<PlanId, RiskPair>>,
    /// Last heartbeat time per task.
    last_beat: Mutex<BTreeMap<TaskId, i64>>,
}

impl Watchdog {
    /// Creates a watchdog with the provided thresholds.
    #[must_use]
    pub fn new(config: WatchdogConfig) -> Self {
        Self {
            config,
            last_by_plan: Mutex::new(BTreeMap::new()),
            last_beat: Mutex::new(BTreeMap::new()),
        }
    }

    /// Observes one heartbeat and records any triggered actions.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when recording an alert fails.
    pub fn observe(
        &self,
        ledger: &Ledger,
        plan_id: &PlanId,
        beat: &Heartbeat,
    ) -> Result<Vec<WatchdogAction>, LedgerError> {
        lock(&self.last_beat).insert(beat.task_id.clone(), beat.ts_ms);

        let previous = lock(&self.last_by_plan).insert(
            plan_id.clone(),
            RiskPair {
                rho: beat.rho,
                sr_score: beat.sr_score,
            },
        );
        let Some(previous) = previous else {
            return Ok(Vec::new());
        };

        let mut actions = Vec::new();
        if beat.rho - previous.rho > self.config.rho_spike {
            ledger.record(
                EventKind::WatchdogAlert,
                json!({
                    "kind": "rho_spike",
                    "plan": plan_id.as_str(),
                    "task": beat.task_id.as_str(),
                    "previous": previous.rho,
                    "observed": beat.rho,
                }),
            )?;
            ledger.record(
                EventKind::WatchdogRollback,
                json!({"plan": plan_id.as_str(), "task": beat.task_id.as_str()}),
            )?;
            actions.push(WatchdogAction::Rollback {
                plan_id: plan_id.clone(),
            });
        }
        if previous.sr_score - beat.sr_score > self.config.sr_drop {
            ledger.record(
                EventKind::WatchdogAlert,
                json!({
                    "kind": "sr_drop",
                    "plan": plan_id.as_str(),
                    "task": beat.task_id.as_str(),
                    "previous": previous.sr_score,
                    "observed": beat.sr_score,
                }),
            )?;
            ledger.record(
                EventKind::FreezePromotion,
                json!({"plan": plan_id.as_str(), "task": beat.task_id.as_str()}),
            )?;
            actions.push(WatchdogAction::FreezePromotion {
                plan_id: plan_id.clone(),
            });
        }
        Ok(actions)
    }

    /// Raises stall alerts for tasks silent past the threshold.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when recording an alert fails.
    pub fn check_stalls(
        &self,
        ledger: &Ledger,
        now_ms: i64,
    ) -> Result<Vec<WatchdogAction>, LedgerError> {
        let mut actions = Vec::new();
        let mut stalled: Vec<TaskId> = Vec::new();
        {
            let beats = lock(&self.last_beat);
            for (task_id, last_ms) in beats.iter() {
                if now_ms - last_ms > self.config.stall_after_ms {
                    stalled.push(task_id.clone());
                }
            }
        }
        for task_id in stalled {
            ledger.record(
                EventKind::WatchdogAlert,
                json!({"kind": "stall", "task": task_id.as_str()}),
            )?;
            // One alert per silence; tracking resumes on the next beat.
            lock(&self.last_beat).remove(&task_id);
            actions.push(WatchdogAction::Stall {
                task_id,
            });
        }
        Ok(actions)
    }

    /// Stops tracking a finished task.
    pub fn forget_task(&self, task_id: &TaskId) {
        lock(&self.last_beat).remove(task_id);
    }
}

/// Acquires a tracking lock, recovering from poisoning.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
