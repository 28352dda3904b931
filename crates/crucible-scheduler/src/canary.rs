// crucible-scheduler/src/canary.rs
// ============================================================================
// Module: Crucible Canary Manager
// Description: Time-bounded baseline-versus-canary comparison windows.
// Purpose: Decide promote or rollback from out-of-band telemetry snapshots.
// Dependencies: crucible-core, crucible-store, serde_json
// ============================================================================

//! ## Overview
//! A canary window compares a candidate's telemetry against the baseline
//! after a fixed duration. Metric snapshots are populated out-of-band (the
//! F5 worker or an external telemetry feeder); evaluation with absent
//! snapshots resolves to `Missing` rather than guessing. Every status
//! transition is a ledger event.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use crucible_core::CanaryCriteria;
use crucible_core::CanaryMetrics;
use crucible_core::CanaryStatus;
use crucible_core::CanaryWindow;
use crucible_core::EventKind;
use crucible_core::Ledger;
use crucible_core::LedgerError;
use crucible_core::PlanId;
use crucible_core::WindowId;
use crucible_core::hashing::hash_segments;
use crucible_core::time::unix_millis_now;
use crucible_store::QueueStore;
use crucible_store::StoreError;
use serde_json::json;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Canary manager failures.
#[derive(Debug, Error)]
pub enum CanaryError {
    /// Queue store failure.
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
    /// Ledger failure.
    #[error("ledger failure: {0}")]
    Ledger(#[from] LedgerError),
    /// Window has not reached its evaluation time.
    #[error("window {0} is still collecting")]
    StillOpen(String),
}

// ============================================================================
// SECTION: Canary Manager
// ============================================================================

/// Manages canary windows over the durable store.
pub struct CanaryManager {
    /// Durable window storage.
    store: Arc<QueueStore>,
    /// Shared ledger.
    ledger: Arc<Ledger>,
    /// Monotonic opener sequence (disambiguates same-millisecond opens).
    sequence: std::sync::atomic::AtomicU64,
}

impl CanaryManager {
    /// Creates a manager over the shared store and ledger.
    #[must_use]
    pub fn new(store: Arc<QueueStore>, ledger: Arc<Ledger>) -> Self {
        Self {
            store,
            ledger,
            sequence: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Opens a new window and records the opening.
    ///
    /// # Errors
    ///
    /// Returns [`CanaryError`] on storage or ledger failure.
    pub fn open_window(
        &self,
        plan_id: &PlanId,
        traffic_pct: f64,
        duration_s: u64,
        criteria: CanaryCriteria,
    ) -> Result<CanaryWindow, CanaryError> {
        let opened_ms = unix_millis_now();
        let sequence = self.sequence.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let digest = hash_segments(&[
            plan_id.as_str().as_bytes(),
            &opened_ms.to_le_bytes(),
            &sequence.to_le_bytes(),
        ]);
        let window = CanaryWindow {
            window_id: WindowId::new(format!("cw_{}", digest.get(..12).unwrap_or(&digest))),
            plan_id: plan_id.clone(),
            traffic_pct,
            duration_s,
            criteria,
            status: CanaryStatus::Open,
            opened_ms,
            evaluated_ms: None,
            metrics_baseline: None,
            metrics_canary: None,
        };
        self.store.insert_window(&window)?;
        self.ledger.record(
            EventKind::CanaryOpen,
            json!({
                "window": window.window_id.as_str(),
                "plan": plan_id.as_str(),
                "traffic_pct": traffic_pct,
                "duration_s": duration_s,
            }),
        )?;
        Ok(window)
    }

    /// Stores out-of-band metric snapshots on a window.
    ///
    /// # Errors
    ///
    /// Returns [`CanaryError`] on storage failure.
    pub fn feed_metrics(
        &self,
        window_id: &WindowId,
        baseline: Option<&CanaryMetrics>,
        canary: Option<&CanaryMetrics>,
    ) -> Result<(), CanaryError> {
        self.store.feed_window_metrics(window_id, baseline, canary)?;
        Ok(())
    }

    /// Evaluates a window once its duration has elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`CanaryError::StillOpen`] before the evaluation time and
    /// [`CanaryError`] on infrastructure failure.
    pub fn evaluate(&self, window_id: &WindowId) -> Result<CanaryStatus, CanaryError> {
        let window = self.store.get_window(window_id)?;
        if window.status != CanaryStatus::Open {
            return Ok(window.status);
        }
        let now_ms = unix_millis_now();
        #[allow(clippy::cast_possible_wrap, reason = "durations sit far below i64::MAX")]
        let deadline_ms = window.opened_ms + (window.duration_s as i64) * 1_000;
        if now_ms < deadline_ms {
            return Err(CanaryError::StillOpen(window_id.to_string()));
        }

        let (status, reason) = decide(&window);
        self.store.update_window_status(window_id, status, Some(now_ms))?;
        let event = match status {
            CanaryStatus::Promote => EventKind::CanaryPromote,
            CanaryStatus::Rollback => EventKind::CanaryRollback,
            CanaryStatus::Missing | CanaryStatus::Timeout | CanaryStatus::Open => {
                EventKind::CanaryTimeout
            }
        };
        self.ledger.record(
            event,
            json!({
                "window": window_id.as_str(),
                "plan": window.plan_id.as_str(),
                "status": status.as_str(),
                "reason": reason,
            }),
        )?;
        Ok(status)
    }
}

/// Applies the rollback criteria to a window's snapshots.
fn decide(window: &CanaryWindow) -> (CanaryStatus, String) {
    let (Some(baseline), Some(canary)) =
        (window.metrics_baseline.as_ref(), window.metrics_canary.as_ref())
    else {
        return (CanaryStatus::Missing, "metric snapshots never populated".to_string());
    };

    if canary.rho - baseline.rho > window.criteria.rho_spike_max {
        return (
            CanaryStatus::Rollback,
            format!("rho spike {:.4} > {:.4}", canary.rho - baseline.rho, window.criteria.rho_spike_max),
        );
    }
    if baseline.sr_score - canary.sr_score > window.criteria.sr_drop_max {
        return (
            CanaryStatus::Rollback,
            format!(
                "sr drop {:.4} > {:.4}",
                baseline.sr_score - canary.sr_score,
                window.criteria.sr_drop_max
            ),
        );
    }
    if canary.ppl_ood > baseline.ppl_ood * (1.0 + window.criteria.ppl_regress_max) {
        return (
            CanaryStatus::Rollback,
            format!(
                "ppl regression {:.2} > {:.2}",
                canary.ppl_ood,
                baseline.ppl_ood * (1.0 + window.criteria.ppl_regress_max)
            ),
        );
    }
    (CanaryStatus::Promote, "criteria passed".to_string())
}
