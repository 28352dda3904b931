// crucible-core/src/core/events.rs
// ============================================================================
// Module: Crucible Event Kinds
// Description: Closed set of ledger event identifiers.
// Purpose: Provide stable, semantically versioned event labels for the chain.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every component records decisions through the WORM ledger using one of the
//! identifiers below. The string forms are part of the audit contract and
//! must never change meaning; new behavior gets a new identifier instead.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Event Kinds
// ============================================================================

/// Stable identifiers for ledger events.
///
/// # Invariants
/// - `as_str` values are frozen; renaming one breaks chain replay tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// Mutation cycle entry.
    MutStart,
    /// Base genotype constructed.
    MutGenotype,
    /// Candidate produced by an operator.
    MutCandidate,
    /// Candidate rejected by the sandbox sanitizer.
    MutSanitize,
    /// Candidate micro-benchmark simulation.
    MutSimulate,
    /// Candidate scored.
    MutScore,
    /// Bundle packaged.
    MutBundle,
    /// Mutation cycle aborted.
    MutAbort,
    /// Mutation cycle completed.
    MutDone,
    /// Candidate skipped for trust-region overshoot.
    MutSkipTr,
    /// Candidate skipped for budget exhaustion.
    MutSkipBudget,
    /// Scheduler started.
    SchedStart,
    /// Scheduler stopped.
    SchedStop,
    /// Task leased by the scheduler.
    SchedTake,
    /// Lease expired and task returned to pending.
    LeaseExpired,
    /// Task completed.
    TaskDone,
    /// Task failed (may retry).
    TaskFail,
    /// Task exhausted retries.
    TaskDead,
    /// Task enqueued.
    Enqueue,
    /// Watchdog anomaly surfaced.
    WatchdogAlert,
    /// Watchdog triggered a rollback action.
    WatchdogRollback,
    /// Watchdog froze promotions for a plan.
    FreezePromotion,
    /// Plan budget blocked.
    BudgetBlock,
    /// Circuit breaker opened for a domain.
    CbOpen,
    /// Circuit breaker closed for a domain.
    CbClose,
    /// Plan round started (DAG built).
    PlanRoundStart,
    /// Plan round ended.
    PlanRoundEnd,
    /// Canary window opened.
    CanaryOpen,
    /// Canary window promoted.
    CanaryPromote,
    /// Canary window rolled back.
    CanaryRollback,
    /// Canary window timed out.
    CanaryTimeout,
    /// Release manifest created.
    ReleaseCreated,
    /// Release published atomically.
    ReleasePublished,
    /// Release rejected by the gate cascade.
    ReleaseRejectedGates,
    /// Release rejected by canary decision.
    ReleaseRejectedCanary,
    /// Release quarantined after a DLP hit.
    ReleaseQuarantinedDlp,
    /// Release rolled back.
    ReleaseRollbacked,
    /// Release publish failed.
    ReleaseFailed,
    /// System frozen.
    SystemFrozen,
    /// System unfrozen.
    SystemUnfrozen,
}

impl EventKind {
    /// Returns the stable string identifier for the event kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MutStart => "MUT_START",
            Self::MutGenotype => "MUT_GENOTYPE",
            Self::MutCandidate => "MUT_CANDIDATE",
            Self::MutSanitize => "MUT_SANITIZE",
            Self::MutSimulate => "MUT_SIMULATE",
            Self::MutScore => "MUT_SCORE",
            Self::MutBundle => "MUT_BUNDLE",
            Self::MutAbort => "MUT_ABORT",
            Self::MutDone => "MUT_DONE",
            Self::MutSkipTr => "MUT_SKIP_TR",
            Self::MutSkipBudget => "MUT_SKIP_BUDGET",
            Self::SchedStart => "SCHED_START",
            Self::SchedStop => "SCHED_STOP",
            Self::SchedTake => "SCHED_TAKE",
            Self::LeaseExpired => "LEASE_EXPIRED",
            Self::TaskDone => "TASK_DONE",
            Self::TaskFail => "TASK_FAIL",
            Self::TaskDead => "TASK_DEAD",
            Self::Enqueue => "ENQUEUE",
            Self::WatchdogAlert => "WATCHDOG_ALERT",
            Self::WatchdogRollback => "WATCHDOG_ROLLBACK",
            Self::FreezePromotion => "FREEZE_PROMOTION",
            Self::BudgetBlock => "BUDGET_BLOCK",
            Self::CbOpen => "CB_OPEN",
            Self::CbClose => "CB_CLOSE",
            Self::PlanRoundStart => "PLAN_ROUND_START",
            Self::PlanRoundEnd => "PLAN_ROUND_END",
            Self::CanaryOpen => "CANARY_OPEN",
            Self::CanaryPromote => "CANARY_PROMOTE",
            Self::CanaryRollback => "CANARY_ROLLBACK",
            Self::CanaryTimeout => "CANARY_TIMEOUT",
            Self::ReleaseCreated => "RELEASE_CREATED",
            Self::ReleasePublished => "RELEASE_PUBLISHED",
            Self::ReleaseRejectedGates => "RELEASE_REJECTED_GATES",
            Self::ReleaseRejectedCanary => "RELEASE_REJECTED_CANARY",
            Self::ReleaseQuarantinedDlp => "RELEASE_QUARANTINED_DLP",
            Self::ReleaseRollbacked => "RELEASE_ROLLBACKED",
            Self::ReleaseFailed => "RELEASE_FAILED",
            Self::SystemFrozen => "SYSTEM_FROZEN",
            Self::SystemUnfrozen => "SYSTEM_UNFROZEN",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
