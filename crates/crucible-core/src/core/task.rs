// crucible-core/src/core/task.rs
// ============================================================================
// Module: Crucible Task Model
// Description: Durable queue task, heartbeat, and canary window records.
// Purpose: Define the scheduler data model shared by store and control loop.
// Dependencies: crate::core::{hashing, identifiers}, serde, serde_json
// ============================================================================

//! ## Overview
//! Tasks are created at DAG build, mutated only through lease / complete /
//! fail transitions, and live until a terminal status. The idempotency key is
//! a canonical hash over `(type, payload, plan, stage)` so repeated pushes of
//! the same work collapse to one row.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::hashing::HashError;
use crate::core::hashing::hash_canonical_json;
use crate::core::identifiers::Domain;
use crate::core::identifiers::Owner;
use crate::core::identifiers::PlanId;
use crate::core::identifiers::TaskId;
use crate::core::identifiers::WindowId;

// ============================================================================
// SECTION: Task Type and Stage
// ============================================================================

/// Pipeline task types composing a plan round.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskType {
    /// Knowledge acquisition.
    F3,
    /// Mutation and ranking.
    F4,
    /// Fusion and selection.
    F5,
    /// Rewrite and integration.
    F6,
}

impl TaskType {
    /// Returns the stable string label for the task type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::F3 => "F3",
            Self::F4 => "F4",
            Self::F5 => "F5",
            Self::F6 => "F6",
        }
    }

    /// Returns the failure domain conventionally assigned to the type.
    #[must_use]
    pub fn default_domain(self) -> Domain {
        match self {
            Self::F3 => Domain::new("acquisition"),
            Self::F4 => Domain::new("mutation"),
            Self::F5 => Domain::new("fusion"),
            Self::F6 => Domain::new("rewrite"),
        }
    }

    /// Returns the default selection priority for the type.
    #[must_use]
    pub const fn default_priority(self) -> i64 {
        match self {
            Self::F3 => 60,
            Self::F4 => 70,
            Self::F5 => 80,
            Self::F6 => 50,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment stage a task executes against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Shadow stage (no traffic).
    Shadow,
    /// Canary stage (partial traffic).
    Canary,
    /// Main stage (full traffic).
    Main,
}

impl Stage {
    /// Returns the stable string label for the stage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Shadow => "shadow",
            Self::Canary => "canary",
            Self::Main => "main",
        }
    }
}

// ============================================================================
// SECTION: Task Status
// ============================================================================

/// Lifecycle status of a queued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for selection.
    Pending,
    /// Exclusively claimed by a worker until the lease deadline.
    Leased,
    /// Finished successfully (terminal).
    Done,
    /// Failed; re-enters pending while attempts remain.
    Failed,
    /// Retries exhausted (terminal).
    Dead,
}

impl TaskStatus {
    /// Returns the stable string label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Leased => "leased",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Dead => "dead",
        }
    }

    /// Parses a status from its stable label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "pending" => Some(Self::Pending),
            "leased" => Some(Self::Leased),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }

    /// Returns true when no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Dead)
    }
}

// ============================================================================
// SECTION: Cost and Risk Bounds
// ============================================================================

/// Expected resource spend for one task execution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostVector {
    /// Token spend.
    pub tokens: f64,
    /// Latency in milliseconds.
    pub latency_ms: f64,
    /// CPU seconds.
    pub cpu_s: f64,
    /// Abstract cost units.
    pub cost: f64,
}

impl CostVector {
    /// Returns the normalized scalar cost used in utility scoring.
    #[must_use]
    pub fn normalized(&self) -> f64 {
        self.tokens / 1_000.0 + self.latency_ms / 1_000.0 + self.cpu_s + self.cost
    }
}

impl Default for CostVector {
    fn default() -> Self {
        Self {
            tokens: 500.0,
            latency_ms: 800.0,
            cpu_s: 0.5,
            cost: 0.02,
        }
    }
}

/// Risk ceilings a task must respect to be selected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskBound {
    /// Maximum tolerated contractivity proxy.
    pub rho_max: f64,
    /// Minimum required reflexivity score.
    pub sr_min: f64,
}

impl Default for RiskBound {
    fn default() -> Self {
        Self {
            rho_max: 0.95,
            sr_min: 0.78,
        }
    }
}

// ============================================================================
// SECTION: Task
// ============================================================================

/// Default task time-to-live in seconds.
pub const DEFAULT_TASK_TTL_S: u64 = 86_400;

/// Default maximum execution attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// One durable unit of pipeline work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Task identifier.
    pub id: TaskId,
    /// Pipeline task type.
    pub task_type: TaskType,
    /// Opaque worker payload.
    pub payload: Value,
    /// Selection priority (higher wins the tiebreak bonus).
    pub priority: i64,
    /// Owning plan.
    pub plan_id: PlanId,
    /// Deployment stage.
    pub stage: Stage,
    /// Creation time in unix milliseconds.
    pub created_ms: i64,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Attempts consumed so far.
    pub attempts: u32,
    /// Maximum attempts before the task is declared dead.
    pub max_attempts: u32,
    /// Deduplication key over `(type, payload, plan, stage)`.
    pub idempotency_key: String,
    /// Expected gain used in utility scoring.
    pub expected_gain: f64,
    /// Expected resource spend.
    pub expected_cost: CostVector,
    /// Risk ceilings.
    pub risk_bound: RiskBound,
    /// Trust-region radius granted to the task.
    pub tr_radius: f64,
    /// Time-to-live in seconds.
    pub ttl_s: u64,
    /// Lease deadline in unix milliseconds while leased.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_until_ms: Option<i64>,
    /// Worker owning the current lease.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Owner>,
    /// Failure domain for circuit breaking.
    pub domain: Domain,
    /// True when the task reduces risk and bypasses risk gates.
    pub risk_reduction: bool,
}

/// Canonical material hashed into an idempotency key.
#[derive(Serialize)]
struct IdempotencyMaterial<'a> {
    /// Task type label.
    task_type: &'a str,
    /// Opaque worker payload.
    payload: &'a Value,
    /// Owning plan identifier.
    plan_id: &'a str,
    /// Deployment stage label.
    stage: &'a str,
}

/// Computes the deduplication key for a prospective task.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when the payload cannot be
/// canonicalized.
pub fn idempotency_key(
    task_type: TaskType,
    payload: &Value,
    plan_id: &PlanId,
    stage: Stage,
) -> Result<String, HashError> {
    hash_canonical_json(&IdempotencyMaterial {
        task_type: task_type.as_str(),
        payload,
        plan_id: plan_id.as_str(),
        stage: stage.as_str(),
    })
}

// ============================================================================
// SECTION: Heartbeat
// ============================================================================

/// Per-task telemetry snapshot emitted by workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Task the heartbeat belongs to.
    pub task_id: TaskId,
    /// Worker emitting the heartbeat.
    pub owner: Owner,
    /// Emission time in unix milliseconds.
    pub ts_ms: i64,
    /// Observed contractivity proxy.
    pub rho: f64,
    /// Observed reflexivity score.
    pub sr_score: f64,
    /// Observed amplification factor.
    pub caos_post: f64,
    /// Elapsed execution time in milliseconds.
    pub elapsed_ms: u64,
    /// Deployment stage at emission.
    pub stage: Stage,
    /// Free-form worker metrics.
    #[serde(default)]
    pub metrics: Value,
}

// ============================================================================
// SECTION: Canary Windows
// ============================================================================

/// Status of a canary comparison window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanaryStatus {
    /// Window is collecting telemetry.
    Open,
    /// Criteria passed; candidate may promote.
    Promote,
    /// Criteria failed; candidate must roll back.
    Rollback,
    /// Window aged out without an evaluation.
    Timeout,
    /// Metric snapshots were never populated.
    Missing,
}

impl CanaryStatus {
    /// Returns the stable string label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Promote => "promote",
            Self::Rollback => "rollback",
            Self::Timeout => "timeout",
            Self::Missing => "missing",
        }
    }

    /// Parses a status from its stable label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "open" => Some(Self::Open),
            "promote" => Some(Self::Promote),
            "rollback" => Some(Self::Rollback),
            "timeout" => Some(Self::Timeout),
            "missing" => Some(Self::Missing),
            _ => None,
        }
    }
}

/// Rollback thresholds applied when evaluating a window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CanaryCriteria {
    /// Maximum tolerated canary-minus-baseline contractivity spike.
    pub rho_spike_max: f64,
    /// Maximum tolerated baseline-minus-canary reflexivity drop.
    pub sr_drop_max: f64,
    /// Maximum tolerated relative perplexity regression.
    pub ppl_regress_max: f64,
}

impl Default for CanaryCriteria {
    fn default() -> Self {
        Self {
            rho_spike_max: 0.05,
            sr_drop_max: 0.05,
            ppl_regress_max: 0.10,
        }
    }
}

/// Metric snapshot captured on one side of a canary comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryMetrics {
    /// Contractivity proxy.
    pub rho: f64,
    /// Reflexivity score.
    pub sr_score: f64,
    /// Out-of-distribution perplexity.
    pub ppl_ood: f64,
    /// Free-form additional telemetry.
    #[serde(default)]
    pub extra: Value,
}

/// Time-bounded baseline-versus-canary comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryWindow {
    /// Window identifier.
    pub window_id: WindowId,
    /// Owning plan.
    pub plan_id: PlanId,
    /// Share of traffic routed to the canary, in `[0, 100]`.
    pub traffic_pct: f64,
    /// Window duration in seconds.
    pub duration_s: u64,
    /// Rollback thresholds.
    pub criteria: CanaryCriteria,
    /// Window status.
    pub status: CanaryStatus,
    /// Opening time in unix milliseconds.
    pub opened_ms: i64,
    /// Evaluation time in unix milliseconds, when evaluated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluated_ms: Option<i64>,
    /// Baseline metric snapshot (populated out-of-band).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_baseline: Option<CanaryMetrics>,
    /// Canary metric snapshot (populated out-of-band).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_canary: Option<CanaryMetrics>,
}
