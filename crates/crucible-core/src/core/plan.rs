// crucible-core/src/core/plan.rs
// ============================================================================
// Module: Crucible Plan Model
// Description: Plan, goal, constraint, and budget records from the planner.
// Purpose: Define the read-only planning input with validation helpers.
// Dependencies: crate::core::{hashing, identifiers, task}, serde
// ============================================================================

//! ## Overview
//! Plans arrive from the external strategic planner and are read-only inside
//! the control plane. Validation rejects plans the scheduler could never
//! execute (empty goals, non-positive budgets) before any task is enqueued.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::hashing::HashError;
use crate::core::hashing::hash_canonical_json;
use crate::core::identifiers::PlanId;
use crate::core::task::TaskType;

// ============================================================================
// SECTION: Goals
// ============================================================================

/// One ordered plan goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    /// Human-facing goal name.
    pub name: String,
    /// State attribute the goal targets.
    pub metric: String,
    /// Target value for the metric.
    pub target: f64,
    /// Acceptable absolute deviation from the target.
    pub tolerance: f64,
}

// ============================================================================
// SECTION: Constraints
// ============================================================================

/// Hard thresholds matching state attributes.
///
/// Absent thresholds defer to governance defaults downstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    /// Maximum expected calibration error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ece_max: Option<f64>,
    /// Maximum bias-weighted contractivity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rho_bias_max: Option<f64>,
    /// Maximum contractivity proxy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rho_max: Option<f64>,
    /// Minimum reflexivity score.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sr_tau: Option<f64>,
    /// Maximum aggregate uncertainty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncertainty_max: Option<f64>,
    /// Maximum out-of-distribution perplexity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ppl_ood_max: Option<f64>,
    /// Minimum observed improvement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_linf_min: Option<f64>,
}

// ============================================================================
// SECTION: Budgets
// ============================================================================

/// Per-plan resource ceilings in abstract units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budgets {
    /// Maximum abstract cost units.
    pub max_cost: f64,
    /// Maximum token spend.
    pub max_tokens: u64,
    /// Maximum LLM invocations.
    pub max_llm_calls: u64,
    /// Maximum cumulative latency in milliseconds.
    pub max_latency_ms: u64,
    /// Maximum cumulative CPU seconds.
    #[serde(default = "default_max_cpu_s")]
    pub max_cpu_s: f64,
}

/// Default CPU-second ceiling applied when the planner omits one.
const fn default_max_cpu_s() -> f64 {
    3_600.0
}

// ============================================================================
// SECTION: Plan
// ============================================================================

/// Read-only plan emitted by the external strategic planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Plan identifier.
    pub id: PlanId,
    /// Ordered goals.
    pub goals: Vec<Goal>,
    /// Hard constraints matching state attributes.
    #[serde(default)]
    pub constraints: Constraints,
    /// Resource budgets.
    pub budgets: Budgets,
    /// Task-type priority overrides.
    #[serde(default)]
    pub priority_map: BTreeMap<TaskType, i64>,
    /// Promotion policy label consumed by governance.
    #[serde(default)]
    pub promotion_policy: String,
    /// Rollback policy label consumed by governance.
    #[serde(default)]
    pub rollback_policy: String,
    /// Free-form driver text from the planner.
    #[serde(default)]
    pub u_signal: String,
}

impl Plan {
    /// Computes the canonical hash of the plan.
    ///
    /// # Errors
    ///
    /// Returns [`HashError::Canonicalization`] when serialization fails.
    pub fn canonical_hash(&self) -> Result<String, HashError> {
        hash_canonical_json(self)
    }

    /// Validates the plan before DAG construction.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError`] when the plan is unschedulable.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.goals.is_empty() {
            return Err(PlanError::MissingGoals);
        }
        if self.budgets.max_cost <= 0.0 {
            return Err(PlanError::NonPositiveBudget("max_cost"));
        }
        if self.budgets.max_tokens == 0 {
            return Err(PlanError::NonPositiveBudget("max_tokens"));
        }
        if self.budgets.max_llm_calls == 0 {
            return Err(PlanError::NonPositiveBudget("max_llm_calls"));
        }
        if self.budgets.max_latency_ms == 0 {
            return Err(PlanError::NonPositiveBudget("max_latency_ms"));
        }
        for goal in &self.goals {
            if goal.tolerance < 0.0 {
                return Err(PlanError::NegativeTolerance(goal.name.clone()));
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Plan validation errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Plan declared no goals.
    #[error("plan must declare at least one goal")]
    MissingGoals,
    /// A budget dimension is zero or negative.
    #[error("plan budget {0} must be positive")]
    NonPositiveBudget(&'static str),
    /// A goal tolerance is negative.
    #[error("goal {0} has a negative tolerance")]
    NegativeTolerance(String),
}
