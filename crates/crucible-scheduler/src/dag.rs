// crucible-scheduler/src/dag.rs
// ============================================================================
// Module: Crucible DAG Builder
// Description: Plan-round task construction into the durable queue.
// Purpose: Turn one plan into its four-task pipeline round, idempotently.
// Dependencies: crucible-core, crucible-store, serde_json
// ============================================================================

//! ## Overview
//! A plan round is a mini-DAG of four tasks: F3 acquisition, F4 mutation,
//! F5 fusion, F6 rewrite. F5 and F6 are risk-reducing and bypass the risk
//! gates; F4 carries the larger expected gain. Task identity derives from the
//! idempotency key, so rebuilding the same round is a no-op.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crucible_core::CostVector;
use crucible_core::DEFAULT_MAX_ATTEMPTS;
use crucible_core::DEFAULT_TASK_TTL_S;
use crucible_core::EventKind;
use crucible_core::HashError;
use crucible_core::Ledger;
use crucible_core::LedgerError;
use crucible_core::Plan;
use crucible_core::PlanError;
use crucible_core::RiskBound;
use crucible_core::Stage;
use crucible_core::Task;
use crucible_core::TaskId;
use crucible_core::TaskStatus;
use crucible_core::TaskType;
use crucible_core::idempotency_key;
use crucible_core::time::unix_millis_now;
use crucible_store::QueueStore;
use crucible_store::StoreError;
use serde_json::json;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Expected gain for the mutation task.
const MUTATION_EXPECTED_GAIN: f64 = 0.15;

/// Expected gain for the remaining pipeline tasks.
const DEFAULT_EXPECTED_GAIN: f64 = 0.10;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// DAG construction failures.
#[derive(Debug, Error)]
pub enum DagError {
    /// Plan failed validation.
    #[error("invalid plan: {0}")]
    Plan(#[from] PlanError),
    /// Canonical hashing failed.
    #[error("hash failure: {0}")]
    Hash(#[from] HashError),
    /// Queue store failure.
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
    /// Ledger failure.
    #[error("ledger failure: {0}")]
    Ledger(#[from] LedgerError),
}

// ============================================================================
// SECTION: Builder
// ============================================================================

/// Builds one plan round into the queue and returns the four task ids.
///
/// Re-invoking for the same plan and stage deduplicates on the idempotency
/// keys: existing ids are returned and no duplicate enqueue events are
/// recorded.
///
/// # Errors
///
/// Returns [`DagError`] on validation, storage, or ledger failure.
pub fn build_plan_round(
    store: &QueueStore,
    ledger: &Ledger,
    plan: &Plan,
    stage: Stage,
) -> Result<Vec<TaskId>, DagError> {
    plan.validate()?;
    let plan_hash = plan.canonical_hash()?;

    ledger.record(
        EventKind::PlanRoundStart,
        json!({
            "plan": plan.id.as_str(),
            "plan_hash": plan_hash,
            "stage": stage.as_str(),
        }),
    )?;
    store.init_budget(&plan.id, &plan.budgets)?;

    let now_ms = unix_millis_now();
    let mut task_ids = Vec::with_capacity(4);
    for task_type in [TaskType::F3, TaskType::F4, TaskType::F5, TaskType::F6] {
        let task = round_task(plan, &plan_hash, task_type, stage, now_ms)?;
        let outcome = store.push(&task)?;
        if outcome.inserted {
            ledger.record(
                EventKind::Enqueue,
                json!({
                    "task": outcome.task_id.as_str(),
                    "type": task_type.as_str(),
                    "plan": plan.id.as_str(),
                    "domain": task.domain.as_str(),
                    "priority": task.priority,
                }),
            )?;
        }
        task_ids.push(outcome.task_id);
    }
    Ok(task_ids)
}

/// Builds one pipeline task for a plan round.
fn round_task(
    plan: &Plan,
    plan_hash: &str,
    task_type: TaskType,
    stage: Stage,
    now_ms: i64,
) -> Result<Task, DagError> {
    let payload = json!({
        "plan": plan.id.as_str(),
        "plan_hash": plan_hash,
        "task": task_type.as_str(),
    });
    let key = idempotency_key(task_type, &payload, &plan.id, stage)?;
    let task_id = TaskId::new(format!("task_{}", key.get(..12).unwrap_or(&key)));
    let priority = plan
        .priority_map
        .get(&task_type)
        .copied()
        .unwrap_or_else(|| task_type.default_priority());
    let expected_gain = if task_type == TaskType::F4 {
        MUTATION_EXPECTED_GAIN
    } else {
        DEFAULT_EXPECTED_GAIN
    };
    let risk_reduction = matches!(task_type, TaskType::F5 | TaskType::F6);

    Ok(Task {
        id: task_id,
        task_type,
        payload,
        priority,
        plan_id: plan.id.clone(),
        stage,
        created_ms: now_ms,
        status: TaskStatus::Pending,
        attempts: 0,
        max_attempts: DEFAULT_MAX_ATTEMPTS,
        idempotency_key: key,
        expected_gain,
        expected_cost: CostVector::default(),
        risk_bound: RiskBound::default(),
        tr_radius: 0.12,
        ttl_s: DEFAULT_TASK_TTL_S,
        lease_until_ms: None,
        owner: None,
        domain: task_type.default_domain(),
        risk_reduction,
    })
}
