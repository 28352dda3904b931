// crates/crucible-core/tests/model_validation.rs
// ============================================================================
// Module: Core Model Validation Tests
// Description: Bound checks for state, plan, and task records.
// Purpose: Validate declared attribute bounds and idempotency hashing.
// ============================================================================

//! ## Overview
//! Unit-level tests for the shared data model:
//! - State bound validation (rho, trust region, unit intervals)
//! - Plan validation (goals, budgets)
//! - Idempotency key stability and sensitivity

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::collections::BTreeMap;

use crucible_core::Budgets;
use crucible_core::Constraints;
use crucible_core::Goal;
use crucible_core::Plan;
use crucible_core::PlanError;
use crucible_core::PlanId;
use crucible_core::Stage;
use crucible_core::StateError;
use crucible_core::SystemState;
use crucible_core::TaskType;
use crucible_core::idempotency_key;
use serde_json::json;

/// Returns a healthy state within every declared bound.
fn healthy_state() -> SystemState {
    SystemState {
        ece: 0.006,
        bias_ratio: 1.02,
        rho: 0.72,
        rho_bias: 1.01,
        uncertainty: 0.18,
        sr_score: 0.85,
        caos_post: 1.3,
        global_coherence: 0.9,
        delta_linf: 0.015,
        ppl_ood: 92.0,
        mdl_gain: 0.02,
        trust_region_radius: 0.12,
        consent: true,
        eco_ok: true,
        cycle_count: 7,
        delta_linf_pred: 0.0,
        mdl_gain_pred: 0.0,
        ppl_ood_pred: 0.0,
        capabilities: crucible_core::Capabilities::default(),
        hashes: Vec::new(),
        proof_ids: Vec::new(),
    }
}

/// Returns a minimal valid plan.
fn demo_plan() -> Plan {
    Plan {
        id: PlanId::new("plan_demo_001"),
        goals: vec![Goal {
            name: "reduce ood perplexity".to_string(),
            metric: "ppl_ood".to_string(),
            target: 90.0,
            tolerance: 2.0,
        }],
        constraints: Constraints::default(),
        budgets: Budgets {
            max_cost: 10.0,
            max_tokens: 100_000,
            max_llm_calls: 200,
            max_latency_ms: 600_000,
            max_cpu_s: 3_600.0,
        },
        priority_map: BTreeMap::new(),
        promotion_policy: String::new(),
        rollback_policy: String::new(),
        u_signal: String::new(),
    }
}

#[test]
fn healthy_state_validates() {
    healthy_state().validate().expect("valid state");
}

#[test]
fn contractivity_at_one_is_rejected() {
    let mut state = healthy_state();
    state.rho = 1.0;
    assert!(matches!(state.validate(), Err(StateError::ContractivityViolated { .. })));
}

#[test]
fn trust_region_above_half_is_rejected() {
    let mut state = healthy_state();
    state.trust_region_radius = 0.6;
    assert!(matches!(state.validate(), Err(StateError::TrustRegionOutOfRange { .. })));
}

#[test]
fn ece_outside_unit_interval_is_rejected() {
    let mut state = healthy_state();
    state.ece = 1.2;
    assert!(matches!(state.validate(), Err(StateError::OutsideUnitInterval { .. })));
}

#[test]
fn state_hash_is_sensitive_to_predictions() {
    let base = healthy_state();
    let mut predicted = base.clone();
    predicted.delta_linf_pred = 0.01;
    assert_ne!(
        base.canonical_hash().expect("hash"),
        predicted.canonical_hash().expect("hash")
    );
}

#[test]
fn plan_without_goals_is_rejected() {
    let mut plan = demo_plan();
    plan.goals.clear();
    assert!(matches!(plan.validate(), Err(PlanError::MissingGoals)));
}

#[test]
fn plan_with_zero_tokens_is_rejected() {
    let mut plan = demo_plan();
    plan.budgets.max_tokens = 0;
    assert!(matches!(plan.validate(), Err(PlanError::NonPositiveBudget("max_tokens"))));
}

#[test]
fn idempotency_key_is_stable_and_payload_sensitive() {
    let plan_id = PlanId::new("plan_demo_001");
    let payload = json!({"round": 1});
    let first = idempotency_key(TaskType::F4, &payload, &plan_id, Stage::Shadow).expect("key");
    let second = idempotency_key(TaskType::F4, &payload, &plan_id, Stage::Shadow).expect("key");
    assert_eq!(first, second);

    let other_payload = idempotency_key(TaskType::F4, &json!({"round": 2}), &plan_id, Stage::Shadow)
        .expect("key");
    assert_ne!(first, other_payload);

    let other_stage = idempotency_key(TaskType::F4, &payload, &plan_id, Stage::Canary).expect("key");
    assert_ne!(first, other_stage);
}
