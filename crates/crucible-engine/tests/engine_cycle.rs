// crates/crucible-engine/tests/engine_cycle.rs
// ============================================================================
// Module: Engine Cycle Integration Tests
// Description: End-to-end mutation cycles against a real ledger.
// Purpose: Validate determinism, trust-region containment, gate aborts,
//          diversity, and bundle packaging.
// ============================================================================

//! ## Overview
//! Integration tests for the mutation engine:
//! - Two identical runs produce byte-identical archives and candidate ids
//! - Every bundled candidate respects the trust region
//! - Every selected candidate carries a positive score
//! - Entry-gate violations abort without producing a bundle
//! - Diversity floor holds or fillers are reported

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::collections::BTreeMap;
use std::fs;

use crucible_core::AcquisitionReport;
use crucible_core::Budgets;
use crucible_core::Constraints;
use crucible_core::Goal;
use crucible_core::Ledger;
use crucible_core::Plan;
use crucible_core::PlanId;
use crucible_core::SystemState;
use crucible_engine::EngineConfig;
use crucible_engine::EngineError;
use crucible_engine::EvolveRequest;
use crucible_engine::MutationEngine;
use crucible_engine::default_space;
use crucible_engine::diversity::candidate_diversity;

/// Returns a healthy state for engine cycles.
fn healthy_state() -> SystemState {
    SystemState {
        ece: 0.006,
        bias_ratio: 1.02,
        rho: 0.72,
        rho_bias: 1.01,
        uncertainty: 0.18,
        sr_score: 0.85,
        caos_post: 1.4,
        global_coherence: 0.9,
        delta_linf: 0.015,
        ppl_ood: 92.0,
        mdl_gain: 0.02,
        trust_region_radius: 0.12,
        consent: true,
        eco_ok: true,
        cycle_count: 0,
        delta_linf_pred: 0.0,
        mdl_gain_pred: 0.0,
        ppl_ood_pred: 0.0,
        capabilities: crucible_core::Capabilities::default(),
        hashes: Vec::new(),
        proof_ids: Vec::new(),
    }
}

/// Returns the demo plan used across engine tests.
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
        u_signal: "improve retrieval quality".to_string(),
    }
}

/// Returns an acquisition report with anchor evidence.
fn demo_acquisition(plan: &Plan) -> AcquisitionReport {
    let mut report = AcquisitionReport::neutral(plan.canonical_hash().expect("hash"));
    report.novelty_sim = 0.6;
    report.rag_recall = 0.8;
    report.questions = vec![
        "does rerank improve retrieval precision".to_string(),
        "when should the learner self check".to_string(),
    ];
    report.n_docs = 40;
    report.n_chunks = 400;
    report
}

/// Runs one full cycle in a fresh temp workspace.
fn run_cycle(dir: &tempfile::TempDir, seed: u64) -> crucible_engine::EvolveOutcome {
    let ledger = Ledger::open(dir.path().join("worm.jsonl")).expect("ledger");
    let config = EngineConfig::with_artifact_dir(dir.path().join("bundles"));
    let mut engine = MutationEngine::new(config, default_space()).expect("engine");
    let plan = demo_plan();
    let acq = demo_acquisition(&plan);
    engine
        .evolve(
            &ledger,
            &healthy_state(),
            &plan,
            &acq,
            &EvolveRequest {
                n_candidates: Some(32),
                top_k: Some(5),
                seed,
            },
        )
        .expect("cycle")
}

#[test]
fn identical_inputs_replay_to_identical_bundles() {
    let dir_a = tempfile::tempdir().expect("tempdir");
    let dir_b = tempfile::tempdir().expect("tempdir");
    let outcome_a = run_cycle(&dir_a, 42);
    let outcome_b = run_cycle(&dir_b, 42);

    assert_eq!(outcome_a.bundle.bundle_id, outcome_b.bundle.bundle_id);
    let ids_a: Vec<&str> =
        outcome_a.bundle.top_k.iter().map(|c| c.cand_id.as_str()).collect();
    let ids_b: Vec<&str> =
        outcome_b.bundle.top_k.iter().map(|c| c.cand_id.as_str()).collect();
    assert_eq!(ids_a, ids_b);

    let archive_a = fs::read(&outcome_a.bundle.artifact_path).expect("archive a");
    let archive_b = fs::read(&outcome_b.bundle.artifact_path).expect("archive b");
    assert_eq!(archive_a, archive_b, "bundle archives must be byte-identical");

    assert_eq!(
        outcome_a.bundle.manifest_bytes().expect("manifest"),
        outcome_b.bundle.manifest_bytes().expect("manifest")
    );
}

#[test]
fn different_seeds_produce_different_bundles() {
    let dir_a = tempfile::tempdir().expect("tempdir");
    let dir_b = tempfile::tempdir().expect("tempdir");
    let outcome_a = run_cycle(&dir_a, 42);
    let outcome_b = run_cycle(&dir_b, 43);
    assert_ne!(outcome_a.bundle.bundle_id, outcome_b.bundle.bundle_id);
}

#[test]
fn every_bundled_candidate_respects_the_trust_region() {
    let dir = tempfile::tempdir().expect("tempdir");
    let outcome = run_cycle(&dir, 7);
    let radius = healthy_state().trust_region_radius;
    for candidate in &outcome.bundle.top_k {
        assert!(
            candidate.distance_to_base <= radius * (1.0 + 1e-6),
            "candidate {} at distance {} exceeds radius {}",
            candidate.cand_id,
            candidate.distance_to_base,
            radius
        );
    }
}

#[test]
fn every_selected_candidate_scores_positive() {
    let dir = tempfile::tempdir().expect("tempdir");
    let outcome = run_cycle(&dir, 11);
    assert!(!outcome.bundle.top_k.is_empty());
    for candidate in &outcome.bundle.top_k {
        assert!(candidate.score > 0.0, "candidate {} scored zero", candidate.cand_id);
    }
}

#[test]
fn diversity_floor_holds_or_fillers_are_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let outcome = run_cycle(&dir, 13);
    let summary = &outcome.bundle.diversity_summary;
    if outcome.bundle.top_k.len() >= 2 && summary.greedy_fill == 0 {
        assert!(
            summary.min_pairwise >= summary.min_threshold,
            "min pairwise {} under floor {} without fillers",
            summary.min_pairwise,
            summary.min_threshold
        );
    }
    // Cross-check the summary against the actual pairwise values.
    let max_score = outcome.bundle.top_k.first().map_or(0.0, |c| c.score);
    for (position, left) in outcome.bundle.top_k.iter().enumerate() {
        for right in outcome.bundle.top_k.iter().skip(position + 1) {
            let diversity = candidate_diversity(
                &crucible_engine::DiversityConfig::default(),
                left,
                right,
                max_score,
            );
            assert!(diversity >= summary.min_pairwise - 1e-9);
        }
    }
}

#[test]
fn entry_gate_violation_aborts_without_a_bundle() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ledger = Ledger::open(dir.path().join("worm.jsonl")).expect("ledger");
    let config = EngineConfig::with_artifact_dir(dir.path().join("bundles"));
    let mut engine = MutationEngine::new(config, default_space()).expect("engine");
    let plan = demo_plan();
    let acq = demo_acquisition(&plan);

    let mut state = healthy_state();
    state.ece = 0.02;
    let result = engine.evolve(&ledger, &state, &plan, &acq, &EvolveRequest::default());
    assert!(matches!(result, Err(EngineError::EntryGate { .. })));
    assert!(!dir.path().join("bundles").exists(), "no bundle directory may appear");
    assert!(ledger.verify_chain().expect("verify") >= 1, "abort must be recorded");
}

#[test]
fn state_projection_counts_the_cycle_and_carries_proofs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let outcome = run_cycle(&dir, 17);
    assert_eq!(outcome.state.cycle_count, 1);
    assert!(outcome.state.delta_linf_pred >= 0.0);
    assert!(outcome.state.ppl_ood_pred >= 1.0);
    assert!(outcome.state.hashes.len() >= 2, "plan hash and candidate hash expected");
    assert!(!outcome.state.proof_ids.is_empty(), "start proof expected");
}

#[test]
fn archive_contains_manifest_and_patches() {
    let dir = tempfile::tempdir().expect("tempdir");
    let outcome = run_cycle(&dir, 19);
    let file = fs::File::open(&outcome.bundle.artifact_path).expect("open archive");
    let mut archive = zip::ZipArchive::new(file).expect("read archive");
    let names: Vec<String> = (0..archive.len())
        .map(|index| archive.by_index(index).expect("entry").name().to_string())
        .collect();
    assert!(names.contains(&"manifest.json".to_string()));
    let patch_count = names.iter().filter(|name| name.starts_with("patches/")).count();
    assert_eq!(patch_count, outcome.bundle.top_k.len());
}
