// crates/crucible-governance/tests/promotion_flow.rs
// ============================================================================
// Module: Promotion Flow Integration Tests
// Description: End-to-end promotion, rejection, quarantine, rollback, and
//              freeze scenarios over a real release tree.
// Purpose: Validate the fail-closed cascade and the atomic publish machinery.
// ============================================================================

//! ## Overview
//! Integration tests for the governance hub:
//! - Happy promotion publishes atomically with a signed manifest
//! - Ethics violations reject without touching the release tree
//! - Canary rejections short-circuit before staging
//! - DLP hits quarantine the staged tree and never publish
//! - Rollback restores the pre-release world and quarantines the release
//! - Freeze blocks promotion without extra ledger appends

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crucible_core::Budgets;
use crucible_core::Constraints;
use crucible_core::Goal;
use crucible_core::Ledger;
use crucible_core::Plan;
use crucible_core::PlanId;
use crucible_core::SystemState;
use crucible_governance::ArtifactSpec;
use crucible_governance::CanaryDecision;
use crucible_governance::CanaryInput;
use crucible_governance::ExecutionBundle;
use crucible_governance::GovernanceHub;
use crucible_governance::PromotionStatus;
use crucible_governance::ReleaseManifest;
use crucible_governance::SigningSecret;
use crucible_governance::VersionBump;
use serde_json::json;

/// Returns a state passing every governance gate.
fn healthy_state() -> SystemState {
    SystemState {
        ece: 0.006,
        bias_ratio: 1.02,
        rho: 0.72,
        rho_bias: 1.02,
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
        cycle_count: 3,
        delta_linf_pred: 0.01,
        mdl_gain_pred: 0.01,
        ppl_ood_pred: 92.0,
        capabilities: crucible_core::Capabilities::default(),
        hashes: Vec::new(),
        proof_ids: Vec::new(),
    }
}

/// Returns the demo plan.
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
        promotion_policy: "standard".to_string(),
        rollback_policy: "snapshot".to_string(),
        u_signal: String::new(),
    }
}

/// Builds an execution bundle with one model artifact.
fn demo_bundle(dir: &Path) -> ExecutionBundle {
    let model = dir.join("adapter.bin");
    std::fs::write(&model, b"weights").expect("write model");
    ExecutionBundle {
        artifacts: vec![ArtifactSpec {
            artifact_type: "model".to_string(),
            name: "adapter".to_string(),
            path: Some(model),
            uri: None,
        }],
        metrics: json!({"delta_linf": 0.015}),
        tables: Vec::new(),
        plots: Vec::new(),
        indices: Vec::new(),
        diffs: Vec::new(),
        impact: json!({"blast_radius": "low"}),
        dependencies: json!({}),
        checks: json!({"unit": "pass"}),
    }
}

/// Returns a promoting canary input.
fn promote_canary() -> CanaryInput {
    CanaryInput {
        decision: CanaryDecision::Promote,
        telemetry: json!({"error_rate": 0.001, "latency_p95": 118.3}),
    }
}

/// Opens a hub with a pinned signing secret in a temp root.
fn open_hub(dir: &tempfile::TempDir) -> (GovernanceHub, Arc<Ledger>) {
    let ledger = Arc::new(Ledger::open(dir.path().join("worm.jsonl")).expect("ledger"));
    let mut hub = GovernanceHub::open(dir.path(), Arc::clone(&ledger)).expect("hub");
    hub.set_secret(SigningSecret::from_key("integration-secret"));
    (hub, ledger)
}

/// Counts ledger events of one type.
fn count_events(ledger: &Ledger, event_type: &str) -> usize {
    std::fs::read_to_string(ledger.path())
        .expect("read ledger")
        .lines()
        .filter(|line| {
            serde_json::from_str::<serde_json::Value>(line)
                .ok()
                .and_then(|event| event.get("type").map(|t| t == &json!(event_type)))
                .unwrap_or(false)
        })
        .count()
}

#[test]
fn happy_promotion_publishes_atomically() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (hub, ledger) = open_hub(&dir);
    let outcome = hub
        .promote(
            &healthy_state(),
            &demo_plan(),
            &demo_bundle(dir.path()),
            &promote_canary(),
            "admin",
            VersionBump::Patch,
        )
        .expect("promote");

    assert_eq!(outcome.status, PromotionStatus::Published);
    assert_eq!(outcome.version.as_deref(), Some("0.0.1"));
    let release_id = outcome.release_id.expect("release id");
    assert!(release_id.starts_with("rel_"));

    let release_dir = dir.path().join("releases").join(&release_id);
    assert!(release_dir.join("manifest.json").exists());
    assert!(release_dir.join("policy_pack/policy_pack.json").exists());
    assert!(release_dir.join("evidence_pack/evidence_pack.json").exists());
    assert!(release_dir.join("evidence_pack/canary_telemetry.json").exists());
    assert!(release_dir.join("knowledge_pack/knowledge_pack.json").exists());
    assert!(release_dir.join("runbook/runbook.md").exists());
    assert!(release_dir.join("artifacts/model_adapter").exists());

    let current = dir.path().join("releases").join("current");
    let target = std::fs::read_link(&current).expect("current link");
    assert_eq!(target, std::path::PathBuf::from(&release_id));

    let catalog = hub.catalog().expect("catalog");
    assert_eq!(catalog.current.as_deref(), Some(release_id.as_str()));
    assert_eq!(catalog.latest_version(), Some("0.0.1"));

    assert_eq!(count_events(&ledger, "RELEASE_CREATED"), 1);
    assert_eq!(count_events(&ledger, "RELEASE_PUBLISHED"), 1);
    ledger.verify_chain().expect("chain intact");
}

#[test]
fn second_promotion_bumps_the_patch_version() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (hub, _ledger) = open_hub(&dir);
    let state = healthy_state();
    let plan = demo_plan();
    let first = hub
        .promote(&state, &plan, &demo_bundle(dir.path()), &promote_canary(), "admin", VersionBump::Patch)
        .expect("promote");
    assert_eq!(first.version.as_deref(), Some("0.0.1"));

    // Release ids hash the bundle, so the second round ships new evidence.
    let mut second_bundle = demo_bundle(dir.path());
    second_bundle.metrics = json!({"delta_linf": 0.018, "round": 2});
    let mut second_state = state;
    second_state.cycle_count += 1;
    let second = hub
        .promote(
            &second_state,
            &plan,
            &second_bundle,
            &promote_canary(),
            "admin",
            VersionBump::Patch,
        )
        .expect("promote");
    assert_eq!(second.version.as_deref(), Some("0.0.2"));
}

#[test]
fn ethics_violation_rejects_without_touching_the_tree() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (hub, ledger) = open_hub(&dir);
    let mut state = healthy_state();
    state.ece = 0.02;

    let outcome = hub
        .promote(
            &state,
            &demo_plan(),
            &demo_bundle(dir.path()),
            &promote_canary(),
            "admin",
            VersionBump::Patch,
        )
        .expect("promote");

    assert_eq!(outcome.status, PromotionStatus::Rejected);
    assert_eq!(outcome.reason.as_deref(), Some("Gate violations"));
    let report = outcome.gate_results.expect("gate results");
    let sigma = report.gate("sigma_guard").expect("sigma guard");
    assert!(sigma.violations.iter().any(|v| v == "ECE=0.0200 > 0.01"));

    assert_eq!(count_events(&ledger, "RELEASE_REJECTED_GATES"), 1);
    assert_eq!(count_events(&ledger, "RELEASE_PUBLISHED"), 0);
    assert!(hub.catalog().expect("catalog").releases.is_empty());
    let releases: Vec<_> = std::fs::read_dir(dir.path().join("releases"))
        .expect("read releases")
        .flatten()
        .filter(|entry| entry.file_name() != "_staging")
        .collect();
    assert!(releases.is_empty(), "no release directory may appear");
}

#[test]
fn canary_rollback_decision_rejects() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (hub, ledger) = open_hub(&dir);
    let canary = CanaryInput {
        decision: CanaryDecision::Rollback,
        telemetry: json!({"error_rate": 0.09}),
    };
    let outcome = hub
        .promote(
            &healthy_state(),
            &demo_plan(),
            &demo_bundle(dir.path()),
            &canary,
            "admin",
            VersionBump::Patch,
        )
        .expect("promote");
    assert_eq!(outcome.status, PromotionStatus::Rejected);
    assert_eq!(outcome.reason.as_deref(), Some("Canary rejection"));
    assert_eq!(count_events(&ledger, "RELEASE_REJECTED_CANARY"), 1);
}

#[test]
fn rbac_denies_unknown_publishers() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (hub, _ledger) = open_hub(&dir);
    let outcome = hub
        .promote(
            &healthy_state(),
            &demo_plan(),
            &demo_bundle(dir.path()),
            &promote_canary(),
            "intruder",
            VersionBump::Patch,
        )
        .expect("promote");
    assert_eq!(outcome.status, PromotionStatus::Rejected);
    assert_eq!(outcome.reason.as_deref(), Some("RBAC denied"));
}

#[test]
fn dlp_hit_quarantines_the_staged_tree() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (hub, ledger) = open_hub(&dir);
    let mut bundle = demo_bundle(dir.path());
    let table = dir.path().join("eval_table.csv");
    std::fs::write(&table, "metric,key\nauc,AKIA0123456789ABCDEF\n").expect("write table");
    bundle.tables.push(table);

    let outcome = hub
        .promote(
            &healthy_state(),
            &demo_plan(),
            &bundle,
            &promote_canary(),
            "admin",
            VersionBump::Patch,
        )
        .expect("promote");

    assert_eq!(outcome.status, PromotionStatus::Quarantined);
    let release_id = outcome.release_id.expect("release id");
    let violations = outcome.violations.expect("violations");
    let table_findings = violations
        .get("evidence_pack/eval_table.csv")
        .expect("table findings");
    assert!(table_findings.iter().any(|v| v.kind == "aws_key" && v.count == 1));

    assert!(dir.path().join("quarantine").join(format!("dlp_{release_id}")).exists());
    assert!(!dir.path().join("releases").join(&release_id).exists());
    assert_eq!(count_events(&ledger, "RELEASE_QUARANTINED_DLP"), 1);
    assert_eq!(count_events(&ledger, "RELEASE_PUBLISHED"), 0);
}

#[test]
fn rollback_restores_the_previous_world() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (hub, ledger) = open_hub(&dir);
    let plan = demo_plan();
    let first = hub
        .promote(
            &healthy_state(),
            &plan,
            &demo_bundle(dir.path()),
            &promote_canary(),
            "admin",
            VersionBump::Patch,
        )
        .expect("promote");
    let first_id = first.release_id.expect("first id");

    let mut later_state = healthy_state();
    later_state.cycle_count += 1;
    let mut later_bundle = demo_bundle(dir.path());
    later_bundle.metrics = json!({"delta_linf": 0.018, "round": 2});
    let second = hub
        .promote(
            &later_state,
            &plan,
            &later_bundle,
            &promote_canary(),
            "admin",
            VersionBump::Patch,
        )
        .expect("promote");
    let second_id = second.release_id.expect("second id");

    let outcome = hub.rollback(&second_id, "issue-42", "admin").expect("rollback");
    assert_eq!(outcome.status, PromotionStatus::Rollbacked);

    assert!(!dir.path().join("releases").join(&second_id).exists());
    let quarantined: Vec<_> = std::fs::read_dir(dir.path().join("quarantine"))
        .expect("read quarantine")
        .flatten()
        .filter(|entry| {
            entry.file_name().to_string_lossy().starts_with(&format!("rollback_{second_id}"))
        })
        .collect();
    assert_eq!(quarantined.len(), 1, "release tree moved to quarantine");

    let catalog = hub.catalog().expect("catalog");
    assert!(catalog.releases.iter().all(|entry| entry.id != second_id));
    assert_eq!(catalog.current.as_deref(), Some(first_id.as_str()));

    let target = std::fs::read_link(dir.path().join("releases").join("current"))
        .expect("current link");
    assert_eq!(target, std::path::PathBuf::from(&first_id));
    assert_eq!(count_events(&ledger, "RELEASE_ROLLBACKED"), 1);
    ledger.verify_chain().expect("chain intact");
}

#[test]
fn freeze_blocks_promotion_without_extra_ledger_appends() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (hub, ledger) = open_hub(&dir);
    let frozen = hub.freeze(true, "admin").expect("freeze");
    assert_eq!(frozen.status, PromotionStatus::Frozen);
    let chain_len = ledger.len();

    let outcome = hub
        .promote(
            &healthy_state(),
            &demo_plan(),
            &demo_bundle(dir.path()),
            &promote_canary(),
            "admin",
            VersionBump::Patch,
        )
        .expect("promote");
    assert_eq!(outcome.status, PromotionStatus::Rejected);
    assert_eq!(outcome.reason.as_deref(), Some("System frozen"));
    assert_eq!(ledger.len(), chain_len, "no append beyond the freeze event");

    let unfrozen = hub.freeze(false, "admin").expect("unfreeze");
    assert_eq!(unfrozen.status, PromotionStatus::Unfrozen);
    let after = hub
        .promote(
            &healthy_state(),
            &demo_plan(),
            &demo_bundle(dir.path()),
            &promote_canary(),
            "admin",
            VersionBump::Patch,
        )
        .expect("promote");
    assert_eq!(after.status, PromotionStatus::Published);
}

#[test]
fn manifest_signature_reproduces_byte_exact() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (hub, _ledger) = open_hub(&dir);
    let outcome = hub
        .promote(
            &healthy_state(),
            &demo_plan(),
            &demo_bundle(dir.path()),
            &promote_canary(),
            "admin",
            VersionBump::Patch,
        )
        .expect("promote");
    let release_id = outcome.release_id.expect("release id");

    let manifest_text = std::fs::read_to_string(
        dir.path().join("releases").join(&release_id).join("manifest.json"),
    )
    .expect("read manifest");
    let manifest: ReleaseManifest = serde_json::from_str(&manifest_text).expect("parse");

    let secret = SigningSecret::from_key("integration-secret");
    assert!(
        secret.verify(&manifest.signable(), &manifest.signature).expect("verify"),
        "recomputed signature must match byte-exact"
    );
    assert!(
        !SigningSecret::from_key("wrong")
            .verify(&manifest.signable(), &manifest.signature)
            .expect("verify"),
        "a different key must not verify"
    );
}

#[test]
fn performance_shortfall_still_publishes_with_recorded_failure() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (hub, _ledger) = open_hub(&dir);
    let mut state = healthy_state();
    state.delta_linf = 0.001;
    let outcome = hub
        .promote(
            &state,
            &demo_plan(),
            &demo_bundle(dir.path()),
            &promote_canary(),
            "admin",
            VersionBump::Patch,
        )
        .expect("promote");
    assert_eq!(outcome.status, PromotionStatus::Published);
    let report = outcome.gate_results.expect("gate results");
    let perf = report.gate("performance").expect("performance");
    assert!(!perf.passed, "shortfall is recorded");
}

#[test]
fn incomplete_publish_is_quarantined_on_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let orphan = dir.path().join("releases").join("rel_orphan");
    std::fs::create_dir_all(&orphan).expect("mkdir");
    std::fs::write(orphan.join("manifest.json"), "{}").expect("write");

    let (_hub, _ledger) = open_hub(&dir);
    assert!(!orphan.exists(), "orphan must leave the live tree");
    assert!(dir.path().join("quarantine").join("incomplete_rel_orphan").exists());
}
