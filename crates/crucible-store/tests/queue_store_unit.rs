// crates/crucible-store/tests/queue_store_unit.rs
// ============================================================================
// Module: Queue Store Unit Tests
// Description: Targeted durability tests for the SQLite queue store.
// Purpose: Validate idempotent push, lease lifecycle, expiry, budgets,
//          breakers, and canary persistence.
// ============================================================================

//! ## Overview
//! Unit-level tests for queue store invariants:
//! - Idempotent push on the deduplication key
//! - Lease compare-and-set and expiry sweep
//! - Failure retry up to max attempts, then dead
//! - Budget debits flipping plans to blocked
//! - Breaker open after consecutive failures, close on success
//! - Canary window round trip with out-of-band metrics

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use crucible_core::Budgets;
use crucible_core::CanaryCriteria;
use crucible_core::CanaryMetrics;
use crucible_core::CanaryStatus;
use crucible_core::CanaryWindow;
use crucible_core::CostVector;
use crucible_core::Owner;
use crucible_core::PlanId;
use crucible_core::RiskBound;
use crucible_core::Stage;
use crucible_core::Task;
use crucible_core::TaskId;
use crucible_core::TaskStatus;
use crucible_core::TaskType;
use crucible_core::WindowId;
use crucible_core::idempotency_key;
use crucible_store::BudgetStatus;
use crucible_store::QueueStore;
use crucible_store::StoreConfig;
use serde_json::json;

/// Opens a fresh store in a temp directory.
fn fresh_store(dir: &tempfile::TempDir) -> QueueStore {
    QueueStore::open(&StoreConfig::new(dir.path().join("queue.db"))).expect("open store")
}

/// Builds a pending task for the demo plan.
fn demo_task(id: &str, task_type: TaskType) -> Task {
    let plan_id = PlanId::new("plan_demo_001");
    let payload = json!({"round": 1});
    let key = idempotency_key(task_type, &payload, &plan_id, Stage::Shadow).expect("key");
    Task {
        id: TaskId::new(id),
        task_type,
        payload,
        priority: task_type.default_priority(),
        plan_id,
        stage: Stage::Shadow,
        created_ms: 1_000,
        status: TaskStatus::Pending,
        attempts: 0,
        max_attempts: 3,
        idempotency_key: key,
        expected_gain: 0.10,
        expected_cost: CostVector::default(),
        risk_bound: RiskBound::default(),
        tr_radius: 0.12,
        ttl_s: 86_400,
        lease_until_ms: None,
        owner: None,
        domain: task_type.default_domain(),
        risk_reduction: false,
    }
}

#[test]
fn push_is_idempotent_on_the_deduplication_key() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = fresh_store(&dir);

    let first = store.push(&demo_task("t1", TaskType::F4)).expect("push");
    assert!(first.inserted);
    let second = store.push(&demo_task("t2", TaskType::F4)).expect("push");
    assert!(!second.inserted);
    assert_eq!(second.task_id.as_str(), "t1");

    assert_eq!(store.snapshot().expect("snapshot").pending, 1);
}

#[test]
fn lease_is_compare_and_set() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = fresh_store(&dir);
    store.push(&demo_task("t1", TaskType::F3)).expect("push");

    let owner = Owner::new("worker-a");
    assert!(store.lease(&TaskId::new("t1"), &owner, 10_000).expect("lease"));
    assert!(
        !store.lease(&TaskId::new("t1"), &Owner::new("worker-b"), 10_000).expect("lease"),
        "a leased task must not lease again"
    );

    let task = store.get(&TaskId::new("t1")).expect("get");
    assert_eq!(task.status, TaskStatus::Leased);
    assert_eq!(task.attempts, 1);
}

#[test]
fn expired_leases_sweep_back_to_pending() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = fresh_store(&dir);
    store.push(&demo_task("t1", TaskType::F5)).expect("push");
    store.lease(&TaskId::new("t1"), &Owner::new("worker-a"), 5_000).expect("lease");

    assert!(store.expire_leases(4_999).expect("expire").is_empty());
    let expired = store.expire_leases(5_001).expect("expire");
    assert_eq!(expired.len(), 1);
    assert_eq!(store.get(&TaskId::new("t1")).expect("get").status, TaskStatus::Pending);
}

#[test]
fn failures_retry_until_attempts_exhaust() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = fresh_store(&dir);
    store.push(&demo_task("t1", TaskType::F4)).expect("push");
    let id = TaskId::new("t1");
    let owner = Owner::new("worker-a");

    for attempt in 1..=3 {
        assert!(store.lease(&id, &owner, 10_000).expect("lease"));
        let status = store.fail(&id, false).expect("fail");
        if attempt < 3 {
            assert_eq!(status, TaskStatus::Pending, "attempt {attempt} should retry");
        } else {
            assert_eq!(status, TaskStatus::Dead, "attempts must exhaust to dead");
        }
    }
    assert!(!store.lease(&id, &owner, 10_000).expect("lease"), "dead tasks never lease");
}

#[test]
fn permanent_failure_skips_retries() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = fresh_store(&dir);
    store.push(&demo_task("t1", TaskType::F6)).expect("push");
    let id = TaskId::new("t1");
    store.lease(&id, &Owner::new("worker-a"), 10_000).expect("lease");
    assert_eq!(store.fail(&id, true).expect("fail"), TaskStatus::Dead);
}

#[test]
fn budget_debits_flip_plans_to_blocked() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = fresh_store(&dir);
    let plan_id = PlanId::new("plan_demo_001");
    let budgets = Budgets {
        max_cost: 0.05,
        max_tokens: 10_000,
        max_llm_calls: 10,
        max_latency_ms: 60_000,
        max_cpu_s: 10.0,
    };
    store.init_budget(&plan_id, &budgets).expect("init");
    assert_eq!(store.budget_status(&plan_id).expect("status"), BudgetStatus::Open);

    let spend = CostVector {
        tokens: 500.0,
        latency_ms: 800.0,
        cpu_s: 0.5,
        cost: 0.04,
    };
    assert_eq!(store.debit_budget(&plan_id, &spend, 1).expect("debit"), BudgetStatus::Open);
    assert_eq!(
        store.debit_budget(&plan_id, &spend, 1).expect("debit"),
        BudgetStatus::Blocked,
        "second debit exceeds max_cost"
    );
    assert_eq!(store.budget_status(&plan_id).expect("status"), BudgetStatus::Blocked);
    let snapshot = store.snapshot().expect("snapshot");
    assert_eq!(snapshot.blocked_plans, vec!["plan_demo_001".to_string()]);
}

#[test]
fn breaker_opens_after_threshold_and_closes_on_success() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = fresh_store(&dir);
    let domain = TaskType::F4.default_domain();

    assert!(!store.breaker_failure(&domain).expect("failure"));
    assert!(!store.breaker_failure(&domain).expect("failure"));
    assert!(store.breaker_failure(&domain).expect("failure"), "third failure opens");
    assert!(store.breaker_open(&domain).expect("open"));

    assert!(store.breaker_success(&domain).expect("success"), "success closes");
    assert!(!store.breaker_open(&domain).expect("open"));
}

#[test]
fn canary_window_round_trips_with_fed_metrics() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = fresh_store(&dir);
    let window = CanaryWindow {
        window_id: WindowId::new("w1"),
        plan_id: PlanId::new("plan_demo_001"),
        traffic_pct: 5.0,
        duration_s: 300,
        criteria: CanaryCriteria::default(),
        status: CanaryStatus::Open,
        opened_ms: 1_000,
        evaluated_ms: None,
        metrics_baseline: None,
        metrics_canary: None,
    };
    store.insert_window(&window).expect("insert");

    let baseline = CanaryMetrics {
        rho: 0.72,
        sr_score: 0.85,
        ppl_ood: 92.0,
        extra: json!({}),
    };
    let canary = CanaryMetrics {
        rho: 0.74,
        sr_score: 0.84,
        ppl_ood: 93.0,
        extra: json!({"error_rate": 0.001}),
    };
    store
        .feed_window_metrics(&WindowId::new("w1"), Some(&baseline), Some(&canary))
        .expect("feed");
    store
        .update_window_status(&WindowId::new("w1"), CanaryStatus::Promote, Some(301_000))
        .expect("update");

    let loaded = store.get_window(&WindowId::new("w1")).expect("get");
    assert_eq!(loaded.status, CanaryStatus::Promote);
    assert_eq!(loaded.evaluated_ms, Some(301_000));
    assert_eq!(loaded.metrics_baseline.expect("baseline").rho, 0.72);
}

#[test]
fn reopen_preserves_queue_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("queue.db");
    {
        let store = QueueStore::open(&StoreConfig::new(&path)).expect("open");
        store.push(&demo_task("t1", TaskType::F3)).expect("push");
        store.lease(&TaskId::new("t1"), &Owner::new("worker-a"), 5_000).expect("lease");
    }
    let store = QueueStore::open(&StoreConfig::new(&path)).expect("reopen");
    let task = store.get(&TaskId::new("t1")).expect("get");
    assert_eq!(task.status, TaskStatus::Leased);
    let expired = store.expire_leases(6_000).expect("expire");
    assert_eq!(expired.len(), 1, "startup sweep recovers crashed workers");
}
