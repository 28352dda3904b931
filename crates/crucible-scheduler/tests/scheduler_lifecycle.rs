// crates/crucible-scheduler/tests/scheduler_lifecycle.rs
// ============================================================================
// Module: Scheduler Lifecycle Integration Tests
// Description: Dispatcher loop, gates, breaker, watchdog, and canary tests.
// Purpose: Validate selection gating, at-least-once retries, breaker
//          transitions, anomaly reactions, and canary decisions.
// ============================================================================

//! ## Overview
//! Integration tests for the control loop:
//! - A healthy plan round runs all four tasks to done
//! - Fail-closed gates exclude tasks under Σ-Guard / IR→IC / SR violations
//! - Repeated worker failures open the domain breaker and kill the task
//! - The watchdog reacts to contractivity spikes and reflexivity drops
//! - Canary windows promote, roll back, or report missing telemetry

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crucible_core::Budgets;
use crucible_core::CanaryCriteria;
use crucible_core::CanaryMetrics;
use crucible_core::CanaryStatus;
use crucible_core::Constraints;
use crucible_core::Goal;
use crucible_core::Heartbeat;
use crucible_core::Ledger;
use crucible_core::Owner;
use crucible_core::Plan;
use crucible_core::PlanId;
use crucible_core::Stage;
use crucible_core::SystemState;
use crucible_core::TaskId;
use crucible_core::TaskStatus;
use crucible_core::TaskType;
use crucible_core::time::unix_millis_now;
use crucible_scheduler::CanaryManager;
use crucible_scheduler::Scheduler;
use crucible_scheduler::SchedulerConfig;
use crucible_scheduler::SimWorker;
use crucible_scheduler::Watchdog;
use crucible_scheduler::WatchdogAction;
use crucible_scheduler::WatchdogConfig;
use crucible_scheduler::build_plan_round;
use crucible_scheduler::score_task;
use crucible_store::QueueStore;
use crucible_store::StoreConfig;
use serde_json::json;
use tokio::sync::RwLock;
use tokio::sync::watch;

/// Returns a healthy state for scheduling.
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

/// Returns the demo plan for scheduling tests.
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

/// Shared test fixture.
struct Fixture {
    /// Durable queue store.
    store: Arc<QueueStore>,
    /// WORM ledger.
    ledger: Arc<Ledger>,
    /// Shared state view.
    state: Arc<RwLock<SystemState>>,
    /// Watchdog.
    watchdog: Arc<Watchdog>,
}

/// Builds the shared fixture inside a temp directory.
fn fixture(dir: &tempfile::TempDir) -> Fixture {
    Fixture {
        store: Arc::new(
            QueueStore::open(&StoreConfig::new(dir.path().join("queue.db"))).expect("store"),
        ),
        ledger: Arc::new(Ledger::open(dir.path().join("worm.jsonl")).expect("ledger")),
        state: Arc::new(RwLock::new(healthy_state())),
        watchdog: Arc::new(Watchdog::new(WatchdogConfig::default())),
    }
}

/// Returns a fast-tick scheduler configuration for tests.
fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        tick: Duration::from_millis(20),
        shutdown_grace: Duration::from_millis(500),
        ..SchedulerConfig::default()
    }
}

/// Counts ledger events of one type.
fn count_events(ledger: &Ledger, event_type: &str) -> usize {
    let text = std::fs::read_to_string(ledger.path()).expect("read ledger");
    text.lines()
        .filter(|line| {
            serde_json::from_str::<serde_json::Value>(line)
                .ok()
                .and_then(|event| {
                    event.get("type").map(|t| t == &json!(event_type))
                })
                .unwrap_or(false)
        })
        .count()
}

#[tokio::test(flavor = "multi_thread")]
async fn healthy_plan_round_runs_to_done() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fx = fixture(&dir);
    let plan = demo_plan();
    let task_ids =
        build_plan_round(&fx.store, &fx.ledger, &plan, Stage::Shadow).expect("round");
    assert_eq!(task_ids.len(), 4);

    let mut scheduler = Scheduler::new(
        Arc::clone(&fx.store),
        Arc::clone(&fx.ledger),
        Arc::clone(&fx.state),
        Arc::clone(&fx.watchdog),
        fast_config(),
    );
    for task_type in [TaskType::F3, TaskType::F4, TaskType::F5, TaskType::F6] {
        scheduler.register_worker(task_type, Arc::new(SimWorker::new()));
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let scheduler = Arc::new(scheduler);
    let runner = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run(stop_rx).await })
    };

    // Four tasks at one selection per tick plus execution time.
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    stop_tx.send(true).expect("signal");
    runner.await.expect("join").expect("run");

    for task_id in &task_ids {
        let task = fx.store.get(task_id).expect("get");
        assert_eq!(task.status, TaskStatus::Done, "task {task_id} must finish");
    }
    assert_eq!(count_events(&fx.ledger, "TASK_DONE"), 4);
    assert_eq!(count_events(&fx.ledger, "PLAN_ROUND_END"), 1);
    assert!(count_events(&fx.ledger, "SCHED_TAKE") >= 4);
    fx.ledger.verify_chain().expect("chain intact");
    assert_eq!(scheduler.infra_failures(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_failures_open_the_mutation_breaker() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fx = fixture(&dir);
    let plan = demo_plan();
    build_plan_round(&fx.store, &fx.ledger, &plan, Stage::Shadow).expect("round");

    let mut scheduler = Scheduler::new(
        Arc::clone(&fx.store),
        Arc::clone(&fx.ledger),
        Arc::clone(&fx.state),
        Arc::clone(&fx.watchdog),
        fast_config(),
    );
    scheduler.register_worker(TaskType::F3, Arc::new(SimWorker::new()));
    scheduler.register_worker(TaskType::F4, Arc::new(SimWorker::failing(3)));
    scheduler.register_worker(TaskType::F5, Arc::new(SimWorker::new()));
    scheduler.register_worker(TaskType::F6, Arc::new(SimWorker::new()));

    let (stop_tx, stop_rx) = watch::channel(false);
    let scheduler = Arc::new(scheduler);
    let runner = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run(stop_rx).await })
    };
    tokio::time::sleep(Duration::from_millis(2_000)).await;
    stop_tx.send(true).expect("signal");
    runner.await.expect("join").expect("run");

    let domain = TaskType::F4.default_domain();
    assert!(fx.store.breaker_open(&domain).expect("breaker"), "mutation breaker open");
    assert_eq!(count_events(&fx.ledger, "CB_OPEN"), 1);
    assert_eq!(count_events(&fx.ledger, "TASK_DEAD"), 1, "f4 exhausts retries");
    assert!(count_events(&fx.ledger, "TASK_FAIL") >= 3);

    // A success on the domain closes the breaker again.
    assert!(fx.store.breaker_success(&domain).expect("success"));
    assert!(!fx.store.breaker_open(&domain).expect("breaker"));
}

#[test]
fn fail_closed_gates_exclude_tasks() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fx = fixture(&dir);
    let plan = demo_plan();
    build_plan_round(&fx.store, &fx.ledger, &plan, Stage::Shadow).expect("round");
    let tasks = fx.store.sample_pending(10).expect("sample");
    let f4 = tasks.iter().find(|t| t.task_type == TaskType::F4).expect("f4");
    let f5 = tasks.iter().find(|t| t.task_type == TaskType::F5).expect("f5");
    let config = SchedulerConfig::default();
    let now_ms = unix_millis_now();

    let healthy = healthy_state();
    assert!(score_task(&config, &healthy, f4, now_ms) >= 0.0);

    let mut no_consent = healthy.clone();
    no_consent.consent = false;
    assert!(score_task(&config, &no_consent, f4, now_ms) < 0.0, "sigma guard excludes");
    assert!(score_task(&config, &no_consent, f5, now_ms) < 0.0, "sigma guard has no bypass");

    let mut hot = healthy.clone();
    hot.rho = 0.96;
    assert!(score_task(&config, &hot, f4, now_ms) < 0.0, "ir->ic excludes risk-neutral");
    assert!(score_task(&config, &hot, f5, now_ms) >= 0.0, "risk reduction bypasses ir->ic");

    let mut shaky = healthy.clone();
    shaky.sr_score = 0.70;
    assert!(score_task(&config, &shaky, f4, now_ms) < 0.0, "sr gate excludes risk-neutral");
    assert!(score_task(&config, &shaky, f5, now_ms) >= 0.0, "risk reduction bypasses sr");
}

#[test]
fn watchdog_reacts_to_spikes_drops_and_stalls() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ledger = Ledger::open(dir.path().join("worm.jsonl")).expect("ledger");
    let watchdog = Watchdog::new(WatchdogConfig::default());
    let plan_id = PlanId::new("plan_demo_001");

    let beat = |rho: f64, sr: f64, ts_ms: i64| Heartbeat {
        task_id: TaskId::new("t1"),
        owner: Owner::new("worker-a"),
        ts_ms,
        rho,
        sr_score: sr,
        caos_post: 1.3,
        elapsed_ms: 100,
        stage: Stage::Shadow,
        metrics: json!({}),
    };

    assert!(watchdog.observe(&ledger, &plan_id, &beat(0.72, 0.85, 1_000)).expect("observe").is_empty());
    let actions = watchdog.observe(&ledger, &plan_id, &beat(0.80, 0.85, 2_000)).expect("observe");
    assert!(matches!(actions.as_slice(), [WatchdogAction::Rollback { .. }]));
    assert_eq!(count_events(&ledger, "WATCHDOG_ROLLBACK"), 1);

    let actions = watchdog.observe(&ledger, &plan_id, &beat(0.80, 0.70, 3_000)).expect("observe");
    assert!(matches!(actions.as_slice(), [WatchdogAction::FreezePromotion { .. }]));
    assert_eq!(count_events(&ledger, "FREEZE_PROMOTION"), 1);

    let stalls = watchdog.check_stalls(&ledger, 3_000 + 600_001).expect("stalls");
    assert!(matches!(stalls.as_slice(), [WatchdogAction::Stall { .. }]));
    assert!(count_events(&ledger, "WATCHDOG_ALERT") >= 3);
    ledger.verify_chain().expect("chain intact");
}

#[test]
fn canary_windows_decide_from_fed_metrics() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(
        QueueStore::open(&StoreConfig::new(dir.path().join("queue.db"))).expect("store"),
    );
    let ledger = Arc::new(Ledger::open(dir.path().join("worm.jsonl")).expect("ledger"));
    let manager = CanaryManager::new(Arc::clone(&store), Arc::clone(&ledger));
    let plan_id = PlanId::new("plan_demo_001");
    let baseline = CanaryMetrics {
        rho: 0.72,
        sr_score: 0.85,
        ppl_ood: 92.0,
        extra: json!({}),
    };

    // Healthy canary promotes.
    let window = manager
        .open_window(&plan_id, 5.0, 0, CanaryCriteria::default())
        .expect("open");
    let canary = CanaryMetrics {
        rho: 0.73,
        sr_score: 0.84,
        ppl_ood: 93.0,
        extra: json!({"error_rate": 0.001, "latency_p95": 118.3}),
    };
    manager.feed_metrics(&window.window_id, Some(&baseline), Some(&canary)).expect("feed");
    assert_eq!(manager.evaluate(&window.window_id).expect("evaluate"), CanaryStatus::Promote);
    assert_eq!(count_events(&ledger, "CANARY_PROMOTE"), 1);

    // A contractivity spike rolls back.
    let window = manager
        .open_window(&plan_id, 5.0, 0, CanaryCriteria::default())
        .expect("open");
    let spiking = CanaryMetrics {
        rho: 0.80,
        sr_score: 0.85,
        ppl_ood: 92.0,
        extra: json!({}),
    };
    manager.feed_metrics(&window.window_id, Some(&baseline), Some(&spiking)).expect("feed");
    assert_eq!(manager.evaluate(&window.window_id).expect("evaluate"), CanaryStatus::Rollback);
    assert_eq!(count_events(&ledger, "CANARY_ROLLBACK"), 1);

    // Absent telemetry resolves to missing, never to promote.
    let window = manager
        .open_window(&plan_id, 5.0, 0, CanaryCriteria::default())
        .expect("open");
    assert_eq!(manager.evaluate(&window.window_id).expect("evaluate"), CanaryStatus::Missing);
    assert_eq!(count_events(&ledger, "CANARY_TIMEOUT"), 1);

    // Evaluation is idempotent once settled.
    assert_eq!(manager.evaluate(&window.window_id).expect("evaluate"), CanaryStatus::Missing);
}

#[tokio::test(flavor = "multi_thread")]
async fn push_is_idempotent_across_round_rebuilds() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fx = fixture(&dir);
    let plan = demo_plan();
    let first = build_plan_round(&fx.store, &fx.ledger, &plan, Stage::Shadow).expect("round");
    let second = build_plan_round(&fx.store, &fx.ledger, &plan, Stage::Shadow).expect("round");
    assert_eq!(first, second, "rebuilding the round returns the same ids");
    assert_eq!(fx.store.snapshot().expect("snapshot").pending, 4);
    assert_eq!(count_events(&fx.ledger, "ENQUEUE"), 4, "no duplicate enqueues");
}
