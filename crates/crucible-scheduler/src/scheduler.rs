// crucible-scheduler/src/scheduler.rs
// ============================================================================
// Module: Crucible Scheduler
// Description: Single-flight tick loop with bounded-parallel workers.
// Purpose: Select, lease, and execute queued tasks under non-compensatory
//          gates.
// Dependencies: crucible-core, crucible-engine, crucible-store,
//               crate::{watchdog, worker}, tokio
// ============================================================================

//! ## Overview
//! The scheduler is one dispatcher loop over the durable queue. Each tick
//! sweeps expired leases, checks for stalls, samples pending tasks, applies
//! the fail-closed gates, scores the survivors, and leases the winner by
//! compare-and-set. Execution runs in bounded-parallel tokio tasks that
//! report heartbeats back through a channel. Shutdown is cooperative: stop
//! leasing, wait a grace window per in-flight task, let the rest expire.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crucible_core::EventKind;
use crucible_core::Heartbeat;
use crucible_core::Ledger;
use crucible_core::LedgerError;
use crucible_core::Owner;
use crucible_core::PlanId;
use crucible_core::SystemState;
use crucible_core::Task;
use crucible_core::TaskStatus;
use crucible_core::TaskType;
use crucible_core::time::unix_millis_now;
use crucible_engine::phi;
use crucible_store::BudgetStatus;
use crucible_store::QueueStore;
use crucible_store::StoreError;
use serde_json::json;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::sync::Semaphore;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::watchdog::Watchdog;
use crate::worker::Worker;
use crate::worker::WorkerContext;
use crate::worker::WorkerError;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Tick interval.
    pub tick: Duration,
    /// Maximum pending tasks sampled per tick.
    pub sample_limit: usize,
    /// Maximum concurrently executing tasks.
    pub max_concurrent: usize,
    /// Lease duration in milliseconds.
    pub lease_ms: i64,
    /// Reflexivity gate threshold.
    pub tau_sr: f64,
    /// Calibration ceiling (Σ-Guard).
    pub ece_max: f64,
    /// Bias-weighted contractivity ceiling (Σ-Guard).
    pub rho_bias_max: f64,
    /// Contractivity ceiling (IR→IC).
    pub rho_max: f64,
    /// Saturation constant for the amplification factor.
    pub kappa: f64,
    /// Risk loading in the utility denominator.
    pub lambda_rho: f64,
    /// Shutdown grace per in-flight task.
    pub shutdown_grace: Duration,
    /// Lease owner label for this scheduler instance.
    pub owner: Owner,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(200),
            sample_limit: 200,
            max_concurrent: 3,
            lease_ms: 300_000,
            tau_sr: 0.80,
            ece_max: 0.01,
            rho_bias_max: 1.05,
            rho_max: 0.95,
            kappa: 20.0,
            lambda_rho: 0.5,
            shutdown_grace: Duration::from_secs(3),
            owner: Owner::new("crucible-sched"),
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Scheduler failures.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Queue store failure.
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
    /// Ledger failure.
    #[error("ledger failure: {0}")]
    Ledger(#[from] LedgerError),
}

// ============================================================================
// SECTION: Scheduler
// ============================================================================

/// Single-flight scheduler over the durable queue.
pub struct Scheduler {
    /// Durable queue store.
    store: Arc<QueueStore>,
    /// Shared ledger.
    ledger: Arc<Ledger>,
    /// Shared state view.
    state: Arc<RwLock<SystemState>>,
    /// Heartbeat-driven anomaly detector.
    watchdog: Arc<Watchdog>,
    /// Workers keyed by task type.
    workers: BTreeMap<TaskType, Arc<dyn Worker>>,
    /// Configuration.
    config: SchedulerConfig,
    /// Infrastructure failures inside detached executions.
    infra_failures: Arc<AtomicU64>,
    /// Plans with work taken but not yet finished (round-end tracking).
    active_plans: std::sync::Mutex<std::collections::BTreeSet<PlanId>>,
}

impl Scheduler {
    /// Creates a scheduler over shared infrastructure.
    #[must_use]
    pub fn new(
        store: Arc<QueueStore>,
        ledger: Arc<Ledger>,
        state: Arc<RwLock<SystemState>>,
        watchdog: Arc<Watchdog>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            state,
            watchdog,
            workers: BTreeMap::new(),
            config,
            infra_failures: Arc::new(AtomicU64::new(0)),
            active_plans: std::sync::Mutex::new(std::collections::BTreeSet::new()),
        }
    }

    /// Registers the worker for one task type (latest registration wins).
    pub fn register_worker(&mut self, task_type: TaskType, worker: Arc<dyn Worker>) {
        self.workers.insert(task_type, worker);
    }

    /// Returns the count of infrastructure failures inside executions.
    #[must_use]
    pub fn infra_failures(&self) -> u64 {
        self.infra_failures.load(Ordering::Relaxed)
    }

    /// Runs the dispatcher loop until the shutdown signal flips.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] when the loop cannot start or a tick hits
    /// an infrastructure failure.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), SchedulerError> {
        self.ledger.record(
            EventKind::SchedStart,
            json!({"owner": self.config.owner.as_str()}),
        )?;
        // Startup replay: leases abandoned by a crashed process return to
        // pending before the first selection.
        for task_id in self.store.expire_leases(unix_millis_now())? {
            self.ledger.record(
                EventKind::LeaseExpired,
                json!({"task": task_id.as_str(), "phase": "startup"}),
            )?;
        }

        let (beat_tx, mut beat_rx) = mpsc::channel::<(PlanId, Heartbeat)>(64);
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent));
        let mut running: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                beat = beat_rx.recv() => {
                    if let Some((plan_id, heartbeat)) = beat {
                        self.handle_heartbeat(&plan_id, &heartbeat)?;
                    }
                }
                () = tokio::time::sleep(self.config.tick) => {
                    self.tick(&beat_tx, &permits, &mut running).await?;
                }
            }
        }

        // Cooperative shutdown: no new leases; wait a bounded grace window,
        // then let remaining leases expire naturally.
        let grace = self.config.shutdown_grace * u32::try_from(running.len().max(1)).unwrap_or(1);
        let _ = tokio::time::timeout(grace, async {
            while running.join_next().await.is_some() {}
        })
        .await;
        running.abort_all();

        self.ledger.record(
            EventKind::SchedStop,
            json!({"owner": self.config.owner.as_str()}),
        )?;
        Ok(())
    }

    /// Persists a heartbeat and feeds the watchdog.
    fn handle_heartbeat(
        &self,
        plan_id: &PlanId,
        heartbeat: &Heartbeat,
    ) -> Result<(), SchedulerError> {
        self.store.record_heartbeat(heartbeat)?;
        self.watchdog.observe(&self.ledger, plan_id, heartbeat)?;
        Ok(())
    }

    /// Runs one scheduler tick: sweep, stall check, select, lease, spawn.
    async fn tick(
        &self,
        beat_tx: &mpsc::Sender<(PlanId, Heartbeat)>,
        permits: &Arc<Semaphore>,
        running: &mut JoinSet<()>,
    ) -> Result<(), SchedulerError> {
        let now_ms = unix_millis_now();
        for task_id in self.store.expire_leases(now_ms)? {
            self.ledger.record(
                EventKind::LeaseExpired,
                json!({"task": task_id.as_str()}),
            )?;
        }
        self.watchdog.check_stalls(&self.ledger, now_ms)?;
        self.settle_plan_rounds()?;

        if permits.available_permits() == 0 {
            return Ok(());
        }

        let Some((task, score)) = self.select_task(now_ms).await? else {
            return Ok(());
        };
        if !self.store.lease(&task.id, &self.config.owner, now_ms + self.config.lease_ms)? {
            // Lost the compare-and-set; the next tick re-selects.
            return Ok(());
        }
        self.ledger.record(
            EventKind::SchedTake,
            json!({
                "task": task.id.as_str(),
                "type": task.task_type.as_str(),
                "plan": task.plan_id.as_str(),
                "score": score,
            }),
        )?;
        lock_plans(&self.active_plans).insert(task.plan_id.clone());

        // Soft debit at task start; exceeding a limit blocks the plan for
        // future selections but does not cancel this execution.
        let standing =
            self.store.debit_budget(&task.plan_id, &task.expected_cost, 1)?;
        if standing == BudgetStatus::Blocked {
            self.ledger.record(
                EventKind::BudgetBlock,
                json!({"plan": task.plan_id.as_str(), "task": task.id.as_str()}),
            )?;
        }

        let Ok(permit) = Arc::clone(permits).try_acquire_owned() else {
            return Ok(());
        };
        let execution = Execution {
            store: Arc::clone(&self.store),
            ledger: Arc::clone(&self.ledger),
            state: Arc::clone(&self.state),
            watchdog: Arc::clone(&self.watchdog),
            worker: self.workers.get(&task.task_type).cloned(),
            beat_tx: beat_tx.clone(),
            owner: self.config.owner.clone(),
            infra_failures: Arc::clone(&self.infra_failures),
        };
        running.spawn(async move {
            execution.run(task).await;
            drop(permit);
        });
        Ok(())
    }

    /// Records round ends for taken plans with no remaining active tasks.
    ///
    /// Runs inside the single-flight tick so each round ends exactly once.
    fn settle_plan_rounds(&self) -> Result<(), SchedulerError> {
        let candidates: Vec<PlanId> = lock_plans(&self.active_plans).iter().cloned().collect();
        for plan_id in candidates {
            if self.store.plan_active_count(&plan_id)? == 0 {
                self.ledger.record(
                    EventKind::PlanRoundEnd,
                    json!({"plan": plan_id.as_str()}),
                )?;
                lock_plans(&self.active_plans).remove(&plan_id);
            }
        }
        Ok(())
    }

    /// Selects the highest-scoring eligible pending task.
    async fn select_task(&self, now_ms: i64) -> Result<Option<(Task, f64)>, SchedulerError> {
        let sample = self.store.sample_pending(self.config.sample_limit)?;
        if sample.is_empty() {
            return Ok(None);
        }
        let state = self.state.read().await.clone();

        let mut best: Option<(Task, f64)> = None;
        for task in sample {
            if self.store.breaker_open(&task.domain)? {
                continue;
            }
            if self.store.budget_status(&task.plan_id)? == BudgetStatus::Blocked {
                continue;
            }
            let score = score_task(&self.config, &state, &task, now_ms);
            if score < 0.0 {
                continue;
            }
            let better = match &best {
                None => true,
                // Ties break deterministically by task id.
                Some((current, current_score)) => match score.total_cmp(current_score) {
                    std::cmp::Ordering::Greater => true,
                    std::cmp::Ordering::Equal => task.id < current.id,
                    std::cmp::Ordering::Less => false,
                },
            };
            if better {
                best = Some((task, score));
            }
        }
        Ok(best)
    }
}

// ============================================================================
// SECTION: Task Scoring
// ============================================================================

/// Scores one pending task; negative means excluded by a fail-closed gate.
#[must_use]
pub fn score_task(
    config: &SchedulerConfig,
    state: &SystemState,
    task: &Task,
    now_ms: i64,
) -> f64 {
    // Σ-Guard: ethics violations exclude everything.
    if state.ece > config.ece_max
        || state.rho_bias > config.rho_bias_max
        || !state.consent
        || !state.eco_ok
    {
        return -1.0;
    }
    // IR→IC: contractivity ceiling, bypassed only by risk-reducing work.
    if state.rho >= config.rho_max.min(task.risk_bound.rho_max) && !task.risk_reduction {
        return -1.0;
    }
    // SR gate: a shaky learner only runs risk-reducing work.
    if state.sr_score < config.tau_sr && !task.risk_reduction {
        return -1.0;
    }

    let gate = if state.sr_score >= config.tau_sr.max(task.risk_bound.sr_min)
        || task.risk_reduction
    {
        1.0
    } else {
        0.0
    };
    let norm_cost = task.expected_cost.normalized();
    let utility = task.expected_gain * phi(state.caos_post, config.kappa) * gate
        / (1.0 + norm_cost + config.lambda_rho * state.rho);

    #[allow(clippy::cast_precision_loss, reason = "priorities are tiny integers")]
    let priority_bonus = 0.001 * task.priority as f64;
    #[allow(clippy::cast_precision_loss, reason = "ages sit far below 2^52 ms")]
    let age_hours = ((now_ms - task.created_ms).max(0) as f64) / 3_600_000.0;
    utility + priority_bonus + 0.000_1 * age_hours
}

// ============================================================================
// SECTION: Execution
// ============================================================================

/// Everything one detached execution needs.
struct Execution {
    /// Durable queue store.
    store: Arc<QueueStore>,
    /// Shared ledger.
    ledger: Arc<Ledger>,
    /// Shared state view.
    state: Arc<RwLock<SystemState>>,
    /// Watchdog for cleanup on completion.
    watchdog: Arc<Watchdog>,
    /// Worker for the task type, when registered.
    worker: Option<Arc<dyn Worker>>,
    /// Heartbeat channel back to the dispatcher.
    beat_tx: mpsc::Sender<(PlanId, Heartbeat)>,
    /// Lease owner label.
    owner: Owner,
    /// Infrastructure failure counter.
    infra_failures: Arc<AtomicU64>,
}

impl Execution {
    /// Runs the worker and settles the task; infrastructure failures bump
    /// the counter because there is no caller left to surface them to.
    async fn run(self, task: Task) {
        if self.settle(task).await.is_err() {
            self.infra_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Executes the worker and records the terminal transition.
    async fn settle(&self, task: Task) -> Result<(), SchedulerError> {
        let result = match self.worker.as_ref() {
            Some(worker) => {
                let ctx = WorkerContext::new(
                    &task,
                    self.owner.clone(),
                    Arc::clone(&self.state),
                    self.beat_tx.clone(),
                );
                worker.run(task.clone(), ctx).await
            }
            None => Err(WorkerError::permanent(format!(
                "no worker registered for {}",
                task.task_type
            ))),
        };

        match result {
            Ok(summary) => {
                self.store.complete(&task.id)?;
                self.ledger.record(
                    EventKind::TaskDone,
                    json!({
                        "task": task.id.as_str(),
                        "type": task.task_type.as_str(),
                        "plan": task.plan_id.as_str(),
                        "summary": summary,
                    }),
                )?;
                if self.store.breaker_success(&task.domain)? {
                    self.ledger.record(
                        EventKind::CbClose,
                        json!({"domain": task.domain.as_str()}),
                    )?;
                }
            }
            Err(failure) => {
                let status = self.store.fail(&task.id, failure.permanent)?;
                self.ledger.record(
                    EventKind::TaskFail,
                    json!({
                        "task": task.id.as_str(),
                        "type": task.task_type.as_str(),
                        "plan": task.plan_id.as_str(),
                        "error": failure.message,
                    }),
                )?;
                if status == TaskStatus::Dead {
                    self.ledger.record(
                        EventKind::TaskDead,
                        json!({"task": task.id.as_str()}),
                    )?;
                }
                if self.store.breaker_failure(&task.domain)? {
                    self.ledger.record(
                        EventKind::CbOpen,
                        json!({"domain": task.domain.as_str()}),
                    )?;
                }
            }
        }

        self.watchdog.forget_task(&task.id);
        Ok(())
    }
}

/// Acquires the active-plan set, recovering from poisoning.
fn lock_plans(
    plans: &std::sync::Mutex<std::collections::BTreeSet<PlanId>>,
) -> std::sync::MutexGuard<'_, std::collections::BTreeSet<PlanId>> {
    match plans.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
