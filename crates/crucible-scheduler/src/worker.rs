// crucible-scheduler/src/worker.rs
// ============================================================================
// Module: Crucible Workers
// Description: Pluggable task workers and their execution context.
// Purpose: Bridge queue tasks to the engine and to simulated executions.
// Dependencies: async-trait, crucible-core, crucible-engine, serde_json,
//               tokio
// ============================================================================

//! ## Overview
//! Workers are pluggable by task type. The scheduler supplies a context
//! carrying the shared state view and a heartbeat channel; emitting a
//! heartbeat is a suspension point, which is what lets the watchdog observe
//! in-flight executions. `SimWorker` simulates progress for tests;
//! `MutationWorker` invokes the mutation engine for F4 tasks.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use crucible_core::AcquisitionReport;
use crucible_core::Heartbeat;
use crucible_core::Ledger;
use crucible_core::Owner;
use crucible_core::Plan;
use crucible_core::PlanId;
use crucible_core::Stage;
use crucible_core::SystemState;
use crucible_core::Task;
use crucible_core::TaskId;
use crucible_core::time::unix_millis_now;
use crucible_engine::EvolveRequest;
use crucible_engine::MutationEngine;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::sync::mpsc;

// ============================================================================
// SECTION: Worker Error
// ============================================================================

/// Failure raised by a worker execution.
#[derive(Debug, Error)]
#[error("worker failure: {message}")]
pub struct WorkerError {
    /// Failure description.
    pub message: String,
    /// True when retrying cannot help.
    pub permanent: bool,
}

impl WorkerError {
    /// Creates a retryable failure.
    #[must_use]
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            permanent: false,
        }
    }

    /// Creates a permanent failure.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            permanent: true,
        }
    }
}

// ============================================================================
// SECTION: Worker Context
// ============================================================================

/// Execution context the scheduler hands to a worker.
pub struct WorkerContext {
    /// Task under execution.
    pub task_id: TaskId,
    /// Owning plan.
    pub plan_id: PlanId,
    /// Lease owner label.
    pub owner: Owner,
    /// Deployment stage.
    pub stage: Stage,
    /// Shared state view.
    pub state: Arc<RwLock<SystemState>>,
    /// Heartbeat channel back to the scheduler.
    heartbeats: mpsc::Sender<(PlanId, Heartbeat)>,
    /// Execution start for elapsed tracking.
    started: Instant,
}

impl WorkerContext {
    /// Creates a context (scheduler-internal).
    #[must_use]
    pub fn new(
        task: &Task,
        owner: Owner,
        state: Arc<RwLock<SystemState>>,
        heartbeats: mpsc::Sender<(PlanId, Heartbeat)>,
    ) -> Self {
        Self {
            task_id: task.id.clone(),
            plan_id: task.plan_id.clone(),
            owner,
            stage: task.stage,
            state,
            heartbeats,
            started: Instant::now(),
        }
    }

    /// Emits a heartbeat snapshot; a suspension point by design.
    pub async fn heartbeat(&self, metrics: Value) {
        let state = self.state.read().await;
        let beat = Heartbeat {
            task_id: self.task_id.clone(),
            owner: self.owner.clone(),
            ts_ms: unix_millis_now(),
            rho: state.rho,
            sr_score: state.sr_score,
            caos_post: state.caos_post,
            elapsed_ms: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            stage: self.stage,
            metrics,
        };
        drop(state);
        // A closed channel means the scheduler is shutting down; the beat is
        // best-effort either way.
        let _ = self.heartbeats.send((self.plan_id.clone(), beat)).await;
    }
}

// ============================================================================
// SECTION: Worker Trait
// ============================================================================

/// A pluggable executor for one task type.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Executes one leased task and returns a result summary.
    async fn run(&self, task: Task, ctx: WorkerContext) -> Result<Value, WorkerError>;
}

// ============================================================================
// SECTION: Simulated Worker
// ============================================================================

/// Default worker simulating progress with periodic heartbeats.
pub struct SimWorker {
    /// Heartbeats emitted per execution.
    pub beats: u32,
    /// Delay between heartbeats.
    pub beat_interval: Duration,
    /// Remaining executions that must fail (for breaker tests).
    fail_remaining: Mutex<u32>,
}

impl SimWorker {
    /// Creates a healthy simulated worker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            beats: 3,
            beat_interval: Duration::from_millis(10),
            fail_remaining: Mutex::new(0),
        }
    }

    /// Creates a worker that fails its first `count` executions.
    #[must_use]
    pub fn failing(count: u32) -> Self {
        Self {
            beats: 1,
            beat_interval: Duration::from_millis(5),
            fail_remaining: Mutex::new(count),
        }
    }

    /// Consumes one scheduled failure if any remain.
    fn take_failure(&self) -> bool {
        let mut remaining = match self.fail_remaining.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *remaining > 0 {
            *remaining -= 1;
            true
        } else {
            false
        }
    }
}

impl Default for SimWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for SimWorker {
    async fn run(&self, task: Task, ctx: WorkerContext) -> Result<Value, WorkerError> {
        for step in 0..self.beats {
            ctx.heartbeat(json!({"step": step, "of": self.beats})).await;
            tokio::time::sleep(self.beat_interval).await;
        }
        if self.take_failure() {
            return Err(WorkerError::retryable("simulated failure"));
        }
        Ok(json!({
            "task": task.id.as_str(),
            "type": task.task_type.as_str(),
            "simulated": true,
        }))
    }
}

// ============================================================================
// SECTION: Mutation Worker
// ============================================================================

/// F4 worker bridging the queue to the mutation engine.
///
/// The plan and acquisition report are wired at construction (the scheduler
/// builds one per plan round); the state view comes from the context and the
/// engine's updated projection is written back after a successful cycle.
pub struct MutationWorker {
    /// Shared ledger.
    ledger: Arc<Ledger>,
    /// Guarded engine (cycles are serial per worker).
    engine: Mutex<MutationEngine>,
    /// Plan driving the round.
    plan: Plan,
    /// Acquisition evidence for the round.
    acq: AcquisitionReport,
}

impl MutationWorker {
    /// Creates a mutation worker for one plan round.
    #[must_use]
    pub fn new(
        ledger: Arc<Ledger>,
        engine: MutationEngine,
        plan: Plan,
        acq: AcquisitionReport,
    ) -> Self {
        Self {
            ledger,
            engine: Mutex::new(engine),
            plan,
            acq,
        }
    }
}

#[async_trait]
impl Worker for MutationWorker {
    async fn run(&self, task: Task, ctx: WorkerContext) -> Result<Value, WorkerError> {
        ctx.heartbeat(json!({"phase": "engine_start"})).await;
        let state_snapshot = ctx.state.read().await.clone();
        let seed = task
            .payload
            .get("seed")
            .and_then(Value::as_u64)
            .unwrap_or_default();

        let outcome = {
            let mut engine = match self.engine.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            engine.evolve(
                &self.ledger,
                &state_snapshot,
                &self.plan,
                &self.acq,
                &EvolveRequest {
                    n_candidates: None,
                    top_k: None,
                    seed,
                },
            )
        }
        .map_err(|err| WorkerError::retryable(err.to_string()))?;

        *ctx.state.write().await = outcome.state;
        ctx.heartbeat(json!({"phase": "engine_done"})).await;
        Ok(json!({
            "bundle_id": outcome.bundle.bundle_id,
            "selected": outcome.bundle.top_k.len(),
            "artifact": outcome.bundle.artifact_path.display().to_string(),
        }))
    }
}
