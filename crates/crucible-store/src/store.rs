// crucible-store/src/store.rs
// ============================================================================
// Module: SQLite Queue Store
// Description: Durable task queue, budgets, breakers, and canary windows.
// Purpose: Persist scheduler state with WAL durability and idempotent
//          pushes.
// Dependencies: crucible-core, rusqlite, serde_json, thiserror
// ============================================================================

//! ## Overview
//! This module implements the scheduler's durable substrate on `SQLite` with
//! WAL journaling and normal synchronous mode. Tasks are idempotent on their
//! deduplication key, leases are acquired by compare-and-set, and expired
//! leases sweep back to pending, which is the at-least-once guarantee.
//! Budgets and
//! circuit breakers live in satellite tables so a restart resumes exactly
//! where the previous process stopped.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::MutexGuard;

use crucible_core::Budgets;
use crucible_core::CanaryCriteria;
use crucible_core::CanaryMetrics;
use crucible_core::CanaryStatus;
use crucible_core::CanaryWindow;
use crucible_core::CostVector;
use crucible_core::Domain;
use crucible_core::Heartbeat;
use crucible_core::Owner;
use crucible_core::PlanId;
use crucible_core::RiskBound;
use crucible_core::Stage;
use crucible_core::Task;
use crucible_core::TaskId;
use crucible_core::TaskStatus;
use crucible_core::TaskType;
use crucible_core::WindowId;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the queue store.
const SCHEMA_VERSION: i64 = 1;

/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Circuit breaker consecutive-failure threshold.
pub const DEFAULT_BREAKER_THRESHOLD: u32 = 3;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Configuration for the queue store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
    /// Circuit breaker consecutive-failure threshold.
    pub breaker_threshold: u32,
}

impl StoreConfig {
    /// Creates a configuration for the provided database path.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            breaker_threshold: DEFAULT_BREAKER_THRESHOLD,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by the queue store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying `SQLite` failure.
    #[error("store sqlite failure: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Row payload could not be encoded or decoded.
    #[error("store serialization failure: {0}")]
    Serialization(String),
    /// Database schema version diverged from this build.
    #[error("store schema version mismatch (found {found}, expected {expected})")]
    SchemaVersion {
        /// Version found in the database.
        found: i64,
        /// Version this build expects.
        expected: i64,
    },
    /// Referenced row does not exist.
    #[error("store row not found: {0}")]
    NotFound(String),
    /// Stored row contains an illegal value.
    #[error("store row invalid: {0}")]
    InvalidRow(String),
}

/// Encodes a value as JSON for a text column.
fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|err| StoreError::Serialization(err.to_string()))
}

/// Decodes a JSON text column.
#[allow(dead_code, reason = "kept as the symmetric counterpart to `to_json`")]
fn from_json<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, StoreError> {
    serde_json::from_str(text).map_err(|err| StoreError::Serialization(err.to_string()))
}

// ============================================================================
// SECTION: Outcomes and Snapshots
// ============================================================================

/// Result of an idempotent push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOutcome {
    /// Task identifier (existing on deduplication).
    pub task_id: TaskId,
    /// True when a new row was inserted.
    pub inserted: bool,
}

/// Budget standing for one plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetStatus {
    /// Plan may schedule tasks.
    Open,
    /// A budget dimension is exhausted; tasks are excluded.
    Blocked,
}

impl BudgetStatus {
    /// Returns the stable string label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Blocked => "blocked",
        }
    }

    /// Parses a status from its stable label.
    fn parse(label: &str) -> Result<Self, StoreError> {
        match label {
            "open" => Ok(Self::Open),
            "blocked" => Ok(Self::Blocked),
            other => Err(StoreError::InvalidRow(format!("budget status {other}"))),
        }
    }
}

/// Dependency-light queue introspection snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoreSnapshot {
    /// Pending task count.
    pub pending: u64,
    /// Leased task count.
    pub leased: u64,
    /// Done task count.
    pub done: u64,
    /// Failed (retryable) task count.
    pub failed: u64,
    /// Dead task count.
    pub dead: u64,
    /// Domains with an open breaker.
    pub open_breakers: Vec<String>,
    /// Plans with a blocked budget.
    pub blocked_plans: Vec<String>,
}

// ============================================================================
// SECTION: Queue Store
// ============================================================================

/// Durable queue store over one `SQLite` connection.
///
/// # Invariants
/// - Every mutating operation runs under the internal lock.
/// - `idempotency_key` is unique; a second push returns the existing id.
pub struct QueueStore {
    /// Guarded connection.
    conn: Mutex<Connection>,
    /// Circuit breaker threshold.
    breaker_threshold: u32,
}

impl QueueStore {
    /// Opens (or creates) the queue database and applies pragmas and schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure or schema version mismatch.
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        if let Some(parent) = config.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|err| StoreError::Serialization(err.to_string()))?;
        }
        let conn = Connection::open(&config.path)?;
        conn.execute_batch("PRAGMA journal_mode = wal;")?;
        conn.execute_batch("PRAGMA synchronous = normal;")?;
        conn.busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))?;
        apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            breaker_threshold: config.breaker_threshold,
        })
    }

    /// Acquires the connection lock, recovering from poisoning.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    /// Pushes a task; a duplicate idempotency key returns the existing id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    pub fn push(&self, task: &Task) -> Result<PushOutcome, StoreError> {
        let conn = self.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO tasks (
                id, task_type, payload, priority, plan_id, stage, created_ms,
                status, attempts, max_attempts, idempotency_key, expected_gain,
                expected_cost, risk_bound, tr_radius, ttl_s, lease_until_ms,
                owner, domain, risk_reduction
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                ?15, ?16, ?17, ?18, ?19, ?20
            )",
            params![
                task.id.as_str(),
                task.task_type.as_str(),
                to_json(&task.payload)?,
                task.priority,
                task.plan_id.as_str(),
                task.stage.as_str(),
                task.created_ms,
                task.status.as_str(),
                task.attempts,
                task.max_attempts,
                task.idempotency_key,
                task.expected_gain,
                to_json(&task.expected_cost)?,
                to_json(&task.risk_bound)?,
                task.tr_radius,
                i64::try_from(task.ttl_s).unwrap_or(i64::MAX),
                task.lease_until_ms,
                task.owner.as_ref().map(Owner::as_str),
                task.domain.as_str(),
                i64::from(task.risk_reduction),
            ],
        )?;
        if inserted > 0 {
            return Ok(PushOutcome {
                task_id: task.id.clone(),
                inserted: true,
            });
        }
        let existing: String = conn.query_row(
            "SELECT id FROM tasks WHERE idempotency_key = ?1",
            params![task.idempotency_key],
            |row| row.get(0),
        )?;
        Ok(PushOutcome {
            task_id: TaskId::new(existing),
            inserted: false,
        })
    }

    /// Loads one task by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the task does not exist.
    pub fn get(&self, task_id: &TaskId) -> Result<Task, StoreError> {
        let conn = self.lock();
        let task = conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![task_id.as_str()],
                task_from_row,
            )
            .optional()?;
        task.ok_or_else(|| StoreError::NotFound(task_id.to_string()))
    }

    /// Samples up to `limit` pending tasks, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    pub fn sample_pending(&self, limit: usize) -> Result<Vec<Task>, StoreError> {
        let conn = self.lock();
        let mut statement = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE status = 'pending'
             ORDER BY created_ms ASC, id ASC
             LIMIT ?1"
        ))?;
        #[allow(clippy::cast_possible_truncation, reason = "limit is a small sample cap")]
        let rows = statement.query_map(params![limit as i64], task_from_row)?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    /// Atomically leases a pending task (compare-and-set on status).
    ///
    /// Returns false when the task was taken or left the pending state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    pub fn lease(
        &self,
        task_id: &TaskId,
        owner: &Owner,
        lease_until_ms: i64,
    ) -> Result<bool, StoreError> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE tasks
             SET status = 'leased', owner = ?2, lease_until_ms = ?3,
                 attempts = attempts + 1
             WHERE id = ?1 AND status = 'pending'",
            params![task_id.as_str(), owner.as_str(), lease_until_ms],
        )?;
        Ok(updated > 0)
    }

    /// Marks a leased task done.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the task is not leased.
    pub fn complete(&self, task_id: &TaskId) -> Result<(), StoreError> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE tasks SET status = 'done', lease_until_ms = NULL
             WHERE id = ?1 AND status = 'leased'",
            params![task_id.as_str()],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(task_id.to_string()));
        }
        Ok(())
    }

    /// Fails a task, re-queuing while attempts remain.
    ///
    /// Returns the resulting status (`Pending` for retry, `Dead` when
    /// exhausted or declared permanent).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure or unknown task.
    pub fn fail(&self, task_id: &TaskId, permanent: bool) -> Result<TaskStatus, StoreError> {
        let conn = self.lock();
        let row: Option<(u32, u32)> = conn
            .query_row(
                "SELECT attempts, max_attempts FROM tasks WHERE id = ?1",
                params![task_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((attempts, max_attempts)) = row else {
            return Err(StoreError::NotFound(task_id.to_string()));
        };
        let next = if permanent || attempts >= max_attempts {
            TaskStatus::Dead
        } else {
            TaskStatus::Pending
        };
        conn.execute(
            "UPDATE tasks SET status = ?2, owner = NULL, lease_until_ms = NULL
             WHERE id = ?1",
            params![task_id.as_str(), next.as_str()],
        )?;
        Ok(next)
    }

    /// Returns expired leases to pending and reports the affected ids.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    pub fn expire_leases(&self, now_ms: i64) -> Result<Vec<TaskId>, StoreError> {
        let conn = self.lock();
        let mut statement = conn.prepare(
            "SELECT id FROM tasks
             WHERE status = 'leased' AND lease_until_ms IS NOT NULL
               AND lease_until_ms < ?1",
        )?;
        let rows = statement.query_map(params![now_ms], |row| row.get::<_, String>(0))?;
        let mut expired = Vec::new();
        for row in rows {
            expired.push(TaskId::new(row?));
        }
        drop(statement);
        for task_id in &expired {
            conn.execute(
                "UPDATE tasks SET status = 'pending', owner = NULL,
                     lease_until_ms = NULL
                 WHERE id = ?1 AND status = 'leased'",
                params![task_id.as_str()],
            )?;
        }
        Ok(expired)
    }

    /// Counts a plan's tasks that have not reached a terminal status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    pub fn plan_active_count(&self, plan_id: &PlanId) -> Result<u64, StoreError> {
        let conn = self.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tasks
             WHERE plan_id = ?1 AND status NOT IN ('done', 'dead')",
            params![plan_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    // ------------------------------------------------------------------
    // Heartbeats
    // ------------------------------------------------------------------

    /// Records one worker heartbeat.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    pub fn record_heartbeat(&self, heartbeat: &Heartbeat) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO heartbeats (
                task_id, owner, ts_ms, rho, sr_score, caos_post, elapsed_ms,
                stage, metrics
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                heartbeat.task_id.as_str(),
                heartbeat.owner.as_str(),
                heartbeat.ts_ms,
                heartbeat.rho,
                heartbeat.sr_score,
                heartbeat.caos_post,
                i64::try_from(heartbeat.elapsed_ms).unwrap_or(i64::MAX),
                heartbeat.stage.as_str(),
                to_json(&heartbeat.metrics)?,
            ],
        )?;
        Ok(())
    }

    /// Returns the latest heartbeat time per task.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    pub fn latest_heartbeats(&self) -> Result<Vec<(TaskId, i64)>, StoreError> {
        let conn = self.lock();
        let mut statement = conn.prepare(
            "SELECT task_id, MAX(ts_ms) FROM heartbeats GROUP BY task_id",
        )?;
        let rows = statement.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut latest = Vec::new();
        for row in rows {
            let (task_id, ts_ms) = row?;
            latest.push((TaskId::new(task_id), ts_ms));
        }
        Ok(latest)
    }

    // ------------------------------------------------------------------
    // Budgets
    // ------------------------------------------------------------------

    /// Initializes (or leaves untouched) the budget row for a plan.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    pub fn init_budget(&self, plan_id: &PlanId, budgets: &Budgets) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR IGNORE INTO budgets (
                plan_id, max_cost, used_cost, max_tokens, used_tokens,
                max_latency_ms, used_latency_ms, max_llm_calls, used_llm_calls,
                max_cpu_s, used_cpu_s, status
            ) VALUES (?1, ?2, 0, ?3, 0, ?4, 0, ?5, 0, ?6, 0, 'open')",
            params![
                plan_id.as_str(),
                budgets.max_cost,
                i64::try_from(budgets.max_tokens).unwrap_or(i64::MAX),
                i64::try_from(budgets.max_latency_ms).unwrap_or(i64::MAX),
                i64::try_from(budgets.max_llm_calls).unwrap_or(i64::MAX),
                budgets.max_cpu_s,
            ],
        )?;
        Ok(())
    }

    /// Debits a plan budget (soft, at task start) and returns the standing.
    ///
    /// Any exceeded dimension flips the plan to blocked; the debit itself is
    /// never rolled back.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure or missing budget row.
    pub fn debit_budget(
        &self,
        plan_id: &PlanId,
        cost: &CostVector,
        llm_calls: u64,
    ) -> Result<BudgetStatus, StoreError> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE budgets SET
                used_cost = used_cost + ?2,
                used_tokens = used_tokens + ?3,
                used_latency_ms = used_latency_ms + ?4,
                used_llm_calls = used_llm_calls + ?5,
                used_cpu_s = used_cpu_s + ?6
             WHERE plan_id = ?1",
            params![
                plan_id.as_str(),
                cost.cost,
                cost.tokens,
                cost.latency_ms,
                i64::try_from(llm_calls).unwrap_or(i64::MAX),
                cost.cpu_s,
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("budget for {plan_id}")));
        }
        let blocked: bool = conn.query_row(
            "SELECT used_cost > max_cost OR used_tokens > max_tokens
                 OR used_latency_ms > max_latency_ms
                 OR used_llm_calls > max_llm_calls OR used_cpu_s > max_cpu_s
             FROM budgets WHERE plan_id = ?1",
            params![plan_id.as_str()],
            |row| row.get(0),
        )?;
        let status = if blocked { BudgetStatus::Blocked } else { BudgetStatus::Open };
        conn.execute(
            "UPDATE budgets SET status = ?2 WHERE plan_id = ?1",
            params![plan_id.as_str(), status.as_str()],
        )?;
        Ok(status)
    }

    /// Returns the budget standing for a plan (open when untracked).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    pub fn budget_status(&self, plan_id: &PlanId) -> Result<BudgetStatus, StoreError> {
        let conn = self.lock();
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM budgets WHERE plan_id = ?1",
                params![plan_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        status.map_or(Ok(BudgetStatus::Open), |label| BudgetStatus::parse(&label))
    }

    // ------------------------------------------------------------------
    // Circuit breakers
    // ------------------------------------------------------------------

    /// Registers a failure; returns true when the breaker just opened.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    pub fn breaker_failure(&self, domain: &Domain) -> Result<bool, StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO breakers (domain, failures, open) VALUES (?1, 1, 0)
             ON CONFLICT(domain) DO UPDATE SET failures = failures + 1",
            params![domain.as_str()],
        )?;
        let (failures, open): (u32, bool) = conn.query_row(
            "SELECT failures, open FROM breakers WHERE domain = ?1",
            params![domain.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if !open && failures >= self.breaker_threshold {
            conn.execute(
                "UPDATE breakers SET open = 1 WHERE domain = ?1",
                params![domain.as_str()],
            )?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Registers a success; returns true when an open breaker just closed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    pub fn breaker_success(&self, domain: &Domain) -> Result<bool, StoreError> {
        let conn = self.lock();
        let open: Option<bool> = conn
            .query_row(
                "SELECT open FROM breakers WHERE domain = ?1",
                params![domain.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        conn.execute(
            "INSERT INTO breakers (domain, failures, open) VALUES (?1, 0, 0)
             ON CONFLICT(domain) DO UPDATE SET failures = 0, open = 0",
            params![domain.as_str()],
        )?;
        Ok(open == Some(true))
    }

    /// Returns true when the domain's breaker is open.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    pub fn breaker_open(&self, domain: &Domain) -> Result<bool, StoreError> {
        let conn = self.lock();
        let open: Option<bool> = conn
            .query_row(
                "SELECT open FROM breakers WHERE domain = ?1",
                params![domain.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(open == Some(true))
    }

    // ------------------------------------------------------------------
    // Canary windows
    // ------------------------------------------------------------------

    /// Persists a new canary window.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    pub fn insert_window(&self, window: &CanaryWindow) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO canary_windows (
                window_id, plan_id, traffic_pct, duration_s, criteria, status,
                opened_ms, evaluated_ms, metrics_baseline, metrics_canary
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                window.window_id.as_str(),
                window.plan_id.as_str(),
                window.traffic_pct,
                i64::try_from(window.duration_s).unwrap_or(i64::MAX),
                to_json(&window.criteria)?,
                window.status.as_str(),
                window.opened_ms,
                window.evaluated_ms,
                window.metrics_baseline.as_ref().map(to_json).transpose()?,
                window.metrics_canary.as_ref().map(to_json).transpose()?,
            ],
        )?;
        Ok(())
    }

    /// Loads one canary window.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the window does not exist.
    pub fn get_window(&self, window_id: &WindowId) -> Result<CanaryWindow, StoreError> {
        let conn = self.lock();
        let window = conn
            .query_row(
                "SELECT window_id, plan_id, traffic_pct, duration_s, criteria,
                        status, opened_ms, evaluated_ms, metrics_baseline,
                        metrics_canary
                 FROM canary_windows WHERE window_id = ?1",
                params![window_id.as_str()],
                window_from_row,
            )
            .optional()?;
        window.ok_or_else(|| StoreError::NotFound(window_id.to_string()))
    }

    /// Stores out-of-band metric snapshots on a window.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure or unknown window.
    pub fn feed_window_metrics(
        &self,
        window_id: &WindowId,
        baseline: Option<&CanaryMetrics>,
        canary: Option<&CanaryMetrics>,
    ) -> Result<(), StoreError> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE canary_windows SET
                metrics_baseline = COALESCE(?2, metrics_baseline),
                metrics_canary = COALESCE(?3, metrics_canary)
             WHERE window_id = ?1",
            params![
                window_id.as_str(),
                baseline.map(to_json).transpose()?,
                canary.map(to_json).transpose()?,
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(window_id.to_string()));
        }
        Ok(())
    }

    /// Transitions a window's status and stamps the evaluation time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure or unknown window.
    pub fn update_window_status(
        &self,
        window_id: &WindowId,
        status: CanaryStatus,
        evaluated_ms: Option<i64>,
    ) -> Result<(), StoreError> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE canary_windows SET status = ?2, evaluated_ms = ?3
             WHERE window_id = ?1",
            params![window_id.as_str(), status.as_str(), evaluated_ms],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(window_id.to_string()));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Returns the dependency-light queue snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    pub fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        let conn = self.lock();
        let mut snapshot = StoreSnapshot::default();
        let mut statement =
            conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
        let rows = statement.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            let count = u64::try_from(count).unwrap_or(0);
            match TaskStatus::parse(&status) {
                Some(TaskStatus::Pending) => snapshot.pending = count,
                Some(TaskStatus::Leased) => snapshot.leased = count,
                Some(TaskStatus::Done) => snapshot.done = count,
                Some(TaskStatus::Failed) => snapshot.failed = count,
                Some(TaskStatus::Dead) => snapshot.dead = count,
                None => return Err(StoreError::InvalidRow(format!("task status {status}"))),
            }
        }
        drop(statement);

        let mut statement = conn.prepare("SELECT domain FROM breakers WHERE open = 1")?;
        let rows = statement.query_map([], |row| row.get::<_, String>(0))?;
        for row in rows {
            snapshot.open_breakers.push(row?);
        }
        drop(statement);

        let mut statement =
            conn.prepare("SELECT plan_id FROM budgets WHERE status = 'blocked'")?;
        let rows = statement.query_map([], |row| row.get::<_, String>(0))?;
        for row in rows {
            snapshot.blocked_plans.push(row?);
        }
        Ok(snapshot)
    }
}

// ============================================================================
// SECTION: Schema
// ============================================================================

/// Column list shared by task queries.
const TASK_COLUMNS: &str = "id, task_type, payload, priority, plan_id, stage, \
    created_ms, status, attempts, max_attempts, idempotency_key, \
    expected_gain, expected_cost, risk_bound, tr_radius, ttl_s, \
    lease_until_ms, owner, domain, risk_reduction";

/// Applies the schema, checking the stored version.
fn apply_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_meta (version INTEGER NOT NULL);
         CREATE TABLE IF NOT EXISTS tasks (
             id TEXT PRIMARY KEY,
             task_type TEXT NOT NULL,
             payload TEXT NOT NULL,
             priority INTEGER NOT NULL,
             plan_id TEXT NOT NULL,
             stage TEXT NOT NULL,
             created_ms INTEGER NOT NULL,
             status TEXT NOT NULL,
             attempts INTEGER NOT NULL,
             max_attempts INTEGER NOT NULL,
             idempotency_key TEXT NOT NULL UNIQUE,
             expected_gain REAL NOT NULL,
             expected_cost TEXT NOT NULL,
             risk_bound TEXT NOT NULL,
             tr_radius REAL NOT NULL,
             ttl_s INTEGER NOT NULL,
             lease_until_ms INTEGER,
             owner TEXT,
             domain TEXT NOT NULL,
             risk_reduction INTEGER NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
         CREATE INDEX IF NOT EXISTS idx_tasks_plan ON tasks(plan_id);
         CREATE INDEX IF NOT EXISTS idx_tasks_created ON tasks(created_ms);
         CREATE TABLE IF NOT EXISTS heartbeats (
             task_id TEXT NOT NULL,
             owner TEXT NOT NULL,
             ts_ms INTEGER NOT NULL,
             rho REAL NOT NULL,
             sr_score REAL NOT NULL,
             caos_post REAL NOT NULL,
             elapsed_ms INTEGER NOT NULL,
             stage TEXT NOT NULL,
             metrics TEXT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_heartbeats_task ON heartbeats(task_id);
         CREATE TABLE IF NOT EXISTS budgets (
             plan_id TEXT PRIMARY KEY,
             max_cost REAL NOT NULL,
             used_cost REAL NOT NULL,
             max_tokens INTEGER NOT NULL,
             used_tokens REAL NOT NULL,
             max_latency_ms INTEGER NOT NULL,
             used_latency_ms REAL NOT NULL,
             max_llm_calls INTEGER NOT NULL,
             used_llm_calls INTEGER NOT NULL,
             max_cpu_s REAL NOT NULL,
             used_cpu_s REAL NOT NULL,
             status TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS breakers (
             domain TEXT PRIMARY KEY,
             failures INTEGER NOT NULL,
             open INTEGER NOT NULL
         );
         CREATE TABLE IF NOT EXISTS canary_windows (
             window_id TEXT PRIMARY KEY,
             plan_id TEXT NOT NULL,
             traffic_pct REAL NOT NULL,
             duration_s INTEGER NOT NULL,
             criteria TEXT NOT NULL,
             status TEXT NOT NULL,
             opened_ms INTEGER NOT NULL,
             evaluated_ms INTEGER,
             metrics_baseline TEXT,
             metrics_canary TEXT
         );",
    )?;
    let version: Option<i64> = conn
        .query_row("SELECT version FROM schema_meta LIMIT 1", [], |row| row.get(0))
        .optional()?;
    match version {
        None => {
            conn.execute(
                "INSERT INTO schema_meta (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )?;
            Ok(())
        }
        Some(found) if found == SCHEMA_VERSION => Ok(()),
        Some(found) => Err(StoreError::SchemaVersion {
            found,
            expected: SCHEMA_VERSION,
        }),
    }
}

// ============================================================================
// SECTION: Row Mapping
// ============================================================================

/// Maps one task row into the shared record.
fn task_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    /// Converts a mapping failure into a `rusqlite` column error.
    fn bad(index: usize, message: String) -> rusqlite::Error {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Text,
            message.into(),
        )
    }

    let task_type_label: String = row.get(1)?;
    let task_type = match task_type_label.as_str() {
        "F3" => TaskType::F3,
        "F4" => TaskType::F4,
        "F5" => TaskType::F5,
        "F6" => TaskType::F6,
        other => return Err(bad(1, format!("task type {other}"))),
    };
    let payload_text: String = row.get(2)?;
    let payload = serde_json::from_str(&payload_text)
        .map_err(|err| bad(2, err.to_string()))?;
    let stage_label: String = row.get(5)?;
    let stage = match stage_label.as_str() {
        "shadow" => Stage::Shadow,
        "canary" => Stage::Canary,
        "main" => Stage::Main,
        other => return Err(bad(5, format!("stage {other}"))),
    };
    let status_label: String = row.get(7)?;
    let status = TaskStatus::parse(&status_label)
        .ok_or_else(|| bad(7, format!("status {status_label}")))?;
    let expected_cost_text: String = row.get(12)?;
    let expected_cost: CostVector = serde_json::from_str(&expected_cost_text)
        .map_err(|err| bad(12, err.to_string()))?;
    let risk_bound_text: String = row.get(13)?;
    let risk_bound: RiskBound = serde_json::from_str(&risk_bound_text)
        .map_err(|err| bad(13, err.to_string()))?;

    Ok(Task {
        id: TaskId::new(row.get::<_, String>(0)?),
        task_type,
        payload,
        priority: row.get(3)?,
        plan_id: PlanId::new(row.get::<_, String>(4)?),
        stage,
        created_ms: row.get(6)?,
        status,
        attempts: row.get(8)?,
        max_attempts: row.get(9)?,
        idempotency_key: row.get(10)?,
        expected_gain: row.get(11)?,
        expected_cost,
        risk_bound,
        tr_radius: row.get(14)?,
        ttl_s: u64::try_from(row.get::<_, i64>(15)?).unwrap_or(0),
        lease_until_ms: row.get(16)?,
        owner: row.get::<_, Option<String>>(17)?.map(Owner::new),
        domain: Domain::new(row.get::<_, String>(18)?),
        risk_reduction: row.get::<_, i64>(19)? != 0,
    })
}

/// Maps one canary window row into the shared record.
fn window_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CanaryWindow> {
    /// Converts a mapping failure into a `rusqlite` column error.
    fn bad(index: usize, message: String) -> rusqlite::Error {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Text,
            message.into(),
        )
    }

    let criteria_text: String = row.get(4)?;
    let criteria: CanaryCriteria =
        serde_json::from_str(&criteria_text).map_err(|err| bad(4, err.to_string()))?;
    let status_label: String = row.get(5)?;
    let status = CanaryStatus::parse(&status_label)
        .ok_or_else(|| bad(5, format!("canary status {status_label}")))?;
    let baseline_text: Option<String> = row.get(8)?;
    let metrics_baseline = baseline_text
        .map(|text| serde_json::from_str(&text).map_err(|err| bad(8, err.to_string())))
        .transpose()?;
    let canary_text: Option<String> = row.get(9)?;
    let metrics_canary = canary_text
        .map(|text| serde_json::from_str(&text).map_err(|err| bad(9, err.to_string())))
        .transpose()?;

    Ok(CanaryWindow {
        window_id: WindowId::new(row.get::<_, String>(0)?),
        plan_id: PlanId::new(row.get::<_, String>(1)?),
        traffic_pct: row.get(2)?,
        duration_s: u64::try_from(row.get::<_, i64>(3)?).unwrap_or(0),
        criteria,
        status,
        opened_ms: row.get(6)?,
        evaluated_ms: row.get(7)?,
        metrics_baseline,
        metrics_canary,
    })
}
