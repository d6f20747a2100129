//! Task supervisor.
//!
//! Submission persists a `pending` row and returns immediately; the engine
//! runs on a separately scheduled blocking task that is not bound to the
//! request lifetime. The task store is the only durable hand-off between the
//! two: all updates are last-writer-wins on a single row, with progress
//! monotonicity enforced here, not by the store.
//!
//! State machine: `pending → running → (completed | failed | cancelled)`.
//! Terminal states are immutable; `cleanup_expired` only deletes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::driver::{optimize, CancelFlag, EngineError, ProgressSink};
use crate::model::{OptimizationResult, OptimizeInput};

/// Terminal rows older than this are eligible for cleanup.
const EXPIRY_HOURS: i64 = 24;
/// Progress ceiling while a task is still running; 100 is reserved for
/// `completed`.
const RUNNING_PROGRESS_CAP: u8 = 99;

// ============================================================================
// Task row
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status `{other}`")),
        }
    }
}

/// One supervisor row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    /// 0–100; equals 100 exactly on `completed`.
    pub progress: u8,
    pub message: String,
    pub input: OptimizeInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<OptimizationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Milliseconds from creation to the terminal transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task {0} not found")]
    NotFound(String),
    #[error("task {id} is {status:?} and cannot be cancelled")]
    AlreadyTerminal { id: String, status: TaskStatus },
    #[error("task store error: {0}")]
    Store(String),
}

/// Minimal row-store contract. Any key/value or relational backend that can
/// hold a task row fits; the in-process [`MemoryTaskStore`] is what the
/// service ships with.
pub trait TaskStore: Send + Sync + 'static {
    fn put(&self, task: &Task) -> Result<(), TaskError>;
    fn get(&self, id: &str) -> Result<Option<Task>, TaskError>;
    fn list(&self) -> Result<Vec<Task>, TaskError>;
    fn remove(&self, id: &str) -> Result<(), TaskError>;
}

/// In-process store backed by a mutexed map.
#[derive(Default)]
pub struct MemoryTaskStore {
    rows: Mutex<HashMap<String, Task>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Task>>, TaskError> {
        self.rows
            .lock()
            .map_err(|e| TaskError::Store(format!("store mutex poisoned: {e}")))
    }
}

impl TaskStore for MemoryTaskStore {
    fn put(&self, task: &Task) -> Result<(), TaskError> {
        self.lock()?.insert(task.id.clone(), task.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Task>, TaskError> {
        Ok(self.lock()?.get(id).cloned())
    }

    fn list(&self) -> Result<Vec<Task>, TaskError> {
        Ok(self.lock()?.values().cloned().collect())
    }

    fn remove(&self, id: &str) -> Result<(), TaskError> {
        self.lock()?.remove(id);
        Ok(())
    }
}

// ============================================================================
// Supervisor
// ============================================================================

/// Aggregate counters for the `/stats` endpoint.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskCounters {
    pub total_optimizations: u64,
    pub active_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
}

/// Owns the store handle and the per-task cancellation flags.
#[derive(Clone)]
pub struct TaskSupervisor {
    store: Arc<dyn TaskStore>,
    cancels: Arc<Mutex<HashMap<String, CancelFlag>>>,
}

impl TaskSupervisor {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            cancels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Persist a new pending row and return its id.
    pub fn create_pending(&self, input: OptimizeInput) -> Result<String, TaskError> {
        let id = new_task_id();
        let now = Utc::now();
        let task = Task {
            id: id.clone(),
            status: TaskStatus::Pending,
            progress: 0,
            message: "queued".into(),
            input,
            results: None,
            error: None,
            execution_time: None,
            created_at: now,
            updated_at: now,
        };
        self.store.put(&task)?;
        info!(task = %id, "task created");
        Ok(id)
    }

    /// Fire-and-forget worker entrypoint: the HTTP response returns before any
    /// planning starts.
    pub fn spawn(&self, task_id: String) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            supervisor.run_task(task_id).await;
        });
    }

    /// The background worker. Runs the engine on the blocking pool and writes
    /// the terminal row. Public so tests (and the CLI) can drive a task to
    /// completion without the spawn indirection.
    pub async fn run_task(&self, task_id: String) {
        let task = match self.store.get(&task_id) {
            Ok(Some(task)) => task,
            Ok(None) => {
                warn!(task = %task_id, "worker started for unknown task");
                return;
            }
            Err(e) => {
                error!(task = %task_id, error = %e, "worker could not load task");
                return;
            }
        };
        // A cancel can land between creation and pickup; terminal rows stay.
        if task.status != TaskStatus::Pending {
            return;
        }

        let cancel = CancelFlag::new();
        if let Ok(mut cancels) = self.cancels.lock() {
            cancels.insert(task_id.clone(), cancel.clone());
        }

        self.transition(&task_id, |t| {
            t.status = TaskStatus::Running;
            t.progress = 5;
            t.message = "optimization started".into();
        });

        let progress = StoreProgress {
            supervisor: self.clone(),
            task_id: task_id.clone(),
            last: AtomicU8::new(5),
        };

        let input = task.input.clone();
        let engine_cancel = cancel.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            optimize(&input, &progress, &engine_cancel)
        })
        .await;

        if let Ok(mut cancels) = self.cancels.lock() {
            cancels.remove(&task_id);
        }
        if cancel.is_cancelled() {
            // The cancel path already wrote the terminal row; the engine's
            // outcome must not overwrite it.
            return;
        }

        match outcome {
            Ok(Ok(result)) => {
                self.transition(&task_id, |t| {
                    t.status = TaskStatus::Completed;
                    t.progress = 100;
                    t.message = "optimization completed".into();
                    t.execution_time = Some(elapsed_ms(t.created_at));
                    t.results = Some(result.clone());
                });
                info!(task = %task_id, "task completed");
            }
            Ok(Err(EngineError::InvalidConstraints(report))) => {
                let detail = report
                    .violations
                    .iter()
                    .map(|v| v.message.clone())
                    .collect::<Vec<_>>()
                    .join("; ");
                self.transition(&task_id, |t| {
                    t.status = TaskStatus::Failed;
                    t.message = "constraint validation failed".into();
                    t.error = Some(format!("constraint validation failed: {detail}"));
                    t.execution_time = Some(elapsed_ms(t.created_at));
                });
                warn!(task = %task_id, "task failed validation");
            }
            Ok(Err(EngineError::Cancelled)) => {
                // Cancel observed inside the engine after the flag check
                // above raced; the terminal row is already written.
            }
            Err(join_error) => {
                self.transition(&task_id, |t| {
                    t.status = TaskStatus::Failed;
                    t.message = "internal error".into();
                    t.error = Some(format!("optimizer worker crashed: {join_error}"));
                    t.execution_time = Some(elapsed_ms(t.created_at));
                });
                error!(task = %task_id, error = %join_error, "task worker crashed");
            }
        }
    }

    /// Fetch one row. Opportunistically sweeps expired rows first.
    pub fn get_task(&self, id: &str) -> Result<Option<Task>, TaskError> {
        self.cleanup_expired();
        self.store.get(id)
    }

    /// Most-recent-first listing with an optional status filter.
    pub fn list_tasks(
        &self,
        limit: usize,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>, TaskError> {
        self.cleanup_expired();
        let mut tasks = self.store.list()?;
        if let Some(status) = status {
            tasks.retain(|t| t.status == status);
        }
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks.truncate(limit);
        Ok(tasks)
    }

    /// Cancel a pending or running task. Terminal tasks reject the request.
    pub fn cancel(&self, id: &str) -> Result<Task, TaskError> {
        let task = self
            .store
            .get(id)?
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        if task.status.is_terminal() {
            return Err(TaskError::AlreadyTerminal {
                id: id.to_string(),
                status: task.status,
            });
        }

        if let Ok(cancels) = self.cancels.lock() {
            if let Some(flag) = cancels.get(id) {
                flag.cancel();
            }
        }
        let updated = self.transition(id, |t| {
            t.status = TaskStatus::Cancelled;
            t.message = "cancelled by user".into();
            t.execution_time = Some(elapsed_ms(t.created_at));
        });
        info!(task = %id, "task cancelled");
        updated.ok_or_else(|| TaskError::NotFound(id.to_string()))
    }

    /// Delete terminal rows older than 24 hours. Best-effort: errors are
    /// logged and swallowed so read paths never fail on housekeeping.
    pub fn cleanup_expired(&self) -> usize {
        let cutoff = Utc::now() - Duration::hours(EXPIRY_HOURS);
        let tasks = match self.store.list() {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(error = %e, "cleanup scan failed");
                return 0;
            }
        };
        let mut removed = 0;
        for task in tasks {
            if task.status.is_terminal() && task.updated_at < cutoff {
                if let Err(e) = self.store.remove(&task.id) {
                    warn!(task = %task.id, error = %e, "cleanup delete failed");
                } else {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            info!(removed, "expired tasks removed");
        }
        removed
    }

    pub fn counters(&self) -> Result<TaskCounters, TaskError> {
        let tasks = self.store.list()?;
        let mut c = TaskCounters {
            total_optimizations: tasks.len() as u64,
            ..TaskCounters::default()
        };
        for task in &tasks {
            match task.status {
                TaskStatus::Pending | TaskStatus::Running => c.active_tasks += 1,
                TaskStatus::Completed => c.completed_tasks += 1,
                TaskStatus::Failed | TaskStatus::Cancelled => c.failed_tasks += 1,
            }
        }
        Ok(c)
    }

    /// Apply a mutation to a row, bumping `updated_at`. Terminal rows are
    /// never modified; `created_at` never changes. The store write retries
    /// once before giving up (progress writes are best-effort).
    fn transition(&self, id: &str, mutate: impl FnOnce(&mut Task)) -> Option<Task> {
        let mut task = match self.store.get(id) {
            Ok(Some(task)) => task,
            _ => return None,
        };
        if task.status.is_terminal() {
            return None;
        }
        mutate(&mut task);
        task.updated_at = Utc::now();
        if let Err(first) = self.store.put(&task) {
            warn!(task = %id, error = %first, "store write failed; retrying once");
            if let Err(second) = self.store.put(&task) {
                error!(task = %id, error = %second, "store write failed twice");
                return None;
            }
        }
        Some(task)
    }
}

/// Progress sink that debounces into the task row: only forward motion below
/// the running cap is written.
struct StoreProgress {
    supervisor: TaskSupervisor,
    task_id: String,
    last: AtomicU8,
}

impl ProgressSink for StoreProgress {
    fn report(&self, percent: u8, message: &str) {
        let capped = percent.min(RUNNING_PROGRESS_CAP);
        let previous = self.last.fetch_max(capped, Ordering::Relaxed);
        if capped <= previous {
            return;
        }
        let message = message.to_string();
        self.supervisor.transition(&self.task_id, |t| {
            if t.status == TaskStatus::Running && capped > t.progress {
                t.progress = capped;
                t.message = message;
            }
        });
    }
}

fn elapsed_ms(created_at: DateTime<Utc>) -> u64 {
    (Utc::now() - created_at).num_milliseconds().max(0) as u64
}

fn new_task_id() -> String {
    let epoch_ms = Utc::now().timestamp_millis();
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("task_{}_{:06}", epoch_ms, suffix)
}

// ============================================================================
// Tests
// ============================================================================
