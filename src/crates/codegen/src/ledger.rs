//! Task Ledger
//!
//! In-memory table of every task, keyed by id. Callers create a task, get its
//! id back immediately and poll it while the orchestrator writes progress into
//! it from a background future.
//!
//! Two timers keep the table honest:
//! - a per-task watchdog that marks a task `timeout` if it is still running
//!   after [`LedgerConfig::task_timeout`]
//! - a periodic sweep that does the same for anything the watchdog missed and
//!   deletes terminal tasks older than [`LedgerConfig::retention`]
//!
//! Neither timer cancels in-flight work. A late result written after a
//! timeout is dropped because terminal states are sticky.

use crate::config::LedgerConfig;
use crate::task::{Task, TaskKind, TaskPatch, TaskStatus};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Tasks force-marked `timeout`
    pub timed_out: Vec<Uuid>,
    /// Terminal tasks deleted after their retention window
    pub removed: Vec<Uuid>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.timed_out.is_empty() && self.removed.is_empty()
    }
}

/// Concurrent task table.
///
/// Shared as `Arc<TaskLedger>`; every operation is infallible and failure is
/// expressed through task state.
#[derive(Debug, Default)]
pub struct TaskLedger {
    tasks: Arc<DashMap<Uuid, Task>>,
    config: LedgerConfig,
}

impl TaskLedger {
    /// Create a ledger with default timings
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ledger with explicit timings
    pub fn with_config(config: LedgerConfig) -> Self {
        Self {
            tasks: Arc::new(DashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Allocate a pending task and return its id.
    ///
    /// When called inside a Tokio runtime a watchdog is scheduled for the
    /// task; outside one, only the sweep enforces the timeout.
    pub fn create(&self, kind: TaskKind, description: impl Into<String>) -> Uuid {
        let task = Task::new(kind, description);
        let id = task.id;
        self.tasks.insert(id, task);
        debug!(task_id = %id, kind = %kind, "Task created");

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let tasks = Arc::clone(&self.tasks);
            let timeout = self.config.task_timeout;
            handle.spawn(async move {
                tokio::time::sleep(timeout).await;
                expire(&tasks, id, timeout);
            });
        }

        id
    }

    /// Move a task to `status` and merge `patch`.
    ///
    /// Returns whether the update was applied. Unknown ids and terminal tasks
    /// are left alone.
    pub fn update(&self, id: Uuid, status: TaskStatus, patch: TaskPatch) -> bool {
        let Some(mut task) = self.tasks.get_mut(&id) else {
            warn!(task_id = %id, status = %status, "Update for unknown task ignored");
            return false;
        };

        let current = task.status;
        if !task.apply(status, patch) {
            warn!(
                task_id = %id,
                current = %current,
                requested = %status,
                "Update for terminal task ignored"
            );
            return false;
        }

        if status.is_terminal() {
            info!(task_id = %id, status = %status, "Task finished");
        }
        true
    }

    /// Clone of the task, if it exists
    pub fn get(&self, id: Uuid) -> Option<Task> {
        self.tasks.get(&id).map(|entry| entry.value().clone())
    }

    /// Remove a task. Returns whether anything was removed.
    pub fn delete(&self, id: Uuid) -> bool {
        self.tasks.remove(&id).is_some()
    }

    /// Snapshot of every task, oldest first
    pub fn list(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        tasks.sort_by_key(|task| task.created_at);
        tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Enforce timeouts and retention as of `now`.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        let overdue: Vec<Uuid> = self
            .tasks
            .iter()
            .filter(|entry| {
                !entry.status.is_terminal()
                    && age(now, entry.created_at) > self.config.task_timeout
            })
            .map(|entry| *entry.key())
            .collect();

        for id in overdue {
            if expire(&self.tasks, id, self.config.task_timeout) {
                report.timed_out.push(id);
            }
        }

        let retention = self.config.retention;
        self.tasks.retain(|id, task| {
            let keep = !task.status.is_terminal() || age(now, task.updated_at) <= retention;
            if !keep {
                report.removed.push(*id);
            }
            keep
        });

        if !report.is_empty() {
            info!(
                timed_out = report.timed_out.len(),
                removed = report.removed.len(),
                "Ledger sweep"
            );
        }
        report
    }

    /// Run [`sweep_at`](Self::sweep_at) every `sweep_interval` until the
    /// returned handle is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let ledger = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ledger.config.sweep_interval);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                ledger.sweep_at(Utc::now());
            }
        })
    }
}

/// Mark a task `timeout` if it is still running.
fn expire(tasks: &DashMap<Uuid, Task>, id: Uuid, timeout: Duration) -> bool {
    let Some(mut task) = tasks.get_mut(&id) else {
        return false;
    };

    let message = format!("Task timed out after {} seconds", timeout.as_secs());
    let applied = task.apply(
        TaskStatus::Timeout,
        TaskPatch::new().message(message.clone()).error(message),
    );
    if applied {
        warn!(task_id = %id, "Task timed out");
    }
    applied
}

fn age(now: DateTime<Utc>, since: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or_default()
}
