//! Task types tracked by the ledger.

use crate::project::GenerationResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a task was created to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Build a new project from a description
    Generate,
    /// Change an existing project according to an instruction
    Modify,
    /// Package a project for download
    Export,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Generate => write!(f, "generate"),
            TaskKind::Modify => write!(f, "modify"),
            TaskKind::Export => write!(f, "export"),
        }
    }
}

/// Task lifecycle status.
///
/// `Pending -> Processing -> {Completed | Failed | Timeout}`; the last three
/// are terminal and sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created, work not started yet
    Pending,
    /// Work in flight
    Processing,
    /// Finished with a payload
    Completed,
    /// The fallback path itself broke
    Failed,
    /// The watchdog fired before the work finished
    Timeout,
}

impl TaskStatus {
    /// Whether no further updates are accepted.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Timeout
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Processing => write!(f, "processing"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Timeout => write!(f, "timeout"),
        }
    }
}

/// Fields merged into a task by an update. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub payload: Option<GenerationResult>,
    pub error: Option<String>,
}

impl TaskPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn payload(mut self, payload: GenerationResult) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// A unit of trackable asynchronous work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier
    pub id: Uuid,
    /// What the task does
    pub kind: TaskKind,
    /// The description or instruction the task was created with
    pub description: String,
    /// Current status
    pub status: TaskStatus,
    /// Advisory completion percentage (0-100)
    pub progress: u8,
    /// Latest human-readable status line
    pub message: String,
    /// Produced project, once completed
    pub payload: Option<GenerationResult>,
    /// Failure description, for failed and timed-out tasks
    pub error: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last mutation; for terminal tasks, the completion time
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a pending task
    pub fn new(kind: TaskKind, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            description: description.into(),
            status: TaskStatus::Pending,
            progress: 0,
            message: "Task queued".to_string(),
            payload: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a status change and merge `patch`.
    ///
    /// Returns `false` without touching anything when the task is already
    /// terminal.
    pub fn apply(&mut self, status: TaskStatus, patch: TaskPatch) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        self.status = status;
        if let Some(progress) = patch.progress {
            self.progress = progress.min(100);
        }
        if let Some(message) = patch.message {
            self.message = message;
        }
        if let Some(payload) = patch.payload {
            self.payload = Some(payload);
        }
        if let Some(error) = patch.error {
            self.error = Some(error);
        }
        if status == TaskStatus::Completed {
            self.progress = 100;
        }
        self.updated_at = Utc::now();
        true
    }

    /// Read-only view handed to pollers.
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            kind: self.kind,
            status: self.status,
            progress: self.progress,
            message: self.message.clone(),
            result: self.payload.clone(),
            error: self.error.clone(),
        }
    }
}

/// What `poll` returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: Uuid,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub progress: u8,
    pub message: String,
    pub result: Option<GenerationResult>,
    pub error: Option<String>,
}
