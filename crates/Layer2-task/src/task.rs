//! Task definition and types

use crate::state::TaskStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use taskgate_foundation::Error;
use uuid::Uuid;

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a new random TaskId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| Error::InvalidInput(format!("'{}' is not a valid task id", s)))
    }
}

/// A request as it arrives at the gateway
#[derive(Debug, Clone)]
pub enum TaskRequest {
    /// Raw, untrusted command line
    Command(String),

    /// Browser-automation instruction payload
    Browser(serde_json::Value),
}

/// What a task does
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TaskKind {
    ShellCommand {
        #[serde(rename = "rawText")]
        raw_text: String,
    },

    BrowserAutomation { instruction: serde_json::Value },
}

impl TaskKind {
    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::ShellCommand { .. } => "shell",
            TaskKind::BrowserAutomation { .. } => "browser",
        }
    }

    pub fn is_shell(&self) -> bool {
        matches!(self, TaskKind::ShellCommand { .. })
    }
}

/// Captured output of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TaskResult {
    Shell {
        stdout: String,
        stderr: String,
        #[serde(rename = "exitCode")]
        exit_code: Option<i32>,
    },

    Browser { data: serde_json::Value },
}

impl TaskResult {
    pub fn stdout(&self) -> Option<&str> {
        match self {
            TaskResult::Shell { stdout, .. } => Some(stdout),
            TaskResult::Browser { .. } => None,
        }
    }

    pub fn stderr(&self) -> Option<&str> {
        match self {
            TaskResult::Shell { stderr, .. } => Some(stderr),
            TaskResult::Browser { .. } => None,
        }
    }
}

/// Why a task ended in `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    TimeoutExceeded,
    OutputTooLarge,
    ExecutionFailed,
}

/// Failure details; `message` is safe to show to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub reason: FailureReason,
    pub message: String,
}

impl TaskFailure {
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

/// Snapshot of a task
///
/// The gateway owns the live copy; everything handed out is a clone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,

    pub kind: TaskKind,

    pub status: TaskStatus,

    pub submitted_at: DateTime<Utc>,

    pub started_at: Option<DateTime<Utc>>,

    pub finished_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<TaskFailure>,
}

impl Task {
    /// Create a new pending task
    pub fn new(kind: TaskKind) -> Self {
        Self {
            id: TaskId::new(),
            kind,
            status: TaskStatus::Pending,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            failure: None,
        }
    }

    fn advance(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        true
    }

    /// Mark task as running
    pub fn start(&mut self) -> bool {
        if !self.advance(TaskStatus::Running) {
            return false;
        }
        self.started_at = Some(Utc::now());
        true
    }

    /// Mark task as completed successfully
    pub fn complete(&mut self, result: TaskResult) -> bool {
        if !self.advance(TaskStatus::Completed) {
            return false;
        }
        self.result = Some(result);
        self.finished_at = Some(Utc::now());
        true
    }

    /// Mark task as failed
    pub fn fail(&mut self, failure: TaskFailure, result: Option<TaskResult>) -> bool {
        if !self.advance(TaskStatus::Failed) {
            return false;
        }
        self.failure = Some(failure);
        self.result = result;
        self.finished_at = Some(Utc::now());
        true
    }

    /// Mark task as cancelled
    pub fn cancel(&mut self) -> bool {
        if !self.advance(TaskStatus::Cancelled) {
            return false;
        }
        self.finished_at = Some(Utc::now());
        true
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Get execution duration if task has started
    pub fn duration(&self) -> Option<Duration> {
        let start = self.started_at?;
        let end = self.finished_at.unwrap_or_else(Utc::now);
        Some((end - start).to_std().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(raw: &str) -> Task {
        Task::new(TaskKind::ShellCommand {
            raw_text: raw.to_string(),
        })
    }

    #[test]
    fn test_lifecycle_timestamps() {
        let mut task = shell("ls");
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.duration().is_none());

        assert!(task.start());
        assert!(task.started_at.is_some());

        let result = TaskResult::Shell {
            stdout: "a\n".into(),
            stderr: String::new(),
            exit_code: Some(0),
        };
        assert!(task.complete(result.clone()));
        assert_eq!(task.result, Some(result));
        assert!(task.finished_at.is_some());
        assert!(task.duration().is_some());
    }

    #[test]
    fn test_terminal_is_immutable() {
        let mut task = shell("ls");
        assert!(task.cancel());
        let snapshot = task.clone();

        assert!(!task.start());
        assert!(!task.cancel());
        assert!(!task.fail(
            TaskFailure::new(FailureReason::ExecutionFailed, "late"),
            None
        ));
        assert_eq!(task, snapshot);
    }

    #[test]
    fn test_task_id_round_trip() {
        let id = TaskId::new();
        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<TaskId>().is_err());
    }

    #[test]
    fn test_snapshot_json_shape() {
        let mut task = shell("echo hi");
        task.start();
        task.fail(
            TaskFailure::new(FailureReason::TimeoutExceeded, "timed out"),
            Some(TaskResult::Shell {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: None,
            }),
        );

        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["kind"]["type"], "shellCommand");
        assert_eq!(json["kind"]["rawText"], "echo hi");
        assert_eq!(json["status"], "Failed");
        assert_eq!(json["failure"]["reason"], "TimeoutExceeded");
        assert_eq!(json["result"]["type"], "shell");
        assert!(json["submittedAt"].is_string());
        assert!(json["finishedAt"].is_string());
    }
}
