//! Task state machine

use serde::{Deserialize, Serialize};

/// Lifecycle status of a task
///
/// ```text
/// Pending -> Running -> Completed | Failed
/// Pending -> Cancelled
/// Running -> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Accepted, waiting for an execution slot
    Pending,

    /// Execution unit is running
    Running,

    /// Finished with exit code 0 (or a driver result)
    Completed,

    /// Finished unsuccessfully (non-zero exit, timeout, output cap, driver error)
    Failed,

    /// Stopped on request
    Cancelled,
}

impl TaskStatus {
    /// Check if this is a terminal state (cannot transition further)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, TaskStatus::Pending)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, TaskStatus::Running)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether `self -> next` is an edge of the state machine
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    /// Get display name for the state
    pub fn display_name(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::Running => "Running",
            TaskStatus::Completed => "Completed",
            TaskStatus::Failed => "Failed",
            TaskStatus::Cancelled => "Cancelled",
        }
    }

    /// Get a symbol for the state (for terminal output)
    pub fn symbol(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "◯",
            TaskStatus::Running => "⟳",
            TaskStatus::Completed => "✓",
            TaskStatus::Failed => "✗",
            TaskStatus::Cancelled => "⊘",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
