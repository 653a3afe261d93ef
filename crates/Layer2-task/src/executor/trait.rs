//! Executor trait

use crate::executor::shell_policy::ParsedCommand;
use crate::task::TaskId;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Work handed to an executor
#[derive(Debug, Clone)]
pub enum Job {
    /// Validated program invocation
    Shell(ParsedCommand),

    /// Browser-automation instruction
    Browser(serde_json::Value),
}

/// Output captured from an execution unit, possibly truncated at the cap
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

/// How an execution unit ended
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Process exited on its own; `exit_code` is `None` when killed by a signal
    Exited {
        exit_code: Option<i32>,
        output: CapturedOutput,
    },

    /// Browser driver returned a result
    Browser(serde_json::Value),

    /// Wall-clock limit hit; the unit was killed
    TimedOut { output: CapturedOutput },

    /// Output cap hit; the unit was killed
    OutputTooLarge { output: CapturedOutput },

    /// Cancel token observed; the unit was terminated
    Cancelled,

    /// Unit could not run. `message` is client-safe, `detail` is for logs only
    Failed { message: String, detail: String },
}

impl ExecutionOutcome {
    pub fn failed(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            detail: detail.into(),
        }
    }
}

/// Executor trait - implement to add new execution backends
///
/// Executors never return errors; every way a unit can end is an
/// [`ExecutionOutcome`]. They must stop promptly once `cancel` fires.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run a job to completion, timeout, cap, or cancellation
    async fn execute(&self, task_id: TaskId, job: &Job, cancel: CancellationToken)
        -> ExecutionOutcome;

    /// Get executor name
    fn name(&self) -> &'static str;
}
