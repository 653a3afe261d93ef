//! # taskgate-task
//!
//! Supervised execution of untrusted task requests.
//!
//! ## Features
//!
//! - Allow-list validation of shell commands (no shell interpretation)
//! - Bounded concurrency with a bounded pending queue
//! - Timeouts, output caps and cancellation with process-group kill
//! - Browser-automation tasks behind a pluggable driver
//! - Bounded retention of finished tasks
//!
//! ## Example
//!
//! ```no_run
//! use taskgate_foundation::GatewayConfig;
//! use taskgate_task::{TaskGateway, TaskRequest};
//!
//! # async fn run() -> taskgate_foundation::Result<()> {
//! let gateway = TaskGateway::new(GatewayConfig::default())?;
//! let task_id = gateway.submit(TaskRequest::Command("ls".into()))?;
//! let task = gateway.wait(task_id, None).await?;
//! println!("{} -> {}", task.id, task.status);
//! # Ok(())
//! # }
//! ```

pub mod executor;
pub mod gateway;
pub mod state;
pub mod task;

pub use executor::{
    BrowserDriver, BrowserExecutor, BrowserExecutorConfig, CapturedOutput, CommandPolicy,
    DriverError, EchoDriver, ExecutionOutcome, Executor, Job, LocalExecutor, LocalExecutorConfig,
    ParsedCommand, FORBIDDEN_CHARS,
};
pub use gateway::{GatewayStats, TaskGateway};
pub use state::TaskStatus;
pub use task::{FailureReason, Task, TaskFailure, TaskId, TaskKind, TaskRequest, TaskResult};
