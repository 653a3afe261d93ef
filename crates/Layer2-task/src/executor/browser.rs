//! Browser executor - runs browser-automation tasks through a driver
//!
//! The automation driver itself is an external collaborator behind
//! [`BrowserDriver`]. This executor applies the same bounds as shell tasks:
//! wall-clock timeout, output cap (serialized result size) and cancellation.
//! Cancelling drops the driver future, which aborts the session.

use crate::executor::{CapturedOutput, ExecutionOutcome, Executor, Job};
use crate::task::TaskId;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use taskgate_foundation::{mask_sensitive, GatewayConfig};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Errors reported by an automation driver
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Driver unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid instruction: {0}")]
    InvalidInstruction(String),

    #[error("Automation failed: {0}")]
    Failed(String),
}

/// Browser-automation driver
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Perform an instruction and return a structured result
    async fn run(&self, instruction: &Value) -> Result<Value, DriverError>;

    /// Get driver name
    fn name(&self) -> &'static str;
}

/// Placeholder driver that acknowledges the instruction without automating anything
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoDriver;

#[async_trait]
impl BrowserDriver for EchoDriver {
    async fn run(&self, instruction: &Value) -> Result<Value, DriverError> {
        Ok(json!({
            "status": "success",
            "message": "Browser task completed",
            "task": instruction,
        }))
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}

/// Browser executor configuration
#[derive(Debug, Clone)]
pub struct BrowserExecutorConfig {
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

impl From<&GatewayConfig> for BrowserExecutorConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            timeout: config.timeout(),
            max_output_bytes: config.max_output_bytes,
        }
    }
}

/// Executor for browser-automation jobs
pub struct BrowserExecutor {
    driver: Arc<dyn BrowserDriver>,
    config: BrowserExecutorConfig,
}

impl BrowserExecutor {
    pub fn new(driver: Arc<dyn BrowserDriver>, config: BrowserExecutorConfig) -> Self {
        Self { driver, config }
    }

    pub fn driver_name(&self) -> &'static str {
        self.driver.name()
    }

    async fn run(
        &self,
        task_id: TaskId,
        instruction: &Value,
        cancel: CancellationToken,
    ) -> ExecutionOutcome {
        debug!(
            "Running browser task {} via {}: {}",
            task_id,
            self.driver.name(),
            mask_sensitive(instruction)
        );

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Browser task {} aborted", task_id);
                return ExecutionOutcome::Cancelled;
            }
            _ = tokio::time::sleep(self.config.timeout) => {
                warn!(
                    "Browser task {} exceeded timeout of {:.1}s, aborting",
                    task_id,
                    self.config.timeout.as_secs_f64()
                );
                return ExecutionOutcome::TimedOut { output: CapturedOutput::default() };
            }
            result = self.driver.run(instruction) => result,
        };

        match result {
            Ok(data) => {
                let size = serde_json::to_vec(&data).map(|v| v.len()).unwrap_or(0);
                if size > self.config.max_output_bytes {
                    warn!(
                        "Browser task {} result is {} bytes, cap is {}",
                        task_id, size, self.config.max_output_bytes
                    );
                    return ExecutionOutcome::OutputTooLarge {
                        output: CapturedOutput::default(),
                    };
                }
                ExecutionOutcome::Browser(data)
            }
            Err(e) => ExecutionOutcome::failed("browser automation failed", e.to_string()),
        }
    }
}

#[async_trait]
impl Executor for BrowserExecutor {
    async fn execute(
        &self,
        task_id: TaskId,
        job: &Job,
        cancel: CancellationToken,
    ) -> ExecutionOutcome {
        match job {
            Job::Browser(instruction) => self.run(task_id, instruction, cancel).await,
            Job::Shell(_) => ExecutionOutcome::failed(
                "unsupported task kind",
                "BrowserExecutor can only execute browser jobs",
            ),
        }
    }

    fn name(&self) -> &'static str {
        "browser"
    }
}
