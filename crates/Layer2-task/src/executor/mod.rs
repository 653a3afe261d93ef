//! Task executors
//!
//! Provides two execution backends:
//! - `LocalExecutor` - host process per shell task, bounded by timeout and output cap
//! - `BrowserExecutor` - browser-automation tasks through a `BrowserDriver`
//!
//! ## Security
//! - `CommandPolicy` - allow-list validation turning raw text into a `ParsedCommand`

pub mod browser;
pub mod local;
pub mod shell_policy;
pub mod r#trait;

pub use browser::{BrowserDriver, BrowserExecutor, BrowserExecutorConfig, DriverError, EchoDriver};
pub use local::{LocalExecutor, LocalExecutorConfig};
pub use r#trait::{CapturedOutput, ExecutionOutcome, Executor, Job};
pub use shell_policy::{CommandPolicy, ParsedCommand, FORBIDDEN_CHARS};
