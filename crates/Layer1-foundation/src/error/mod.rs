//! Error types for taskgate
//!
//! Every synchronous failure in the workspace funnels through [`Error`].
//! Execution-time failures (timeouts, output caps, non-zero exits) are not
//! errors; they are captured into task state by the gateway.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// taskgate error type
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // Gateway
    // ========================================================================
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Task queue is full ({0} pending tasks)")]
    QueueFull(usize),

    // ========================================================================
    // General
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ========================================================================
    // External conversions
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // Other
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the message can be shown to a remote client as-is
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::InvalidCommand(_)
                | Error::QueueFull(_)
                | Error::NotFound(_)
                | Error::InvalidInput(_)
        )
    }

    /// Short machine-friendly kind, used in API error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "ConfigError",
            Error::InvalidCommand(_) => "InvalidCommand",
            Error::QueueFull(_) => "QueueFull",
            Error::NotFound(_) => "NotFound",
            Error::InvalidInput(_) => "InvalidInput",
            Error::Io(_) | Error::Json(_) | Error::Internal(_) => "InternalError",
        }
    }

    /// Invalid command helper
    pub fn invalid_command(reason: impl Into<String>) -> Self {
        Error::InvalidCommand(reason.into())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}
