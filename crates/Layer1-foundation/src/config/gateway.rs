//! Taskgate Config - combined settings
//!
//! Everything the gateway needs (allow-list, timeout, output cap, concurrency
//! limits, cancellation grace period) comes from here; nothing is hardcoded
//! in the gateway itself.

use crate::storage::{load_path, JsonStore};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Config file name inside a store
pub const CONFIG_FILE: &str = "config.json";

// ============================================================================
// Taskgate Config (combined)
// ============================================================================

/// Combined configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskgateConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

impl TaskgateConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load / Save
    // ========================================================================

    /// Load global then project settings (project wins), then validate
    pub fn load() -> Result<Self> {
        let mut config = Self::new();

        if let Ok(global) = JsonStore::global() {
            if let Some(global_config) = global.load_optional::<TaskgateConfig>(CONFIG_FILE)? {
                debug!("Loaded global config from {}", global.base_dir().display());
                config.merge(global_config);
            }
        }

        let project = JsonStore::current_project()?;
        if let Some(project_config) = project.load_optional::<TaskgateConfig>(CONFIG_FILE)? {
            debug!("Loaded project config from {}", project.base_dir().display());
            config.merge(project_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit file, then validate
    pub fn load_from(path: &Path) -> Result<Self> {
        let config: TaskgateConfig = load_path(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Save into a project store
    pub fn save_project(&self, root: impl Into<PathBuf>) -> Result<PathBuf> {
        let store = JsonStore::project(root);
        store.save(CONFIG_FILE, self)?;
        Ok(store.file_path(CONFIG_FILE))
    }

    // ========================================================================
    // Merge / Validate
    // ========================================================================

    /// Merge another config into this one (other wins where it deviates from defaults)
    pub fn merge(&mut self, other: TaskgateConfig) {
        self.gateway.merge(other.gateway);
        self.server.merge(other.server);
    }

    pub fn validate(&self) -> Result<()> {
        self.gateway.validate()?;
        self.server.validate()
    }
}

// ============================================================================
// Gateway Config
// ============================================================================

/// Limits and allow-list for the command gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    /// Permitted programs, optionally with required leading arguments ("git status")
    pub allowed_commands: Vec<String>,

    /// Wall-clock limit per task
    pub timeout_ms: u64,

    /// Combined stdout + stderr cap per task
    pub max_output_bytes: usize,

    /// Tasks allowed to run at once
    pub max_concurrent: usize,

    /// Tasks allowed to wait for a slot
    pub max_pending: usize,

    /// How long a cancelled task may take to exit before it is killed
    pub cancel_grace_ms: u64,

    /// Finished tasks kept in the registry
    pub retain_finished: usize,

    /// Working directory for shell tasks (inherits the server's when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            allowed_commands: default_allowed_commands(),
            timeout_ms: 30_000,
            max_output_bytes: 1024 * 1024,
            max_concurrent: 4,
            max_pending: 256,
            cancel_grace_ms: 5_000,
            retain_finished: 1000,
            working_dir: None,
        }
    }
}

/// Read-only programs whose arguments cannot redirect output to a file
fn default_allowed_commands() -> Vec<String> {
    ["ls", "pwd", "echo", "git status"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    fn merge(&mut self, other: GatewayConfig) {
        let defaults = GatewayConfig::default();

        if other.allowed_commands != defaults.allowed_commands {
            self.allowed_commands = other.allowed_commands;
        }
        if other.timeout_ms != defaults.timeout_ms {
            self.timeout_ms = other.timeout_ms;
        }
        if other.max_output_bytes != defaults.max_output_bytes {
            self.max_output_bytes = other.max_output_bytes;
        }
        if other.max_concurrent != defaults.max_concurrent {
            self.max_concurrent = other.max_concurrent;
        }
        if other.max_pending != defaults.max_pending {
            self.max_pending = other.max_pending;
        }
        if other.cancel_grace_ms != defaults.cancel_grace_ms {
            self.cancel_grace_ms = other.cancel_grace_ms;
        }
        if other.retain_finished != defaults.retain_finished {
            self.retain_finished = other.retain_finished;
        }
        if other.working_dir.is_some() {
            self.working_dir = other.working_dir;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(Error::Config("gateway.timeoutMs must be greater than 0".into()));
        }
        if self.max_output_bytes == 0 {
            return Err(Error::Config(
                "gateway.maxOutputBytes must be greater than 0".into(),
            ));
        }
        if self.max_concurrent == 0 {
            return Err(Error::Config(
                "gateway.maxConcurrent must be greater than 0".into(),
            ));
        }
        if self.max_pending == 0 {
            return Err(Error::Config(
                "gateway.maxPending must be greater than 0".into(),
            ));
        }
        if self
            .allowed_commands
            .iter()
            .any(|entry| entry.trim().is_empty())
        {
            return Err(Error::Config(
                "gateway.allowedCommands must not contain empty entries".into(),
            ));
        }
        Ok(())
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn with_allowed_commands<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_commands = commands.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_max_pending(mut self, max: usize) -> Self {
        self.max_pending = max;
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace_ms = grace.as_millis() as u64;
        self
    }

    pub fn with_retain_finished(mut self, count: usize) -> Self {
        self.retain_finished = count;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

// ============================================================================
// Server Config
// ============================================================================

/// HTTP server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub host: String,

    pub port: u16,

    /// Allowed CORS origin; no CORS layer when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cors_origin: Option<String>,

    /// Request body limit
    pub max_request_bytes: usize,

    /// Directory for rolling log files; stderr only when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            cors_origin: None,
            max_request_bytes: 1024 * 1024,
            log_dir: None,
        }
    }
}

impl ServerConfig {
    fn merge(&mut self, other: ServerConfig) {
        let defaults = ServerConfig::default();

        if other.host != defaults.host {
            self.host = other.host;
        }
        if other.port != defaults.port {
            self.port = other.port;
        }
        if other.cors_origin.is_some() {
            self.cors_origin = other.cors_origin;
        }
        if other.max_request_bytes != defaults.max_request_bytes {
            self.max_request_bytes = other.max_request_bytes;
        }
        if other.log_dir.is_some() {
            self.log_dir = other.log_dir;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("server.host must not be empty".into()));
        }
        if self.max_request_bytes == 0 {
            return Err(Error::Config(
                "server.maxRequestBytes must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: TaskgateConfig =
            serde_json::from_str(r#"{ "gateway": { "maxConcurrent": 2 } }"#).unwrap();

        assert_eq!(config.gateway.max_concurrent, 2);
        assert_eq!(config.gateway.timeout(), Duration::from_secs(30));
        assert_eq!(config.gateway.cancel_grace(), Duration::from_secs(5));
        assert_eq!(config.server.port, 8000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_merge_project_over_global() {
        let mut global = TaskgateConfig::new();
        global.gateway.allowed_commands = vec!["ls".into(), "pwd".into()];
        global.server.port = 9000;

        let mut project = TaskgateConfig::new();
        project.gateway.timeout_ms = 1_000;

        let mut config = TaskgateConfig::new();
        config.merge(global);
        config.merge(project);

        assert_eq!(config.gateway.allowed_commands, vec!["ls", "pwd"]);
        assert_eq!(config.gateway.timeout_ms, 1_000);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.addr(), "127.0.0.1:9000");
    }

    #[test]
    fn test_log_dir_from_file_and_merge() {
        let config: TaskgateConfig =
            serde_json::from_str(r#"{ "server": { "logDir": "/var/log/taskgate" } }"#).unwrap();
        assert_eq!(
            config.server.log_dir.as_deref(),
            Some(std::path::Path::new("/var/log/taskgate"))
        );

        let mut merged = TaskgateConfig::new();
        merged.merge(config);
        merged.merge(TaskgateConfig::new());
        assert!(merged.server.log_dir.is_some());

        let unset = serde_json::to_value(TaskgateConfig::new()).unwrap();
        assert!(unset["server"].get("logDir").is_none());
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let config = GatewayConfig::default().with_max_concurrent(0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = GatewayConfig::default().with_timeout(Duration::ZERO);
        assert!(config.validate().is_err());

        let config = GatewayConfig::default().with_allowed_commands(["ls", "  "]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_from() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = TaskgateConfig::new();
        config.gateway = GatewayConfig::default()
            .with_allowed_commands(["ls"])
            .with_cancel_grace(Duration::from_millis(250));

        let path = config.save_project(dir.path()).unwrap();
        let loaded = TaskgateConfig::load_from(&path).unwrap();

        assert_eq!(loaded, config);
        assert_eq!(loaded.gateway.cancel_grace_ms, 250);
    }

    #[test]
    fn test_load_from_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "gateway": { "maxOutputBytes": 0 } }"#).unwrap();

        assert!(TaskgateConfig::load_from(&path).is_err());
    }
}
