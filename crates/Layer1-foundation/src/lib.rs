//! # taskgate-foundation
//!
//! Foundation layer for taskgate:
//! - Error: the shared error type
//! - Config: gateway and server settings (global + project merge)
//! - Storage: JSON file store
//! - Redact: masking of sensitive values before logging

pub mod config;
pub mod error;
pub mod redact;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config
// ============================================================================
pub use config::{GatewayConfig, ServerConfig, TaskgateConfig, CONFIG_FILE};

// ============================================================================
// Storage
// ============================================================================
pub use storage::JsonStore;

pub use redact::mask_sensitive;
