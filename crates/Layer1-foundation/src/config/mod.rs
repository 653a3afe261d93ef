//! Config - taskgate settings
//!
//! - `gateway.rs` - gateway limits and allow-list, HTTP server settings

mod gateway;

pub use gateway::{GatewayConfig, ServerConfig, TaskgateConfig, CONFIG_FILE};
