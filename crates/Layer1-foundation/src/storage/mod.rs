//! Storage module for taskgate
//!
//! - `json`: JSON file store used for configuration

mod json;

pub use json::JsonStore;

pub(crate) use json::load_path;
