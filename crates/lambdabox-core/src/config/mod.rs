//! Configuration module for the execution engine
//!
//! Supports YAML configuration files and programmatic construction. Every
//! field carries a default, so an empty file yields a working engine that
//! reproduces the historical behavior of the platform.

pub mod types;
pub mod loader;

pub use types::*;
pub use loader::*;


use crate::errors::EngineError;
use std::path::Path;

/// Load a configuration from a YAML file
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<EngineConfig, EngineError> {
    ConfigLoader::from_file(path).await
}

/// Validate a configuration
pub fn validate_config(config: &EngineConfig) -> Result<(), EngineError> {
    config.validate()
}
