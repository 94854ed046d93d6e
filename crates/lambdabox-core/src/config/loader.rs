//! Configuration loader for YAML files

use crate::config::types::EngineConfig;
use crate::errors::EngineError;
use std::path::Path;
use tokio::fs;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<EngineConfig, EngineError> {
        let path = path.as_ref();

        let content = fs::read_to_string(path).await.map_err(|e| {
            EngineError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_str(content: &str) -> Result<EngineConfig, EngineError> {
        // serde_yaml maps an empty document to unit, not to an empty mapping
        let config: EngineConfig = if content.trim().is_empty() {
            EngineConfig::default()
        } else {
            serde_yaml::from_str(content)
                .map_err(|e| EngineError::Config(format!("Failed to parse YAML config: {}", e)))?
        };

        config.validate()?;
        Ok(config)
    }
}
