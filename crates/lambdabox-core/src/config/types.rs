//! Configuration type definitions for the execution engine
//!
//! The options that change observable behavior relative to the historical
//! platform (registry key mode, staged file retention, fallback label spoofing,
//! isolated timeout status) are grouped here so that each deviation is an
//! explicit, reviewable setting.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::EngineError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub staging: StagingConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Container parameters shared by the standard and hardened backends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_python_image")]
    pub python_image: String,
    #[serde(default = "default_node_image")]
    pub node_image: String,
    #[serde(default = "default_memory_limit")]
    pub memory_limit_bytes: u64,
    #[serde(default = "default_mount_dir")]
    pub mount_dir: String,
    /// OCI runtime selected for hardened sandboxes
    #[serde(default = "default_hardened_runtime")]
    pub hardened_runtime: String,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
}

/// How the sandbox registry keys its entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryKeyMode {
    /// Key embeds the per-request staging path; entries never hit
    StagedPath,
    /// Key is a digest of source, language and runtime flag
    ContentHash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_key_mode")]
    pub key_mode: RegistryKeyMode,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagingConfig {
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// Leave staged files on disk after the attempt
    #[serde(default)]
    pub keep_files: bool,
}

/// Host-process execution used when no backend is reachable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Report the requested runtime label even though nothing was isolated
    #[serde(default = "default_true")]
    pub spoof_runtime_label: bool,
    #[serde(default = "default_python_interpreter")]
    pub python_interpreter: String,
    #[serde(default = "default_node_interpreter")]
    pub node_interpreter: String,
    #[serde(default = "default_placeholder_memory")]
    pub placeholder_memory_bytes: u64,
    #[serde(default = "default_placeholder_cpu")]
    pub placeholder_cpu_percent: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Report isolated-path wait timeouts as `timeout` instead of `error`
    #[serde(default)]
    pub report_isolated_timeouts: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl SandboxConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl StagingConfig {
    pub fn directory(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        let sandbox = &self.sandbox;
        if sandbox.memory_limit_bytes == 0 {
            return Err(EngineError::Config(
                "sandbox.memory_limit_bytes must be greater than zero".to_string(),
            ));
        }
        if sandbox.python_image.trim().is_empty() || sandbox.node_image.trim().is_empty() {
            return Err(EngineError::Config(
                "sandbox images must not be empty".to_string(),
            ));
        }
        if !Path::new(&sandbox.mount_dir).is_absolute() {
            return Err(EngineError::Config(format!(
                "sandbox.mount_dir must be absolute, got '{}'",
                sandbox.mount_dir
            )));
        }
        if sandbox.hardened_runtime.trim().is_empty() {
            return Err(EngineError::Config(
                "sandbox.hardened_runtime must not be empty".to_string(),
            ));
        }

        let fallback = &self.fallback;
        if fallback.python_interpreter.trim().is_empty()
            || fallback.node_interpreter.trim().is_empty()
        {
            return Err(EngineError::Config(
                "fallback interpreters must not be empty".to_string(),
            ));
        }
        if fallback.placeholder_cpu_percent < 0.0 {
            return Err(EngineError::Config(
                "fallback.placeholder_cpu_percent must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_python_image() -> String {
    "lambda_base_python".to_string()
}

fn default_node_image() -> String {
    "lambda_base_node".to_string()
}

fn default_memory_limit() -> u64 {
    128 * 1024 * 1024
}

fn default_mount_dir() -> String {
    "/app".to_string()
}

fn default_hardened_runtime() -> String {
    "runsc".to_string()
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_name_prefix() -> String {
    "lambda_".to_string()
}

fn default_key_mode() -> RegistryKeyMode {
    RegistryKeyMode::StagedPath
}

fn default_true() -> bool {
    true
}

fn default_python_interpreter() -> String {
    "python3".to_string()
}

fn default_node_interpreter() -> String {
    "node".to_string()
}

fn default_placeholder_memory() -> u64 {
    12 * 1024 * 1024
}

fn default_placeholder_cpu() -> f64 {
    0.5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            python_image: default_python_image(),
            node_image: default_node_image(),
            memory_limit_bytes: default_memory_limit(),
            mount_dir: default_mount_dir(),
            hardened_runtime: default_hardened_runtime(),
            settle_delay_ms: default_settle_delay_ms(),
            name_prefix: default_name_prefix(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            key_mode: default_key_mode(),
        }
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            spoof_runtime_label: true,
            python_interpreter: default_python_interpreter(),
            node_interpreter: default_node_interpreter(),
            placeholder_memory_bytes: default_placeholder_memory(),
            placeholder_cpu_percent: default_placeholder_cpu(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}
