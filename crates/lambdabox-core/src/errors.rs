//! Error types for every failure mode of a function execution
//!
//! Errors are grouped by the pipeline step that produced them (staging, sandbox
//! creation, waiting, telemetry, cleanup) so the coordinator can decide which
//! ones are recovered locally, which become an error result, and which are only
//! logged. Nothing in this enum is ever raised past `Engine::execute`.

use thiserror::Error;

use crate::types::FunctionId;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Function {0} not found")]
    FunctionNotFound(FunctionId),
    #[error("Isolation backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("Error creating container: {0}")]
    SandboxCreation(String),
    #[error("{message}")]
    Wait { message: String, timed_out: bool },
    #[error("Failed to read container logs: {0}")]
    Logs(String),
    #[error("Failed to read container stats: {0}")]
    Stats(String),
    #[error("Error cleaning up container: {0}")]
    Cleanup(String),
    #[error("Could not stage function code: {0}")]
    Staging(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Function store error: {0}")]
    Store(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn wait_timeout(timeout_seconds: u64) -> Self {
        EngineError::Wait {
            message: format!(
                "Read timed out waiting for container after {}s",
                timeout_seconds
            ),
            timed_out: true,
        }
    }

    /// True only for a wait that ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::Wait { timed_out: true, .. })
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
