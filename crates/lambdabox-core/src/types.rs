//! Data model shared by the engine, the backends and the store

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::EngineError;

pub type FunctionId = i64;

/// Languages a function can be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Javascript,
}

impl Language {
    /// File extension used when staging source of this language.
    pub fn extension(&self) -> &'static str {
        match self {
            Language::Python => "py",
            Language::Javascript => "js",
        }
    }

    /// Interpreter invoked inside the sandbox image.
    pub fn sandbox_interpreter(&self) -> &'static str {
        match self {
            Language::Python => "python3",
            Language::Javascript => "node",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Javascript => "javascript",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "python" | "python3" | "py" => Ok(Language::Python),
            "javascript" | "node" | "nodejs" | "js" => Ok(Language::Javascript),
            other => Err(EngineError::InvalidRequest(format!(
                "Unsupported language: {}",
                other
            ))),
        }
    }
}

/// One call to the engine. Built from caller input and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub function_id: FunctionId,
    pub language: Language,
    pub timeout_seconds: u64,
    pub use_hardened_runtime: bool,
}

impl ExecutionRequest {
    pub fn new(function_id: FunctionId, language: Language, timeout_seconds: u64) -> Self {
        Self {
            function_id,
            language,
            timeout_seconds,
            use_hardened_runtime: false,
        }
    }

    pub fn hardened(mut self, use_hardened_runtime: bool) -> Self {
        self.use_hardened_runtime = use_hardened_runtime;
        self
    }

    pub fn backend_kind(&self) -> BackendKind {
        if self.use_hardened_runtime {
            BackendKind::Hardened
        } else {
            BackendKind::Standard
        }
    }
}

/// Isolation strength of a sandbox backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Standard,
    Hardened,
}

impl BackendKind {
    pub fn label(&self) -> RuntimeLabel {
        match self {
            BackendKind::Standard => RuntimeLabel::Standard,
            BackendKind::Hardened => RuntimeLabel::Hardened,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Standard => f.write_str("standard"),
            BackendKind::Hardened => f.write_str("hardened"),
        }
    }
}

/// Lifecycle of a sandbox. Ordered: a handle only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SandboxState {
    Created,
    Running,
    Exited,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxHandle {
    pub id: String,
    pub backend_kind: BackendKind,
    state: SandboxState,
}

impl SandboxHandle {
    pub fn new(id: impl Into<String>, backend_kind: BackendKind) -> Self {
        Self {
            id: id.into(),
            backend_kind,
            state: SandboxState::Created,
        }
    }

    pub fn state(&self) -> SandboxState {
        self.state
    }

    /// Moves the handle to `next`. Backward transitions are ignored.
    pub fn advance(&mut self, next: SandboxState) {
        if next < self.state {
            log::debug!(
                "Ignoring backward transition of sandbox {} from {:?} to {:?}",
                self.id,
                self.state,
                next
            );
            return;
        }
        self.state = next;
    }
}

/// Raw telemetry snapshot as reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawStats {
    pub cpu_usage_total: u64,
    pub pre_cpu_usage_total: u64,
    pub system_cpu_usage: u64,
    pub pre_system_cpu_usage: u64,
    pub memory_usage_bytes: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Error,
    Timeout,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Success => f.write_str("success"),
            ExecutionStatus::Error => f.write_str("error"),
            ExecutionStatus::Timeout => f.write_str("timeout"),
        }
    }
}

/// Label reported to the caller for the isolation that was (claimed to be) applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeLabel {
    Standard,
    Hardened,
    /// Fallback run with label spoofing switched off.
    Unsandboxed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    #[serde(rename = "result")]
    Output(String),
    #[serde(rename = "error")]
    Error(String),
}

/// The single artifact returned per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(flatten)]
    pub outcome: Outcome,
    pub status: ExecutionStatus,
    #[serde(rename = "exec_time")]
    pub exec_time_seconds: f64,
    #[serde(rename = "mem_usage")]
    pub mem_usage_bytes: u64,
    pub cpu_percent: f64,
    pub runtime: RuntimeLabel,
}

impl ExecutionResult {
    /// Error result with zeroed metrics.
    pub fn error(message: impl Into<String>, runtime: RuntimeLabel) -> Self {
        Self::error_with_status(message, ExecutionStatus::Error, runtime)
    }

    /// Like `error`, for failures reported under another status such as `Timeout`.
    pub fn error_with_status(
        message: impl Into<String>,
        status: ExecutionStatus,
        runtime: RuntimeLabel,
    ) -> Self {
        Self {
            outcome: Outcome::Error(message.into()),
            status,
            exec_time_seconds: 0.0,
            mem_usage_bytes: 0,
            cpu_percent: 0.0,
            runtime,
        }
    }

    /// Output text or error message, whichever the result carries.
    pub fn text(&self) -> &str {
        match &self.outcome {
            Outcome::Output(text) | Outcome::Error(text) => text,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_language_parsing() {
        assert_eq!("python".parse::<Language>().unwrap(), Language::Python);
        assert_eq!("Node".parse::<Language>().unwrap(), Language::Javascript);
        assert!("ruby".parse::<Language>().is_err());
        assert_eq!(Language::Javascript.extension(), "js");
    }

    #[test]
    fn test_handle_never_moves_backwards() {
        let mut handle = SandboxHandle::new("abc", BackendKind::Standard);
        assert_eq!(handle.state(), SandboxState::Created);
        handle.advance(SandboxState::Exited);
        handle.advance(SandboxState::Running);
        assert_eq!(handle.state(), SandboxState::Exited);
        handle.advance(SandboxState::Removed);
        assert_eq!(handle.state(), SandboxState::Removed);
    }

    #[test]
    fn test_result_serializes_with_api_field_names() {
        let result = ExecutionResult {
            outcome: Outcome::Output("hi\n".to_string()),
            status: ExecutionStatus::Success,
            exec_time_seconds: 0.1234,
            mem_usage_bytes: 2048,
            cpu_percent: 1.5,
            runtime: RuntimeLabel::Hardened,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!({
                "result": "hi\n",
                "status": "success",
                "exec_time": 0.1234,
                "mem_usage": 2048,
                "cpu_percent": 1.5,
                "runtime": "Hardened"
            })
        );

        let error = ExecutionResult::error("boom", RuntimeLabel::Standard);
        let value = serde_json::to_value(&error).unwrap();
        assert_eq!(value["error"], "boom");
        assert_eq!(value["status"], "error");
        assert!(value.get("result").is_none());
    }

    #[test]
    fn test_error_with_status_keeps_zeroed_metrics() {
        let result = ExecutionResult::error_with_status(
            "Error running the function: timed out",
            ExecutionStatus::Timeout,
            RuntimeLabel::Hardened,
        );
        assert_eq!(result.status, ExecutionStatus::Timeout);
        assert_eq!(result.text(), "Error running the function: timed out");
        assert_eq!(result.mem_usage_bytes, 0);
        assert_eq!(result.cpu_percent, 0.0);
        assert_eq!(result.runtime, RuntimeLabel::Hardened);
        assert!(!result.is_success());
    }
}
