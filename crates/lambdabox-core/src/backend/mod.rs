//! Isolation backends for sandboxed function execution.
//!
//! A backend starts the staged code inside a resource-constrained,
//! network-disabled sandbox and exposes wait, log, stats and teardown
//! operations on the resulting handle. Two strengths exist: `Standard`
//! containers and `Hardened` containers running under a syscall-intercepting
//! runtime. Backends are obtained through a `BackendFactory`, whose failure to
//! connect is the signal for the engine to fall back to host execution.

use async_trait::async_trait;
use std::sync::Arc;

use crate::errors::EngineError;
use crate::staging::EphemeralCodeFile;
use crate::types::{BackendKind, RawStats, SandboxHandle};

#[async_trait]
pub trait IsolationBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Start a detached sandbox running `code_file`.
    async fn create(&self, code_file: &EphemeralCodeFile) -> Result<SandboxHandle, EngineError>;

    /// Block until the sandboxed process exits; returns its exit code.
    async fn wait(&self, handle: &SandboxHandle, timeout_seconds: u64) -> Result<i64, EngineError>;

    /// Combined standard output and standard error of the sandbox.
    async fn logs(&self, handle: &SandboxHandle) -> Result<String, EngineError>;

    async fn stats(&self, handle: &SandboxHandle) -> Result<RawStats, EngineError>;

    /// Forced, best-effort teardown of everything the sandbox holds.
    async fn remove(&self, handle: &SandboxHandle) -> Result<(), EngineError>;
}

#[async_trait]
pub trait BackendFactory: Send + Sync {
    /// Connect to the backend of the given strength.
    ///
    /// Fails with `EngineError::BackendUnavailable` when no client can be
    /// established.
    async fn connect(&self, kind: BackendKind) -> Result<Arc<dyn IsolationBackend>, EngineError>;
}

pub mod docker;

pub use docker::{DockerBackend, DockerBackendFactory};
