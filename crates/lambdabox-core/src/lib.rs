//! Sandboxed execution engine for short-lived, untrusted user functions.
//!
//! A function's source is staged to a temporary file and run inside a
//! memory-capped, network-disabled container, either a standard one or one
//! under a syscall-intercepting runtime. The engine enforces the caller's
//! timeout, derives memory and CPU metrics from the container's telemetry and
//! removes the container on every exit path. When no container backend is
//! reachable it degrades to running the code as a plain host process.
//!
//! # Architecture Overview
//!
//! - **Staging**: one fresh file per execution attempt
//! - **Backends**: Docker containers, standard or hardened, behind a trait seam
//! - **Registry**: single-flight, reference-counted cache of live sandboxes
//! - **Metrics**: CPU percentage and memory from raw telemetry
//! - **Fallback**: unconfined host execution with placeholder metrics
//! - **Engine**: the coordinator tying the above together
//! - **Store**: the persistence collaborator for source and execution logs

pub mod backend;
pub mod config;
pub mod engine;
pub mod errors;
pub mod fallback;
pub mod metrics;
pub mod registry;
pub mod staging;
pub mod store;
pub mod types;

pub use backend::{BackendFactory, DockerBackendFactory, IsolationBackend};
pub use config::{ConfigLoader, EngineConfig};
pub use engine::Engine;
pub use errors::EngineError;
pub use store::{FunctionStore, InMemoryFunctionStore};
pub use types::*;
