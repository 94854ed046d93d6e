//! Execution coordinator
//!
//! Turns an `ExecutionRequest` into a run: fetch the source, stage it, pick the
//! isolated or the fallback path, wait for completion, collect metrics, and
//! tear the sandbox down on every exit path. `execute` never fails; anything
//! that goes wrong is folded into an error `ExecutionResult`.
//!
//! Two asymmetries between the paths, the first configurable:
//! - a wait timeout on the isolated path yields status `error`, while the
//!   fallback path reports `timeout` (`execution.report_isolated_timeouts`);
//! - a run on the isolated path is a success whenever the sandbox exited and
//!   telemetry was read, whatever the exit code of the function.

use std::sync::Arc;
use std::time::Instant;

use crate::backend::{BackendFactory, DockerBackendFactory, IsolationBackend};
use crate::config::EngineConfig;
use crate::errors::EngineError;
use crate::fallback::FallbackExecutor;
use crate::metrics::{self, round_to};
use crate::registry::{RegistryKey, SandboxRegistry};
use crate::staging::EphemeralCodeFile;
use crate::store::{ExecutionRecord, FunctionStore};
use crate::types::{
    BackendKind, ExecutionRequest, ExecutionResult, ExecutionStatus, Outcome, SandboxHandle,
    SandboxState,
};

pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn FunctionStore>,
    backends: Arc<dyn BackendFactory>,
    registry: Arc<SandboxRegistry>,
    fallback: FallbackExecutor,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn FunctionStore>,
        backends: Arc<dyn BackendFactory>,
    ) -> Self {
        let fallback = FallbackExecutor::new(config.fallback.clone());
        Self {
            config,
            store,
            backends,
            registry: Arc::new(SandboxRegistry::new()),
            fallback,
        }
    }

    /// Engine backed by the local Docker daemon.
    pub fn with_docker(config: EngineConfig, store: Arc<dyn FunctionStore>) -> Self {
        let backends = Arc::new(DockerBackendFactory::new(config.sandbox.clone()));
        Self::new(config, store, backends)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &SandboxRegistry {
        &self.registry
    }

    /// Whether a backend of the given strength can currently be reached.
    pub async fn probe(&self, kind: BackendKind) -> Result<(), EngineError> {
        self.backends.connect(kind).await.map(|_| ())
    }

    /// Run a function and report the outcome. Never fails.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        match self.try_execute(&request).await {
            Ok(result) => result,
            Err(e) => {
                log::error!("Execution of function {} failed: {}", request.function_id, e);
                ExecutionResult::error(e.to_string(), request.backend_kind().label())
            }
        }
    }

    /// Like `execute`, but request-level failures (unknown function, invalid
    /// request, staging failure) are returned as errors.
    pub async fn try_execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, EngineError> {
        if request.timeout_seconds == 0 {
            return Err(EngineError::InvalidRequest(
                "timeout must be greater than zero".to_string(),
            ));
        }

        let code = self
            .store
            .get_function_code(request.function_id)
            .await?
            .ok_or(EngineError::FunctionNotFound(request.function_id))?;

        let code_file = EphemeralCodeFile::stage(&code, request.language, &self.config.staging)?;

        let backend = match self.backends.connect(request.backend_kind()).await {
            Ok(backend) => backend,
            Err(e) => {
                log::warn!("{}. Running locally.", e);
                return Ok(self.run_fallback(request, &code_file).await);
            }
        };

        Ok(self.run_isolated(request, &code, &code_file, backend).await)
    }

    async fn run_fallback(
        &self,
        request: &ExecutionRequest,
        code_file: &EphemeralCodeFile,
    ) -> ExecutionResult {
        if !self.fallback.is_enabled() {
            return ExecutionResult::error(
                "No isolation backend available and host fallback is disabled",
                request.backend_kind().label(),
            );
        }

        let result = self
            .fallback
            .run_locally(code_file, request.timeout_seconds, request.use_hardened_runtime)
            .await;
        self.record(request, &result).await;
        result
    }

    async fn run_isolated(
        &self,
        request: &ExecutionRequest,
        code: &str,
        code_file: &EphemeralCodeFile,
        backend: Arc<dyn IsolationBackend>,
    ) -> ExecutionResult {
        let label = backend.kind().label();
        let key = RegistryKey::for_request(
            self.config.registry.key_mode,
            code_file,
            code,
            request.use_hardened_runtime,
        );

        let lease = self
            .registry
            .acquire(key, backend.clone(), code_file)
            .await;

        let mut handle = match lease.sandbox().await {
            Ok(handle) => handle,
            Err(e) => {
                lease.release().await;
                return ExecutionResult::error(format!("Error running the function: {}", e), label);
            }
        };

        let outcome = self
            .collect(backend.as_ref(), &mut handle, request.timeout_seconds)
            .await;
        lease.release().await;

        match outcome {
            Ok(result) => {
                self.record(request, &result).await;
                result
            }
            Err(e) => {
                let status = if e.is_timeout() && self.config.execution.report_isolated_timeouts {
                    ExecutionStatus::Timeout
                } else {
                    ExecutionStatus::Error
                };
                ExecutionResult::error_with_status(
                    format!("Error running the function: {}", e),
                    status,
                    label,
                )
            }
        }
    }

    /// Wait for the sandbox, then read its logs and telemetry.
    async fn collect(
        &self,
        backend: &dyn IsolationBackend,
        handle: &mut SandboxHandle,
        timeout_seconds: u64,
    ) -> Result<ExecutionResult, EngineError> {
        let start_time = Instant::now();
        handle.advance(SandboxState::Running);

        let exit_code = backend.wait(handle, timeout_seconds).await?;
        handle.advance(SandboxState::Exited);

        let logs = backend.logs(handle).await?;

        // Let the daemon's counters catch up with the exited process
        let settle_delay = self.config.sandbox.settle_delay();
        log::debug!("Waiting {:?} before reading stats of {}", settle_delay, handle.id);
        tokio::time::sleep(settle_delay).await;

        let raw = backend.stats(handle).await?;
        log::debug!("Stats snapshot for {}: {:?}", handle.id, raw);

        let exec_time_seconds = round_to(start_time.elapsed().as_secs_f64(), 4);
        log::info!(
            "Container {} exited with code {} after {}s",
            handle.id,
            exit_code,
            exec_time_seconds
        );

        Ok(ExecutionResult {
            outcome: Outcome::Output(logs),
            status: ExecutionStatus::Success,
            exec_time_seconds,
            mem_usage_bytes: metrics::memory_usage_bytes(&raw),
            cpu_percent: metrics::cpu_percent(&raw),
            runtime: handle.backend_kind.label(),
        })
    }

    async fn record(&self, request: &ExecutionRequest, result: &ExecutionResult) {
        let record = ExecutionRecord::new(
            request.function_id,
            result.exec_time_seconds,
            result.mem_usage_bytes,
            result.cpu_percent,
            result.status,
        )
        .with_output(result.text());

        if let Err(e) = self.store.log_execution(record).await {
            log::warn!(
                "Could not record execution of function {}: {}",
                request.function_id,
                e
            );
        }
    }
}
