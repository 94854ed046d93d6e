// src/backend/docker.rs
use async_trait::async_trait;
use bollard::container::LogOutput; // For LogOutput::StdOut, LogOutput::StdErr
use bollard::models::{ContainerCreateBody, ContainerStatsResponse, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptions as BollardCreateContainerOptionsQuery,
    LogsOptions as BollardLogsOptionsQuery,
    RemoveContainerOptions as BollardRemoveContainerOptionsQuery,
    StartContainerOptions as BollardStartContainerOptionsQuery,
    StatsOptions as BollardStatsOptionsQuery,
    WaitContainerOptions as BollardWaitContainerOptionsQuery,
};
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::default::Default;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{BackendFactory, IsolationBackend};
use crate::config::SandboxConfig;
use crate::errors::EngineError;
use crate::staging::EphemeralCodeFile;
use crate::types::{BackendKind, Language, RawStats, SandboxHandle};

/// Container backend talking to the local Docker daemon.
///
/// The hardened variant is the same container with the OCI runtime switched to
/// `SandboxConfig::hardened_runtime` (gVisor's `runsc` by default).
pub struct DockerBackend {
    docker: Docker,
    kind: BackendKind,
    config: SandboxConfig,
}

impl DockerBackend {
    pub fn new(docker: Docker, kind: BackendKind, config: SandboxConfig) -> Self {
        Self {
            docker,
            kind,
            config,
        }
    }

    fn remove_options() -> Option<BollardRemoveContainerOptionsQuery> {
        Some(BollardRemoveContainerOptionsQuery {
            force: true,
            ..Default::default()
        })
    }
}

fn image_for(language: Language, config: &SandboxConfig) -> String {
    match language {
        Language::Python => config.python_image.clone(),
        Language::Javascript => config.node_image.clone(),
    }
}

/// In-sandbox path of the staged file, derived from its extension.
fn container_path(config: &SandboxConfig, extension: &str) -> String {
    format!("{}/code.{}", config.mount_dir.trim_end_matches('/'), extension)
}

fn container_spec(
    kind: BackendKind,
    config: &SandboxConfig,
    language: Language,
    host_path: &str,
    extension: &str,
) -> ContainerCreateBody {
    let script_path_in_container = container_path(config, extension);
    let runtime = match kind {
        BackendKind::Standard => None,
        BackendKind::Hardened => Some(config.hardened_runtime.clone()),
    };

    ContainerCreateBody {
        image: Some(image_for(language, config)),
        cmd: Some(vec![
            language.sandbox_interpreter().to_string(),
            script_path_in_container.clone(),
        ]),
        network_disabled: Some(true),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        host_config: Some(HostConfig {
            binds: Some(vec![format!(
                "{}:{}:ro",
                host_path, script_path_in_container
            )]),
            memory: Some(i64::try_from(config.memory_limit_bytes).unwrap_or(i64::MAX)),
            network_mode: Some("none".to_string()),
            runtime,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn raw_stats_from(stats: &ContainerStatsResponse) -> RawStats {
    let cpu = stats.cpu_stats.as_ref();
    let precpu = stats.precpu_stats.as_ref();

    // Missing system counters default to 1 so an empty snapshot yields a zero delta
    RawStats {
        cpu_usage_total: cpu
            .and_then(|c| c.cpu_usage.as_ref())
            .and_then(|u| u.total_usage)
            .unwrap_or(0),
        pre_cpu_usage_total: precpu
            .and_then(|c| c.cpu_usage.as_ref())
            .and_then(|u| u.total_usage)
            .unwrap_or(0),
        system_cpu_usage: cpu.and_then(|c| c.system_cpu_usage).unwrap_or(1),
        pre_system_cpu_usage: precpu.and_then(|c| c.system_cpu_usage).unwrap_or(1),
        memory_usage_bytes: stats.memory_stats.as_ref().and_then(|m| m.usage),
    }
}

#[async_trait]
impl IsolationBackend for DockerBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn create(&self, code_file: &EphemeralCodeFile) -> Result<SandboxHandle, EngineError> {
        let host_path = std::fs::canonicalize(code_file.path()).map_err(|e| {
            EngineError::SandboxCreation(format!(
                "Cannot resolve staged file {}: {}",
                code_file.path().display(),
                e
            ))
        })?;
        let host_path = host_path
            .to_str()
            .ok_or_else(|| EngineError::SandboxCreation("Invalid staged file path".to_string()))?;

        let config = container_spec(
            self.kind,
            &self.config,
            code_file.language(),
            host_path,
            code_file.extension(),
        );
        let options = Some(BollardCreateContainerOptionsQuery {
            name: Some(format!("{}{}", self.config.name_prefix, Uuid::new_v4().simple())),
            ..Default::default()
        });

        let container = self
            .docker
            .create_container(options, config)
            .await
            .map_err(|e| EngineError::SandboxCreation(e.to_string()))?;

        if let Err(e) = self
            .docker
            .start_container(&container.id, None::<BollardStartContainerOptionsQuery>)
            .await
        {
            // Created but never started; nobody else holds the id
            if let Err(remove_err) = self
                .docker
                .remove_container(&container.id, Self::remove_options())
                .await
            {
                log::error!(
                    "Error cleaning up unstarted container {}: {}",
                    container.id,
                    remove_err
                );
            }
            return Err(EngineError::SandboxCreation(e.to_string()));
        }

        log::debug!("Started {} container {}", self.kind, container.id);
        Ok(SandboxHandle::new(container.id, self.kind))
    }

    async fn wait(&self, handle: &SandboxHandle, timeout_seconds: u64) -> Result<i64, EngineError> {
        // wait_container returns a stream. We need to await the next item for the result.
        let mut exec_stream = self
            .docker
            .wait_container(&handle.id, None::<BollardWaitContainerOptionsQuery>);

        let wait_outcome =
            match tokio::time::timeout(Duration::from_secs(timeout_seconds), exec_stream.next()).await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    log::warn!("Execution timed out for container {}", handle.id);
                    return Err(EngineError::wait_timeout(timeout_seconds));
                }
            };

        match wait_outcome {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error; for us it is just an exit code
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(EngineError::Wait {
                message: e.to_string(),
                timed_out: false,
            }),
            None => Err(EngineError::Wait {
                message: "Container wait stream ended unexpectedly".to_string(),
                timed_out: false,
            }),
        }
    }

    async fn logs(&self, handle: &SandboxHandle) -> Result<String, EngineError> {
        let mut output_stream = self.docker.logs(
            &handle.id,
            Some(BollardLogsOptionsQuery {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );

        let mut output = String::new();
        while let Some(log_result) = output_stream.next().await {
            match log_result {
                Ok(LogOutput::StdOut { message })
                | Ok(LogOutput::StdErr { message })
                | Ok(LogOutput::Console { message }) => {
                    output.push_str(&String::from_utf8_lossy(&message))
                }
                Ok(_) => {}
                Err(e) => return Err(EngineError::Logs(e.to_string())),
            }
        }
        Ok(output)
    }

    async fn stats(&self, handle: &SandboxHandle) -> Result<RawStats, EngineError> {
        let mut stats_stream = self.docker.stats(
            &handle.id,
            Some(BollardStatsOptionsQuery {
                stream: false,
                one_shot: false,
                ..Default::default()
            }),
        );

        match stats_stream.next().await {
            Some(Ok(stats)) => Ok(raw_stats_from(&stats)),
            Some(Err(e)) => Err(EngineError::Stats(e.to_string())),
            None => Err(EngineError::Stats(format!(
                "No stats reported for container {}",
                handle.id
            ))),
        }
    }

    async fn remove(&self, handle: &SandboxHandle) -> Result<(), EngineError> {
        self.docker
            .remove_container(&handle.id, Self::remove_options())
            .await
            .map_err(|e| EngineError::Cleanup(e.to_string()))
    }
}

/// Connects to the local Docker daemon, one backend per requested strength.
pub struct DockerBackendFactory {
    config: SandboxConfig,
}

impl DockerBackendFactory {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BackendFactory for DockerBackendFactory {
    async fn connect(&self, kind: BackendKind) -> Result<Arc<dyn IsolationBackend>, EngineError> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            EngineError::BackendUnavailable(format!("Failed to connect to Docker: {}", e))
        })?;

        // Building the client never touches the daemon; ping does
        docker.ping().await.map_err(|e| {
            EngineError::BackendUnavailable(format!("Docker daemon not reachable: {}", e))
        })?;

        Ok(Arc::new(DockerBackend::new(docker, kind, self.config.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_standard_container_spec() {
        let config = SandboxConfig::default();
        let body = container_spec(
            BackendKind::Standard,
            &config,
            Language::Python,
            "/tmp/temp_abc.py",
            "py",
        );

        assert_eq!(body.image.as_deref(), Some("lambda_base_python"));
        assert_eq!(
            body.cmd,
            Some(vec!["python3".to_string(), "/app/code.py".to_string()])
        );
        assert_eq!(body.network_disabled, Some(true));

        let host = body.host_config.unwrap();
        assert_eq!(
            host.binds,
            Some(vec!["/tmp/temp_abc.py:/app/code.py:ro".to_string()])
        );
        assert_eq!(host.memory, Some(128 * 1024 * 1024));
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(host.runtime, None);
    }

    #[test]
    fn test_hardened_spec_only_changes_runtime() {
        let config = SandboxConfig::default();
        let standard = container_spec(
            BackendKind::Standard,
            &config,
            Language::Javascript,
            "/tmp/temp_abc.js",
            "js",
        );
        let hardened = container_spec(
            BackendKind::Hardened,
            &config,
            Language::Javascript,
            "/tmp/temp_abc.js",
            "js",
        );

        assert_eq!(hardened.image.as_deref(), Some("lambda_base_node"));
        assert_eq!(
            hardened.cmd,
            Some(vec!["node".to_string(), "/app/code.js".to_string()])
        );
        let standard_host = standard.host_config.unwrap();
        let hardened_host = hardened.host_config.unwrap();
        assert_eq!(hardened_host.runtime.as_deref(), Some("runsc"));
        assert_eq!(standard_host.binds, hardened_host.binds);
        assert_eq!(standard_host.memory, hardened_host.memory);
        assert_eq!(standard_host.network_mode, hardened_host.network_mode);
    }

    #[test]
    fn test_container_path_tolerates_trailing_slash() {
        let config = SandboxConfig {
            mount_dir: "/sandbox/".to_string(),
            ..Default::default()
        };
        assert_eq!(container_path(&config, "js"), "/sandbox/code.js");
    }

    #[test]
    fn test_raw_stats_from_docker_snapshot() {
        let stats: ContainerStatsResponse = serde_json::from_value(json!({
            "cpu_stats": {
                "cpu_usage": { "total_usage": 300 },
                "system_cpu_usage": 2_000
            },
            "precpu_stats": {
                "cpu_usage": { "total_usage": 100 },
                "system_cpu_usage": 1_000
            },
            "memory_stats": { "usage": 4_096 }
        }))
        .unwrap();

        let raw = raw_stats_from(&stats);
        assert_eq!(raw.cpu_usage_total, 300);
        assert_eq!(raw.pre_cpu_usage_total, 100);
        assert_eq!(raw.system_cpu_usage, 2_000);
        assert_eq!(raw.pre_system_cpu_usage, 1_000);
        assert_eq!(raw.memory_usage_bytes, Some(4_096));
        assert_eq!(crate::metrics::cpu_percent(&raw), 20.0);
    }

    #[test]
    fn test_empty_snapshot_yields_zero_cpu() {
        let stats: ContainerStatsResponse = serde_json::from_value(json!({})).unwrap();
        let raw = raw_stats_from(&stats);
        assert_eq!(raw.system_cpu_usage, 1);
        assert_eq!(raw.pre_system_cpu_usage, 1);
        assert_eq!(raw.memory_usage_bytes, None);
        assert_eq!(crate::metrics::cpu_percent(&raw), 0.0);
    }

    #[tokio::test]
    #[ignore] // Requires a running Docker daemon and the lambda_base_python image
    async fn test_live_container_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let staging = crate::config::StagingConfig {
            directory: Some(dir.path().to_path_buf()),
            keep_files: false,
        };
        let code_file = EphemeralCodeFile::stage("print('hi')", Language::Python, &staging).unwrap();

        let factory = DockerBackendFactory::new(SandboxConfig::default());
        let backend = factory.connect(BackendKind::Standard).await.unwrap();
        let handle = backend.create(&code_file).await.unwrap();

        let exit_code = backend.wait(&handle, 10).await.unwrap();
        let logs = backend.logs(&handle).await.unwrap();
        backend.remove(&handle).await.unwrap();

        assert_eq!(exit_code, 0);
        assert!(logs.contains("hi"));
    }

    #[tokio::test]
    #[ignore] // Requires a running Docker daemon and the busybox image
    async fn test_unstarted_container_is_removed() {
        use bollard::query_parameters::ListContainersOptions;
        use std::collections::HashMap;

        let dir = tempfile::tempdir().unwrap();
        let staging = crate::config::StagingConfig {
            directory: Some(dir.path().to_path_buf()),
            keep_files: false,
        };
        let code_file = EphemeralCodeFile::stage("print('hi')", Language::Python, &staging).unwrap();

        // busybox has no python3, so the container is created but cannot start
        let config = SandboxConfig {
            python_image: "busybox:latest".to_string(),
            name_prefix: "lambdabox_unstarted_".to_string(),
            ..SandboxConfig::default()
        };
        let docker = Docker::connect_with_local_defaults().unwrap();
        let backend = DockerBackend::new(docker.clone(), BackendKind::Standard, config);

        let err = backend.create(&code_file).await.unwrap_err();
        assert!(matches!(err, EngineError::SandboxCreation(_)));

        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec!["lambdabox_unstarted_".to_string()]);
        let leftovers = docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters: Some(filters),
                ..Default::default()
            }))
            .await
            .unwrap();
        assert!(leftovers.is_empty());
    }
}
