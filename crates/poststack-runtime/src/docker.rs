//! Docker implementation of [`RuntimeDriver`].
//!
//! Single-container lifecycle (build/run/inspect/stop/remove/logs) goes through
//! `bollard`'s HTTP API against the local daemon. Manifest apply/teardown shells out to
//! the `docker` CLI (`compose` or `kube play`), since the core's contract with the
//! runtime is "accepts pod/compose manifests" rather than reimplementing a compose
//! interpreter — see the crate root docs.

use crate::driver::{
    ContainerSpec, ContainerState, ContainerStatus, ContainerSummary, ManifestDescriptor, Protocol,
    RuntimeDriver, RuntimeError, RuntimeResult,
};
use async_trait::async_trait;
use bollard::query_parameters::{
    BuildImageOptionsBuilder, CreateContainerOptionsBuilder, InspectContainerOptions,
    ListContainersOptionsBuilder, ListImagesOptionsBuilder, LogsOptionsBuilder,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptionsBuilder,
};
use bollard::Docker;
use futures_util::StreamExt;
use poststack_core::ManifestKind;
use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::sleep;
use tracing::{info, warn};

pub struct DockerDriver {
    docker: Docker,
}

impl DockerDriver {
    pub fn connect() -> RuntimeResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
        Ok(Self { docker })
    }

    fn map_status(status: &str) -> ContainerStatus {
        match status {
            "created" => ContainerStatus::Created,
            "running" | "restarting" => ContainerStatus::Running,
            "paused" => ContainerStatus::Running,
            "exited" => ContainerStatus::Exited,
            "dead" => ContainerStatus::Dead,
            _ => ContainerStatus::Stopped,
        }
    }

    async fn run_cli(&self, args: &[&str], stdin: Option<&str>) -> RuntimeResult<String> {
        let mut command = Command::new("docker");
        command.args(args);
        if stdin.is_some() {
            command.stdin(std::process::Stdio::piped());
        }
        command.stdout(std::process::Stdio::piped());
        command.stderr(std::process::Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| RuntimeError::Unavailable(format!("failed to spawn docker CLI: {e}")))?;

        if let Some(text) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(text.as_bytes())
                    .await
                    .map_err(|e| RuntimeError::OperationFailed {
                        container: args.join(" "),
                        message: e.to_string(),
                    })?;
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| RuntimeError::OperationFailed {
                container: args.join(" "),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(RuntimeError::OperationFailed {
                container: args.join(" "),
                message: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl RuntimeDriver for DockerDriver {
    async fn build_image(&self, name: &str, context: &Path) -> RuntimeResult<String> {
        info!(image = %name, "building image");
        let options = BuildImageOptionsBuilder::new().t(name).build();

        let mut tar_buffer = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut tar_buffer);
            builder
                .append_dir_all(".", context)
                .map_err(|e| RuntimeError::OperationFailed {
                    container: name.to_string(),
                    message: format!("failed to tar build context: {e}"),
                })?;
            builder.finish().map_err(|e| RuntimeError::OperationFailed {
                container: name.to_string(),
                message: e.to_string(),
            })?;
        }

        let mut stream = self.docker.build_image(options, None, Some(tar_buffer.into()));
        let mut image_id = None;
        while let Some(chunk) = stream.next().await {
            let info = chunk.map_err(|e| RuntimeError::OperationFailed {
                container: name.to_string(),
                message: e.to_string(),
            })?;
            if let Some(id) = info.aux.and_then(|a| a.id) {
                image_id = Some(id);
            }
        }

        Ok(image_id.unwrap_or_else(|| name.to_string()))
    }

    async fn image_exists(&self, name: &str) -> RuntimeResult<bool> {
        let options = ListImagesOptionsBuilder::new().all(true).build();
        let images = self
            .docker
            .list_images(Some(options))
            .await
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;

        Ok(images
            .iter()
            .any(|image| image.repo_tags.iter().any(|tag| tag == name)))
    }

    async fn run_container(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        let mut port_bindings = HashMap::new();
        let mut exposed_ports = HashMap::new();
        for binding in &spec.ports {
            let proto = match binding.protocol {
                Protocol::Tcp => "tcp",
                Protocol::Udp => "udp",
            };
            let key = format!("{}/{proto}", binding.container_port);
            port_bindings.insert(
                key.clone(),
                Some(vec![bollard::models::PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(binding.host_port.to_string()),
                }]),
            );
            exposed_ports.insert(key, HashMap::new());
        }

        let binds: Vec<String> = spec
            .volumes
            .iter()
            .map(|(src, dst)| format!("{src}:{dst}"))
            .collect();

        let host_config = bollard::models::HostConfig {
            port_bindings: Some(port_bindings),
            binds: Some(binds),
            ..Default::default()
        };

        let config = bollard::models::ContainerCreateBody {
            image: Some(spec.image.clone()),
            env: Some(spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            cmd: spec.command.clone(),
            ..Default::default()
        };

        let options = CreateContainerOptionsBuilder::new().name(&spec.name).build();
        let container = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| RuntimeError::OperationFailed {
                container: spec.name.clone(),
                message: e.to_string(),
            })?;

        self.docker
            .start_container(&container.id, None::<StartContainerOptions>)
            .await
            .map_err(|e| RuntimeError::OperationFailed {
                container: spec.name.clone(),
                message: e.to_string(),
            })?;

        Ok(container.id)
    }

    async fn start_container(&self, name: &str) -> RuntimeResult<()> {
        self.docker
            .start_container(name, None::<StartContainerOptions>)
            .await
            .map_err(|e| RuntimeError::OperationFailed {
                container: name.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn inspect_container(&self, name: &str) -> RuntimeResult<ContainerState> {
        let container = self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .map_err(|_| RuntimeError::NotFound(name.to_string()))?;

        let state = container.state.unwrap_or_default();
        let status = state
            .status
            .map(|s| Self::map_status(&s.to_string()))
            .unwrap_or(ContainerStatus::Absent);

        Ok(ContainerState {
            status,
            exit_code: state.exit_code,
        })
    }

    async fn list_containers(&self) -> RuntimeResult<Vec<ContainerSummary>> {
        let options = ListContainersOptionsBuilder::new().all(true).build();
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                name: c
                    .names
                    .unwrap_or_default()
                    .into_iter()
                    .next()
                    .unwrap_or_default()
                    .trim_start_matches('/')
                    .to_string(),
                image: c.image.unwrap_or_default(),
                status: c
                    .state
                    .map(|s| Self::map_status(&s.to_string()))
                    .unwrap_or(ContainerStatus::Absent),
            })
            .collect())
    }

    async fn stop_container(&self, name: &str, timeout: Duration) -> RuntimeResult<()> {
        let options = StopContainerOptionsBuilder::new().t(timeout.as_secs() as i32).build();
        self.docker
            .stop_container(name, Some(options))
            .await
            .map_err(|e| RuntimeError::OperationFailed {
                container: name.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn remove_container(&self, name: &str, force: bool) -> RuntimeResult<()> {
        self.docker
            .remove_container(name, Some(RemoveContainerOptions { force, ..Default::default() }))
            .await
            .map_err(|e| RuntimeError::OperationFailed {
                container: name.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn apply_manifest(&self, kind: ManifestKind, text: &str) -> RuntimeResult<ManifestDescriptor> {
        let subcommand: &[&str] = match kind {
            ManifestKind::Compose => &["compose", "-f", "-", "up", "-d"],
            ManifestKind::Pod => &["kube", "play", "-"],
        };

        let output = self.run_cli(subcommand, Some(text)).await?;
        let pod_name = output
            .lines()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("manifest")
            .to_string();

        let container_names = match kind {
            ManifestKind::Compose => {
                let names = self
                    .run_cli(&["compose", "-f", "-", "ps", "--format", "{{.Names}}"], Some(text))
                    .await?;
                parse_names(&names)
            }
            ManifestKind::Pod => {
                let filter = format!("label=io.kubernetes.pod.name={pod_name}");
                let names = self
                    .run_cli(&["ps", "-a", "--filter", &filter, "--format", "{{.Names}}"], None)
                    .await?;
                parse_names(&names)
            }
        };

        Ok(ManifestDescriptor {
            pod_name,
            container_names,
        })
    }

    async fn down_manifest(&self, kind: ManifestKind, text: &str, remove: bool) -> RuntimeResult<()> {
        let subcommand: &[&str] = match (kind, remove) {
            (ManifestKind::Compose, true) => &["compose", "-f", "-", "down"],
            (ManifestKind::Compose, false) => &["compose", "-f", "-", "stop"],
            (ManifestKind::Pod, true) => &["kube", "down", "-"],
            (ManifestKind::Pod, false) => &["kube", "down", "-", "--force"],
        };

        self.run_cli(subcommand, Some(text)).await?;
        Ok(())
    }

    async fn wait_exit(&self, container: &str, timeout: Duration) -> RuntimeResult<i64> {
        let deadline = Instant::now() + timeout;
        loop {
            let state = self.inspect_container(container).await?;
            if let Some(exit_code) = state.exit_code {
                if state.status == ContainerStatus::Exited || state.status == ContainerStatus::Dead {
                    return Ok(exit_code);
                }
            }
            if Instant::now() >= deadline {
                return Err(RuntimeError::WaitTimeout {
                    container: container.to_string(),
                    timeout_secs: timeout.as_secs(),
                });
            }
            sleep(Duration::from_millis(500)).await;
        }
    }

    async fn logs(&self, container: &str) -> RuntimeResult<String> {
        let options = LogsOptionsBuilder::new().stdout(true).stderr(true).build();
        let mut stream = self.docker.logs(container, Some(options));
        let mut buffer = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(log) => buffer.push_str(&log.to_string()),
                Err(e) => {
                    warn!(container = %container, error = %e, "error reading logs");
                    break;
                }
            }
        }
        Ok(buffer)
    }

    async fn exec(&self, container: &str, command: &[String]) -> RuntimeResult<String> {
        let options = bollard::exec::CreateExecOptions {
            cmd: Some(command.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container, options)
            .await
            .map_err(|e| RuntimeError::OperationFailed {
                container: container.to_string(),
                message: e.to_string(),
            })?;

        let start = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| RuntimeError::OperationFailed {
                container: container.to_string(),
                message: e.to_string(),
            })?;

        let mut buffer = String::new();
        if let bollard::exec::StartExecResults::Attached { mut output, .. } = start {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(log) => buffer.push_str(&log.to_string()),
                    Err(e) => {
                        warn!(container = %container, error = %e, "error reading exec output");
                        break;
                    }
                }
            }
        }
        Ok(buffer)
    }
}

fn parse_names(output: &str) -> Vec<String> {
    output
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_docker_statuses() {
        assert_eq!(DockerDriver::map_status("running"), ContainerStatus::Running);
        assert_eq!(DockerDriver::map_status("restarting"), ContainerStatus::Running);
        assert_eq!(DockerDriver::map_status("exited"), ContainerStatus::Exited);
        assert_eq!(DockerDriver::map_status("dead"), ContainerStatus::Dead);
        assert_eq!(DockerDriver::map_status("created"), ContainerStatus::Created);
    }

    #[test]
    fn unknown_status_falls_back_to_stopped() {
        assert_eq!(DockerDriver::map_status("paused"), ContainerStatus::Running);
        assert_eq!(DockerDriver::map_status("removing"), ContainerStatus::Stopped);
    }

    #[test]
    fn parse_names_skips_blank_lines() {
        assert_eq!(
            parse_names("web-1\n\ndb-1\n  \nworker-1\n"),
            vec!["web-1".to_string(), "db-1".to_string(), "worker-1".to_string()]
        );
    }
}
