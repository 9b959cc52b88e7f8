//! The [`RuntimeDriver`] trait: the only interface the core uses to mutate container
//! state. `EnvironmentOrchestrator` and `PostgresController` hold a `dyn RuntimeDriver`
//! and never reach for a concrete runtime directly.

use async_trait::async_trait;
use poststack_core::{Cancellation, ManifestKind};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    #[error("container not found: {0}")]
    NotFound(String),

    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("runtime operation failed for {container}: {message}")]
    OperationFailed { container: String, message: String },

    #[error("waiting for {container} to exit timed out after {timeout_secs}s")]
    WaitTimeout { container: String, timeout_secs: u64 },

    #[error("cancelled while waiting for {container}")]
    Cancelled { container: String },
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Absent,
    Created,
    Running,
    Stopped,
    Exited,
    Dead,
}

#[derive(Debug, Clone)]
pub struct ContainerState {
    pub status: ContainerStatus,
    pub exit_code: Option<i64>,
}

/// One row of `ps`-style output, used by the CLI's `status`/`ps` surface.
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub name: String,
    pub image: String,
    pub status: ContainerStatus,
}

#[derive(Debug, Clone, Copy)]
pub enum Protocol {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, Copy)]
pub struct PortBinding {
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: Protocol,
}

/// Everything needed to run one container. Built by `PostgresController` for the
/// postgres container; init/deployment containers are driven through `apply_manifest`
/// instead, since their shape comes from a pod/compose document rather than a single
/// container spec.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: HashMap<String, String>,
    pub ports: Vec<PortBinding>,
    pub volumes: Vec<(String, String)>,
    pub command: Option<Vec<String>>,
}

/// A manifest applied through this driver, returned so the caller can refer back to
/// what was actually brought up (used by `down_manifest` and by diagnostics).
#[derive(Debug, Clone)]
pub struct ManifestDescriptor {
    pub pod_name: String,
    pub container_names: Vec<String>,
}

#[async_trait]
pub trait RuntimeDriver: Send + Sync {
    async fn build_image(&self, name: &str, context: &std::path::Path) -> RuntimeResult<String>;

    async fn image_exists(&self, name: &str) -> RuntimeResult<bool>;

    async fn run_container(&self, spec: &ContainerSpec) -> RuntimeResult<String>;

    /// Start an already-created, stopped container by name, without recreating it.
    /// Distinct from [`RuntimeDriver::run_container`], which always does
    /// create-then-start and so conflicts with a stopped container still occupying the
    /// requested name.
    async fn start_container(&self, name: &str) -> RuntimeResult<()>;

    async fn inspect_container(&self, name: &str) -> RuntimeResult<ContainerState>;

    /// List every container the runtime currently tracks (`docker ps -a`), used to
    /// render the CLI's cross-environment `ps` view.
    async fn list_containers(&self) -> RuntimeResult<Vec<ContainerSummary>>;

    async fn stop_container(&self, name: &str, timeout: Duration) -> RuntimeResult<()>;

    async fn remove_container(&self, name: &str, force: bool) -> RuntimeResult<()>;

    async fn apply_manifest(&self, kind: ManifestKind, text: &str) -> RuntimeResult<ManifestDescriptor>;

    async fn down_manifest(&self, kind: ManifestKind, text: &str, remove: bool) -> RuntimeResult<()>;

    async fn wait_exit(&self, container: &str, timeout: Duration) -> RuntimeResult<i64>;

    /// As [`RuntimeDriver::wait_exit`], but interruptible by `cancel`. The default
    /// implementation races the driver's own `wait_exit` against cancellation; a
    /// driver with a native interruptible wait can override this directly.
    async fn wait_exit_cancellable(
        &self,
        container: &str,
        timeout: Duration,
        cancel: &Cancellation,
    ) -> RuntimeResult<i64> {
        tokio::select! {
            result = self.wait_exit(container, timeout) => result,
            _ = cancel.cancelled() => Err(RuntimeError::Cancelled { container: container.to_string() }),
        }
    }

    async fn logs(&self, container: &str) -> RuntimeResult<String>;

    /// Run `command` inside an already-running container and capture its combined
    /// output. Part of the capability set named in the redesign notes
    /// (`{build, run, stop, remove, apply, logs, exec}`); the orchestrator itself never
    /// calls this — it exists for operator-facing debugging (a future `poststack exec`
    /// subcommand), not for anything `start`/`stop`/`migrate` depend on.
    async fn exec(&self, container: &str, command: &[String]) -> RuntimeResult<String>;
}
