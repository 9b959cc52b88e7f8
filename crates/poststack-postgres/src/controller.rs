//! Lifecycle controller for the environment's postgres container.
//!
//! ```text
//!           [absent]
//!              | provision
//!              v
//!           [running] --stop--> [stopped] --start--> [running]
//!              |                    |
//!              |                    +--remove--> [absent]
//!              |
//!              +--crashed--> [failed] --remove+provision--> [running]
//! ```

use crate::state::PasswordStore;
use crate::types::{ConnectionDescriptor, PasswordPolicy, PostgresSpec, PostgresState};
use poststack_core::{Cancellation, PoststackError, PoststackResult};
use poststack_runtime::{ContainerSpec, ContainerStatus, PortBinding, Protocol, RuntimeDriver};
use sqlx::postgres::PgPoolOptions;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_CONTAINER_PORT: u16 = 5432;
const DEFAULT_IMAGE: &str = "postgres:16-alpine";

pub struct PostgresController<'a> {
    runtime: &'a dyn RuntimeDriver,
    passwords: PasswordStore,
    ready_timeout: Duration,
    image: String,
}

impl<'a> PostgresController<'a> {
    pub fn new(runtime: &'a dyn RuntimeDriver, state_path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            runtime,
            passwords: PasswordStore::new(state_path),
            ready_timeout: DEFAULT_READY_TIMEOUT,
            image: DEFAULT_IMAGE.to_string(),
        }
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    async fn resolve_password(&self, spec: &PostgresSpec) -> PoststackResult<String> {
        match &spec.password {
            PasswordPolicy::Literal(value) => Ok(value.clone()),
            PasswordPolicy::AutoGenerated => {
                self.passwords
                    .get_or_generate(&spec.project, &spec.environment)
                    .await
            }
        }
    }

    pub async fn state(&self, spec: &PostgresSpec) -> PoststackResult<PostgresState> {
        let name = spec.container_name();
        match self.runtime.inspect_container(&name).await {
            Ok(state) => Ok(match state.status {
                ContainerStatus::Running => PostgresState::Running,
                ContainerStatus::Stopped | ContainerStatus::Exited => PostgresState::Stopped,
                ContainerStatus::Dead => PostgresState::Failed,
                ContainerStatus::Created | ContainerStatus::Absent => PostgresState::Absent,
            }),
            Err(_) => Ok(PostgresState::Absent),
        }
    }

    /// Ensure a running, ready postgres instance for `spec`, following the state
    /// machine documented on the type. Returns the connection descriptor once the
    /// instance answers `SELECT 1`.
    pub async fn ensure(&self, spec: &PostgresSpec) -> PoststackResult<ConnectionDescriptor> {
        self.ensure_cancellable(spec, &Cancellation::new()).await
    }

    /// As [`PostgresController::ensure`], but checked against `cancel` between each
    /// state-machine step and during readiness polling.
    pub async fn ensure_cancellable(
        &self,
        spec: &PostgresSpec,
        cancel: &Cancellation,
    ) -> PoststackResult<ConnectionDescriptor> {
        cancel.check()?;
        let password = self.resolve_password(spec).await?;
        let descriptor = ConnectionDescriptor {
            host: spec.host.clone(),
            port: spec.port,
            database: spec.database.clone(),
            user: spec.user.clone(),
            password,
        };

        let name = spec.container_name();
        let current_state = self.state(spec).await?;

        match current_state {
            PostgresState::Absent => {
                self.provision(spec, &descriptor).await?;
            }
            PostgresState::Running => {
                info!(container = %name, "postgres already running, verifying reachability");
            }
            PostgresState::Stopped => {
                info!(container = %name, "restarting stopped postgres container in place");
                self.runtime
                    .start_container(&name)
                    .await
                    .map_err(|e| PoststackError::RuntimeFailure {
                        container: name.clone(),
                        message: e.to_string(),
                    })?;
            }
            PostgresState::Failed => {
                warn!(container = %name, "postgres container in failed state, recreating");
                self.runtime
                    .remove_container(&name, true)
                    .await
                    .map_err(|e| PoststackError::RuntimeFailure {
                        container: name.clone(),
                        message: e.to_string(),
                    })?;
                self.provision(spec, &descriptor).await?;
            }
        }

        cancel.check()?;
        self.wait_ready(&descriptor, cancel).await?;
        Ok(descriptor)
    }

    async fn provision(&self, spec: &PostgresSpec, descriptor: &ConnectionDescriptor) -> PoststackResult<()> {
        let name = spec.container_name();
        if !self
            .runtime
            .image_exists(&self.image)
            .await
            .map_err(|e| PoststackError::RuntimeFailure { container: name.clone(), message: e.to_string() })?
        {
            self.runtime
                .build_image(&self.image, std::path::Path::new("."))
                .await
                .map_err(|e| PoststackError::RuntimeFailure { container: name.clone(), message: e.to_string() })?;
        }

        self.runtime
            .run_container(&self.container_spec(spec, descriptor))
            .await
            .map_err(|e| PoststackError::RuntimeFailure { container: name, message: e.to_string() })?;
        Ok(())
    }

    fn container_spec(&self, spec: &PostgresSpec, descriptor: &ConnectionDescriptor) -> ContainerSpec {
        let mut env = HashMap::new();
        env.insert("POSTGRES_DB".to_string(), spec.database.clone());
        env.insert("POSTGRES_USER".to_string(), spec.user.clone());
        env.insert("POSTGRES_PASSWORD".to_string(), descriptor.password.clone());

        ContainerSpec {
            name: spec.container_name(),
            image: self.image.clone(),
            env,
            ports: vec![PortBinding {
                host_port: spec.port,
                container_port: DEFAULT_CONTAINER_PORT,
                protocol: Protocol::Tcp,
            }],
            volumes: vec![(spec.volume_name(), "/var/lib/postgresql/data".to_string())],
            command: None,
        }
    }

    /// Poll `SELECT 1` with exponential backoff until it succeeds, `ready_timeout`
    /// elapses, or `cancel` fires.
    async fn wait_ready(&self, descriptor: &ConnectionDescriptor, cancel: &Cancellation) -> PoststackResult<()> {
        let deadline = Instant::now() + self.ready_timeout;
        let mut backoff = Duration::from_millis(100);

        loop {
            let attempt = tokio::select! {
                result = PgPoolOptions::new()
                    .max_connections(1)
                    .acquire_timeout(Duration::from_secs(2))
                    .connect(&descriptor.url()) => result,
                _ = cancel.cancelled() => return Err(PoststackError::Cancelled),
            };

            if let Ok(pool) = attempt {
                if sqlx::query("SELECT 1").execute(&pool).await.is_ok() {
                    return Ok(());
                }
            }

            if Instant::now() >= deadline {
                return Err(PoststackError::DatabaseUnreachable(format!(
                    "postgres not ready after {} seconds",
                    self.ready_timeout.as_secs()
                )));
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = cancel.cancelled() => return Err(PoststackError::Cancelled),
            }
            backoff = std::cmp::min(backoff * 2, Duration::from_secs(5));
        }
    }
}
