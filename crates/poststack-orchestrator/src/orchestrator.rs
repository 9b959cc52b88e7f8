//! Top-level state machine composing PostgresController, ServiceRegistry,
//! MigrationRunner, TemplateEngine, and RuntimeDriver for `start / stop / restart /
//! status`.

use crate::deployment_state::DeploymentStateStore;
use crate::status::StatusReport;
use crate::vars::{deployment_scope, init_scope};
use poststack_config::{EnvironmentSpec, PasswordField, ProjectConfig};
use poststack_core::{Cancellation, NetworkingMode, PoststackError, PoststackResult};
use poststack_migrations::MigrationRunner;
use poststack_postgres::{ConnectionDescriptor, PasswordPolicy, PostgresController, PostgresSpec, PostgresState};
use poststack_registry::ServiceRegistry;
use poststack_runtime::{ContainerStatus, RuntimeDriver};
use sqlx::postgres::PgPoolOptions;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const TRACKER_SCHEMA: &str = "poststack";
const HOLDER_PREFIX: &str = "poststack-cli";

/// Which manifest a dry-run [`EnvironmentOrchestrator::render`] call should expand.
#[derive(Debug, Clone, Copy)]
pub enum ManifestTarget {
    Init(usize),
    Deployment,
}

pub struct EnvironmentOrchestrator {
    runtime: Arc<dyn RuntimeDriver>,
    state_dir: PathBuf,
}

impl EnvironmentOrchestrator {
    pub fn new(runtime: Arc<dyn RuntimeDriver>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            state_dir: state_dir.into(),
        }
    }

    fn postgres_spec(&self, config: &ProjectConfig, env: &EnvironmentSpec) -> PostgresSpec {
        let password = match &env.postgres.password {
            PasswordField::Literal(value) => PasswordPolicy::Literal(value.clone()),
            PasswordField::AutoGenerated(_) => PasswordPolicy::AutoGenerated,
        };

        PostgresSpec {
            project: config.project_name.clone(),
            environment: env.name.clone(),
            database: env.postgres.database.clone(),
            port: env.postgres.port,
            user: env.postgres.user.clone(),
            password,
            host: env.postgres.host.clone(),
        }
    }

    fn postgres_state_path(&self) -> PathBuf {
        self.state_dir.join("postgres-passwords.json")
    }

    fn deployment_state_path(&self) -> PathBuf {
        self.state_dir.join("deployment-containers.json")
    }

    fn holder_id(&self) -> String {
        format!("{HOLDER_PREFIX}-{}", std::process::id())
    }

    /// `start(env)`: ensures postgres, migrates, runs the init phase to completion,
    /// then applies the deployment manifest. A no-op if `status(env)` already reports
    /// `up`. Equivalent to [`EnvironmentOrchestrator::start_cancellable`] with a
    /// cancellation handle that is never triggered.
    pub async fn start(&self, config: &ProjectConfig, environment: &str) -> PoststackResult<()> {
        self.start_cancellable(config, environment, &Cancellation::new()).await
    }

    /// As [`EnvironmentOrchestrator::start`], but checked against `cancel` between
    /// phases and during the init manifest's container wait. Cancelling while waiting
    /// for an init container leaves that manifest applied but not awaited further; the
    /// deployment manifest is never applied once cancellation has fired.
    pub async fn start_cancellable(
        &self,
        config: &ProjectConfig,
        environment: &str,
        cancel: &Cancellation,
    ) -> PoststackResult<()> {
        let env = config
            .environment(environment)
            .ok_or_else(|| PoststackError::ConfigInvalid {
                path: "environment".to_string(),
                message: format!("no environment named '{environment}' in project config"),
            })?;

        if self.status(config, environment).await?.lifecycle == crate::state::LifecycleState::Up {
            info!(environment, "already up, start is a no-op");
            return Ok(());
        }

        cancel.check()?;
        let postgres = PostgresController::new(self.runtime.as_ref(), self.postgres_state_path());
        let pg_spec = self.postgres_spec(config, env);
        let descriptor = postgres.ensure_cancellable(&pg_spec, cancel).await?;

        let mut registry = ServiceRegistry::new(&config.project_name, environment);
        let mut pg_vars = HashMap::new();
        pg_vars.insert("user".to_string(), descriptor.user.clone());
        pg_vars.insert("password".to_string(), descriptor.password.clone());
        pg_vars.insert("database".to_string(), descriptor.database.clone());
        pg_vars.insert("HOST_PORT".to_string(), descriptor.port.to_string());
        registry.register("postgres", "postgres", pg_vars);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&descriptor.url())
            .await
            .map_err(|e| PoststackError::DatabaseUnreachable(e.to_string()))?;
        let tracker = poststack_migrations::MigrationTracker::new(pool, TRACKER_SCHEMA);
        let runner = MigrationRunner::new(config.migrations_path(), tracker, self.holder_id());
        runner.migrate_cancellable(None, cancel).await?;

        for manifest_ref in &env.init {
            cancel.check()?;
            let text = std::fs::read_to_string(config.manifest_path(manifest_ref)).map_err(|e| {
                PoststackError::ConfigInvalid {
                    path: manifest_ref.path.clone(),
                    message: format!("cannot read init manifest: {e}"),
                }
            })?;
            let scope = init_scope(environment, &descriptor, env, &config.current().variables);
            let rendered = poststack_template::expand(&text, &scope);

            let descriptor_out = self
                .runtime
                .apply_manifest(manifest_ref.kind, &rendered)
                .await
                .map_err(|e| PoststackError::RuntimeFailure {
                    container: manifest_ref.path.clone(),
                    message: e.to_string(),
                })?;

            let containers = if descriptor_out.container_names.is_empty() {
                vec![descriptor_out.pod_name.clone()]
            } else {
                descriptor_out.container_names.clone()
            };

            for container in &containers {
                let exit_code = self
                    .runtime
                    .wait_exit_cancellable(container, Duration::from_secs(300), cancel)
                    .await
                    .map_err(|e| match e {
                        poststack_runtime::RuntimeError::Cancelled { .. } => PoststackError::Cancelled,
                        e => PoststackError::RuntimeFailure {
                            container: container.clone(),
                            message: e.to_string(),
                        },
                    })?;
                if exit_code != 0 {
                    let logs = self.runtime.logs(container).await.unwrap_or_default();
                    error!(container, exit_code, "init container exited non-zero");
                    return Err(PoststackError::InitFailed {
                        manifest: manifest_ref.path.clone(),
                        container: container.clone(),
                        exit_code,
                    })
                    .map_err(|e| {
                        warn!(%logs, "init failure logs");
                        e
                    });
                }
            }
        }

        cancel.check()?;
        let dependency_names: Vec<String> = registry.iter().map(|r| r.name.clone()).collect();
        let dependency_vars = registry
            .variables_for("deployment", &dependency_names, NetworkingMode::Bridge)
            .map_err(|e| PoststackError::ConfigInvalid {
                path: "deployment".to_string(),
                message: e.to_string(),
            })?;

        let deployment_text = std::fs::read_to_string(config.manifest_path(&env.deployment)).map_err(|e| {
            PoststackError::ConfigInvalid {
                path: env.deployment.path.clone(),
                message: format!("cannot read deployment manifest: {e}"),
            }
        })?;
        let scope = deployment_scope(environment, &descriptor, env, &config.current().variables, dependency_vars);
        let rendered = poststack_template::expand(&deployment_text, &scope);

        let descriptor_out = self
            .runtime
            .apply_manifest(env.deployment.kind, &rendered)
            .await
            .map_err(|e| PoststackError::RuntimeFailure {
                container: env.deployment.path.clone(),
                message: e.to_string(),
            })?;

        let deployment_containers = if descriptor_out.container_names.is_empty() {
            vec![descriptor_out.pod_name.clone()]
        } else {
            descriptor_out.container_names.clone()
        };
        DeploymentStateStore::new(self.deployment_state_path())
            .record(&config.project_name, environment, deployment_containers)
            .await?;

        Ok(())
    }

    /// `stop(env, remove)`: tears down the deployment manifest, then optionally the
    /// postgres container. The data volume always survives; only `destroy` removes it.
    /// Equivalent to [`EnvironmentOrchestrator::stop_cancellable`] with a cancellation
    /// handle that is never triggered.
    pub async fn stop(&self, config: &ProjectConfig, environment: &str, remove: bool) -> PoststackResult<()> {
        self.stop_cancellable(config, environment, remove, &Cancellation::new()).await
    }

    /// As [`EnvironmentOrchestrator::stop`], checked against `cancel` before each
    /// teardown step.
    pub async fn stop_cancellable(
        &self,
        config: &ProjectConfig,
        environment: &str,
        remove: bool,
        cancel: &Cancellation,
    ) -> PoststackResult<()> {
        let env = config
            .environment(environment)
            .ok_or_else(|| PoststackError::ConfigInvalid {
                path: "environment".to_string(),
                message: format!("no environment named '{environment}' in project config"),
            })?;

        let deployment_text = std::fs::read_to_string(config.manifest_path(&env.deployment)).map_err(|e| {
            PoststackError::ConfigInvalid {
                path: env.deployment.path.clone(),
                message: format!("cannot read deployment manifest: {e}"),
            }
        })?;

        cancel.check()?;
        self.runtime
            .down_manifest(env.deployment.kind, &deployment_text, remove)
            .await
            .map_err(|e| PoststackError::RuntimeFailure {
                container: env.deployment.path.clone(),
                message: e.to_string(),
            })?;
        DeploymentStateStore::new(self.deployment_state_path())
            .clear(&config.project_name, environment)
            .await?;

        cancel.check()?;
        let pg_spec = self.postgres_spec(config, env);
        let container_name = pg_spec.container_name();
        self.runtime
            .stop_container(&container_name, Duration::from_secs(30))
            .await
            .map_err(|e| PoststackError::RuntimeFailure {
                container: container_name.clone(),
                message: e.to_string(),
            })?;

        if remove {
            self.runtime
                .remove_container(&container_name, true)
                .await
                .map_err(|e| PoststackError::RuntimeFailure {
                    container: container_name.clone(),
                    message: e.to_string(),
                })?;
        }

        Ok(())
    }

    /// `restart(env)`: `stop(remove=true)` followed by `start`. Equivalent to
    /// [`EnvironmentOrchestrator::restart_cancellable`] with a cancellation handle that
    /// is never triggered.
    pub async fn restart(&self, config: &ProjectConfig, environment: &str) -> PoststackResult<()> {
        self.restart_cancellable(config, environment, &Cancellation::new()).await
    }

    /// As [`EnvironmentOrchestrator::restart`], checked against `cancel` across both
    /// the stop and start phases.
    pub async fn restart_cancellable(
        &self,
        config: &ProjectConfig,
        environment: &str,
        cancel: &Cancellation,
    ) -> PoststackResult<()> {
        self.stop_cancellable(config, environment, true, cancel).await?;
        self.start_cancellable(config, environment, cancel).await
    }

    /// `status(env)` aggregates project info, postgres state, migration status, and
    /// deployment container states.
    pub async fn status(&self, config: &ProjectConfig, environment: &str) -> PoststackResult<StatusReport> {
        let env = config
            .environment(environment)
            .ok_or_else(|| PoststackError::ConfigInvalid {
                path: "environment".to_string(),
                message: format!("no environment named '{environment}' in project config"),
            })?;

        let postgres = PostgresController::new(self.runtime.as_ref(), self.postgres_state_path());
        let pg_spec = self.postgres_spec(config, env);
        let postgres_state = postgres.state(&pg_spec).await?;

        let migrations = match postgres_state {
            PostgresState::Running => {
                let descriptor = self.current_descriptor(config, env).await?;
                match descriptor {
                    Some(descriptor) => {
                        let pool = PgPoolOptions::new()
                            .max_connections(1)
                            .connect(&descriptor.url())
                            .await
                            .ok();
                        match pool {
                            Some(pool) => {
                                let tracker = poststack_migrations::MigrationTracker::new(pool, TRACKER_SCHEMA);
                                let runner =
                                    MigrationRunner::new(config.migrations_path(), tracker, self.holder_id());
                                runner.status().await?
                            }
                            None => empty_migration_status(),
                        }
                    }
                    None => empty_migration_status(),
                }
            }
            _ => empty_migration_status(),
        };

        let tracked_containers = DeploymentStateStore::new(self.deployment_state_path())
            .get(&config.project_name, environment)
            .await?;
        let mut deployment_containers = Vec::with_capacity(tracked_containers.len());
        for name in tracked_containers {
            let state = self.runtime.inspect_container(&name).await.unwrap_or(
                poststack_runtime::ContainerState { status: ContainerStatus::Absent, exit_code: None },
            );
            deployment_containers.push((name, state));
        }

        let lifecycle = derive_lifecycle(postgres_state, &migrations, &deployment_containers);

        Ok(StatusReport {
            project_name: config.project_name.clone(),
            environment: environment.to_string(),
            lifecycle,
            postgres_state,
            migrations,
            deployment_containers,
        })
    }

    /// Dry-run template expansion for one of `environment`'s manifests, without
    /// applying anything to the runtime. Requires postgres to be running (built-in
    /// variables are derived from its live connection details), matching the inputs
    /// `start()` itself would use at that phase.
    pub async fn render(
        &self,
        config: &ProjectConfig,
        environment: &str,
        target: ManifestTarget,
    ) -> PoststackResult<poststack_template::DryRunResult> {
        let env = config
            .environment(environment)
            .ok_or_else(|| PoststackError::ConfigInvalid {
                path: "environment".to_string(),
                message: format!("no environment named '{environment}' in project config"),
            })?;

        let descriptor = self
            .current_descriptor(config, env)
            .await?
            .ok_or_else(|| PoststackError::DatabaseUnreachable(format!(
                "postgres for environment '{environment}' is not running"
            )))?;

        let manifest_ref = match target {
            ManifestTarget::Init(index) => env.init.get(index).ok_or_else(|| PoststackError::ConfigInvalid {
                path: "environment.init".to_string(),
                message: format!("no init manifest at index {index}"),
            })?,
            ManifestTarget::Deployment => &env.deployment,
        };

        let text = std::fs::read_to_string(config.manifest_path(manifest_ref)).map_err(|e| {
            PoststackError::ConfigInvalid {
                path: manifest_ref.path.clone(),
                message: format!("cannot read manifest: {e}"),
            }
        })?;

        let scope = match target {
            ManifestTarget::Init(_) => init_scope(environment, &descriptor, env, &config.current().variables),
            ManifestTarget::Deployment => {
                let mut registry = ServiceRegistry::new(&config.project_name, environment);
                let mut pg_vars = HashMap::new();
                pg_vars.insert("user".to_string(), descriptor.user.clone());
                pg_vars.insert("password".to_string(), descriptor.password.clone());
                pg_vars.insert("database".to_string(), descriptor.database.clone());
                pg_vars.insert("HOST_PORT".to_string(), descriptor.port.to_string());
                registry.register("postgres", "postgres", pg_vars);
                let dependency_names: Vec<String> = registry.iter().map(|r| r.name.clone()).collect();
                let dependency_vars = registry
                    .variables_for("deployment", &dependency_names, NetworkingMode::Bridge)
                    .map_err(|e| PoststackError::ConfigInvalid {
                        path: "deployment".to_string(),
                        message: e.to_string(),
                    })?;
                deployment_scope(environment, &descriptor, env, &config.current().variables, dependency_vars)
            }
        };

        Ok(poststack_template::expand_dry_run(&text, &scope))
    }

    /// Build a [`MigrationRunner`] bound to `environment`'s postgres instance, for
    /// callers (the CLI's `migrate`/`rollback`/`diagnose` surface) that need the
    /// migration engine directly rather than going through `start()`. Fails with
    /// `DatabaseUnreachable` if postgres in `environment` is not currently running.
    pub async fn migration_runner(
        &self,
        config: &ProjectConfig,
        environment: &str,
    ) -> PoststackResult<MigrationRunner> {
        let env = config
            .environment(environment)
            .ok_or_else(|| PoststackError::ConfigInvalid {
                path: "environment".to_string(),
                message: format!("no environment named '{environment}' in project config"),
            })?;

        let descriptor = self
            .current_descriptor(config, env)
            .await?
            .ok_or_else(|| PoststackError::DatabaseUnreachable(format!(
                "postgres for environment '{environment}' is not running"
            )))?;

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&descriptor.url())
            .await
            .map_err(|e| PoststackError::DatabaseUnreachable(e.to_string()))?;
        let tracker = poststack_migrations::MigrationTracker::new(pool, TRACKER_SCHEMA);
        Ok(MigrationRunner::new(config.migrations_path(), tracker, self.holder_id()))
    }

    async fn current_descriptor(
        &self,
        config: &ProjectConfig,
        env: &EnvironmentSpec,
    ) -> PoststackResult<Option<ConnectionDescriptor>> {
        let postgres = PostgresController::new(self.runtime.as_ref(), self.postgres_state_path());
        let pg_spec = self.postgres_spec(config, env);
        if postgres.state(&pg_spec).await? != PostgresState::Running {
            return Ok(None);
        }
        let password = match &pg_spec.password {
            PasswordPolicy::Literal(value) => value.clone(),
            PasswordPolicy::AutoGenerated => {
                poststack_postgres::PasswordStore::new(self.postgres_state_path())
                    .get_or_generate(&pg_spec.project, &pg_spec.environment)
                    .await?
            }
        };
        Ok(Some(ConnectionDescriptor {
            host: pg_spec.host.clone(),
            port: pg_spec.port,
            database: pg_spec.database.clone(),
            user: pg_spec.user.clone(),
            password,
        }))
    }
}

fn empty_migration_status() -> poststack_migrations::MigrationStatus {
    poststack_migrations::MigrationStatus {
        current_version: None,
        applied: Vec::new(),
        pending: Vec::new(),
        is_locked: false,
        lock_holder: None,
    }
}

fn derive_lifecycle(
    postgres_state: PostgresState,
    migrations: &poststack_migrations::MigrationStatus,
    deployment_containers: &[(String, poststack_runtime::ContainerState)],
) -> crate::state::LifecycleState {
    use crate::state::LifecycleState;

    match postgres_state {
        PostgresState::Absent => LifecycleState::Down,
        PostgresState::Failed => LifecycleState::Degraded,
        PostgresState::Stopped => LifecycleState::Stopped,
        PostgresState::Running => {
            if !migrations.pending.is_empty() {
                return LifecycleState::Migrating;
            }
            let deploying = deployment_containers
                .iter()
                .all(|(_, state)| state.status == ContainerStatus::Running);
            if deployment_containers.is_empty() || deploying {
                LifecycleState::Up
            } else {
                LifecycleState::Degraded
            }
        }
    }
}
