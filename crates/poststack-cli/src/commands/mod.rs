mod diagnose;
mod lifecycle;
mod migrate;
mod render;

pub use diagnose::{ClearLocksCommand, DiagnoseCommand, RecoverCommand, RepairCommand};
pub use lifecycle::{RestartCommand, StartCommand, StatusCommand, StopCommand};
pub use migrate::{MigrateCommand, RollbackCommand, VerifyCommand};
pub use render::RenderCommand;

use crate::output::CliError;
use poststack_config::ProjectConfig;
use poststack_orchestrator::EnvironmentOrchestrator;
use poststack_runtime::DockerDriver;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Load the project file and build the orchestrator every subcommand needs. Local
/// operator state (generated passwords) lives alongside the project file under
/// `.poststack/`.
pub fn load_context(config_path: &Path) -> Result<(ProjectConfig, EnvironmentOrchestrator), CliError> {
    let config = ProjectConfig::load(config_path)?;

    let driver = DockerDriver::connect().map_err(|e| {
        poststack_core::PoststackError::RuntimeUnavailable(e.to_string())
    })?;
    let state_dir: PathBuf = config.base_dir.join(".poststack");
    let orchestrator = EnvironmentOrchestrator::new(Arc::new(driver), state_dir);

    Ok((config, orchestrator))
}

/// Resolve the environment name argument against the project's declared
/// `current_environment` when the operator did not name one explicitly.
pub fn resolve_environment(config: &ProjectConfig, environment: &Option<String>) -> String {
    environment
        .clone()
        .unwrap_or_else(|| config.current_environment.clone())
}
