use super::{load_context, resolve_environment};
use crate::output::CliError;
use clap::Args;
use poststack_core::Cancellation;
use std::path::Path;

#[derive(Args)]
pub struct StartCommand {
    /// Environment to start; defaults to the project file's current environment.
    environment: Option<String>,
}

impl StartCommand {
    pub async fn execute(self, config_path: &Path, cancel: &Cancellation) -> Result<(), CliError> {
        let (config, orchestrator) = load_context(config_path)?;
        let environment = resolve_environment(&config, &self.environment);
        orchestrator.start_cancellable(&config, &environment, cancel).await?;
        println!("{environment}: up");
        Ok(())
    }
}

#[derive(Args)]
pub struct StopCommand {
    /// Environment to stop; defaults to the project file's current environment.
    environment: Option<String>,

    /// Also remove the postgres container (the data volume always survives; see `destroy`).
    #[arg(long)]
    remove: bool,
}

impl StopCommand {
    pub async fn execute(self, config_path: &Path, cancel: &Cancellation) -> Result<(), CliError> {
        let (config, orchestrator) = load_context(config_path)?;
        let environment = resolve_environment(&config, &self.environment);
        orchestrator.stop_cancellable(&config, &environment, self.remove, cancel).await?;
        println!("{environment}: stopped");
        Ok(())
    }
}

#[derive(Args)]
pub struct RestartCommand {
    /// Environment to restart; defaults to the project file's current environment.
    environment: Option<String>,
}

impl RestartCommand {
    pub async fn execute(self, config_path: &Path, cancel: &Cancellation) -> Result<(), CliError> {
        let (config, orchestrator) = load_context(config_path)?;
        let environment = resolve_environment(&config, &self.environment);
        orchestrator.restart_cancellable(&config, &environment, cancel).await?;
        println!("{environment}: up");
        Ok(())
    }
}

#[derive(Args)]
pub struct StatusCommand {
    /// Environment to inspect; defaults to the project file's current environment.
    environment: Option<String>,
}

impl StatusCommand {
    pub async fn execute(self, config_path: &Path) -> Result<(), CliError> {
        let (config, orchestrator) = load_context(config_path)?;
        let environment = resolve_environment(&config, &self.environment);
        let report = orchestrator.status(&config, &environment).await?;

        println!("{}", report.summary());
        if let Some(version) = &report.migrations.current_version {
            println!("  current migration: {version}");
        }
        if report.migrations.is_locked {
            println!("  migration lock held by {}", report.migrations.lock_holder.as_deref().unwrap_or("unknown"));
        }
        for (name, state) in &report.deployment_containers {
            println!("  container {name}: {:?}", state.status);
        }

        Ok(())
    }
}
