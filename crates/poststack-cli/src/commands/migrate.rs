use super::{load_context, resolve_environment};
use crate::output::CliError;
use clap::Args;
use poststack_core::Cancellation;
use std::path::Path;

#[derive(Args)]
pub struct MigrateCommand {
    /// Environment whose postgres instance to migrate; defaults to the current environment.
    environment: Option<String>,

    /// Apply migrations up to and including this version, instead of everything pending.
    #[arg(long)]
    target: Option<String>,
}

impl MigrateCommand {
    pub async fn execute(self, config_path: &Path, cancel: &Cancellation) -> Result<(), CliError> {
        let (config, orchestrator) = load_context(config_path)?;
        let environment = resolve_environment(&config, &self.environment);
        let runner = orchestrator.migration_runner(&config, &environment).await?;

        let applied = runner.migrate_cancellable(self.target.as_deref(), cancel).await?;
        if applied.is_empty() {
            println!("{environment}: already up to date");
        } else {
            println!("{environment}: applied {} migration(s)", applied.len());
            for version in &applied {
                println!("  + {version}");
            }
        }
        Ok(())
    }
}

#[derive(Args)]
pub struct RollbackCommand {
    /// Environment whose postgres instance to roll back; defaults to the current environment.
    environment: Option<String>,

    /// Roll back every applied migration above this version.
    #[arg(long)]
    target: String,
}

impl RollbackCommand {
    pub async fn execute(self, config_path: &Path) -> Result<(), CliError> {
        let (config, orchestrator) = load_context(config_path)?;
        let environment = resolve_environment(&config, &self.environment);
        let runner = orchestrator.migration_runner(&config, &environment).await?;

        let rolled_back = runner.rollback(&self.target).await?;
        if rolled_back.is_empty() {
            println!("{environment}: nothing to roll back above {}", self.target);
        } else {
            println!("{environment}: rolled back {} migration(s)", rolled_back.len());
            for version in &rolled_back {
                println!("  - {version}");
            }
        }
        Ok(())
    }
}

#[derive(Args)]
pub struct VerifyCommand {
    /// Environment to verify; defaults to the current environment.
    environment: Option<String>,
}

impl VerifyCommand {
    pub async fn execute(self, config_path: &Path) -> Result<(), CliError> {
        let (config, orchestrator) = load_context(config_path)?;
        let environment = resolve_environment(&config, &self.environment);
        let runner = orchestrator.migration_runner(&config, &environment).await?;

        let drifts = runner.verify().await?;
        if drifts.is_empty() {
            println!("{environment}: no checksum drift");
            return Ok(());
        }

        println!("{environment}: {} migration(s) with checksum drift", drifts.len());
        for drift in &drifts {
            println!(
                "  {}: recorded {} != current {}",
                drift.version, drift.recorded, drift.current
            );
        }
        Err(poststack_core::PoststackError::ChecksumMismatch {
            version: drifts[0].version.clone(),
        }
        .into())
    }
}
