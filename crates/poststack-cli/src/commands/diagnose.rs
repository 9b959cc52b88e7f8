use super::{load_context, resolve_environment};
use crate::output::CliError;
use clap::Args;
use poststack_migrations::{DiagnosticIssue, Diagnostics};
use std::path::Path;

#[derive(Args)]
pub struct DiagnoseCommand {
    /// Environment to inspect; defaults to the current environment.
    environment: Option<String>,

    /// Print the issue list as JSON instead of a human-readable report.
    #[arg(long)]
    json: bool,
}

impl DiagnoseCommand {
    pub async fn execute(self, config_path: &Path) -> Result<(), CliError> {
        let (config, orchestrator) = load_context(config_path)?;
        let environment = resolve_environment(&config, &self.environment);
        let runner = orchestrator.migration_runner(&config, &environment).await?;

        let diagnostics = Diagnostics::new(&runner);
        let issues = diagnostics.diagnose().await?;

        if self.json {
            let rendered = serde_json::to_string_pretty(&issues).map_err(anyhow::Error::from)?;
            println!("{rendered}");
            return Ok(());
        }

        if issues.is_empty() {
            println!("{environment}: no issues found");
            return Ok(());
        }

        println!("{environment}: {} issue(s) found", issues.len());
        for issue in &issues {
            print_issue(issue);
        }
        Ok(())
    }
}

fn print_issue(issue: &DiagnosticIssue) {
    let version = issue.version.as_deref().unwrap_or("-");
    println!(
        "  [{:?}/{:?}] version={} {}",
        issue.severity, issue.kind, version, issue.description
    );
    println!("      {}", issue.details);
    println!("      fix: {}", issue.suggested_fix);
}

#[derive(Args)]
pub struct RepairCommand {
    /// Environment to repair; defaults to the current environment.
    environment: Option<String>,

    /// Also apply fixes that discard state that cannot be recomputed from current
    /// on-disk/tracker content (e.g. dropping a tracker row for an invalid migration).
    #[arg(long)]
    force: bool,

    /// Compute the action list without applying anything.
    #[arg(long)]
    dry_run: bool,
}

impl RepairCommand {
    pub async fn execute(self, config_path: &Path) -> Result<(), CliError> {
        let (config, orchestrator) = load_context(config_path)?;
        let environment = resolve_environment(&config, &self.environment);
        let runner = orchestrator.migration_runner(&config, &environment).await?;

        let diagnostics = Diagnostics::new(&runner);
        let issues = diagnostics.diagnose().await?;
        let actions = diagnostics.repair(&issues, self.force, self.dry_run).await?;

        if actions.is_empty() {
            println!("{environment}: nothing to repair");
            return Ok(());
        }

        for action in &actions {
            let verb = if self.dry_run {
                "would apply"
            } else if action.applied {
                "applied"
            } else {
                "skipped"
            };
            println!(
                "  {verb}: {:?} version={} - {}",
                action.kind,
                action.version.as_deref().unwrap_or("-"),
                action.description
            );
        }
        Ok(())
    }
}

#[derive(Args)]
pub struct RecoverCommand {
    /// Environment to recover; defaults to the current environment.
    environment: Option<String>,

    /// Specific migration versions to recover. When omitted, recovers every pending
    /// migration whose schema objects already exist (see `recover_all`).
    #[arg(long = "version")]
    versions: Vec<String>,

    /// Compute the action list without inserting tracker rows.
    #[arg(long)]
    dry_run: bool,
}

impl RecoverCommand {
    pub async fn execute(self, config_path: &Path) -> Result<(), CliError> {
        let (config, orchestrator) = load_context(config_path)?;
        let environment = resolve_environment(&config, &self.environment);
        let runner = orchestrator.migration_runner(&config, &environment).await?;

        let diagnostics = Diagnostics::new(&runner);
        let actions = if self.versions.is_empty() {
            diagnostics.recover_all(self.dry_run).await?
        } else if self.dry_run {
            diagnostics
                .diagnose()
                .await?
                .into_iter()
                .filter(|i| {
                    i.version
                        .as_ref()
                        .map(|v| self.versions.contains(v))
                        .unwrap_or(false)
                })
                .map(|i| poststack_migrations::RepairAction {
                    kind: i.kind,
                    version: i.version,
                    description: i.suggested_fix,
                    applied: false,
                })
                .collect()
        } else {
            diagnostics.recover(&self.versions).await?
        };

        if actions.is_empty() {
            println!("{environment}: nothing to recover");
            return Ok(());
        }

        for action in &actions {
            let verb = if self.dry_run { "would recover" } else { "recovered" };
            println!("  {verb}: version={}", action.version.as_deref().unwrap_or("-"));
        }
        Ok(())
    }
}

#[derive(Args)]
pub struct ClearLocksCommand {
    /// Environment whose migration lock to force-clear; defaults to the current environment.
    environment: Option<String>,
}

impl ClearLocksCommand {
    pub async fn execute(self, config_path: &Path) -> Result<(), CliError> {
        let (config, orchestrator) = load_context(config_path)?;
        let environment = resolve_environment(&config, &self.environment);
        let runner = orchestrator.migration_runner(&config, &environment).await?;

        runner.tracker().force_clear_lock().await?;
        println!("{environment}: migration lock cleared");
        Ok(())
    }
}
