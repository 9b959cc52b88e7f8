//! poststack - single entrypoint CLI for the project-scoped environment operator.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use commands::{
    ClearLocksCommand, DiagnoseCommand, MigrateCommand, RecoverCommand, RenderCommand,
    RepairCommand, RestartCommand, RollbackCommand, StartCommand, StatusCommand, StopCommand,
    VerifyCommand,
};
use poststack_core::Cancellation;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, Layer};

#[derive(Parser)]
#[command(author, version, about = "Reproducible PostgreSQL-backed environments", long_about = None)]
struct Cli {
    /// Path to the project file.
    #[arg(long, short = 'c', default_value = "poststack.yml", env = "POSTSTACK_CONFIG", global = true)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "POSTSTACK_LOG_LEVEL", global = true)]
    log_level: String,

    /// Log format: compact, full.
    #[arg(long, default_value = "compact", env = "POSTSTACK_LOG_FORMAT", global = true)]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring an environment up: postgres, migrations, init phase, deployment.
    Start(StartCommand),
    /// Tear down an environment's deployment (and optionally its postgres container).
    Stop(StopCommand),
    /// Stop then start an environment.
    Restart(RestartCommand),
    /// Report the aggregated lifecycle state of an environment.
    Status(StatusCommand),
    /// Apply pending migrations.
    Migrate(MigrateCommand),
    /// Roll back migrations above a target version.
    Rollback(RollbackCommand),
    /// Compare on-disk migration checksums against the tracker, without mutating state.
    Verify(VerifyCommand),
    /// Detect tracker/schema/lock inconsistencies.
    Diagnose(DiagnoseCommand),
    /// Apply the auto-fixable subset of a diagnose run.
    Repair(RepairCommand),
    /// Insert tracker rows for migrations whose schema objects already exist.
    Recover(RecoverCommand),
    /// Force-clear a stuck migration lock.
    ClearLocks(ClearLocksCommand),
    /// Preview template expansion for a manifest without applying it.
    Render(RenderCommand),
}

fn build_filter(log_level: &str) -> tracing_subscriber::EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return tracing_subscriber::EnvFilter::try_from_default_env()
            .expect("invalid RUST_LOG environment variable");
    }

    tracing_subscriber::EnvFilter::new(format!(
        "poststack_cli={level},\
         poststack_orchestrator={level},\
         poststack_migrations={level},\
         poststack_postgres={level},\
         poststack_runtime={level},\
         poststack_registry={level},\
         poststack_template={level},\
         poststack_config={level},\
         poststack_core={level},\
         sqlx=warn,\
         bollard=warn,\
         hyper=warn",
        level = log_level
    ))
}

fn init_logging(log_level: &str, log_format: &str) {
    let filter = build_filter(log_level);

    let fmt_layer = match log_format {
        "full" => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)
        .expect("failed to install global tracing subscriber");
}

/// Spawn a task that cancels `cancel` the moment ctrl-c arrives, so any in-flight
/// migration, readiness poll, or manifest wait observes it at its next check point.
fn spawn_ctrlc_handler(cancel: Cancellation) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("received interrupt, cancelling in-flight operation");
            cancel.cancel();
        }
    });
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level, &cli.log_format);

    let cancel = Cancellation::new();
    spawn_ctrlc_handler(cancel.clone());

    let result = match cli.command {
        Commands::Start(cmd) => cmd.execute(&cli.config, &cancel).await,
        Commands::Stop(cmd) => cmd.execute(&cli.config, &cancel).await,
        Commands::Restart(cmd) => cmd.execute(&cli.config, &cancel).await,
        Commands::Status(cmd) => cmd.execute(&cli.config).await,
        Commands::Migrate(cmd) => cmd.execute(&cli.config, &cancel).await,
        Commands::Rollback(cmd) => cmd.execute(&cli.config).await,
        Commands::Verify(cmd) => cmd.execute(&cli.config).await,
        Commands::Diagnose(cmd) => cmd.execute(&cli.config).await,
        Commands::Repair(cmd) => cmd.execute(&cli.config).await,
        Commands::Recover(cmd) => cmd.execute(&cli.config).await,
        Commands::ClearLocks(cmd) => cmd.execute(&cli.config).await,
        Commands::Render(cmd) => cmd.execute(&cli.config).await,
    };

    if let Err(err) = result {
        output::print_failure(&err);
        std::process::exit(output::exit_code_for(&err));
    }
}
