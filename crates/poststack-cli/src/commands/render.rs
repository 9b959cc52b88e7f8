use super::{load_context, resolve_environment};
use crate::output::CliError;
use clap::Args;
use poststack_orchestrator::ManifestTarget;
use std::path::Path;

#[derive(Args)]
pub struct RenderCommand {
    /// Environment whose manifests to render; defaults to the current environment.
    environment: Option<String>,

    /// Render the init manifest at this index instead of the deployment manifest.
    #[arg(long)]
    init: Option<usize>,

    /// Print the resolved variable table and rendered text as JSON.
    #[arg(long)]
    json: bool,
}

impl RenderCommand {
    pub async fn execute(self, config_path: &Path) -> Result<(), CliError> {
        let (config, orchestrator) = load_context(config_path)?;
        let environment = resolve_environment(&config, &self.environment);
        let target = match self.init {
            Some(index) => ManifestTarget::Init(index),
            None => ManifestTarget::Deployment,
        };

        let result = orchestrator.render(&config, &environment, target).await?;

        if self.json {
            let rendered = serde_json::to_string_pretty(&result).map_err(anyhow::Error::from)?;
            println!("{rendered}");
            return Ok(());
        }

        println!("resolved variables:");
        for variable in &result.resolved {
            println!("  {} = {} (source: {})", variable.name, variable.value, variable.source);
        }
        if !result.undefined.is_empty() {
            println!("undefined:");
            let mut names: Vec<&String> = result.undefined.iter().collect();
            names.sort();
            for name in names {
                println!("  {name}");
            }
        }
        println!("---");
        println!("{}", result.rendered);
        Ok(())
    }
}
