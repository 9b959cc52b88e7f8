//! Aggregated status reporting, composing every owned component's own status view.

use poststack_migrations::MigrationStatus;
use poststack_postgres::PostgresState;
use poststack_runtime::ContainerState;

use crate::state::LifecycleState;

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub project_name: String,
    pub environment: String,
    pub lifecycle: LifecycleState,
    pub postgres_state: PostgresState,
    pub migrations: MigrationStatus,
    pub deployment_containers: Vec<(String, ContainerState)>,
}

impl StatusReport {
    /// A single human-readable line, useful for the CLI's default (non-`--json`) output.
    pub fn summary(&self) -> String {
        format!(
            "{}/{}: {} (postgres {:?}, {} applied, {} pending)",
            self.project_name,
            self.environment,
            self.lifecycle,
            self.postgres_state,
            self.migrations.applied.len(),
            self.migrations.pending.len(),
        )
    }
}
