//! Top-level lifecycle state machine: composes [`poststack_postgres`],
//! [`poststack_registry`], [`poststack_migrations`], [`poststack_template`], and
//! [`poststack_runtime`] into the `start / stop / restart / status` surface exposed to
//! the CLI.

mod deployment_state;
pub mod orchestrator;
pub mod state;
pub mod status;
pub mod vars;

pub use orchestrator::{EnvironmentOrchestrator, ManifestTarget};
pub use state::LifecycleState;
pub use status::StatusReport;
