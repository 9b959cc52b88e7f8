//! Deterministic `${VAR}` / `${VAR:-default}` expansion over deployment manifests.

mod engine;
mod scope;

pub use engine::{expand, expand_dry_run, referenced_names, DryRunResult, ResolvedVariable, UNDEFINED_TOKEN};
pub use scope::{VariableScope, VariableSource};
