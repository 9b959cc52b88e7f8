//! Layered variable scope with an explicit precedence order

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Where a resolved variable's value came from, highest precedence first. The
/// orchestrator assembles a `VariableScope` with layers pushed in this order before
/// handing it to the template engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VariableSource {
    /// Dependency-derived variables from ServiceRegistry (e.g. `DATABASE_URL`).
    Dependency,
    /// Built-ins (`POSTSTACK_ENVIRONMENT`, `DB_HOST`, ...).
    BuiltIn,
    /// Per-environment `variables` from EnvironmentSpec.
    Environment,
    /// Project-wide defaults.
    ProjectDefault,
    /// `${NAME:-DEFAULT}` fallback used because `NAME` was absent or empty.
    Default,
}

impl std::fmt::Display for VariableSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dependency => write!(f, "dependency"),
            Self::BuiltIn => write!(f, "built-in"),
            Self::Environment => write!(f, "environment"),
            Self::ProjectDefault => write!(f, "project-default"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// An ordered stack of variable layers, highest precedence first.
///
/// Layers are pushed in precedence order (dependency vars first, project defaults
/// last); lookup scans top to bottom and returns the first layer that defines the name,
/// even if that layer's value is the empty string — emptiness only matters for the
/// `${NAME:-DEFAULT}` form, not for plain lookup.
#[derive(Debug, Clone, Default)]
pub struct VariableScope {
    layers: Vec<(VariableSource, HashMap<String, String>)>,
}

impl VariableScope {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Push a layer. Layers pushed earlier take precedence over layers pushed later.
    pub fn push_layer(&mut self, source: VariableSource, vars: HashMap<String, String>) -> &mut Self {
        self.layers.push((source, vars));
        self
    }

    pub fn with_layer(mut self, source: VariableSource, vars: HashMap<String, String>) -> Self {
        self.push_layer(source, vars);
        self
    }

    /// Resolve `name` against the layers, returning the first defining layer's value
    /// and its source, regardless of whether that value is empty.
    pub fn lookup(&self, name: &str) -> Option<(&str, VariableSource)> {
        for (source, vars) in &self.layers {
            if let Some(value) = vars.get(name) {
                return Some((value.as_str(), *source));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn higher_layer_wins() {
        let scope = VariableScope::new()
            .with_layer(VariableSource::Dependency, map(&[("DATABASE_URL", "dep")]))
            .with_layer(VariableSource::ProjectDefault, map(&[("DATABASE_URL", "default")]));
        let (value, source) = scope.lookup("DATABASE_URL").unwrap();
        assert_eq!(value, "dep");
        assert_eq!(source, VariableSource::Dependency);
    }

    #[test]
    fn falls_through_to_lower_layer_when_absent() {
        let scope = VariableScope::new()
            .with_layer(VariableSource::Dependency, map(&[]))
            .with_layer(VariableSource::ProjectDefault, map(&[("LOG_LEVEL", "info")]));
        let (value, source) = scope.lookup("LOG_LEVEL").unwrap();
        assert_eq!(value, "info");
        assert_eq!(source, VariableSource::ProjectDefault);
    }

    #[test]
    fn empty_value_in_higher_layer_still_wins_for_plain_lookup() {
        let scope = VariableScope::new()
            .with_layer(VariableSource::Environment, map(&[("LOG_LEVEL", "")]))
            .with_layer(VariableSource::ProjectDefault, map(&[("LOG_LEVEL", "info")]));
        let (value, _) = scope.lookup("LOG_LEVEL").unwrap();
        assert_eq!(value, "");
    }
}
