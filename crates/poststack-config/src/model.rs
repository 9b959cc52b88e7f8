//! The declarative project file's data model — see the manifest schema in the project
//! README. Deserialized directly from YAML; [`ProjectConfig::load`] is the only place
//! that turns parse/validation failures into [`poststack_core::PoststackError`].

use poststack_core::{ManifestKind, ManifestRef};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Raw `postgres.password` value: either a literal or the sentinel that requests
/// deterministic-once generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PasswordField {
    AutoGenerated(AutoGeneratedTag),
    Literal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoGeneratedTag {
    #[serde(rename = "auto_generated")]
    AutoGenerated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub database: String,
    pub port: u16,
    pub user: String,
    pub password: PasswordField,
    #[serde(default = "default_host")]
    pub host: String,
}

fn default_host() -> String {
    "localhost".to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct RawManifestRef {
    compose: Option<String>,
    pod: Option<String>,
}

/// Deserializes `{ compose: <path> }` or `{ pod: <path> }` into a [`ManifestRef`],
/// rejecting both-present and neither-present as a config error at the caller.
pub fn parse_manifest_ref(raw: serde_yaml::Value) -> Result<ManifestRef, String> {
    let raw: RawManifestRef = serde_yaml::from_value(raw).map_err(|e| e.to_string())?;
    match (raw.compose, raw.pod) {
        (Some(path), None) => Ok(ManifestRef { kind: ManifestKind::Compose, path }),
        (None, Some(path)) => Ok(ManifestRef { kind: ManifestKind::Pod, path }),
        (Some(_), Some(_)) => Err("exactly one of compose|pod must be set, found both".to_string()),
        (None, None) => Err("exactly one of compose|pod must be set, found neither".to_string()),
    }
}

#[derive(Debug, Clone)]
pub struct EnvironmentSpec {
    pub name: String,
    pub postgres: PostgresConfig,
    pub init: Vec<ManifestRef>,
    pub deployment: ManifestRef,
    pub variables: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ProjectConfig {
    pub current_environment: String,
    pub project_name: String,
    pub project_description: Option<String>,
    pub environments: HashMap<String, EnvironmentSpec>,
    /// Directory holding `NNN_slug.sql` migration files, resolved relative to
    /// `base_dir`. Not part of the wire schema's required fields; defaults to
    /// `migrations`.
    pub migrations_dir: String,
    /// Directory containing the project file; every relative path in the document
    /// (manifests, `migrations_dir`) is resolved against this.
    pub base_dir: std::path::PathBuf,
}

impl ProjectConfig {
    pub fn current(&self) -> &EnvironmentSpec {
        self.environments
            .get(&self.current_environment)
            .expect("constructor invariant: current_environment in keys(environments)")
    }

    pub fn environment(&self, name: &str) -> Option<&EnvironmentSpec> {
        self.environments.get(name)
    }

    pub fn migrations_path(&self) -> std::path::PathBuf {
        self.base_dir.join(&self.migrations_dir)
    }

    pub fn manifest_path(&self, reference: &ManifestRef) -> std::path::PathBuf {
        self.base_dir.join(&reference.path)
    }

    /// A minimal, valid config used by tests across the workspace.
    pub fn example() -> Self {
        let mut variables = HashMap::new();
        variables.insert("LOG_LEVEL".to_string(), "info".to_string());

        let mut environments = HashMap::new();
        environments.insert(
            "dev".to_string(),
            EnvironmentSpec {
                name: "dev".to_string(),
                postgres: PostgresConfig {
                    database: "appdb".to_string(),
                    port: 5432,
                    user: "app".to_string(),
                    password: PasswordField::AutoGenerated(AutoGeneratedTag::AutoGenerated),
                    host: "localhost".to_string(),
                },
                init: Vec::new(),
                deployment: ManifestRef {
                    kind: ManifestKind::Compose,
                    path: "deploy/docker-compose.yml".to_string(),
                },
                variables,
            },
        );

        Self {
            current_environment: "dev".to_string(),
            project_name: "myapp".to_string(),
            project_description: None,
            environments,
            migrations_dir: "migrations".to_string(),
            base_dir: std::path::PathBuf::from("."),
        }
    }
}
