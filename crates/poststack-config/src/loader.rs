//! YAML loading and validation for the project file.

use crate::model::{parse_manifest_ref, EnvironmentSpec, PostgresConfig, ProjectConfig};
use poststack_core::{PoststackError, PoststackResult};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

fn default_migrations_dir() -> String {
    "migrations".to_string()
}

#[derive(Debug, Deserialize)]
struct RawProjectFile {
    environment: String,
    project: RawProjectMeta,
    environments: HashMap<String, RawEnvironmentSpec>,
    #[serde(default = "default_migrations_dir")]
    migrations_dir: String,
}

#[derive(Debug, Deserialize)]
struct RawProjectMeta {
    name: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawEnvironmentSpec {
    postgres: PostgresConfig,
    #[serde(default)]
    init: Vec<serde_yaml::Value>,
    deployment: serde_yaml::Value,
    #[serde(default)]
    variables: HashMap<String, String>,
}

impl ProjectConfig {
    /// Load and validate the project file at `path`. Every failure is a path-qualified
    /// [`PoststackError::ConfigInvalid`].
    pub fn load(path: &Path) -> PoststackResult<Self> {
        let path_label = path.display().to_string();
        let contents = std::fs::read_to_string(path).map_err(|e| PoststackError::ConfigInvalid {
            path: path_label.clone(),
            message: format!("cannot read project file: {e}"),
        })?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| std::path::PathBuf::from("."));
        Self::parse_with_base(&contents, &path_label, base_dir)
    }

    /// Parse an in-memory document; `path_label` is used only to qualify error
    /// messages (it need not be a real path in tests). `base_dir` defaults to `.`.
    pub fn parse(contents: &str, path_label: &str) -> PoststackResult<Self> {
        Self::parse_with_base(contents, path_label, std::path::PathBuf::from("."))
    }

    pub fn parse_with_base(
        contents: &str,
        path_label: &str,
        base_dir: std::path::PathBuf,
    ) -> PoststackResult<Self> {
        let raw: RawProjectFile =
            serde_yaml::from_str(contents).map_err(|e| PoststackError::ConfigInvalid {
                path: path_label.to_string(),
                message: format!("invalid YAML: {e}"),
            })?;

        if !raw.environments.contains_key(&raw.environment) {
            return Err(PoststackError::ConfigInvalid {
                path: format!("{path_label}:environment"),
                message: format!(
                    "selected environment '{}' is not declared under environments",
                    raw.environment
                ),
            });
        }

        let mut environments = HashMap::with_capacity(raw.environments.len());
        for (name, raw_env) in raw.environments {
            let env_path = format!("{path_label}:environments.{name}");

            let init = raw_env
                .init
                .into_iter()
                .enumerate()
                .map(|(idx, value)| {
                    parse_manifest_ref(value).map_err(|message| PoststackError::ConfigInvalid {
                        path: format!("{env_path}.init[{idx}]"),
                        message,
                    })
                })
                .collect::<PoststackResult<Vec<_>>>()?;

            let deployment =
                parse_manifest_ref(raw_env.deployment).map_err(|message| PoststackError::ConfigInvalid {
                    path: format!("{env_path}.deployment"),
                    message,
                })?;

            environments.insert(
                name.clone(),
                EnvironmentSpec {
                    name,
                    postgres: raw_env.postgres,
                    init,
                    deployment,
                    variables: raw_env.variables,
                },
            );
        }

        Ok(ProjectConfig {
            current_environment: raw.environment,
            project_name: raw.project.name,
            project_description: raw.project.description,
            environments,
            migrations_dir: raw.migrations_dir,
            base_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
environment: dev
project:
  name: myapp
environments:
  dev:
    postgres:
      database: appdb
      port: 5432
      user: app
      password: auto_generated
    init:
      - compose: deploy/init.yml
    deployment:
      compose: deploy/app.yml
    variables:
      LOG_LEVEL: debug
"#;

    #[test]
    fn loads_a_valid_document() {
        let config = ProjectConfig::parse(VALID, "test.yml").unwrap();
        assert_eq!(config.current_environment, "dev");
        let env = config.current();
        assert_eq!(env.postgres.database, "appdb");
        assert_eq!(env.init.len(), 1);
        assert_eq!(env.variables.get("LOG_LEVEL").unwrap(), "debug");
    }

    #[test]
    fn rejects_unknown_current_environment() {
        let doc = VALID.replace("environment: dev", "environment: staging");
        let err = ProjectConfig::parse(&doc, "test.yml").unwrap_err();
        assert!(matches!(err, PoststackError::ConfigInvalid { .. }));
    }

    #[test]
    fn rejects_deployment_with_both_compose_and_pod() {
        let doc = VALID.replace(
            "deployment:\n      compose: deploy/app.yml",
            "deployment:\n      compose: deploy/app.yml\n      pod: deploy/app.pod.yml",
        );
        let err = ProjectConfig::parse(&doc, "test.yml").unwrap_err();
        match err {
            PoststackError::ConfigInvalid { path, .. } => {
                assert!(path.contains("deployment"));
            }
            _ => panic!("expected ConfigInvalid"),
        }
    }

    #[test]
    fn rejects_deployment_with_neither_compose_nor_pod() {
        let doc = VALID.replace("compose: deploy/app.yml", "image: not-a-manifest-ref");
        let err = ProjectConfig::parse(&doc, "test.yml").unwrap_err();
        assert!(matches!(err, PoststackError::ConfigInvalid { .. }));
    }

    #[test]
    fn literal_password_round_trips() {
        let doc = VALID.replace("password: auto_generated", "password: hunter2");
        let config = ProjectConfig::parse(&doc, "test.yml").unwrap();
        match config.current().postgres.password {
            crate::model::PasswordField::Literal(ref value) => assert_eq!(value, "hunter2"),
            _ => panic!("expected literal password"),
        }
    }
}
