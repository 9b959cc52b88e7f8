//! On-disk tracking of the container/pod names a deployment manifest last produced.
//!
//! `apply_manifest` returns the runtime-assigned names at the moment a manifest is
//! applied; `status()` runs in a separate process invocation and has nothing else to
//! inspect by, so the names are persisted alongside the project the same way
//! [`poststack_postgres::state::PasswordStore`] persists generated passwords.

use poststack_core::{PoststackError, PoststackResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    #[serde(default)]
    deployments: HashMap<String, Vec<String>>,
}

/// Persists the last-known set of deployment container names per `(project, environment)`.
pub struct DeploymentStateStore {
    path: PathBuf,
}

impl DeploymentStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn key(project: &str, environment: &str) -> String {
        format!("{project}:{environment}")
    }

    async fn load(&self) -> PoststackResult<PersistedState> {
        if !self.path.exists() {
            return Ok(PersistedState::default());
        }
        let mut contents = String::new();
        fs::File::open(&self.path)
            .await
            .map_err(|e| io_err(&self.path, e))?
            .read_to_string(&mut contents)
            .await
            .map_err(|e| io_err(&self.path, e))?;
        serde_json::from_str(&contents).map_err(|e| PoststackError::ConfigInvalid {
            path: self.path.display().to_string(),
            message: format!("corrupt local state file: {e}"),
        })
    }

    async fn save(&self, state: &PersistedState) -> PoststackResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| io_err(&self.path, e))?;
        }
        let contents = serde_json::to_string_pretty(state).expect("state serializes");
        fs::File::create(&self.path)
            .await
            .map_err(|e| io_err(&self.path, e))?
            .write_all(contents.as_bytes())
            .await
            .map_err(|e| io_err(&self.path, e))?;
        Ok(())
    }

    /// Record the container names produced by the most recent `apply_manifest` call
    /// for `(project, environment)`.
    pub async fn record(&self, project: &str, environment: &str, names: Vec<String>) -> PoststackResult<()> {
        let key = Self::key(project, environment);
        let mut state = self.load().await?;
        state.deployments.insert(key, names);
        self.save(&state).await
    }

    /// Forget the container names for `(project, environment)`, called once the
    /// deployment manifest has been torn down.
    pub async fn clear(&self, project: &str, environment: &str) -> PoststackResult<()> {
        let key = Self::key(project, environment);
        let mut state = self.load().await?;
        if state.deployments.remove(&key).is_some() {
            self.save(&state).await?;
        }
        Ok(())
    }

    /// The container names last recorded for `(project, environment)`, empty if none.
    pub async fn get(&self, project: &str, environment: &str) -> PoststackResult<Vec<String>> {
        let key = Self::key(project, environment);
        let state = self.load().await?;
        Ok(state.deployments.get(&key).cloned().unwrap_or_default())
    }
}

fn io_err(path: &Path, e: std::io::Error) -> PoststackError {
    PoststackError::ConfigInvalid {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn records_and_reads_back_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let writer = DeploymentStateStore::new(&path);
        writer
            .record("myapp", "dev", vec!["myapp-web-1".to_string(), "myapp-worker-1".to_string()])
            .await
            .unwrap();

        let reader = DeploymentStateStore::new(&path);
        let names = reader.get("myapp", "dev").await.unwrap();
        assert_eq!(names, vec!["myapp-web-1".to_string(), "myapp-worker-1".to_string()]);
    }

    #[tokio::test]
    async fn unknown_environment_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = DeploymentStateStore::new(&path);
        assert!(store.get("myapp", "dev").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_removes_the_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = DeploymentStateStore::new(&path);

        store.record("myapp", "dev", vec!["myapp-web-1".to_string()]).await.unwrap();
        store.clear("myapp", "dev").await.unwrap();

        assert!(store.get("myapp", "dev").await.unwrap().is_empty());
    }
}
