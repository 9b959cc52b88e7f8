//! On-disk persistence for deterministically-generated postgres passwords.
//!
//! `PasswordPolicy::AutoGenerated` must produce the same credential across repeated
//! `start` invocations, so the first generation is written to a small JSON file
//! alongside the project and read back thereafter.

use poststack_core::{PoststackError, PoststackResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const PASSWORD_LENGTH: usize = 32;
const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    #[serde(default)]
    generated_passwords: HashMap<String, String>,
}

/// Generates and persists one auto-generated password per `(project, environment)` key.
pub struct PasswordStore {
    path: PathBuf,
}

impl PasswordStore {
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

    /// Return the persisted password for `(project, environment)`, generating and
    /// persisting a fresh one on first call.
    pub async fn get_or_generate(&self, project: &str, environment: &str) -> PoststackResult<String> {
        let key = Self::key(project, environment);
        let mut state = self.load().await?;

        if let Some(existing) = state.generated_passwords.get(&key) {
            return Ok(existing.clone());
        }

        let password = generate_password();
        state.generated_passwords.insert(key, password.clone());
        self.save(&state).await?;
        Ok(password)
    }
}

fn generate_password() -> String {
    let mut rng = rand::thread_rng();
    (0..PASSWORD_LENGTH)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
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
    async fn generates_once_and_persists_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store_a = PasswordStore::new(&path);
        let first = store_a.get_or_generate("myapp", "dev").await.unwrap();

        let store_b = PasswordStore::new(&path);
        let second = store_b.get_or_generate("myapp", "dev").await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn different_environments_get_different_passwords() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = PasswordStore::new(&path);

        let dev = store.get_or_generate("myapp", "dev").await.unwrap();
        let staging = store.get_or_generate("myapp", "staging").await.unwrap();

        assert_ne!(dev, staging);
    }
}
