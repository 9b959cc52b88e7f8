//! Small shared types used across poststack crates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Standard timestamp type used throughout the workspace.
pub type UtcDateTime = DateTime<Utc>;

/// The two manifest formats the core passes through template expansion unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestKind {
    Pod,
    Compose,
}

impl std::fmt::Display for ManifestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pod => write!(f, "pod"),
            Self::Compose => write!(f, "compose"),
        }
    }
}

/// A reference to one on-disk manifest, tagged with its kind. `path` is stored as
/// written in the project file (relative to the project's base directory); callers
/// resolve it against `ProjectConfig::base_dir` when they need to actually read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestRef {
    pub kind: ManifestKind,
    pub path: String,
}

/// Networking mode a service (or a target resolving a dependency) operates under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkingMode {
    Host,
    Bridge,
}

impl Default for NetworkingMode {
    fn default() -> Self {
        Self::Bridge
    }
}
