//! Common error taxonomy shared across all poststack crates

use chrono::{DateTime, Utc};
use thiserror::Error;

/// The poststack error taxonomy.
///
/// Each crate defines its own narrower error enum for its own concerns and converts
/// into this one at the boundary where the orchestrator or CLI need a single type to
/// match on. Variants here correspond 1:1 to the `kind`s in the error-handling design.
#[derive(Error, Debug)]
pub enum PoststackError {
    #[error("configuration invalid at {path}: {message}")]
    ConfigInvalid { path: String, message: String },

    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("container {container} failed: {message}")]
    RuntimeFailure { container: String, message: String },

    #[error("database unreachable: {0}")]
    DatabaseUnreachable(String),

    #[error("migration lock held by {holder} since {since}")]
    LockHeld {
        holder: String,
        since: DateTime<Utc>,
    },

    #[error("migration {version} failed: {cause}")]
    MigrationFailed { version: String, cause: String },

    #[error("partial migration residue detected for {version}; repair required")]
    PartialMigration { version: String },

    #[error("checksum drift detected for migration {version}")]
    ChecksumMismatch { version: String },

    #[error("init phase failed: manifest {manifest}, container {container}, exit code {exit_code}")]
    InitFailed {
        manifest: String,
        container: String,
        exit_code: i64,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type PoststackResult<T> = Result<T, PoststackError>;

impl PoststackError {
    /// Short machine-stable name for the error kind, used in CLI diagnostics output.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::ConfigInvalid { .. } => "ConfigInvalid",
            Self::RuntimeUnavailable(_) => "RuntimeUnavailable",
            Self::RuntimeFailure { .. } => "RuntimeFailure",
            Self::DatabaseUnreachable(_) => "DatabaseUnreachable",
            Self::LockHeld { .. } => "LockHeld",
            Self::MigrationFailed { .. } => "MigrationFailed",
            Self::PartialMigration { .. } => "PartialMigration",
            Self::ChecksumMismatch { .. } => "ChecksumMismatch",
            Self::InitFailed { .. } => "InitFailed",
            Self::Cancelled => "Cancelled",
            Self::Internal(_) => "Internal",
        }
    }

    /// The next command an operator should run, surfaced alongside the one-line summary.
    pub fn suggested_command(&self) -> Option<&'static str> {
        match self {
            Self::LockHeld { .. } => Some("clear-locks"),
            Self::PartialMigration { .. } => Some("diagnose"),
            Self::ChecksumMismatch { .. } => Some("diagnose"),
            Self::InitFailed { .. } => Some("status"),
            Self::ConfigInvalid { .. } => None,
            Self::RuntimeUnavailable(_) => None,
            Self::RuntimeFailure { .. } => Some("status"),
            Self::DatabaseUnreachable(_) => None,
            Self::Cancelled => None,
            Self::Internal(_) => None,
        }
    }

    /// Process exit code for this error, per the documented exit code table.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConfigInvalid { .. } => 2,
            Self::DatabaseUnreachable(_) => 3,
            Self::MigrationFailed { .. }
            | Self::PartialMigration { .. }
            | Self::LockHeld { .. }
            | Self::InitFailed { .. } => 4,
            Self::ChecksumMismatch { .. } => 5,
            _ => 1,
        }
    }
}
