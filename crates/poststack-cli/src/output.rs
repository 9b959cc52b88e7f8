//! User-visible failure reporting: `(kind, one-line summary, suggested next command)`,
//! per the error handling design, plus the exit code table.

use poststack_core::PoststackError;

/// Errors that reach `main`: either a typed [`PoststackError`] (exit code and
/// suggested remediation both known) or an opaque I/O/setup failure (exit code 1).
#[derive(Debug)]
pub enum CliError {
    Poststack(PoststackError),
    Other(anyhow::Error),
}

impl From<PoststackError> for CliError {
    fn from(err: PoststackError) -> Self {
        CliError::Poststack(err)
    }
}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::Other(err)
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Poststack(err) => write!(f, "{err}"),
            CliError::Other(err) => write!(f, "{err}"),
        }
    }
}

pub fn exit_code_for(err: &CliError) -> i32 {
    match err {
        CliError::Poststack(err) => err.exit_code(),
        CliError::Other(_) => 1,
    }
}

pub fn print_failure(err: &CliError) {
    match err {
        CliError::Poststack(err) => {
            eprintln!("error [{}]: {}", err.kind_name(), err);
            if let Some(suggestion) = err.suggested_command() {
                eprintln!("  suggested next command: poststack {suggestion}");
            }
        }
        CliError::Other(err) => {
            eprintln!("error: {err:#}");
        }
    }
}
