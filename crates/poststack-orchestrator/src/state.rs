//! The per-environment lifecycle state machine.
//!
//! ```text
//! [down] -start-> [starting-db] -ok-> [migrating] -ok-> [initializing] -ok-> [deploying] -ok-> [up]
//!                        |              |                   |                  |
//!                        +-fail---------+-------- fail -> [degraded] <---------+
//! [up] -stop(remove=false)-> [stopped]
//! [up] -stop(remove=true)-> [down]
//! [stopped] -start-> [starting-db]
//! [up] -restart-> stop(remove=true) then start
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    Down,
    StartingDb,
    Migrating,
    Initializing,
    Deploying,
    Up,
    Stopped,
    Degraded,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Down => "down",
            Self::StartingDb => "starting-db",
            Self::Migrating => "migrating",
            Self::Initializing => "initializing",
            Self::Deploying => "deploying",
            Self::Up => "up",
            Self::Stopped => "stopped",
            Self::Degraded => "degraded",
        };
        write!(f, "{label}")
    }
}
