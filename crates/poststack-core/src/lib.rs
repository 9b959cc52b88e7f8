//! Shared error taxonomy, checksum, and small types used by every poststack crate.

pub mod cancel;
pub mod checksum;
pub mod error;
pub mod types;

pub use cancel::Cancellation;
pub use checksum::checksum;
pub use error::{PoststackError, PoststackResult};
pub use types::{ManifestKind, ManifestRef, NetworkingMode, UtcDateTime};

pub use anyhow;
pub use chrono;
pub use thiserror;
pub use tracing;
