//! Lifecycle controller for the per-environment postgres container: detect existing,
//! restart stopped, recreate failed, provision fresh; emit a connection descriptor.

mod controller;
mod state;
mod types;

pub use controller::PostgresController;
pub use state::PasswordStore;
pub use types::{ConnectionDescriptor, PasswordPolicy, PostgresSpec, PostgresState};
