//! Loads and validates the declarative project file, resolves the current environment,
//! and models the merge of built-in + user variables consumed by the rest of the stack.

mod loader;
mod model;

pub use model::{
    parse_manifest_ref, AutoGeneratedTag, EnvironmentSpec, PasswordField, PostgresConfig,
    ProjectConfig,
};
