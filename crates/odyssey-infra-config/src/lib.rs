//! Per-resource configuration resolution.
//!
//! This crate discovers the configuration fragments of each resource folder,
//! merges them deterministically, expands `${name}` placeholders, and checks
//! required fields. Builders only ever see the resulting `ResolvedConfig`.

mod error;
mod layout;
mod manager;
mod model;
mod project;
pub mod validate;

/// Public error types returned by resolution and validation APIs.
pub use error::{ConfigError, ErrorReport};
/// Project directory layout.
pub use layout::ProjectLayout;
/// Config manager and batch inputs.
pub use manager::{
    ConfigManager, ConfigManagerOptions, ResourceSource, SourceLayout, has_placeholders,
    load_defaults,
};
/// Configuration data model.
pub use model::*;
/// Project settings and derived variables.
pub use project::{
    EnvironmentSettings, GithubSettings, PROJECT_FILE, ProjectSettings, partition_for_region,
};
/// Validation mode shared with builders.
pub use validate::{Collector, ValidationMode, ValueKind};
