//! Test helpers shared across Odyssey infrastructure crates.

pub mod config;
pub mod project;

pub use config::{resolved, resolved_with_sources, try_resolve};
pub use project::ProjectFixture;
