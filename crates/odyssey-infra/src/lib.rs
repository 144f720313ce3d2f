//! Public surface for Odyssey infrastructure synthesis.
//!
//! This crate re-exports the config and builder crates and assembles their
//! output into a [`StackPlan`] for one environment.

pub mod stack;

/// Re-export for convenience.
pub use odyssey_infra_builders as builders;
/// Re-export for convenience.
pub use odyssey_infra_config as config;

pub use stack::{StackError, StackOptions, StackPlan, plan_stack};

#[inline]
/// Initialize logging using env_logger if the "logging" feature is enabled.
///
/// Binaries call this once at startup; later calls are ignored.
pub fn init_logging() {
    #[cfg(feature = "logging")]
    {
        let _ = env_logger::builder()
            .format_timestamp_millis()
            .parse_default_env()
            .try_init();
    }
}
