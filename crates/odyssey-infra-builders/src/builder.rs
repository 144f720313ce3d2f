//! Builder seam shared by every resource kind.

use crate::BuildContext;
use odyssey_infra_config::validate::Collector;
use odyssey_infra_config::{ConfigError, ErrorReport, ResolvedConfig, ResourceKind, ValidationMode};

/// Pure transform from a resolved configuration to a resource definition.
///
/// Builders read only the resolved config and the context; they never touch
/// the filesystem or the network, and the same inputs always produce an
/// identical definition.
pub trait Builder {
    type Definition;

    /// Kind of resolved configuration this builder accepts.
    fn kind(&self) -> ResourceKind;

    /// Check every domain rule, recording failures in `collector`.
    ///
    /// Returns `None` only after at least one failure was recorded.
    fn build_into(
        &self,
        config: &ResolvedConfig,
        ctx: &BuildContext,
        collector: &mut Collector,
    ) -> Option<Self::Definition>;

    /// Build one definition; all-or-nothing.
    fn build(
        &self,
        config: &ResolvedConfig,
        ctx: &BuildContext,
        mode: ValidationMode,
    ) -> Result<Self::Definition, ErrorReport> {
        let mut collector = Collector::new(mode);
        let built = match collector.check(expect_kind(config, self.kind())) {
            Some(()) => self.build_into(config, ctx, &mut collector),
            None => None,
        };
        collector.finish_built(built)
    }
}

/// Reject a resolved config of the wrong kind.
pub(crate) fn expect_kind(
    config: &ResolvedConfig,
    expected: ResourceKind,
) -> Result<(), ConfigError> {
    if config.kind() == expected {
        return Ok(());
    }
    Err(ConfigError::InvalidValue {
        context: config.context(),
        path: "kind".to_string(),
        message: format!("must be a {expected} config (got {})", config.kind()),
    })
}
