use odyssey_infra_config::{
    ConfigFragment, ConfigManager, ErrorReport, ResolvedConfig, ResourceKind, ValidationMode,
    Variables,
};
use serde_json::Value;
use std::path::PathBuf;

/// Resolve one in-memory fragment, panicking if resolution fails.
pub fn resolved(kind: ResourceKind, name: &str, value: Value) -> ResolvedConfig {
    resolved_with_sources(kind, name, value, &[])
}

/// Like [`resolved`], with a source listing for handler checks.
pub fn resolved_with_sources(
    kind: ResourceKind,
    name: &str,
    value: Value,
    sources: &[&str],
) -> ResolvedConfig {
    match resolve(kind, name, value, sources) {
        Ok(config) => config,
        Err(report) => panic!("fixture config for {kind} '{name}' did not resolve: {report}"),
    }
}

/// Resolve one in-memory fragment named `<name>.json`, collecting every error.
pub fn try_resolve(
    kind: ResourceKind,
    name: &str,
    value: Value,
) -> Result<ResolvedConfig, ErrorReport> {
    resolve(kind, name, value, &[])
}

fn resolve(
    kind: ResourceKind,
    name: &str,
    value: Value,
    sources: &[&str],
) -> Result<ResolvedConfig, ErrorReport> {
    let Value::Object(values) = value else {
        panic!("fixture config for {kind} '{name}' must be a JSON object");
    };
    let fragment = ConfigFragment::new(format!("{name}.json"), values);
    ConfigManager::default().resolve_fragments_with_sources(
        kind,
        name,
        PathBuf::from(name),
        &[fragment],
        sources,
        &Variables::new(),
        ValidationMode::Aggregate,
    )
}
