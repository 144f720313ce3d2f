//! Config manager for per-resource configuration folders.
//!
//! Discovers the fragments of a resource folder, merges them over the
//! explicit defaults layer, expands `${name}` placeholders against the merged
//! mapping and caller variables, checks required fields, and produces a
//! `ResolvedConfig`.

mod discover;
mod merge;
mod placeholder;


pub use discover::load_defaults;
pub(crate) use discover::fragment_matcher;

use crate::model::resource_context;
use crate::validate::{self, Collector, ValidationMode};
use crate::{
    ConfigError, ConfigFragment, Defaults, ErrorReport, LayeredConfig, ResolvedConfig,
    ResourceKind, Variables,
};
use log::{debug, info};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Inputs fixed for the lifetime of a [`ConfigManager`].
#[derive(Debug, Clone, Default)]
pub struct ConfigManagerOptions {
    /// Per-kind defaults merged beneath every fragment.
    pub defaults: Defaults,
    /// Base placeholder variables; per-call extras override them.
    pub variables: Variables,
}

impl ConfigManagerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(mut self, defaults: Defaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Add a base variable.
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables.extend(variables);
        self
    }
}

/// How a resource's configuration is stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLayout {
    /// A folder of fragments named after the resource.
    Folder,
    /// A single file named after the resource (e.g. a streaming API route).
    File,
}

/// One resource to resolve as part of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSource {
    pub kind: ResourceKind,
    pub path: PathBuf,
    pub layout: SourceLayout,
}

impl ResourceSource {
    pub fn folder(kind: ResourceKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            layout: SourceLayout::Folder,
        }
    }

    pub fn file(kind: ResourceKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            layout: SourceLayout::File,
        }
    }

    /// Resource name: folder name, or file stem for single-file resources.
    pub fn name(&self) -> String {
        resource_name(&self.path, self.layout)
    }
}

/// Resolves resource configuration from disk or memory.
///
/// Resolution is a pure function of (fragments, variables, defaults): the
/// manager holds no state that changes between calls.
#[derive(Debug, Clone, Default)]
pub struct ConfigManager {
    defaults: Defaults,
    variables: Variables,
}

impl ConfigManager {
    pub fn new(options: ConfigManagerOptions) -> Self {
        Self {
            defaults: options.defaults,
            variables: options.variables,
        }
    }

    pub fn defaults(&self) -> &Defaults {
        &self.defaults
    }

    /// Base variables supplied at construction.
    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    /// Discover and parse the fragments of a resource folder, in merge order.
    pub fn discover(
        &self,
        kind: ResourceKind,
        folder: impl AsRef<Path>,
    ) -> Result<Vec<ConfigFragment>, ConfigError> {
        discover::discover_fragments(kind, folder.as_ref())
    }

    /// Merge fragments over this kind's defaults layer.
    pub fn merge(&self, kind: ResourceKind, fragments: &[ConfigFragment]) -> LayeredConfig {
        merge::merge_fragments(self.defaults.for_kind(kind), fragments)
    }

    /// Resolve a resource folder, stopping at the first failure.
    pub fn resolve(
        &self,
        kind: ResourceKind,
        folder: impl AsRef<Path>,
        extra: &Variables,
    ) -> Result<ResolvedConfig, ConfigError> {
        let folder = folder.as_ref();
        info!("resolving {kind} config (folder={})", folder.display());
        let fragments = self.discover(kind, folder)?;
        let mut collector = Collector::new(ValidationMode::FailFast);
        let resolved = self.resolve_loaded(
            kind,
            resource_name(folder, SourceLayout::Folder),
            folder,
            &fragments,
            source_listing(kind, folder),
            extra,
            &mut collector,
        );
        collector.finish_first(resolved)
    }

    /// Resolve a resource folder, collecting every failure it has.
    pub fn resolve_collecting(
        &self,
        kind: ResourceKind,
        folder: impl AsRef<Path>,
        extra: &Variables,
    ) -> Result<ResolvedConfig, ErrorReport> {
        let folder = folder.as_ref();
        info!(
            "resolving {kind} config, collecting errors (folder={})",
            folder.display()
        );
        let fragments = self.discover(kind, folder)?;
        let mut collector = Collector::new(ValidationMode::Aggregate);
        let resolved = self.resolve_loaded(
            kind,
            resource_name(folder, SourceLayout::Folder),
            folder,
            &fragments,
            source_listing(kind, folder),
            extra,
            &mut collector,
        );
        collector.finish(resolved)
    }

    /// Resolve a resource stored as one file, such as a streaming API route.
    pub fn resolve_file(
        &self,
        kind: ResourceKind,
        path: impl AsRef<Path>,
        extra: &Variables,
        mode: ValidationMode,
    ) -> Result<ResolvedConfig, ErrorReport> {
        let source = ResourceSource::file(kind, path.as_ref());
        let mut collector = Collector::new(mode);
        let resolved = self.resolve_source(&source, extra, &mut collector);
        collector.finish_built(resolved)
    }

    /// Resolve fragments that are already in memory.
    ///
    /// `location` only labels errors; nothing is read from disk.
    pub fn resolve_fragments(
        &self,
        kind: ResourceKind,
        name: &str,
        location: impl AsRef<Path>,
        fragments: &[ConfigFragment],
        extra: &Variables,
        mode: ValidationMode,
    ) -> Result<ResolvedConfig, ErrorReport> {
        self.resolve_fragments_with_sources(kind, name, location, fragments, &[], extra, mode)
    }

    /// Like [`resolve_fragments`](Self::resolve_fragments), with the listing
    /// of source files a function folder would ship.
    #[allow(clippy::too_many_arguments)]
    pub fn resolve_fragments_with_sources(
        &self,
        kind: ResourceKind,
        name: &str,
        location: impl AsRef<Path>,
        fragments: &[ConfigFragment],
        source_files: &[&str],
        extra: &Variables,
        mode: ValidationMode,
    ) -> Result<ResolvedConfig, ErrorReport> {
        let location = location.as_ref();
        if fragments.is_empty() {
            return Err(ConfigError::NoFragments {
                folder: location.to_path_buf(),
                pattern: kind.fragment_patterns().join(" | "),
            }
            .into());
        }
        let mut collector = Collector::new(mode);
        let resolved = self.resolve_loaded(
            kind,
            name.to_string(),
            location,
            fragments,
            source_files.iter().map(|file| file.to_string()).collect(),
            extra,
            &mut collector,
        );
        collector.finish(resolved)
    }

    /// Resolve many resources.
    ///
    /// In aggregate mode every resource is attempted and every failure is
    /// returned together; in fail-fast mode the first failure ends the batch.
    pub fn resolve_batch(
        &self,
        sources: &[ResourceSource],
        extra: &Variables,
        mode: ValidationMode,
    ) -> Result<Vec<ResolvedConfig>, ErrorReport> {
        info!(
            "resolving config batch (resources={}, mode={:?})",
            sources.len(),
            mode
        );
        let mut resolved = Vec::with_capacity(sources.len());
        let mut reports = Vec::new();
        for source in sources {
            let mut collector = Collector::new(mode);
            let config = self.resolve_source(source, extra, &mut collector);
            match collector.finish_built(config) {
                Ok(config) => resolved.push(config),
                Err(report) => {
                    reports.push(report);
                    if mode == ValidationMode::FailFast {
                        break;
                    }
                }
            }
        }
        validate::aggregate(reports).into_result(resolved)
    }

    fn resolve_source(
        &self,
        source: &ResourceSource,
        extra: &Variables,
        collector: &mut Collector,
    ) -> Option<ResolvedConfig> {
        let kind = source.kind;
        let path = source.path.as_path();
        debug!(
            "resolving {kind} config (path={}, layout={:?})",
            path.display(),
            source.layout
        );
        let (fragments, source_files) = match source.layout {
            SourceLayout::Folder => (
                collector.check(self.discover(kind, path))?,
                source_listing(kind, path),
            ),
            SourceLayout::File => (
                vec![collector.check(ConfigFragment::load(path))?],
                BTreeSet::new(),
            ),
        };
        Some(self.resolve_loaded(
            kind,
            source.name(),
            path,
            &fragments,
            source_files,
            extra,
            collector,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_loaded(
        &self,
        kind: ResourceKind,
        name: String,
        location: &Path,
        fragments: &[ConfigFragment],
        source_files: BTreeSet<String>,
        extra: &Variables,
        collector: &mut Collector,
    ) -> ResolvedConfig {
        let context = resource_context(kind, &name, location);
        let layered = self.merge(kind, fragments);
        debug!(
            "merged {context} (fragments={}, keys={})",
            layered.fragments().len(),
            layered.values().len()
        );
        let (values, origins) = layered.into_parts();

        let variables = self.variables_with(extra);
        let expanded = placeholder::expand_placeholders(&values, &variables, &context, collector);
        if !collector.should_stop() {
            collector.check(validate::validate_required_fields(
                &expanded,
                kind.required_fields(),
                &context,
            ));
        }

        ResolvedConfig::new(
            kind,
            name,
            location.to_path_buf(),
            expanded,
            origins,
            source_files,
        )
    }

    fn variables_with(&self, extra: &Variables) -> Variables {
        let mut variables = self.variables.clone();
        variables.extend(extra.iter().map(|(name, value)| (name.clone(), value.clone())));
        variables
    }
}

/// Whether a mapping still holds any placeholder token in its strings.
pub fn has_placeholders(values: &Map<String, Value>) -> bool {
    fn scan(value: &Value) -> bool {
        match value {
            Value::String(text) => placeholder::contains_placeholder(text),
            Value::Array(items) => items.iter().any(scan),
            Value::Object(map) => map.values().any(scan),
            _ => false,
        }
    }
    values.values().any(scan)
}

/// Whether `folder` holds at least one fragment of `kind`.
pub(crate) fn has_fragments(kind: ResourceKind, folder: &Path) -> Result<bool, ConfigError> {
    match discover::fragment_paths(kind, folder) {
        Ok(_) => Ok(true),
        Err(ConfigError::NoFragments { .. }) => Ok(false),
        Err(err) => Err(err),
    }
}

fn resource_name(path: &Path, layout: SourceLayout) -> String {
    let name = match layout {
        SourceLayout::Folder => path.file_name(),
        SourceLayout::File => path.file_stem(),
    };
    name.map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Function folders also hold their source code; other kinds have none.
fn source_listing(kind: ResourceKind, folder: &Path) -> BTreeSet<String> {
    match kind {
        ResourceKind::Function => discover::list_source_files(folder),
        _ => BTreeSet::new(),
    }
}
