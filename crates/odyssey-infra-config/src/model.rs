//! Configuration data model: fragments, layered and resolved configs.

use crate::ConfigError;
use crate::validate::{self, ValueKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

/// Caller-supplied placeholder variables (name -> value).
pub type Variables = BTreeMap<String, String>;

/// Kind of infrastructure resource a config folder describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    #[serde(rename = "table")]
    Table,
    #[serde(rename = "function")]
    Function,
    #[serde(rename = "policy")]
    Policy,
    #[serde(rename = "websocket_api")]
    WebSocketApi,
    #[serde(rename = "websocket_route")]
    WebSocketRoute,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Table,
        ResourceKind::Function,
        ResourceKind::Policy,
        ResourceKind::WebSocketApi,
        ResourceKind::WebSocketRoute,
    ];

    /// Label used in error context.
    pub fn label(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Function => "function",
            Self::Policy => "policy",
            Self::WebSocketApi => "websocket api",
            Self::WebSocketRoute => "websocket route",
        }
    }

    /// Fields that must be set explicitly by some fragment (or the defaults layer).
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            Self::Table => &[
                "table_name",
                "partition_key",
                "billing_mode",
                "pitr",
                "kms_alias",
            ],
            Self::Function => &["name", "runtime", "handler", "memory", "timeout"],
            Self::Policy => &["inline"],
            Self::WebSocketApi => &["name", "route_selection_expression", "stage"],
            Self::WebSocketRoute => &["route_key", "integration"],
        }
    }

    /// File name globs selecting fragments inside a resource folder.
    ///
    /// Function folders also hold source code, so only `config*` files count.
    pub fn fragment_patterns(self) -> &'static [&'static str] {
        match self {
            Self::Function => &["config*.json", "config*.json5"],
            _ => &["*.json", "*.json5"],
        }
    }

    /// Stem of the file holding this kind's defaults inside a defaults folder.
    pub fn defaults_stem(self) -> &'static str {
        match self {
            Self::Table => "tables",
            Self::Function => "functions",
            Self::Policy => "policies",
            Self::WebSocketApi => "ws_apis",
            Self::WebSocketRoute => "ws_routes",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One configuration file contributing top-level keys to a resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFragment {
    path: PathBuf,
    name: String,
    values: Map<String, Value>,
}

impl ConfigFragment {
    /// Build an in-memory fragment; `name` is its ordering key.
    pub fn new(name: impl Into<String>, values: Map<String, Value>) -> Self {
        let name = name.into();
        Self {
            path: PathBuf::from(&name),
            name,
            values,
        }
    }

    /// Build a fragment from a parsed document whose root must be an object.
    pub fn from_value(path: impl AsRef<Path>, value: Value) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        match value {
            Value::Object(values) => Ok(Self {
                path: path.to_path_buf(),
                name,
                values,
            }),
            other => Err(validate::type_mismatch(
                &other,
                ValueKind::Object,
                "",
                &format!("fragment {}", path.display()),
            )),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ordering key (the file name).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }
}

/// Explicit per-kind defaults, merged beneath every fragment of that kind.
///
/// Defaults are configuration like any other layer: nothing is filled in
/// unless a caller supplies it here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Defaults {
    by_kind: BTreeMap<ResourceKind, Map<String, Value>>,
}

impl Defaults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the defaults layer for a resource kind.
    pub fn with(mut self, kind: ResourceKind, values: Map<String, Value>) -> Self {
        self.by_kind.insert(kind, values);
        self
    }

    pub fn for_kind(&self, kind: ResourceKind) -> Option<&Map<String, Value>> {
        self.by_kind.get(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }
}

/// Fragments of one resource merged with shallow, top-level override.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayeredConfig {
    values: Map<String, Value>,
    origins: BTreeMap<String, PathBuf>,
    fragments: Vec<PathBuf>,
}

impl LayeredConfig {
    pub(crate) fn new(
        values: Map<String, Value>,
        origins: BTreeMap<String, PathBuf>,
        fragments: Vec<PathBuf>,
    ) -> Self {
        Self {
            values,
            origins,
            fragments,
        }
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Fragment that supplied the final value of `key`.
    pub fn origin(&self, key: &str) -> Option<&Path> {
        self.origins.get(key).map(PathBuf::as_path)
    }

    /// Fragments merged, in merge order.
    pub fn fragments(&self) -> &[PathBuf] {
        &self.fragments
    }

    pub(crate) fn into_parts(self) -> (Map<String, Value>, BTreeMap<String, PathBuf>) {
        (self.values, self.origins)
    }
}

/// Fully merged, placeholder-free, validated configuration for one resource.
///
/// Only the config manager constructs this type, so holding one proves the
/// required fields of its kind are present.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    kind: ResourceKind,
    name: String,
    folder: PathBuf,
    values: Map<String, Value>,
    origins: BTreeMap<String, PathBuf>,
    source_files: BTreeSet<String>,
}

impl ResolvedConfig {
    pub(crate) fn new(
        kind: ResourceKind,
        name: String,
        folder: PathBuf,
        values: Map<String, Value>,
        origins: BTreeMap<String, PathBuf>,
        source_files: BTreeSet<String>,
    ) -> Self {
        Self {
            kind,
            name,
            folder,
            values,
            origins,
            source_files,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Resource name (folder name, or file stem for single-file resources).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Fragment that supplied `key`, if it did not come from defaults.
    pub fn origin(&self, key: &str) -> Option<&Path> {
        self.origins.get(key).map(PathBuf::as_path)
    }

    /// Files under the resource folder, relative and `/`-separated.
    pub fn source_files(&self) -> &BTreeSet<String> {
        &self.source_files
    }

    pub fn has_source_file(&self, relative: &str) -> bool {
        self.source_files.contains(relative)
    }

    /// Resource context used in error messages.
    pub fn context(&self) -> String {
        resource_context(self.kind, &self.name, &self.folder)
    }

    /// Context for a single field, naming the fragment that defined it.
    pub fn field_context(&self, key: &str) -> String {
        match self.origin(key) {
            Some(origin) => format!("{} '{}' ({})", self.kind, self.name, origin.display()),
            None => self.context(),
        }
    }

    /// Fetch a field that the resource kind requires.
    pub fn require(&self, key: &str) -> Result<&Value, ConfigError> {
        self.values
            .get(key)
            .ok_or_else(|| ConfigError::MissingField {
                context: self.context(),
                fields: vec![key.to_string()],
            })
    }

    pub fn require_str(&self, key: &str) -> Result<&str, ConfigError> {
        validate::expect_str(self.require(key)?, key, &self.field_context(key))
    }

    pub fn require_non_empty_str(&self, key: &str) -> Result<&str, ConfigError> {
        validate::expect_non_empty_str(self.require(key)?, key, &self.field_context(key))
    }

    pub fn require_bool(&self, key: &str) -> Result<bool, ConfigError> {
        validate::expect_bool(self.require(key)?, key, &self.field_context(key))
    }

    pub fn require_u64(&self, key: &str) -> Result<u64, ConfigError> {
        validate::expect_u64(self.require(key)?, key, &self.field_context(key))
    }

    pub fn require_object(&self, key: &str) -> Result<&Map<String, Value>, ConfigError> {
        validate::expect_object(self.require(key)?, key, &self.field_context(key))
    }

    /// Fetch an optional field; an explicit `null` counts as absent.
    pub fn optional(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|value| !value.is_null())
    }

    pub fn optional_str(&self, key: &str) -> Result<Option<&str>, ConfigError> {
        self.optional(key)
            .map(|value| validate::expect_str(value, key, &self.field_context(key)))
            .transpose()
    }

    pub fn optional_u64(&self, key: &str) -> Result<Option<u64>, ConfigError> {
        self.optional(key)
            .map(|value| validate::expect_u64(value, key, &self.field_context(key)))
            .transpose()
    }

    pub fn optional_object(&self, key: &str) -> Result<Option<&Map<String, Value>>, ConfigError> {
        self.optional(key)
            .map(|value| validate::expect_object(value, key, &self.field_context(key)))
            .transpose()
    }

    pub fn optional_array(&self, key: &str) -> Result<Option<&Vec<Value>>, ConfigError> {
        self.optional(key)
            .map(|value| validate::expect_array(value, key, &self.field_context(key)))
            .transpose()
    }

    /// Optional `{string: string}` map such as tags.
    pub fn optional_string_map(&self, key: &str) -> Result<BTreeMap<String, String>, ConfigError> {
        let Some(map) = self.optional_object(key)? else {
            return Ok(BTreeMap::new());
        };
        let context = self.field_context(key);
        map.iter()
            .map(|(name, value)| {
                validate::expect_str(value, &validate::join_path(key, name), &context)
                    .map(|text| (name.clone(), text.to_string()))
            })
            .collect()
    }
}

/// Context label for a resource: kind, name and location.
pub fn resource_context(kind: ResourceKind, name: &str, location: &Path) -> String {
    format!("{kind} '{name}' ({})", location.display())
}
