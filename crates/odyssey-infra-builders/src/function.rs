//! Function definitions built from `lambda_src/<function>` folders.

use crate::{BuildContext, Builder, parse_choice};
use log::debug;
use odyssey_infra_config::validate::{self, Collector, ValueKind, index_path, join_path};
use odyssey_infra_config::{ConfigError, ResolvedConfig, ResourceKind};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

const MEMORY_MB: (u64, u64) = (128, 10_240);
const TIMEOUT_SECONDS: (u64, u64) = (1, 900);
const GRANT_FIELDS: &[&str] = &["table", "access"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Runtime {
    #[serde(rename = "python3.12")]
    Python312,
    #[serde(rename = "python3.11")]
    Python311,
    #[serde(rename = "python3.10")]
    Python310,
    #[serde(rename = "nodejs18.x")]
    Nodejs18,
    #[serde(rename = "nodejs20.x")]
    Nodejs20,
}

const RUNTIMES: &[(&str, Runtime)] = &[
    ("python3.12", Runtime::Python312),
    ("python3.11", Runtime::Python311),
    ("python3.10", Runtime::Python310),
    ("nodejs18.x", Runtime::Nodejs18),
    ("nodejs20.x", Runtime::Nodejs20),
];

impl Runtime {
    pub fn is_python(self) -> bool {
        matches!(self, Self::Python312 | Self::Python311 | Self::Python310)
    }

    /// Source files a handler module may live in, relative to the folder.
    fn module_files(self, module: &str) -> Vec<String> {
        if self.is_python() {
            vec![format!("{}.py", module.replace('.', "/"))]
        } else {
            ["js", "mjs", "cjs"]
                .iter()
                .map(|ext| format!("{module}.{ext}"))
                .collect()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TableAccess {
    Read,
    Write,
    ReadWrite,
}

const ACCESS_LEVELS: &[(&str, TableAccess)] = &[
    ("read", TableAccess::Read),
    ("write", TableAccess::Write),
    ("readwrite", TableAccess::ReadWrite),
];

/// Data-plane access to one built table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableGrant {
    pub table: String,
    pub access: TableAccess,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionDefinition {
    /// The config's `name`; what routes and policies reference.
    pub logical_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    pub runtime: Runtime,
    pub handler: String,
    /// Folder packaged as the function code.
    pub code_path: String,
    pub memory_mb: u64,
    pub timeout_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    pub table_grants: Vec<TableGrant>,
}

/// Builds [`FunctionDefinition`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct FunctionBuilder;

impl Builder for FunctionBuilder {
    type Definition = FunctionDefinition;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Function
    }

    fn build_into(
        &self,
        config: &ResolvedConfig,
        ctx: &BuildContext,
        collector: &mut Collector,
    ) -> Option<FunctionDefinition> {
        debug!("building function (folder={})", config.folder().display());
        let logical_name = collector.check(config.require_non_empty_str("name"));
        let function_name = collector.check(optional_non_empty(config, "function_name"));
        let runtime = collector.check(config.require("runtime").and_then(|value| {
            parse_choice(value, RUNTIMES, "runtime", &config.field_context("runtime"))
        }));
        let handler = collector.check(config.require_non_empty_str("handler"));
        if let (Some(runtime), Some(handler)) = (runtime, handler) {
            collector.check(check_handler(config, runtime, handler));
        }
        let memory_mb = collector.check(require_in_range(config, "memory", MEMORY_MB));
        let timeout_seconds = collector.check(require_in_range(config, "timeout", TIMEOUT_SECONDS));
        let description = collector.check(optional_non_empty(config, "description"));
        let environment = collector.check(parse_environment(config));
        let tags = collector.check(config.optional_string_map("tags"));
        let policy = collector.check(parse_policy(config, ctx));
        let table_grants = parse_grants(config, ctx, collector);

        Some(FunctionDefinition {
            logical_name: logical_name?.to_string(),
            function_name: function_name?,
            runtime: runtime?,
            handler: handler?.to_string(),
            code_path: config.folder().display().to_string(),
            memory_mb: memory_mb?,
            timeout_seconds: timeout_seconds?,
            description: description?,
            environment: environment?,
            tags: tags?,
            policy: policy?,
            table_grants: table_grants?,
        })
    }
}

fn optional_non_empty(config: &ResolvedConfig, key: &str) -> Result<Option<String>, ConfigError> {
    config
        .optional(key)
        .map(|value| {
            validate::expect_non_empty_str(value, key, &config.field_context(key))
                .map(str::to_string)
        })
        .transpose()
}

fn require_in_range(
    config: &ResolvedConfig,
    key: &str,
    (min, max): (u64, u64),
) -> Result<u64, ConfigError> {
    validate::expect_u64_in_range(config.require(key)?, min, max, key, &config.field_context(key))
}

/// `module.function`, where the module file must ship in the function folder.
fn check_handler(
    config: &ResolvedConfig,
    runtime: Runtime,
    handler: &str,
) -> Result<(), ConfigError> {
    let invalid = |message: String| ConfigError::InvalidHandler {
        context: config.field_context("handler"),
        handler: handler.to_string(),
        message,
    };
    let Some((module, function)) = handler.rsplit_once('.') else {
        return Err(invalid("must have the form 'module.function'".to_string()));
    };
    if module.is_empty() || function.is_empty() {
        return Err(invalid("must have the form 'module.function'".to_string()));
    }
    let candidates = runtime.module_files(module);
    if candidates.iter().any(|file| config.has_source_file(file)) {
        return Ok(());
    }
    Err(invalid(format!(
        "module file not found in {} (looked for {})",
        config.folder().display(),
        candidates.join(", ")
    )))
}

/// Environment values are passed as text; only scalars convert.
fn parse_environment(config: &ResolvedConfig) -> Result<BTreeMap<String, String>, ConfigError> {
    let Some(map) = config.optional_object("env")? else {
        return Ok(BTreeMap::new());
    };
    let context = config.field_context("env");
    map.iter()
        .map(|(name, value)| {
            let text = match value {
                Value::String(text) => text.clone(),
                Value::Number(number) => number.to_string(),
                Value::Bool(flag) => flag.to_string(),
                other => {
                    return Err(validate::type_mismatch(
                        other,
                        ValueKind::String,
                        &join_path("env", name),
                        &context,
                    ));
                }
            };
            Ok((name.clone(), text))
        })
        .collect()
}

fn parse_policy(
    config: &ResolvedConfig,
    ctx: &BuildContext,
) -> Result<Option<String>, ConfigError> {
    let Some(policy) = optional_non_empty(config, "policy")? else {
        return Ok(None);
    };
    if !ctx.has_policy(&policy) {
        return Err(unknown_reference(config, "policy", "policy", &policy));
    }
    Ok(Some(policy))
}

fn parse_grants(
    config: &ResolvedConfig,
    ctx: &BuildContext,
    collector: &mut Collector,
) -> Option<Vec<TableGrant>> {
    let Some(items) = collector.check(config.optional_array("dynamodb_access"))? else {
        return Some(Vec::new());
    };
    let context = config.field_context("dynamodb_access");
    let mut grants = Vec::with_capacity(items.len());
    let mut complete = true;
    for (idx, item) in items.iter().enumerate() {
        let path = index_path("dynamodb_access", idx);
        match collector.check(parse_grant(item, &path, &context)) {
            Some(grant) if !ctx.has_table(&grant.table) => {
                collector.check::<()>(Err(unknown_reference(
                    config,
                    &join_path(&path, "table"),
                    "table",
                    &grant.table,
                )));
                complete = false;
            }
            Some(grant) => grants.push(grant),
            None => complete = false,
        }
    }
    complete.then_some(grants)
}

fn parse_grant(value: &Value, path: &str, context: &str) -> Result<TableGrant, ConfigError> {
    let map = validate::expect_object(value, path, context)?;
    validate::validate_required_fields_at(map, GRANT_FIELDS, path, context)?;
    validate::ensure_allowed_keys(map, GRANT_FIELDS, path, context)?;
    let table = validate::expect_non_empty_str(
        validate::require_field(map, "table", path, context)?,
        &join_path(path, "table"),
        context,
    )?;
    let access = parse_choice(
        validate::require_field(map, "access", path, context)?,
        ACCESS_LEVELS,
        &join_path(path, "access"),
        context,
    )?;
    Ok(TableGrant {
        table: table.to_string(),
        access,
    })
}

fn unknown_reference(config: &ResolvedConfig, path: &str, target: &str, name: &str) -> ConfigError {
    ConfigError::UnknownReference {
        context: config.context(),
        path: path.to_string(),
        target: target.to_string(),
        name: name.to_string(),
    }
}
