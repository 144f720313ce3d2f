//! Table definitions built from table configuration folders.

use crate::{BuildContext, Builder, RemovalPolicy, parse_choice};
use log::debug;
use odyssey_infra_config::validate::{self, Collector, index_path, join_path};
use odyssey_infra_config::{ConfigError, ResolvedConfig, ResourceKind};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

const INDEXES: &str = "global_secondary_indexes";
const KEY_FIELDS: &[&str] = &["name", "type"];
const INDEX_FIELDS: &[&str] = &[
    "index_name",
    "partition_key",
    "sort_key",
    "projection",
    "rcu",
    "wcu",
];

/// Key attribute type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttributeType {
    String,
    Number,
    Binary,
}

const ATTRIBUTE_TYPES: &[(&str, AttributeType)] = &[
    ("STRING", AttributeType::String),
    ("NUMBER", AttributeType::Number),
    ("BINARY", AttributeType::Binary),
];

/// Change stream view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamView {
    NewImage,
    OldImage,
    NewAndOldImages,
    KeysOnly,
}

const STREAM_VIEWS: &[(&str, StreamView)] = &[
    ("NEW_IMAGE", StreamView::NewImage),
    ("OLD_IMAGE", StreamView::OldImage),
    ("NEW_AND_OLD_IMAGES", StreamView::NewAndOldImages),
    ("KEYS_ONLY", StreamView::KeysOnly),
];

/// Attributes copied into a secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Projection {
    All,
    KeysOnly,
}

const PROJECTIONS: &[(&str, Projection)] =
    &[("ALL", Projection::All), ("KEYS_ONLY", Projection::KeysOnly)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BillingMode {
    PayPerRequest,
    Provisioned,
}

const BILLING_MODES: &[(&str, BillingMode)] = &[
    ("PAY_PER_REQUEST", BillingMode::PayPerRequest),
    ("PROVISIONED", BillingMode::Provisioned),
];

/// One key attribute of a table or index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyAttribute {
    pub name: String,
    #[serde(rename = "type")]
    pub attribute_type: AttributeType,
}

/// Provisioned read and write capacity units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capacity {
    pub read: u64,
    pub write: u64,
}

/// Billing mode, with capacity when provisioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Billing {
    PayPerRequest,
    Provisioned { capacity: Capacity },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GlobalSecondaryIndex {
    pub index_name: String,
    pub partition_key: KeyAttribute,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<KeyAttribute>,
    pub projection: Projection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<Capacity>,
}

/// A table encrypted with a customer-managed key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDefinition {
    /// Folder name; what function grants reference.
    pub logical_name: String,
    pub table_name: String,
    pub partition_key: KeyAttribute,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<KeyAttribute>,
    pub billing: Billing,
    pub point_in_time_recovery: bool,
    pub kms_key_alias: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_to_live_attribute: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamView>,
    pub global_secondary_indexes: Vec<GlobalSecondaryIndex>,
    pub tags: BTreeMap<String, String>,
    pub removal_policy: RemovalPolicy,
}

/// Builds [`TableDefinition`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableBuilder;

impl Builder for TableBuilder {
    type Definition = TableDefinition;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Table
    }

    fn build_into(
        &self,
        config: &ResolvedConfig,
        ctx: &BuildContext,
        collector: &mut Collector,
    ) -> Option<TableDefinition> {
        debug!("building table (name={})", config.name());
        let table_name = collector.check(config.require_non_empty_str("table_name").and_then(
            |name| check_name(name, "table_name", &config.field_context("table_name")),
        ));

        let partition_key = collector.check(config.require("partition_key").and_then(|value| {
            parse_key(value, "partition_key", &config.field_context("partition_key"))
        }));
        let sort_key = collector.check(
            config
                .optional("sort_key")
                .map(|value| parse_sort_key(value, "sort_key", &config.field_context("sort_key")))
                .transpose()
                .map(Option::flatten),
        );
        if let (Some(partition), Some(Some(sort))) = (&partition_key, &sort_key) {
            collector.check(distinct_keys(partition, sort, "sort_key", &config.context()));
        }

        let billing_context = config.field_context("billing_mode");
        let billing_mode = collector.check(config.require("billing_mode").and_then(|value| {
            parse_choice(value, BILLING_MODES, "billing_mode", &billing_context)
        }));
        let billing = billing_mode.and_then(|mode| collector.check(parse_billing(config, mode)));
        let point_in_time_recovery = collector.check(config.require_bool("pitr"));
        let kms_key_alias = collector.check(parse_kms_alias(config));
        let time_to_live_attribute = collector.check(
            config
                .optional("ttl_attribute")
                .map(|value| {
                    validate::expect_non_empty_str(
                        value,
                        "ttl_attribute",
                        &config.field_context("ttl_attribute"),
                    )
                    .map(str::to_string)
                })
                .transpose(),
        );
        let stream = collector.check(
            config
                .optional("stream")
                .map(|value| {
                    parse_choice(value, STREAM_VIEWS, "stream", &config.field_context("stream"))
                })
                .transpose(),
        );
        let global_secondary_indexes = parse_indexes(config, billing_mode, collector);
        let tags = collector.check(config.optional_string_map("tags"));

        Some(TableDefinition {
            logical_name: config.name().to_string(),
            table_name: table_name?.to_string(),
            partition_key: partition_key?,
            sort_key: sort_key?,
            billing: billing?,
            point_in_time_recovery: point_in_time_recovery?,
            kms_key_alias: kms_key_alias?,
            time_to_live_attribute: time_to_live_attribute?,
            stream: stream?,
            global_secondary_indexes: global_secondary_indexes?,
            tags: tags?,
            removal_policy: ctx.removal_policy(),
        })
    }
}

/// Exactly one key attribute: an object, or a list holding one object.
fn parse_key(value: &Value, path: &str, context: &str) -> Result<KeyAttribute, ConfigError> {
    match value {
        Value::Array(items) if items.len() == 1 => {
            parse_key_object(&items[0], &index_path(path, 0), context)
        }
        Value::Array(items) => Err(key_schema(
            path,
            &format!("must declare exactly one key attribute (got {})", items.len()),
            context,
        )),
        other => parse_key_object(other, path, context),
    }
}

/// At most one key attribute; an empty list declares none.
fn parse_sort_key(
    value: &Value,
    path: &str,
    context: &str,
) -> Result<Option<KeyAttribute>, ConfigError> {
    match value {
        Value::Array(items) if items.is_empty() => Ok(None),
        Value::Array(items) if items.len() > 1 => Err(key_schema(
            path,
            &format!("must declare at most one key attribute (got {})", items.len()),
            context,
        )),
        other => parse_key(other, path, context).map(Some),
    }
}

fn parse_key_object(value: &Value, path: &str, context: &str) -> Result<KeyAttribute, ConfigError> {
    let map = validate::expect_object(value, path, context)?;
    validate::validate_required_fields_at(map, KEY_FIELDS, path, context)?;
    validate::ensure_allowed_keys(map, KEY_FIELDS, path, context)?;
    let name_path = join_path(path, "name");
    let name = validate::expect_non_empty_str(
        validate::require_field(map, "name", path, context)?,
        &name_path,
        context,
    )?;
    let attribute_type = parse_choice(
        validate::require_field(map, "type", path, context)?,
        ATTRIBUTE_TYPES,
        &join_path(path, "type"),
        context,
    )?;
    Ok(KeyAttribute {
        name: name.to_string(),
        attribute_type,
    })
}

fn distinct_keys(
    partition: &KeyAttribute,
    sort: &KeyAttribute,
    sort_path: &str,
    context: &str,
) -> Result<(), ConfigError> {
    if partition.name == sort.name {
        return Err(key_schema(
            &join_path(sort_path, "name"),
            &format!("sort key must differ from the partition key '{}'", partition.name),
            context,
        ));
    }
    Ok(())
}

fn parse_billing(config: &ResolvedConfig, mode: BillingMode) -> Result<Billing, ConfigError> {
    let context = config.field_context("billing_mode");
    match mode {
        BillingMode::PayPerRequest => {
            forbid_capacity(config.values(), "", &context)?;
            Ok(Billing::PayPerRequest)
        }
        BillingMode::Provisioned => Ok(Billing::Provisioned {
            capacity: parse_capacity(config.values(), "", &context)?,
        }),
    }
}

/// Provisioned capacity must be explicit; there is no default.
fn parse_capacity(
    map: &Map<String, Value>,
    path: &str,
    context: &str,
) -> Result<Capacity, ConfigError> {
    validate::validate_required_fields_at(map, &["rcu", "wcu"], path, context)?;
    let units = |key: &str| -> Result<u64, ConfigError> {
        let field_path = join_path(path, key);
        let value = validate::require_field(map, key, path, context)?;
        let units = validate::expect_u64(value, &field_path, context)?;
        if units == 0 {
            return Err(validate::invalid_value(&field_path, "must be at least 1", context));
        }
        Ok(units)
    };
    Ok(Capacity {
        read: units("rcu")?,
        write: units("wcu")?,
    })
}

fn forbid_capacity(map: &Map<String, Value>, path: &str, context: &str) -> Result<(), ConfigError> {
    for key in ["rcu", "wcu"] {
        if map.get(key).is_some_and(|value| !value.is_null()) {
            return Err(validate::invalid_value(
                &join_path(path, key),
                "is only allowed with PROVISIONED billing",
                context,
            ));
        }
    }
    Ok(())
}

fn parse_kms_alias(config: &ResolvedConfig) -> Result<String, ConfigError> {
    let alias = config.require_non_empty_str("kms_alias")?;
    match alias.strip_prefix("alias/") {
        Some(name) if !name.is_empty() && !name.starts_with("aws/") => Ok(alias.to_string()),
        _ => Err(validate::invalid_value(
            "kms_alias",
            &format!("must be a customer key alias of the form 'alias/<name>' (got '{alias}')"),
            &config.field_context("kms_alias"),
        )),
    }
}

fn parse_indexes(
    config: &ResolvedConfig,
    billing_mode: Option<BillingMode>,
    collector: &mut Collector,
) -> Option<Vec<GlobalSecondaryIndex>> {
    let context = config.field_context(INDEXES);
    let Some(items) = collector.check(config.optional_array(INDEXES))? else {
        return Some(Vec::new());
    };

    let mut indexes = Vec::with_capacity(items.len());
    let mut names = BTreeSet::new();
    let mut complete = true;
    for (idx, item) in items.iter().enumerate() {
        let path = index_path(INDEXES, idx);
        let Some(index) = collector.check(parse_index(item, &path, billing_mode, &context)) else {
            complete = false;
            continue;
        };
        if !names.insert(index.index_name.clone()) {
            collector.check::<()>(Err(key_schema(
                &join_path(&path, "index_name"),
                &format!("duplicate index name '{}'", index.index_name),
                &context,
            )));
            complete = false;
        }
        indexes.push(index);
    }
    complete.then_some(indexes)
}

fn parse_index(
    value: &Value,
    path: &str,
    billing_mode: Option<BillingMode>,
    context: &str,
) -> Result<GlobalSecondaryIndex, ConfigError> {
    let map = validate::expect_object(value, path, context)?;
    validate::validate_required_fields_at(
        map,
        &["index_name", "partition_key", "projection"],
        path,
        context,
    )?;
    validate::ensure_allowed_keys(map, INDEX_FIELDS, path, context)?;

    let name_path = join_path(path, "index_name");
    let index_name = validate::expect_non_empty_str(
        validate::require_field(map, "index_name", path, context)?,
        &name_path,
        context,
    )?;
    check_name(index_name, &name_path, context)?;

    let partition_key = parse_key(
        validate::require_field(map, "partition_key", path, context)?,
        &join_path(path, "partition_key"),
        context,
    )?;
    let sort_path = join_path(path, "sort_key");
    let sort_key = match map.get("sort_key") {
        None | Some(Value::Null) => None,
        Some(value) => parse_sort_key(value, &sort_path, context)?,
    };
    if let Some(sort) = &sort_key {
        distinct_keys(&partition_key, sort, &sort_path, context)?;
    }

    let projection = parse_choice(
        validate::require_field(map, "projection", path, context)?,
        PROJECTIONS,
        &join_path(path, "projection"),
        context,
    )?;
    let capacity = match billing_mode {
        Some(BillingMode::Provisioned) => Some(parse_capacity(map, path, context)?),
        Some(BillingMode::PayPerRequest) => {
            forbid_capacity(map, path, context)?;
            None
        }
        // Billing already failed and was reported.
        None => None,
    };

    Ok(GlobalSecondaryIndex {
        index_name: index_name.to_string(),
        partition_key,
        sort_key,
        projection,
        capacity,
    })
}

/// Table and index names: 3-255 characters of `[A-Za-z0-9_.-]`.
fn check_name<'a>(name: &'a str, path: &str, context: &str) -> Result<&'a str, ConfigError> {
    let valid_chars = name
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.'));
    if !(3..=255).contains(&name.len()) || !valid_chars {
        return Err(validate::invalid_value(
            path,
            &format!("must be 3-255 characters of letters, digits, '_', '-' or '.' (got '{name}')"),
            context,
        ));
    }
    Ok(name)
}

fn key_schema(path: &str, message: &str, context: &str) -> ConfigError {
    ConfigError::InvalidKeySchema {
        context: context.to_string(),
        path: path.to_string(),
        message: message.to_string(),
    }
}
