//! Access policy definitions built from `configs/iam/policies/<policy>` folders.
//!
//! A policy folder merges into `{ "managed": [...], "inline": {...} }`.
//! `managed` lists policy ARNs or AWS-managed policy names. `inline` maps a
//! policy name to one statement or a list of statements in the usual
//! `Effect` / `Action` / `Resource` shape.

use crate::{BuildContext, Builder, parse_choice};
use log::debug;
use odyssey_infra_config::validate::{self, Collector, index_path, join_path};
use odyssey_infra_config::{ConfigError, ResolvedConfig, ResourceKind};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const POLICY_KEYS: &[&str] = &["managed", "inline"];
const STATEMENT_KEYS: &[&str] = &[
    "Sid",
    "Effect",
    "Action",
    "Resource",
    "NotResource",
    "Condition",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Effect {
    Allow,
    Deny,
}

const EFFECTS: &[(&str, Effect)] = &[("Allow", Effect::Allow), ("Deny", Effect::Deny)];

/// A managed policy attached by reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagedPolicy {
    Arn(String),
    AwsManaged(String),
}

/// What a statement applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StatementResources {
    Resource(Vec<String>),
    NotResource(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyStatement {
    #[serde(rename = "Sid", skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    #[serde(rename = "Effect")]
    pub effect: Effect,
    #[serde(rename = "Action")]
    pub actions: Vec<String>,
    #[serde(flatten)]
    pub resources: StatementResources,
    #[serde(rename = "Condition", skip_serializing_if = "Option::is_none")]
    pub condition: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyDefinition {
    /// Folder name; what functions reference in their `policy` field.
    pub name: String,
    pub managed: Vec<ManagedPolicy>,
    pub inline: BTreeMap<String, Vec<PolicyStatement>>,
}

impl PolicyDefinition {
    pub fn statement_count(&self) -> usize {
        self.inline.values().map(Vec::len).sum()
    }
}

/// Builds [`PolicyDefinition`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyBuilder;

impl Builder for PolicyBuilder {
    type Definition = PolicyDefinition;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Policy
    }

    fn build_into(
        &self,
        config: &ResolvedConfig,
        _ctx: &BuildContext,
        collector: &mut Collector,
    ) -> Option<PolicyDefinition> {
        debug!("building policy (name={})", config.name());
        let known_keys = collector.check(validate::ensure_allowed_keys(
            config.values(),
            POLICY_KEYS,
            "",
            &config.context(),
        ));
        if collector.should_stop() {
            return None;
        }
        let managed = collector.check(parse_managed(config));
        let inline = parse_inline(config, collector);

        let definition = PolicyDefinition {
            name: config.name().to_string(),
            managed: managed?,
            inline: inline?,
        };
        if definition.statement_count() == 0 {
            collector.check::<()>(Err(invalid_statement(
                "inline",
                "must declare at least one statement",
                &config.field_context("inline"),
            )));
            return None;
        }
        known_keys?;
        Some(definition)
    }
}

fn parse_managed(config: &ResolvedConfig) -> Result<Vec<ManagedPolicy>, ConfigError> {
    let Some(value) = config.optional("managed") else {
        return Ok(Vec::new());
    };
    let context = config.field_context("managed");
    let names = validate::expect_string_list(value, "managed", &context)?;
    names
        .into_iter()
        .enumerate()
        .map(|(idx, name)| {
            let path = index_path("managed", idx);
            if name.trim().is_empty() {
                return Err(validate::invalid_value(&path, "cannot be empty", &context));
            }
            if !name.starts_with("arn:") {
                return Ok(ManagedPolicy::AwsManaged(name));
            }
            if name.split(':').count() < 6 {
                return Err(validate::invalid_value(
                    &path,
                    &format!("is not a valid policy ARN (got '{name}')"),
                    &context,
                ));
            }
            Ok(ManagedPolicy::Arn(name))
        })
        .collect()
}

fn parse_inline(
    config: &ResolvedConfig,
    collector: &mut Collector,
) -> Option<BTreeMap<String, Vec<PolicyStatement>>> {
    let context = config.field_context("inline");
    let policies = collector.check(config.require_object("inline"))?;

    let mut inline = BTreeMap::new();
    let mut complete = true;
    for (name, value) in policies {
        let path = join_path("inline", name);
        if name.trim().is_empty() {
            let empty = validate::invalid_value(&path, "policy name cannot be empty", &context);
            collector.check::<()>(Err(empty));
            complete = false;
            continue;
        }
        match parse_statements(value, &path, &context, collector) {
            Some(statements) => {
                inline.insert(name.clone(), statements);
            }
            None => complete = false,
        }
        if collector.should_stop() {
            return None;
        }
    }
    complete.then_some(inline)
}

/// One statement or a non-empty list of them.
fn parse_statements(
    value: &Value,
    path: &str,
    context: &str,
    collector: &mut Collector,
) -> Option<Vec<PolicyStatement>> {
    let items = match value {
        Value::Array(items) if items.is_empty() => {
            let empty = invalid_statement(path, "must list at least one statement", context);
            collector.check::<()>(Err(empty));
            return None;
        }
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(idx, item)| (index_path(path, idx), item))
            .collect::<Vec<_>>(),
        single => vec![(path.to_string(), single)],
    };

    let mut statements = Vec::with_capacity(items.len());
    let mut complete = true;
    for (item_path, item) in items {
        match collector.check(parse_statement(item, &item_path, context)) {
            Some(statement) => statements.push(statement),
            None => complete = false,
        }
    }
    complete.then_some(statements)
}

fn parse_statement(
    value: &Value,
    path: &str,
    context: &str,
) -> Result<PolicyStatement, ConfigError> {
    let map = validate::expect_object(value, path, context)?;
    validate::validate_required_fields_at(map, &["Effect", "Action"], path, context)?;
    validate::ensure_allowed_keys(map, STATEMENT_KEYS, path, context)?;

    let sid = match map.get("Sid") {
        None => None,
        Some(value) => {
            let sid = validate::expect_non_empty_str(value, &join_path(path, "Sid"), context)?;
            Some(sid.to_string())
        }
    };
    let effect = parse_choice(
        validate::require_field(map, "Effect", path, context)?,
        EFFECTS,
        &join_path(path, "Effect"),
        context,
    )?;

    let action_path = join_path(path, "Action");
    let actions = validate::expect_one_or_many_str(
        validate::require_field(map, "Action", path, context)?,
        &action_path,
        context,
    )?;
    if actions.is_empty() {
        return Err(invalid_statement(&action_path, "must name at least one action", context));
    }
    for (idx, action) in actions.iter().enumerate() {
        if !is_action(action) {
            return Err(invalid_statement(
                &index_path(&action_path, idx),
                &format!("must be '*' or 'service:Action' (got '{action}')"),
                context,
            ));
        }
    }

    let resources = match (map.get("Resource"), map.get("NotResource")) {
        (Some(_), Some(_)) => {
            return Err(invalid_statement(
                path,
                "cannot set both Resource and NotResource",
                context,
            ));
        }
        (Some(value), None) => {
            let resource_path = join_path(path, "Resource");
            StatementResources::Resource(parse_resources(value, &resource_path, context)?)
        }
        (None, Some(value)) => {
            let resource_path = join_path(path, "NotResource");
            StatementResources::NotResource(parse_resources(value, &resource_path, context)?)
        }
        (None, None) => {
            return Err(invalid_statement(path, "must include Resource or NotResource", context));
        }
    };

    let condition = map
        .get("Condition")
        .map(|value| {
            validate::expect_object(value, &join_path(path, "Condition"), context).cloned()
        })
        .transpose()?;

    Ok(PolicyStatement {
        sid,
        effect,
        actions,
        resources,
        condition,
    })
}

fn parse_resources(value: &Value, path: &str, context: &str) -> Result<Vec<String>, ConfigError> {
    let resources = validate::expect_one_or_many_str(value, path, context)?;
    if resources.is_empty() {
        return Err(invalid_statement(path, "must name at least one resource", context));
    }
    if let Some(idx) = resources.iter().position(|resource| resource.trim().is_empty()) {
        return Err(invalid_statement(&index_path(path, idx), "cannot be empty", context));
    }
    Ok(resources)
}

fn is_action(action: &str) -> bool {
    if action == "*" {
        return true;
    }
    match action.split_once(':') {
        Some((service, name)) => {
            !service.is_empty()
                && !name.is_empty()
                && service
                    .chars()
                    .all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
                && !name.contains(':')
        }
        None => false,
    }
}

fn invalid_statement(path: &str, message: &str, context: &str) -> ConfigError {
    ConfigError::InvalidPolicyStatement {
        context: context.to_string(),
        path: path.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odyssey_infra_config::{ErrorReport, ValidationMode};
    use odyssey_infra_test_utils::resolved;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn build(value: Value, mode: ValidationMode) -> Result<PolicyDefinition, ErrorReport> {
        let config = resolved(ResourceKind::Policy, "chat-access", value);
        PolicyBuilder.build(&config, &BuildContext::new("dev"), mode)
    }

    #[test]
    fn builds_managed_and_inline_policies() {
        let policy = build(
            json!({
                "managed": [
                    "AWSLambdaBasicExecutionRole",
                    "arn:aws:iam::123456789012:policy/Audit"
                ],
                "inline": {
                    "ReadOrders": {
                        "Effect": "allow",
                        "Action": "dynamodb:GetItem",
                        "Resource": "arn:aws:dynamodb:eu-west-1:123456789012:table/orders"
                    },
                    "Connections": [
                        {
                            "Sid": "Post",
                            "Effect": "Allow",
                            "Action": ["execute-api:ManageConnections"],
                            "NotResource": ["arn:aws:execute-api:*:*:admin/*"]
                        }
                    ]
                }
            }),
            ValidationMode::FailFast,
        )
        .expect("policy");

        assert_eq!(
            policy.managed,
            vec![
                ManagedPolicy::AwsManaged("AWSLambdaBasicExecutionRole".to_string()),
                ManagedPolicy::Arn("arn:aws:iam::123456789012:policy/Audit".to_string())
            ]
        );
        assert_eq!(policy.statement_count(), 2);
        let read = &policy.inline["ReadOrders"][0];
        assert_eq!(read.effect, Effect::Allow);
        assert_eq!(read.actions, vec!["dynamodb:GetItem".to_string()]);

        let json = serde_json::to_value(&policy.inline["Connections"][0]).expect("json");
        assert_eq!(
            json,
            json!({
                "Sid": "Post",
                "Effect": "Allow",
                "Action": ["execute-api:ManageConnections"],
                "NotResource": ["arn:aws:execute-api:*:*:admin/*"]
            })
        );
    }

    #[test]
    fn statement_needs_a_resource() {
        let report = build(
            json!({ "inline": { "Bad": { "Effect": "Allow", "Action": "s3:GetObject" } } }),
            ValidationMode::FailFast,
        )
        .unwrap_err();
        let error = report.into_first().expect("error");
        assert!(matches!(error, ConfigError::InvalidPolicyStatement { .. }));
        assert_eq!(error.field_path(), Some("inline.Bad"));
    }

    #[test]
    fn malformed_actions_are_rejected() {
        let report = build(
            json!({
                "inline": {
                    "Bad": [{
                        "Effect": "Allow",
                        "Action": ["s3:GetObject", "GetItem"],
                        "Resource": "*"
                    }]
                }
            }),
            ValidationMode::FailFast,
        )
        .unwrap_err();
        assert_eq!(report.errors()[0].field_path(), Some("inline.Bad[0].Action[1]"));
    }

    #[test]
    fn a_policy_without_statements_is_rejected() {
        let report = build(
            json!({ "managed": ["ReadOnlyAccess"], "inline": {} }),
            ValidationMode::FailFast,
        )
        .unwrap_err();
        assert!(report.to_string().contains("at least one statement"));

        let report =
            build(json!({ "inline": { "Empty": [] } }), ValidationMode::FailFast).unwrap_err();
        assert_eq!(report.errors()[0].field_path(), Some("inline.Empty"));
    }

    #[test]
    fn unknown_keys_do_not_hide_other_errors() {
        let value = json!({
            "policy_file": "x.json",
            "managed": ["arn:aws:iam::policy"],
            "inline": { "Ok": { "Effect": "Allow", "Action": "*", "Resource": "*" } }
        });
        let report = build(value.clone(), ValidationMode::Aggregate).unwrap_err();
        assert_eq!(report.len(), 2);
        assert!(matches!(report.errors()[0], ConfigError::UnknownKey { .. }));
        assert_eq!(report.errors()[1].field_path(), Some("managed[0]"));

        let report = build(value, ValidationMode::FailFast).unwrap_err();
        assert_eq!(report.len(), 1);
        assert!(matches!(report.errors()[0], ConfigError::UnknownKey { .. }));

        let report = build(
            json!({
                "policy_file": "x.json",
                "inline": { "Ok": { "Effect": "Allow", "Action": "*", "Resource": "*" } }
            }),
            ValidationMode::Aggregate,
        )
        .unwrap_err();
        assert_eq!(report.len(), 1);
    }

    #[test]
    fn managed_arns_need_six_parts() {
        let report = build(
            json!({
                "managed": [
                    "arn:aws:iam::123456789012",
                    "arn:aws:iam::123456789012:policy/Audit",
                    " "
                ],
                "inline": { "Ok": { "Effect": "Allow", "Action": "*", "Resource": "*" } }
            }),
            ValidationMode::FailFast,
        )
        .unwrap_err();
        match report.into_first() {
            Some(ConfigError::InvalidValue { path, message, .. }) => {
                assert_eq!(path, "managed[0]");
                assert!(message.contains("not a valid policy ARN"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn condition_must_be_an_object() {
        let statement = |condition: Value| {
            json!({
                "inline": {
                    "Scoped": {
                        "Effect": "Allow",
                        "Action": "dynamodb:Query",
                        "Resource": "*",
                        "Condition": condition
                    }
                }
            })
        };
        let report = build(statement(json!("aws:SecureTransport")), ValidationMode::FailFast)
            .unwrap_err();
        assert!(matches!(
            report.into_first(),
            Some(ConfigError::TypeMismatch { ref path, .. }) if path == "inline.Scoped.Condition"
        ));

        let policy = build(
            statement(json!({ "Bool": { "aws:SecureTransport": "true" } })),
            ValidationMode::FailFast,
        )
        .expect("policy");
        assert!(policy.inline["Scoped"][0].condition.is_some());
    }

    #[test]
    fn aggregate_mode_reports_each_bad_statement() {
        let report = build(
            json!({
                "inline": {
                    "A": { "Effect": "Maybe", "Action": "*", "Resource": "*" },
                    "B": { "Effect": "Deny", "Action": "*", "Resource": "*", "NotResource": "*" },
                    "C": { "Effect": "Allow", "Action": "*", "Resource": "*" }
                }
            }),
            ValidationMode::Aggregate,
        )
        .unwrap_err();
        let paths = report
            .errors()
            .iter()
            .filter_map(|error| error.field_path().map(str::to_string))
            .collect::<Vec<_>>();
        assert_eq!(paths, vec!["inline.A.Effect", "inline.B"]);
    }
}
