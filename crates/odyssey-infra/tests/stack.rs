//! End-to-end planning over project trees on disk.

use odyssey_infra::config::{ConfigError, ResourceKind, ValidationMode};
use odyssey_infra::{StackError, StackOptions, plan_stack};
use odyssey_infra_test_utils::ProjectFixture;
use pretty_assertions::assert_eq;
use serde_json::json;

fn aggregate() -> StackOptions {
    StackOptions::new().with_mode(ValidationMode::Aggregate)
}

fn report_of(err: StackError) -> Vec<ConfigError> {
    match err {
        StackError::Invalid(report) => report.into_errors(),
        other => panic!("expected a validation report, got {other}"),
    }
}

/// The sample project plans cleanly and serializes to stable JSON.
#[test]
fn chat_project_plans_and_serializes() {
    let fixture = ProjectFixture::chat();
    let plan = plan_stack(fixture.layout(), &StackOptions::new()).expect("plan");
    assert_eq!(plan.environment.region, "eu-west-1");
    assert_eq!(
        plan.environment.resolved_connection_arn().as_deref(),
        Some("arn:aws:codestar-connections:eu-west-1:123456789012:connection/abc-123")
    );

    let first = serde_json::to_value(&plan).expect("json");
    let again = plan_stack(fixture.layout(), &StackOptions::new()).expect("plan");
    assert_eq!(first, serde_json::to_value(&again).expect("json"));
    assert_eq!(first["websocket_apis"][0]["api_name"], json!("chat-dev"));
    assert_eq!(first["functions"][1]["runtime"], json!("nodejs20.x"));
}

/// Aggregate mode reports errors from several resources in one pass.
#[test]
fn aggregate_mode_reports_every_failing_resource() {
    let fixture = ProjectFixture::chat();
    fixture.write_table(
        "events",
        "table.json",
        json!({
            "table_name": "events",
            "billing_mode": "PAY_PER_REQUEST",
            "kms_alias": "alias/events",
        }),
    );
    fixture.write_table(
        "users",
        "table.json",
        json!({ "partition_key": { "name": "id", "type": "STRING" }, "kms_alias": "alias/users" }),
    );

    let errors = report_of(plan_stack(fixture.layout(), &aggregate()).unwrap_err());
    let missing = errors
        .iter()
        .filter_map(|error| match error {
            ConfigError::MissingField { context, fields } => {
                Some((context.clone(), fields.clone()))
            }
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(missing.len(), 2, "{errors:?}");
    assert!(missing[0].0.contains("'events'"));
    assert_eq!(missing[0].1, vec!["partition_key".to_string()]);
    assert!(missing[1].0.contains("'users'"));
    assert_eq!(missing[1].1, vec!["table_name".to_string()]);

    let errors = report_of(plan_stack(fixture.layout(), &StackOptions::new()).unwrap_err());
    assert_eq!(errors.len(), 1);
}

/// A failing table does not cascade into reference errors for its users.
#[test]
fn broken_table_does_not_break_function_grants() {
    let fixture = ProjectFixture::chat();
    fixture.write_table("messages", "zz-broken.json", json!({ "pitr": "yes" }));
    let errors = report_of(plan_stack(fixture.layout(), &aggregate()).unwrap_err());
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert_eq!(errors[0].field_path(), Some("pitr"));
}

/// Placeholder cycles are reported with the chain.
#[test]
fn placeholder_cycles_surface_through_the_stack() {
    let fixture = ProjectFixture::chat();
    fixture.write_table(
        "messages",
        "zz-cycle.json",
        json!({ "table_name": "${prefix}-messages", "prefix": "${table_name}" }),
    );
    let errors = report_of(plan_stack(fixture.layout(), &StackOptions::new()).unwrap_err());
    match &errors[0] {
        ConfigError::CyclicReference { cycle, .. } => {
            assert_eq!(cycle.first(), cycle.last());
            assert!(cycle.contains(&"prefix".to_string()));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

/// References to resources that were never defined are reported.
#[test]
fn unknown_references_are_reported() {
    let fixture = ProjectFixture::chat();
    fixture.write_route(
        "chat",
        "admin/ban.json",
        json!({
            "route_key": "ban",
            "integration": { "type": "lambda", "lambda_name": "moderation" },
        }),
    );
    fixture.write_function(
        "chat",
        "config.zz.json",
        json!({ "dynamodb_access": [{ "table": "audit", "access": "write" }] }),
    );
    let errors = report_of(plan_stack(fixture.layout(), &aggregate()).unwrap_err());
    let targets = errors
        .iter()
        .filter_map(|error| match error {
            ConfigError::UnknownReference { target, name, .. } => Some(format!("{target}:{name}")),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(targets, vec!["table:audit", "function:moderation"]);
}

/// An API folder without routes/ is a missing folder, not an empty API.
#[test]
fn api_without_routes_folder_fails() {
    let fixture = ProjectFixture::chat();
    fixture.write_api(
        "admin",
        "api.json",
        json!({
            "name": "admin",
            "route_selection_expression": "$request.body.action",
            "stage": { "name": "dev", "auto_deploy": false },
        }),
    );
    let errors = report_of(plan_stack(fixture.layout(), &aggregate()).unwrap_err());
    assert!(matches!(errors[0], ConfigError::FolderNotFound { .. }));
}

/// Shared-code folders without config fragments are not functions.
#[test]
fn shared_function_folders_are_skipped() {
    let fixture = ProjectFixture::chat();
    fixture.write_source("shared", "util.py", "");
    let plan = plan_stack(fixture.layout(), &StackOptions::new()).expect("plan");
    assert_eq!(plan.functions.len(), 2);
}

/// Malformed fragments are parse errors naming the file.
#[test]
fn malformed_fragment_is_a_parse_error() {
    let fixture = ProjectFixture::chat();
    let path = fixture.write_raw(ResourceKind::Policy, "chat-access", "zz.json", "{ inline: ");
    let errors = report_of(plan_stack(fixture.layout(), &StackOptions::new()).unwrap_err());
    match &errors[0] {
        ConfigError::ParseFailed { path: failed, .. } => assert_eq!(failed, &path),
        other => panic!("unexpected error: {other:?}"),
    }
}

/// Project settings report every missing key at once.
#[test]
fn incomplete_project_settings_list_every_missing_key() {
    let fixture = ProjectFixture::chat();
    fixture.write_project(json!({ "env": "dev", "github": { "owner": "liquidos-ai" } }));
    let err = plan_stack(fixture.layout(), &StackOptions::new()).unwrap_err();
    match err {
        StackError::Project(ConfigError::MissingField { fields, .. }) => {
            assert_eq!(fields, vec!["region", "dev.account_id", "github.repo"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}
