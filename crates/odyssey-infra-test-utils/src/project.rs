use odyssey_infra_config::{ProjectLayout, ResourceKind};
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const MESSAGES_TABLE_ARN: &str =
    "arn:${Partition}:dynamodb:${Region}:${AccountId}:table/messages-${EnvName}";

/// A project tree in a temporary directory.
pub struct ProjectFixture {
    _temp: TempDir,
    layout: ProjectLayout,
}

impl ProjectFixture {
    /// An empty project.
    pub fn new() -> Self {
        let temp = TempDir::new().expect("create temp project");
        let layout = ProjectLayout::new(temp.path());
        Self {
            _temp: temp,
            layout,
        }
    }

    /// A complete chat backend: one table, one policy, two functions and
    /// one streaming API with two routes.
    pub fn chat() -> Self {
        let fixture = Self::new();
        fixture.write_project(json!({
            "env": "dev",
            "region": "eu-west-1",
            "dev": { "account_id": "123456789012", "branch": "dev", "connection_id": "abc-123" },
            "github": { "owner": "liquidos-ai", "repo": "odyssey" },
        }));
        fixture.write_defaults(
            ResourceKind::Table,
            json!({ "billing_mode": "PAY_PER_REQUEST", "pitr": true }),
        );
        fixture.write_table(
            "messages",
            "table.json",
            json!({
                "table_name": "messages-${EnvName}",
                "partition_key": { "name": "conversation_id", "type": "STRING" },
                "sort_key": { "name": "sent_at", "type": "NUMBER" },
                "kms_alias": "alias/messages-${EnvName}",
            }),
        );
        fixture.write_policy(
            "chat-access",
            "policy.json",
            json!({
                "managed": ["service-role/AWSLambdaBasicExecutionRole"],
                "inline": {
                    "Messages": {
                        "Effect": "Allow",
                        "Action": ["dynamodb:PutItem", "dynamodb:Query"],
                        "Resource": MESSAGES_TABLE_ARN,
                    }
                }
            }),
        );
        fixture.write_function(
            "chat",
            "config.json",
            json!({
                "name": "chat",
                "function_name": "chat-${EnvName}",
                "runtime": "python3.12",
                "handler": "app.handler",
                "memory": 256,
                "timeout": 30,
                "env": { "TABLE_NAME": "messages-${EnvName}" },
                "policy": "chat-access",
                "dynamodb_access": [{ "table": "messages", "access": "readwrite" }],
            }),
        );
        fixture.write_source("chat", "app.py", "def handler(event, context):\n    return {}\n");
        fixture.write_function(
            "connect",
            "config.json",
            json!({
                "name": "connect",
                "runtime": "nodejs20.x",
                "handler": "index.handler",
                "memory": 128,
                "timeout": 10,
            }),
        );
        fixture.write_source("connect", "index.mjs", "export const handler = async () => ({});\n");
        fixture.write_api(
            "chat",
            "api.json",
            json!({
                "name": "chat-${EnvName}",
                "route_selection_expression": "$request.body.action",
                "stage": { "name": "${EnvName}", "auto_deploy": true },
                "manage_connections_for": ["chat"],
            }),
        );
        fixture.write_route(
            "chat",
            "connect.json",
            json!({
                "route_key": "$connect",
                "integration": { "type": "lambda", "lambda_name": "connect" },
            }),
        );
        fixture.write_route(
            "chat",
            "send_message.json",
            json!({
                "route_key": "sendMessage",
                "integration": { "type": "lambda", "lambda_name": "chat" },
            }),
        );
        fixture
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn write_project(&self, value: Value) -> PathBuf {
        let path = self.layout.project_file();
        write_json(&path, &value);
        path
    }

    pub fn write_defaults(&self, kind: ResourceKind, value: Value) -> PathBuf {
        let path = self
            .layout
            .defaults_dir()
            .join(format!("{}.json", kind.defaults_stem()));
        write_json(&path, &value);
        path
    }

    pub fn write_table(&self, name: &str, file: &str, value: Value) -> PathBuf {
        self.write_fragment(ResourceKind::Table, name, file, value)
    }

    pub fn write_policy(&self, name: &str, file: &str, value: Value) -> PathBuf {
        self.write_fragment(ResourceKind::Policy, name, file, value)
    }

    pub fn write_function(&self, name: &str, file: &str, value: Value) -> PathBuf {
        self.write_fragment(ResourceKind::Function, name, file, value)
    }

    pub fn write_api(&self, name: &str, file: &str, value: Value) -> PathBuf {
        self.write_fragment(ResourceKind::WebSocketApi, name, file, value)
    }

    /// Write a route file; `file` may include subfolders.
    pub fn write_route(&self, api: &str, file: &str, value: Value) -> PathBuf {
        let path = self.layout.routes_dir(api).join(file);
        write_json(&path, &value);
        path
    }

    /// Write a source file into a function folder.
    pub fn write_source(&self, function: &str, relative: &str, contents: &str) -> PathBuf {
        let path = self
            .layout
            .resource_dir(ResourceKind::Function, function)
            .join(relative);
        write_text(&path, contents);
        path
    }

    /// Write raw text into a resource folder, for malformed fragments.
    pub fn write_raw(&self, kind: ResourceKind, name: &str, file: &str, contents: &str) -> PathBuf {
        let path = self.layout.resource_dir(kind, name).join(file);
        write_text(&path, contents);
        path
    }

    pub fn write_fragment(
        &self,
        kind: ResourceKind,
        name: &str,
        file: &str,
        value: Value,
    ) -> PathBuf {
        let path = self.layout.resource_dir(kind, name).join(file);
        write_json(&path, &value);
        path
    }
}

impl Default for ProjectFixture {
    fn default() -> Self {
        Self::new()
    }
}

fn write_json(path: &Path, value: &Value) {
    let text = serde_json::to_string_pretty(value).expect("serialize fixture");
    write_text(path, &text);
}

fn write_text(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create fixture dir");
    }
    fs::write(path, contents).expect("write fixture");
}
