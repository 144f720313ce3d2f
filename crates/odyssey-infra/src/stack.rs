//! Stack assembly.
//!
//! Resolves and builds every resource of a project in dependency order
//! (tables, policies, functions, streaming APIs) so each builder can check
//! its references against resources that were already built.

use log::{debug, info, warn};
use odyssey_infra_builders::{
    BuildContext, Builder, FunctionBuilder, FunctionDefinition, PolicyBuilder, PolicyDefinition,
    ResourceDefinition, TableBuilder, TableDefinition, WebSocketApiBuilder,
    WebSocketApiDefinition,
};
use odyssey_infra_config::{
    Collector, ConfigError, ConfigManager, ConfigManagerOptions, EnvironmentSettings,
    ErrorReport, ProjectLayout, ResolvedConfig, ResourceKind, ResourceSource, ValidationMode,
    Variables,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StackError {
    /// `project.json` or the defaults folder could not be loaded.
    #[error("failed to load project settings: {0}")]
    Project(#[source] ConfigError),
    /// One or more resources failed to resolve or build.
    #[error("{0}")]
    Invalid(#[from] ErrorReport),
}

impl StackError {
    /// Every underlying failure message.
    pub fn messages(&self) -> Vec<String> {
        match self {
            Self::Project(error) => vec![error.to_string()],
            Self::Invalid(report) => report.messages(),
        }
    }
}

/// Inputs of one planning run.
#[derive(Debug, Clone, Default)]
pub struct StackOptions {
    /// Environment to plan instead of the one named in `project.json`.
    pub env: Option<String>,
    /// Extra placeholder variables; they override project variables.
    pub variables: Variables,
    pub mode: ValidationMode,
}

impl StackOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = Some(env.into());
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_mode(mut self, mode: ValidationMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Every resource definition of one environment, in build order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackPlan {
    pub environment: EnvironmentSettings,
    pub tables: Vec<TableDefinition>,
    pub policies: Vec<PolicyDefinition>,
    pub functions: Vec<FunctionDefinition>,
    pub websocket_apis: Vec<WebSocketApiDefinition>,
}

impl StackPlan {
    /// All definitions, tables first and streaming APIs last.
    pub fn resources(&self) -> Vec<ResourceDefinition> {
        let tables = self.tables.iter().cloned().map(ResourceDefinition::Table);
        let policies = self.policies.iter().cloned().map(ResourceDefinition::Policy);
        let functions = self.functions.iter().cloned().map(ResourceDefinition::Function);
        let apis = self
            .websocket_apis
            .iter()
            .cloned()
            .map(ResourceDefinition::WebsocketApi);
        tables.chain(policies).chain(functions).chain(apis).collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len() + self.policies.len() + self.functions.len() + self.websocket_apis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolve and build every resource under `layout`.
///
/// In fail-fast mode the first failure ends the run. In aggregate mode every
/// resource is attempted and all failures come back in one report.
pub fn plan_stack(layout: &ProjectLayout, options: &StackOptions) -> Result<StackPlan, StackError> {
    info!(
        "planning stack (root={}, env_override={:?}, mode={:?})",
        layout.root().display(),
        options.env,
        options.mode
    );
    let settings = layout
        .load_settings(options.env.as_deref())
        .map_err(StackError::Project)?;
    let defaults = layout.load_defaults().map_err(StackError::Project)?;
    let mut variables = settings.variables();
    variables.extend(options.variables.clone());
    debug!(
        "project variables ready (env={}, count={})",
        settings.env.name,
        variables.len()
    );

    let manager = ConfigManager::new(
        ConfigManagerOptions::new()
            .with_defaults(defaults)
            .with_variables(variables),
    );
    let mut planner = Planner {
        layout,
        manager,
        collector: Collector::new(options.mode),
        ctx: BuildContext::new(settings.env.name.clone()),
    };

    let table_sources = planner.sources(ResourceKind::Table);
    planner.ctx = std::mem::take(&mut planner.ctx)
        .with_tables(table_sources.iter().map(ResourceSource::name));
    let tables = planner.build_all(&table_sources, &TableBuilder);

    let policy_sources = planner.sources(ResourceKind::Policy);
    planner.ctx = std::mem::take(&mut planner.ctx)
        .with_policies(policy_sources.iter().map(ResourceSource::name));
    let policies = planner.build_all(&policy_sources, &PolicyBuilder);

    let function_sources = planner.sources(ResourceKind::Function);
    let function_configs = planner.resolve(&function_sources);
    let function_names = planner.function_names(&function_configs);
    planner.ctx = std::mem::take(&mut planner.ctx).with_functions(function_names);
    let functions = planner.build_resolved(&function_configs, &FunctionBuilder);

    let websocket_apis = planner.build_apis();

    let plan = StackPlan {
        environment: settings.env,
        tables,
        policies,
        functions,
        websocket_apis,
    };
    if planner.collector.has_errors() {
        warn!(
            "stack planning failed (env={}, mode={:?})",
            plan.environment.name, options.mode
        );
    } else {
        info!(
            "stack planned (env={}, tables={}, policies={}, functions={}, websocket_apis={})",
            plan.environment.name,
            plan.tables.len(),
            plan.policies.len(),
            plan.functions.len(),
            plan.websocket_apis.len()
        );
    }
    planner.collector.finish(plan).map_err(StackError::from)
}

struct Planner<'a> {
    layout: &'a ProjectLayout,
    manager: ConfigManager,
    collector: Collector,
    ctx: BuildContext,
}

impl Planner<'_> {
    fn sources(&mut self, kind: ResourceKind) -> Vec<ResourceSource> {
        if self.collector.should_stop() {
            return Vec::new();
        }
        self.collector
            .check(self.layout.sources(kind))
            .unwrap_or_default()
    }

    /// Resolve each source on its own so one bad resource does not hide
    /// the others.
    fn resolve(&mut self, sources: &[ResourceSource]) -> Vec<ResolvedConfig> {
        let mut resolved = Vec::with_capacity(sources.len());
        for source in sources {
            if self.collector.should_stop() {
                break;
            }
            match self.manager.resolve_batch(
                std::slice::from_ref(source),
                &Variables::new(),
                self.collector.mode(),
            ) {
                Ok(configs) => resolved.extend(configs),
                Err(report) => self.collector.absorb(report),
            }
        }
        resolved
    }

    fn build_all<B: Builder>(
        &mut self,
        sources: &[ResourceSource],
        builder: &B,
    ) -> Vec<B::Definition> {
        let configs = self.resolve(sources);
        self.build_resolved(&configs, builder)
    }

    fn build_resolved<B: Builder>(
        &mut self,
        configs: &[ResolvedConfig],
        builder: &B,
    ) -> Vec<B::Definition> {
        let mut built = Vec::with_capacity(configs.len());
        for config in configs {
            if self.collector.should_stop() {
                break;
            }
            debug!("building {} '{}'", config.kind(), config.name());
            if let Some(definition) = builder.build_into(config, &self.ctx, &mut self.collector) {
                built.push(definition);
            }
        }
        built
    }

    /// Logical names of resolved functions; a name used twice is an error.
    fn function_names(&mut self, configs: &[ResolvedConfig]) -> Vec<String> {
        let mut seen: BTreeMap<String, PathBuf> = BTreeMap::new();
        for config in configs {
            let Ok(Some(name)) = config.optional_str("name") else {
                continue;
            };
            if let Some(first) = seen.get(name) {
                self.collector.check::<()>(Err(ConfigError::InvalidValue {
                    context: config.field_context("name"),
                    path: "name".to_string(),
                    message: format!(
                        "duplicate function name '{name}' (also used by {})",
                        first.display()
                    ),
                }));
                continue;
            }
            seen.insert(name.to_string(), config.folder().to_path_buf());
        }
        seen.into_keys().collect()
    }

    fn build_apis(&mut self) -> Vec<WebSocketApiDefinition> {
        let sources = self.sources(ResourceKind::WebSocketApi);
        let apis = self.resolve(&sources);
        let mut built = Vec::with_capacity(apis.len());
        for api in &apis {
            if self.collector.should_stop() {
                break;
            }
            let route_sources = self.layout.route_sources(api.name());
            let Some(route_sources) = self.collector.check(route_sources) else {
                continue;
            };
            let routes = match self.manager.resolve_batch(
                &route_sources,
                &Variables::new(),
                self.collector.mode(),
            ) {
                Ok(routes) => routes,
                Err(report) => {
                    self.collector.absorb(report);
                    continue;
                }
            };
            debug!(
                "building websocket api '{}' (routes={})",
                api.name(),
                routes.len()
            );
            let builder = WebSocketApiBuilder::new(&routes);
            if let Some(definition) = builder.build_into(api, &self.ctx, &mut self.collector) {
                built.push(definition);
            }
        }
        built
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odyssey_infra_test_utils::ProjectFixture;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn plans_resources_in_dependency_order() {
        let fixture = ProjectFixture::chat();
        let plan = plan_stack(fixture.layout(), &StackOptions::new()).expect("plan");
        let kinds = plan
            .resources()
            .iter()
            .map(|resource| resource.logical_name().to_string())
            .collect::<Vec<_>>();
        assert_eq!(kinds, vec!["messages", "chat-access", "chat", "connect", "chat"]);
        assert_eq!(plan.len(), 5);
    }

    #[test]
    fn env_override_changes_variables() {
        let fixture = ProjectFixture::chat();
        fixture.write_project(json!({
            "env": "dev",
            "region": "eu-west-1",
            "dev": { "account_id": "123456789012" },
            "main": { "account_id": "210987654321" },
            "github": { "owner": "liquidos-ai", "repo": "odyssey" },
        }));
        let options = StackOptions::new().with_env("MAIN");
        let plan = plan_stack(fixture.layout(), &options).expect("plan");
        assert_eq!(plan.environment.name, "main");
        assert_eq!(plan.tables[0].table_name, "messages-main");
        assert_eq!(plan.tables[0].removal_policy, odyssey_infra_builders::RemovalPolicy::Retain);
    }

    #[test]
    fn extra_variables_override_project_variables() {
        let fixture = ProjectFixture::chat();
        let options = StackOptions::new().with_variable("EnvName", "preview");
        let plan = plan_stack(fixture.layout(), &options).expect("plan");
        assert_eq!(plan.functions[0].function_name.as_deref(), Some("chat-preview"));
        // Removal policy follows the environment, not the variable.
        assert_eq!(plan.tables[0].removal_policy, odyssey_infra_builders::RemovalPolicy::Destroy);
    }

    #[test]
    fn duplicate_function_names_are_rejected() {
        let fixture = ProjectFixture::chat();
        fixture.write_function(
            "chat_v2",
            "config.json",
            json!({
                "name": "chat",
                "runtime": "python3.12",
                "handler": "app.handler",
                "memory": 128,
                "timeout": 3,
            }),
        );
        fixture.write_source("chat_v2", "app.py", "");
        let err = plan_stack(fixture.layout(), &StackOptions::new()).unwrap_err();
        let messages = err.messages().join("\n");
        assert!(messages.contains("duplicate function name 'chat'"), "{messages}");
    }

    #[test]
    fn missing_project_file_is_a_project_error() {
        let fixture = ProjectFixture::new();
        let err = plan_stack(fixture.layout(), &StackOptions::new()).unwrap_err();
        assert!(matches!(err, StackError::Project(ConfigError::ReadFailed { .. })));
    }
}
