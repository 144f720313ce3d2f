//! Streaming (WebSocket) API definitions.
//!
//! An API folder holds the API fragments plus a `routes/` folder with one
//! file per route. The API config and its resolved route configs are built
//! together so route keys can be checked for uniqueness.

use crate::builder::expect_kind;
use crate::{BuildContext, Builder, parse_choice};
use log::debug;
use odyssey_infra_config::validate::{self, Collector, index_path, join_path};
use odyssey_infra_config::{ConfigError, ResolvedConfig, ResourceKind};
use serde::Serialize;
use std::collections::BTreeSet;

const INTEGRATION_FIELDS: &[&str] = &["type", "lambda_name"];
const STAGE_FIELDS: &[&str] = &["name", "auto_deploy"];
const SELECTION_PREFIX: &str = "$request.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationType {
    Lambda,
}

const INTEGRATION_TYPES: &[(&str, IntegrationType)] = &[("lambda", IntegrationType::Lambda)];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageDefinition {
    pub name: String,
    pub auto_deploy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteIntegration {
    #[serde(rename = "type")]
    pub integration_type: IntegrationType,
    /// Logical name of the function handling the route.
    pub function: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteDefinition {
    pub route_key: String,
    pub integration: RouteIntegration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebSocketApiDefinition {
    /// Folder name of the API.
    pub logical_name: String,
    pub api_name: String,
    pub route_selection_expression: String,
    pub stage: StageDefinition,
    pub routes: Vec<RouteDefinition>,
    /// Functions allowed to post to connected clients.
    pub manage_connections_for: Vec<String>,
}

/// Builds a [`WebSocketApiDefinition`] from an API config and its routes.
#[derive(Debug, Clone, Copy)]
pub struct WebSocketApiBuilder<'a> {
    routes: &'a [ResolvedConfig],
}

impl<'a> WebSocketApiBuilder<'a> {
    /// `routes` are the API's resolved route files, in discovery order.
    pub fn new(routes: &'a [ResolvedConfig]) -> Self {
        Self { routes }
    }
}

impl Builder for WebSocketApiBuilder<'_> {
    type Definition = WebSocketApiDefinition;

    fn kind(&self) -> ResourceKind {
        ResourceKind::WebSocketApi
    }

    fn build_into(
        &self,
        config: &ResolvedConfig,
        ctx: &BuildContext,
        collector: &mut Collector,
    ) -> Option<WebSocketApiDefinition> {
        debug!(
            "building websocket api (name={}, routes={})",
            config.name(),
            self.routes.len()
        );
        let api_name = collector.check(config.require_non_empty_str("name"));
        let route_selection_expression = collector.check(parse_selection_expression(config));
        let stage = collector.check(parse_stage(config));
        let manage_connections_for = collector.check(parse_managers(config, ctx));
        let routes = build_routes(config, self.routes, ctx, collector);

        Some(WebSocketApiDefinition {
            logical_name: config.name().to_string(),
            api_name: api_name?.to_string(),
            route_selection_expression: route_selection_expression?,
            stage: stage?,
            routes: routes?,
            manage_connections_for: manage_connections_for?,
        })
    }
}

fn parse_selection_expression(config: &ResolvedConfig) -> Result<String, ConfigError> {
    let expression = config.require_non_empty_str("route_selection_expression")?;
    if !expression.starts_with(SELECTION_PREFIX) {
        return Err(validate::invalid_value(
            "route_selection_expression",
            &format!(
                "must select from the request, e.g. '$request.body.action' (got '{expression}')"
            ),
            &config.field_context("route_selection_expression"),
        ));
    }
    Ok(expression.to_string())
}

fn parse_stage(config: &ResolvedConfig) -> Result<StageDefinition, ConfigError> {
    let context = config.field_context("stage");
    let stage =
        validate::validate_field_structure(config.values(), "stage", STAGE_FIELDS, "", &context)?;
    validate::ensure_allowed_keys(stage, STAGE_FIELDS, "stage", &context)?;
    let name = validate::expect_non_empty_str(
        validate::require_field(stage, "name", "stage", &context)?,
        "stage.name",
        &context,
    )?;
    let auto_deploy = validate::expect_bool(
        validate::require_field(stage, "auto_deploy", "stage", &context)?,
        "stage.auto_deploy",
        &context,
    )?;
    Ok(StageDefinition {
        name: name.to_string(),
        auto_deploy,
    })
}

fn parse_managers(config: &ResolvedConfig, ctx: &BuildContext) -> Result<Vec<String>, ConfigError> {
    let Some(value) = config.optional("manage_connections_for") else {
        return Ok(Vec::new());
    };
    let context = config.field_context("manage_connections_for");
    let names = validate::expect_string_list(value, "manage_connections_for", &context)?;
    for (idx, name) in names.iter().enumerate() {
        if !ctx.has_function(name) {
            return Err(ConfigError::UnknownReference {
                context,
                path: index_path("manage_connections_for", idx),
                target: "function".to_string(),
                name: name.clone(),
            });
        }
    }
    Ok(names)
}

fn build_routes(
    api: &ResolvedConfig,
    routes: &[ResolvedConfig],
    ctx: &BuildContext,
    collector: &mut Collector,
) -> Option<Vec<RouteDefinition>> {
    if routes.is_empty() {
        collector.check::<()>(Err(ConfigError::InvalidRoute {
            context: api.context(),
            path: "routes".to_string(),
            message: "an API needs at least one route".to_string(),
        }));
        return None;
    }

    let mut built = Vec::with_capacity(routes.len());
    let mut keys = BTreeSet::new();
    let mut complete = true;
    for route in routes {
        if collector.should_stop() {
            return None;
        }
        let Some(definition) = collector.check(build_route(route, ctx)) else {
            complete = false;
            continue;
        };
        if !keys.insert(definition.route_key.clone()) {
            collector.check::<()>(Err(invalid_route(
                route,
                "route_key",
                &format!("duplicate route key '{}' in API '{}'", definition.route_key, api.name()),
            )));
            complete = false;
            continue;
        }
        built.push(definition);
    }
    complete.then_some(built)
}

fn build_route(route: &ResolvedConfig, ctx: &BuildContext) -> Result<RouteDefinition, ConfigError> {
    expect_kind(route, ResourceKind::WebSocketRoute)?;
    let route_key = route.require_str("route_key")?;
    if route_key.trim().is_empty() {
        return Err(invalid_route(route, "route_key", "cannot be empty"));
    }

    let context = route.field_context("integration");
    let integration = validate::validate_field_structure(
        route.values(),
        "integration",
        INTEGRATION_FIELDS,
        "",
        &context,
    )?;
    validate::ensure_allowed_keys(integration, INTEGRATION_FIELDS, "integration", &context)?;
    let integration_type = parse_choice(
        validate::require_field(integration, "type", "integration", &context)?,
        INTEGRATION_TYPES,
        "integration.type",
        &context,
    )?;
    let function = validate::expect_non_empty_str(
        validate::require_field(integration, "lambda_name", "integration", &context)?,
        "integration.lambda_name",
        &context,
    )?;
    if !ctx.has_function(function) {
        return Err(ConfigError::UnknownReference {
            context,
            path: join_path("integration", "lambda_name"),
            target: "function".to_string(),
            name: function.to_string(),
        });
    }

    Ok(RouteDefinition {
        route_key: route_key.to_string(),
        integration: RouteIntegration {
            integration_type,
            function: function.to_string(),
        },
    })
}

fn invalid_route(route: &ResolvedConfig, path: &str, message: &str) -> ConfigError {
    ConfigError::InvalidRoute {
        context: route.field_context(path),
        path: path.to_string(),
        message: message.to_string(),
    }
}
