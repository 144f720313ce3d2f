//! Resource builders: validated configuration in, resource definitions out.
//!
//! Every builder takes a `ResolvedConfig` plus a read-only `BuildContext`,
//! checks the rules of its resource kind, and returns an immutable,
//! serialisable definition. Construction is all-or-nothing.

mod builder;
mod context;
mod function;
mod policy;
mod table;
mod websocket;

pub use builder::Builder;
pub use context::{BuildContext, RETAINED_ENV, RemovalPolicy};
pub use function::{FunctionBuilder, FunctionDefinition, Runtime, TableAccess, TableGrant};
pub use policy::{
    Effect, ManagedPolicy, PolicyBuilder, PolicyDefinition, PolicyStatement, StatementResources,
};
pub use table::{
    AttributeType, Billing, Capacity, GlobalSecondaryIndex, KeyAttribute, Projection,
    StreamView, TableBuilder, TableDefinition,
};
pub use websocket::{
    IntegrationType, RouteDefinition, RouteIntegration, StageDefinition, WebSocketApiBuilder,
    WebSocketApiDefinition,
};

use odyssey_infra_config::ConfigError;
use odyssey_infra_config::validate;
use serde::Serialize;
use serde_json::Value;

/// Any definition a builder can produce.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceDefinition {
    Table(TableDefinition),
    Function(FunctionDefinition),
    Policy(PolicyDefinition),
    WebsocketApi(WebSocketApiDefinition),
}

impl ResourceDefinition {
    /// Name other resources use to reference this one.
    pub fn logical_name(&self) -> &str {
        match self {
            Self::Table(table) => &table.logical_name,
            Self::Function(function) => &function.logical_name,
            Self::Policy(policy) => &policy.name,
            Self::WebsocketApi(api) => &api.logical_name,
        }
    }
}

/// Parse a string from a closed set of spellings, case-insensitively.
pub(crate) fn parse_choice<T: Copy>(
    value: &Value,
    choices: &[(&str, T)],
    path: &str,
    context: &str,
) -> Result<T, ConfigError> {
    let text = validate::expect_str(value, path, context)?;
    choices
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(text))
        .map(|(_, choice)| *choice)
        .ok_or_else(|| {
            let names = choices.iter().map(|(name, _)| *name).collect::<Vec<_>>();
            validate::invalid_value(
                path,
                &format!("must be one of: {} (got '{text}')", names.join(", ")),
                context,
            )
        })
}
