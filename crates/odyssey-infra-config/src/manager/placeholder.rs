//! `${name}` placeholder expansion over a merged mapping.

use crate::validate::{self, Collector, ValueKind};
use crate::{ConfigError, Variables};
use log::debug;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

/// Any `${...}` token, including shapes that are rejected on lookup.
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]*)\}").expect("placeholder pattern"));

/// Names a placeholder may reference: a single key segment.
static TOKEN_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("token name pattern"));

/// Whether `text` still carries a placeholder token.
pub(super) fn contains_placeholder(text: &str) -> bool {
    PLACEHOLDER.is_match(text)
}

/// Expand every placeholder in `values`.
///
/// Failures go to `collector`; a string that failed to expand is kept as-is so
/// aggregate mode can keep scanning the rest of the mapping.
pub(super) fn expand_placeholders(
    values: &Map<String, Value>,
    variables: &Variables,
    context: &str,
    collector: &mut Collector,
) -> Map<String, Value> {
    let mut expander = Expander {
        values,
        variables,
        context,
        resolved: HashMap::new(),
        failed: HashSet::new(),
    };
    let mut expanded = Map::new();
    for (key, value) in values {
        if collector.should_stop() {
            break;
        }
        let value = expander.expand_field(key, value, collector);
        expanded.insert(key.clone(), value);
    }
    debug!(
        "expanded placeholders ({context}, referenced={}, failed={})",
        expander.resolved.len(),
        expander.failed.len()
    );
    expanded
}

enum Failure {
    /// Already recorded while expanding an earlier field.
    Reported,
    New(ConfigError),
}

impl From<ConfigError> for Failure {
    fn from(error: ConfigError) -> Self {
        Self::New(error)
    }
}

struct Expander<'a> {
    values: &'a Map<String, Value>,
    variables: &'a Variables,
    context: &'a str,
    /// Top-level keys already expanded, by name.
    resolved: HashMap<String, String>,
    /// Top-level keys whose expansion failed.
    failed: HashSet<String>,
}

/// Outcome of looking up one top-level key without expanding it.
enum Lookup {
    Ready(String),
    /// A string key that still has to be expanded.
    Pending,
}

impl Expander<'_> {
    fn expand_field(&mut self, key: &str, value: &Value, collector: &mut Collector) -> Value {
        match value {
            // A top-level string goes through the key cache so that `${key}`
            // inside its own value is caught as a cycle. A variable of the
            // same name shadows the key, so `"name": "${name}"` is legal then.
            Value::String(text) if !self.variables.contains_key(key) => {
                let result = self.resolve_key(key, key);
                finish_leaf(result, text, collector)
            }
            other => self.expand_value(other, key, collector),
        }
    }

    fn expand_value(&mut self, value: &Value, path: &str, collector: &mut Collector) -> Value {
        match value {
            Value::String(text) => {
                let result = self.expand_str(text, path);
                finish_leaf(result, text, collector)
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(idx, item)| {
                        self.expand_value(item, &validate::index_path(path, idx), collector)
                    })
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(name, item)| {
                        let item_path = validate::join_path(path, name);
                        (name.clone(), self.expand_value(item, &item_path, collector))
                    })
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Substitute every token of `text` in a single pass.
    ///
    /// Keys referenced by `text` must already be expanded or be scalars;
    /// `resolve_key` guarantees that before calling here for a key.
    fn expand_str(&mut self, text: &str, field: &str) -> Result<String, Failure> {
        let mut output = String::with_capacity(text.len());
        let mut last = 0;
        for captures in PLACEHOLDER.captures_iter(text) {
            let (Some(whole), Some(token)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            output.push_str(&text[last..whole.start()]);
            output.push_str(&self.lookup(token.as_str(), field)?);
            last = whole.end();
        }
        output.push_str(&text[last..]);

        // Substituted text may splice a new token together; never leave one behind.
        if let Some(token) = PLACEHOLDER.captures(&output).and_then(|captures| captures.get(1)) {
            return Err(self.unresolved(field, token.as_str()).into());
        }
        Ok(output)
    }

    fn lookup(&mut self, token: &str, field: &str) -> Result<String, Failure> {
        if !TOKEN_NAME.is_match(token) {
            return Err(self.unresolved(field, token).into());
        }
        if let Some(value) = self.variables.get(token) {
            return Ok(value.clone());
        }
        self.resolve_key(token, field)
    }

    /// Expand the top-level key `name`, referenced from `field`.
    ///
    /// Reference chains are walked with an explicit stack of keys in
    /// progress, outermost first, so chain length is bounded by memory only.
    fn resolve_key(&mut self, name: &str, field: &str) -> Result<String, Failure> {
        let mut stack: Vec<String> = Vec::new();
        if let Lookup::Ready(value) = self.classify(name, field, &stack)? {
            return Ok(value);
        }
        stack.push(name.to_string());

        let values = self.values;
        while let Some(key) = stack.last().cloned() {
            let text = match values.get(&key) {
                Some(Value::String(text)) => text,
                _ => return Err(self.unresolved(field, &key).into()),
            };
            let step = match self.next_pending(text, &key, &stack) {
                Ok(Some(dependency)) => {
                    stack.push(dependency);
                    continue;
                }
                Ok(None) => self.expand_str(text, &key),
                Err(failure) => Err(failure),
            };
            match step {
                Ok(expanded) => {
                    stack.pop();
                    self.resolved.insert(key, expanded.clone());
                    if stack.is_empty() {
                        return Ok(expanded);
                    }
                }
                Err(failure) => {
                    self.failed.extend(stack);
                    return Err(failure);
                }
            }
        }
        Err(self.unresolved(field, name).into())
    }

    /// First key referenced by `text` that still needs expanding.
    fn next_pending(
        &self,
        text: &str,
        field: &str,
        stack: &[String],
    ) -> Result<Option<String>, Failure> {
        for captures in PLACEHOLDER.captures_iter(text) {
            let Some(token) = captures.get(1).map(|token| token.as_str()) else {
                continue;
            };
            if !TOKEN_NAME.is_match(token) {
                return Err(self.unresolved(field, token).into());
            }
            if self.variables.contains_key(token) {
                continue;
            }
            if let Lookup::Pending = self.classify(token, field, stack)? {
                return Ok(Some(token.to_string()));
            }
        }
        Ok(None)
    }

    fn classify(&self, name: &str, field: &str, stack: &[String]) -> Result<Lookup, Failure> {
        if let Some(done) = self.resolved.get(name) {
            return Ok(Lookup::Ready(done.clone()));
        }
        if self.failed.contains(name) {
            return Err(Failure::Reported);
        }
        if let Some(start) = stack.iter().position(|entry| entry == name) {
            let mut cycle = stack[start..].to_vec();
            cycle.push(name.to_string());
            return Err(ConfigError::CyclicReference {
                context: self.context.to_string(),
                field: name.to_string(),
                cycle,
            }
            .into());
        }
        match self.values.get(name) {
            None => Err(self.unresolved(field, name).into()),
            Some(Value::String(_)) => Ok(Lookup::Pending),
            Some(Value::Number(number)) => Ok(Lookup::Ready(number.to_string())),
            Some(Value::Bool(flag)) => Ok(Lookup::Ready(flag.to_string())),
            Some(other) => {
                Err(validate::type_mismatch(other, ValueKind::String, name, self.context).into())
            }
        }
    }

    fn unresolved(&self, field: &str, token: &str) -> ConfigError {
        ConfigError::UnresolvedPlaceholder {
            context: self.context.to_string(),
            field: field.to_string(),
            token: token.to_string(),
        }
    }
}

fn finish_leaf(
    result: Result<String, Failure>,
    original: &str,
    collector: &mut Collector,
) -> Value {
    match result {
        Ok(expanded) => Value::String(expanded),
        Err(failure) => {
            if let Failure::New(error) = failure {
                collector.check::<()>(Err(error));
            }
            Value::String(original.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::ValidationMode;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn expand(
        values: Value,
        variables: &[(&str, &str)],
        mode: ValidationMode,
    ) -> Result<Map<String, Value>, crate::ErrorReport> {
        let variables = variables
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect::<Variables>();
        let mut collector = Collector::new(mode);
        let expanded = expand_placeholders(&object(values), &variables, "test", &mut collector);
        collector.finish(expanded)
    }

    #[test]
    fn substitutes_variables_and_keys() {
        let expanded = expand(
            json!({
                "prefix": "app",
                "table_name": "${prefix}-${env}-data",
                "nested": { "items": ["${prefix}", 1, true] },
            }),
            &[("env", "prod")],
            ValidationMode::FailFast,
        )
        .expect("expanded");
        assert_eq!(expanded["table_name"], json!("app-prod-data"));
        assert_eq!(expanded["nested"], json!({ "items": ["app", 1, true] }));
    }

    #[test]
    fn variables_win_over_config_keys() {
        let expanded = expand(
            json!({ "env": "dev", "name": "svc-${env}" }),
            &[("env", "prod")],
            ValidationMode::FailFast,
        )
        .expect("expanded");
        assert_eq!(expanded["name"], json!("svc-prod"));
        assert_eq!(expanded["env"], json!("dev"));
    }

    #[test]
    fn field_shadowed_by_variable_may_reference_itself() {
        let expanded = expand(
            json!({ "name": "${name}-fn" }),
            &[("name", "orders")],
            ValidationMode::FailFast,
        )
        .expect("expanded");
        assert_eq!(expanded["name"], json!("orders-fn"));
    }

    #[test]
    fn scalars_substitute_their_text() {
        let expanded = expand(
            json!({ "memory": 256, "pitr": false, "label": "m${memory}-${pitr}" }),
            &[],
            ValidationMode::FailFast,
        )
        .expect("expanded");
        assert_eq!(expanded["label"], json!("m256-false"));
        assert_eq!(expanded["memory"], json!(256));
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let report = expand(json!({ "a": "x${a}" }), &[], ValidationMode::FailFast).unwrap_err();
        match report.into_first() {
            Some(ConfigError::CyclicReference { cycle, .. }) => {
                assert_eq!(cycle, vec!["a".to_string(), "a".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn cycle_is_reported_once_in_aggregate_mode() {
        let report = expand(
            json!({ "a": "${b}", "b": "${c}", "c": "${a}", "d": "${a}" }),
            &[],
            ValidationMode::Aggregate,
        )
        .unwrap_err();
        assert_eq!(report.len(), 1);
        assert!(report.to_string().contains("a -> b -> c -> a"));
    }

    #[test]
    fn long_reference_chains_resolve() {
        let depth = 5_000;
        let mut values = Map::new();
        for idx in 0..depth {
            values.insert(format!("k{idx}"), json!(format!("${{k{}}}", idx + 1)));
        }
        values.insert(format!("k{depth}"), json!("end"));

        let expanded = expand(Value::Object(values), &[], ValidationMode::FailFast)
            .expect("expanded");
        assert_eq!(expanded["k0"], json!("end"));
        assert_eq!(expanded[&format!("k{}", depth / 2)], json!("end"));
    }

    #[test]
    fn long_cycles_are_reported_with_the_full_chain() {
        let depth = 2_000;
        let mut values = Map::new();
        for idx in 0..depth {
            values.insert(format!("k{idx}"), json!(format!("${{k{}}}", (idx + 1) % depth)));
        }

        let report = expand(Value::Object(values), &[], ValidationMode::Aggregate).unwrap_err();
        assert_eq!(report.len(), 1);
        match report.into_first() {
            Some(ConfigError::CyclicReference { cycle, .. }) => {
                assert_eq!(cycle.len(), depth + 1);
                assert_eq!(cycle.first(), cycle.last());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn object_reference_is_type_mismatch() {
        let report = expand(
            json!({ "stage": { "name": "dev" }, "label": "${stage}" }),
            &[],
            ValidationMode::FailFast,
        )
        .unwrap_err();
        match report.into_first() {
            Some(ConfigError::TypeMismatch { path, actual, .. }) => {
                assert_eq!(path, "stage");
                assert_eq!(actual, ValueKind::Object);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_dotted_and_empty_tokens() {
        let report = expand(
            json!({ "a": "${stage.name}", "b": "${}" }),
            &[],
            ValidationMode::Aggregate,
        )
        .unwrap_err();
        let tokens = report
            .errors()
            .iter()
            .map(|error| match error {
                ConfigError::UnresolvedPlaceholder { token, .. } => token.clone(),
                other => panic!("unexpected error: {other:?}"),
            })
            .collect::<Vec<_>>();
        assert_eq!(tokens, vec!["stage.name".to_string(), String::new()]);
    }

    #[test]
    fn spliced_tokens_are_rejected() {
        let report = expand(
            json!({ "open": "{inner}", "value": "$${open}" }),
            &[],
            ValidationMode::FailFast,
        )
        .unwrap_err();
        assert!(matches!(
            report.into_first(),
            Some(ConfigError::UnresolvedPlaceholder { ref token, .. }) if token == "inner"
        ));
    }

    #[test]
    fn nested_paths_name_the_failing_field() {
        let report = expand(
            json!({ "env": { "TABLE": "${missing}" } }),
            &[],
            ValidationMode::FailFast,
        )
        .unwrap_err();
        match report.into_first() {
            Some(ConfigError::UnresolvedPlaceholder { field, token, .. }) => {
                assert_eq!(field, "env.TABLE");
                assert_eq!(token, "missing");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
