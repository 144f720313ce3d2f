//! Validation checks shared by the config manager and resource builders.
//!
//! Every check is an explicit call returning `Result`, so each call site
//! states exactly which rule runs. All failures are built here to keep the
//! error shape uniform: resource context, field path, message.

use crate::{ConfigError, ErrorReport};
use serde_json::{Map, Value};
use std::fmt;

/// Runtime shape of a JSON value, used in type checks and messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Null,
    Bool,
    Integer,
    Number,
    String,
    Array,
    Object,
}

impl ValueKind {
    /// Classify a value. Integral numbers report as `Integer`.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Bool,
            Value::Number(number) if number.is_i64() || number.is_u64() => Self::Integer,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }

    /// Whether `value` satisfies this expected kind. `Number` accepts integers.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::Number => value.is_number(),
            expected => Self::of(value) == expected,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Bool => "a boolean",
            Self::Integer => "an integer",
            Self::Number => "a number",
            Self::String => "a string",
            Self::Array => "an array",
            Self::Object => "an object",
        };
        f.write_str(name)
    }
}

/// Whether validation stops at the first failure or collects all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationMode {
    /// Stop at the first failure (single-resource resolution).
    #[default]
    FailFast,
    /// Collect every failure (pre-deployment validation).
    Aggregate,
}

/// Accumulates check outcomes according to a [`ValidationMode`].
#[derive(Debug)]
pub struct Collector {
    mode: ValidationMode,
    report: ErrorReport,
}

impl Collector {
    pub fn new(mode: ValidationMode) -> Self {
        Self {
            mode,
            report: ErrorReport::new(),
        }
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    /// Record the outcome of a check, returning the value on success.
    pub fn check<T>(&mut self, result: Result<T, ConfigError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                if !self.should_stop() {
                    self.report.push(error);
                }
                None
            }
        }
    }

    /// Merge an already-collected report.
    pub fn absorb(&mut self, report: ErrorReport) {
        match self.mode {
            ValidationMode::Aggregate => {
                let collected = std::mem::take(&mut self.report);
                self.report = aggregate([collected, report]);
            }
            ValidationMode::FailFast => {
                if let Some(error) = report.into_first() {
                    self.check::<()>(Err(error));
                }
            }
        }
    }

    /// True once fail-fast mode has seen a failure.
    pub fn should_stop(&self) -> bool {
        self.mode == ValidationMode::FailFast && !self.report.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        !self.report.is_empty()
    }

    /// Return `value` if no failure was recorded.
    pub fn finish<T>(self, value: T) -> Result<T, ErrorReport> {
        self.report.into_result(value)
    }

    /// Return a built value, or the failures that prevented building it.
    ///
    /// Checks only yield `None` after recording a failure, so a missing
    /// value always comes with a non-empty report.
    pub fn finish_built<T>(self, value: Option<T>) -> Result<T, ErrorReport> {
        match value {
            Some(value) => self.finish(value),
            None => Err(self.report),
        }
    }

    /// Return `value`, or the first recorded failure.
    pub fn finish_first<T>(self, value: T) -> Result<T, ConfigError> {
        match self.report.into_first() {
            Some(error) => Err(error),
            None => Ok(value),
        }
    }

    pub fn into_report(self) -> ErrorReport {
        self.report
    }
}

/// Fail with `MissingField` naming every absent field in `required`.
pub fn validate_required_fields(
    config: &Map<String, Value>,
    required: &[&str],
    context: &str,
) -> Result<(), ConfigError> {
    validate_required_fields_at(config, required, "", context)
}

/// Like [`validate_required_fields`], for an object nested at `path`.
///
/// Missing fields are reported with their full path.
pub fn validate_required_fields_at(
    config: &Map<String, Value>,
    required: &[&str],
    path: &str,
    context: &str,
) -> Result<(), ConfigError> {
    let missing = required
        .iter()
        .filter(|field| !config.contains_key(**field))
        .map(|field| join_path(path, field))
        .collect::<Vec<_>>();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::MissingField {
            context: context.to_string(),
            fields: missing,
        })
    }
}

/// Fetch a field of a nested object, failing with its full path when absent.
pub fn require_field<'a>(
    map: &'a Map<String, Value>,
    key: &str,
    path: &str,
    context: &str,
) -> Result<&'a Value, ConfigError> {
    map.get(key).ok_or_else(|| ConfigError::MissingField {
        context: context.to_string(),
        fields: vec![join_path(path, key)],
    })
}

/// Fail with `TypeMismatch` when `value` is not of the expected kind.
pub fn validate_type(
    value: &Value,
    expected: ValueKind,
    path: &str,
    context: &str,
) -> Result<(), ConfigError> {
    if expected.matches(value) {
        Ok(())
    } else {
        Err(type_mismatch(value, expected, path, context))
    }
}

/// Combine reports from independent checks, keeping every message.
pub fn aggregate(reports: impl IntoIterator<Item = ErrorReport>) -> ErrorReport {
    let mut combined = ErrorReport::new();
    for report in reports {
        combined.extend(report);
    }
    combined
}

/// Require `field` to be an object carrying every name in `subfields`.
pub fn validate_field_structure<'a>(
    config: &'a Map<String, Value>,
    field: &str,
    subfields: &[&str],
    path: &str,
    context: &str,
) -> Result<&'a Map<String, Value>, ConfigError> {
    let field_path = join_path(path, field);
    let Some(value) = config.get(field) else {
        return Err(ConfigError::MissingField {
            context: context.to_string(),
            fields: vec![field_path],
        });
    };
    let map = expect_object(value, &field_path, context)?;
    let missing = subfields
        .iter()
        .filter(|name| !map.contains_key(**name))
        .map(|name| join_path(&field_path, name))
        .collect::<Vec<_>>();
    if missing.is_empty() {
        Ok(map)
    } else {
        Err(ConfigError::MissingField {
            context: context.to_string(),
            fields: missing,
        })
    }
}

/// Require a value from a closed set, compared case-insensitively.
///
/// Returns the canonical spelling from `allowed`.
pub fn validate_enum_value<'a>(
    value: &str,
    allowed: &[&'a str],
    path: &str,
    context: &str,
) -> Result<&'a str, ConfigError> {
    allowed
        .iter()
        .find(|candidate| candidate.eq_ignore_ascii_case(value))
        .copied()
        .ok_or_else(|| {
            invalid_value(
                path,
                &format!("must be one of: {} (got '{value}')", allowed.join(", ")),
                context,
            )
        })
}

/// Ensure an object contains only allowed keys.
pub fn ensure_allowed_keys(
    map: &Map<String, Value>,
    allowed: &[&str],
    path: &str,
    context: &str,
) -> Result<(), ConfigError> {
    for key in map.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(ConfigError::UnknownKey {
                context: context.to_string(),
                path: join_path(path, key),
            });
        }
    }
    Ok(())
}

/// Expect a JSON object or return a typed error.
pub fn expect_object<'a>(
    value: &'a Value,
    path: &str,
    context: &str,
) -> Result<&'a Map<String, Value>, ConfigError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(type_mismatch(value, ValueKind::Object, path, context)),
    }
}

/// Expect a JSON array or return a typed error.
pub fn expect_array<'a>(
    value: &'a Value,
    path: &str,
    context: &str,
) -> Result<&'a Vec<Value>, ConfigError> {
    match value {
        Value::Array(values) => Ok(values),
        _ => Err(type_mismatch(value, ValueKind::Array, path, context)),
    }
}

/// Expect a JSON string or return a typed error.
pub fn expect_str<'a>(value: &'a Value, path: &str, context: &str) -> Result<&'a str, ConfigError> {
    validate_type(value, ValueKind::String, path, context)?;
    Ok(value.as_str().unwrap_or_default())
}

/// Expect a string that is not blank.
pub fn expect_non_empty_str<'a>(
    value: &'a Value,
    path: &str,
    context: &str,
) -> Result<&'a str, ConfigError> {
    let text = expect_str(value, path, context)?;
    if text.trim().is_empty() {
        return Err(invalid_value(path, "cannot be empty", context));
    }
    Ok(text)
}

/// Expect a JSON boolean or return a typed error.
pub fn expect_bool(value: &Value, path: &str, context: &str) -> Result<bool, ConfigError> {
    validate_type(value, ValueKind::Bool, path, context)?;
    Ok(value.as_bool().unwrap_or_default())
}

/// Expect a non-negative JSON integer or return a typed error.
pub fn expect_u64(value: &Value, path: &str, context: &str) -> Result<u64, ConfigError> {
    match value.as_u64() {
        Some(number) => Ok(number),
        None if value.is_i64() => Err(invalid_value(path, "must not be negative", context)),
        None => Err(type_mismatch(value, ValueKind::Integer, path, context)),
    }
}

/// Expect an integer within `min..=max`.
pub fn expect_u64_in_range(
    value: &Value,
    min: u64,
    max: u64,
    path: &str,
    context: &str,
) -> Result<u64, ConfigError> {
    let number = expect_u64(value, path, context)?;
    if number < min || number > max {
        return Err(invalid_value(
            path,
            &format!("must be between {min} and {max} (got {number})"),
            context,
        ));
    }
    Ok(number)
}

/// Expect an array whose entries are all strings.
pub fn expect_string_list(
    value: &Value,
    path: &str,
    context: &str,
) -> Result<Vec<String>, ConfigError> {
    let values = expect_array(value, path, context)?;
    values
        .iter()
        .enumerate()
        .map(|(idx, entry)| {
            expect_str(entry, &index_path(path, idx), context).map(ToString::to_string)
        })
        .collect()
}

/// Accept either a single string or an array of strings.
pub fn expect_one_or_many_str(
    value: &Value,
    path: &str,
    context: &str,
) -> Result<Vec<String>, ConfigError> {
    match value {
        Value::String(single) => Ok(vec![single.clone()]),
        Value::Array(_) => expect_string_list(value, path, context),
        _ => Err(type_mismatch(value, ValueKind::Array, path, context)),
    }
}

/// Join nested paths for error messages.
pub fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Path of an array element.
pub fn index_path(prefix: &str, idx: usize) -> String {
    format!("{prefix}[{idx}]")
}

/// Build a structured type mismatch error.
pub fn type_mismatch(value: &Value, expected: ValueKind, path: &str, context: &str) -> ConfigError {
    ConfigError::TypeMismatch {
        context: context.to_string(),
        path: normalize_path(path),
        expected,
        actual: ValueKind::of(value),
    }
}

/// Build a structured invalid-value error.
pub fn invalid_value(path: &str, message: &str, context: &str) -> ConfigError {
    ConfigError::InvalidValue {
        context: context.to_string(),
        path: normalize_path(path),
        message: message.to_string(),
    }
}

fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        "root".to_string()
    } else {
        path.to_string()
    }
}
