//! Error types for config resolution and validation.

use crate::validate::ValueKind;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A single failure raised while loading, resolving, or validating config.
///
/// Every validation variant carries the resource context it was raised for
/// (kind, name and folder or fragment file) so the message can be acted on
/// without knowing engine internals.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The resource folder does not exist.
    #[error("resource folder not found: {}", path.display())]
    FolderNotFound { path: PathBuf },
    /// The resource folder contains no fragment matching the kind's patterns.
    #[error("no config fragments matching {pattern} in {}", folder.display())]
    NoFragments { folder: PathBuf, pattern: String },
    /// A fragment glob could not be compiled.
    #[error("invalid fragment pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
    /// Reading a fragment or folder failed.
    #[error("failed to read {}: {source}", path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Parsing a fragment failed.
    #[error("failed to parse {}: {source}", path.display())]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: json5::Error,
    },
    /// One or more required fields are absent.
    #[error("{context} missing required fields: {}", fields.join(", "))]
    MissingField {
        context: String,
        fields: Vec<String>,
    },
    /// A field exists but has the wrong shape.
    #[error("{context} field '{path}' must be {expected}, got {actual}")]
    TypeMismatch {
        context: String,
        path: String,
        expected: ValueKind,
        actual: ValueKind,
    },
    /// A placeholder transitively refers to itself.
    #[error(
        "{context} field '{field}' has a cyclic placeholder reference: {}",
        cycle.join(" -> ")
    )]
    CyclicReference {
        context: String,
        field: String,
        cycle: Vec<String>,
    },
    /// A placeholder names neither a variable nor a config key.
    #[error("{context} field '{field}' references unresolved placeholder '${{{token}}}'")]
    UnresolvedPlaceholder {
        context: String,
        field: String,
        token: String,
    },
    /// A table or index key schema is malformed.
    #[error("{context} has an invalid key schema at '{path}': {message}")]
    InvalidKeySchema {
        context: String,
        path: String,
        message: String,
    },
    /// A policy statement is malformed.
    #[error("{context} has an invalid policy statement at '{path}': {message}")]
    InvalidPolicyStatement {
        context: String,
        path: String,
        message: String,
    },
    /// A function handler does not point at a source file.
    #[error("{context} handler '{handler}' is invalid: {message}")]
    InvalidHandler {
        context: String,
        handler: String,
        message: String,
    },
    /// A streaming API route is malformed.
    #[error("{context} has an invalid route at '{path}': {message}")]
    InvalidRoute {
        context: String,
        path: String,
        message: String,
    },
    /// A field value is outside its allowed set or range.
    #[error("{context} field '{path}' {message}")]
    InvalidValue {
        context: String,
        path: String,
        message: String,
    },
    /// An object carries a key that is not part of its schema.
    #[error("{context} has unknown key '{path}'")]
    UnknownKey { context: String, path: String },
    /// A field names another resource that was not built.
    #[error("{context} field '{path}' references unknown {target} '{name}'")]
    UnknownReference {
        context: String,
        path: String,
        target: String,
        name: String,
    },
}

impl ConfigError {
    /// Resource context the error was raised for, if any.
    pub fn context(&self) -> Option<&str> {
        match self {
            Self::MissingField { context, .. }
            | Self::TypeMismatch { context, .. }
            | Self::CyclicReference { context, .. }
            | Self::UnresolvedPlaceholder { context, .. }
            | Self::InvalidKeySchema { context, .. }
            | Self::InvalidPolicyStatement { context, .. }
            | Self::InvalidHandler { context, .. }
            | Self::InvalidRoute { context, .. }
            | Self::InvalidValue { context, .. }
            | Self::UnknownKey { context, .. }
            | Self::UnknownReference { context, .. } => Some(context),
            Self::FolderNotFound { .. }
            | Self::NoFragments { .. }
            | Self::InvalidPattern { .. }
            | Self::ReadFailed { .. }
            | Self::ParseFailed { .. } => None,
        }
    }

    /// Field path the error points at, if it concerns a single field.
    pub fn field_path(&self) -> Option<&str> {
        match self {
            Self::TypeMismatch { path, .. }
            | Self::InvalidKeySchema { path, .. }
            | Self::InvalidPolicyStatement { path, .. }
            | Self::InvalidRoute { path, .. }
            | Self::InvalidValue { path, .. }
            | Self::UnknownKey { path, .. }
            | Self::UnknownReference { path, .. } => Some(path),
            Self::CyclicReference { field, .. } | Self::UnresolvedPlaceholder { field, .. } => {
                Some(field)
            }
            Self::InvalidHandler { .. } => Some("handler"),
            _ => None,
        }
    }
}

/// One or more failures collected from independent checks.
///
/// A report never accompanies a successful value: callers either get a fully
/// valid result or a report.
#[derive(Debug, Default)]
pub struct ErrorReport {
    errors: Vec<ConfigError>,
}

impl ErrorReport {
    /// Create an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a single failure.
    pub fn push(&mut self, error: ConfigError) {
        self.errors.push(error);
    }

    /// Append every failure from another report.
    pub fn extend(&mut self, other: ErrorReport) {
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Failures in the order they were recorded.
    pub fn errors(&self) -> &[ConfigError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<ConfigError> {
        self.errors
    }

    /// Human-readable message for every failure.
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }

    /// First recorded failure, used by fail-fast entry points.
    pub fn into_first(self) -> Option<ConfigError> {
        self.errors.into_iter().next()
    }

    /// Return `value` when the report is empty, otherwise the report itself.
    pub fn into_result<T>(self, value: T) -> Result<T, ErrorReport> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl From<ConfigError> for ErrorReport {
    fn from(error: ConfigError) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => write!(f, "no configuration errors"),
            [single] => write!(f, "{single}"),
            errors => {
                write!(f, "{} configuration errors:", errors.len())?;
                for error in errors {
                    write!(f, "\n  - {error}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ErrorReport {}
