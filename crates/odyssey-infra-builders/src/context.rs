//! Read-only context shared by every builder of one stack.

use serde::Serialize;
use std::collections::BTreeSet;

/// Environment whose resources are retained on stack deletion.
pub const RETAINED_ENV: &str = "main";

/// What happens to a stateful resource when its stack is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemovalPolicy {
    Retain,
    Destroy,
}

impl RemovalPolicy {
    /// `RETAIN` for the production environment, `DESTROY` elsewhere.
    pub fn for_env(env_name: &str) -> Self {
        if env_name == RETAINED_ENV {
            Self::Retain
        } else {
            Self::Destroy
        }
    }
}

/// Environment name plus the logical names of resources already built.
///
/// Builders use it to check cross-resource references; they never mutate it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildContext {
    env_name: String,
    tables: BTreeSet<String>,
    functions: BTreeSet<String>,
    policies: BTreeSet<String>,
}

impl BuildContext {
    pub fn new(env_name: impl Into<String>) -> Self {
        Self {
            env_name: env_name.into(),
            ..Self::default()
        }
    }

    pub fn env_name(&self) -> &str {
        &self.env_name
    }

    pub fn removal_policy(&self) -> RemovalPolicy {
        RemovalPolicy::for_env(&self.env_name)
    }

    pub fn with_table(mut self, name: impl Into<String>) -> Self {
        self.tables.insert(name.into());
        self
    }

    pub fn with_tables<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_function(mut self, name: impl Into<String>) -> Self {
        self.functions.insert(name.into());
        self
    }

    pub fn with_functions<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.functions.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_policy(mut self, name: impl Into<String>) -> Self {
        self.policies.insert(name.into());
        self
    }

    pub fn with_policies<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policies.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains(name)
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains(name)
    }

    pub fn has_policy(&self, name: &str) -> bool {
        self.policies.contains(name)
    }
}
