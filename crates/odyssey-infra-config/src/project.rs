//! Project-wide settings (`project.json`) and the placeholder variables they
//! provide to every resource.

use crate::validate::{self, join_path};
use crate::{ConfigError, ConfigFragment, Variables};
use log::debug;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;

/// Default settings file name at the project root.
pub const PROJECT_FILE: &str = "project.json";

const CONTEXT: &str = "project settings";

/// Repository coordinates used by deployment tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GithubSettings {
    pub owner: String,
    pub repo: String,
}

/// Settings of the selected deployment environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentSettings {
    pub name: String,
    pub account_id: String,
    pub region: String,
    pub branch: Option<String>,
    pub connection_id: Option<String>,
    pub connection_arn: Option<String>,
}

impl EnvironmentSettings {
    /// Explicit connection ARN, or one derived from the connection id.
    pub fn resolved_connection_arn(&self) -> Option<String> {
        if let Some(arn) = &self.connection_arn {
            return Some(arn.clone());
        }
        self.connection_id.as_ref().map(|id| {
            format!(
                "arn:{}:codestar-connections:{}:{}:connection/{id}",
                partition_for_region(&self.region),
                self.region,
                self.account_id
            )
        })
    }
}

/// Parsed `project.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectSettings {
    pub env: EnvironmentSettings,
    pub github: GithubSettings,
}

impl ProjectSettings {
    /// Load settings from a JSON/JSON5 file.
    ///
    /// `env_override` selects the environment instead of the file's `env` key.
    pub fn load(path: impl AsRef<Path>, env_override: Option<&str>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("loading project settings (path={})", path.display());
        let fragment = ConfigFragment::load(path)?;
        Self::from_map(fragment.values(), env_override)
    }

    /// Parse settings from an already-loaded document.
    pub fn from_value(value: &Value, env_override: Option<&str>) -> Result<Self, ConfigError> {
        let map = validate::expect_object(value, "", CONTEXT)?;
        Self::from_map(map, env_override)
    }

    fn from_map(map: &Map<String, Value>, env_override: Option<&str>) -> Result<Self, ConfigError> {
        let env_name = match env_override {
            Some(name) => Some(name.to_string()),
            None => optional_str(map, "env", "")?,
        }
        .map(|name| name.to_ascii_lowercase());

        let mut missing = Vec::new();
        let region = optional_str(map, "region", "")?;
        if region.is_none() {
            missing.push("region".to_string());
        }

        let env_section = match &env_name {
            Some(name) => optional_object(map, name, "")?,
            None => {
                missing.push("env".to_string());
                None
            }
        };
        let env_path = env_name.clone().unwrap_or_default();
        let account_id = match env_section {
            Some(section) => optional_str(section, "account_id", &env_path)?,
            None => None,
        };
        if account_id.is_none() && env_name.is_some() {
            missing.push(join_path(&env_path, "account_id"));
        }

        let github = optional_object(map, "github", "")?;
        let (owner, repo) = match github {
            Some(github) => (
                optional_str(github, "owner", "github")?,
                optional_str(github, "repo", "github")?,
            ),
            None => (None, None),
        };
        if owner.is_none() {
            missing.push("github.owner".to_string());
        }
        if repo.is_none() {
            missing.push("github.repo".to_string());
        }

        let (Some(name), Some(region), Some(account_id), Some(owner), Some(repo)) =
            (env_name, region, account_id, owner, repo)
        else {
            return Err(ConfigError::MissingField {
                context: CONTEXT.to_string(),
                fields: missing,
            });
        };

        let (branch, connection_id, connection_arn) = match env_section {
            Some(section) => (
                optional_str(section, "branch", &env_path)?,
                optional_str(section, "connection_id", &env_path)?,
                optional_str(section, "connection_arn", &env_path)?,
            ),
            None => (None, None, None),
        };

        Ok(Self {
            env: EnvironmentSettings {
                name,
                account_id,
                region,
                branch,
                connection_id,
                connection_arn,
            },
            github: GithubSettings { owner, repo },
        })
    }

    /// Placeholder variables every resource can reference.
    pub fn variables(&self) -> Variables {
        let mut variables = Variables::new();
        variables.insert("EnvName".to_string(), self.env.name.clone());
        variables.insert("AccountId".to_string(), self.env.account_id.clone());
        variables.insert("Region".to_string(), self.env.region.clone());
        variables.insert(
            "Partition".to_string(),
            partition_for_region(&self.env.region).to_string(),
        );
        variables.insert("GithubOwner".to_string(), self.github.owner.clone());
        variables.insert("GithubRepo".to_string(), self.github.repo.clone());
        if let Some(branch) = &self.env.branch {
            variables.insert("Branch".to_string(), branch.clone());
        }
        if let Some(id) = &self.env.connection_id {
            variables.insert("ConnectionId".to_string(), id.clone());
        }
        if let Some(arn) = self.env.resolved_connection_arn() {
            variables.insert("ConnectionArn".to_string(), arn);
        }
        variables
    }
}

/// ARN partition of a region.
pub fn partition_for_region(region: &str) -> &'static str {
    if region.starts_with("cn-") {
        "aws-cn"
    } else if region.starts_with("us-gov-") {
        "aws-us-gov"
    } else {
        "aws"
    }
}

/// A present, non-blank string; blank and `null` count as missing.
fn optional_str(
    map: &Map<String, Value>,
    key: &str,
    prefix: &str,
) -> Result<Option<String>, ConfigError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => {
            let text = validate::expect_str(value, &join_path(prefix, key), CONTEXT)?;
            Ok(Some(text.trim().to_string()).filter(|text| !text.is_empty()))
        }
    }
}

fn optional_object<'a>(
    map: &'a Map<String, Value>,
    key: &str,
    prefix: &str,
) -> Result<Option<&'a Map<String, Value>>, ConfigError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => validate::expect_object(value, &join_path(prefix, key), CONTEXT).map(Some),
    }
}
