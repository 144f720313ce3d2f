//! On-disk layout of an infrastructure project.

use crate::manager::{fragment_matcher, has_fragments};
use crate::{
    ConfigError, Defaults, PROJECT_FILE, ProjectSettings, ResourceKind, ResourceSource,
    load_defaults,
};
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const TABLES_DIR: &str = "configs/tables";
const POLICIES_DIR: &str = "configs/iam/policies";
const WS_APIS_DIR: &str = "configs/apis/ws";
const DEFAULTS_DIR: &str = "configs/defaults";
const FUNCTIONS_DIR: &str = "lambda_src";
const ROUTES_DIR: &str = "routes";

/// Directory map of a project rooted at one folder.
///
/// ```text
/// project.json
/// configs/tables/<table>/*.json
/// configs/iam/policies/<policy>/*.json
/// configs/apis/ws/<api>/*.json + routes/**/*.json
/// configs/defaults/<kind>.json
/// lambda_src/<function>/config*.json + sources
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_file(&self) -> PathBuf {
        self.root.join(PROJECT_FILE)
    }

    pub fn defaults_dir(&self) -> PathBuf {
        self.root.join(DEFAULTS_DIR)
    }

    /// Parent folder holding one subfolder per resource of `kind`.
    ///
    /// Routes live under their API, see [`ProjectLayout::routes_dir`].
    pub fn kind_dir(&self, kind: ResourceKind) -> PathBuf {
        match kind {
            ResourceKind::Table => self.root.join(TABLES_DIR),
            ResourceKind::Function => self.root.join(FUNCTIONS_DIR),
            ResourceKind::Policy => self.root.join(POLICIES_DIR),
            ResourceKind::WebSocketApi | ResourceKind::WebSocketRoute => {
                self.root.join(WS_APIS_DIR)
            }
        }
    }

    /// Folder of one named resource.
    pub fn resource_dir(&self, kind: ResourceKind, name: &str) -> PathBuf {
        self.kind_dir(kind).join(name)
    }

    pub fn routes_dir(&self, api: &str) -> PathBuf {
        self.resource_dir(ResourceKind::WebSocketApi, api).join(ROUTES_DIR)
    }

    /// Load `project.json`.
    pub fn load_settings(
        &self,
        env_override: Option<&str>,
    ) -> Result<ProjectSettings, ConfigError> {
        ProjectSettings::load(self.project_file(), env_override)
    }

    /// Load explicit defaults; a project without a defaults folder has none.
    pub fn load_defaults(&self) -> Result<Defaults, ConfigError> {
        let dir = self.defaults_dir();
        if !dir.is_dir() {
            debug!("no defaults folder (path={})", dir.display());
            return Ok(Defaults::new());
        }
        load_defaults(dir)
    }

    /// Resource folders of `kind`, sorted by name.
    ///
    /// A project without the kind's parent folder has no such resources.
    /// Function folders without any `config*` fragment are shared code and
    /// are skipped with a warning.
    pub fn sources(&self, kind: ResourceKind) -> Result<Vec<ResourceSource>, ConfigError> {
        if kind == ResourceKind::WebSocketRoute {
            return Err(ConfigError::InvalidValue {
                context: "project layout".to_string(),
                path: "kind".to_string(),
                message: "routes are listed per API, not per project".to_string(),
            });
        }
        let dir = self.kind_dir(kind);
        if !dir.is_dir() {
            debug!("no {kind} folder (path={})", dir.display());
            return Ok(Vec::new());
        }
        let mut folders = subfolders(&dir)?;
        folders.sort();

        let mut sources = Vec::with_capacity(folders.len());
        for folder in folders {
            if kind == ResourceKind::Function && !has_fragments(kind, &folder)? {
                warn!(
                    "skipping function folder without config fragments (path={})",
                    folder.display()
                );
                continue;
            }
            sources.push(ResourceSource::folder(kind, folder));
        }
        debug!("listed {kind} sources (count={})", sources.len());
        Ok(sources)
    }

    /// Route files of an API, recursively, sorted by relative path.
    pub fn route_sources(&self, api: &str) -> Result<Vec<ResourceSource>, ConfigError> {
        let dir = self.routes_dir(api);
        if !dir.is_dir() {
            return Err(ConfigError::FolderNotFound { path: dir });
        }
        let matcher = fragment_matcher(ResourceKind::WebSocketRoute)?;

        let mut files = Vec::new();
        for entry in WalkDir::new(&dir).sort_by_file_name() {
            let entry = entry.map_err(|err| ConfigError::ReadFailed {
                path: dir.clone(),
                source: err.into(),
            })?;
            if entry.file_type().is_file() && matcher.is_match(entry.file_name()) {
                files.push(entry.into_path());
            }
        }
        files.sort();
        Ok(files
            .into_iter()
            .map(|path| ResourceSource::file(ResourceKind::WebSocketRoute, path))
            .collect())
    }
}

fn subfolders(dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let entries = fs::read_dir(dir).map_err(|source| ConfigError::ReadFailed {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut folders = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ConfigError::ReadFailed {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() {
            folders.push(path);
        }
    }
    Ok(folders)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn touch(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("dir");
        }
        fs::write(path, contents).expect("write");
    }

    fn names(sources: &[ResourceSource]) -> Vec<String> {
        sources.iter().map(ResourceSource::name).collect()
    }

    #[test]
    fn lists_resource_folders_in_name_order() {
        let temp = TempDir::new().expect("tmp");
        let layout = ProjectLayout::new(temp.path());
        touch(&layout.resource_dir(ResourceKind::Table, "users").join("table.json"), "{}");
        touch(&layout.resource_dir(ResourceKind::Table, "orders").join("table.json"), "{}");

        let sources = layout.sources(ResourceKind::Table).expect("sources");
        assert_eq!(names(&sources), vec!["orders", "users"]);
        assert!(layout.sources(ResourceKind::Policy).expect("none").is_empty());
    }

    #[test]
    fn skips_function_folders_without_config() {
        let temp = TempDir::new().expect("tmp");
        let layout = ProjectLayout::new(temp.path());
        touch(&layout.resource_dir(ResourceKind::Function, "chat").join("config.json"), "{}");
        touch(&layout.resource_dir(ResourceKind::Function, "shared").join("util.py"), "");

        let sources = layout.sources(ResourceKind::Function).expect("sources");
        assert_eq!(names(&sources), vec!["chat"]);
    }

    #[test]
    fn route_files_are_found_recursively() {
        let temp = TempDir::new().expect("tmp");
        let layout = ProjectLayout::new(temp.path());
        let routes = layout.routes_dir("chat");
        touch(&routes.join("connect.json"), "{}");
        touch(&routes.join("admin/ban.json5"), "{}");
        touch(&routes.join("notes.txt"), "");

        let sources = layout.route_sources("chat").expect("routes");
        assert_eq!(names(&sources), vec!["ban", "connect"]);
        assert!(matches!(
            layout.route_sources("missing"),
            Err(ConfigError::FolderNotFound { .. })
        ));
    }

    #[test]
    fn missing_defaults_folder_means_no_defaults() {
        let temp = TempDir::new().expect("tmp");
        let defaults = ProjectLayout::new(temp.path()).load_defaults().expect("defaults");
        assert!(defaults.is_empty());
    }
}
