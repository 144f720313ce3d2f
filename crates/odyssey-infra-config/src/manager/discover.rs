//! IO helpers for discovering and reading config fragments from disk.

use crate::{ConfigError, ConfigFragment, Defaults, ResourceKind};
use globset::{Glob, GlobSet, GlobSetBuilder};
use log::{debug, warn};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

impl ConfigFragment {
    /// Read and parse a single fragment file (JSON or JSON5).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("loading config fragment (path={})", path.display());
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let value: Value = json5::from_str(&contents).map_err(|source| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            source,
        })?;
        ConfigFragment::from_value(path, value)
    }
}

/// Compile the fragment globs for a resource kind.
pub(crate) fn fragment_matcher(kind: ResourceKind) -> Result<GlobSet, ConfigError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in kind.fragment_patterns() {
        let glob = Glob::new(pattern).map_err(|err| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            message: err.to_string(),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|err| ConfigError::InvalidPattern {
        pattern: kind.fragment_patterns().join(", "),
        message: err.to_string(),
    })
}

/// List fragment files of a folder, sorted by file name.
///
/// Ordering is byte-wise on the UTF-8 file name, so it is case-sensitive and
/// independent of the platform's directory iteration order.
pub(super) fn fragment_paths(
    kind: ResourceKind,
    folder: &Path,
) -> Result<Vec<(String, PathBuf)>, ConfigError> {
    if !folder.is_dir() {
        return Err(ConfigError::FolderNotFound {
            path: folder.to_path_buf(),
        });
    }
    let matcher = fragment_matcher(kind)?;
    let entries = fs::read_dir(folder).map_err(|source| ConfigError::ReadFailed {
        path: folder.to_path_buf(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ConfigError::ReadFailed {
            path: folder.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            warn!(
                "skipping fragment with non UTF-8 name (path={})",
                path.display()
            );
            continue;
        };
        if matcher.is_match(&name) {
            paths.push((name, path));
        }
    }
    paths.sort_by(|(left, _), (right, _)| left.as_bytes().cmp(right.as_bytes()));

    if paths.is_empty() {
        return Err(ConfigError::NoFragments {
            folder: folder.to_path_buf(),
            pattern: kind.fragment_patterns().join(" | "),
        });
    }
    Ok(paths)
}

/// Discover and load every fragment of a resource folder, in merge order.
pub(super) fn discover_fragments(
    kind: ResourceKind,
    folder: &Path,
) -> Result<Vec<ConfigFragment>, ConfigError> {
    let paths = fragment_paths(kind, folder)?;
    debug!(
        "discovered fragments (kind={}, folder={}, count={})",
        kind,
        folder.display(),
        paths.len()
    );
    paths
        .into_iter()
        .map(|(_, path)| ConfigFragment::load(&path))
        .collect()
}

/// Relative, `/`-separated paths of every file under `folder`.
pub(super) fn list_source_files(folder: &Path) -> BTreeSet<String> {
    WalkDir::new(folder)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(folder).ok()?;
            let parts = relative
                .components()
                .map(|part| part.as_os_str().to_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()?;
            Some(parts.join("/"))
        })
        .collect()
}

/// Load per-kind defaults from `<dir>/<stem>.json` or `<dir>/<stem>.json5`.
///
/// Kinds without a defaults file get no defaults layer.
pub fn load_defaults(dir: impl AsRef<Path>) -> Result<Defaults, ConfigError> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(ConfigError::FolderNotFound {
            path: dir.to_path_buf(),
        });
    }
    let mut defaults = Defaults::new();
    for kind in ResourceKind::ALL {
        for extension in ["json", "json5"] {
            let path = dir.join(format!("{}.{extension}", kind.defaults_stem()));
            if !path.is_file() {
                continue;
            }
            debug!(
                "loading defaults (kind={}, path={})",
                kind,
                path.display()
            );
            let fragment = ConfigFragment::load(&path)?;
            defaults = defaults.with(kind, fragment.values().clone());
            break;
        }
    }
    Ok(defaults)
}
