use crate::config::CompletionKey;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use uavmon_instances::InstanceName;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("input root not found: {0}")]
    RootMissing(PathBuf),
    #[error("failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Base-name filter: optional prefix plus a fixed file-type suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamePattern {
    pub prefix: Option<String>,
    pub suffix: String,
}

impl NamePattern {
    pub fn new(prefix: Option<&str>, suffix: &str) -> Self {
        Self {
            prefix: prefix.filter(|p| !p.is_empty()).map(str::to_string),
            suffix: suffix.to_string(),
        }
    }

    pub fn matches(&self, file_name: &str) -> bool {
        file_name.ends_with(&self.suffix)
            && self
                .prefix
                .as_deref()
                .map_or(true, |p| file_name.starts_with(p))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    /// Relative path from the input root, `/`-separated. Unique per run.
    pub id: String,
    pub path: PathBuf,
    pub base_name: String,
}

impl Instance {
    pub fn from_relative(root: &Path, relative: &Path) -> Self {
        let id = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/");
        let base_name = relative
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| id.clone());
        Self {
            id,
            path: root.join(relative),
            base_name,
        }
    }

    pub fn key(&self, policy: CompletionKey) -> &str {
        match policy {
            CompletionKey::BaseName => &self.base_name,
            CompletionKey::RelativePath => &self.id,
        }
    }

    /// Summary grouping, taken from the instance name; `other` when unparseable.
    pub fn family(&self) -> String {
        InstanceName::parse(&self.base_name)
            .map(|n| n.family)
            .unwrap_or_else(|_| "other".to_string())
    }
}

/// Recursively lists files under `root` whose base name matches `pattern`,
/// ordered by relative path.
pub fn discover_instances(
    root: &Path,
    pattern: &NamePattern,
) -> Result<Vec<Instance>, DiscoveryError> {
    if !root.is_dir() {
        return Err(DiscoveryError::RootMissing(root.to_path_buf()));
    }
    let mut found = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(source) if source.depth() == 0 => {
                return Err(DiscoveryError::Walk {
                    path: root.to_path_buf(),
                    source,
                })
            }
            Err(err) => {
                tracing::warn!(
                    path = ?err.path(),
                    error = %err,
                    "skipping unreadable entry under input root"
                );
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            tracing::warn!(path = %entry.path().display(), "skipping non UTF-8 file name");
            continue;
        };
        if !pattern.matches(name) {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        found.push(Instance::from_relative(root, relative));
    }
    found.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(found)
}

pub fn key_collisions(instances: &[Instance], policy: CompletionKey) -> Vec<Vec<&Instance>> {
    let mut by_key: BTreeMap<&str, Vec<&Instance>> = BTreeMap::new();
    for inst in instances {
        by_key.entry(inst.key(policy)).or_default().push(inst);
    }
    by_key.into_values().filter(|v| v.len() > 1).collect()
}
