use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uavmon_core::ensure_dir;
use uavmon_instances::INSTANCE_SUFFIX;

pub const DISPATCH_FILE: &str = "dispatch.yaml";

#[derive(Debug, Error)]
pub enum PreconditionError {
    #[error("solver executable not found: {0}")]
    ExecutableMissing(PathBuf),
    #[error("solver executable is not executable: {0}")]
    ExecutableNotRunnable(PathBuf),
    #[error("solver configuration not found: {0}")]
    ConfigMissing(PathBuf),
    #[error("input root not found: {0}")]
    InputRootMissing(PathBuf),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionKey {
    /// File name only; same-named files in different directories share a key.
    #[default]
    BaseName,
    RelativePath,
}

impl CompletionKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionKey::BaseName => "base_name",
            CompletionKey::RelativePath => "relative_path",
        }
    }
}

/// Everything the dispatcher needs to know about the project layout,
/// resolved to absolute paths once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    pub root: PathBuf,
    pub input_dir: PathBuf,
    pub executable: PathBuf,
    pub solver_config: PathBuf,
    pub summary_results: PathBuf,
    pub detail_results: PathBuf,
    pub log_dir: PathBuf,
    pub completion_file: PathBuf,
    pub suffix: String,
    pub completion_key: CompletionKey,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DispatchFile {
    #[serde(default)]
    input_dir: Option<PathBuf>,
    #[serde(default)]
    executable: Option<PathBuf>,
    #[serde(default)]
    solver_config: Option<PathBuf>,
    #[serde(default)]
    summary_results: Option<PathBuf>,
    #[serde(default)]
    detail_results: Option<PathBuf>,
    #[serde(default)]
    log_dir: Option<PathBuf>,
    #[serde(default)]
    completion_file: Option<PathBuf>,
    #[serde(default)]
    suffix: Option<String>,
    #[serde(default)]
    completion_key: Option<CompletionKey>,
}

impl DispatchConfig {
    pub fn with_root(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            input_dir: root.join("input"),
            executable: root.join("bin").join("solver"),
            solver_config: root.join("config").join("solver.cfg"),
            summary_results: root.join("results").join("summary.txt"),
            detail_results: root.join("results").join("detail.txt"),
            log_dir: root.join("logs"),
            completion_file: root.join("solved.txt"),
            suffix: INSTANCE_SUFFIX.to_string(),
            completion_key: CompletionKey::default(),
        }
    }

    /// Default layout overlaid with `<root>/dispatch.yaml` when present.
    pub fn load(root: &Path) -> Result<Self> {
        let mut config = Self::with_root(root);
        let path = root.join(DISPATCH_FILE);
        if !path.exists() {
            return Ok(config);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let file: DispatchFile = if raw.trim().is_empty() {
            DispatchFile::default()
        } else {
            serde_yaml::from_str(&raw)
                .with_context(|| format!("invalid dispatch file {}", path.display()))?
        };
        config.apply(file)?;
        Ok(config)
    }

    fn apply(&mut self, file: DispatchFile) -> Result<()> {
        let root = self.root.clone();
        let resolve = |p: PathBuf| if p.is_absolute() { p } else { root.join(p) };
        if let Some(p) = file.input_dir {
            self.input_dir = resolve(p);
        }
        if let Some(p) = file.executable {
            self.executable = resolve(p);
        }
        if let Some(p) = file.solver_config {
            self.solver_config = resolve(p);
        }
        if let Some(p) = file.summary_results {
            self.summary_results = resolve(p);
        }
        if let Some(p) = file.detail_results {
            self.detail_results = resolve(p);
        }
        if let Some(p) = file.log_dir {
            self.log_dir = resolve(p);
        }
        if let Some(p) = file.completion_file {
            self.completion_file = resolve(p);
        }
        if let Some(suffix) = file.suffix {
            if suffix.is_empty() {
                return Err(anyhow!("dispatch file: suffix cannot be empty"));
            }
            self.suffix = suffix;
        }
        if let Some(key) = file.completion_key {
            self.completion_key = key;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), PreconditionError> {
        if !self.executable.is_file() {
            return Err(PreconditionError::ExecutableMissing(self.executable.clone()));
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&self.executable)
                .map(|m| m.permissions().mode())
                .unwrap_or(0);
            if mode & 0o111 == 0 {
                return Err(PreconditionError::ExecutableNotRunnable(
                    self.executable.clone(),
                ));
            }
        }
        if !self.solver_config.is_file() {
            return Err(PreconditionError::ConfigMissing(self.solver_config.clone()));
        }
        if !self.input_dir.is_dir() {
            return Err(PreconditionError::InputRootMissing(self.input_dir.clone()));
        }
        Ok(())
    }

    pub fn prepare_outputs(&self) -> Result<()> {
        ensure_dir(&self.log_dir)?;
        for path in [
            &self.summary_results,
            &self.detail_results,
            &self.completion_file,
        ] {
            if let Some(parent) = path.parent() {
                ensure_dir(parent)?;
            }
        }
        Ok(())
    }
}

/// Walks up from `start` looking for a directory holding `dispatch.yaml`;
/// falls back to `start` itself.
pub fn find_project_root(start: &Path) -> PathBuf {
    let mut cur = Some(start);
    while let Some(p) = cur {
        if p.join(DISPATCH_FILE).is_file() {
            return p.to_path_buf();
        }
        cur = p.parent();
    }
    start.to_path_buf()
}

pub fn install_root() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("cannot locate the running executable")?;
    let exe = exe.canonicalize().unwrap_or(exe);
    let dir = exe
        .parent()
        .ok_or_else(|| anyhow!("executable has no parent directory: {}", exe.display()))?;
    Ok(find_project_root(dir))
}
