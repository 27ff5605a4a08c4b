//! Persisted record of solved instances.
//!
//! The file form is one key per line, append-only during a run. Lookups
//! re-read the file so that keys appended by sibling dispatcher processes
//! are honored before an instance is dispatched.

use crate::config::CompletionKey;
use crate::discovery::Instance;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use uavmon_core::{atomic_write_bytes, ensure_dir};

pub trait CompletionStore {
    fn contains(&self, key: &str) -> Result<bool>;

    fn append(&mut self, key: &str) -> Result<()>;

    fn keys(&self) -> Result<BTreeSet<String>>;

    fn remove(&mut self, key: &str) -> Result<bool>;
}

pub fn is_completed(
    instance: &Instance,
    store: &dyn CompletionStore,
    policy: CompletionKey,
) -> Result<bool> {
    store.contains(instance.key(policy))
}

#[derive(Debug, Clone)]
pub struct FileCompletionStore {
    path: PathBuf,
}

impl FileCompletionStore {
    /// Opens the store, creating an empty file if none exists yet.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            ensure_dir(parent)?;
        }
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("cannot open completion file {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current keys as an in-memory store; a missing file is not created.
    pub fn snapshot(path: &Path) -> Result<MemoryCompletionStore> {
        let raw = read_raw(path)?;
        Ok(MemoryCompletionStore::with_keys(parse_lines(&raw)))
    }

    fn read_keys(&self) -> Result<BTreeSet<String>> {
        let raw = read_raw(&self.path)?;
        Ok(parse_lines(&raw).map(str::to_string).collect())
    }
}

fn read_raw(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(raw),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(e) => {
            Err(e).with_context(|| format!("cannot read completion file {}", path.display()))
        }
    }
}

fn parse_lines(raw: &str) -> impl Iterator<Item = &str> {
    raw.lines().map(str::trim).filter(|l| !l.is_empty())
}

impl CompletionStore for FileCompletionStore {
    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.read_keys()?.contains(key))
    }

    fn append(&mut self, key: &str) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("cannot open completion file {}", self.path.display()))?;
        // A torn last line from an interrupted writer must not swallow this key.
        let needs_newline = fs::read(&self.path)
            .map(|b| b.last().is_some_and(|c| *c != b'\n'))
            .unwrap_or(false);
        let line = if needs_newline {
            format!("\n{}\n", key)
        } else {
            format!("{}\n", key)
        };
        file.write_all(line.as_bytes())?;
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    fn keys(&self) -> Result<BTreeSet<String>> {
        self.read_keys()
    }

    fn remove(&mut self, key: &str) -> Result<bool> {
        let raw = read_raw(&self.path)?;
        let mut removed = false;
        let mut kept = String::with_capacity(raw.len());
        for line in parse_lines(&raw) {
            if line == key {
                removed = true;
            } else {
                kept.push_str(line);
                kept.push('\n');
            }
        }
        if removed {
            atomic_write_bytes(&self.path, kept.as_bytes())?;
        }
        Ok(removed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCompletionStore {
    keys: BTreeSet<String>,
}

impl MemoryCompletionStore {
    pub fn with_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

impl CompletionStore for MemoryCompletionStore {
    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.keys.contains(key))
    }

    fn append(&mut self, key: &str) -> Result<()> {
        self.keys.insert(key.to_string());
        Ok(())
    }

    fn keys(&self) -> Result<BTreeSet<String>> {
        Ok(self.keys.clone())
    }

    fn remove(&mut self, key: &str) -> Result<bool> {
        Ok(self.keys.remove(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_missing_file_empty() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("state").join("solved.txt");
        let store = FileCompletionStore::open(&path).expect("open");
        assert!(path.is_file());
        assert!(store.keys().expect("keys").is_empty());
        assert!(!store.contains("C1N10D20T12V1.txt").expect("contains"));
    }

    #[test]
    fn append_is_visible_and_monotonic() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("solved.txt");
        let mut store = FileCompletionStore::open(&path).expect("open");
        store.append("C1N10D20T12V1.txt").expect("append");
        store.append("R1N5D10T6V2.txt").expect("append");
        assert!(store.contains("C1N10D20T12V1.txt").expect("contains"));
        assert_eq!(
            fs::read_to_string(&path).expect("read"),
            "C1N10D20T12V1.txt\nR1N5D10T6V2.txt\n"
        );
    }

    #[test]
    fn lookups_see_appends_from_other_writers() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("solved.txt");
        let store = FileCompletionStore::open(&path).expect("open");
        let mut sibling = FileCompletionStore::open(&path).expect("open sibling");
        assert!(!store.contains("C1N10D20T12V1.txt").expect("contains"));
        sibling.append("C1N10D20T12V1.txt").expect("append");
        assert!(store.contains("C1N10D20T12V1.txt").expect("contains"));
    }

    #[test]
    fn blank_lines_whitespace_and_torn_tail_are_tolerated() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("solved.txt");
        fs::write(&path, "  C1N10D20T12V1.txt \n\n R1N5").expect("seed");
        let mut store = FileCompletionStore::open(&path).expect("open");
        assert!(store.contains("C1N10D20T12V1.txt").expect("contains"));
        store.append("R1N5D10T6V2.txt").expect("append");
        assert!(store.contains("R1N5D10T6V2.txt").expect("contains"));
        assert!(store.contains("R1N5").expect("torn line kept as its own key"));
    }

    #[test]
    fn remove_drops_only_the_named_key() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("solved.txt");
        fs::write(&path, "a.txt\nb.txt\nc.txt\n").expect("seed");
        let mut store = FileCompletionStore::open(&path).expect("open");
        assert!(store.remove("b.txt").expect("remove"));
        assert!(!store.remove("b.txt").expect("remove again"));
        assert_eq!(fs::read_to_string(&path).expect("read"), "a.txt\nc.txt\n");
    }

    #[test]
    fn remove_reports_unreadable_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("solved.txt");
        let mut store = FileCompletionStore::open(&path).expect("open");
        fs::remove_file(&path).expect("remove file");
        fs::create_dir(&path).expect("directory in its place");
        let err = store.remove("a.txt").expect_err("read failure must surface");
        assert!(err.to_string().contains("cannot read completion file"));
    }

    #[test]
    fn snapshot_reads_without_creating() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("solved.txt");
        let empty = FileCompletionStore::snapshot(&path).expect("snapshot");
        assert!(empty.keys().expect("keys").is_empty());
        assert!(!path.exists());

        fs::write(&path, "a.txt\n\nb.txt\n").expect("seed");
        let store = FileCompletionStore::snapshot(&path).expect("snapshot");
        assert!(store.contains("a.txt").expect("contains"));
        assert!(store.contains("b.txt").expect("contains"));
    }

    #[test]
    fn is_completed_respects_key_policy() {
        let store = MemoryCompletionStore::with_keys(["C1N5D10T6V1.txt"]);
        let inst = Instance::from_relative(Path::new("/in"), Path::new("C1/C1N5D10T6V1.txt"));
        assert!(is_completed(&inst, &store, CompletionKey::BaseName).expect("check"));
        assert!(!is_completed(&inst, &store, CompletionKey::RelativePath).expect("check"));
    }
}
