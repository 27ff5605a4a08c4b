use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

/// Writes `bytes` to a sibling temp file, syncs it and renames it over `path`,
/// so readers only ever observe the old or the new content.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

pub fn atomic_write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write_bytes(path, &bytes)
}

pub fn sha256_bytes(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_replaces_content_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("record.json");
        atomic_write_bytes(&path, b"first").expect("first write");
        atomic_write_bytes(&path, b"second").expect("second write");
        assert_eq!(fs::read_to_string(&path).expect("read"), "second");

        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .expect("list")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind: {:?}", leftovers);
    }

    #[test]
    fn atomic_write_json_is_pretty_printed() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("value.json");
        atomic_write_json_pretty(&path, &serde_json::json!({"a": 1})).expect("write");
        let text = fs::read_to_string(&path).expect("read");
        assert!(text.contains("\n"), "expected multi-line output: {}", text);
        let parsed: Value = serde_json::from_str(&text).expect("parse");
        assert_eq!(parsed["a"], 1);
    }

    #[test]
    fn file_and_byte_digests_agree() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("instance.txt");
        fs::write(&path, b"numNode\tnumCus\n").expect("write");
        assert_eq!(
            sha256_file(&path).expect("digest"),
            sha256_bytes(b"numNode\tnumCus\n")
        );
    }

    #[test]
    fn empty_input_digest_is_well_known() {
        assert_eq!(
            sha256_bytes(b""),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
