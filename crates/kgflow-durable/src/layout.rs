//! On-disk layout of the durable namespace and the file primitives shared
//! by every service: atomic replace and create-if-absent.

use crate::error::{DurableError, IoContext, Result};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Directory names under the durable root.
pub const LOCKS: &str = "locks";
pub const QUEUES: &str = "queues";
pub const RECEIPTS: &str = "receipts";
pub const PENDING: &str = "pending";
pub const NOTES: &str = "notes";
pub const SNAPSHOTS: &str = "snapshots";
pub const GRAPH: &str = "graph";

#[derive(Clone, Debug)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the directory skeleton. Idempotent.
    pub async fn init(&self) -> Result<()> {
        for dir in [
            self.locks_dir(),
            self.root.join(QUEUES),
            self.receipts_dir(),
            self.pending_dir(),
            self.root.join(NOTES),
            self.root.join(SNAPSHOTS),
            self.root.join(GRAPH),
        ] {
            tokio::fs::create_dir_all(&dir).await.at(&dir)?;
        }
        Ok(())
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.root.join(LOCKS)
    }

    pub fn lock_file(&self, name: &str) -> Result<PathBuf> {
        Ok(self.locks_dir().join(checked_name(name)?))
    }

    pub fn queue_dir(&self, level: &str) -> PathBuf {
        self.root.join(QUEUES).join(level)
    }

    pub fn receipts_dir(&self) -> PathBuf {
        self.root.join(RECEIPTS)
    }

    pub fn pending_dir(&self) -> PathBuf {
        self.receipts_dir().join(PENDING)
    }

    pub fn metrics_file(&self) -> PathBuf {
        self.root.join(NOTES).join("metrics.jsonl")
    }

    pub fn snapshot_dir(&self, key: &str) -> Result<PathBuf> {
        Ok(self.root.join(SNAPSHOTS).join(checked_name(key)?))
    }

    pub fn graph_file(&self) -> PathBuf {
        self.root.join(GRAPH).join("default.ttl")
    }
}

/// Names become single path components: no separators, no dot-only names.
pub fn checked_name(name: &str) -> Result<&str> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || name.starts_with('.');
    if bad {
        Err(DurableError::InvalidName(name.to_string()))
    } else {
        Ok(name)
    }
}

fn temp_path(target: &Path) -> PathBuf {
    let name = target.file_name().and_then(|n| n.to_str()).unwrap_or("record");
    target.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()))
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.at(parent)?;
    }
    Ok(())
}

/// Replace `path` with `bytes` via a temp file and rename.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    ensure_parent(path).await?;
    let tmp = temp_path(path);
    tokio::fs::write(&tmp, bytes).await.at(&tmp)?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(DurableError::io(path, e));
    }
    Ok(())
}

/// Create `path` holding `bytes` only if it does not exist. The content is
/// staged in a temp file and hard-linked into place, so readers never see a
/// partial record. Returns `false` when the path was already taken.
pub async fn create_exclusive(path: &Path, bytes: &[u8]) -> Result<bool> {
    ensure_parent(path).await?;
    let tmp = temp_path(path);
    tokio::fs::write(&tmp, bytes).await.at(&tmp)?;
    let linked = tokio::fs::hard_link(&tmp, path).await;
    let _ = tokio::fs::remove_file(&tmp).await;
    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(DurableError::io(path, e)),
    }
}

pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    write_atomic(path, &serde_json::to_vec_pretty(value)?).await
}

/// Reads a file, `None` when it does not exist.
pub async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(DurableError::io(path, e)),
    }
}

/// File names in `dir` with the given extension, sorted. Missing dir → empty.
pub async fn list_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(DurableError::io(dir, e)),
    };
    let mut out = Vec::new();
    while let Some(entry) = entries.next_entry().await.at(dir)? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some(extension) {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

/// Zero-padded so lexical order is numeric order.
pub fn sequence_name(seq: u64, extension: &str) -> String {
    format!("{seq:020}.{extension}")
}

pub fn parse_sequence(path: &Path) -> Option<u64> {
    path.file_stem()?.to_str()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_single_components() {
        assert!(checked_name("build").is_ok());
        assert!(checked_name("report-2024.v1").is_ok());
        for bad in ["", "..", "a/b", ".hidden", "a\\b"] {
            assert!(checked_name(bad).is_err(), "{bad}");
        }
    }

    #[tokio::test]
    async fn exclusive_create_refuses_second_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x/y/record");
        assert!(create_exclusive(&path, b"one").await.unwrap());
        assert!(!create_exclusive(&path, b"two").await.unwrap());
        assert_eq!(std::fs::read(&path).unwrap(), b"one");
        // temp files are cleaned up
        assert_eq!(std::fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn sequence_names_sort_numerically() {
        let a = sequence_name(9, "job");
        let b = sequence_name(10, "job");
        assert!(a < b);
        assert_eq!(parse_sequence(Path::new(&b)), Some(10));
    }
}
