//! Content-addressed snapshots: `snapshots/<key>/<hash>.blob`, with
//! `LATEST` naming the newest hash and `index.jsonl` recording order.

use crate::error::{DurableError, Result};
use crate::layout::{create_exclusive, read_optional, write_atomic, Layout};
use crate::receipt::sha256_hex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub const HASH_PREFIX: &str = "sha256:";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    pub key: String,
    pub content_hash: String,
    pub bytes: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct SnapshotStore {
    layout: Layout,
}

fn hex_of(hash: &str) -> &str {
    hash.strip_prefix(HASH_PREFIX).unwrap_or(hash)
}

impl SnapshotStore {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    fn blob_path(&self, key: &str, hash: &str) -> Result<PathBuf> {
        let hex = hex_of(hash);
        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DurableError::InvalidName(hash.to_string()));
        }
        Ok(self.layout.snapshot_dir(key)?.join(format!("{hex}.blob")))
    }

    /// Stores `data` under `key`. Identical content is written once; storing
    /// it again only moves `LATEST`.
    pub async fn store(&self, key: &str, data: &[u8]) -> Result<SnapshotInfo> {
        let content_hash = format!("{HASH_PREFIX}{}", sha256_hex(data));
        let dir = self.layout.snapshot_dir(key)?;
        let info = SnapshotInfo {
            key: key.to_string(),
            content_hash: content_hash.clone(),
            bytes: data.len() as u64,
            created_at: Utc::now(),
        };
        let created = create_exclusive(&self.blob_path(key, &content_hash)?, data).await?;
        if created {
            let index = dir.join("index.jsonl");
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&index)
                .await
                .map_err(|e| DurableError::io(&index, e))?;
            let line = format!("{}\n", serde_json::to_string(&info)?);
            file.write_all(line.as_bytes()).await.map_err(|e| DurableError::io(&index, e))?;
        }
        write_atomic(&dir.join("LATEST"), content_hash.as_bytes()).await?;
        debug!(key, hash = %content_hash, bytes = data.len(), deduplicated = !created, "snapshot stored");
        Ok(info)
    }

    /// The blob with `hash`, or the latest for `key`.
    pub async fn get(&self, key: &str, hash: Option<&str>) -> Result<Option<Vec<u8>>> {
        let hash = match hash {
            Some(h) => h.to_string(),
            None => match self.latest(key).await? {
                Some(h) => h,
                None => return Ok(None),
            },
        };
        read_optional(&self.blob_path(key, &hash)?).await
    }

    pub async fn has(&self, key: &str, hash: Option<&str>) -> Result<bool> {
        match hash {
            Some(h) => Ok(tokio::fs::metadata(self.blob_path(key, h)?).await.is_ok()),
            None => Ok(self.latest(key).await?.is_some()),
        }
    }

    pub async fn latest(&self, key: &str) -> Result<Option<String>> {
        let path = self.layout.snapshot_dir(key)?.join("LATEST");
        Ok(read_optional(&path)
            .await?
            .map(|b| String::from_utf8_lossy(&b).trim().to_string())
            .filter(|h| !h.is_empty()))
    }

    /// Distinct snapshots of `key`, oldest first.
    pub async fn list(&self, key: &str) -> Result<Vec<SnapshotInfo>> {
        let path = self.layout.snapshot_dir(key)?.join("index.jsonl");
        let Some(bytes) = read_optional(&path).await? else {
            return Ok(Vec::new());
        };
        let text = String::from_utf8_lossy(&bytes);
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(|e| DurableError::corrupt(&path, e.to_string())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identical_content_is_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let snaps = SnapshotStore::new(Layout::new(dir.path()));
        let a = snaps.store("graph", b"one").await.unwrap();
        let b = snaps.store("graph", b"two").await.unwrap();
        let again = snaps.store("graph", b"one").await.unwrap();
        assert_eq!(a.content_hash, again.content_hash);
        assert!(a.content_hash.starts_with("sha256:"));
        assert_eq!(snaps.list("graph").await.unwrap().len(), 2);

        assert_eq!(snaps.get("graph", None).await.unwrap().unwrap(), b"one");
        assert_eq!(snaps.get("graph", Some(&b.content_hash)).await.unwrap().unwrap(), b"two");
        assert!(snaps.has("graph", Some(&b.content_hash)).await.unwrap());
        assert!(!snaps.has("other", None).await.unwrap());
        assert!(snaps.get("graph", Some("sha256:00")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_path_like_keys_and_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let snaps = SnapshotStore::new(Layout::new(dir.path()));
        assert!(snaps.store("../x", b"data").await.is_err());
        assert!(snaps.get("ok", Some("../../etc")).await.is_err());
    }
}
