//! Chained execution receipts.
//!
//! Receipt N stores the hash of receipt N-1 in `prevHash`; its own hash is
//! SHA-256 over its canonical JSON (keys sorted, `hash` and `signature`
//! left out). With a signing key the hash is also HMAC-SHA256 signed.
//! Drafts are staged under `receipts/pending/` first so an interrupted
//! append can be completed by reconciliation.

use crate::error::{DurableError, Result};
use crate::layout::{
    create_exclusive, list_with_extension, parse_sequence, read_optional, sequence_name, write_json_atomic, Layout,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use kgflow_core::{ExecutionStatus, FailureInfo};
use ring::{digest, hmac};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Everything a receipt records except its place in the chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptDraft {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub hook_id: Option<String>,
    pub workflow_id: String,
    pub execution_id: String,
    pub store_epoch: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub step_results: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub failure: Option<FailureInfo>,
    /// What made a hook fire (fingerprint, row count).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub evidence: Option<Value>,
    /// Exported context, kept for post-mortem on failure.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub context: Option<Value>,
}

impl ReceiptDraft {
    pub fn duration_ms(&self) -> u64 {
        (self.ended_at - self.started_at).num_milliseconds().max(0) as u64
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub sequence: u64,
    #[serde(flatten)]
    pub draft: ReceiptDraft,
    pub prev_hash: String,
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub signature: Option<String>,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.draft.status.is_success()
    }
}

/// JSON with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut out = Map::new();
                for key in keys {
                    out.insert(key.clone(), sorted(&map[key.as_str()]));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    digest::digest(&digest::SHA256, bytes).as_ref().iter().map(|b| format!("{b:02x}")).collect()
}

fn receipt_hash(receipt: &Receipt) -> Result<String> {
    let mut value = serde_json::to_value(receipt)?;
    if let Value::Object(map) = &mut value {
        map.remove("hash");
        map.remove("signature");
    }
    Ok(sha256_hex(canonical_json(&value).as_bytes()))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainReport {
    pub receipts: usize,
    pub tip: String,
    pub signed: usize,
}

pub struct ReceiptWriter {
    layout: Layout,
    key: Option<hmac::Key>,
    append_lock: Mutex<()>,
}

impl std::fmt::Debug for ReceiptWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiptWriter")
            .field("root", &self.layout.root())
            .field("signed", &self.key.is_some())
            .finish()
    }
}

impl ReceiptWriter {
    pub fn new(layout: Layout, signing_key: Option<&str>) -> Self {
        Self {
            layout,
            key: signing_key.map(|k| hmac::Key::new(hmac::HMAC_SHA256, k.as_bytes())),
            append_lock: Mutex::new(()),
        }
    }

    fn receipt_path(&self, seq: u64) -> PathBuf {
        self.layout.receipts_dir().join(sequence_name(seq, "receipt"))
    }

    async fn read_receipt(&self, path: &std::path::Path) -> Result<Receipt> {
        let bytes = read_optional(path).await?.ok_or_else(|| DurableError::corrupt(path, "receipt vanished"))?;
        serde_json::from_slice(&bytes).map_err(|e| DurableError::corrupt(path, e.to_string()))
    }

    /// The last receipt in the chain.
    pub async fn tip(&self) -> Result<Option<Receipt>> {
        match list_with_extension(&self.layout.receipts_dir(), "receipt").await?.last() {
            Some(path) => Ok(Some(self.read_receipt(path).await?)),
            None => Ok(None),
        }
    }

    /// Stages `draft`, chains it, logs metrics, then drops the staged copy.
    pub async fn append(&self, draft: ReceiptDraft) -> Result<Receipt> {
        let staged = self.stage(&draft).await?;
        let receipt = self.chain(draft).await?;
        if let Err(e) = tokio::fs::remove_file(&staged).await {
            warn!(path = %staged.display(), error = %e, "could not remove staged receipt");
        }
        Ok(receipt)
    }

    /// Writes a draft to `receipts/pending/<executionId>.json`.
    pub async fn stage(&self, draft: &ReceiptDraft) -> Result<PathBuf> {
        let name = crate::layout::checked_name(&draft.execution_id)?;
        let path = self.layout.pending_dir().join(format!("{name}.json"));
        write_json_atomic(&path, draft).await?;
        Ok(path)
    }

    async fn chain(&self, draft: ReceiptDraft) -> Result<Receipt> {
        let _guard = self.append_lock.lock().await;
        loop {
            let tip = self.tip().await?;
            let (sequence, prev_hash) = match &tip {
                Some(r) => (r.sequence + 1, r.hash.clone()),
                None => (0, GENESIS_HASH.to_string()),
            };
            let mut receipt = Receipt { sequence, draft: draft.clone(), prev_hash, hash: String::new(), signature: None };
            receipt.hash = receipt_hash(&receipt)?;
            receipt.signature = self
                .key
                .as_ref()
                .map(|key| BASE64.encode(hmac::sign(key, receipt.hash.as_bytes()).as_ref()));

            let path = self.receipt_path(sequence);
            if create_exclusive(&path, &serde_json::to_vec_pretty(&receipt)?).await? {
                info!(
                    sequence,
                    workflow = %receipt.draft.workflow_id,
                    status = %receipt.draft.status,
                    "receipt appended"
                );
                self.append_metrics(&receipt).await?;
                return Ok(receipt);
            }
            debug!(sequence, "receipt slot taken, retrying");
        }
    }

    async fn append_metrics(&self, receipt: &Receipt) -> Result<()> {
        let path = self.layout.metrics_file();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| DurableError::io(parent, e))?;
        }
        let line = json!({
            "sequence": receipt.sequence,
            "workflowId": receipt.draft.workflow_id,
            "hookId": receipt.draft.hook_id,
            "executionId": receipt.draft.execution_id,
            "status": receipt.draft.status,
            "durationMs": receipt.draft.duration_ms(),
            "steps": receipt.draft.step_results.len(),
            "endedAt": receipt.draft.ended_at,
        });
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| DurableError::io(&path, e))?;
        file.write_all(format!("{line}\n").as_bytes()).await.map_err(|e| DurableError::io(&path, e))?;
        Ok(())
    }

    /// Chains every staged draft, oldest first. Returns the new sequences.
    pub async fn append_pending(&self) -> Result<Vec<u64>> {
        let mut drafts = Vec::new();
        for path in list_with_extension(&self.layout.pending_dir(), "json").await? {
            let Some(bytes) = read_optional(&path).await? else { continue };
            match serde_json::from_slice::<ReceiptDraft>(&bytes) {
                Ok(draft) => drafts.push((path, draft)),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable pending receipt"),
            }
        }
        drafts.sort_by_key(|(_, d)| d.ended_at);

        let mut appended = Vec::new();
        for (path, draft) in drafts {
            if self.list().await?.iter().any(|r| r.draft.execution_id == draft.execution_id) {
                // Chained before the staged copy was removed.
                let _ = tokio::fs::remove_file(&path).await;
                continue;
            }
            let receipt = self.chain(draft).await?;
            let _ = tokio::fs::remove_file(&path).await;
            appended.push(receipt.sequence);
        }
        Ok(appended)
    }

    /// All receipts in chain order.
    pub async fn list(&self) -> Result<Vec<Receipt>> {
        let mut out = Vec::new();
        for path in list_with_extension(&self.layout.receipts_dir(), "receipt").await? {
            out.push(self.read_receipt(&path).await?);
        }
        Ok(out)
    }

    pub async fn get(&self, sequence: u64) -> Result<Option<Receipt>> {
        let path = self.receipt_path(sequence);
        match read_optional(&path).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(|e| DurableError::corrupt(&path, e.to_string()))?)),
            None => Ok(None),
        }
    }

    /// Newest receipt written for `hook_id`.
    pub async fn latest_for_hook(&self, hook_id: &str) -> Result<Option<Receipt>> {
        let paths = list_with_extension(&self.layout.receipts_dir(), "receipt").await?;
        for path in paths.iter().rev() {
            let receipt = self.read_receipt(path).await?;
            if receipt.draft.hook_id.as_deref() == Some(hook_id) {
                return Ok(Some(receipt));
            }
        }
        Ok(None)
    }

    /// Recomputes every hash, checks the links and, with a key, signatures.
    pub async fn verify_chain(&self) -> Result<ChainReport> {
        let mut prev = GENESIS_HASH.to_string();
        let mut report = ChainReport { receipts: 0, tip: prev.clone(), signed: 0 };
        for path in list_with_extension(&self.layout.receipts_dir(), "receipt").await? {
            let receipt = self.read_receipt(&path).await?;
            let seq = receipt.sequence;
            if parse_sequence(&path) != Some(seq) {
                return Err(DurableError::Chain { sequence: seq, message: "file name does not match sequence".into() });
            }
            if seq != report.receipts as u64 {
                return Err(DurableError::Chain { sequence: seq, message: format!("expected sequence {}", report.receipts) });
            }
            if receipt.prev_hash != prev {
                return Err(DurableError::Chain { sequence: seq, message: "prevHash does not match previous receipt".into() });
            }
            if receipt_hash(&receipt)? != receipt.hash {
                return Err(DurableError::Chain { sequence: seq, message: "hash does not match content".into() });
            }
            if let (Some(key), Some(signature)) = (&self.key, &receipt.signature) {
                let raw = BASE64
                    .decode(signature)
                    .map_err(|e| DurableError::Chain { sequence: seq, message: format!("bad signature encoding: {e}") })?;
                hmac::verify(key, receipt.hash.as_bytes(), &raw)
                    .map_err(|_| DurableError::Chain { sequence: seq, message: "signature mismatch".into() })?;
                report.signed += 1;
            }
            prev = receipt.hash.clone();
            report.receipts += 1;
        }
        report.tip = prev;
        Ok(report)
    }
}
