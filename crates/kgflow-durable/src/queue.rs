//! Durable priority queue.
//!
//! Each level is a directory of numbered job records. A worker claims a
//! job by creating its claim marker (create-if-absent), so two workers
//! never hold the same job. `HEAD` is the low watermark: every job below it
//! is done, and dequeue scans from there.

use crate::error::{DurableError, Result};
use crate::layout::{
    create_exclusive, list_with_extension, parse_sequence, read_optional, sequence_name, write_atomic, Layout,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    /// Dequeue order.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "normal" => Ok(Self::Normal),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown priority {other:?} (high, normal, low)")),
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub sequence: u64,
    pub level: Priority,
    pub payload: Value,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub worker: String,
    pub claimed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub worker: String,
    pub completed_at: DateTime<Utc>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
}

/// A job held by one worker until acked.
#[derive(Clone, Debug)]
pub struct ClaimedJob {
    pub job: Job,
    pub worker: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueueEntry {
    pub level: Priority,
    pub sequence: u64,
    pub claimed_by: Option<String>,
}

#[derive(Clone, Debug)]
pub struct QueueManager {
    layout: Layout,
}

impl QueueManager {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    fn level_dir(&self, level: Priority) -> PathBuf {
        self.layout.queue_dir(level.as_str())
    }

    fn job_path(&self, level: Priority, seq: u64) -> PathBuf {
        self.level_dir(level).join(sequence_name(seq, "job"))
    }

    fn claim_path(&self, level: Priority, seq: u64) -> PathBuf {
        self.level_dir(level).join("claims").join(sequence_name(seq, "claim"))
    }

    fn done_path(&self, level: Priority, seq: u64) -> PathBuf {
        self.level_dir(level).join("done").join(sequence_name(seq, "done"))
    }

    fn head_path(&self, level: Priority) -> PathBuf {
        self.level_dir(level).join("HEAD")
    }

    async fn head(&self, level: Priority) -> Result<u64> {
        let path = self.head_path(level);
        Ok(read_optional(&path)
            .await?
            .and_then(|b| String::from_utf8_lossy(&b).trim().parse().ok())
            .unwrap_or(0))
    }

    async fn job_sequences(&self, level: Priority) -> Result<Vec<u64>> {
        Ok(list_with_extension(&self.level_dir(level), "job")
            .await?
            .iter()
            .filter_map(|p| parse_sequence(p))
            .collect())
    }

    async fn exists(path: &std::path::Path) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }

    async fn read_job(&self, level: Priority, seq: u64) -> Result<Job> {
        let path = self.job_path(level, seq);
        let bytes = read_optional(&path).await?.ok_or_else(|| DurableError::corrupt(&path, "job vanished"))?;
        serde_json::from_slice(&bytes).map_err(|e| DurableError::corrupt(&path, e.to_string()))
    }

    /// Appends a job; the next free sequence number of the level is taken
    /// with create-if-absent, retrying on collision.
    pub async fn enqueue(&self, level: Priority, payload: Value, metadata: Map<String, Value>) -> Result<Job> {
        let mut seq = self.job_sequences(level).await?.last().map(|s| s + 1).unwrap_or(0);
        loop {
            let job = Job {
                id: uuid::Uuid::new_v4().to_string(),
                sequence: seq,
                level,
                payload: payload.clone(),
                metadata: metadata.clone(),
                enqueued_at: Utc::now(),
            };
            if create_exclusive(&self.job_path(level, seq), &serde_json::to_vec_pretty(&job)?).await? {
                info!(level = %level, sequence = seq, job = %job.id, "job enqueued");
                return Ok(job);
            }
            seq += 1;
        }
    }

    /// Claims the oldest unclaimed job of the highest non-empty level.
    pub async fn dequeue(&self, worker: &str) -> Result<Option<ClaimedJob>> {
        for level in Priority::ALL {
            let head = self.head(level).await?;
            for seq in self.job_sequences(level).await?.into_iter().filter(|s| *s >= head) {
                if Self::exists(&self.done_path(level, seq)).await {
                    continue;
                }
                let claim = Claim { worker: worker.to_string(), claimed_at: Utc::now() };
                if create_exclusive(&self.claim_path(level, seq), &serde_json::to_vec(&claim)?).await? {
                    let job = self.read_job(level, seq).await?;
                    debug!(level = %level, sequence = seq, worker, "job claimed");
                    return Ok(Some(ClaimedJob { job, worker: worker.to_string() }));
                }
            }
        }
        Ok(None)
    }

    /// Marks a claimed job done and advances `HEAD` past the done prefix.
    pub async fn ack(&self, claimed: &ClaimedJob, success: bool, message: Option<String>) -> Result<()> {
        let (level, seq) = (claimed.job.level, claimed.job.sequence);
        let completion = Completion {
            worker: claimed.worker.clone(),
            completed_at: Utc::now(),
            success,
            message,
        };
        write_atomic(&self.done_path(level, seq), &serde_json::to_vec(&completion)?).await?;
        self.advance_head(level).await?;
        debug!(level = %level, sequence = seq, success, "job acked");
        Ok(())
    }

    async fn advance_head(&self, level: Priority) -> Result<()> {
        let current = self.head(level).await?;
        let mut next = current;
        for seq in self.job_sequences(level).await?.into_iter().filter(|s| *s >= current) {
            if seq != next || !Self::exists(&self.done_path(level, seq)).await {
                break;
            }
            next = seq + 1;
        }
        if next > current {
            write_atomic(&self.head_path(level), next.to_string().as_bytes()).await?;
        }
        Ok(())
    }

    /// Jobs not yet done, claimed or not, in dequeue order.
    pub async fn pending(&self) -> Result<Vec<QueueEntry>> {
        let mut out = Vec::new();
        for level in Priority::ALL {
            let head = self.head(level).await?;
            for seq in self.job_sequences(level).await?.into_iter().filter(|s| *s >= head) {
                if Self::exists(&self.done_path(level, seq)).await {
                    continue;
                }
                let claimed_by = read_optional(&self.claim_path(level, seq))
                    .await?
                    .and_then(|b| serde_json::from_slice::<Claim>(&b).ok())
                    .map(|c| c.worker);
                out.push(QueueEntry { level, sequence: seq, claimed_by });
            }
        }
        Ok(out)
    }

    /// Drops claims older than `grace` whose job never completed, making
    /// the job claimable again.
    pub async fn requeue_stranded(&self, grace: Duration) -> Result<Vec<QueueEntry>> {
        let cutoff = Utc::now() - ChronoDuration::milliseconds(grace.as_millis().min(i64::MAX as u128) as i64);
        let mut requeued = Vec::new();
        for entry in self.pending().await? {
            if entry.claimed_by.is_none() {
                continue;
            }
            let path = self.claim_path(entry.level, entry.sequence);
            let claim = read_optional(&path).await?.and_then(|b| serde_json::from_slice::<Claim>(&b).ok());
            if matches!(claim, Some(c) if c.claimed_at <= cutoff) {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {
                        warn!(level = %entry.level, sequence = entry.sequence, "requeued stranded job");
                        requeued.push(QueueEntry { claimed_by: None, ..entry });
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(DurableError::io(&path, e)),
                }
            }
        }
        Ok(requeued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn queue(dir: &std::path::Path) -> QueueManager {
        QueueManager::new(Layout::new(dir))
    }

    #[tokio::test]
    async fn dequeues_by_priority_then_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let q = queue(dir.path());
        q.enqueue(Priority::Low, json!("low"), Map::new()).await.unwrap();
        q.enqueue(Priority::Normal, json!("n1"), Map::new()).await.unwrap();
        q.enqueue(Priority::Normal, json!("n2"), Map::new()).await.unwrap();
        q.enqueue(Priority::High, json!("high"), Map::new()).await.unwrap();

        let mut order = Vec::new();
        while let Some(claimed) = q.dequeue("w1").await.unwrap() {
            order.push(claimed.job.payload.clone());
            q.ack(&claimed, true, None).await.unwrap();
        }
        assert_eq!(order, vec![json!("high"), json!("n1"), json!("n2"), json!("low")]);
        assert!(q.pending().await.unwrap().is_empty());
        assert_eq!(q.head(Priority::Normal).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn claimed_jobs_are_not_handed_out_twice() {
        let dir = tempfile::tempdir().unwrap();
        let q = queue(dir.path());
        q.enqueue(Priority::Normal, json!(1), Map::new()).await.unwrap();
        let first = q.dequeue("a").await.unwrap();
        assert!(first.is_some());
        assert!(q.dequeue("b").await.unwrap().is_none());
        assert_eq!(q.pending().await.unwrap()[0].claimed_by.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn stranded_claims_are_requeued() {
        let dir = tempfile::tempdir().unwrap();
        let q = queue(dir.path());
        q.enqueue(Priority::Normal, json!(1), Map::new()).await.unwrap();
        q.dequeue("crashed").await.unwrap().unwrap();
        assert_eq!(q.requeue_stranded(Duration::from_secs(3600)).await.unwrap().len(), 0);
        assert_eq!(q.requeue_stranded(Duration::ZERO).await.unwrap().len(), 1);
        let again = q.dequeue("rescuer").await.unwrap().unwrap();
        assert_eq!(again.job.payload, json!(1));
    }
}
