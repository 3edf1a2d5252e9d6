//! Startup repair: expired locks, stranded claims, unchained receipts.

use crate::error::Result;
use crate::lock::LockManager;
use crate::queue::{QueueEntry, QueueManager};
use crate::receipt::ReceiptWriter;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub released_locks: Vec<String>,
    pub requeued: Vec<QueueEntry>,
    pub appended_receipts: Vec<u64>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.released_locks.is_empty() && self.requeued.is_empty() && self.appended_receipts.is_empty()
    }
}

pub struct Reconciler {
    locks: LockManager,
    queue: Arc<QueueManager>,
    receipts: Arc<ReceiptWriter>,
    stranded_grace: Duration,
}

impl Reconciler {
    pub fn new(locks: LockManager, queue: Arc<QueueManager>, receipts: Arc<ReceiptWriter>, stranded_grace: Duration) -> Self {
        Self { locks, queue, receipts, stranded_grace }
    }

    pub async fn run(&self) -> Result<ReconcileReport> {
        let report = ReconcileReport {
            released_locks: self.locks.release_expired().await?,
            requeued: self.queue.requeue_stranded(self.stranded_grace).await?,
            appended_receipts: self.receipts.append_pending().await?,
        };
        info!(
            locks = report.released_locks.len(),
            requeued = report.requeued.len(),
            receipts = report.appended_receipts.len(),
            "reconciliation complete"
        );
        Ok(report)
    }
}
