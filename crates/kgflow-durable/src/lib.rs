//! kgflow durable - durable I/O under a reserved on-disk namespace
//!
//! Locks, a priority queue, chained receipts, content-addressed snapshots,
//! a worker pool and startup reconciliation. Every record is created with
//! create-if-absent or replaced atomically, so concurrent processes sharing
//! the directory stay consistent.

pub mod error;
pub mod layout;
pub mod lock;
pub mod pool;
pub mod queue;
pub mod receipt;
pub mod reconcile;
pub mod snapshot;

pub use error::{DurableError, Result};
pub use layout::Layout;
pub use lock::{LockGuard, LockManager, LockOptions, LockRecord};
pub use pool::{JobHandler, PoolReport, WorkerPool};
pub use queue::{ClaimedJob, Job, Priority, QueueEntry, QueueManager};
pub use receipt::{canonical_json, sha256_hex, ChainReport, Receipt, ReceiptDraft, ReceiptWriter, GENESIS_HASH};
pub use reconcile::{ReconcileReport, Reconciler};
pub use snapshot::{SnapshotInfo, SnapshotStore};

use kgflow_core::config::DurableConfig;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// All durable services over one root.
#[derive(Clone, Debug)]
pub struct Durable {
    pub layout: Layout,
    pub locks: LockManager,
    pub queue: Arc<QueueManager>,
    pub receipts: Arc<ReceiptWriter>,
    pub snapshots: SnapshotStore,
    config: DurableConfig,
}

impl Durable {
    /// Opens (and creates) the namespace at `root`.
    pub async fn open(root: &Path, config: &DurableConfig) -> Result<Self> {
        let layout = Layout::new(root);
        layout.init().await?;
        Ok(Self {
            locks: LockManager::new(layout.clone())
                .with_poll_interval(Duration::from_millis(config.poll_interval_ms.clamp(1, 1_000)))
                .with_default_ttl(Duration::from_millis(config.lock_ttl_ms)),
            queue: Arc::new(QueueManager::new(layout.clone())),
            receipts: Arc::new(ReceiptWriter::new(layout.clone(), config.signing_key.as_deref())),
            snapshots: SnapshotStore::new(layout.clone()),
            layout,
            config: config.clone(),
        })
    }

    /// Lock options from config: TTL and wait deadline.
    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            ttl: Duration::from_millis(self.config.lock_ttl_ms),
            wait: Duration::from_millis(self.config.lock_wait_ms),
        }
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.locks.clone(),
            self.queue.clone(),
            self.receipts.clone(),
            Duration::from_millis(self.config.stranded_grace_ms),
        )
    }

    pub fn worker_pool(&self, handler: Arc<dyn JobHandler>, workers: usize) -> WorkerPool {
        WorkerPool::new(self.queue.clone(), handler, workers)
            .with_poll_interval(Duration::from_millis(self.config.poll_interval_ms.max(1)))
    }
}
