//! Worker pool: a fixed number of workers pulling from the durable queue.

use crate::error::Result;
use crate::queue::{ClaimedJob, Job, QueueManager};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Processes one job. An `Err` acks the job as failed.
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job, cancel: CancellationToken) -> std::result::Result<(), String>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct PoolReport {
    pub processed: usize,
    pub failed: usize,
}

pub struct WorkerPool {
    queue: Arc<QueueManager>,
    handler: Arc<dyn JobHandler>,
    workers: usize,
    poll_interval: Duration,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Counters {
    processed: AtomicUsize,
    failed: AtomicUsize,
}

impl WorkerPool {
    pub fn new(queue: Arc<QueueManager>, handler: Arc<dyn JobHandler>, workers: usize) -> Self {
        Self {
            queue,
            handler,
            workers: workers.max(1),
            poll_interval: Duration::from_millis(250),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops the pool. Workers finish their current job first.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs until cancelled.
    pub async fn run(&self) -> Result<PoolReport> {
        self.spawn_workers(false).await
    }

    /// Runs until the queue has no claimable job left.
    pub async fn drain(&self) -> Result<PoolReport> {
        self.spawn_workers(true).await
    }

    async fn spawn_workers(&self, stop_when_idle: bool) -> Result<PoolReport> {
        let counters = Arc::new(Counters::default());
        info!(workers = self.workers, drain = stop_when_idle, "worker pool starting");
        let handles: Vec<_> = (0..self.workers)
            .map(|i| {
                let worker = Worker {
                    name: format!("worker-{}-{i}", std::process::id()),
                    queue: self.queue.clone(),
                    handler: self.handler.clone(),
                    poll_interval: self.poll_interval,
                    cancel: self.cancel.clone(),
                    counters: counters.clone(),
                };
                tokio::spawn(async move { worker.run(stop_when_idle).await })
            })
            .collect();

        let mut first_error = None;
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = %e, "worker stopped on queue error");
                    first_error.get_or_insert(e);
                }
                Err(e) => error!(error = %e, "worker task panicked"),
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        let report = PoolReport {
            processed: counters.processed.load(Ordering::SeqCst),
            failed: counters.failed.load(Ordering::SeqCst),
        };
        info!(processed = report.processed, failed = report.failed, "worker pool stopped");
        Ok(report)
    }
}

struct Worker {
    name: String,
    queue: Arc<QueueManager>,
    handler: Arc<dyn JobHandler>,
    poll_interval: Duration,
    cancel: CancellationToken,
    counters: Arc<Counters>,
}

impl Worker {
    async fn run(self, stop_when_idle: bool) -> Result<()> {
        while !self.cancel.is_cancelled() {
            match self.queue.dequeue(&self.name).await? {
                Some(claimed) => self.process(claimed).await?,
                None if stop_when_idle => break,
                None => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = self.cancel.cancelled() => break,
                    }
                }
            }
        }
        debug!(worker = %self.name, "worker exiting");
        Ok(())
    }

    async fn process(&self, claimed: ClaimedJob) -> Result<()> {
        debug!(worker = %self.name, job = %claimed.job.id, "processing job");
        let outcome = self.handler.handle(&claimed.job, self.cancel.child_token()).await;
        self.counters.processed.fetch_add(1, Ordering::SeqCst);
        match outcome {
            Ok(()) => self.queue.ack(&claimed, true, None).await,
            Err(message) => {
                warn!(worker = %self.name, job = %claimed.job.id, error = %message, "job failed");
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                self.queue.ack(&claimed, false, Some(message)).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Layout;
    use crate::queue::Priority;
    use serde_json::{json, Map};
    use std::sync::Mutex;

    struct Recorder {
        seen: Mutex<Vec<i64>>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl JobHandler for Recorder {
        async fn handle(&self, job: &Job, _cancel: CancellationToken) -> std::result::Result<(), String> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            let n = job.payload.as_i64().unwrap_or(-1);
            self.seen.lock().unwrap().push(n);
            if n == 3 {
                Err("three is unlucky".into())
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn drains_queue_with_bounded_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(QueueManager::new(Layout::new(dir.path())));
        for n in 0..6 {
            queue.enqueue(Priority::Normal, json!(n), Map::new()).await.unwrap();
        }
        let recorder = Arc::new(Recorder { seen: Mutex::new(Vec::new()), active: AtomicUsize::new(0), peak: AtomicUsize::new(0) });
        let pool = WorkerPool::new(queue.clone(), recorder.clone(), 2);
        let report = pool.drain().await.unwrap();

        assert_eq!(report, PoolReport { processed: 6, failed: 1 });
        assert!(recorder.peak.load(Ordering::SeqCst) <= 2);
        let mut seen = recorder.seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
        assert!(queue.pending().await.unwrap().is_empty());
    }
}
