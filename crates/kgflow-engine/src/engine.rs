//! The engine facade: one graph, one durable namespace, the executor and
//! the hook engine wired together from an [`EngineConfig`].

use crate::executor::{Execution, Executor, RunOptions};
use crate::persist::{load_graph, GraphPersister, PersistReport};
use kgflow_core::{clock_from_env, EngineConfig, Result, SharedClock};
use kgflow_durable::{
    ChainReport, Durable, Job, JobHandler, PoolReport, Priority, QueueEntry, Receipt, ReceiptDraft, ReconcileReport,
};
use kgflow_hooks::{Hook, HookAction, HookEngine, TickReport};
use kgflow_steps::{create_default_registry, FileSystem, HandlerRegistry, HttpClient, ProcessLauncher, StepEnv};
use kgflow_store::{QueryResult, SharedStore};
use kgflow_workflow::{list, resolve_id, validate, ValidationReport, WorkflowSummary};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Runs a fired hook's pipelines as a workflow with the hook's id.
struct WorkflowAction {
    executor: Arc<Executor>,
}

#[async_trait::async_trait]
impl HookAction for WorkflowAction {
    async fn run(&self, hook: &Hook, evidence: &Value, cancel: CancellationToken) -> Result<ReceiptDraft> {
        let options = RunOptions {
            hook_id: Some(hook.id.clone()),
            evidence: Some(evidence.clone()),
            cancel: Some(cancel),
            ..RunOptions::default()
        };
        let (_, draft) = self.executor.execute(&hook.id, options).await?;
        Ok(draft)
    }
}

/// Runs queued jobs. The payload names the workflow and its inputs.
struct QueuedWorkflow {
    executor: Arc<Executor>,
}

#[async_trait::async_trait]
impl JobHandler for QueuedWorkflow {
    async fn handle(&self, job: &Job, cancel: CancellationToken) -> std::result::Result<(), String> {
        let workflow = job
            .payload
            .get("workflowId")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("job {} has no workflowId", job.id))?;
        let options = RunOptions {
            inputs: job.payload.get("inputs").and_then(Value::as_object).cloned().unwrap_or_default(),
            lock: job.payload.get("lock").and_then(Value::as_str).map(str::to_string),
            cancel: Some(cancel),
            ..RunOptions::default()
        };
        let execution = self.executor.run(workflow, options).await.map_err(|e| e.to_string())?;
        if execution.is_success() {
            Ok(())
        } else {
            Err(format!("{workflow} ended {}", execution.status))
        }
    }
}

/// Seams replaced in tests: clock, HTTP, processes, filesystem, handlers.
#[derive(Default)]
pub struct EngineBuilder {
    clock: Option<SharedClock>,
    http: Option<Arc<dyn HttpClient>>,
    process: Option<Arc<dyn ProcessLauncher>>,
    fs: Option<Arc<dyn FileSystem>>,
    registry: Option<HandlerRegistry>,
}

impl EngineBuilder {
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn http(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn process(mut self, process: Arc<dyn ProcessLauncher>) -> Self {
        self.process = Some(process);
        self
    }

    pub fn fs(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    pub fn registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub async fn open(self, config: EngineConfig) -> Result<Engine> {
        let loaded = load_graph(&config)?;
        let store = SharedStore::new(loaded.outcome.store);
        let clock = self.clock.unwrap_or_else(clock_from_env);
        let durable = Durable::open(&config.durable_root(), &config.durable).await?;
        let cancel = CancellationToken::new();

        let mut env = StepEnv::from_config(store.clone(), &config, clock.clone()).with_cancel(cancel.child_token());
        if let Some(http) = self.http {
            env = env.with_http(http);
        }
        if let Some(process) = self.process {
            env = env.with_process(process);
        }
        if let Some(fs) = self.fs {
            env = env.with_fs(fs);
        }

        let persister = Arc::new(
            GraphPersister::new(
                store.clone(),
                config.default_graph_path(),
                config.graph.backup_on_save,
                loaded.external,
                loaded.outcome.prefixes,
            )
            .with_snapshots(durable.snapshots.clone()),
        );
        let registry = Arc::new(self.registry.unwrap_or_else(create_default_registry));
        let mut executor = Executor::new(store.clone(), env, registry, durable.clone(), &config.execution)
            .with_compaction(config.graph.compact_after);
        if config.graph.persist_on_change {
            executor = executor.with_persister(persister.clone());
        }
        let executor = Arc::new(executor);

        let hooks = HookEngine::new(
            store.clone(),
            durable.receipts.clone(),
            Arc::new(WorkflowAction { executor: executor.clone() }),
            clock,
        )
        .with_max_concurrent(config.hooks.max_concurrent)
        .with_cancel(cancel.child_token());
        let restored = hooks.restore_from_receipts().await?;

        info!(
            workspace = %config.workspace.display(),
            files = loaded.outcome.loaded_files.len(),
            quads = store.read().await.size(),
            restored_hooks = restored,
            "engine opened"
        );
        Ok(Engine { config, store, durable, executor, hooks, persister, cancel })
    }
}

pub struct Engine {
    config: EngineConfig,
    store: SharedStore,
    durable: Durable,
    executor: Arc<Executor>,
    hooks: HookEngine,
    persister: Arc<GraphPersister>,
    cancel: CancellationToken,
}

impl Engine {
    /// Opens with real seams and the clock from `KGFLOW_NOW`.
    pub async fn open(config: EngineConfig) -> Result<Self> {
        EngineBuilder::default().open(config).await
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn durable(&self) -> &Durable {
        &self.durable
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    pub fn hooks(&self) -> &HookEngine {
        &self.hooks
    }

    pub async fn run(&self, workflow: &str, inputs: Map<String, Value>) -> Result<Execution> {
        self.executor.run(workflow, RunOptions::with_inputs(inputs)).await
    }

    pub async fn run_with(&self, workflow: &str, options: RunOptions) -> Result<Execution> {
        self.executor.run(workflow, options).await
    }

    pub async fn validate(&self, workflow: &str) -> Result<ValidationReport> {
        Ok(validate(&*self.store.read().await, workflow)?)
    }

    pub async fn list(&self) -> Vec<WorkflowSummary> {
        list(&*self.store.read().await)
    }

    /// Runs a query or update and renders the result as JSON. Updates that
    /// change the store are persisted.
    pub async fn query(&self, text: &str) -> Result<Value> {
        let before = self.store.epoch().await;
        let response = self.store.run(text).await?;
        if matches!(response.result, QueryResult::Update(_))
            && self.config.graph.persist_on_change
            && self.store.epoch().await != before
        {
            self.persister.persist().await?;
        }
        self.store.compact_retired(self.config.graph.compact_after).await;
        Ok(response.result.to_json(&response.prefixes))
    }

    pub async fn tick(&self) -> TickReport {
        self.hooks.tick().await
    }

    /// Ticks at the configured interval until [`Engine::shutdown`].
    pub async fn watch(&self) -> usize {
        self.hooks.watch(Duration::from_millis(self.config.hooks.tick_interval_ms.max(1))).await
    }

    /// Queues a run of `workflow`. The id is resolved now, so the job
    /// carries the full IRI.
    pub async fn enqueue(
        &self,
        workflow: &str,
        priority: Priority,
        inputs: Map<String, Value>,
        lock: Option<String>,
    ) -> Result<Job> {
        let id = resolve_id(&*self.store.read().await, workflow)?;
        let mut payload = json!({ "workflowId": id, "inputs": inputs });
        if let (Some(lock), Value::Object(map)) = (lock, &mut payload) {
            map.insert("lock".into(), Value::String(lock));
        }
        let mut metadata = Map::new();
        metadata.insert("source".into(), json!("kgflow"));
        Ok(self.durable.queue.enqueue(priority, payload, metadata).await?)
    }

    pub async fn pending(&self) -> Result<Vec<QueueEntry>> {
        Ok(self.durable.queue.pending().await?)
    }

    /// Runs queued workflows with `workers` concurrent workers. With
    /// `drain`, returns once the queue is empty; otherwise runs until
    /// [`Engine::shutdown`].
    pub async fn work(&self, workers: usize, drain: bool) -> Result<PoolReport> {
        let handler = Arc::new(QueuedWorkflow { executor: self.executor.clone() });
        let pool = self.durable.worker_pool(handler, workers.max(1)).with_cancel(self.cancel.child_token());
        let report = if drain { pool.drain().await? } else { pool.run().await? };
        Ok(report)
    }

    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        Ok(self.durable.reconciler().run().await?)
    }

    pub async fn persist(&self) -> Result<PersistReport> {
        self.persister.persist().await
    }

    pub async fn receipts(&self) -> Result<Vec<Receipt>> {
        Ok(self.durable.receipts.list().await?)
    }

    pub async fn verify_receipts(&self) -> Result<ChainReport> {
        Ok(self.durable.receipts.verify_chain().await?)
    }

    /// Cancels running workflows, the watch loop and workers.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
