//! Workflow execution: validate, plan each pipeline, run its waves, and
//! produce the receipt for the run.

use crate::persist::GraphPersister;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use kgflow_core::vocab::kgf;
use kgflow_core::{Error, ExecutionId, ExecutionStatus, FailureInfo, Result, StepErrorKind};
use kgflow_durable::{Durable, ReceiptDraft};
use kgflow_steps::runtime::{apply, resolve_inputs, run_step};
use kgflow_steps::{HandlerRegistry, Inputs, StepEnv};
use kgflow_store::SharedStore;
use kgflow_workflow::graph::{first_object, node_term};
use kgflow_workflow::{parse, plan, validate, ContextInit, ExecutionContext, Step, StepResult, Workflow};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-run options.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    pub inputs: Map<String, Value>,
    /// Lock held for the whole run; overrides a `kgf:lock` on the workflow.
    pub lock: Option<String>,
    /// Set when the run was triggered by a hook.
    pub hook_id: Option<String>,
    pub evidence: Option<Value>,
    pub cancel: Option<CancellationToken>,
}

impl RunOptions {
    pub fn with_inputs(inputs: Map<String, Value>) -> Self {
        Self { inputs, ..Self::default() }
    }
}

/// Result of one workflow run.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub execution_id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub step_results: Vec<StepResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
    /// Context export including step history.
    pub context: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_sequence: Option<u64>,
}

impl Execution {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

pub struct Executor {
    store: SharedStore,
    env: StepEnv,
    registry: Arc<HandlerRegistry>,
    durable: Durable,
    workflow_timeout: Duration,
    parallel_waves: bool,
    persister: Option<Arc<GraphPersister>>,
    compact_after: usize,
}

impl Executor {
    pub fn new(
        store: SharedStore,
        env: StepEnv,
        registry: Arc<HandlerRegistry>,
        durable: Durable,
        config: &kgflow_core::config::ExecutionConfig,
    ) -> Self {
        Self {
            store,
            env,
            registry,
            durable,
            workflow_timeout: Duration::from_millis(config.workflow_timeout_ms),
            parallel_waves: config.parallel_waves,
            persister: None,
            compact_after: 0,
        }
    }

    /// Compacts the store after a run once `threshold` removed quads are held.
    pub fn with_compaction(mut self, threshold: usize) -> Self {
        self.compact_after = threshold;
        self
    }

    /// Writes the graph after runs that changed the store.
    pub fn with_persister(mut self, persister: Arc<GraphPersister>) -> Self {
        self.persister = Some(persister);
        self
    }

    pub fn env(&self) -> &StepEnv {
        &self.env
    }

    /// Validates and parses the workflow. Returns it with its declared lock.
    pub async fn prepare(&self, id: &str) -> Result<(Workflow, Option<String>)> {
        let store = self.store.read().await;
        let report = validate(&store, id)?;
        if !report.valid {
            let problems: Vec<String> = report.errors.iter().map(|e| format!("{}: {}", e.kind, e.message)).collect();
            return Err(Error::Validation(problems.join("; ")));
        }
        let workflow = parse(&store, &report.workflow_id)?;
        let lock = first_object(&store, &node_term(&workflow.id), kgf::LOCK).map(|t| t.lexical().to_string());
        Ok((workflow, lock))
    }

    /// Runs the workflow and returns the execution with its receipt draft,
    /// without appending it. Errors before the first step (not found,
    /// invalid, lock not acquired) are returned as `Err` and leave no
    /// receipt.
    pub async fn execute(&self, id: &str, options: RunOptions) -> Result<(Execution, ReceiptDraft)> {
        let (workflow, declared_lock) = self.prepare(id).await?;
        let execution_id = ExecutionId::generate();

        let guard = match options.lock.clone().or(declared_lock) {
            Some(name) => {
                debug!(lock = %name, execution = %execution_id, "acquiring lock");
                Some(self.durable.locks.acquire(&name, self.durable.lock_options()).await?)
            }
            None => None,
        };

        let clock = self.env.clock.clone();
        let started_at = clock.now();
        let epoch_before = self.store.epoch().await;
        let mut ctx = ExecutionContext::init(ContextInit {
            workflow_id: workflow.id.clone(),
            inputs: options.inputs.clone(),
            start_time: started_at,
        });
        let cancel = options.cancel.clone().unwrap_or_else(|| self.env.cancel.child_token());
        let env = self.env.clone().with_cancel(cancel.clone());

        info!(workflow = %workflow.id, execution = %execution_id, steps = workflow.steps.len(), "execution started");
        let outcome = match tokio::time::timeout(self.workflow_timeout, self.run_pipelines(&workflow, &mut ctx, &env)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                cancel.cancel();
                Err(Error::Timeout(format!(
                    "{} exceeded {}ms",
                    workflow.id,
                    self.workflow_timeout.as_millis()
                )))
            }
        };

        if let Some(guard) = guard {
            if let Err(e) = guard.release().await {
                warn!(lock = %guard.name(), error = %e, "lock release failed");
            }
        }
        let ended_at = clock.now();

        let (status, failure) = match &outcome {
            Ok(()) => (ExecutionStatus::Success, None),
            Err(err) => (ExecutionStatus::from_error(err), Some(FailureInfo::from_error(err))),
        };
        match &failure {
            None => info!(workflow = %workflow.id, execution = %execution_id, "execution succeeded"),
            Some(f) => warn!(workflow = %workflow.id, execution = %execution_id, %status, error = %f.message, "execution ended"),
        }

        if let Some(persister) = &self.persister {
            if self.store.epoch().await != epoch_before {
                if let Err(e) = persister.persist().await {
                    warn!(error = %e, "graph persistence failed");
                }
            }
        }
        self.store.compact_retired(self.compact_after).await;

        let step_results = ctx.history().to_vec();
        let draft = ReceiptDraft {
            hook_id: options.hook_id,
            workflow_id: workflow.id.clone(),
            execution_id: execution_id.to_string(),
            store_epoch: self.store.epoch().await,
            started_at,
            ended_at,
            status,
            step_results: step_results.iter().map(serde_json::to_value).collect::<std::result::Result<_, _>>()?,
            failure: failure.clone(),
            evidence: options.evidence,
            context: (!status.is_success()).then(|| ctx.export(true)),
        };
        let execution = Execution {
            execution_id: execution_id.to_string(),
            workflow_id: workflow.id,
            status,
            started_at,
            ended_at,
            step_results,
            failure,
            context: ctx.export(true),
            receipt_sequence: None,
        };
        Ok((execution, draft))
    }

    /// Runs the workflow and appends its receipt. A receipt that cannot be
    /// written fails the run.
    pub async fn run(&self, id: &str, options: RunOptions) -> Result<Execution> {
        let (mut execution, draft) = self.execute(id, options).await?;
        let receipt = self.durable.receipts.append(draft).await?;
        execution.receipt_sequence = Some(receipt.sequence);
        Ok(execution)
    }

    /// Pipelines run one after another; within a pipeline, wave by wave.
    async fn run_pipelines(&self, workflow: &Workflow, ctx: &mut ExecutionContext, env: &StepEnv) -> Result<()> {
        for pipeline in &workflow.pipelines {
            let steps: Vec<Step> = workflow.steps.iter().filter(|s| s.pipeline == pipeline.id).cloned().collect();
            let planned = plan(&steps)?;
            debug!(pipeline = %pipeline.id, steps = steps.len(), waves = planned.waves.len(), "pipeline planned");
            for wave in &planned.waves {
                let mut members: Vec<&Step> = wave.iter().map(|&i| &steps[i]).collect();
                members.sort_by_key(|s| s.index);
                self.run_wave(&workflow.id, &members, ctx, env).await?;
            }
        }
        Ok(())
    }

    /// Runs one wave, then applies its results in declaration order. The
    /// first failure without `continueOnError` stops the workflow; when the
    /// wave runs serially, its later steps are not started.
    async fn run_wave(&self, workflow_id: &str, wave: &[&Step], ctx: &mut ExecutionContext, env: &StepEnv) -> Result<()> {
        if env.cancel.is_cancelled() {
            return Err(Error::Cancelled(format!("{workflow_id} cancelled")));
        }
        let inputs: Vec<Inputs> = wave.iter().map(|s| resolve_inputs(s, ctx)).collect();
        let results = if self.parallel_waves && wave.len() > 1 {
            join_all(wave.iter().zip(&inputs).map(|(step, inputs)| run_step(step, inputs, env, &self.registry))).await
        } else {
            // Serially, nothing after a stopping failure runs.
            let mut out = Vec::with_capacity(wave.len());
            for (step, inputs) in wave.iter().zip(&inputs) {
                let result = run_step(step, inputs, env, &self.registry).await;
                let stops = !result.success && stops_workflow(step, &result);
                out.push(result);
                if stops {
                    break;
                }
            }
            out
        };

        let mut stop = None;
        for (step, result) in wave.iter().zip(results) {
            if !result.success && stop.is_none() {
                if stops_workflow(step, &result) {
                    stop = Some(step_error(step, &result));
                } else {
                    warn!(step = %step.id, "step failed, continuing");
                }
            }
            apply(step, result, ctx);
        }
        match stop {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// A failed step ends the run unless it may continue; cancellation always
/// ends it.
fn stops_workflow(step: &Step, result: &StepResult) -> bool {
    let cancelled = result.error.as_ref().is_some_and(|e| e.kind == StepErrorKind::Cancelled);
    cancelled || !step.error_policy.continue_on_error
}

fn step_error(step: &Step, result: &StepResult) -> Error {
    match &result.error {
        Some(e) if e.kind == StepErrorKind::Cancelled => Error::Cancelled(format!("{}: {}", step.id, e.message)),
        Some(e) => Error::step(step.id.clone(), e.kind, e.message.clone()),
        None => Error::step(step.id.clone(), kgflow_steps::kind_for(step.kind), "step failed"),
    }
}
