//! The hook engine: polled ticks, edge-triggered latches, receipts.

use crate::discover::discover;
use crate::error::HookError;
use crate::evaluate::check;
use crate::model::{Hook, Predicate};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use kgflow_core::{ExecutionId, ExecutionStatus, FailureInfo, SharedClock};
use kgflow_durable::{Receipt, ReceiptDraft, ReceiptWriter};
use kgflow_store::SharedStore;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What a fired hook does. The engine runs the hook's pipelines here and
/// returns the receipt content; the hook engine chains it.
#[async_trait::async_trait]
pub trait HookAction: Send + Sync {
    async fn run(&self, hook: &Hook, evidence: &Value, cancel: CancellationToken) -> kgflow_core::Result<ReceiptDraft>;
}

/// Per-hook memory between ticks.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HookState {
    /// The predicate held at the last evaluation (latched predicates).
    pub latched: bool,
    /// Last seen fingerprint (result-delta predicates).
    pub fingerprint: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub hook_id: String,
    pub fired: bool,
    pub holds: bool,
    pub evidence: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FiredHook {
    pub hook_id: String,
    pub sequence: u64,
    pub status: ExecutionStatus,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookFailure {
    pub hook_id: String,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub evaluated: usize,
    pub fired: Vec<FiredHook>,
    pub errors: Vec<HookFailure>,
}

pub struct HookEngine {
    store: SharedStore,
    receipts: Arc<ReceiptWriter>,
    action: Arc<dyn HookAction>,
    clock: SharedClock,
    state: DashMap<String, HookState>,
    max_concurrent: usize,
    cancel: CancellationToken,
}

impl HookEngine {
    pub fn new(
        store: SharedStore,
        receipts: Arc<ReceiptWriter>,
        action: Arc<dyn HookAction>,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            receipts,
            action,
            clock,
            state: DashMap::new(),
            max_concurrent: 4,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n.max(1);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn discover(&self) -> Vec<Hook> {
        discover(&*self.store.read().await)
    }

    pub fn state(&self, hook_id: &str) -> Option<HookState> {
        self.state.get(hook_id).map(|s| s.clone())
    }

    /// Checks the predicate and updates the hook's latch or fingerprint.
    /// Latched predicates fire on the transition to holding; result-delta
    /// predicates fire whenever the fingerprint changes.
    pub async fn evaluate(&self, hook: &Hook) -> Result<Evaluation, HookError> {
        let checked = {
            let store = self.store.read().await;
            check(&store, &hook.id, &hook.predicate)?
        };
        let mut entry = self.state.entry(hook.id.clone()).or_default();
        let fired = match &hook.predicate {
            Predicate::ResultDelta { .. } => {
                let changed = checked.fingerprint != entry.fingerprint;
                entry.fingerprint = checked.fingerprint.clone();
                changed
            }
            _ => {
                let rising = checked.holds && !entry.latched;
                entry.latched = checked.holds;
                rising
            }
        };
        debug!(hook = %hook.id, kind = hook.predicate.kind_name(), holds = checked.holds, fired, "hook evaluated");
        Ok(Evaluation { hook_id: hook.id.clone(), fired, holds: checked.holds, evidence: checked.evidence })
    }

    /// Runs the hook's action and appends its receipt. Action failures are
    /// recorded in the receipt; only a failed receipt write is an error.
    pub async fn fire(&self, hook: &Hook, evaluation: &Evaluation) -> Result<Receipt, HookError> {
        info!(hook = %hook.id, "hook fired");
        let started = self.clock.now();
        let draft = match self.action.run(hook, &evaluation.evidence, self.cancel.child_token()).await {
            Ok(mut draft) => {
                draft.hook_id = Some(hook.id.clone());
                draft.evidence = Some(evaluation.evidence.clone());
                draft
            }
            Err(err) => {
                warn!(hook = %hook.id, error = %err, "hook action failed before execution");
                ReceiptDraft {
                    hook_id: Some(hook.id.clone()),
                    workflow_id: hook.id.clone(),
                    execution_id: ExecutionId::generate().to_string(),
                    store_epoch: self.store.epoch().await,
                    started_at: started,
                    ended_at: self.clock.now(),
                    status: ExecutionStatus::from_error(&err),
                    step_results: Vec::new(),
                    failure: Some(FailureInfo::from_error(&err)),
                    evidence: Some(evaluation.evidence.clone()),
                    context: None,
                }
            }
        };
        Ok(self.receipts.append(draft).await?)
    }

    /// Evaluates every discovered hook, then fires those that triggered,
    /// at most `max_concurrent` at a time.
    pub async fn tick(&self) -> TickReport {
        let hooks = self.discover().await;
        let mut report = TickReport { evaluated: hooks.len(), ..TickReport::default() };
        let mut to_fire = Vec::new();
        for hook in hooks {
            match self.evaluate(&hook).await {
                Ok(evaluation) if evaluation.fired => to_fire.push((hook, evaluation)),
                Ok(_) => {}
                Err(e) => {
                    warn!(hook = %hook.id, error = %e, "hook evaluation failed");
                    report.errors.push(HookFailure { hook_id: hook.id.clone(), message: e.to_string() });
                }
            }
        }

        let outcomes: Vec<_> = stream::iter(to_fire)
            .map(|(hook, evaluation)| async move {
                let outcome = self.fire(&hook, &evaluation).await;
                (hook.id, outcome)
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;
        for (hook_id, outcome) in outcomes {
            match outcome {
                Ok(receipt) => report.fired.push(FiredHook {
                    hook_id,
                    sequence: receipt.sequence,
                    status: receipt.draft.status,
                }),
                Err(e) => report.errors.push(HookFailure { hook_id, message: e.to_string() }),
            }
        }
        report.fired.sort_by(|a, b| a.hook_id.cmp(&b.hook_id));
        report.errors.sort_by(|a, b| a.hook_id.cmp(&b.hook_id));
        if !report.fired.is_empty() {
            info!(evaluated = report.evaluated, fired = report.fired.len(), "tick complete");
        }
        report
    }

    /// Ticks every `interval` until cancelled.
    pub async fn watch(&self, interval: Duration) -> usize {
        let mut ticks = 0;
        loop {
            self.tick().await;
            ticks += 1;
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.cancel.cancelled() => return ticks,
            }
        }
    }

    /// Forgets the latch and fingerprint of a hook so it can fire again.
    pub fn reset(&self, hook_id: &str) -> bool {
        self.state.remove(hook_id).is_some()
    }

    /// Seeds each hook's state from its newest receipt: the fingerprint
    /// from the evidence, and the latch as held (it fired).
    pub async fn restore_from_receipts(&self) -> Result<usize, HookError> {
        let mut restored = 0;
        for hook in self.discover().await {
            let Some(receipt) = self.receipts.latest_for_hook(&hook.id).await? else {
                continue;
            };
            let evidence = receipt.draft.evidence.unwrap_or(Value::Null);
            let state = HookState {
                latched: hook.predicate.is_latched() && evidence.get("holds").and_then(Value::as_bool).unwrap_or(true),
                fingerprint: evidence.get("fingerprint").and_then(Value::as_str).map(str::to_string),
            };
            debug!(hook = %hook.id, sequence = receipt.sequence, "hook state restored");
            self.state.insert(hook.id.clone(), state);
            restored += 1;
        }
        Ok(restored)
    }
}
