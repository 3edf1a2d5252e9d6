//! Handler registry and trait definitions
//!
//! Each step type has one handler implementing [`StepHandler`]. The
//! registry maps a [`StepKind`] to its handler; adding a step type means
//! adding a variant and registering an implementation.

use crate::env::StepEnv;
use crate::error::HandlerError;
use kgflow_workflow::{Step, StepKind};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Resolved inputs of one step: context variables overlaid by its input
/// mapping.
pub type Inputs = Map<String, Value>;

#[async_trait::async_trait]
pub trait StepHandler: Send + Sync {
    fn kind(&self) -> StepKind;

    async fn execute(&self, step: &Step, inputs: &Inputs, env: &StepEnv) -> Result<Value, HandlerError>;

    /// Races `execute` against cancellation. Dropping the handler future
    /// drops whatever it was waiting on, child processes included.
    async fn execute_cancellable(
        &self,
        step: &Step,
        inputs: &Inputs,
        env: &StepEnv,
        cancel: CancellationToken,
    ) -> Result<Value, HandlerError> {
        tokio::select! {
            result = self.execute(step, inputs, env) => result,
            _ = cancel.cancelled() => Err(HandlerError::cancelled()),
        }
    }
}

pub struct HandlerRegistry {
    handlers: HashMap<StepKind, Arc<dyn StepHandler>>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry").field("kinds", &self.list()).finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self { handlers: HashMap::new() }
    }

    /// Register a handler. Replaces any existing handler for the same kind.
    pub fn register(&mut self, handler: impl StepHandler + 'static) {
        self.handlers.insert(handler.kind(), Arc::new(handler));
    }

    pub fn get(&self, kind: StepKind) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub async fn execute(
        &self,
        step: &Step,
        inputs: &Inputs,
        env: &StepEnv,
        cancel: CancellationToken,
    ) -> Result<Value, HandlerError> {
        match self.handlers.get(&step.kind) {
            Some(handler) => handler.execute_cancellable(step, inputs, env, cancel).await,
            None => Err(HandlerError::new(
                crate::error::kind_for(step.kind),
                format!("no handler registered for {} steps", step.kind),
            )),
        }
    }

    /// Registered kinds, in declaration order of [`StepKind`].
    pub fn list(&self) -> Vec<StepKind> {
        StepKind::ALL.into_iter().filter(|k| self.handlers.contains_key(k)).collect()
    }
}
