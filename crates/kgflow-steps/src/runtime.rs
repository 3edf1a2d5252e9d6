//! Step runtime: input resolution, dispatch with timeout and retries, and
//! applying results back into the context.

use crate::env::StepEnv;
use crate::error::HandlerError;
use crate::handlers::step_timeout;
use crate::registry::{HandlerRegistry, Inputs};
use kgflow_workflow::{ExecutionContext, Step, StepResult};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// All context variables, overlaid by the step's input mapping. Mapping
/// sources are dotted paths into variables or step outputs; unresolvable
/// sources map to null.
pub fn resolve_inputs(step: &Step, ctx: &ExecutionContext) -> Inputs {
    let mut inputs = ctx.variables().clone();
    for mapping in &step.input_mapping {
        let value = ctx.lookup(&mapping.from).cloned().unwrap_or(Value::Null);
        inputs.insert(mapping.to.clone(), value);
    }
    inputs
}

/// Dotted path into a JSON value (`results.0.c`).
pub fn select_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

async fn attempt(
    step: &Step,
    inputs: &Inputs,
    env: &StepEnv,
    registry: &HandlerRegistry,
) -> Result<Value, HandlerError> {
    if env.cancel.is_cancelled() {
        return Err(HandlerError::cancelled());
    }
    let timeout = step_timeout(step, env);
    match tokio::time::timeout(timeout, registry.execute(step, inputs, env, env.cancel.clone())).await {
        Ok(result) => result,
        Err(_) => Err(HandlerError::timeout(format!("{} exceeded {}ms", step.id, timeout.as_millis()))),
    }
}

/// Runs one step to a [`StepResult`]; never touches the context. Retries
/// follow the step's error policy with exponential backoff; cancellation
/// is never retried.
pub async fn run_step(step: &Step, inputs: &Inputs, env: &StepEnv, registry: &HandlerRegistry) -> StepResult {
    let started = env.clock.now();
    let max_attempts = 1 + step.error_policy.retries;
    let mut attempts = 0;
    let outcome = loop {
        attempts += 1;
        debug!(step = %step.id, kind = %step.kind, attempt = attempts, "executing step");
        let result = attempt(step, inputs, env, registry).await;
        match result {
            Ok(data) => break Ok(data),
            Err(err) if err.is_cancelled() || attempts >= max_attempts => break Err(err),
            Err(err) => {
                let backoff = step.error_policy.backoff_ms.saturating_mul(1 << (attempts - 1).min(16));
                warn!(step = %step.id, attempt = attempts, error = %err, backoff_ms = backoff, "step failed, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(backoff)) => {}
                    _ = env.cancel.cancelled() => break Err(HandlerError::cancelled()),
                }
            }
        }
    };

    let finished = env.clock.now();
    let duration_ms = (finished - started).num_milliseconds().max(0) as u64;
    let mut result = match outcome {
        Ok(data) => {
            info!(step = %step.id, duration_ms, "step succeeded");
            StepResult::ok(step.id.clone(), data, duration_ms, finished)
        }
        Err(err) => {
            warn!(step = %step.id, kind = %err.kind, error = %err.message, "step failed");
            StepResult::failed(step.id.clone(), err.kind, err.message, duration_ms, finished).with_data(err.data)
        }
    };
    result.attempts = attempts;
    result
}

/// Records a result: the data is stored under the step name, output
/// mappings copy parts of it into variables, then the result joins the
/// history. Failed steps only join the history.
pub fn apply(step: &Step, result: StepResult, ctx: &mut ExecutionContext) {
    if result.success {
        if let Some(data) = &result.data {
            ctx.set_output(step.name.clone(), data.clone());
            for mapping in &step.output_mapping {
                let value = select_path(data, &mapping.from).cloned().unwrap_or(Value::Null);
                ctx.set(mapping.to.clone(), value);
            }
        }
    }
    ctx.record(result);
}

/// Resolve, run and apply one step.
pub async fn execute(
    step: &Step,
    ctx: &mut ExecutionContext,
    env: &StepEnv,
    registry: &HandlerRegistry,
) -> StepResult {
    let inputs = resolve_inputs(step, ctx);
    let result = run_step(step, &inputs, env, registry).await;
    apply(step, result.clone(), ctx);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn select_path_indexes_objects_and_arrays() {
        let data = json!({"results": [{"c": "ex:c1"}], "count": 1});
        assert_eq!(select_path(&data, "results.0.c"), Some(&json!("ex:c1")));
        assert_eq!(select_path(&data, "count"), Some(&json!(1)));
        assert_eq!(select_path(&data, "results.3"), None);
        assert_eq!(select_path(&data, ""), Some(&data));
    }
}
