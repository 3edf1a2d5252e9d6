//! The six step handlers and the helpers they share.

pub mod cli;
pub mod file;
pub mod http;
pub mod output;
pub mod sparql;
pub mod template;

pub use cli::CliHandler;
pub use file::FileHandler;
pub use http::HttpHandler;
pub use output::OutputHandler;
pub use sparql::SparqlHandler;
pub use template::TemplateHandler;
pub use output::OutputFormat;

use crate::env::StepEnv;
use crate::error::{kind_for, HandlerError};
use crate::registry::Inputs;
use crate::template::TemplateRenderer;
use kgflow_workflow::Step;
use serde_json::Value;
use std::time::Duration;

/// A string config value, rendered when it contains template syntax.
/// Non-string values are used in their JSON form.
pub(crate) fn config_text(step: &Step, key: &str, inputs: &Inputs, env: &StepEnv) -> Result<Option<String>, HandlerError> {
    let raw = match step.config.get(key) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    if TemplateRenderer::is_template(&raw) {
        Ok(Some(env.renderer.render(&raw, inputs)?))
    } else {
        Ok(Some(raw))
    }
}

pub(crate) fn required_text(step: &Step, key: &str, inputs: &Inputs, env: &StepEnv) -> Result<String, HandlerError> {
    config_text(step, key, inputs, env)?.ok_or_else(|| {
        HandlerError::new(kind_for(step.kind), format!("{} is missing required config {key}", step.id))
    })
}

/// Template body from `template`, or from the file named by `templatePath`.
/// Returns the body and where it came from.
pub(crate) async fn template_source(step: &Step, env: &StepEnv) -> Result<(String, String), HandlerError> {
    if let Some(body) = step.config_str("template") {
        return Ok((body.to_string(), "inline".to_string()));
    }
    match step.config_str("templatePath") {
        Some(reference) => {
            let path = env.resolve_path(reference);
            let body = env.fs.read_to_string(&path).await.map_err(|e| {
                HandlerError::new(kind_for(step.kind), format!("cannot read template {}: {e}", path.display()))
            })?;
            Ok((body, reference.to_string()))
        }
        None => Err(HandlerError::new(
            kind_for(step.kind),
            format!("{} needs template or templatePath", step.id),
        )),
    }
}

/// The step's own timeout, or the environment default.
pub(crate) fn step_timeout(step: &Step, env: &StepEnv) -> Duration {
    step.timeout_ms.map(Duration::from_millis).unwrap_or(env.step_timeout)
}

/// Creates the default handler registry with all six handlers.
pub fn create_default_registry() -> crate::registry::HandlerRegistry {
    let mut registry = crate::registry::HandlerRegistry::new();
    registry.register(SparqlHandler);
    registry.register(TemplateHandler);
    registry.register(FileHandler);
    registry.register(HttpHandler);
    registry.register(CliHandler);
    registry.register(OutputHandler);
    registry
}
