//! SPARQL steps: run a query or update against the shared store.

use super::config_text;
use crate::env::StepEnv;
use crate::error::{kind_for, HandlerError};
use crate::registry::{Inputs, StepHandler};
use kgflow_workflow::{Step, StepKind};
use serde_json::{json, Value};
use tracing::debug;

pub struct SparqlHandler;

impl SparqlHandler {
    async fn query_text(step: &Step, inputs: &Inputs, env: &StepEnv) -> Result<String, HandlerError> {
        if let Some(query) = config_text(step, "query", inputs, env)? {
            return Ok(query);
        }
        let Some(reference) = step.config_str("path") else {
            return Err(HandlerError::new(kind_for(step.kind), format!("{} has no query", step.id)));
        };
        let path = env.resolve_path(reference);
        let body = env
            .fs
            .read_to_string(&path)
            .await
            .map_err(|e| HandlerError::sparql(format!("cannot read query {}: {e}", path.display())))?;
        if crate::template::TemplateRenderer::is_template(&body) {
            Ok(env.renderer.render(&body, inputs)?)
        } else {
            Ok(body)
        }
    }
}

#[async_trait::async_trait]
impl StepHandler for SparqlHandler {
    fn kind(&self) -> StepKind {
        StepKind::Sparql
    }

    async fn execute(&self, step: &Step, inputs: &Inputs, env: &StepEnv) -> Result<Value, HandlerError> {
        let query = Self::query_text(step, inputs, env).await?;
        let response = env
            .store
            .run(&query)
            .await
            .map_err(|e| HandlerError::sparql(e.to_string()))?;
        let epoch = env.store.epoch().await;
        debug!(step = %step.id, kind = response.result.kind(), size = response.result.len(), "sparql step");

        let mut data = response.result.to_json(&response.prefixes);
        if let Value::Object(map) = &mut data {
            let prefixes: Vec<&str> = response.prefixes.iter().map(|(p, _)| p).collect();
            map.insert("metadata".to_string(), json!({ "epoch": epoch, "prefixes": prefixes }));
        }
        Ok(data)
    }
}
