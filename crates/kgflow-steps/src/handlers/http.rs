//! HTTP steps.

use super::{config_text, required_text, step_timeout};
use crate::env::StepEnv;
use crate::error::HandlerError;
use crate::http::{HttpError, HttpRequest};
use crate::registry::{Inputs, StepHandler};
use kgflow_workflow::{Step, StepKind};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

pub struct HttpHandler;

impl HttpHandler {
    fn headers(step: &Step, inputs: &Inputs, env: &StepEnv) -> Result<Vec<(String, String)>, HandlerError> {
        let Some(Value::Object(map)) = step.config.get("headers") else {
            return Ok(Vec::new());
        };
        let mut headers = Vec::with_capacity(map.len());
        for (name, value) in map {
            let raw = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let value = if crate::template::TemplateRenderer::is_template(&raw) {
                env.renderer.render(&raw, inputs)?
            } else {
                raw
            };
            headers.push((name.clone(), value));
        }
        Ok(headers)
    }
}

#[async_trait::async_trait]
impl StepHandler for HttpHandler {
    fn kind(&self) -> StepKind {
        StepKind::Http
    }

    async fn execute(&self, step: &Step, inputs: &Inputs, env: &StepEnv) -> Result<Value, HandlerError> {
        let url = required_text(step, "url", inputs, env)?;
        let method = required_text(step, "method", inputs, env)?.to_uppercase();
        let headers = Self::headers(step, inputs, env)?;
        let body = config_text(step, "body", inputs, env)?;
        let timeout = step_timeout(step, env);

        debug!(step = %step.id, method = %method, url = %url, "http step");
        let request = HttpRequest { method: method.clone(), url: url.clone(), headers, body, timeout };
        let response = env.http.send(request).await.map_err(|e| match e {
            HttpError::Timeout(_) => HandlerError::timeout(format!("{method} {url}: {e}")),
            other => HandlerError::http(format!("{method} {url}: {other}")),
        })?;

        let header_map: Map<String, Value> = response
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        let response_data = serde_json::from_str::<Value>(&response.body)
            .unwrap_or_else(|_| Value::String(response.body.clone()));
        let data = json!({
            "url": url,
            "method": method,
            "status": response.status,
            "statusText": response.status_text,
            "headers": header_map,
            "responseData": response_data,
            "success": response.is_success(),
        });
        if !response.is_success() {
            warn!(step = %step.id, status = response.status, "http step failed");
            return Err(HandlerError::http(format!(
                "{method} {url} returned {} {}",
                response.status, response.status_text
            ))
            .with_data(data));
        }
        Ok(data)
    }
}
