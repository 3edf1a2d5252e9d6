//! Template steps: render text, optionally write it to a file.

use super::{config_text, template_source};
use crate::env::StepEnv;
use crate::error::HandlerError;
use crate::registry::{Inputs, StepHandler};
use kgflow_workflow::{Step, StepKind};
use serde_json::{json, Value};
use tracing::debug;

pub struct TemplateHandler;

#[async_trait::async_trait]
impl StepHandler for TemplateHandler {
    fn kind(&self) -> StepKind {
        StepKind::Template
    }

    async fn execute(&self, step: &Step, inputs: &Inputs, env: &StepEnv) -> Result<Value, HandlerError> {
        let (source, used) = template_source(step, env).await?;
        let content = env.renderer.render(&source, inputs)?;

        let mut data = json!({
            "content": content,
            "contentLength": content.chars().count(),
            "templateUsed": used,
        });
        if let Some(output_path) = config_text(step, "outputPath", inputs, env)? {
            let path = env.resolve_path(&output_path);
            env.fs
                .write(&path, &content)
                .await
                .map_err(|e| HandlerError::template(format!("cannot write {}: {e}", path.display())))?;
            debug!(step = %step.id, path = %path.display(), "template written");
            if let Value::Object(map) = &mut data {
                map.insert("outputPath".to_string(), Value::String(path.display().to_string()));
            }
        }
        Ok(data)
    }
}
