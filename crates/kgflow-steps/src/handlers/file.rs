//! File steps: read, write, copy, move, delete.

use super::required_text;
use crate::env::StepEnv;
use crate::error::HandlerError;
use crate::registry::{Inputs, StepHandler};
use crate::template::TemplateRenderer;
use kgflow_workflow::{Step, StepKind};
use serde_json::{json, Value};
use std::path::Path;
use tracing::debug;

pub struct FileHandler;

fn io_error(action: &str, path: &Path, e: std::io::Error) -> HandlerError {
    HandlerError::file(format!("cannot {action} {}: {e}", path.display()))
}

#[async_trait::async_trait]
impl StepHandler for FileHandler {
    fn kind(&self) -> StepKind {
        StepKind::File
    }

    async fn execute(&self, step: &Step, inputs: &Inputs, env: &StepEnv) -> Result<Value, HandlerError> {
        let operation = required_text(step, "operation", inputs, env)?;
        debug!(step = %step.id, operation = %operation, "file step");
        match operation.as_str() {
            "read" => {
                let file_path = required_text(step, "filePath", inputs, env)?;
                let path = env.resolve_path(&file_path);
                let content = env.fs.read_to_string(&path).await.map_err(|e| io_error("read", &path, e))?;
                Ok(json!({
                    "operation": "read",
                    "filePath": file_path,
                    "contentLength": content.chars().count(),
                    "content": content,
                }))
            }
            "write" => {
                let file_path = required_text(step, "filePath", inputs, env)?;
                let path = env.resolve_path(&file_path);
                let raw = match step.config.get("content") {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => match inputs.get("content") {
                        Some(Value::String(s)) => s.clone(),
                        Some(other) => other.to_string(),
                        None => String::new(),
                    },
                    Some(other) => other.to_string(),
                };
                let rendered = TemplateRenderer::is_template(&raw);
                let content = if rendered { env.renderer.render(&raw, inputs)? } else { raw };
                env.fs.write(&path, &content).await.map_err(|e| io_error("write", &path, e))?;
                Ok(json!({
                    "operation": "write",
                    "filePath": file_path,
                    "contentLength": content.chars().count(),
                    "rendered": rendered,
                }))
            }
            op @ ("copy" | "move") => {
                let source = required_text(step, "sourcePath", inputs, env)?;
                let target = required_text(step, "targetPath", inputs, env)?;
                let (from, to) = (env.resolve_path(&source), env.resolve_path(&target));
                if op == "copy" {
                    env.fs.copy(&from, &to).await.map_err(|e| io_error("copy", &from, e))?;
                } else {
                    env.fs.rename(&from, &to).await.map_err(|e| io_error("move", &from, e))?;
                }
                Ok(json!({ "operation": op, "sourcePath": source, "targetPath": target }))
            }
            "delete" => {
                let file_path = required_text(step, "filePath", inputs, env)?;
                let path = env.resolve_path(&file_path);
                let existed = env.fs.exists(&path).await;
                if existed {
                    env.fs.remove(&path).await.map_err(|e| io_error("delete", &path, e))?;
                }
                Ok(json!({ "operation": "delete", "filePath": file_path, "deleted": existed }))
            }
            other => Err(HandlerError::file(format!("unknown file operation {other:?}"))),
        }
    }
}
