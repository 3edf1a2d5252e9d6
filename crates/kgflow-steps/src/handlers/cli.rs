//! CLI steps: one shell command per step.

use super::{config_text, required_text, step_timeout};
use crate::env::StepEnv;
use crate::error::HandlerError;
use crate::process::{CommandSpec, ProcessError};
use crate::registry::{Inputs, StepHandler};
use crate::template::TemplateRenderer;
use kgflow_workflow::{Step, StepKind};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{info, warn};

pub struct CliHandler;

#[async_trait::async_trait]
impl StepHandler for CliHandler {
    fn kind(&self) -> StepKind {
        StepKind::Cli
    }

    async fn execute(&self, step: &Step, inputs: &Inputs, env: &StepEnv) -> Result<Value, HandlerError> {
        let command = required_text(step, "command", inputs, env)?;
        let cwd = match config_text(step, "cwd", inputs, env)? {
            Some(dir) => env.resolve_path(&dir),
            None => env.workspace.clone(),
        };
        let mut vars = BTreeMap::new();
        if let Some(Value::Object(map)) = step.config.get("env") {
            for (name, value) in map {
                let raw = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let value =
                    if TemplateRenderer::is_template(&raw) { env.renderer.render(&raw, inputs)? } else { raw };
                vars.insert(name.clone(), value);
            }
        }

        let timeout = step_timeout(step, env);
        info!(step = %step.id, cwd = %cwd.display(), "running command");
        let spec = CommandSpec { command: command.clone(), cwd: cwd.clone(), env: vars, timeout };
        let output = env.process.run(spec, env.cancel.clone()).await.map_err(|e| match e {
            ProcessError::Timeout(_) => HandlerError::timeout(format!("{}: {e}", step.id)),
            ProcessError::Cancelled => HandlerError::cancelled(),
            ProcessError::Spawn(_) => HandlerError::cli(format!("{}: {e}", step.id)),
        })?;

        let data = json!({
            "command": command,
            "cwd": cwd.display().to_string(),
            "stdout": output.stdout,
            "stderr": output.stderr,
            "exitCode": output.exit_code,
            "success": output.success(),
        });
        if !output.success() {
            warn!(step = %step.id, exit_code = ?output.exit_code, "command failed");
            let code = output.exit_code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string());
            return Err(HandlerError::cli(format!("command exited with {code}")).with_data(data));
        }
        Ok(data)
    }
}
