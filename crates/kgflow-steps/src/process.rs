//! Process seam: run a shell command, capture its output, kill it on
//! timeout or cancellation.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Clone, Debug, PartialEq)]
pub struct CommandSpec {
    pub command: String,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessError {
    #[error("failed to spawn: {0}")]
    Spawn(String),
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
    #[error("command killed by cancellation")]
    Cancelled,
}

#[async_trait::async_trait]
pub trait ProcessLauncher: Send + Sync + std::fmt::Debug {
    async fn run(&self, spec: CommandSpec, cancel: CancellationToken) -> Result<ProcessOutput, ProcessError>;
}

/// Runs commands through `sh -c`.
#[derive(Clone, Debug, Default)]
pub struct ShellLauncher;

#[async_trait::async_trait]
impl ProcessLauncher for ShellLauncher {
    async fn run(&self, spec: CommandSpec, cancel: CancellationToken) -> Result<ProcessOutput, ProcessError> {
        let preview: String = spec.command.chars().take(80).collect();
        debug!(command = %preview, cwd = %spec.cwd.display(), "spawning");
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&spec.command)
            .current_dir(&spec.cwd)
            .envs(&spec.env)
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ProcessError::Spawn(e.to_string()))?;

        // Pipes are drained while waiting.
        let stdout = tokio::spawn(read_pipe(child.stdout.take()));
        let stderr = tokio::spawn(read_pipe(child.stderr.take()));

        let status = tokio::select! {
            result = tokio::time::timeout(spec.timeout, child.wait()) => match result {
                Ok(Ok(status)) => status,
                Ok(Err(e)) => return Err(ProcessError::Spawn(e.to_string())),
                Err(_) => {
                    let _ = child.kill().await;
                    return Err(ProcessError::Timeout(spec.timeout));
                }
            },
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(ProcessError::Cancelled);
            }
        };

        Ok(ProcessOutput {
            stdout: stdout.await.unwrap_or_default(),
            stderr: stderr.await.unwrap_or_default(),
            exit_code: status.code(),
        })
    }
}

async fn read_pipe(pipe: Option<impl tokio::io::AsyncRead + Unpin>) -> String {
    match pipe {
        Some(mut p) => {
            let mut buf = Vec::new();
            let _ = p.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).to_string()
        }
        None => String::new(),
    }
}
