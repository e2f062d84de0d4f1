//! Subprocess task runner - pipes the rendered template through a command

use crate::runner::client::RunnerConfig;
use crate::runner::{TaskOutput, TaskRequest, TaskRunner, TaskRunnerError};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

const CONFIDENCE_PREFIX: &str = "CONFIDENCE:";

/// Runs every step through one external command.
///
/// The rendered template is written to stdin and stdout is the step output.
/// The step id and model reference are passed as `MEDPIPE_STEP_ID` and
/// `MEDPIPE_MODEL`. A trailing `CONFIDENCE: <float>` line is parsed and
/// stripped from the output.
#[derive(Debug, Clone)]
pub struct SubprocessTaskRunner {
    config: RunnerConfig,
}

impl SubprocessTaskRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }
}

#[async_trait]
impl TaskRunner for SubprocessTaskRunner {
    async fn run(&self, request: &TaskRequest) -> Result<TaskOutput, TaskRunnerError> {
        let payload = request.rendered().into_bytes();
        debug!(
            step = %request.step_id,
            bytes = payload.len(),
            "Spawning task runner subprocess"
        );

        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .env("MEDPIPE_STEP_ID", &request.step_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref model) = request.model_reference {
            command.env("MEDPIPE_MODEL", model);
        }

        let mut child = command.spawn().map_err(|e| {
            TaskRunnerError::Fatal(format!(
                "failed to spawn '{}': {}",
                self.config.command, e
            ))
        })?;

        let stdin = child.stdin.take();
        let write = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&payload).await?;
                stdin.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };

        let (written, output) = timeout(
            Duration::from_secs(self.config.timeout_secs),
            async { tokio::join!(write, child.wait_with_output()) },
        )
        .await
        .map_err(|_| TaskRunnerError::Timeout(self.config.timeout_secs))?;

        if let Err(e) = written {
            // the command may legitimately exit without reading its input
            if e.kind() != ErrorKind::BrokenPipe {
                return Err(TaskRunnerError::Transient(format!(
                    "failed to write to '{}': {}",
                    self.config.command, e
                )));
            }
        }

        let output = output.map_err(|e| {
            TaskRunnerError::Transient(format!("failed to wait for '{}': {}", self.config.command, e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = match output.status.code() {
                Some(code) => format!("exited with code {}: {}", code, stderr.trim()),
                None => format!("terminated by signal: {}", stderr.trim()),
            };
            warn!(step = %request.step_id, "Task runner {}", message);

            return match output.status.code() {
                Some(code) if !self.config.transient_exit_codes.contains(&code) => {
                    Err(TaskRunnerError::Fatal(message))
                }
                _ => Err(TaskRunnerError::Transient(message)),
            };
        }

        let stdout = String::from_utf8(output.stdout).map_err(|e| {
            TaskRunnerError::Fatal(format!("task runner output is not UTF-8: {}", e))
        })?;

        let (text, confidence) = split_confidence(&stdout);
        debug!(step = %request.step_id, bytes = text.len(), "Task runner finished");

        let mut result = TaskOutput::new(text).with_metadata(serde_json::json!({
            "runner": "subprocess",
            "command": self.config.command,
        }));
        result.confidence = confidence;
        Ok(result)
    }
}

/// Strip a trailing `CONFIDENCE: <float>` line, returning the remaining text and the value
fn split_confidence(stdout: &str) -> (String, Option<f64>) {
    let trimmed = stdout.trim_end();
    let (body, last) = match trimmed.rfind('\n') {
        Some(idx) => (&trimmed[..idx], &trimmed[idx + 1..]),
        None => ("", trimmed),
    };

    let confidence = last
        .trim()
        .strip_prefix(CONFIDENCE_PREFIX)
        .and_then(|value| value.trim().parse::<f64>().ok());

    match confidence {
        Some(value) => (body.trim_end().to_string(), Some(value)),
        None => (trimmed.to_string(), None),
    }
}
