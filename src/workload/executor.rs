use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{CoordError, Result};

/// One process invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ProcessSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
        }
    }

    /// `sh -c <script>`
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Command and arguments joined for logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Turn a non-zero exit into a workload failure for `workload`.
    pub fn ensure_success(self, workload: &str) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        let message = if self.stderr.trim().is_empty() {
            format!("Exit code: {:?}", self.exit_code)
        } else {
            self.stderr.trim().to_string()
        };
        Err(CoordError::WorkloadFailed {
            workload: workload.to_string(),
            exit_code: self.exit_code,
            message,
        })
    }
}

/// Launches external processes on behalf of the coordinator.
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    /// Run `spec` to completion. A non-zero exit is reported in the output, not
    /// as an error; failing to spawn is a `WorkloadFailed` error.
    async fn run(&self, spec: &ProcessSpec, cancel: &CancellationToken) -> Result<ProcessOutput>;
}

/// Executes processes directly on the host via `tokio::process`.
///
/// The child is killed if the run is cancelled.
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor;

impl ShellExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessExecutor for ShellExecutor {
    async fn run(&self, spec: &ProcessSpec, cancel: &CancellationToken) -> Result<ProcessOutput> {
        let command_line = spec.command_line();
        tracing::info!(
            command = %command_line,
            working_dir = ?spec.working_dir,
            "Executing process"
        );

        let mut command = Command::new(&spec.command);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|e| {
            tracing::error!(command = %command_line, error = %e, "Process failed to start");
            CoordError::WorkloadFailed {
                workload: command_line.clone(),
                exit_code: None,
                message: e.to_string(),
            }
        })?;

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::warn!(command = %command_line, "Process cancelled");
                return Err(CoordError::Cancelled);
            }
            output = child.wait_with_output() => output.map_err(|e| CoordError::WorkloadFailed {
                workload: command_line.clone(),
                exit_code: None,
                message: e.to_string(),
            })?,
        };

        let result = ProcessOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        tracing::info!(
            command = %command_line,
            exit_code = ?result.exit_code,
            "Process completed"
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_spec_command_line() {
        let spec = ProcessSpec::shell("docker ps | wc -l");
        assert_eq!(spec.command, "sh");
        assert_eq!(spec.command_line(), "sh -c docker ps | wc -l");
    }

    #[test]
    fn ensure_success_uses_stderr_when_present() {
        let output = ProcessOutput {
            exit_code: Some(2),
            stdout: String::new(),
            stderr: "compose file missing\n".to_string(),
        };
        match output.ensure_success("svcA") {
            Err(CoordError::WorkloadFailed {
                workload,
                exit_code,
                message,
            }) => {
                assert_eq!(workload, "svcA");
                assert_eq!(exit_code, Some(2));
                assert_eq!(message, "compose file missing");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn ensure_success_passes_zero_exit() {
        let output = ProcessOutput {
            exit_code: Some(0),
            stdout: "ok".to_string(),
            stderr: String::new(),
        };
        assert_eq!(output.clone().ensure_success("svcA").unwrap(), output);
    }
}
