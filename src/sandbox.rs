//! The sandbox collaborator: runs a validated shell command and captures its
//! output under a timeout. [`ShellGuard`] never executes a command itself —
//! it validates, then hands off to this trait.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

#[derive(Debug, Clone, Default)]
pub struct ExecRequest {
    pub command: String,
    pub working_dir: Option<String>,
    pub env: HashMap<String, String>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    async fn exec(&self, request: ExecRequest) -> Result<ExecOutput, String>;
}

/// Default executor: spawns `/bin/sh -c <command>` via `tokio::process`.
pub struct ProcessSandbox;

#[async_trait]
impl SandboxExecutor for ProcessSandbox {
    async fn exec(&self, request: ExecRequest) -> Result<ExecOutput, String> {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(&request.command);
        if let Some(dir) = &request.working_dir {
            cmd.current_dir(dir);
        }
        for (k, v) in &request.env {
            cmd.env(k, v);
        }
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        let child = cmd.spawn().map_err(|e| format!("failed to spawn process: {e}"))?;

        let timeout = request.timeout.unwrap_or(Duration::from_secs(120));
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(ExecOutput {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code(),
                timed_out: false,
            }),
            Ok(Err(e)) => Err(format!("process execution failed: {e}")),
            Err(_) => Ok(ExecOutput {
                stdout: String::new(),
                stderr: format!("command timed out after {timeout:?}"),
                exit_code: None,
                timed_out: true,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_simple_command() {
        let sandbox = ProcessSandbox;
        let out = sandbox
            .exec(ExecRequest {
                command: "echo hello".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(out.stdout.contains("hello"));
        assert_eq!(out.exit_code, Some(0));
    }

    #[tokio::test]
    async fn times_out_long_running_command() {
        let sandbox = ProcessSandbox;
        let out = sandbox
            .exec(ExecRequest {
                command: "sleep 5".to_string(),
                timeout: Some(Duration::from_millis(50)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(out.timed_out);
    }
}
