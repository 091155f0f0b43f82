//! Shell tool: the [`Tool`] front-end over [`ShellGuard`] + [`SandboxExecutor`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::shell_guard::ShellGuard;
use crate::tool::{Tool, ToolResult};

pub struct ShellTool {
    guard: Arc<ShellGuard>,
}

impl ShellTool {
    pub fn new(guard: Arc<ShellGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return its stdout/stderr. Commands are checked against \
         deny patterns and, if a workspace is configured, confined to it."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "The shell command to execute."},
                "working_dir": {"type": "string", "description": "Optional working directory."}
            },
            "required": ["command"],
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(command) = args.get("command").and_then(|v| v.as_str()) else {
            return ToolResult::err("missing required argument 'command'");
        };
        let working_dir = args.get("working_dir").and_then(|v| v.as_str()).map(str::to_string);

        match self.guard.execute(command, working_dir).await {
            Ok(output) => {
                let text = if output.stderr.is_empty() {
                    output.stdout
                } else if output.stdout.is_empty() {
                    format!("STDERR: {}", output.stderr)
                } else {
                    format!("{}\nSTDERR: {}", output.stdout, output.stderr)
                };
                if output.timed_out || output.exit_code.is_some_and(|c| c != 0) {
                    ToolResult::err(text)
                } else {
                    ToolResult::ok(text)
                }
            }
            Err(reason) => ToolResult::err_kind(crate::error::ErrorKind::PolicyBlock, reason),
        }
    }
}
