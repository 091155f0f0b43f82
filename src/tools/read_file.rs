//! File-read tool, confined to an optional workspace root.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{Tool, ToolResult};

pub struct ReadFileTool {
    workspace: Option<PathBuf>,
}

impl ReadFileTool {
    pub fn new(workspace: Option<PathBuf>) -> Self {
        Self { workspace }
    }

    fn resolve(&self, raw: &str) -> Result<PathBuf, String> {
        let path = Path::new(raw);
        let Some(workspace) = &self.workspace else {
            return Ok(path.to_path_buf());
        };
        let workspace = workspace.canonicalize().unwrap_or_else(|_| workspace.clone());
        let candidate = if path.is_absolute() { path.to_path_buf() } else { workspace.join(path) };
        let resolved = candidate.canonicalize().unwrap_or(candidate);
        if !resolved.starts_with(&workspace) {
            return Err(format!("path \"{raw}\" falls outside the workspace"));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file. Use max_lines to limit output for large files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path to the file."},
                "max_lines": {"type": "integer", "minimum": 1},
            },
            "required": ["path"],
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(raw_path) = args.get("path").and_then(|v| v.as_str()) else {
            return ToolResult::err("missing required argument 'path'");
        };

        let path = match self.resolve(raw_path) {
            Ok(p) => p,
            Err(reason) => return ToolResult::err_kind(crate::error::ErrorKind::PolicyBlock, reason),
        };

        let max_lines = args.get("max_lines").and_then(|v| v.as_u64()).map(|n| n as usize);

        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                let output = match max_lines {
                    Some(n) => contents.lines().take(n).collect::<Vec<_>>().join("\n"),
                    None => contents,
                };
                ToolResult::ok(output)
            }
            Err(e) => ToolResult::err_kind(
                crate::error::ErrorKind::ResourceUnavailable,
                format!("failed to read \"{}\": {e}", path.display()),
            ),
        }
    }
}
