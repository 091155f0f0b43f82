//! Shell Guard — deny/allow regex filtering plus workspace path containment,
//! gating access to the [`SandboxExecutor`] collaborator.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;

use crate::sandbox::{ExecOutput, ExecRequest, SandboxExecutor};

/// Fixed deny patterns applied regardless of user configuration. Matched
/// against the trimmed, lowercased command text.
fn builtin_deny_patterns() -> Vec<&'static str> {
    vec![
        r"rm\s+-rf\s+/",
        r"rm\s+-rf\s+~",
        r"mkfs\.",
        r":\(\)\s*\{\s*:\s*\|\s*:\s*;\s*\}",  // fork bomb
        r">\s*/dev/sd[a-z]",
        r"dd\s+.*of=/dev/",
        r"\bcurl\b.*\|\s*(sh|bash)\b",
        r"\bwget\b.*\|\s*(sh|bash)\b",
        r"\bsudo\s+rm\b",
        r"\bnpm\s+publish\b",
        r"\bcargo\s+publish\b",
        r"\bgit\s+push\s+.*--force\b",
        r"\bshutdown\b",
        r"\breboot\b",
        r"\$\(.*\)",  // command substitution
        r"`[^`]*`",   // backtick substitution
    ]
}

#[derive(Debug, Clone)]
pub struct ShellGuardConfig {
    pub extra_deny: Vec<String>,
    pub allow: Vec<String>,
    pub workspace: Option<PathBuf>,
    pub timeout: Duration,
}

impl Default for ShellGuardConfig {
    fn default() -> Self {
        Self {
            extra_deny: Vec::new(),
            allow: Vec::new(),
            workspace: None,
            timeout: Duration::from_secs(120),
        }
    }
}

pub struct ShellGuard {
    deny: Vec<Regex>,
    allow: Vec<Regex>,
    workspace: Option<PathBuf>,
    timeout: Duration,
    sandbox: Arc<dyn SandboxExecutor>,
}

impl ShellGuard {
    pub fn new(config: ShellGuardConfig, sandbox: Arc<dyn SandboxExecutor>) -> Result<Self, String> {
        let mut deny = Vec::new();
        for pattern in builtin_deny_patterns() {
            deny.push(Regex::new(pattern).map_err(|e| format!("invalid builtin deny pattern: {e}"))?);
        }
        for pattern in &config.extra_deny {
            deny.push(Regex::new(pattern).map_err(|e| format!("invalid deny pattern {pattern:?}: {e}"))?);
        }
        let mut allow = Vec::new();
        for pattern in &config.allow {
            allow.push(Regex::new(pattern).map_err(|e| format!("invalid allow pattern {pattern:?}: {e}"))?);
        }
        Ok(Self {
            deny,
            allow,
            workspace: config.workspace,
            timeout: config.timeout,
            sandbox,
        })
    }

    /// Validate `command`; `Err` names the rejection reason.
    pub fn validate(&self, command: &str) -> Result<(), String> {
        let normalized = command.trim().to_lowercase();

        for pattern in &self.deny {
            if pattern.is_match(&normalized) {
                return Err(format!("command denied by policy: matches {}", pattern.as_str()));
            }
        }

        if !self.allow.is_empty() {
            let allowed = self.allow.iter().any(|p| p.is_match(&normalized));
            if !allowed {
                return Err("command does not match any allowed pattern".to_string());
            }
        }

        if let Some(workspace) = &self.workspace {
            self.check_workspace_containment(command, workspace)?;
        }

        Ok(())
    }

    fn check_workspace_containment(&self, command: &str, workspace: &Path) -> Result<(), String> {
        if command.contains("../") || command.contains("..\\") {
            return Err("command references a parent directory (\"../\")".to_string());
        }

        let workspace = workspace
            .canonicalize()
            .unwrap_or_else(|_| workspace.to_path_buf());

        for literal in extract_path_literals(command) {
            let path = PathBuf::from(&literal);
            let resolved = if path.is_absolute() {
                path
            } else {
                workspace.join(&path)
            };
            let resolved = resolved.canonicalize().unwrap_or(resolved);
            if !resolved.starts_with(&workspace) {
                return Err(format!(
                    "path \"{literal}\" falls outside the workspace"
                ));
            }
        }
        Ok(())
    }

    /// Execute a command already validated by [`Self::validate`].
    pub async fn execute(&self, command: &str, working_dir: Option<String>) -> Result<ExecOutput, String> {
        self.validate(command)?;
        self.sandbox
            .exec(ExecRequest {
                command: command.to_string(),
                working_dir,
                timeout: Some(self.timeout),
                ..Default::default()
            })
            .await
    }
}

/// Extract whitespace-delimited tokens that look like absolute path literals
/// (`/…` on POSIX, `X:\…` on Windows). `NAME=value` environment-assignment
/// prefixes are exempt on the value side: only tokens that are themselves a
/// bare path (no `=`) are extracted, matching the "value side exempt" rule —
/// a token like `FOO=/etc/passwd` is not treated as a path literal.
fn extract_path_literals(command: &str) -> Vec<String> {
    let windows_path = Regex::new(r"^[A-Za-z]:\\").expect("valid regex");
    command
        .split_whitespace()
        .filter(|token| !token.contains('='))
        .filter(|token| token.starts_with('/') || windows_path.is_match(token))
        .map(|token| token.trim_matches(|c| c == '"' || c == '\'').to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingSandbox(Arc<AtomicUsize>);
    #[async_trait::async_trait]
    impl SandboxExecutor for RecordingSandbox {
        async fn exec(&self, _request: ExecRequest) -> Result<ExecOutput, String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(ExecOutput {
                stdout: "ok".to_string(),
                exit_code: Some(0),
                ..Default::default()
            })
        }
    }

    fn guard(config: ShellGuardConfig) -> ShellGuard {
        ShellGuard::new(config, Arc::new(RecordingSandbox(Arc::new(AtomicUsize::new(0))))).unwrap()
    }

    #[test]
    fn denies_rm_rf_root() {
        let g = guard(ShellGuardConfig::default());
        assert!(g.validate("rm -rf /").is_err());
    }

    #[test]
    fn denies_command_substitution() {
        let g = guard(ShellGuardConfig::default());
        assert!(g.validate("echo $(cat /etc/passwd)").is_err());
    }

    #[test]
    fn allows_benign_command() {
        let g = guard(ShellGuardConfig::default());
        assert!(g.validate("ls -la").is_ok());
    }

    #[test]
    fn allow_set_restricts_to_matching_commands() {
        let mut config = ShellGuardConfig::default();
        config.allow = vec![r"^git\b".to_string()];
        let g = guard(config);
        assert!(g.validate("git status").is_ok());
        assert!(g.validate("ls -la").is_err());
    }

    #[test]
    fn rejects_parent_directory_reference() {
        let mut config = ShellGuardConfig::default();
        config.workspace = Some(PathBuf::from("/tmp"));
        let g = guard(config);
        assert!(g.validate("cat ../secrets").is_err());
    }

    #[test]
    fn rejects_absolute_path_outside_workspace() {
        let mut config = ShellGuardConfig::default();
        config.workspace = Some(std::env::temp_dir());
        let g = guard(config);
        assert!(g.validate("cat /etc/passwd").is_err());
    }

    #[test]
    fn env_assignment_value_is_exempt_from_path_check() {
        let mut config = ShellGuardConfig::default();
        config.workspace = Some(std::env::temp_dir());
        let g = guard(config);
        assert!(g.validate("FOO=/etc/passwd echo hi").is_ok());
    }
}
