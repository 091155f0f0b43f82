//! TOML configuration schema and loader.
//!
//! All fields carry `#[serde(default)]` so a partially-filled (or entirely
//! missing) config file still yields a fully working core — mirrors
//! [`load_default_config`]'s fallback-to-`Default` behavior.
//!
//! # Loading order
//! 1. Parse the path in `AGENTCORE_CONFIG`, or `~/.agentcore/config.toml`
//! 2. Apply `AGENTCORE_*` environment variable overrides
//! 3. Fall back to [`AppConfig::default()`] if the file is missing

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ─── ExecConfig ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecConfig {
    /// Whether the Shell Guard's built-in deny patterns are enforced.
    pub enable_deny_patterns: bool,
    /// Additional deny-list regexes, applied on top of the built-ins.
    pub custom_deny_patterns: Vec<String>,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            enable_deny_patterns: true,
            custom_deny_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ToolsConfig {
    pub exec: ExecConfig,
}

// ─── McpConfig ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct McpServerEntry {
    pub name: String,
    pub enabled: bool,
    /// stdio command to launch, if this server speaks over a child process.
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    /// SSE or streamable-http endpoint, if this server speaks over HTTP.
    pub url: Option<String>,
    pub startup_timeout_secs: u64,
    pub call_timeout_secs: u64,
    pub tool_prefix: Option<String>,
}

impl Default for McpServerEntry {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: true,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            url: None,
            startup_timeout_secs: 10,
            call_timeout_secs: 30,
            tool_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct McpConfig {
    pub enabled: bool,
    pub servers: Vec<McpServerEntry>,
}

// ─── SubagentConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SubagentConfig {
    pub max_concurrent: usize,
    pub max_tasks: usize,
    pub max_depth: u32,
}

impl Default for SubagentConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            max_tasks: 50,
            max_depth: 3,
        }
    }
}

// ─── ParallelConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParallelModeSetting {
    #[default]
    ReadOnlyOnly,
    All,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParallelOverrideSetting {
    SerialOnly,
    ReadOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ParallelConfig {
    pub enabled: bool,
    pub max_concurrency: usize,
    pub mode: ParallelModeSetting,
    /// Per-tool-name override of the default parallelism decision.
    pub tool_policy_overrides: HashMap<String, ParallelOverrideSetting>,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrency: 4,
            mode: ParallelModeSetting::default(),
            tool_policy_overrides: HashMap::new(),
        }
    }
}

// ─── ModelsConfig ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ModelCandidate {
    pub model: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ModelsConfig {
    /// Models a team member's per-member override is allowed to select. An
    /// empty list means unrestricted (any model name is accepted).
    pub allowed: Vec<ModelCandidate>,
}

// ─── AppConfig ────────────────────────────────────────────────────────────────

/// Top-level application configuration.
///
/// Loaded from `~/.agentcore/config.toml`, falling back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub tools: ToolsConfig,
    pub mcp: McpConfig,
    pub subagent: SubagentConfig,
    pub parallel: ParallelConfig,
    pub models: ModelsConfig,
}

// ─── default_config_path ─────────────────────────────────────────────────────

/// Return the default config file path: `~/.agentcore/config.toml`.
pub fn default_config_path() -> Result<PathBuf, String> {
    dirs::home_dir()
        .map(|h| h.join(".agentcore").join("config.toml"))
        .ok_or_else(|| "could not determine home directory".to_string())
}

// ─── load_config ─────────────────────────────────────────────────────────────

/// Load [`AppConfig`] from the given path, falling back to defaults if the
/// file does not exist, then applying environment variable overrides.
pub fn load_config(path: &Path) -> Result<AppConfig, String> {
    let mut config = match fs::read_to_string(path) {
        Ok(content) => {
            toml::from_str::<AppConfig>(&content).map_err(|e| format!("failed to parse config at {path:?}: {e}"))?
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
        Err(e) => return Err(format!("failed to read config at {path:?}: {e}")),
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Load config from the default path. Never fails: a missing or invalid
/// config file yields [`AppConfig::default()`].
pub fn load_default_config() -> AppConfig {
    let path = env::var("AGENTCORE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_config_path().unwrap_or_else(|_| PathBuf::from("config.toml")));

    load_config(&path).unwrap_or_default()
}

// ─── apply_env_overrides ─────────────────────────────────────────────────────

/// Apply `AGENTCORE_*` environment variable overrides to `config`.
///
/// Supported overrides:
/// - `AGENTCORE_MCP_ENABLED`       → `mcp.enabled` (1/0)
/// - `AGENTCORE_SUBAGENT_MAX_CONCURRENT` → `subagent.max_concurrent`
/// - `AGENTCORE_SUBAGENT_MAX_DEPTH`       → `subagent.max_depth`
/// - `AGENTCORE_PARALLEL_ENABLED`  → `parallel.enabled` (1/0)
fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(v) = env::var("AGENTCORE_MCP_ENABLED") {
        config.mcp.enabled = v == "1" || v.eq_ignore_ascii_case("true");
    }
    if let Ok(v) = env::var("AGENTCORE_SUBAGENT_MAX_CONCURRENT") {
        if let Ok(n) = v.parse::<usize>() {
            config.subagent.max_concurrent = n;
        }
    }
    if let Ok(v) = env::var("AGENTCORE_SUBAGENT_MAX_DEPTH") {
        if let Ok(n) = v.parse::<u32>() {
            config.subagent.max_depth = n;
        }
    }
    if let Ok(v) = env::var("AGENTCORE_PARALLEL_ENABLED") {
        config.parallel.enabled = v == "1" || v.eq_ignore_ascii_case("true");
    }
}

// ─── save_config ─────────────────────────────────────────────────────────────

/// Atomically save `config` to `path`: write `<path>.tmp`, back up any
/// existing file as `<path>.bak`, then rename the temp file into place.
pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), String> {
    let content = toml::to_string_pretty(config).map_err(|e| format!("failed to serialise config: {e}"))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("failed to create config dir: {e}"))?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, &content).map_err(|e| format!("failed to write temp config: {e}"))?;

    if path.exists() {
        let bak_path = path.with_extension("toml.bak");
        fs::copy(path, &bak_path).map_err(|e| format!("failed to backup config: {e}"))?;
    }

    fs::rename(&tmp_path, path).map_err(|e| format!("failed to replace config file: {e}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nonexistent.toml");
        let config = load_config(&path).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn load_partial_config_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[subagent]
max_concurrent = 10
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.subagent.max_concurrent, 10);
        assert_eq!(config.subagent.max_depth, 3);
        assert!(config.tools.exec.enable_deny_patterns);
    }

    #[test]
    fn load_full_config() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[tools.exec]
enable_deny_patterns = true
custom_deny_patterns = ["rm -rf /"]

[mcp]
enabled = true

[[mcp.servers]]
name = "filesystem"
command = "mcp-server-filesystem"
args = ["--root", "/tmp"]

[subagent]
max_concurrent = 2
max_tasks = 10
max_depth = 1

[parallel]
enabled = false
max_concurrency = 8
mode = "all"

[models]
allowed = [{ model = "gpt-4o-mini", tags = ["cheap"] }]
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.tools.exec.custom_deny_patterns, vec!["rm -rf /"]);
        assert!(config.mcp.enabled);
        assert_eq!(config.mcp.servers.len(), 1);
        assert_eq!(config.mcp.servers[0].name, "filesystem");
        assert_eq!(config.subagent.max_concurrent, 2);
        assert!(!config.parallel.enabled);
        assert_eq!(config.parallel.mode, ParallelModeSetting::All);
        assert_eq!(config.models.allowed[0].model, "gpt-4o-mini");
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut original = AppConfig::default();
        original.subagent.max_concurrent = 9;
        original.mcp.enabled = true;

        save_config(&path, &original).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded, original, "config should round-trip through save/load");
    }

    #[test]
    fn save_creates_backup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        save_config(&path, &AppConfig::default()).unwrap();
        save_config(&path, &AppConfig::default()).unwrap();

        let bak = path.with_extension("toml.bak");
        assert!(bak.exists(), "backup file should exist after second save");
    }

    #[test]
    fn load_invalid_toml_returns_error() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "this is not valid toml!!!");
        let result = load_config(&path);
        assert!(result.is_err(), "invalid TOML should return an error");
    }
}
