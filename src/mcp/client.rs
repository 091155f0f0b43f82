//! External Tool Client — discovers and invokes tools on a configured MCP
//! server, registering each as a local [`Tool`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::protocol::{CallToolResult, ContentElement, ListToolsResult, McpTool};
use super::transport::{CommandTransport, McpTransport, SseTransport, StreamableHttpTransport, TransportKind};
use crate::tool::{Tool, ToolResult};

#[derive(Debug, Clone)]
pub struct McpServerConfig {
    pub name: String,
    pub enabled: bool,
    pub transport: TransportKind,
    pub startup_timeout: Duration,
    pub call_timeout: Duration,
    pub terminate_timeout: Duration,
    pub tool_prefix: Option<String>,
}

/// Sanitize a candidate local tool name: lowercase, replace any character
/// outside `[a-z0-9_-]` with `_`, collapse runs of `_`, trim leading/trailing
/// `_`, cap at 64 chars.
pub fn sanitize_tool_name(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let mut replaced = String::with_capacity(lowered.len());
    for c in lowered.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' {
            replaced.push(c);
        } else {
            replaced.push('_');
        }
    }
    let mut collapsed = String::with_capacity(replaced.len());
    let mut last_was_underscore = false;
    for c in replaced.chars() {
        if c == '_' {
            if !last_was_underscore {
                collapsed.push(c);
            }
            last_was_underscore = true;
        } else {
            collapsed.push(c);
            last_was_underscore = false;
        }
    }
    let trimmed = collapsed.trim_matches('_');
    let mut capped: String = trimmed.chars().take(64).collect();
    if capped.is_empty() {
        capped = "tool".to_string();
    }
    capped
}

/// Apply a decimal suffix to `base` until it's unique against `taken`,
/// mutating `taken` with the chosen name.
fn disambiguate(base: &str, taken: &mut HashSet<String>) -> String {
    if taken.insert(base.to_string()) {
        return base.to_string();
    }
    let mut n = 2u32;
    loop {
        let candidate = format!("{base}_{n}");
        if candidate.len() <= 64 && taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Normalize a remote input schema to an object schema with a `properties`
/// field, defaulting missing fields to `{}`.
fn normalize_schema(schema: &Value) -> Value {
    let mut object = schema
        .as_object()
        .cloned()
        .unwrap_or_default();
    object
        .entry("type".to_string())
        .or_insert_with(|| Value::String("object".to_string()));
    object
        .entry("properties".to_string())
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    Value::Object(object)
}

/// A live connection to one MCP server: a started transport, a JSON-RPC id
/// counter, and its discovered tool list.
pub struct McpClient {
    config: McpServerConfig,
    transport: Mutex<Option<Arc<dyn McpTransport>>>,
    next_id: AtomicU64,
    tools: Mutex<Vec<(String, McpTool)>>,
}

impl McpClient {
    pub fn new(config: McpServerConfig) -> Self {
        Self {
            config,
            transport: Mutex::new(None),
            next_id: AtomicU64::new(1),
            tools: Mutex::new(Vec::new()),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn build_transport(&self) -> Result<Arc<dyn McpTransport>, String> {
        match &self.config.transport {
            TransportKind::Command { command, args, env, working_dir } => {
                let t = CommandTransport::spawn(
                    command,
                    args,
                    env,
                    working_dir.as_deref(),
                    self.config.startup_timeout,
                )
                .await?;
                Ok(Arc::new(t))
            }
            TransportKind::Sse { url } => Ok(Arc::new(SseTransport::new(url.clone()))),
            TransportKind::StreamableHttp { url } => Ok(Arc::new(StreamableHttpTransport::new(url.clone()))),
        }
    }

    /// Open a session, perform the `initialize`/`notifications/initialized`
    /// handshake, and discover tools via paginated `tools/list`.
    pub async fn start(&self) -> Result<(), String> {
        if !self.config.enabled {
            return Err(format!("MCP server \"{}\" is disabled", self.config.name));
        }

        let transport = tokio::time::timeout(self.config.startup_timeout, self.build_transport())
            .await
            .map_err(|_| format!("MCP server \"{}\" startup timed out", self.config.name))??;

        let init_params = serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": { "name": "agentcore", "version": env!("CARGO_PKG_VERSION") },
        });
        transport
            .call(self.next_id(), "initialize", Some(init_params))
            .await?
            .into_result()?;
        transport.notify("notifications/initialized", None).await.ok();

        let mut discovered = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor
                .as_ref()
                .map(|c| serde_json::json!({ "cursor": c }));
            let response = transport.call(self.next_id(), "tools/list", params).await?;
            let result: ListToolsResult = serde_json::from_value(response.into_result()?)
                .map_err(|e| format!("malformed tools/list result: {e}"))?;
            discovered.extend(result.tools);
            match result.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let mut taken = HashSet::new();
        let mut registered = Vec::with_capacity(discovered.len());
        let prefix = self
            .config
            .tool_prefix
            .clone()
            .unwrap_or_else(|| format!("mcp_{}", self.config.name));
        for tool in discovered {
            let candidate = sanitize_tool_name(&format!("{prefix}_{}", tool.name));
            let local_name = disambiguate(&candidate, &mut taken);
            registered.push((local_name, tool));
        }

        *self.transport.lock().await = Some(transport);
        *self.tools.lock().await = registered;
        Ok(())
    }

    /// Terminate the active session, honoring `terminate_timeout_ms`.
    pub async fn stop(&self) {
        if let Some(transport) = self.transport.lock().await.take() {
            transport.stop(self.config.terminate_timeout).await;
        }
    }

    pub fn server_name(&self) -> &str {
        &self.config.name
    }

    pub async fn local_tools(self: &Arc<Self>) -> Vec<Arc<dyn Tool>> {
        let tools = self.tools.lock().await;
        tools
            .iter()
            .map(|(local_name, remote)| {
                Arc::new(McpToolProxy {
                    local_name: local_name.clone(),
                    remote_name: remote.name.clone(),
                    description: format!("[{}/{}] {}", self.config.name, remote.name, remote.description),
                    parameters: normalize_schema(&remote.input_schema),
                    client: self.clone(),
                }) as Arc<dyn Tool>
            })
            .collect()
    }

    /// Invoke a remote tool by its original (unsanitized) name.
    pub async fn call_tool(&self, remote_name: &str, args: Value) -> Result<String, String> {
        let transport_guard = self.transport.lock().await;
        let transport = transport_guard
            .as_ref()
            .ok_or_else(|| format!("MCP server \"{}\" is not started", self.config.name))?
            .clone();
        drop(transport_guard);

        let params = serde_json::json!({ "name": remote_name, "arguments": args });
        let response = tokio::time::timeout(
            self.config.call_timeout,
            transport.call(self.next_id(), "tools/call", Some(params)),
        )
        .await
        .map_err(|_| format!("MCP tool call to \"{remote_name}\" timed out"))??;

        let value = response.into_result()?;
        let result: CallToolResult =
            serde_json::from_value(value).map_err(|e| format!("malformed tools/call result: {e}"))?;

        format_call_result(result)
    }
}

/// Format a `tools/call` result per the response-formatting rule: a single
/// text element with no structured payload is returned bare (prefixed on
/// error); otherwise a JSON envelope carrying everything the caller reported.
fn format_call_result(result: CallToolResult) -> Result<String, String> {
    if result.structured_content.is_none() && result.content.len() == 1 {
        if let ContentElement::Text { text } = &result.content[0] {
            return if result.is_error {
                Err(format!("MCP tool error: {text}"))
            } else {
                Ok(text.clone())
            };
        }
    }

    let content_json: Vec<Value> = result
        .content
        .iter()
        .map(|c| match c {
            ContentElement::Text { text } => serde_json::json!({"type": "text", "text": text}),
            ContentElement::Image { data, mime_type } => {
                serde_json::json!({"type": "image", "data": data, "mimeType": mime_type})
            }
            ContentElement::Other => serde_json::json!({"type": "other"}),
        })
        .collect();

    let envelope = serde_json::json!({
        "is_error": result.is_error,
        "content": content_json,
        "structured_content": result.structured_content,
    });
    let rendered = serde_json::to_string_pretty(&envelope).map_err(|e| e.to_string())?;
    if result.is_error {
        Err(rendered)
    } else {
        Ok(rendered)
    }
}

/// Local [`Tool`] proxying one remote MCP tool.
pub struct McpToolProxy {
    local_name: String,
    remote_name: String,
    description: String,
    parameters: Value,
    client: Arc<McpClient>,
}

#[async_trait]
impl Tool for McpToolProxy {
    fn name(&self) -> &str {
        &self.local_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, args: Value) -> ToolResult {
        match self.client.call_tool(&self.remote_name, args).await {
            Ok(text) => ToolResult::ok(text),
            Err(message) => ToolResult::err(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_lowercases_and_replaces_invalid_chars() {
        assert_eq!(sanitize_tool_name("Search Web!"), "search_web");
    }

    #[test]
    fn sanitize_collapses_runs_and_trims() {
        assert_eq!(sanitize_tool_name("__foo___bar__"), "foo_bar");
    }

    #[test]
    fn sanitize_caps_at_64_chars() {
        let long = "a".repeat(100);
        assert_eq!(sanitize_tool_name(&long).len(), 64);
    }

    #[test]
    fn disambiguate_adds_numeric_suffix_on_collision() {
        let mut taken = HashSet::new();
        assert_eq!(disambiguate("search", &mut taken), "search");
        assert_eq!(disambiguate("search", &mut taken), "search_2");
        assert_eq!(disambiguate("search", &mut taken), "search_3");
    }

    #[test]
    fn normalize_schema_fills_missing_properties() {
        let schema = normalize_schema(&Value::Null);
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"].is_object());
    }

    #[test]
    fn format_single_text_result_returns_bare_text() {
        let result = CallToolResult {
            content: vec![ContentElement::Text { text: "42".to_string() }],
            structured_content: None,
            is_error: false,
        };
        assert_eq!(format_call_result(result).unwrap(), "42");
    }

    #[test]
    fn format_single_text_error_result_is_prefixed() {
        let result = CallToolResult {
            content: vec![ContentElement::Text { text: "not found".to_string() }],
            structured_content: None,
            is_error: true,
        };
        let err = format_call_result(result).unwrap_err();
        assert!(err.starts_with("MCP tool error:"));
    }

    #[test]
    fn format_multi_content_result_returns_json_envelope() {
        let result = CallToolResult {
            content: vec![
                ContentElement::Text { text: "a".to_string() },
                ContentElement::Text { text: "b".to_string() },
            ],
            structured_content: None,
            is_error: false,
        };
        let rendered = format_call_result(result).unwrap();
        let parsed: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["content"].as_array().unwrap().len(), 2);
    }
}
