//! The three MCP transports: a child process speaking newline-delimited
//! JSON-RPC over stdio, an SSE endpoint, and chunked `streamable_http`.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;

use super::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

#[derive(Debug, Clone)]
pub enum TransportKind {
    Command {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        working_dir: Option<String>,
    },
    Sse {
        url: String,
    },
    StreamableHttp {
        url: String,
    },
}

/// An established MCP session, abstracting over the three transport kinds
/// behind one `call`/`notify` surface.
#[async_trait::async_trait]
pub trait McpTransport: Send + Sync {
    async fn call(&self, id: u64, method: &str, params: Option<Value>) -> Result<JsonRpcResponse, String>;
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), String>;
    /// Attempt a graceful shutdown within `timeout`, then force-terminate.
    async fn stop(&self, timeout: Duration);
}

/// Child-process stdio transport: one JSON object per line on stdin/stdout.
pub struct CommandTransport {
    inner: Mutex<CommandState>,
}

struct CommandState {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

impl CommandTransport {
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        working_dir: Option<&str>,
        startup_timeout: Duration,
    ) -> Result<Self, String> {
        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args);
        cmd.envs(env);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = tokio::time::timeout(startup_timeout, async { cmd.spawn() })
            .await
            .map_err(|_| "timed out spawning MCP server process".to_string())?
            .map_err(|e| format!("failed to spawn MCP server: {e}"))?;

        let stdin = child.stdin.take().ok_or("child process has no stdin")?;
        let stdout = child.stdout.take().ok_or("child process has no stdout")?;

        Ok(Self {
            inner: Mutex::new(CommandState {
                child,
                stdin: Some(stdin),
                stdout: BufReader::new(stdout),
            }),
        })
    }
}

#[async_trait::async_trait]
impl McpTransport for CommandTransport {
    async fn call(&self, id: u64, method: &str, params: Option<Value>) -> Result<JsonRpcResponse, String> {
        let request = JsonRpcRequest::new(id, method, params);
        let mut line = serde_json::to_string(&request).map_err(|e| e.to_string())?;
        line.push('\n');

        let mut state = self.inner.lock().await;
        let stdin = state.stdin.as_mut().ok_or("MCP server stdin already closed")?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| format!("failed to write to MCP server stdin: {e}"))?;

        let mut response_line = String::new();
        state
            .stdout
            .read_line(&mut response_line)
            .await
            .map_err(|e| format!("failed to read from MCP server stdout: {e}"))?;
        if response_line.is_empty() {
            return Err("MCP server closed stdout (EOF)".to_string());
        }
        serde_json::from_str(&response_line).map_err(|e| format!("malformed JSON-RPC response: {e}"))
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), String> {
        let notification = JsonRpcNotification::new(method, params);
        let mut line = serde_json::to_string(&notification).map_err(|e| e.to_string())?;
        line.push('\n');
        let mut state = self.inner.lock().await;
        let stdin = state.stdin.as_mut().ok_or("MCP server stdin already closed")?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| format!("failed to write notification to MCP server stdin: {e}"))
    }

    async fn stop(&self, timeout: Duration) {
        let mut state = self.inner.lock().await;
        // Dropping stdin closes it, signalling EOF to a well-behaved server.
        state.stdin.take();
        let _ = tokio::time::timeout(timeout, state.child.wait()).await;
        let _ = state.child.start_kill();
    }
}

/// SSE transport: requests are posted as HTTP and responses arrive as
/// Server-Sent Events on the same connection.
pub struct SseTransport {
    url: String,
    client: reqwest::Client,
}

impl SseTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl McpTransport for SseTransport {
    async fn call(&self, id: u64, method: &str, params: Option<Value>) -> Result<JsonRpcResponse, String> {
        let request = JsonRpcRequest::new(id, method, params);
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("MCP SSE request failed: {e}"))?;

        let mut stream = response.bytes_stream().eventsource();
        while let Some(event) = stream.next().await {
            let event = event.map_err(|e| format!("MCP SSE stream error: {e}"))?;
            if let Ok(parsed) = serde_json::from_str::<JsonRpcResponse>(&event.data) {
                if parsed.id == Some(id) {
                    return Ok(parsed);
                }
            }
        }
        Err("MCP SSE stream ended without a matching response".to_string())
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), String> {
        let notification = JsonRpcNotification::new(method, params);
        self.client
            .post(&self.url)
            .json(&notification)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| format!("MCP SSE notification failed: {e}"))
    }

    async fn stop(&self, _timeout: Duration) {
        // Stateless HTTP transport — nothing to tear down.
    }
}

/// Chunked HTTP transport: request/response correlate by JSON-RPC `id` over
/// a single POST whose body is read to completion (no event framing).
pub struct StreamableHttpTransport {
    url: String,
    client: reqwest::Client,
}

impl StreamableHttpTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl McpTransport for StreamableHttpTransport {
    async fn call(&self, id: u64, method: &str, params: Option<Value>) -> Result<JsonRpcResponse, String> {
        let request = JsonRpcRequest::new(id, method, params);
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("MCP streamable_http request failed: {e}"))?;
        response
            .json::<JsonRpcResponse>()
            .await
            .map_err(|e| format!("malformed MCP streamable_http response: {e}"))
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), String> {
        let notification = JsonRpcNotification::new(method, params);
        self.client
            .post(&self.url)
            .json(&notification)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| format!("MCP streamable_http notification failed: {e}"))
    }

    async fn stop(&self, _timeout: Duration) {}
}
