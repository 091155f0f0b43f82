//! `spawn` tool: the Subagent Manager's entry point on the model-facing tool
//! surface, so subagent delegation is dispatched through the registry/batch
//! executor exactly like any other tool call.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ErrorKind;
use crate::session::DEFAULT_SESSION_KEY;
use crate::subagent::{SubagentManager, SubagentTaskSnapshot};
use crate::tool::{Tool, ToolResult};

pub struct SpawnTool {
    manager: Arc<SubagentManager>,
}

impl SpawnTool {
    pub fn new(manager: Arc<SubagentManager>) -> Self {
        Self { manager }
    }
}

fn format_snapshot(snapshot: &SubagentTaskSnapshot) -> String {
    format!(
        "spawned task {} (\"{}\"), status: {:?}, depth: {}",
        snapshot.id, snapshot.label, snapshot.status, snapshot.depth
    )
}

#[async_trait]
impl Tool for SpawnTool {
    fn name(&self) -> &str {
        "spawn"
    }

    fn description(&self) -> &str {
        "Delegate a task to a subordinate subagent. Returns a running task snapshot immediately; the subagent's own tool loop proceeds in the background."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task": {"type": "string", "description": "The task to delegate to the subagent."},
                "label": {"type": "string", "description": "Short human-readable label for the task."},
                "agent_id": {"type": "string", "description": "Optional agent profile id to resolve provider/model/tools for."},
                "sender_id": {
                    "type": "string",
                    "description": "The calling session's identifier (e.g. \"subagent:<parent id>\" when a subagent spawns a child). Defaults to the top-level session."
                },
                "origin_channel": {"type": "string"},
                "origin_chat_id": {"type": "string"},
            },
            "required": ["task", "label"],
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(task) = args.get("task").and_then(|v| v.as_str()) else {
            return ToolResult::err("spawn requires a \"task\" string");
        };
        let Some(label) = args.get("label").and_then(|v| v.as_str()) else {
            return ToolResult::err("spawn requires a \"label\" string");
        };
        let agent_id = args.get("agent_id").and_then(|v| v.as_str()).map(|s| s.to_string());
        let sender_id = args.get("sender_id").and_then(|v| v.as_str()).unwrap_or(DEFAULT_SESSION_KEY);
        let origin_channel = args
            .get("origin_channel")
            .and_then(|v| v.as_str())
            .unwrap_or("spawn")
            .to_string();
        let origin_chat_id = args
            .get("origin_chat_id")
            .and_then(|v| v.as_str())
            .unwrap_or("spawn")
            .to_string();

        let result = self
            .manager
            .clone()
            .spawn_task(sender_id, task.to_string(), label.to_string(), agent_id, origin_channel, origin_chat_id, None)
            .await;

        match result {
            Ok(snapshot) => ToolResult::ok(format_snapshot(&snapshot)),
            Err(reason) => ToolResult::err_kind(ErrorKind::PolicyBlock, reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::TokioBroadcastBus;
    use crate::provider::{ChatRequest, ChatResponse, Provider, ProviderResult};
    use crate::subagent::SubagentLimits;
    use crate::tool::ToolRegistry;

    struct StubProvider;
    #[async_trait]
    impl Provider for StubProvider {
        async fn chat(&self, _request: ChatRequest) -> ProviderResult<ChatResponse> {
            Ok(ChatResponse {
                content: "done".to_string(),
                ..Default::default()
            })
        }
        fn default_model(&self) -> String {
            "test".to_string()
        }
        fn provider_name(&self) -> &str {
            "stub"
        }
    }

    fn spawn_tool() -> SpawnTool {
        let manager = Arc::new(SubagentManager::new(
            SubagentLimits::default(),
            Arc::new(TokioBroadcastBus::new()),
            Arc::new(StubProvider),
            "test".to_string(),
            Arc::new(ToolRegistry::new()),
        ));
        SpawnTool::new(manager)
    }

    #[tokio::test]
    async fn spawn_tool_is_reachable_through_the_registry() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(spawn_tool())).await;
        let result = registry
            .execute("user:1", "spawn", serde_json::json!({"task": "summarize the repo", "label": "summary"}))
            .await;
        assert!(!result.is_error);
        assert!(result.for_llm.contains("spawned task"));
    }

    #[tokio::test]
    async fn missing_task_is_a_validation_error() {
        let tool = spawn_tool();
        let result = tool.execute(serde_json::json!({"label": "l"})).await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn depth_limit_denial_is_a_policy_block() {
        let manager = Arc::new(SubagentManager::new(
            SubagentLimits { max_depth: 1, ..Default::default() },
            Arc::new(TokioBroadcastBus::new()),
            Arc::new(StubProvider),
            "test".to_string(),
            Arc::new(ToolRegistry::new()),
        ));
        let tool = SpawnTool::new(manager);
        let result = tool
            .execute(serde_json::json!({"task": "t", "label": "l", "sender_id": "subagent:ghost"}))
            .await;
        assert!(result.is_error);
        assert_eq!(result.err.unwrap().kind, ErrorKind::PolicyBlock);
    }
}
