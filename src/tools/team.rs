//! `team` tool: the Team Orchestrator's entry point on the model-facing tool
//! surface, so multi-member delegation is dispatched through the
//! registry/batch executor exactly like any other tool call.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ErrorKind;
use crate::team::{Produces, TeamMember, TeamOrchestrator, TeamRunConfig, TeamStrategy};
use crate::tool::{Tool, ToolResult};

pub struct TeamTool {
    orchestrator: TeamOrchestrator,
}

impl TeamTool {
    pub fn new(orchestrator: TeamOrchestrator) -> Self {
        Self { orchestrator }
    }
}

fn parse_strategy(value: Option<&str>) -> Result<TeamStrategy, String> {
    match value {
        Some("sequential") => Ok(TeamStrategy::Sequential),
        Some("parallel") => Ok(TeamStrategy::Parallel),
        Some("dag") => Ok(TeamStrategy::Dag),
        Some("evaluator_optimizer") => Ok(TeamStrategy::EvaluatorOptimizer),
        _ => Err("team requires a \"strategy\" of sequential, parallel, dag, or evaluator_optimizer".to_string()),
    }
}

fn parse_produces(value: Option<&str>) -> Option<Produces> {
    match value {
        Some("code") => Some(Produces::Code),
        Some("data") => Some(Produces::Data),
        Some("document") => Some(Produces::Document),
        _ => None,
    }
}

fn parse_member(value: &Value) -> Result<TeamMember, String> {
    let id = value
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "each team member requires an \"id\"".to_string())?;
    let role = value
        .get("role")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "each team member requires a \"role\"".to_string())?;
    let task = value
        .get("task")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "each team member requires a \"task\"".to_string())?;
    let model = value.get("model").and_then(|v| v.as_str()).map(|s| s.to_string());
    let depends_on = value
        .get("depends_on")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect())
        .unwrap_or_default();
    let produces = parse_produces(value.get("produces").and_then(|v| v.as_str()));

    Ok(TeamMember {
        id: id.to_string(),
        role: role.to_string(),
        task: task.to_string(),
        model,
        depends_on,
        produces,
    })
}

#[async_trait]
impl Tool for TeamTool {
    fn name(&self) -> &str {
        "team"
    }

    fn description(&self) -> &str {
        "Run a set of subordinate team members under a sequential, parallel, DAG, or evaluator-optimizer strategy and return each member's output."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "strategy": {
                    "type": "string",
                    "enum": ["sequential", "parallel", "dag", "evaluator_optimizer"],
                },
                "members": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": {"type": "string"},
                            "role": {"type": "string"},
                            "task": {"type": "string"},
                            "model": {"type": "string"},
                            "depends_on": {"type": "array", "items": {"type": "string"}},
                            "produces": {"type": "string", "enum": ["code", "data", "document"]},
                        },
                        "required": ["id", "role", "task"],
                    },
                },
                "max_team_tokens": {"type": "integer"},
            },
            "required": ["strategy", "members"],
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let strategy = match parse_strategy(args.get("strategy").and_then(|v| v.as_str())) {
            Ok(s) => s,
            Err(e) => return ToolResult::err(e),
        };

        let Some(members_value) = args.get("members").and_then(|v| v.as_array()) else {
            return ToolResult::err("team requires a \"members\" array");
        };
        if members_value.is_empty() {
            return ToolResult::err("team requires at least one member");
        }

        let mut members = Vec::with_capacity(members_value.len());
        for raw in members_value {
            match parse_member(raw) {
                Ok(m) => members.push(m),
                Err(e) => return ToolResult::err(e),
            }
        }

        let max_team_tokens = args.get("max_team_tokens").and_then(|v| v.as_i64());
        let config = TeamRunConfig { strategy, members, max_team_tokens };

        match self.orchestrator.run(config).await {
            Ok(result) => {
                let mut summary = result
                    .outcomes
                    .iter()
                    .map(|o| format!("[{}] {}", o.member_id, o.content))
                    .collect::<Vec<_>>()
                    .join("\n\n");
                if let Some(notes) = &result.reviewer_notes {
                    summary.push_str("\n\n--- Reviewer Notes ---\n");
                    summary.push_str(notes);
                }
                ToolResult::ok(summary)
            }
            Err(e) => ToolResult::err_kind(ErrorKind::Fatal, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ChatRequest, ChatResponse, Provider, ProviderResult};
    use crate::tool::ToolRegistry;
    use std::collections::HashSet;
    use std::sync::Arc;

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

    fn team_tool() -> TeamTool {
        let orchestrator = TeamOrchestrator::new(
            Arc::new(StubProvider),
            "test".to_string(),
            Arc::new(ToolRegistry::new()),
            HashSet::new(),
        );
        TeamTool::new(orchestrator)
    }

    #[tokio::test]
    async fn team_tool_is_reachable_through_the_registry() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(team_tool())).await;
        let result = registry
            .execute(
                "user:1",
                "team",
                serde_json::json!({
                    "strategy": "sequential",
                    "members": [{"id": "a", "role": "writer", "task": "draft a summary"}],
                }),
            )
            .await;
        assert!(!result.is_error);
        assert!(result.for_llm.contains("[a]"));
    }

    #[tokio::test]
    async fn missing_strategy_is_a_validation_error() {
        let tool = team_tool();
        let result = tool
            .execute(serde_json::json!({"members": [{"id": "a", "role": "r", "task": "t"}]}))
            .await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn empty_members_is_a_validation_error() {
        let tool = team_tool();
        let result = tool.execute(serde_json::json!({"strategy": "sequential", "members": []})).await;
        assert!(result.is_error);
    }
}
