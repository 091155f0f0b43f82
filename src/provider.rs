//! The LLM provider contract.
//!
//! This module models the boundary named in the design's "External
//! Interfaces" section: `Chat(messages, tool_defs, model, opts) -> (content,
//! tool_calls, usage, finish_reason)`. Unlike the text-parsed
//! `<tool_call>{...}</tool_call>` convention some agent loops use, tool calls
//! here are native: an assistant [`Message`] carries a `tool_calls` vector and
//! each result is a `role: Tool` message correlated by `tool_call_id`.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result type for provider operations.
pub type ProviderResult<T> = std::result::Result<T, String>;

/// The role of a participant in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message in a conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,

    /// For `Role::Tool` messages this contains the serialized tool result.
    /// For `Role::Assistant` messages that contain tool calls only, this may
    /// be empty.
    #[serde(default)]
    pub content: String,

    /// Tool calls requested by the assistant (only present when `role ==
    /// Role::Assistant`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Identifies which tool call this message answers (only present when
    /// `role == Role::Tool`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// A tool invocation requested by the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier assigned by the LLM (or synthesized, if absent) for
    /// correlating results.
    pub id: String,
    pub name: String,
    /// Arguments as a JSON value; schemaless at this layer, validated by the tool.
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// A tool definition exposed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Token usage reported by the provider for one completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// A request sent to a provider via [`Provider::chat`].
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn with_max_tokens(mut self, t: u32) -> Self {
        self.max_tokens = Some(t);
        self
    }
}

/// `finish_reason` values the Tool Loop inspects.
pub const FINISH_REASON_TRUNCATED: &str = "truncated";

/// The response from a single `chat` call.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    pub finish_reason: Option<String>,
}

impl ChatResponse {
    pub fn is_truncated(&self) -> bool {
        self.finish_reason.as_deref() == Some(FINISH_REASON_TRUNCATED)
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// An incremental chunk of a streamed completion.
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    pub delta: String,
    pub is_final: bool,
    pub finish_reason: Option<String>,
}

pub type StreamResponse = Pin<Box<dyn Stream<Item = ProviderResult<StreamChunk>> + Send>>;

/// The LLM provider contract the Tool Loop is built against.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Complete one conversational turn.
    async fn chat(&self, request: ChatRequest) -> ProviderResult<ChatResponse>;

    /// Stream a completion (optional; default errors as unimplemented).
    async fn stream(&self, _request: ChatRequest) -> ProviderResult<StreamResponse> {
        Err("streaming not supported by this provider".to_string())
    }

    /// The model used when the caller doesn't specify one.
    fn default_model(&self) -> String;

    /// Maximum context window, in tokens, for budget planning.
    fn context_limit(&self) -> usize {
        128_000
    }

    fn provider_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors_set_expected_role() {
        assert!(matches!(Message::system("x").role, Role::System));
        assert!(matches!(Message::user("x").role, Role::User));
        assert!(matches!(Message::assistant("x").role, Role::Assistant));
        let tr = Message::tool_result("abc", "ok");
        assert!(matches!(tr.role, Role::Tool));
        assert_eq!(tr.tool_call_id.as_deref(), Some("abc"));
    }

    #[test]
    fn chat_request_builder_sets_fields() {
        let req = ChatRequest::new("gpt-4o", vec![Message::user("hi")])
            .with_temperature(0.5)
            .with_max_tokens(100);
        assert_eq!(req.model, "gpt-4o");
        assert_eq!(req.temperature, Some(0.5));
        assert_eq!(req.max_tokens, Some(100));
    }

    #[test]
    fn chat_response_is_truncated_checks_finish_reason() {
        let mut resp = ChatResponse::default();
        assert!(!resp.is_truncated());
        resp.finish_reason = Some(FINISH_REASON_TRUNCATED.to_string());
        assert!(resp.is_truncated());
    }

    #[test]
    fn serializing_assistant_message_omits_empty_tool_calls() {
        let msg = Message::assistant("hello");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("tool_calls"));
    }

    #[test]
    fn serializing_tool_message_includes_call_id() {
        let msg = Message::tool_result("tc-1", "result");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"tool_call_id\":\"tc-1\""));
    }
}
