//! The tool abstraction: a named capability exposing `name`, `description`,
//! `parameters`, and `execute`, plus capabilities discovered by narrowing
//! rather than a deep trait hierarchy — `SetContext`, `ParallelPolicy`, and
//! `UpgradeToConcurrent` are default trait methods overridden only by the
//! tools that need them.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Classify, ErrorKind};

/// A tool's self-declared concurrency safety.
///
/// `SerialOnly` tools must never run concurrently with any other call in the
/// same batch; `ReadOnly` tools may run in parallel with other `ReadOnly`
/// calls when the batch executor is in `read_only_only` mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelPolicy {
    SerialOnly,
    ReadOnly,
}

/// Structured error accompanying an error [`ToolResult`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ToolError {
    pub message: String,
    pub kind: ErrorKind,
}

impl ToolError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn policy_block(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PolicyBlock, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }
}

impl Classify for ToolError {
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// The dual-view result of executing one tool call.
///
/// Invariant: if `is_error` then either `err` is set or `for_llm` names the
/// failure (enforced by the `err`/`ok` constructors; callers building a
/// `ToolResult` by hand are responsible for the invariant).
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// Text shown to the model.
    pub for_llm: String,
    /// Text shown to the human; may differ from `for_llm`.
    pub for_user: String,
    pub is_error: bool,
    /// Suppress echoing this result to the human.
    pub silent: bool,
    /// The tool will deliver its real result later via the bus; this result
    /// is a placeholder acknowledgement.
    pub is_async: bool,
    pub err: Option<ToolError>,
}

impl ToolResult {
    pub fn ok(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            for_user: text.clone(),
            for_llm: text,
            is_error: false,
            silent: false,
            is_async: false,
            err: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            for_user: message.clone(),
            for_llm: message.clone(),
            is_error: true,
            silent: false,
            is_async: false,
            err: Some(ToolError::fatal(message)),
        }
    }

    pub fn err_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            for_user: message.clone(),
            for_llm: message.clone(),
            is_error: true,
            silent: false,
            is_async: false,
            err: Some(ToolError::new(kind, message)),
        }
    }

    pub fn with_for_user(mut self, text: impl Into<String>) -> Self {
        self.for_user = text.into();
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }
}

/// Compact descriptor surfaced to the model (and used by registry listings).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A tool call as produced by one provider reply, normalized for execution.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// The core tool abstraction.
///
/// `name` must match `[a-zA-Z0-9_-]{1,64}` and is unique within a registry
/// (enforced by [`super::registry::ToolRegistry::register`], which is
/// idempotent by name — last write wins).
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, args: Value) -> ToolResult;

    /// Declares this tool stateful per-conversation; such tools are *not*
    /// instance-safe for concurrent execution (see [`Tool::is_instance_safe`]).
    async fn set_context(&self, _channel: &str, _chat_id: &str) {}

    /// `true` unless the tool overrides [`Tool::set_context`], meaning its
    /// state is never mutated per-call and it is safe to invoke concurrently
    /// on one instance. Tools that implement `set_context` must override this
    /// to return `false`.
    fn is_instance_safe(&self) -> bool {
        true
    }

    /// A tool's self-declared concurrency safety, consulted by the batch
    /// executor in `read_only_only` mode absent an explicit override.
    fn parallel_policy(&self) -> Option<ParallelPolicy> {
        None
    }

    /// Produce a thread-safe clone of this tool for use in a parallel/DAG
    /// team strategy, if this tool advertises such a capability. Returns
    /// `None` for tools that don't need (or support) an upgrade.
    fn upgrade_to_concurrent(&self) -> Option<Arc<dyn Tool>> {
        None
    }

    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Validate a tool name against the registry invariant.
pub fn is_valid_tool_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 64 {
        return false;
    }
    name.bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_name_validation() {
        assert!(is_valid_tool_name("read_file"));
        assert!(is_valid_tool_name("a"));
        assert!(!is_valid_tool_name(""));
        assert!(!is_valid_tool_name(&"a".repeat(65)));
        assert!(!is_valid_tool_name("bad name"));
        assert!(!is_valid_tool_name("bad/name"));
    }

    #[test]
    fn tool_result_ok_is_not_error() {
        let r = ToolResult::ok("done");
        assert!(!r.is_error);
        assert_eq!(r.for_llm, "done");
        assert_eq!(r.for_user, "done");
    }

    #[test]
    fn tool_result_err_sets_err_field() {
        let r = ToolResult::err("boom");
        assert!(r.is_error);
        assert!(r.err.is_some());
    }

    #[test]
    fn with_for_user_overrides_only_user_view() {
        let r = ToolResult::ok("model text").with_for_user("human text");
        assert_eq!(r.for_llm, "model text");
        assert_eq!(r.for_user, "human text");
    }
}
