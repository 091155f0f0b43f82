//! The hook pipeline: ordered `BeforeExecute`/`AfterExecute` chain injected
//! around every registered-tool execution (policy enforcement, loop
//! detection, observability).

use async_trait::async_trait;
use serde_json::Value;

use super::traits::ToolResult;

/// A hook observes or blocks tool executions.
///
/// `before_execute` runs in registration order; the first `Err` stops the
/// `Before` chain (later `Before` hooks are skipped) and synthesizes an
/// error result for the call. Regardless of a block, **every** registered
/// hook's `after_execute` still runs, in registration order, with the final
/// result — this is the observability contract: hooks must never be
/// skipped on the `After` side just because an earlier hook blocked.
#[async_trait]
pub trait Hook: Send + Sync {
    /// A short, stable name for logging/diagnostics.
    fn name(&self) -> &str;

    async fn before_execute(&self, session: &str, tool_name: &str, args: &Value) -> Result<(), String> {
        let _ = (session, tool_name, args);
        Ok(())
    }

    async fn after_execute(&self, session: &str, tool_name: &str, args: &Value, result: &ToolResult) {
        let _ = (session, tool_name, args, result);
    }
}
