//! Tool execution core for a personal AI agent.
//!
//! Provides the Tool Registry and hook pipeline, the batch executor, the
//! tool-calling loop, loop detection, the shell guard and sandbox, an MCP
//! client, the subagent manager, the team orchestrator, process scope
//! tracking, the response waiter, the permission store, and cron glue —
//! the pieces a host application wires together around its own LLM
//! provider and channel layer.

pub mod batch;
pub mod bus;
pub mod config;
#[cfg(feature = "scheduler")]
pub mod cron;
pub mod error;
pub mod loop_;
pub mod loop_detector;
#[cfg(feature = "mcp-client")]
pub mod mcp;
pub mod permissions;
pub mod process_scope;
pub mod provider;
pub mod response_waiter;
pub mod sandbox;
pub mod session;
pub mod shell_guard;
pub mod subagent;
pub mod team;
pub mod tool;
pub mod tools;

/// Convenience re-exports for the most commonly used traits and types.
///
/// ```rust
/// use agentcore::prelude::*;
/// ```
pub mod prelude {
    pub use crate::batch::{BatchExecutor, ToolCallParallelConfig};
    pub use crate::bus::{CoreEvent, EventBus, EventFilter, EventType, TokioBroadcastBus};
    pub use crate::config::{load_default_config, AppConfig};
    pub use crate::error::{Classify, ErrorKind};
    pub use crate::loop_::{LoopConfig, LoopOutcome, ToolLoop};
    pub use crate::loop_detector::{LoopDetector, LoopDetectorConfig};
    pub use crate::permissions::PermissionStore;
    pub use crate::process_scope::ProcessScope;
    pub use crate::provider::{ChatRequest, ChatResponse, Message, Provider, Role};
    pub use crate::response_waiter::ResponseWaiter;
    pub use crate::sandbox::{ProcessSandbox, SandboxExecutor};
    pub use crate::session::SessionKey;
    pub use crate::shell_guard::{ShellGuard, ShellGuardConfig};
    pub use crate::subagent::{SubagentLimits, SubagentManager};
    pub use crate::team::{TeamOrchestrator, TeamRunConfig, TeamStrategy};
    pub use crate::tool::{Tool, ToolRegistry, ToolResult};
    pub use crate::tools::{ReadFileTool, ShellTool, SpawnTool, TeamTool};

    #[cfg(feature = "scheduler")]
    pub use crate::cron::{CronJob, CronScheduler, CronTool};
    #[cfg(feature = "mcp-client")]
    pub use crate::mcp::{McpClient, McpServerConfig};
}
