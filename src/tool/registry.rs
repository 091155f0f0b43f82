//! Tool registry: name→tool lookup plus the ordered hook chain around every
//! execution.
//!
//! Concurrent reads (`Get`/`List`), writes under an exclusive lock
//! (`Register`/`AddHook`). Lifetime is process-wide; multiple registries may
//! coexist (e.g. per-subagent, or the cloned "upgraded" registry a parallel
//! team strategy installs).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use super::hooks::Hook;
use super::traits::{Tool, ToolInfo, ToolResult};
use crate::session::DEFAULT_SESSION_KEY;

/// Ordered list of tools + ordered list of hooks, guarded by a single
/// exclusive lock for writes.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    /// Registration order, since `HashMap` doesn't preserve it.
    order: RwLock<Vec<String>>,
    hooks: RwLock<Vec<Arc<dyn Hook>>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
            hooks: RwLock::new(Vec::new()),
        }
    }

    /// Idempotent by name: registering an existing name overwrites it in
    /// place (last write wins) without disturbing its position in `list()`.
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        let mut tools = self.tools.write().await;
        let is_new = !tools.contains_key(&name);
        tools.insert(name.clone(), tool);
        drop(tools);
        if is_new {
            self.order.write().await.push(name);
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    /// Tool descriptors in registration order, for surfacing to the model.
    pub async fn list(&self) -> Vec<ToolInfo> {
        let order = self.order.read().await;
        let tools = self.tools.read().await;
        order
            .iter()
            .filter_map(|name| tools.get(name).map(|t| t.info()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.tools.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tools.read().await.is_empty()
    }

    pub async fn add_hook(&self, hook: Arc<dyn Hook>) {
        self.hooks.write().await.push(hook);
    }

    /// Build a registry that shares no tool instances with `self` except
    /// those that decline `upgrade_to_concurrent`. Used by the team
    /// orchestrator when entering a parallel/DAG strategy: the original
    /// registry is never mutated.
    pub async fn upgrade_for_concurrency(&self) -> ToolRegistry {
        let upgraded = ToolRegistry::new();
        let order = self.order.read().await.clone();
        let tools = self.tools.read().await;
        for name in order {
            if let Some(tool) = tools.get(&name) {
                let replacement = tool.upgrade_to_concurrent().unwrap_or_else(|| tool.clone());
                upgraded.register(replacement).await;
            }
        }
        drop(tools);
        let hooks = self.hooks.read().await.clone();
        *upgraded.hooks.write().await = hooks;
        upgraded
    }

    /// Execute a tool call by name, running the full hook pipeline.
    ///
    /// Algorithm (§4.1):
    /// 1. Look up the tool; missing ⇒ error result, no hooks invoked at all.
    /// 2. If the tool is not instance-safe, `set_context` is applied (the
    ///    caller serializes such calls; see the batch executor).
    /// 3. Run `Before` hooks in order; first `Err` stops the chain and marks
    ///    the call blocked.
    /// 4. Run **every** hook's `After` regardless of block, in order.
    /// 5. Return the result.
    #[tracing::instrument(name = "registry.execute", skip(self, args), fields(tool = %name))]
    pub async fn execute(&self, session: &str, name: &str, args: Value) -> ToolResult {
        self.execute_with_context(session, name, args, None).await
    }

    /// As [`Self::execute`], additionally applying `(channel, chat_id)` via
    /// `set_context` when the tool is stateful.
    pub async fn execute_with_context(
        &self,
        session: &str,
        name: &str,
        args: Value,
        channel_and_chat: Option<(&str, &str)>,
    ) -> ToolResult {
        let session = if session.is_empty() {
            DEFAULT_SESSION_KEY
        } else {
            session
        };

        let tool = match self.get(name).await {
            Some(t) => t,
            None => {
                return ToolResult::err(format!("tool \"{name}\" not found"));
            }
        };

        if !tool.is_instance_safe() {
            if let Some((channel, chat_id)) = channel_and_chat {
                tool.set_context(channel, chat_id).await;
            }
        }

        let hooks = self.hooks.read().await.clone();

        let mut blocked: Option<String> = None;
        for hook in &hooks {
            if let Err(reason) = hook.before_execute(session, name, &args).await {
                blocked = Some(reason);
                break;
            }
        }

        let result = match &blocked {
            Some(reason) => ToolResult::err_kind(crate::error::ErrorKind::PolicyBlock, reason.clone()),
            None => {
                let result = tool.execute(args.clone()).await;
                match result {
                    r if r.for_llm.is_empty() && !r.is_error => {
                        ToolResult::err(format!("tool \"{name}\" returned an empty result"))
                    }
                    r => r,
                }
            }
        };

        for hook in &hooks {
            hook.after_execute(session, name, &args, &result).await;
        }

        result
    }
}
