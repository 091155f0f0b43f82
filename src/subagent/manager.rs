//! Subagent Manager — task admission, depth/concurrency limits, lifecycle
//! events, and cancellation trees for recursively-spawned Tool Loops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::bus::{CoreEvent, EventBus};
use crate::loop_::{LoopConfig, ToolLoop};
use crate::provider::{Message, Provider};
use crate::tool::ToolRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentTaskSnapshot {
    pub id: String,
    pub parent_id: Option<String>,
    pub task_text: String,
    pub label: String,
    pub agent_id: Option<String>,
    pub origin_channel: String,
    pub origin_chat_id: String,
    pub status: TaskStatus,
    pub result: Option<String>,
    pub created_ms: i64,
    pub depth: u32,
}

struct TaskRecord {
    snapshot: SubagentTaskSnapshot,
    parent_id: Option<String>,
    children: Vec<String>,
    cancel: Arc<AtomicBool>,
}

#[derive(Debug, Clone)]
pub struct SubagentLimits {
    pub max_tasks: usize,
    pub max_concurrent: usize,
    pub max_depth: u32,
}

impl Default for SubagentLimits {
    fn default() -> Self {
        Self {
            max_tasks: 50,
            max_concurrent: 5,
            max_depth: 4,
        }
    }
}

/// Override hook: resolve an agent id to the provider/model/tools it should
/// run with. Returning `Err` fails the task's admission at execution time.
pub type ExecutionResolver =
    Arc<dyn Fn(&str) -> Result<(Arc<dyn Provider>, String, Arc<ToolRegistry>), String> + Send + Sync>;

pub type SubagentCallback = Arc<dyn Fn(&SubagentTaskSnapshot) + Send + Sync>;

pub struct SubagentManager {
    limits: SubagentLimits,
    tasks: RwLock<HashMap<String, TaskRecord>>,
    bus: Arc<dyn EventBus>,
    default_provider: Arc<dyn Provider>,
    default_model: String,
    default_registry: Arc<ToolRegistry>,
    resolver: Option<ExecutionResolver>,
}

fn derive_depth(sender_id: &str, parent_known: bool) -> u32 {
    if let Some(_parent_id) = sender_id.strip_prefix("subagent:") {
        if parent_known {
            // Caller supplies the parent's actual depth via `spawn`; this
            // function only decides the *shape* of the rule (1 vs parent+1).
            1
        } else {
            2
        }
    } else {
        1
    }
}

impl SubagentManager {
    pub fn new(
        limits: SubagentLimits,
        bus: Arc<dyn EventBus>,
        default_provider: Arc<dyn Provider>,
        default_model: String,
        default_registry: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            limits,
            tasks: RwLock::new(HashMap::new()),
            bus,
            default_provider,
            default_model,
            default_registry,
            resolver: None,
        }
    }

    pub fn with_resolver(mut self, resolver: ExecutionResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    async fn active_count(tasks: &HashMap<String, TaskRecord>) -> usize {
        tasks.values().filter(|t| !t.snapshot.status.is_terminal()).count()
    }

    async fn running_count(tasks: &HashMap<String, TaskRecord>) -> usize {
        tasks
            .values()
            .filter(|t| t.snapshot.status == TaskStatus::Running)
            .count()
    }

    fn resolve_parent_depth(tasks: &HashMap<String, TaskRecord>, sender_id: &str) -> u32 {
        let Some(parent_id) = sender_id.strip_prefix("subagent:") else {
            return 0; // not a subagent call; caller gets depth 1
        };
        match tasks.get(parent_id) {
            Some(parent) => parent.snapshot.depth + 1,
            None => 2, // unknown parent: conservative depth per spec
        }
    }

    /// Admits the task and hands it to a background cooperative task; returns
    /// the `Running` snapshot immediately rather than waiting for the
    /// subagent's tool loop to finish. Takes `Arc<Self>` because the spawned
    /// task outlives this call — callers hold the manager behind an `Arc`
    /// and pass `Arc::clone(&mgr)` (or `mgr.clone()`) in.
    #[tracing::instrument(name = "subagent.spawn", skip(self, task_text, callback), fields(label = %label))]
    pub async fn spawn_task(
        self: Arc<Self>,
        sender_id: &str,
        task_text: String,
        label: String,
        agent_id: Option<String>,
        origin_channel: String,
        origin_chat_id: String,
        callback: Option<SubagentCallback>,
    ) -> Result<SubagentTaskSnapshot, String> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut tasks = self.tasks.write().await;

        if Self::active_count(&tasks).await >= self.limits.max_tasks {
            return Err(format!(
                "subagent admission denied: active task limit ({}) reached",
                self.limits.max_tasks
            ));
        }
        if Self::running_count(&tasks).await >= self.limits.max_concurrent {
            return Err(format!(
                "subagent admission denied: concurrency limit ({}) reached",
                self.limits.max_concurrent
            ));
        }

        let depth = if let Some(parent_task_id) = sender_id.strip_prefix("subagent:") {
            match tasks.get(parent_task_id) {
                Some(parent) => parent.snapshot.depth + 1,
                None => 2,
            }
        } else {
            1
        };
        if depth > self.limits.max_depth {
            return Err(format!(
                "subagent admission denied: depth {depth} exceeds max_depth {}",
                self.limits.max_depth
            ));
        }

        let parent_id = sender_id.strip_prefix("subagent:").map(|s| s.to_string());
        let snapshot = SubagentTaskSnapshot {
            id: id.clone(),
            parent_id: parent_id.clone(),
            task_text: task_text.clone(),
            label,
            agent_id: agent_id.clone(),
            origin_channel: origin_channel.clone(),
            origin_chat_id: origin_chat_id.clone(),
            status: TaskStatus::Running,
            result: None,
            created_ms: Utc::now().timestamp_millis(),
            depth,
        };

        let cancel = Arc::new(AtomicBool::new(false));
        tasks.insert(
            id.clone(),
            TaskRecord {
                snapshot: snapshot.clone(),
                parent_id: parent_id.clone(),
                children: Vec::new(),
                cancel: cancel.clone(),
            },
        );
        if let Some(parent_id) = &parent_id {
            if let Some(parent) = tasks.get_mut(parent_id) {
                parent.children.push(id.clone());
            }
        }
        drop(tasks);

        self.bus
            .publish(CoreEvent::SubagentCreated { task_id: id.clone(), parent_id })
            .ok();
        self.bus.publish(CoreEvent::SubagentRunning { task_id: id.clone() }).ok();

        let background = self.clone();
        let run_id = id.clone();
        tokio::spawn(async move {
            background
                .run_task(run_id, task_text, agent_id, origin_channel, origin_chat_id, cancel, callback)
                .await;
        });

        let tasks = self.tasks.read().await;
        Ok(tasks.get(&id).expect("task just inserted").snapshot.clone())
    }

    async fn run_task(
        &self,
        id: String,
        task_text: String,
        agent_id: Option<String>,
        origin_channel: String,
        origin_chat_id: String,
        cancel: Arc<AtomicBool>,
        callback: Option<SubagentCallback>,
    ) {
        let resolved = match (&self.resolver, &agent_id) {
            (Some(resolver), Some(agent_id)) => resolver(agent_id),
            _ => Ok((
                self.default_provider.clone(),
                self.default_model.clone(),
                self.default_registry.clone(),
            )),
        };

        let (provider, model, registry) = match resolved {
            Ok(v) => v,
            Err(e) => {
                self.finish_task(&id, TaskStatus::Failed, Some(format!("resolver error: {e}")), &origin_channel, &origin_chat_id, &callback)
                    .await;
                return;
            }
        };

        let messages = vec![
            Message::system("You are a subagent completing one delegated task. Be concise and return only the final result."),
            Message::user(task_text),
        ];

        let tool_loop = ToolLoop::new(LoopConfig {
            provider,
            model,
            registry,
            max_iterations: 20,
            temperature: None,
            max_tokens: None,
            sender_id: format!("subagent:{id}"),
            parallel_cfg: Default::default(),
            retry_policy: Default::default(),
            retry_notice: None,
            remaining_token_budget: None,
            cancel_flag: Some(cancel),
        });

        let session = format!("subagent:{id}");
        let outcome = tool_loop.run(&session, messages).await;

        match outcome {
            Ok(loop_outcome) => {
                self.finish_task(&id, TaskStatus::Completed, Some(loop_outcome.content), &origin_channel, &origin_chat_id, &callback)
                    .await;
            }
            Err(e) if e == "cancelled" => {
                self.finish_task(&id, TaskStatus::Cancelled, None, &origin_channel, &origin_chat_id, &callback)
                    .await;
            }
            Err(e) => {
                self.finish_task(&id, TaskStatus::Failed, Some(e), &origin_channel, &origin_chat_id, &callback)
                    .await;
            }
        }
    }

    async fn finish_task(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<String>,
        origin_channel: &str,
        origin_chat_id: &str,
        callback: &Option<SubagentCallback>,
    ) {
        let mut tasks = self.tasks.write().await;
        if let Some(record) = tasks.get_mut(id) {
            record.snapshot.status = status;
            record.snapshot.result = result.clone();
        }
        drop(tasks);

        match status {
            TaskStatus::Completed => {
                self.bus
                    .publish(CoreEvent::SubagentCompleted {
                        task_id: id.to_string(),
                        chat_id: format!("{origin_channel}:{origin_chat_id}"),
                        sender: format!("subagent:{id}"),
                    })
                    .ok();
            }
            TaskStatus::Failed => {
                self.bus
                    .publish(CoreEvent::SubagentFailed {
                        task_id: id.to_string(),
                        reason: result.clone().unwrap_or_default(),
                    })
                    .ok();
                self.cancel_task_tree(id).await;
            }
            TaskStatus::Cancelled => {
                self.bus.publish(CoreEvent::SubagentCancelled { task_id: id.to_string() }).ok();
                self.cancel_task_tree(id).await;
            }
            TaskStatus::Running => {}
        }

        if let Some(callback) = callback {
            let tasks = self.tasks.read().await;
            if let Some(record) = tasks.get(id) {
                callback(&record.snapshot);
            }
        }
    }

    pub async fn get(&self, id: &str) -> Option<SubagentTaskSnapshot> {
        self.tasks.read().await.get(id).map(|r| r.snapshot.clone())
    }

    /// BFS-cancel every descendant of `id` (never `id` itself, and never an
    /// ancestor or sibling).
    pub async fn cancel_task_tree(&self, id: &str) {
        let mut queue: Vec<String> = {
            let tasks = self.tasks.read().await;
            tasks.get(id).map(|t| t.children.clone()).unwrap_or_default()
        };

        while let Some(current) = queue.pop() {
            let (cancel, children, already_terminal) = {
                let tasks = self.tasks.read().await;
                match tasks.get(&current) {
                    Some(record) => (
                        record.cancel.clone(),
                        record.children.clone(),
                        record.snapshot.status.is_terminal(),
                    ),
                    None => continue,
                }
            };
            if !already_terminal {
                cancel.store(true, Ordering::SeqCst);
                let mut tasks = self.tasks.write().await;
                if let Some(record) = tasks.get_mut(&current) {
                    record.snapshot.status = TaskStatus::Cancelled;
                }
            }
            queue.extend(children);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::TokioBroadcastBus;
    use crate::provider::{ChatRequest, ChatResponse, ProviderResult};
    use async_trait::async_trait;

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

    /// Responds only after a delay, so a caller racing the background task
    /// can observe the `Running` snapshot before completion happens.
    struct SlowProvider;
    #[async_trait]
    impl Provider for SlowProvider {
        async fn chat(&self, _request: ChatRequest) -> ProviderResult<ChatResponse> {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok(ChatResponse {
                content: "done".to_string(),
                ..Default::default()
            })
        }
        fn default_model(&self) -> String {
            "test".to_string()
        }
        fn provider_name(&self) -> &str {
            "stub-slow"
        }
    }

    fn manager(limits: SubagentLimits) -> Arc<SubagentManager> {
        manager_with_provider(limits, Arc::new(StubProvider))
    }

    fn manager_with_provider(limits: SubagentLimits, provider: Arc<dyn Provider>) -> Arc<SubagentManager> {
        Arc::new(SubagentManager::new(
            limits,
            Arc::new(TokioBroadcastBus::new()),
            provider,
            "test".to_string(),
            Arc::new(ToolRegistry::new()),
        ))
    }

    async fn wait_for_terminal(mgr: &SubagentManager, id: &str) -> SubagentTaskSnapshot {
        for _ in 0..500 {
            if let Some(snapshot) = mgr.get(id).await {
                if snapshot.status.is_terminal() {
                    return snapshot;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        panic!("task {id} did not reach a terminal state in time");
    }

    #[tokio::test]
    async fn spawn_without_parent_gets_depth_one() {
        let mgr = manager(SubagentLimits::default());
        let snapshot = mgr
            .clone()
            .spawn_task("user:1", "do something".to_string(), "label".to_string(), None, "chan".to_string(), "chat".to_string(), None)
            .await
            .unwrap();
        assert_eq!(snapshot.depth, 1);
        let finished = wait_for_terminal(&mgr, &snapshot.id).await;
        assert_eq!(finished.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn spawn_task_returns_immediately_while_work_proceeds_in_background() {
        let mgr = manager_with_provider(SubagentLimits::default(), Arc::new(SlowProvider));
        let snapshot = mgr
            .clone()
            .spawn_task("user:1", "do something".to_string(), "label".to_string(), None, "chan".to_string(), "chat".to_string(), None)
            .await
            .unwrap();
        // The slow provider hasn't had a chance to reply yet: spawn_task
        // must not have blocked on it.
        assert_eq!(snapshot.status, TaskStatus::Running);
        let finished = wait_for_terminal(&mgr, &snapshot.id).await;
        assert_eq!(finished.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn spawn_from_known_parent_increments_depth() {
        let mgr = manager(SubagentLimits::default());
        let parent = mgr
            .clone()
            .spawn_task("user:1", "parent task".to_string(), "p".to_string(), None, "chan".to_string(), "chat".to_string(), None)
            .await
            .unwrap();
        let child = mgr
            .clone()
            .spawn_task(&format!("subagent:{}", parent.id), "child task".to_string(), "c".to_string(), None, "chan".to_string(), "chat".to_string(), None)
            .await
            .unwrap();
        assert_eq!(child.depth, parent.depth + 1);
    }

    #[tokio::test]
    async fn spawn_from_unknown_parent_gets_depth_two() {
        let mgr = manager(SubagentLimits::default());
        let snapshot = mgr
            .spawn_task("subagent:ghost", "task".to_string(), "l".to_string(), None, "chan".to_string(), "chat".to_string(), None)
            .await
            .unwrap();
        assert_eq!(snapshot.depth, 2);
    }

    #[tokio::test]
    async fn rejects_when_depth_exceeds_max() {
        let mgr = manager(SubagentLimits { max_depth: 1, ..Default::default() });
        let result = mgr
            .spawn_task("subagent:ghost", "task".to_string(), "l".to_string(), None, "chan".to_string(), "chat".to_string(), None)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rejects_when_max_tasks_reached() {
        let mgr = manager(SubagentLimits { max_tasks: 0, ..Default::default() });
        let result = mgr
            .spawn_task("user:1", "task".to_string(), "l".to_string(), None, "chan".to_string(), "chat".to_string(), None)
            .await;
        assert!(result.is_err());
    }
}
