//! Cron glue: scheduled jobs fire a synthetic tool call through the same
//! registry/hook path (Shell Guard included) as an interactive call.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::bus::{CoreEvent, EventBus};
use crate::session::SessionKey;
use crate::tool::{Tool, ToolRegistry, ToolResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    pub id: String,
    /// A 5- or 6-field cron expression; 5-field inputs are widened with a
    /// leading `"0 "` seconds field before parsing.
    pub schedule: String,
    pub tool_name: String,
    pub arguments: Value,
    pub enabled: bool,
}

fn parse_next_run(expr: &str) -> Option<DateTime<Utc>> {
    let widened = if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    cron::Schedule::from_str(&widened).ok()?.upcoming(Utc).next()
}

struct JobState {
    job: CronJob,
    next_run: Option<DateTime<Utc>>,
}

/// Runs registered [`CronJob`]s on a one-second tick, routing each fire
/// through [`ToolRegistry::execute`] — the same path (hooks, Shell Guard
/// included) an interactive tool call takes. No bypass.
pub struct CronScheduler {
    jobs: Arc<RwLock<HashMap<String, JobState>>>,
    registry: Arc<ToolRegistry>,
    bus: Arc<dyn EventBus>,
    stop_flag: Arc<AtomicBool>,
}

impl CronScheduler {
    pub fn new(registry: Arc<ToolRegistry>, bus: Arc<dyn EventBus>) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            registry,
            bus,
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn add_job(&self, job: CronJob) -> Result<(), String> {
        let next_run = parse_next_run(&job.schedule);
        if next_run.is_none() {
            return Err(format!("invalid cron expression: \"{}\"", job.schedule));
        }
        let id = job.id.clone();
        self.jobs.write().await.insert(id, JobState { job, next_run });
        Ok(())
    }

    pub async fn remove_job(&self, id: &str) -> bool {
        self.jobs.write().await.remove(id).is_some()
    }

    pub async fn list_jobs(&self) -> Vec<CronJob> {
        self.jobs.read().await.values().map(|s| s.job.clone()).collect()
    }

    /// Spawn the background tick loop. Idempotent in the sense that calling
    /// it again starts a second loop sharing the stop flag; callers should
    /// call [`Self::stop`] before calling [`Self::start`] again.
    pub fn start(self: &Arc<Self>) {
        let this = self.clone();
        self.stop_flag.store(false, Ordering::SeqCst);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                if this.stop_flag.load(Ordering::SeqCst) {
                    break;
                }
                this.run_due_jobs().await;
            }
        });
    }

    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    #[tracing::instrument(name = "cron.tick", skip(self))]
    async fn run_due_jobs(&self) {
        let now = Utc::now();
        let due: Vec<CronJob> = {
            let jobs = self.jobs.read().await;
            jobs.values()
                .filter(|s| s.job.enabled && s.next_run.is_some_and(|t| t <= now))
                .map(|s| s.job.clone())
                .collect()
        };

        for job in due {
            let session = SessionKey::cron(&job.id).as_str().to_string();
            self.bus
                .publish(CoreEvent::CronFired { job_id: job.id.clone(), schedule: job.schedule.clone() })
                .ok();
            let result = self.registry.execute(&session, &job.tool_name, job.arguments.clone()).await;

            if result.is_error && result.err.as_ref().is_some_and(|e| e.kind == crate::error::ErrorKind::PolicyBlock)
            {
                self.bus
                    .publish(CoreEvent::CronToolBlocked {
                        job_id: job.id.clone(),
                        tool_name: job.tool_name.clone(),
                        message: format!("tool call blocked: {}", result.for_user),
                    })
                    .ok();
            }

            let mut jobs = self.jobs.write().await;
            if let Some(state) = jobs.get_mut(&job.id) {
                state.next_run = parse_next_run(&state.job.schedule);
            }
        }
    }
}

/// Tool surface for creating/listing/removing cron jobs from within a
/// conversation. Any job whose `tool_name` is a shell-executing tool is
/// validated by that tool's own hooks (including the Shell Guard) exactly as
/// if a user had typed the command — `CronScheduler::run_due_jobs` never
/// bypasses the registry.
pub struct CronTool {
    scheduler: Arc<CronScheduler>,
}

impl CronTool {
    pub fn new(scheduler: Arc<CronScheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl Tool for CronTool {
    fn name(&self) -> &str {
        "cron"
    }

    fn description(&self) -> &str {
        "Create, list, or remove scheduled jobs that fire a named tool call on a cron schedule."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {"type": "string", "enum": ["create", "list", "remove"]},
                "id": {"type": "string"},
                "schedule": {"type": "string"},
                "tool_name": {"type": "string"},
                "arguments": {"type": "object"},
            },
            "required": ["action"],
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let action = args.get("action").and_then(|v| v.as_str()).unwrap_or("");
        match action {
            "create" => {
                let (Some(id), Some(schedule), Some(tool_name)) = (
                    args.get("id").and_then(|v| v.as_str()),
                    args.get("schedule").and_then(|v| v.as_str()),
                    args.get("tool_name").and_then(|v| v.as_str()),
                ) else {
                    return ToolResult::err("cron create requires id, schedule, and tool_name");
                };
                let job = CronJob {
                    id: id.to_string(),
                    schedule: schedule.to_string(),
                    tool_name: tool_name.to_string(),
                    arguments: args.get("arguments").cloned().unwrap_or(Value::Null),
                    enabled: true,
                };
                match self.scheduler.add_job(job).await {
                    Ok(()) => ToolResult::ok(format!("scheduled job \"{id}\" created")),
                    Err(e) => ToolResult::err(e),
                }
            }
            "list" => {
                let jobs = self.scheduler.list_jobs().await;
                match serde_json::to_string_pretty(&jobs) {
                    Ok(text) => ToolResult::ok(text),
                    Err(e) => ToolResult::err(e.to_string()),
                }
            }
            "remove" => {
                let Some(id) = args.get("id").and_then(|v| v.as_str()) else {
                    return ToolResult::err("cron remove requires id");
                };
                if self.scheduler.remove_job(id).await {
                    ToolResult::ok(format!("scheduled job \"{id}\" removed"))
                } else {
                    ToolResult::err(format!("no scheduled job \"{id}\""))
                }
            }
            other => ToolResult::err(format!("unknown cron action \"{other}\"")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::TokioBroadcastBus;

    #[test]
    fn five_field_expression_is_widened_with_seconds() {
        assert!(parse_next_run("*/5 * * * *").is_some());
    }

    #[test]
    fn invalid_expression_yields_none() {
        assert!(parse_next_run("not a cron expression").is_none());
    }

    #[tokio::test]
    async fn add_job_rejects_invalid_schedule() {
        let scheduler = CronScheduler::new(Arc::new(ToolRegistry::new()), Arc::new(TokioBroadcastBus::new()));
        let result = scheduler
            .add_job(CronJob {
                id: "j1".to_string(),
                schedule: "garbage".to_string(),
                tool_name: "noop".to_string(),
                arguments: Value::Null,
                enabled: true,
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn add_list_remove_round_trip() {
        let scheduler = CronScheduler::new(Arc::new(ToolRegistry::new()), Arc::new(TokioBroadcastBus::new()));
        scheduler
            .add_job(CronJob {
                id: "j1".to_string(),
                schedule: "*/5 * * * *".to_string(),
                tool_name: "noop".to_string(),
                arguments: Value::Null,
                enabled: true,
            })
            .await
            .unwrap();
        assert_eq!(scheduler.list_jobs().await.len(), 1);
        assert!(scheduler.remove_job("j1").await);
        assert!(scheduler.list_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn run_due_jobs_executes_through_the_registry() {
        use async_trait::async_trait as at;

        struct CountingTool(std::sync::atomic::AtomicUsize);
        #[at]
        impl Tool for CountingTool {
            fn name(&self) -> &str {
                "count"
            }
            fn description(&self) -> &str {
                "d"
            }
            fn parameters_schema(&self) -> Value {
                Value::Null
            }
            async fn execute(&self, _args: Value) -> ToolResult {
                self.0.fetch_add(1, Ordering::SeqCst);
                ToolResult::ok("ran")
            }
        }

        let registry = Arc::new(ToolRegistry::new());
        registry.register(Arc::new(CountingTool(std::sync::atomic::AtomicUsize::new(0)))).await;
        let scheduler = CronScheduler::new(registry.clone(), Arc::new(TokioBroadcastBus::new()));
        scheduler
            .add_job(CronJob {
                id: "j1".to_string(),
                schedule: "*/5 * * * *".to_string(),
                tool_name: "count".to_string(),
                arguments: Value::Null,
                enabled: true,
            })
            .await
            .unwrap();
        // Force immediate due-ness for the test rather than waiting on wall-clock cron timing.
        {
            let mut jobs = scheduler.jobs.write().await;
            jobs.get_mut("j1").unwrap().next_run = Some(Utc::now() - chrono::Duration::seconds(1));
        }
        scheduler.run_due_jobs().await;
        let result = registry.execute("s", "count", Value::Null).await;
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn shell_command_job_denied_by_the_guard_is_never_sandboxed_and_publishes_blocked() {
        use crate::sandbox::{ExecOutput, ExecRequest, SandboxExecutor};
        use crate::shell_guard::{ShellGuard, ShellGuardConfig};
        use crate::tools::ShellTool;
        use std::sync::atomic::AtomicUsize;

        struct CountingSandbox(AtomicUsize);
        #[async_trait]
        impl SandboxExecutor for CountingSandbox {
            async fn exec(&self, _request: ExecRequest) -> Result<ExecOutput, String> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(ExecOutput { stdout: "ran".to_string(), exit_code: Some(0), ..Default::default() })
            }
        }

        let sandbox_calls = Arc::new(CountingSandbox(AtomicUsize::new(0)));
        let guard = ShellGuard::new(ShellGuardConfig::default(), sandbox_calls.clone()).unwrap();
        let registry = Arc::new(ToolRegistry::new());
        registry.register(Arc::new(ShellTool::new(Arc::new(guard)))).await;

        let bus = Arc::new(TokioBroadcastBus::new());
        let mut rx = bus.subscribe();
        let scheduler = CronScheduler::new(registry, bus);
        scheduler
            .add_job(CronJob {
                id: "j-blocked".to_string(),
                schedule: "*/5 * * * *".to_string(),
                tool_name: "shell".to_string(),
                arguments: serde_json::json!({"command": "rm -rf /"}),
                enabled: true,
            })
            .await
            .unwrap();
        {
            let mut jobs = scheduler.jobs.write().await;
            jobs.get_mut("j-blocked").unwrap().next_run = Some(Utc::now() - chrono::Duration::seconds(1));
        }

        scheduler.run_due_jobs().await;

        assert_eq!(sandbox_calls.0.load(Ordering::SeqCst), 0, "denied command must never reach the sandbox");

        let mut saw_blocked = false;
        while let Ok(event) = rx.try_recv() {
            if let CoreEvent::CronToolBlocked { message, .. } = event {
                assert!(message.to_lowercase().contains("blocked"));
                saw_blocked = true;
            }
        }
        assert!(saw_blocked, "expected a CronToolBlocked event on the bus");
    }
}
