//! Batch Executor: serial/parallel scheduler over one LLM-produced batch of
//! tool calls, preserving input order in the output regardless of completion
//! order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;

use crate::tool::{ParallelPolicy, Tool, ToolCallRequest, ToolRegistry, ToolResult};

/// Per-tool override of the default parallelism decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelOverride {
    SerialOnly,
    ReadOnly,
}

/// Mode consulted when no per-tool override applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelMode {
    ReadOnlyOnly,
    All,
}

#[derive(Debug, Clone)]
pub struct ToolCallParallelConfig {
    pub enabled: bool,
    pub max_concurrency: usize,
    pub mode: ParallelMode,
    pub overrides: HashMap<String, ParallelOverride>,
}

impl Default for ToolCallParallelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrency: 4,
            mode: ParallelMode::ReadOnlyOnly,
            overrides: HashMap::new(),
        }
    }
}

/// One call's outcome plus timing, for summary logging.
pub struct BatchCallOutcome {
    pub request: ToolCallRequest,
    pub result: ToolResult,
    pub duration: Duration,
}

async fn decide_parallelizable(
    registry: &ToolRegistry,
    config: &ToolCallParallelConfig,
    tool_name: &str,
) -> bool {
    if !config.enabled || config.max_concurrency == 1 {
        return false;
    }
    let Some(tool) = registry.get(tool_name).await else {
        // Unknown tools are handled (as errors) serially by Execute itself;
        // treat them as non-parallelizable so they flush the batch cleanly.
        return false;
    };
    if !tool.is_instance_safe() {
        return false;
    }
    match config.overrides.get(tool_name) {
        Some(ParallelOverride::ReadOnly) => true,
        Some(ParallelOverride::SerialOnly) => false,
        None => match config.mode {
            ParallelMode::All => true,
            ParallelMode::ReadOnlyOnly => tool.parallel_policy() == Some(ParallelPolicy::ReadOnly),
        },
    }
}

/// Runs one LLM-produced batch of tool calls against `registry`, preserving
/// input order in the returned `Vec`.
pub struct BatchExecutor {
    registry: Arc<ToolRegistry>,
}

impl BatchExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    #[tracing::instrument(name = "batch.execute", skip(self, calls, config), fields(count = calls.len()))]
    pub async fn execute(
        &self,
        session: &str,
        calls: Vec<ToolCallRequest>,
        config: &ToolCallParallelConfig,
    ) -> Vec<BatchCallOutcome> {
        let n = calls.len();
        let mut slots: Vec<Option<BatchCallOutcome>> = (0..n).map(|_| None).collect();

        let mut pending_batch: Vec<usize> = Vec::new();

        // Calls are looked up by index as the walk decides parallelism, so
        // take ownership into an indexable map up front.
        let mut by_index: HashMap<usize, ToolCallRequest> =
            calls.into_iter().enumerate().collect();

        let mut i = 0;
        while i < n {
            let call = by_index.get(&i).expect("index in range");
            let parallelizable = decide_parallelizable(&self.registry, config, &call.name).await;
            if parallelizable {
                pending_batch.push(i);
            } else {
                if !pending_batch.is_empty() {
                    self.flush_parallel(session, &mut pending_batch, &mut by_index, &mut slots, config)
                        .await;
                }
                let call = by_index.remove(&i).expect("index in range");
                let started = Instant::now();
                let result = self.registry.execute(session, &call.name, call.arguments.clone()).await;
                slots[i] = Some(BatchCallOutcome {
                    request: call,
                    result,
                    duration: started.elapsed(),
                });
            }
            i += 1;
        }
        if !pending_batch.is_empty() {
            self.flush_parallel(session, &mut pending_batch, &mut by_index, &mut slots, config)
                .await;
        }

        let outcomes: Vec<BatchCallOutcome> = slots
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| {
                slot.unwrap_or_else(|| BatchCallOutcome {
                    request: ToolCallRequest {
                        id: String::new(),
                        name: format!("<slot-{idx}>"),
                        arguments: serde_json::Value::Null,
                    },
                    result: ToolResult::err(format!("tool call at index {idx} produced no result")),
                    duration: Duration::ZERO,
                })
            })
            .collect();

        log_batch_summary(session, &outcomes);
        outcomes
    }

    async fn flush_parallel(
        &self,
        session: &str,
        pending: &mut Vec<usize>,
        by_index: &mut HashMap<usize, ToolCallRequest>,
        slots: &mut [Option<BatchCallOutcome>],
        config: &ToolCallParallelConfig,
    ) {
        let batch_size = pending.len();
        let worker_cap = config.max_concurrency.min(batch_size).max(1);
        let semaphore = Arc::new(tokio::sync::Semaphore::new(worker_cap));
        let mut join_set = JoinSet::new();

        for idx in pending.drain(..) {
            let call = by_index.remove(&idx).expect("index in range");
            let registry = self.registry.clone();
            let session = session.to_string();
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");

            join_set.spawn(async move {
                let started = Instant::now();
                let result = registry.execute(&session, &call.name, call.arguments.clone()).await;
                drop(permit);
                (idx, call, result, started.elapsed())
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, request, result, duration)) => {
                    slots[idx] = Some(BatchCallOutcome { request, result, duration });
                }
                Err(join_err) => {
                    tracing::error!(error = %join_err, "tool call task panicked");
                }
            }
        }
    }
}

fn log_batch_summary(session: &str, outcomes: &[BatchCallOutcome]) {
    if outcomes.is_empty() {
        return;
    }
    let mut durations_ms: Vec<u128> = outcomes.iter().map(|o| o.duration.as_millis()).collect();
    durations_ms.sort_unstable();
    let error_count = outcomes.iter().filter(|o| o.result.is_error).count();
    let sum: u128 = durations_ms.iter().sum();
    let avg = sum / durations_ms.len() as u128;
    let p50 = percentile(&durations_ms, 50);
    let p95 = percentile(&durations_ms, 95);
    let max = *durations_ms.last().unwrap_or(&0);
    tracing::info!(
        session,
        count = outcomes.len(),
        error_count,
        p50_ms = p50,
        p95_ms = p95,
        avg_ms = avg,
        max_ms = max,
        "batch complete"
    );
}

fn percentile(sorted_ms: &[u128], pct: usize) -> u128 {
    if sorted_ms.is_empty() {
        return 0;
    }
    let rank = (sorted_ms.len() - 1) * pct / 100;
    sorted_ms[rank]
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ReadOnlyTool(Arc<AtomicUsize>);
    #[async_trait]
    impl Tool for ReadOnlyTool {
        fn name(&self) -> &str {
            "ro"
        }
        fn description(&self) -> &str {
            "d"
        }
        fn parameters_schema(&self) -> Value {
            Value::Null
        }
        async fn execute(&self, args: Value) -> ToolResult {
            self.0.fetch_add(1, Ordering::SeqCst);
            ToolResult::ok(args.to_string())
        }
        fn parallel_policy(&self) -> Option<ParallelPolicy> {
            Some(ParallelPolicy::ReadOnly)
        }
    }

    struct StatefulTool;
    #[async_trait]
    impl Tool for StatefulTool {
        fn name(&self) -> &str {
            "stateful"
        }
        fn description(&self) -> &str {
            "d"
        }
        fn parameters_schema(&self) -> Value {
            Value::Null
        }
        async fn execute(&self, _args: Value) -> ToolResult {
            ToolResult::ok("stateful-done")
        }
        async fn set_context(&self, _channel: &str, _chat_id: &str) {}
        fn is_instance_safe(&self) -> bool {
            false
        }
    }

    fn call(id: &str, name: &str, args: Value) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_string(),
            name: name.to_string(),
            arguments: args,
        }
    }

    #[tokio::test]
    async fn preserves_input_order_with_mixed_serial_and_parallel() {
        let counter = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(ToolRegistry::new());
        registry.register(Arc::new(ReadOnlyTool(counter))).await;
        registry.register(Arc::new(StatefulTool)).await;

        let executor = BatchExecutor::new(registry);
        let calls = vec![
            call("1", "ro", serde_json::json!(1)),
            call("2", "ro", serde_json::json!(2)),
            call("3", "stateful", Value::Null),
            call("4", "ro", serde_json::json!(4)),
        ];
        let config = ToolCallParallelConfig::default();
        let outcomes = executor.execute("s", calls, &config).await;

        assert_eq!(outcomes.len(), 4);
        assert_eq!(outcomes[0].request.id, "1");
        assert_eq!(outcomes[1].request.id, "2");
        assert_eq!(outcomes[2].request.id, "3");
        assert_eq!(outcomes[3].request.id, "4");
        assert!(!outcomes[2].result.is_error);
        assert_eq!(outcomes[2].result.for_llm, "stateful-done");
    }

    #[tokio::test]
    async fn unknown_tool_in_batch_produces_error_slot_in_place() {
        let registry = Arc::new(ToolRegistry::new());
        let executor = BatchExecutor::new(registry);
        let calls = vec![call("1", "nope", Value::Null)];
        let outcomes = executor
            .execute("s", calls, &ToolCallParallelConfig::default())
            .await;
        assert!(outcomes[0].result.is_error);
        assert!(outcomes[0].result.for_llm.contains("not found"));
    }

    #[tokio::test]
    async fn disabled_config_runs_everything_serially_but_still_in_order() {
        let counter = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(ToolRegistry::new());
        registry.register(Arc::new(ReadOnlyTool(counter))).await;
        let executor = BatchExecutor::new(registry);
        let calls = vec![
            call("1", "ro", serde_json::json!("a")),
            call("2", "ro", serde_json::json!("b")),
        ];
        let mut config = ToolCallParallelConfig::default();
        config.enabled = false;
        let outcomes = executor.execute("s", calls, &config).await;
        assert_eq!(outcomes[0].request.id, "1");
        assert_eq!(outcomes[1].request.id, "2");
    }
}
