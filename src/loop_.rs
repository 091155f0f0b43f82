//! Tool Loop — the LLM↔tool iteration: call the provider, dispatch any tool
//! calls through the Batch Executor, append results, repeat.
//!
//! Named `loop_` (trailing underscore) since `loop` is a reserved word.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::batch::{BatchExecutor, ToolCallParallelConfig};
use crate::error::{classify_provider_error, ErrorKind};
use crate::provider::{
    ChatRequest, ChatResponse, Message, Provider, ToolCall as ProviderToolCall, ToolDefinition,
};
use crate::tool::{ToolCallRequest, ToolRegistry};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: std::time::Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: std::time::Duration::from_millis(250),
        }
    }
}

/// A shared, atomically-decremented token budget. Negative means exhausted;
/// the team orchestrator and the tool loop both decrement the same counter
/// when a team shares a budget.
pub struct TokenBudget {
    remaining: AtomicI64,
}

impl TokenBudget {
    pub fn new(total: i64) -> Self {
        Self {
            remaining: AtomicI64::new(total),
        }
    }

    /// Subtract `spent` and return `(new_remaining, crossed_half)` where
    /// `crossed_half` is true iff this call dropped the budget below 50% of
    /// its value *before* this subtraction for the first time.
    pub fn spend(&self, spent: i64, pre_call_value: i64) -> (i64, bool) {
        let new_value = self.remaining.fetch_sub(spent, Ordering::SeqCst) - spent;
        let half = pre_call_value / 2;
        let crossed_half = pre_call_value > 0 && new_value < half && (new_value + spent) >= half;
        (new_value, crossed_half)
    }

    pub fn remaining(&self) -> i64 {
        self.remaining.load(Ordering::SeqCst)
    }

    pub fn exhausted(&self) -> bool {
        self.remaining() <= 0
    }
}

pub type RetryNotice = Arc<dyn Fn(u32, &str) + Send + Sync>;

pub struct LoopConfig {
    pub provider: Arc<dyn Provider>,
    pub model: String,
    pub registry: Arc<ToolRegistry>,
    pub max_iterations: u32,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub sender_id: String,
    pub parallel_cfg: ToolCallParallelConfig,
    pub retry_policy: RetryPolicy,
    pub retry_notice: Option<RetryNotice>,
    pub remaining_token_budget: Option<Arc<TokenBudget>>,
    /// When set to `true` the loop aborts at the next iteration boundary and
    /// returns `Err("cancelled")`.
    pub cancel_flag: Option<Arc<AtomicBool>>,
}

/// One recorded tool-call execution within an iteration, for observability.
#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub iteration: u32,
    pub tool: String,
    pub args: Value,
    pub result: String,
    pub is_error: bool,
    pub duration_ms: u128,
    pub tool_call_id: String,
}

pub struct LoopOutcome {
    pub content: String,
    pub messages: Vec<Message>,
    pub trace: Vec<TraceEntry>,
    pub iterations: u32,
}

const BUDGET_EXHAUSTION_SYSTEM_NOTICE: &str =
    "token budget exhausted; stop all tool calls and return best result";
const BUDGET_HALFWAY_ADVISORY: &str =
    "Advisory: roughly half of the available token budget for this task has been used. Wrap up efficiently.";

pub struct ToolLoop {
    config: LoopConfig,
    batch_executor: BatchExecutor,
}

impl ToolLoop {
    pub fn new(config: LoopConfig) -> Self {
        let batch_executor = BatchExecutor::new(config.registry.clone());
        Self { config, batch_executor }
    }

    #[tracing::instrument(name = "tool_loop.run", skip(self, messages), fields(sender = %self.config.sender_id))]
    pub async fn run(&self, session: &str, mut messages: Vec<Message>) -> Result<LoopOutcome, String> {
        let mut trace = Vec::new();
        let mut halfway_advisory_sent = false;

        for iteration in 0..self.config.max_iterations {
            if let Some(flag) = &self.config.cancel_flag {
                if flag.load(Ordering::SeqCst) {
                    return Err("cancelled".to_string());
                }
            }

            let tool_defs = self.build_tool_defs().await;
            let response = match self.call_provider_with_retry(&messages, &tool_defs).await {
                Ok(r) => r,
                Err(e) => return Err(e),
            };

            if let Some(budget) = &self.config.remaining_token_budget {
                let pre_call = budget.remaining();
                if let Some(usage) = response.usage {
                    let (_, crossed_half) = budget.spend(usage.total_tokens as i64, pre_call);
                    if crossed_half && !halfway_advisory_sent {
                        halfway_advisory_sent = true;
                        messages.push(Message::user(BUDGET_HALFWAY_ADVISORY));
                    }
                }
                if budget.exhausted() {
                    messages.push(Message::assistant(response.content.clone()));
                    messages.push(Message::user(BUDGET_EXHAUSTION_SYSTEM_NOTICE));
                    let final_request = ChatRequest::new(self.config.model.clone(), messages.clone());
                    let final_response = self.config.provider.chat(final_request).await?;
                    return Ok(LoopOutcome {
                        content: final_response.content,
                        messages,
                        trace,
                        iterations: iteration + 1,
                    });
                }
            }

            if response.is_truncated() {
                messages.push(Message::assistant(response.content.clone()));
                messages.push(Message::user(
                    "your previous reply was truncated; reply again more concisely and completely",
                ));
                continue;
            }

            if !response.has_tool_calls() {
                return Ok(LoopOutcome {
                    content: response.content,
                    messages,
                    trace,
                    iterations: iteration + 1,
                });
            }

            let normalized = normalize_tool_calls(response.tool_calls.clone());
            messages.push(Message::assistant_with_tool_calls(
                response.content.clone(),
                normalized.clone(),
            ));

            let requests: Vec<ToolCallRequest> = normalized
                .iter()
                .map(|c| ToolCallRequest {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    arguments: c.arguments.clone(),
                })
                .collect();

            let outcomes = self
                .batch_executor
                .execute(session, requests, &self.config.parallel_cfg)
                .await;

            for outcome in outcomes {
                messages.push(Message::tool_result(
                    outcome.request.id.clone(),
                    outcome.result.for_llm.clone(),
                ));
                trace.push(TraceEntry {
                    iteration,
                    tool: outcome.request.name,
                    args: outcome.request.arguments,
                    result: outcome.result.for_llm,
                    is_error: outcome.result.is_error,
                    duration_ms: outcome.duration.as_millis(),
                    tool_call_id: outcome.request.id,
                });
            }
        }

        Ok(LoopOutcome {
            content: String::new(),
            messages,
            trace,
            iterations: self.config.max_iterations,
        })
    }

    async fn build_tool_defs(&self) -> Vec<ToolDefinition> {
        self.config
            .registry
            .list()
            .await
            .into_iter()
            .map(|info| ToolDefinition {
                name: info.name,
                description: info.description,
                parameters: info.parameters,
            })
            .collect()
    }

    async fn call_provider_with_retry(
        &self,
        messages: &[Message],
        tool_defs: &[ToolDefinition],
    ) -> Result<ChatResponse, String> {
        let mut attempt = 0u32;
        loop {
            let mut request = ChatRequest::new(self.config.model.clone(), messages.to_vec())
                .with_tools(tool_defs.to_vec());
            if let Some(t) = self.config.temperature {
                request = request.with_temperature(t);
            }
            if let Some(t) = self.config.max_tokens {
                request = request.with_max_tokens(t);
            }

            match self.config.provider.chat(request).await {
                Ok(response) => return Ok(response),
                Err(message) => {
                    attempt += 1;
                    let kind = classify_provider_error(&message);
                    let retryable = matches!(kind, ErrorKind::Transient | ErrorKind::Timeout);
                    if !retryable || attempt >= self.config.retry_policy.max_attempts {
                        return Err(message);
                    }
                    if let Some(notice) = &self.config.retry_notice {
                        notice(attempt, &message);
                    }
                    let delay = self.config.retry_policy.base_delay * attempt;
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Ensure every tool call has an id, synthesizing one if the provider
/// omitted it (some providers echo calls without ids on retries).
fn normalize_tool_calls(calls: Vec<ProviderToolCall>) -> Vec<ProviderToolCall> {
    calls
        .into_iter()
        .map(|mut c| {
            if c.id.is_empty() {
                c.id = format!("call_{}", Uuid::new_v4());
            }
            c
        })
        .collect()
}
