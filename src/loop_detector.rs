//! Loop Detector — a [`Hook`] that breaks circuits of repeated or
//! ping-ponging tool calls within a session.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::session::DEFAULT_SESSION_KEY;
use crate::tool::{Hook, ToolResult};

/// One call's footprint in a session's history.
#[derive(Debug, Clone)]
struct HistoryEntry {
    tool: String,
    args_hash: String,
    result_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoopDetectorConfig {
    pub history_size: usize,
    pub warning_threshold: usize,
    pub critical_threshold: usize,
    pub circuit_breaker_threshold: usize,
}

impl Default for LoopDetectorConfig {
    fn default() -> Self {
        Self {
            history_size: 30,
            warning_threshold: 10,
            critical_threshold: 20,
            circuit_breaker_threshold: 30,
        }
    }
}

fn args_hash(args: &Value) -> String {
    if args.is_null() {
        return "empty".to_string();
    }
    let canonical = canonical_json(args);
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)[..8].to_string()
}

fn result_hash(text: &str) -> String {
    let truncated: String = text.chars().take(1024).collect();
    let digest = Sha256::digest(truncated.as_bytes());
    hex::encode(digest)[..8].to_string()
}

/// Serialize with sorted object keys so the hash is stable regardless of
/// field-insertion order.
fn canonical_json(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<_> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut out = serde_json::Map::new();
                for (k, v) in entries {
                    out.insert(k.clone(), sorted(v));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}

/// Outcome of the pre-record evaluation against existing history.
enum Verdict {
    Ok,
    Warn { reason: String },
    Block { reason: String },
}

fn evaluate(history: &VecDeque<HistoryEntry>, tool: &str, hash: &str, config: &LoopDetectorConfig) -> Verdict {
    // Circuit-breaker: trailing run of (tool, args_hash) whose result_hash
    // matches the most recent completed match. Incomplete entries (no
    // result_hash yet) count conservatively toward the run.
    let matching: Vec<&HistoryEntry> = history
        .iter()
        .filter(|e| e.tool == tool && e.args_hash == hash)
        .collect();
    if let Some(last_completed) = matching.iter().rev().find(|e| e.result_hash.is_some()) {
        let target = last_completed.result_hash.clone();
        let run = history
            .iter()
            .rev()
            .take_while(|e| e.tool == tool && e.args_hash == hash && (e.result_hash.is_none() || e.result_hash == target))
            .count();
        if run >= config.circuit_breaker_threshold {
            return Verdict::Block {
                reason: format!(
                    "circuit breaker: \"{tool}\" repeated with identical arguments and result {run} times"
                ),
            };
        }
    }

    // Generic repeat: total count of (tool, args_hash) in the window.
    let total = matching.len() + 1; // +1 for the hypothetical current call
    if total >= config.critical_threshold {
        return Verdict::Block {
            reason: format!("\"{tool}\" repeated with the same arguments {total} times in this session"),
        };
    }
    if total >= config.warning_threshold {
        return Verdict::Warn {
            reason: format!("\"{tool}\" called with the same arguments {total} times in this session"),
        };
    }

    // Ping-pong: alternating A,B,A,B,... with the current call as the next
    // hypothetical step.
    if history.len() >= 3 {
        let tail: Vec<&HistoryEntry> = history.iter().rev().take(3).collect();
        let (c2, c1, c0) = (tail[2], tail[1], tail[0]);
        let forms_alternation =
            c0.tool == tool && c0.args_hash == hash && c1.tool == c2.tool && c1.args_hash == c2.args_hash && (c0.tool != c1.tool || c0.args_hash != c1.args_hash);
        if forms_alternation {
            let pair_count = count_alternating_tail(history, tool, hash);
            if pair_count >= config.critical_threshold && history.len() >= 4 {
                let last4: Vec<&HistoryEntry> = history.iter().rev().take(4).collect();
                let stable = last4[0].result_hash.is_some()
                    && last4[2].result_hash.is_some()
                    && last4[0].result_hash == last4[2].result_hash
                    && last4[1].result_hash.is_some()
                    && last4[3].result_hash.is_some()
                    && last4[1].result_hash == last4[3].result_hash;
                if stable {
                    return Verdict::Block {
                        reason: format!(
                            "ping-pong detected between \"{}\" and \"{}\" — no progress",
                            c0.tool, c1.tool
                        ),
                    };
                }
            }
            if pair_count >= config.warning_threshold {
                return Verdict::Warn {
                    reason: format!("possible ping-pong between \"{}\" and \"{}\"", c0.tool, c1.tool),
                };
            }
        }
    }

    Verdict::Ok
}

fn count_alternating_tail(history: &VecDeque<HistoryEntry>, tool: &str, hash: &str) -> usize {
    let entries: Vec<&HistoryEntry> = history.iter().rev().collect();
    let mut count = 0usize;
    let mut expect_current = true;
    let mut other: Option<(&str, &str)> = None;
    for entry in entries {
        if expect_current {
            if entry.tool != tool || entry.args_hash != hash {
                break;
            }
        } else {
            match other {
                Some((t, h)) => {
                    if entry.tool != t || entry.args_hash != h {
                        break;
                    }
                }
                None => other = Some((entry.tool.as_str(), entry.args_hash.as_str())),
            }
        }
        count += 1;
        expect_current = !expect_current;
    }
    count
}

/// Per-session bounded history plus the circuit-breaker/repeat/ping-pong
/// evaluation run on each `before_execute`.
pub struct LoopDetector {
    config: LoopDetectorConfig,
    sessions: RwLock<HashMap<String, VecDeque<HistoryEntry>>>,
}

impl LoopDetector {
    pub fn new(config: LoopDetectorConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn reset_session(&self, key: &str) {
        self.sessions.write().await.remove(key);
    }

    async fn record(&self, session: &str, tool: &str, hash: String) {
        let mut sessions = self.sessions.write().await;
        let history = sessions.entry(session.to_string()).or_default();
        history.push_back(HistoryEntry {
            tool: tool.to_string(),
            args_hash: hash,
            result_hash: None,
        });
        while history.len() > self.config.history_size {
            history.pop_front();
        }
    }
}

impl Default for LoopDetector {
    fn default() -> Self {
        Self::new(LoopDetectorConfig::default())
    }
}

#[async_trait]
impl Hook for LoopDetector {
    fn name(&self) -> &str {
        "loop_detector"
    }

    async fn before_execute(&self, session: &str, tool_name: &str, args: &Value) -> Result<(), String> {
        let session = if session.is_empty() { DEFAULT_SESSION_KEY } else { session };
        let hash = args_hash(args);

        let verdict = {
            let sessions = self.sessions.read().await;
            let empty = VecDeque::new();
            let history = sessions.get(session).unwrap_or(&empty);
            evaluate(history, tool_name, &hash, &self.config)
        };

        match verdict {
            Verdict::Block { reason } => {
                self.record(session, tool_name, hash).await;
                tracing::warn!(session, tool = tool_name, reason = %reason, "loop detector blocked call");
                Err(reason)
            }
            Verdict::Warn { reason } => {
                tracing::warn!(session, tool = tool_name, reason = %reason, "loop detector warning");
                self.record(session, tool_name, hash).await;
                Ok(())
            }
            Verdict::Ok => {
                self.record(session, tool_name, hash).await;
                Ok(())
            }
        }
    }

    async fn after_execute(&self, session: &str, tool_name: &str, args: &Value, result: &ToolResult) {
        let session = if session.is_empty() { DEFAULT_SESSION_KEY } else { session };
        let hash = args_hash(args);
        let rhash = result_hash(&result.for_llm);

        let mut sessions = self.sessions.write().await;
        if let Some(history) = sessions.get_mut(session) {
            if let Some(entry) = history
                .iter_mut()
                .rev()
                .find(|e| e.tool == tool_name && e.args_hash == hash && e.result_hash.is_none())
            {
                entry.result_hash = Some(rhash);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(critical: usize, warning: usize, breaker: usize) -> LoopDetectorConfig {
        LoopDetectorConfig {
            history_size: 30,
            warning_threshold: warning,
            critical_threshold: critical,
            circuit_breaker_threshold: breaker,
        }
    }

    #[tokio::test]
    async fn args_hash_is_stable_under_key_reordering() {
        let a = serde_json::json!({"path": "/a", "mode": "r"});
        let b = serde_json::json!({"mode": "r", "path": "/a"});
        assert_eq!(args_hash(&a), args_hash(&b));
    }

    #[tokio::test]
    async fn distinct_args_yield_distinct_hashes() {
        let a = serde_json::json!({"path": "/a"});
        let b = serde_json::json!({"path": "/b"});
        assert_ne!(args_hash(&a), args_hash(&b));
    }

    #[tokio::test]
    async fn allows_calls_below_warning_threshold() {
        let detector = LoopDetector::new(config_with(5, 3, 10));
        let args = serde_json::json!({"x": 1});
        for _ in 0..2 {
            assert!(detector.before_execute("s", "tool", &args).await.is_ok());
            detector.after_execute("s", "tool", &args, &ToolResult::ok("r")).await;
        }
    }

    #[tokio::test]
    async fn blocks_at_critical_threshold() {
        let detector = LoopDetector::new(config_with(3, 2, 100));
        let args = serde_json::json!({"x": 1});
        // two calls succeed (counts become 1, 2)
        for _ in 0..2 {
            assert!(detector.before_execute("s", "tool", &args).await.is_ok());
            detector.after_execute("s", "tool", &args, &ToolResult::ok("r")).await;
        }
        // third call: total would be 3 == critical_threshold -> blocked
        let result = detector.before_execute("s", "tool", &args).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn reset_session_clears_history() {
        let detector = LoopDetector::new(config_with(3, 2, 100));
        let args = serde_json::json!({"x": 1});
        detector.before_execute("s", "tool", &args).await.unwrap();
        detector.after_execute("s", "tool", &args, &ToolResult::ok("r")).await;
        detector.reset_session("s").await;
        // After reset, counts start over — two more calls should not yet block.
        assert!(detector.before_execute("s", "tool", &args).await.is_ok());
    }

    #[tokio::test]
    async fn circuit_breaker_blocks_identical_repeat_result_run() {
        let detector = LoopDetector::new(config_with(1000, 900, 3));
        let args = serde_json::json!({"x": 1});
        for _ in 0..3 {
            detector.before_execute("s", "tool", &args).await.ok();
            detector.after_execute("s", "tool", &args, &ToolResult::ok("same-result")).await;
        }
        let result = detector.before_execute("s", "tool", &args).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn different_sessions_do_not_share_history() {
        let detector = LoopDetector::new(config_with(2, 1, 100));
        let args = serde_json::json!({"x": 1});
        detector.before_execute("a", "tool", &args).await.unwrap();
        detector.after_execute("a", "tool", &args, &ToolResult::ok("r")).await;
        // Session "b" starts fresh even though "a" is near its threshold.
        assert!(detector.before_execute("b", "tool", &args).await.is_ok());
    }
}
