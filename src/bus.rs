//! Event bus: best-effort fan-out of lifecycle events (tool start/result,
//! subagent lifecycle, approval request/response) to interested subscribers.
//!
//! Subscribers that lag behind the broadcast capacity drop old events rather
//! than blocking the publisher; see `lagged_receiver_reports_error` below.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events this core emits. A parent application (channels, UI, logging) may
/// subscribe to drive its own side effects; the core never blocks on a
/// subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreEvent {
    ToolStart {
        session: String,
        tool_name: String,
        args: serde_json::Value,
    },
    ToolResult {
        session: String,
        tool_name: String,
        is_error: bool,
    },
    SubagentCreated {
        task_id: String,
        parent_id: Option<String>,
    },
    SubagentRunning {
        task_id: String,
    },
    SubagentCompleted {
        task_id: String,
        chat_id: String,
        sender: String,
    },
    SubagentFailed {
        task_id: String,
        reason: String,
    },
    SubagentCancelled {
        task_id: String,
    },
    ApprovalNeeded {
        action_id: String,
        description: String,
    },
    ApprovalResponse {
        action_id: String,
        approved: bool,
    },
    CronFired {
        job_id: String,
        schedule: String,
    },
    /// A cron-triggered tool call was blocked by policy (e.g. the Shell
    /// Guard). Carries a human-readable message for the originating channel.
    CronToolBlocked {
        job_id: String,
        tool_name: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    ToolStart,
    ToolResult,
    SubagentCreated,
    SubagentRunning,
    SubagentCompleted,
    SubagentFailed,
    SubagentCancelled,
    ApprovalNeeded,
    ApprovalResponse,
    CronFired,
    CronToolBlocked,
    All,
}

impl EventType {
    pub fn matches(&self, event: &CoreEvent) -> bool {
        match self {
            Self::All => true,
            Self::ToolStart => matches!(event, CoreEvent::ToolStart { .. }),
            Self::ToolResult => matches!(event, CoreEvent::ToolResult { .. }),
            Self::SubagentCreated => matches!(event, CoreEvent::SubagentCreated { .. }),
            Self::SubagentRunning => matches!(event, CoreEvent::SubagentRunning { .. }),
            Self::SubagentCompleted => matches!(event, CoreEvent::SubagentCompleted { .. }),
            Self::SubagentFailed => matches!(event, CoreEvent::SubagentFailed { .. }),
            Self::SubagentCancelled => matches!(event, CoreEvent::SubagentCancelled { .. }),
            Self::ApprovalNeeded => matches!(event, CoreEvent::ApprovalNeeded { .. }),
            Self::ApprovalResponse => matches!(event, CoreEvent::ApprovalResponse { .. }),
            Self::CronFired => matches!(event, CoreEvent::CronFired { .. }),
            Self::CronToolBlocked => matches!(event, CoreEvent::CronToolBlocked { .. }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventFilter {
    pub event_types: Vec<EventType>,
}

impl EventFilter {
    pub fn new(event_types: Vec<EventType>) -> Self {
        Self { event_types }
    }

    pub fn matches(&self, event: &CoreEvent) -> bool {
        self.event_types.iter().any(|t| t.matches(event))
    }
}

/// Central pub/sub bus for core events.
///
/// All returned receivers receive every published event; callers subscribing
/// via `subscribe_filtered` are responsible for applying `EventFilter::matches`.
pub trait EventBus: Send + Sync {
    fn publish(&self, event: CoreEvent) -> Result<(), String>;
    fn subscribe(&self) -> broadcast::Receiver<CoreEvent>;
    fn subscribe_filtered(&self, filter: EventFilter) -> broadcast::Receiver<CoreEvent>;
}

pub struct TokioBroadcastBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl TokioBroadcastBus {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }
}

impl Default for TokioBroadcastBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for TokioBroadcastBus {
    fn publish(&self, event: CoreEvent) -> Result<(), String> {
        // No active subscribers is not an error: the bus is best-effort.
        match self.sender.send(event) {
            Ok(_) | Err(broadcast::error::SendError(_)) => Ok(()),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    fn subscribe_filtered(&self, _filter: EventFilter) -> broadcast::Receiver<CoreEvent> {
        self.sender.subscribe()
    }
}
