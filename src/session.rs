//! Session key — opaque identifier isolating per-session state across the
//! loop detector, process scope, permission store, and subagent depth
//! tracking.

use std::fmt;

/// Default session key used when a component receives no explicit key.
pub const DEFAULT_SESSION_KEY: &str = "_default";

/// Opaque conversation identifier.
///
/// Session keys are plain strings at the component boundary (the loop
/// detector, process scope, and permission store all key off `&str`), but
/// this wrapper centralizes the well-known constructors so callers don't
/// hand-format ad hoc strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct SessionKey(pub String);

impl SessionKey {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The default, unscoped session.
    pub fn default_session() -> Self {
        Self(DEFAULT_SESSION_KEY.to_string())
    }

    /// A session isolated to a single subagent task.
    pub fn subagent(task_id: &str) -> Self {
        Self(format!("subagent:{task_id}"))
    }

    /// A session for a scheduled (cron/heartbeat) trigger.
    pub fn cron(job_id: &str) -> Self {
        Self(format!("cron:{job_id}"))
    }

    /// A session for an inbound channel conversation.
    pub fn channel(channel: &str, chat_id: &str) -> Self {
        Self(format!("channel:{channel}:{chat_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` if this key identifies a subagent task (used to derive spawn depth).
    pub fn is_subagent(&self) -> bool {
        self.0.starts_with("subagent:")
    }

    /// Extract the parent task id from a `subagent:<id>` key, if any.
    pub fn subagent_parent_id(&self) -> Option<&str> {
        self.0.strip_prefix("subagent:")
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionKey {
    fn from(s: &str) -> Self {
        if s.is_empty() {
            Self::default_session()
        } else {
            Self(s.to_string())
        }
    }
}

impl From<String> for SessionKey {
    fn from(s: String) -> Self {
        if s.is_empty() {
            Self::default_session()
        } else {
            Self(s)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subagent_key_round_trips_parent_id() {
        let key = SessionKey::subagent("task-42");
        assert!(key.is_subagent());
        assert_eq!(key.subagent_parent_id(), Some("task-42"));
    }

    #[test]
    fn non_subagent_key_has_no_parent() {
        let key = SessionKey::new("main");
        assert!(!key.is_subagent());
        assert_eq!(key.subagent_parent_id(), None);
    }

    #[test]
    fn empty_string_maps_to_default() {
        let key: SessionKey = String::new().into();
        assert_eq!(key, SessionKey::default_session());
    }

    #[test]
    fn channel_key_format() {
        let key = SessionKey::channel("telegram", "12345");
        assert_eq!(key.as_str(), "channel:telegram:12345");
    }
}
