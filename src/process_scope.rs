//! Process Scope — per-session PID tracking with cascade kill, used to tear
//! down background shell invocations a session spawned.

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;

#[cfg(unix)]
fn is_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_alive(_pid: u32) -> bool {
    // No portable signal-0 probe off POSIX; treat as alive so callers fall
    // back to best-effort termination instead of silently skipping it.
    true
}

#[cfg(unix)]
fn terminate(pid: u32) -> bool {
    std::process::Command::new("kill")
        .arg(pid.to_string())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn terminate(_pid: u32) -> bool {
    false
}

/// Tracks which OS process ids belong to which session, so a session's
/// background shell children can be torn down as a unit.
pub struct ProcessScope {
    by_session: RwLock<HashMap<String, HashSet<u32>>>,
}

impl ProcessScope {
    pub fn new() -> Self {
        Self {
            by_session: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, session: &str, pid: u32) {
        self.by_session
            .write()
            .await
            .entry(session.to_string())
            .or_default()
            .insert(pid);
    }

    pub async fn deregister(&self, session: &str, pid: u32) {
        if let Some(pids) = self.by_session.write().await.get_mut(session) {
            pids.remove(&pid);
        }
    }

    pub async fn owns(&self, session: &str, pid: u32) -> bool {
        self.by_session
            .read()
            .await
            .get(session)
            .is_some_and(|pids| pids.contains(&pid))
    }

    /// Live PIDs for `session`, pruning dead entries as a side effect.
    pub async fn list_pids(&self, session: &str) -> Vec<u32> {
        let mut guard = self.by_session.write().await;
        let Some(pids) = guard.get_mut(session) else {
            return Vec::new();
        };
        pids.retain(|pid| is_alive(*pid));
        pids.iter().copied().collect()
    }

    /// Best-effort SIGTERM to every PID owned by `session`; returns the
    /// number of successful signals.
    pub async fn kill_all(&self, session: &str) -> usize {
        let pids = self.list_pids(session).await;
        pids.into_iter().filter(|pid| terminate(*pid)).count()
    }

    pub async fn cleanup(&self, session: &str) {
        self.by_session.write().await.remove(session);
    }
}

impl Default for ProcessScope {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_and_owns() {
        let scope = ProcessScope::new();
        scope.register("s1", 42).await;
        assert!(scope.owns("s1", 42).await);
        assert!(!scope.owns("s1", 99).await);
        assert!(!scope.owns("s2", 42).await);
    }

    #[tokio::test]
    async fn deregister_removes_pid() {
        let scope = ProcessScope::new();
        scope.register("s1", 42).await;
        scope.deregister("s1", 42).await;
        assert!(!scope.owns("s1", 42).await);
    }

    #[tokio::test]
    async fn list_pids_prunes_dead_entries() {
        let scope = ProcessScope::new();
        // pid 0 is never a valid target process and reliably fails the
        // liveness probe, modelling an already-exited child.
        scope.register("s1", 0).await;
        scope.register("s1", std::process::id()).await;
        let live = scope.list_pids("s1").await;
        assert!(live.contains(&std::process::id()));
        assert!(!live.contains(&0));
    }

    #[tokio::test]
    async fn cleanup_removes_session() {
        let scope = ProcessScope::new();
        scope.register("s1", std::process::id()).await;
        scope.cleanup("s1").await;
        assert!(scope.list_pids("s1").await.is_empty());
    }
}
