//! Permission Store — the set of absolute directories a user has approved
//! for out-of-workspace tool access.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use tokio::sync::RwLock;

pub struct PermissionStore {
    approved: RwLock<HashSet<PathBuf>>,
}

impl PermissionStore {
    pub fn new() -> Self {
        Self {
            approved: RwLock::new(HashSet::new()),
        }
    }

    pub async fn approve(&self, dir: impl AsRef<Path>) {
        self.approved.write().await.insert(normalize(dir.as_ref()));
    }

    pub async fn revoke(&self, dir: impl AsRef<Path>) {
        self.approved.write().await.remove(&normalize(dir.as_ref()));
    }

    /// A path is approved iff some approved directory equals it, or is an
    /// ancestor of it by path component (not string prefix — `/foo-bar` is
    /// never approved by an approval of `/foo`).
    pub async fn is_approved(&self, path: impl AsRef<Path>) -> bool {
        let path = normalize(path.as_ref());
        self.approved
            .read()
            .await
            .iter()
            .any(|approved| path_has_prefix(&path, approved))
    }

    pub async fn list(&self) -> Vec<PathBuf> {
        self.approved.read().await.iter().cloned().collect()
    }
}

impl Default for PermissionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Prompt on stdin for an out-of-workspace access approval. Reads one line;
/// `y`/`yes` (case-insensitive) is approval, anything else (including EOF or
/// a read error) is denial.
pub fn prompt_stdin_approval(description: &str) -> bool {
    use std::io::Write as _;

    print!("{description} [y/N]: ");
    if std::io::stdout().flush().is_err() {
        return false;
    }

    let mut line = String::new();
    match std::io::stdin().read_line(&mut line) {
        Ok(_) => matches!(line.trim().to_lowercase().as_str(), "y" | "yes"),
        Err(_) => false,
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn path_has_prefix(path: &Path, prefix: &Path) -> bool {
    let path_components: Vec<_> = path.components().collect();
    let prefix_components: Vec<_> = prefix.components().collect();
    if prefix_components.len() > path_components.len() {
        return false;
    }
    path_components
        .iter()
        .zip(prefix_components.iter())
        .all(|(a, b)| a == b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exact_match_is_approved() {
        let store = PermissionStore::new();
        store.approve("/home/user/project").await;
        assert!(store.is_approved("/home/user/project").await);
    }

    #[tokio::test]
    async fn descendant_of_approved_dir_is_approved() {
        let store = PermissionStore::new();
        store.approve("/home/user/project").await;
        assert!(store.is_approved("/home/user/project/src/main.rs").await);
    }

    #[tokio::test]
    async fn sibling_with_shared_string_prefix_is_not_approved() {
        let store = PermissionStore::new();
        store.approve("/home/user/foo").await;
        assert!(!store.is_approved("/home/user/foo-bar").await);
    }

    #[tokio::test]
    async fn unrelated_path_is_not_approved() {
        let store = PermissionStore::new();
        store.approve("/home/user/project").await;
        assert!(!store.is_approved("/etc/passwd").await);
    }

    #[tokio::test]
    async fn revoke_removes_approval() {
        let store = PermissionStore::new();
        store.approve("/home/user/project").await;
        store.revoke("/home/user/project").await;
        assert!(!store.is_approved("/home/user/project").await);
    }

    #[tokio::test]
    async fn dot_dot_components_are_normalized_before_comparison() {
        let store = PermissionStore::new();
        store.approve("/home/user/project").await;
        assert!(store.is_approved("/home/user/other/../project/file.rs").await);
    }
}
