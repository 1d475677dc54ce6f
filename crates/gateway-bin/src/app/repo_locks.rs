//! Per-repo serialization of git mutations.
//!
//! Worktree creation and cleanup write refs and worktree admin files inside
//! the same `.git` directory; libgit2 does not make those writes safe
//! against each other. Every mutating git call takes the repo's lock first,
//! so two session creations against one repo queue instead of racing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as TokioMutex, OwnedMutexGuard};

/// One async mutex per repo root, created on first use.
#[derive(Clone, Default)]
pub struct RepoLocks {
    inner: Arc<Mutex<HashMap<PathBuf, Arc<TokioMutex<()>>>>>,
}

impl RepoLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the mutation lock for a repo. The guard is owned, so it can
    /// be held across the blocking git call.
    pub async fn lock(&self, repo_root: &Path) -> OwnedMutexGuard<()> {
        let entry = {
            let mut map = self.inner.lock().expect("repo lock map poisoned");
            map.entry(repo_root.to_path_buf())
                .or_insert_with(|| Arc::new(TokioMutex::new(())))
                .clone()
        };
        entry.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(flavor = "multi_thread")]
    async fn same_repo_mutations_are_serialized() {
        let locks = RepoLocks::new();
        let repo = PathBuf::from("/srv/repos/demo");
        let in_flight = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let repo = repo.clone();
            let in_flight = in_flight.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(&repo).await;
                assert_eq!(in_flight.fetch_add(1, Ordering::SeqCst), 0);
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.expect("task");
        }
    }

    #[tokio::test]
    async fn distinct_repos_do_not_contend() {
        let locks = RepoLocks::new();
        let guard_a = locks.lock(Path::new("/srv/repos/a")).await;
        // A second repo's lock must be acquirable while the first is held.
        let _guard_b = locks.lock(Path::new("/srv/repos/b")).await;
        drop(guard_a);
    }
}
