//! Worktree Manager — isolated git worktrees for each worker.
//!
//! One worktree per worker, checked out on a dedicated branch rooted at the
//! run's base branch, under `<repo>/.swarm-worktrees/<run_id>/<worker_id>`.
//! Worktree creation is serialized (the caller drives this sequentially in
//! plan order) to avoid racing on `.git/index.lock`; everything else may run
//! concurrently.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::WorktreeError;

const LOCK_RETRY_ATTEMPTS: u32 = 3;
const LOCK_RETRY_BASE_MS: u64 = 500;

/// Run one git command, retrying if the failure looks like lock contention.
///
/// Non-lock failures raise immediately. Exhausting all retries on lock
/// contention raises a distinct error naming the attempt count.
pub async fn run_git(args: &[&str], cwd: &Path) -> Result<String, WorktreeError> {
    run_git_inner(args, cwd, true)
        .await
        .map(|out| out.unwrap_or_default())
}

/// Like [`run_git`] but never raises on a non-zero exit: returns an empty
/// string instead. Still raises on lock-retry exhaustion, since that
/// indicates the command was never actually attempted to completion.
pub async fn run_git_unchecked(args: &[&str], cwd: &Path) -> Result<String, WorktreeError> {
    run_git_inner(args, cwd, false)
        .await
        .map(|out| out.unwrap_or_default())
}

async fn run_git_inner(
    args: &[&str],
    cwd: &Path,
    check: bool,
) -> Result<Option<String>, WorktreeError> {
    let operation = args.join(" ");
    for attempt in 0..LOCK_RETRY_ATTEMPTS {
        let output = Command::new("git")
            .args(args)
            .current_dir(cwd)
            .output()
            .await
            .map_err(|e| WorktreeError::GitCommand {
                operation: operation.clone(),
                message: e.to_string(),
            })?;

        if output.status.success() {
            return Ok(Some(
                String::from_utf8_lossy(&output.stdout).trim().to_string(),
            ));
        }

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if stderr.to_lowercase().contains("lock") && attempt + 1 < LOCK_RETRY_ATTEMPTS {
            let delay = Duration::from_millis(LOCK_RETRY_BASE_MS * u64::from(attempt + 1));
            debug!(operation = %operation, attempt, "git lock contention, retrying");
            tokio::time::sleep(delay).await;
            continue;
        }

        if stderr.to_lowercase().contains("lock") {
            return Err(WorktreeError::LockRetriesExhausted {
                operation,
                attempts: LOCK_RETRY_ATTEMPTS,
                message: stderr,
            });
        }

        if check {
            return Err(WorktreeError::GitCommand {
                operation,
                message: stderr,
            });
        }
        return Ok(None);
    }
    unreachable!("loop always returns before exhausting attempts")
}

/// Manages the set of worktrees and branches for one run.
pub struct WorktreeManager {
    repo_path: PathBuf,
    run_id: String,
    worktrees: Mutex<HashMap<String, PathBuf>>,
    branches: Mutex<Vec<String>>,
    gc_disabled: AtomicBool,
}

impl WorktreeManager {
    pub fn new(repo_path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            repo_path: repo_path.into(),
            run_id: run_id.into(),
            worktrees: Mutex::new(HashMap::new()),
            branches: Mutex::new(Vec::new()),
            gc_disabled: AtomicBool::new(false),
        }
    }

    fn worktrees_root(&self) -> PathBuf {
        self.repo_path.join(".swarm-worktrees").join(&self.run_id)
    }

    pub fn branch_name(&self, worker_id: &str) -> String {
        format!("swarm/{}/{}", self.run_id, worker_id)
    }

    pub fn worktree_path(&self, worker_id: &str) -> PathBuf {
        self.worktrees_root().join(worker_id)
    }

    /// Current branch of the repository.
    pub async fn base_branch(&self) -> Result<String, WorktreeError> {
        run_git(&["rev-parse", "--abbrev-ref", "HEAD"], &self.repo_path).await
    }

    pub async fn disable_gc(&self) -> Result<(), WorktreeError> {
        run_git(&["config", "gc.auto", "0"], &self.repo_path).await?;
        self.gc_disabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub async fn restore_gc(&self) -> Result<(), WorktreeError> {
        if self.gc_disabled.load(Ordering::SeqCst) {
            run_git_unchecked(&["config", "--unset", "gc.auto"], &self.repo_path).await?;
            self.gc_disabled.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn add_worktree(
        &self,
        name: &str,
        base: &str,
    ) -> Result<PathBuf, WorktreeError> {
        let path = self.worktree_path(name);
        let branch = self.branch_name(name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        run_git(
            &[
                "worktree",
                "add",
                "-b",
                &branch,
                path.to_str().expect("worktree path is valid utf8"),
                base,
            ],
            &self.repo_path,
        )
        .await?;
        self.worktrees
            .lock()
            .expect("worktree map lock poisoned")
            .insert(name.to_string(), path.clone());
        self.branches
            .lock()
            .expect("branch list lock poisoned")
            .push(branch);
        Ok(path)
    }

    pub async fn create_worker_worktree(
        &self,
        worker_id: &str,
        base: &str,
    ) -> Result<PathBuf, WorktreeError> {
        self.add_worktree(worker_id, base).await
    }

    pub async fn create_integration_worktree(
        &self,
        base: &str,
    ) -> Result<PathBuf, WorktreeError> {
        self.add_worktree("integration", base).await
    }

    pub fn integration_branch_name(&self) -> String {
        self.branch_name("integration")
    }

    fn known_path(&self, worker_id: &str) -> Result<PathBuf, WorktreeError> {
        self.worktrees
            .lock()
            .expect("worktree map lock poisoned")
            .get(worker_id)
            .cloned()
            .ok_or_else(|| WorktreeError::UnknownWorker {
                worker_id: worker_id.to_string(),
            })
    }

    pub async fn remove_worker_worktree(&self, worker_id: &str) {
        if let Ok(path) = self.known_path(worker_id) {
            if let Err(e) = run_git_unchecked(
                &[
                    "worktree",
                    "remove",
                    "--force",
                    path.to_str().expect("worktree path is valid utf8"),
                ],
                &self.repo_path,
            )
            .await
            {
                warn!(worker_id, error = %e, "failed to remove worktree, continuing");
            }
            self.worktrees
                .lock()
                .expect("worktree map lock poisoned")
                .remove(worker_id);
        }
    }

    pub async fn remove_branch(&self, branch: &str) {
        if let Err(e) =
            run_git_unchecked(&["branch", "-D", branch], &self.repo_path).await
        {
            warn!(branch, error = %e, "failed to remove branch, continuing");
        }
    }

    /// Files touched on a worker's branch: `base..HEAD`, falling back to the
    /// unstaged diff against HEAD if that produced nothing.
    pub async fn changed_files(
        &self,
        worker_id: &str,
        base: &str,
    ) -> Result<Vec<String>, WorktreeError> {
        let path = self.known_path(worker_id)?;
        let branch = self.branch_name(worker_id);
        let primary = run_git_unchecked(
            &["diff", "--name-only", &format!("{base}..{branch}")],
            &path,
        )
        .await?;
        let listing = if primary.trim().is_empty() {
            run_git_unchecked(&["diff", "--name-only", "HEAD"], &path).await?
        } else {
            primary
        };
        Ok(listing
            .lines()
            .map(str::to_string)
            .filter(|l| !l.is_empty())
            .collect())
    }

    pub async fn worktree_diff(&self, worker_id: &str) -> Result<String, WorktreeError> {
        let path = self.known_path(worker_id)?;
        run_git_unchecked(&["diff", "HEAD"], &path).await
    }

    /// Diff between `base` and `branch`, used for conflict-context reporting.
    pub async fn diff_between(&self, base: &str, branch: &str) -> Result<String, WorktreeError> {
        run_git_unchecked(&["diff", &format!("{base}...{branch}")], &self.repo_path).await
    }

    /// Remove this run's worktrees. In non-force mode branches survive (a
    /// created PR still points somewhere); in force mode every worktree
    /// under `.swarm-worktrees/` and every `swarm/*` branch is removed,
    /// regardless of run.
    pub async fn cleanup_all(&self, force: bool) {
        let workers: Vec<String> = self
            .worktrees
            .lock()
            .expect("worktree map lock poisoned")
            .keys()
            .cloned()
            .collect();
        for worker_id in workers {
            self.remove_worker_worktree(&worker_id).await;
        }
        let _ = self.restore_gc().await;

        if !force {
            return;
        }

        let base = self.repo_path.join(".swarm-worktrees");
        if base.exists() {
            if let Ok(mut entries) = tokio::fs::read_dir(&base).await {
                while let Ok(Some(run_dir)) = entries.next_entry().await {
                    if let Ok(mut workers) = tokio::fs::read_dir(run_dir.path()).await {
                        while let Ok(Some(worker_dir)) = workers.next_entry().await {
                            let _ = run_git_unchecked(
                                &[
                                    "worktree",
                                    "remove",
                                    "--force",
                                    worker_dir
                                        .path()
                                        .to_str()
                                        .expect("worktree path is valid utf8"),
                                ],
                                &self.repo_path,
                            )
                            .await;
                        }
                    }
                }
            }
            let _ = tokio::fs::remove_dir_all(&base).await;
        }

        let branches = run_git_unchecked(
            &["branch", "--list", "swarm/*", "--format=%(refname:short)"],
            &self.repo_path,
        )
        .await
        .unwrap_or_default();
        for branch in branches.lines().filter(|l| !l.is_empty()) {
            self.remove_branch(branch).await;
        }
    }

    pub fn worker_branches(&self) -> Vec<String> {
        self.branches
            .lock()
            .expect("branch list lock poisoned")
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;
    use tempfile::TempDir;

    fn setup_git_repo() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let run = |args: &[&str]| {
            StdCommand::new("git")
                .args(args)
                .current_dir(dir.path())
                .output()
                .unwrap();
        };
        run(&["init", "-b", "main"]);
        run(&["config", "user.email", "test@test.com"]);
        run(&["config", "user.name", "Test"]);
        std::fs::write(dir.path().join("README.md"), "# Test").unwrap();
        run(&["add", "."]);
        run(&["commit", "-m", "initial"]);
        dir
    }

    #[tokio::test]
    async fn create_and_remove_worktree() {
        let dir = setup_git_repo();
        let mgr = WorktreeManager::new(dir.path(), "20260101-000000");
        let base = mgr.base_branch().await.unwrap();
        assert_eq!(base, "main");

        let path = mgr.create_worker_worktree("worker-1", &base).await.unwrap();
        assert!(path.exists());
        assert_eq!(mgr.worker_branches(), vec!["swarm/20260101-000000/worker-1"]);

        mgr.remove_worker_worktree("worker-1").await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn changed_files_reports_new_file() {
        let dir = setup_git_repo();
        let mgr = WorktreeManager::new(dir.path(), "20260101-000000");
        let base = mgr.base_branch().await.unwrap();
        let path = mgr.create_worker_worktree("worker-1", &base).await.unwrap();

        std::fs::write(path.join("new.txt"), "content").unwrap();
        run_git(&["add", "-A"], &path).await.unwrap();
        run_git(&["commit", "-m", "add file"], &path).await.unwrap();

        let files = mgr.changed_files("worker-1", &base).await.unwrap();
        assert_eq!(files, vec!["new.txt".to_string()]);
    }

    #[tokio::test]
    async fn cleanup_all_force_removes_branches_and_worktrees() {
        let dir = setup_git_repo();
        let mgr = WorktreeManager::new(dir.path(), "20260101-000000");
        let base = mgr.base_branch().await.unwrap();
        mgr.create_worker_worktree("worker-1", &base).await.unwrap();

        mgr.cleanup_all(true).await;

        let branches = run_git(&["branch", "--list", "swarm/*"], dir.path())
            .await
            .unwrap();
        assert!(branches.trim().is_empty());
        assert!(!dir.path().join(".swarm-worktrees").exists());
    }

    #[tokio::test]
    async fn unknown_worker_errors() {
        let dir = setup_git_repo();
        let mgr = WorktreeManager::new(dir.path(), "20260101-000000");
        let err = mgr.worktree_diff("nonexistent").await.unwrap_err();
        assert!(matches!(err, WorktreeError::UnknownWorker { .. }));
    }
}
