//! State Store — single-document persistence for run/worker state.
//!
//! The whole store lives at `<repo>/.claude-swarm/state.json`. Every mutation
//! reads the document, applies the change, and writes it back atomically: a
//! temp file is written into the same directory and renamed over the target,
//! so a crash mid-write never corrupts the document, and it cannot land
//! partially across a filesystem boundary.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

use crate::error::StoreError;
use crate::models::{RunState, RunStatus, SwarmState, WorkerState, WorkerStatus};

/// Per-field update for an existing worker; `None` leaves the field as-is.
#[derive(Debug, Default, Clone)]
pub struct WorkerFieldUpdate {
    pub status: Option<WorkerStatus>,
    pub worktree_path: Option<PathBuf>,
    pub cost_usd: Option<f64>,
    pub duration_ms: Option<u64>,
    pub summary: Option<String>,
    pub files_changed: Option<std::collections::HashSet<String>>,
    pub error: Option<String>,
    pub attempt: Option<u32>,
    pub model_used: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

pub struct StateStore {
    state_dir: PathBuf,
    state_path: PathBuf,
    /// Guards read-modify-write cycles against a single process's own
    /// concurrent callers; cross-process safety comes from the atomic rename.
    lock: Mutex<()>,
}

impl StateStore {
    pub fn new(repo_path: impl AsRef<Path>) -> Self {
        let state_dir = repo_path.as_ref().join(".claude-swarm");
        let state_path = state_dir.join("state.json");
        Self {
            state_dir,
            state_path,
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> SwarmState {
        match std::fs::read_to_string(&self.state_path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(state) => state,
                Err(e) => {
                    warn!(path = %self.state_path.display(), error = %e, "state document corrupt, starting fresh");
                    SwarmState::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SwarmState::default(),
            Err(e) => {
                warn!(path = %self.state_path.display(), error = %e, "failed to read state document, starting fresh");
                SwarmState::default()
            }
        }
    }

    fn save(&self, state: &SwarmState) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.state_dir).map_err(|source| StoreError::Io {
            path: self.state_dir.clone(),
            source,
        })?;
        let json = serde_json::to_string_pretty(state).map_err(|source| StoreError::Json {
            path: self.state_path.clone(),
            source,
        })?;
        let mut temp = tempfile::Builder::new()
            .prefix("state-")
            .suffix(".tmp")
            .tempfile_in(&self.state_dir)
            .map_err(|source| StoreError::Io {
                path: self.state_dir.clone(),
                source,
            })?;
        use std::io::Write;
        temp.write_all(json.as_bytes())
            .and_then(|_| temp.flush())
            .map_err(|source| StoreError::Io {
                path: self.state_path.clone(),
                source,
            })?;
        temp.persist(&self.state_path)
            .map_err(|e| StoreError::Io {
                path: self.state_path.clone(),
                source: e.error,
            })?;
        Ok(())
    }

    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut SwarmState) -> T,
    ) -> Result<T, StoreError> {
        let _guard = self.lock.lock().expect("state store lock poisoned");
        let mut state = self.load();
        let result = f(&mut state);
        self.save(&state)?;
        Ok(result)
    }

    /// Start a new run, demoting any prior non-terminal active run to
    /// `interrupted` first so at most one run is ever active at a time.
    pub fn start_run(
        &self,
        run_id: &str,
        task: &str,
        base_branch: &str,
        config_snapshot: serde_json::Map<String, serde_json::Value>,
        started_at: &str,
    ) -> Result<(), StoreError> {
        self.with_state(|state| {
            if let Some(prior_id) = state.active_run.clone() {
                if let Some(prior) = state.runs.get_mut(&prior_id) {
                    if !matches!(prior.status, RunStatus::Completed | RunStatus::Failed) {
                        prior.status = RunStatus::Interrupted;
                        prior.updated_at = started_at.to_string();
                    }
                }
            }
            state.active_run = Some(run_id.to_string());
            state.runs.insert(
                run_id.to_string(),
                RunState {
                    run_id: run_id.to_string(),
                    task: task.to_string(),
                    status: RunStatus::Planning,
                    base_branch: base_branch.to_string(),
                    plan: None,
                    workers: Default::default(),
                    integration_branch: None,
                    pr_url: None,
                    total_cost_usd: 0.0,
                    error: None,
                    started_at: started_at.to_string(),
                    updated_at: started_at.to_string(),
                    config_snapshot,
                },
            );
        })
    }

    pub fn set_run_status(
        &self,
        run_id: &str,
        status: RunStatus,
        updated_at: &str,
    ) -> Result<(), StoreError> {
        self.with_state(|state| {
            if let Some(run) = state.runs.get_mut(run_id) {
                run.status = status;
                run.updated_at = updated_at.to_string();
            }
        })
    }

    pub fn set_run_plan(
        &self,
        run_id: &str,
        plan: crate::models::Plan,
        updated_at: &str,
    ) -> Result<(), StoreError> {
        self.with_state(|state| {
            if let Some(run) = state.runs.get_mut(run_id) {
                run.plan = Some(plan);
                run.updated_at = updated_at.to_string();
            }
        })
    }

    pub fn complete_run(
        &self,
        run_id: &str,
        pr_url: Option<String>,
        updated_at: &str,
    ) -> Result<(), StoreError> {
        self.with_state(|state| {
            if let Some(run) = state.runs.get_mut(run_id) {
                run.status = RunStatus::Completed;
                run.pr_url = pr_url;
                run.updated_at = updated_at.to_string();
            }
            if state.active_run.as_deref() == Some(run_id) {
                state.active_run = None;
            }
        })
    }

    pub fn fail_run(
        &self,
        run_id: &str,
        error: &str,
        updated_at: &str,
    ) -> Result<(), StoreError> {
        self.with_state(|state| {
            if let Some(run) = state.runs.get_mut(run_id) {
                run.status = RunStatus::Failed;
                run.error = Some(error.to_string());
                run.updated_at = updated_at.to_string();
            }
            if state.active_run.as_deref() == Some(run_id) {
                state.active_run = None;
            }
        })
    }

    pub fn register_worker(
        &self,
        run_id: &str,
        worker: WorkerState,
        updated_at: &str,
    ) -> Result<(), StoreError> {
        self.with_state(|state| {
            if let Some(run) = state.runs.get_mut(run_id) {
                run.workers.insert(worker.worker_id.clone(), worker);
                run.updated_at = updated_at.to_string();
            }
        })
    }

    pub fn update_worker(
        &self,
        run_id: &str,
        worker_id: &str,
        update: WorkerFieldUpdate,
        updated_at: &str,
    ) -> Result<(), StoreError> {
        self.with_state(|state| {
            if let Some(run) = state.runs.get_mut(run_id) {
                if let Some(worker) = run.workers.get_mut(worker_id) {
                    if let Some(v) = update.status {
                        worker.status = v;
                    }
                    if update.worktree_path.is_some() {
                        worker.worktree_path = update.worktree_path;
                    }
                    if let Some(v) = update.cost_usd {
                        worker.cost_usd = Some(v);
                        run.total_cost_usd += v;
                    }
                    if let Some(v) = update.duration_ms {
                        worker.duration_ms = Some(v);
                    }
                    if update.summary.is_some() {
                        worker.summary = update.summary;
                    }
                    if let Some(v) = update.files_changed {
                        worker.files_changed = v;
                    }
                    if update.error.is_some() {
                        worker.error = update.error;
                    }
                    if let Some(v) = update.attempt {
                        worker.attempt = v;
                    }
                    if update.model_used.is_some() {
                        worker.model_used = update.model_used;
                    }
                    if update.started_at.is_some() {
                        worker.started_at = update.started_at;
                    }
                    if update.completed_at.is_some() {
                        worker.completed_at = update.completed_at;
                    }
                }
                run.updated_at = updated_at.to_string();
            }
        })
    }

    pub fn get_run(&self, run_id: &str) -> Option<RunState> {
        self.load().runs.get(run_id).cloned()
    }

    pub fn get_active_run(&self) -> Option<RunState> {
        let state = self.load();
        state.active_run.and_then(|id| state.runs.get(&id).cloned())
    }

    pub fn has_active_run(&self) -> bool {
        self.load().active_run.is_some()
    }

    /// Workers from `run_id` that did not reach a terminal status, for resume.
    pub fn get_resumable_workers(&self, run_id: &str) -> Vec<WorkerState> {
        self.load()
            .runs
            .get(run_id)
            .map(|run| {
                run.workers
                    .values()
                    .filter(|w| matches!(w.status, WorkerStatus::Pending | WorkerStatus::Failed))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Most recently updated run left in [`RunStatus::Interrupted`].
    pub fn get_last_interrupted_run(&self) -> Option<RunState> {
        self.load()
            .runs
            .into_values()
            .filter(|r| matches!(r.status, RunStatus::Interrupted))
            .max_by(|a, b| a.updated_at.cmp(&b.updated_at))
    }

    pub fn clear_run(&self, run_id: &str) -> Result<(), StoreError> {
        self.with_state(|state| {
            state.runs.remove(run_id);
            if state.active_run.as_deref() == Some(run_id) {
                state.active_run = None;
            }
        })
    }

    pub fn clear_all(&self) -> Result<(), StoreError> {
        self.with_state(|state| {
            *state = SwarmState::default();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkerState;

    #[test]
    fn start_run_sets_active_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store
            .start_run("run-1", "do a thing", "main", Default::default(), "t0")
            .unwrap();

        assert!(store.has_active_run());
        let run = store.get_run("run-1").unwrap();
        assert_eq!(run.status, RunStatus::Planning);
        assert!(dir.path().join(".claude-swarm/state.json").exists());
    }

    #[test]
    fn missing_state_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        assert!(!store.has_active_run());
        assert!(store.get_active_run().is_none());
    }

    #[test]
    fn corrupt_state_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".claude-swarm")).unwrap();
        std::fs::write(dir.path().join(".claude-swarm/state.json"), "{ not json").unwrap();
        let store = StateStore::new(dir.path());
        assert!(!store.has_active_run());
    }

    #[test]
    fn update_worker_accumulates_run_cost() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store
            .start_run("run-1", "task", "main", Default::default(), "t0")
            .unwrap();
        store
            .register_worker(
                "run-1",
                WorkerState::new_pending("worker-1", "title", "swarm/run-1/worker-1"),
                "t0",
            )
            .unwrap();
        store
            .update_worker(
                "run-1",
                "worker-1",
                WorkerFieldUpdate {
                    cost_usd: Some(2.5),
                    status: Some(WorkerStatus::Completed),
                    ..Default::default()
                },
                "t1",
            )
            .unwrap();

        let run = store.get_run("run-1").unwrap();
        assert_eq!(run.total_cost_usd, 2.5);
        assert_eq!(run.workers["worker-1"].status, WorkerStatus::Completed);
    }

    #[test]
    fn resumable_workers_excludes_completed() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store
            .start_run("run-1", "task", "main", Default::default(), "t0")
            .unwrap();
        let mut done = WorkerState::new_pending("worker-1", "t", "b1");
        done.status = WorkerStatus::Completed;
        let pending = WorkerState::new_pending("worker-2", "t", "b2");
        store.register_worker("run-1", done, "t0").unwrap();
        store.register_worker("run-1", pending, "t0").unwrap();

        let resumable = store.get_resumable_workers("run-1");
        assert_eq!(resumable.len(), 1);
        assert_eq!(resumable[0].worker_id, "worker-2");
    }

    #[test]
    fn starting_a_new_run_interrupts_the_prior_active_one() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store
            .start_run("run-1", "first task", "main", Default::default(), "t0")
            .unwrap();

        store
            .start_run("run-2", "second task", "main", Default::default(), "t1")
            .unwrap();

        let run1 = store.get_run("run-1").unwrap();
        assert_eq!(run1.status, RunStatus::Interrupted);
        let active = store.get_active_run().unwrap();
        assert_eq!(active.run_id, "run-2");
    }

    #[test]
    fn starting_a_new_run_does_not_reopen_a_completed_prior_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store
            .start_run("run-1", "first task", "main", Default::default(), "t0")
            .unwrap();
        store.complete_run("run-1", None, "t0.5").unwrap();

        store
            .start_run("run-2", "second task", "main", Default::default(), "t1")
            .unwrap();

        let run1 = store.get_run("run-1").unwrap();
        assert_eq!(run1.status, RunStatus::Completed);
    }

    #[test]
    fn complete_run_clears_active() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store
            .start_run("run-1", "task", "main", Default::default(), "t0")
            .unwrap();
        store
            .complete_run("run-1", Some("https://example.com/pr/1".into()), "t1")
            .unwrap();

        assert!(!store.has_active_run());
        let run = store.get_run("run-1").unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.pr_url.as_deref(), Some("https://example.com/pr/1"));
    }
}
