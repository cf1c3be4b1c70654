//! Orchestrator — the top-level pipeline. Plans a task, runs the resulting
//! worker subtasks concurrently in isolated worktrees under a bounded pool
//! with a cost circuit breaker, integrates the successful branches, and
//! finalizes run state. Resume replays the same execute→integrate→finalize
//! path over the subset of workers that never reached a terminal status.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use coordination::{
    AgentRunner, CoordinationBus, EventKind, OversightLevel, Plan, RunStatus, SessionRecorder,
    StateStore, SwarmConfig, SwarmError, SwarmResult, WorkerFieldUpdate, WorkerResult,
    WorkerState, WorkerStatus, WorktreeManager,
};
use tokio::sync::{Mutex, Semaphore};
use tracing::{error, info, warn};

use crate::dashboard;
use crate::integrator::{self, IntegrationOptions};
use crate::planner;
use crate::worker_runner::{self, CoordinationContext};

/// Delay, in seconds, applied to the Nth worker launch (`N * STAGGER_SECS`)
/// so the agent backend doesn't see `max_workers` requests land at once.
const STAGGER_SECS: f64 = 0.5;

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Generate a fresh run id: a sortable timestamp plus a short random suffix
/// so two runs started within the same second never collide.
fn generate_run_id() -> String {
    let ts = chrono::Utc::now().format("%Y%m%d-%H%M%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{ts}-{}", &suffix[..8])
}

/// A blocking yes/no prompt, invoked under checkpoint oversight. Wrapped in
/// `tokio::task::spawn_blocking` by [`Orchestrator::confirm`] so it never
/// stalls the async runtime.
pub type CheckpointPrompt = dyn Fn(&str) -> bool + Send + Sync;

/// Assembled run components plus the one configuration governing them.
pub struct Orchestrator {
    config: SwarmConfig,
    run_id: String,
    worktrees: Arc<WorktreeManager>,
    session: Arc<SessionRecorder>,
    state: Arc<StateStore>,
    coord: Arc<CoordinationBus>,
    agent: Arc<dyn AgentRunner>,
    checkpoint: Option<Arc<CheckpointPrompt>>,
}

impl Orchestrator {
    /// Build an orchestrator for a fresh run, generating a new `run_id`.
    pub fn new(config: SwarmConfig, agent: Arc<dyn AgentRunner>) -> Result<Self, SwarmError> {
        let run_id = generate_run_id();
        Self::with_run_id(config, agent, run_id)
    }

    /// Build an orchestrator bound to an existing `run_id`, for resume.
    pub fn with_run_id(
        config: SwarmConfig,
        agent: Arc<dyn AgentRunner>,
        run_id: String,
    ) -> Result<Self, SwarmError> {
        let state = Arc::new(StateStore::new(&config.repo_path));
        let worktrees = Arc::new(WorktreeManager::new(&config.repo_path, &run_id));
        let coord = Arc::new(CoordinationBus::new(&config.repo_path, &run_id));
        let session = Arc::new(SessionRecorder::new(&config.repo_path, &run_id)?);
        Ok(Self {
            config,
            run_id,
            worktrees,
            session,
            state,
            coord,
            agent,
            checkpoint: None,
        })
    }

    /// Override the checkpoint confirmation prompt (e.g. for tests, or a
    /// CLI front end that wants its own stdin handling). Defaults to
    /// [`dashboard::prompt_yes_no`] if never set.
    pub fn with_checkpoint_prompt(mut self, prompt: Arc<CheckpointPrompt>) -> Self {
        self.checkpoint = Some(prompt);
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    async fn confirm(&self, question: &str) -> bool {
        let prompt = self
            .checkpoint
            .clone()
            .unwrap_or_else(|| Arc::new(dashboard::prompt_yes_no));
        let question = question.to_string();
        tokio::task::spawn_blocking(move || prompt(&question))
            .await
            .unwrap_or(false)
    }

    /// Run the full pipeline for a fresh task, from Phase A through Phase E.
    pub async fn run(&self) -> Result<SwarmResult, SwarmError> {
        let base_branch = self.worktrees.base_branch().await?;
        let started_at = now();
        self.state.start_run(
            &self.run_id,
            &self.config.task,
            &base_branch,
            self.config.snapshot(),
            &started_at,
        )?;

        let plan = match self.plan_phase().await {
            Ok(plan) => plan,
            Err(e) => {
                self.state.fail_run(&self.run_id, &e.to_string(), &now())?;
                return Err(e);
            }
        };

        if self.config.dry_run {
            self.state
                .set_run_status(&self.run_id, RunStatus::Completed, &now())?;
            return Ok(SwarmResult {
                run_id: self.run_id.clone(),
                task: self.config.task.clone(),
                plan: Some(plan),
                worker_results: Vec::new(),
                integration_success: false,
                pr_url: None,
                total_cost_usd: 0.0,
                duration_ms: self.session.elapsed_ms(),
            });
        }

        if matches!(self.config.oversight, OversightLevel::Checkpoint) {
            self.state
                .set_run_status(&self.run_id, RunStatus::PausedCheckpoint, &now())?;
            if !self.confirm("Execute the planned tasks?").await {
                self.state
                    .set_run_status(&self.run_id, RunStatus::Interrupted, &now())?;
                return Err(SwarmError::Cancelled);
            }
        }
        self.state
            .set_run_status(&self.run_id, RunStatus::Executing, &now())?;

        let results = match self.execute_phase(&plan, &base_branch).await {
            Ok(results) => results,
            Err(e) => {
                self.state.fail_run(&self.run_id, &e.to_string(), &now())?;
                self.cleanup_worktrees(false).await;
                return Err(e);
            }
        };

        self.integrate_and_finalize(&plan, &base_branch, results)
            .await
    }

    /// Replay Phases C through E for the subset of `run_id`'s workers that
    /// never reached a terminal status, merging their results with the
    /// workers that already succeeded before the interruption.
    pub async fn run_resumed(&self) -> Result<SwarmResult, SwarmError> {
        let run = self
            .state
            .get_run(&self.run_id)
            .ok_or(SwarmError::NoRunToResume)?;
        let plan = run
            .plan
            .clone()
            .ok_or_else(|| SwarmError::NoResumablePlan {
                run_id: self.run_id.clone(),
            })?;

        let resumable: HashSet<String> = self
            .state
            .get_resumable_workers(&self.run_id)
            .into_iter()
            .map(|w| w.worker_id)
            .collect();
        let reduced_plan = Plan {
            tasks: plan
                .tasks
                .iter()
                .filter(|t| resumable.contains(&t.worker_id))
                .cloned()
                .collect(),
            ..plan.clone()
        };

        let previously_successful: Vec<WorkerResult> = run
            .workers
            .values()
            .filter(|w| matches!(w.status, WorkerStatus::Completed))
            .map(WorkerState::as_worker_result)
            .collect();

        info!(
            run_id = %self.run_id,
            resuming = reduced_plan.tasks.len(),
            already_done = previously_successful.len(),
            "resuming run"
        );

        self.state
            .set_run_status(&self.run_id, RunStatus::Executing, &now())?;

        let fresh_results = match self.execute_phase(&reduced_plan, &run.base_branch).await {
            Ok(results) => results,
            Err(e) => {
                self.state.fail_run(&self.run_id, &e.to_string(), &now())?;
                self.cleanup_worktrees(false).await;
                return Err(e);
            }
        };

        let mut all_results = previously_successful;
        all_results.extend(fresh_results);

        self.integrate_and_finalize(&plan, &run.base_branch, all_results)
            .await
    }

    async fn plan_phase(&self) -> Result<Plan, SwarmError> {
        self.session.record(
            EventKind::PlanStart,
            &now(),
            serde_json::json!({ "task": self.config.task }),
        )?;
        let plan = planner::plan_task(self.agent.clone(), &self.config).await?;
        self.state
            .set_run_plan(&self.run_id, plan.clone(), &now())?;
        self.session.record(
            EventKind::PlanComplete,
            &now(),
            serde_json::json!({ "tasks": plan.tasks.len() }),
        )?;
        Ok(plan)
    }

    /// Phase C. Creates coordination directories and per-worker worktrees
    /// serially in plan order, then runs the worker pool: bounded by a
    /// semaphore of size `max_workers`, each launch staggered, with a
    /// shared running-cost tally checked and updated inside the semaphore's
    /// critical section so a worker about to start always sees the latest
    /// total.
    async fn execute_phase(
        &self,
        plan: &Plan,
        base_branch: &str,
    ) -> Result<Vec<WorkerResult>, SwarmError> {
        let worker_ids: Vec<String> = plan.tasks.iter().map(|t| t.worker_id.clone()).collect();
        self.coord.setup(&worker_ids)?;
        self.worktrees.disable_gc().await?;

        for task in &plan.tasks {
            let branch = self.worktrees.branch_name(&task.worker_id);
            self.worktrees
                .create_worker_worktree(&task.worker_id, base_branch)
                .await?;
            self.state.register_worker(
                &self.run_id,
                WorkerState::new_pending(&task.worker_id, &task.title, &branch),
                &now(),
            )?;
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        let cost_state = Arc::new(Mutex::new((0.0f64, false)));
        let mut handles = Vec::with_capacity(plan.tasks.len());

        for (index, task) in plan.tasks.iter().cloned().enumerate() {
            let semaphore = semaphore.clone();
            let cost_state = cost_state.clone();
            let agent = self.agent.clone();
            let worktrees = self.worktrees.clone();
            let state = self.state.clone();
            let session = self.session.clone();
            let coord = self.coord.clone();
            let run_id = self.run_id.clone();
            let base_branch = base_branch.to_string();
            let base_model = self.config.worker_model.clone();
            let escalation_model = self.config.escalation_model.clone();
            let escalation_enabled = self.config.escalation_enabled;
            let max_worker_budget = self.config.max_worker_cost_usd;
            let max_attempts = self.config.max_attempts;
            let max_cost = self.config.max_cost_usd;

            let handle = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs_f64(STAGGER_SECS * index as f64)).await;
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("worker semaphore is never closed while tasks are in flight");

                {
                    let guard = cost_state.lock().await;
                    if guard.1 {
                        warn!(worker_id = %task.worker_id, "skipping worker: cost limit exceeded");
                        return WorkerResult {
                            worker_id: task.worker_id.clone(),
                            success: false,
                            cost_usd: None,
                            duration_ms: None,
                            summary: None,
                            files_changed: Default::default(),
                            error: Some("Skipped: cost limit exceeded".to_string()),
                            attempt: 0,
                            model_used: None,
                        };
                    }
                }

                let worktree_path = worktrees.worktree_path(&task.worker_id);
                let _ = state.update_worker(
                    &run_id,
                    &task.worker_id,
                    WorkerFieldUpdate {
                        status: Some(WorkerStatus::Running),
                        started_at: Some(now()),
                        ..Default::default()
                    },
                    &now(),
                );
                let _ = session.record(
                    EventKind::WorkerStart,
                    &now(),
                    serde_json::json!({ "worker_id": task.worker_id, "attempt": 1 }),
                );

                let coordination_dir = coord.base_dir().to_path_buf();
                let result = worker_runner::spawn_worker_with_retry(
                    agent,
                    &task,
                    &worktree_path,
                    CoordinationContext::FullBus(&coordination_dir),
                    &base_model,
                    &escalation_model,
                    escalation_enabled,
                    max_worker_budget,
                    max_attempts,
                )
                .await;

                let files_changed: HashSet<String> = worktrees
                    .changed_files(&task.worker_id, &base_branch)
                    .await
                    .unwrap_or_default()
                    .into_iter()
                    .collect();

                if let Some(cost) = result.cost_usd {
                    let mut guard = cost_state.lock().await;
                    guard.0 += cost;
                    if guard.0 >= max_cost {
                        guard.1 = true;
                    }
                }

                let _ = state.update_worker(
                    &run_id,
                    &task.worker_id,
                    WorkerFieldUpdate {
                        status: Some(if result.success {
                            WorkerStatus::Completed
                        } else {
                            WorkerStatus::Failed
                        }),
                        cost_usd: result.cost_usd,
                        duration_ms: result.duration_ms,
                        summary: result.summary.clone(),
                        files_changed: Some(files_changed.clone()),
                        error: result.error.clone(),
                        attempt: Some(result.attempt),
                        model_used: result.model_used.clone(),
                        completed_at: Some(now()),
                        ..Default::default()
                    },
                    &now(),
                );

                let event_kind = if result.success {
                    EventKind::WorkerComplete
                } else {
                    EventKind::WorkerError
                };
                let _ = session.record_worker_complete(
                    &task.worker_id,
                    &now(),
                    result.cost_usd.unwrap_or(0.0),
                    result.success,
                    serde_json::json!({
                        "event": event_kind,
                        "attempt": result.attempt,
                        "files_changed": files_changed.len(),
                    }),
                );

                WorkerResult {
                    files_changed,
                    ..result
                }
            });
            handles.push(handle);
        }

        let mut results = Vec::with_capacity(handles.len());
        for (handle, task) in handles.into_iter().zip(plan.tasks.iter()) {
            match handle.await {
                Ok(result) => results.push(result),
                Err(join_err) => {
                    error!(worker_id = %task.worker_id, error = %join_err, "worker task panicked");
                    results.push(WorkerResult {
                        worker_id: task.worker_id.clone(),
                        success: false,
                        cost_usd: None,
                        duration_ms: None,
                        summary: None,
                        files_changed: Default::default(),
                        error: Some(format!("worker task panicked: {join_err}")),
                        attempt: 0,
                        model_used: None,
                    });
                }
            }
        }

        Ok(results)
    }

    /// Checkpoint 2, Phase D, Checkpoint 3, and Phase E, in sequence.
    async fn integrate_and_finalize(
        &self,
        plan: &Plan,
        base_branch: &str,
        results: Vec<WorkerResult>,
    ) -> Result<SwarmResult, SwarmError> {
        let checkpointed = matches!(self.config.oversight, OversightLevel::Checkpoint);

        if checkpointed {
            self.state
                .set_run_status(&self.run_id, RunStatus::PausedCheckpoint, &now())?;
            if !self.confirm("Integrate the worker results?").await {
                // Branches survive; the operator can inspect or integrate by hand later.
                return Ok(self.result_snapshot(plan, &results, false, None));
            }
        }

        self.state
            .set_run_status(&self.run_id, RunStatus::Integrating, &now())?;
        self.session.record(
            EventKind::IntegrationStart,
            &now(),
            serde_json::json!({ "workers": results.len() }),
        )?;

        let should_create_pr = !checkpointed && self.config.create_pr;
        let mut options = IntegrationOptions::from_config(&self.config, should_create_pr);
        options.build_command = plan.build_command.clone();
        options.test_command = plan.test_command.clone();

        let outcome = integrator::integrate_results(
            &self.worktrees,
            self.agent.clone(),
            &self.coord,
            &results,
            base_branch,
            &self.config.task,
            &options,
        )
        .await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                self.state.fail_run(&self.run_id, &e.to_string(), &now())?;
                self.finalize_cleanup().await;
                return Err(e.into());
            }
        };

        self.session.record(
            EventKind::MergeResult,
            &now(),
            serde_json::json!({ "success": outcome.success }),
        )?;

        if !outcome.success {
            let error = outcome
                .error
                .clone()
                .unwrap_or_else(|| "integration failed".to_string());
            self.state.fail_run(&self.run_id, &error, &now())?;
            self.finalize_cleanup().await;
            return Ok(self.result_snapshot(plan, &results, false, None));
        }

        let mut pr_url = outcome.pr_url.clone();

        if matches!(self.config.oversight, OversightLevel::Autonomous) {
            if let Some(url) = &pr_url {
                let merged = integrator::auto_merge_pr(url, &self.config.repo_path).await;
                if !merged {
                    warn!(pr_url = %url, "auto-merge failed; PR left open for manual merge");
                }
            }
        }

        if checkpointed
            && self
                .confirm("Create a pull request for the integrated branch?")
                .await
        {
            let integration_path = self.worktrees.worktree_path("integration");
            match integrator::create_pr_for_integration(
                &self.worktrees,
                &integration_path,
                base_branch,
                &self.config.task,
                &results,
                self.config.issue_number,
            )
            .await
            {
                Ok(url) => {
                    self.session.record(
                        EventKind::PrCreated,
                        &now(),
                        serde_json::json!({ "url": url }),
                    )?;
                    pr_url = Some(url);
                }
                Err(e) => {
                    error!(error = %e, "PR creation failed after checkpoint approval");
                }
            }
        } else if let Some(url) = &pr_url {
            self.session.record(
                EventKind::PrCreated,
                &now(),
                serde_json::json!({ "url": url }),
            )?;
        }

        self.state
            .complete_run(&self.run_id, pr_url.clone(), &now())?;
        self.finalize_cleanup().await;

        Ok(self.result_snapshot(plan, &results, true, pr_url))
    }

    fn result_snapshot(
        &self,
        plan: &Plan,
        results: &[WorkerResult],
        integration_success: bool,
        pr_url: Option<String>,
    ) -> SwarmResult {
        let total_cost_usd = self
            .state
            .get_run(&self.run_id)
            .map(|r| r.total_cost_usd)
            .unwrap_or_else(|| results.iter().filter_map(|r| r.cost_usd).sum());
        SwarmResult {
            run_id: self.run_id.clone(),
            task: self.config.task.clone(),
            plan: Some(plan.clone()),
            worker_results: results.to_vec(),
            integration_success,
            pr_url,
            total_cost_usd,
            duration_ms: self.session.elapsed_ms(),
        }
    }

    async fn finalize_cleanup(&self) {
        if let Err(e) = self.session.write_metadata(&now(), serde_json::json!({})) {
            warn!(error = %e, "failed to write event log metadata");
        }
        self.cleanup_worktrees(false).await;
        self.coord.cleanup();
    }

    async fn cleanup_worktrees(&self, force: bool) {
        self.worktrees.cleanup_all(force).await;
    }

    /// Emergency cleanup on cancellation or operator interrupt: mark the run
    /// interrupted, force-remove worktrees and branches, and drop the
    /// coordination directory. Errors are logged and swallowed — cleanup
    /// must never mask or block on the condition that triggered it.
    pub async fn cleanup(&self) {
        if let Err(e) = self
            .state
            .set_run_status(&self.run_id, RunStatus::Interrupted, &now())
        {
            warn!(error = %e, "failed to mark run interrupted during emergency cleanup");
        }
        self.cleanup_worktrees(true).await;
        self.coord.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordination::{MockAgentRunner, OversightLevel};
    use std::process::Command as StdCommand;

    fn setup_git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let run = |args: &[&str]| {
            StdCommand::new("git")
                .args(args)
                .current_dir(dir.path())
                .output()
                .unwrap();
        };
        run(&["init", "-b", "main"]);
        run(&["config", "user.email", "t@t.com"]);
        run(&["config", "user.name", "T"]);
        std::fs::write(dir.path().join("README.md"), "hi").unwrap();
        run(&["add", "."]);
        run(&["commit", "-m", "init"]);
        dir
    }

    fn config(repo: &std::path::Path, task: &str) -> SwarmConfig {
        SwarmConfig {
            task: task.to_string(),
            repo_path: repo.to_path_buf(),
            base_branch: None,
            max_workers: 2,
            planner_model: "opus".into(),
            worker_model: "sonnet".into(),
            escalation_model: "opus".into(),
            max_cost_usd: 50.0,
            max_worker_cost_usd: 5.0,
            max_attempts: 1,
            escalation_enabled: true,
            conflict_resolution_enabled: true,
            review_after_merge: false,
            oversight: OversightLevel::PrGated,
            create_pr: false,
            dry_run: false,
            issue_number: None,
        }
    }

    fn plan_response() -> serde_json::Value {
        serde_json::json!({
            "original_task": "add retries",
            "reasoning": "single small change",
            "tasks": [
                {
                    "worker_id": "worker-1",
                    "title": "add a file",
                    "description": "create a new file",
                    "target_files": ["new.txt"],
                    "acceptance_criteria": []
                }
            ],
            "test_command": null,
            "build_command": null
        })
    }

    #[tokio::test]
    async fn dry_run_returns_plan_without_executing() {
        let dir = setup_git_repo();
        let mut cfg = config(dir.path(), "add retries");
        cfg.dry_run = true;

        let mock = Arc::new(MockAgentRunner::new());
        mock.push_structured_success(plan_response(), 0.1);

        let orchestrator = Orchestrator::new(cfg, mock).unwrap();
        let result = orchestrator.run().await.unwrap();

        assert!(result.plan.is_some());
        assert!(result.worker_results.is_empty());
        assert!(!result.integration_success);
    }

    #[tokio::test]
    async fn successful_run_merges_worker_branch() {
        let dir = setup_git_repo();
        let cfg = config(dir.path(), "add retries");

        let mock = Arc::new(MockAgentRunner::new());
        mock.push_structured_success(plan_response(), 0.1);
        mock.route_success("## Task: add a file", "created the file", 0.5);

        let orchestrator = Orchestrator::new(cfg, mock).unwrap();
        let result = orchestrator.run().await.unwrap();

        assert!(result.integration_success);
        assert_eq!(result.worker_results.len(), 1);
        assert!(result.worker_results[0].success);
    }

    #[tokio::test]
    async fn checkpoint_oversight_declined_at_execute_stops_before_integration() {
        let dir = setup_git_repo();
        let mut cfg = config(dir.path(), "add retries");
        cfg.oversight = OversightLevel::Checkpoint;

        let mock = Arc::new(MockAgentRunner::new());
        mock.push_structured_success(plan_response(), 0.1);

        let orchestrator = Orchestrator::new(cfg, mock)
            .unwrap()
            .with_checkpoint_prompt(Arc::new(|_: &str| false));
        let err = orchestrator.run().await.unwrap_err();
        assert!(matches!(err, SwarmError::Cancelled));
    }

    #[tokio::test]
    async fn cost_circuit_breaker_skips_workers_once_exceeded() {
        let dir = setup_git_repo();
        let mut cfg = config(dir.path(), "three independent changes");
        cfg.max_cost_usd = 1.0;
        cfg.max_workers = 1;

        let mock = Arc::new(MockAgentRunner::new());
        mock.push_structured_success(
            serde_json::json!({
                "original_task": "three independent changes",
                "reasoning": "split by file",
                "tasks": [
                    {"worker_id": "worker-1", "title": "a", "description": "d", "target_files": [], "acceptance_criteria": []},
                    {"worker_id": "worker-2", "title": "b", "description": "d", "target_files": [], "acceptance_criteria": []},
                ],
                "test_command": null,
                "build_command": null
            }),
            0.0,
        );
        mock.push_success("done", 2.0);
        mock.push_success("also done", 2.0);

        let orchestrator = Orchestrator::new(cfg, mock).unwrap();
        let result = orchestrator.run().await.unwrap();

        let skipped = result
            .worker_results
            .iter()
            .filter(|r| r.error.as_deref() == Some("Skipped: cost limit exceeded"))
            .count();
        assert!(
            skipped >= 1,
            "expected at least one worker skipped by the circuit breaker"
        );
    }
}
