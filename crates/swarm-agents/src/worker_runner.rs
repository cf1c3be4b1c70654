//! Worker Runner — executes one worker's subtask in its worktree, with a
//! bounded retry-and-escalate policy.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use coordination::{AgentRequest, AgentRunner, WorkerError, WorkerResult, WorkerTask};

use crate::prompts::{
    coordination_channels_section, coupling_section, legacy_notes_section, retry_context_section,
    worker_system_prompt, worker_task_prompt,
};

const WORKER_TOOLS: &[&str] = &["Read", "Write", "Edit", "Bash", "Glob", "Grep"];
const WORKER_MAX_TURNS: u32 = 50;
const WORKER_TIMEOUT_SECS: u64 = 1800;

/// Where, if anywhere, this worker should look for peer coordination data.
pub enum CoordinationContext<'a> {
    /// The full three-channel bus exists at this directory.
    FullBus(&'a Path),
    /// Only a legacy single-channel notes directory exists.
    NotesOnly(&'a Path),
    None,
}

/// Builds a worker's system prompt section by section, mirroring the way the
/// underlying agent CLI expects one assembled string rather than a list of
/// messages.
pub struct WorkerPromptBuilder {
    sections: Vec<String>,
}

impl WorkerPromptBuilder {
    pub fn new(task: &WorkerTask) -> Self {
        Self {
            sections: vec![worker_system_prompt(task)],
        }
    }

    pub fn with_coordination(mut self, context: CoordinationContext<'_>) -> Self {
        match context {
            CoordinationContext::FullBus(dir) => {
                self.sections
                    .push(coordination_channels_section(&dir.display().to_string()));
            }
            CoordinationContext::NotesOnly(dir) => {
                self.sections
                    .push(legacy_notes_section(&dir.display().to_string()));
            }
            CoordinationContext::None => {}
        }
        self
    }

    pub fn with_coupling(mut self, task: &WorkerTask) -> Self {
        if !task.coupled_with.is_empty() {
            let mut peers: Vec<String> = task.coupled_with.iter().cloned().collect();
            peers.sort();
            self.sections
                .push(coupling_section(&peers, &task.shared_interfaces));
        }
        self
    }

    pub fn with_retry_context(mut self, error_context: Option<&str>) -> Self {
        if let Some(error) = error_context {
            self.sections.push(retry_context_section(error));
        }
        self
    }

    pub fn build(self) -> String {
        self.sections.join("\n\n")
    }
}

/// Run one attempt. Never returns a successful [`WorkerResult`] with
/// `success = false` wrapped in `Err` — mapping terminal outcomes to
/// `WorkerResult` is this function's whole job; it only raises on a thrown
/// agent-invocation failure (timeout, spawn failure, malformed envelope).
pub async fn spawn_worker(
    agent: Arc<dyn AgentRunner>,
    task: &WorkerTask,
    worktree_path: &Path,
    system_prompt: String,
    model: &str,
    max_budget_usd: f64,
    attempt: u32,
) -> Result<WorkerResult, WorkerError> {
    let request = AgentRequest {
        system_prompt,
        prompt: worker_task_prompt(task),
        working_dir: worktree_path.to_path_buf(),
        model: model.to_string(),
        timeout_secs: WORKER_TIMEOUT_SECS,
        allowed_tools: WORKER_TOOLS.iter().map(|s| s.to_string()).collect(),
        permission_mode: "acceptEdits".to_string(),
        budget_usd: max_budget_usd,
        max_turns: WORKER_MAX_TURNS,
        output_schema: None,
    };

    let start = Instant::now();
    let outcome = agent
        .run(request)
        .await
        .map_err(|e| WorkerError::AgentFailed {
            worker_id: task.worker_id.clone(),
            message: e.to_string(),
        })?;
    let duration_ms = start.elapsed().as_millis() as u64;

    if outcome.success {
        Ok(WorkerResult {
            worker_id: task.worker_id.clone(),
            success: true,
            cost_usd: Some(outcome.cost_usd),
            duration_ms: Some(duration_ms),
            summary: Some(outcome.raw_text),
            files_changed: Default::default(),
            error: None,
            attempt,
            model_used: Some(model.to_string()),
        })
    } else {
        let error = if outcome.raw_text.is_empty() {
            "Worker reported error".to_string()
        } else {
            outcome.raw_text
        };
        Ok(WorkerResult {
            worker_id: task.worker_id.clone(),
            success: false,
            cost_usd: Some(outcome.cost_usd),
            duration_ms: Some(duration_ms),
            summary: None,
            files_changed: Default::default(),
            error: Some(error),
            attempt,
            model_used: Some(model.to_string()),
        })
    }
}

/// Run up to `max_attempts`, escalating to `escalation_model` on the second
/// and later attempts if escalation is enabled. Never raises: a
/// policy-exhausted worker is reported as a failed [`WorkerResult`], not an
/// error, so the orchestrator's worker pool never needs to catch this
/// function specifically.
#[allow(clippy::too_many_arguments)]
pub async fn spawn_worker_with_retry(
    agent: Arc<dyn AgentRunner>,
    task: &WorkerTask,
    worktree_path: &Path,
    coordination: CoordinationContext<'_>,
    base_model: &str,
    escalation_model: &str,
    escalation_enabled: bool,
    max_budget_usd: f64,
    max_attempts: u32,
) -> WorkerResult {
    let mut last_result: Option<WorkerResult> = None;
    let mut last_error: Option<String> = None;

    for attempt in 1..=max_attempts.max(1) {
        let model = if attempt > 1 && escalation_enabled {
            escalation_model
        } else {
            base_model
        };

        let mut builder = WorkerPromptBuilder::new(task)
            .with_coordination(match &coordination {
                CoordinationContext::FullBus(p) => CoordinationContext::FullBus(p),
                CoordinationContext::NotesOnly(p) => CoordinationContext::NotesOnly(p),
                CoordinationContext::None => CoordinationContext::None,
            })
            .with_coupling(task);
        builder = builder.with_retry_context(last_error.as_deref());
        let system_prompt = builder.build();

        let result = spawn_worker(
            agent.clone(),
            task,
            worktree_path,
            system_prompt,
            model,
            max_budget_usd,
            attempt,
        )
        .await;

        match result {
            Ok(result) if result.success => return result,
            Ok(result) => {
                last_error = result.error.clone();
                last_result = Some(result);
            }
            Err(e) => {
                last_error = Some(e.to_string());
                last_result = Some(WorkerResult {
                    worker_id: task.worker_id.clone(),
                    success: false,
                    cost_usd: None,
                    duration_ms: None,
                    summary: None,
                    files_changed: Default::default(),
                    error: Some(e.to_string()),
                    attempt,
                    model_used: Some(model.to_string()),
                });
            }
        }
    }

    last_result.expect("loop runs at least once since max_attempts is clamped to >= 1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordination::MockAgentRunner;
    use std::collections::HashSet;

    fn task() -> WorkerTask {
        WorkerTask {
            worker_id: "worker-1".into(),
            title: "Add retries".into(),
            description: "Add retry logic to the client".into(),
            target_files: vec!["src/client.rs".into()],
            acceptance_criteria: vec!["tests pass".into()],
            coordination_notes: String::new(),
            coupled_with: HashSet::new(),
            shared_interfaces: vec![],
        }
    }

    #[tokio::test]
    async fn successful_attempt_reports_success() {
        let mock = Arc::new(MockAgentRunner::new());
        mock.push_success("done", 1.25);
        let result = spawn_worker_with_retry(
            mock,
            &task(),
            Path::new("/tmp"),
            CoordinationContext::None,
            "sonnet",
            "opus",
            true,
            5.0,
            1,
        )
        .await;
        assert!(result.success);
        assert_eq!(result.attempt, 1);
        assert_eq!(result.model_used.as_deref(), Some("sonnet"));
    }

    #[tokio::test]
    async fn retry_escalates_model_on_second_attempt() {
        let mock = Arc::new(MockAgentRunner::new());
        mock.push_failure("compile error");
        mock.push_success("fixed it", 2.0);
        let result = spawn_worker_with_retry(
            mock,
            &task(),
            Path::new("/tmp"),
            CoordinationContext::None,
            "sonnet",
            "opus",
            true,
            5.0,
            2,
        )
        .await;
        assert!(result.success);
        assert_eq!(result.attempt, 2);
        assert_eq!(result.model_used.as_deref(), Some("opus"));
    }

    #[tokio::test]
    async fn exhausted_retries_returns_last_failure_not_an_error() {
        let mock = Arc::new(MockAgentRunner::new());
        mock.push_failure("still broken 1");
        mock.push_failure("still broken 2");
        let result = spawn_worker_with_retry(
            mock,
            &task(),
            Path::new("/tmp"),
            CoordinationContext::None,
            "sonnet",
            "opus",
            true,
            5.0,
            2,
        )
        .await;
        assert!(!result.success);
        assert_eq!(result.attempt, 2);
    }

    #[tokio::test]
    async fn single_attempt_never_escalates() {
        let mock = Arc::new(MockAgentRunner::new());
        mock.push_failure("broken");
        let result = spawn_worker_with_retry(
            mock,
            &task(),
            Path::new("/tmp"),
            CoordinationContext::None,
            "sonnet",
            "opus",
            true,
            5.0,
            1,
        )
        .await;
        assert_eq!(result.model_used.as_deref(), Some("sonnet"));
    }
}
