//! Integrator — merges successful worker branches into one integration
//! branch, runs build/test commands, optionally reviews and opens a PR.

use std::process::Stdio;
use std::sync::Arc;

use coordination::{
    AgentRequest, AgentRunner, CoordinationBus, GitHubError, IntegrationError, SwarmConfig,
    WorkerResult, WorktreeManager,
};
use tokio::process::Command;

use crate::prompts::{CONFLICT_RESOLVER_SYSTEM_PROMPT, REVIEWER_SYSTEM_PROMPT};

const AUX_TOOLS: &[&str] = &["Read", "Write", "Edit", "Bash", "Glob", "Grep"];
const CONFLICT_RESOLVER_BUDGET_USD: f64 = 3.0;
const CONFLICT_RESOLVER_MAX_TURNS: u32 = 20;
const REVIEWER_BUDGET_USD: f64 = 3.0;
const REVIEWER_MAX_TURNS: u32 = 20;
const AUX_TIMEOUT_SECS: u64 = 900;

/// Options that shape one integration pass, independent of [`SwarmConfig`]
/// so resume/checkpoint flows can adjust `should_create_pr` without cloning
/// the whole config.
pub struct IntegrationOptions {
    pub orchestrator_model: String,
    pub conflict_resolution_enabled: bool,
    pub review_after_merge: bool,
    pub build_command: Option<String>,
    pub test_command: Option<String>,
    pub should_create_pr: bool,
    pub issue_number: Option<u64>,
}

impl IntegrationOptions {
    pub fn from_config(config: &SwarmConfig, should_create_pr: bool) -> Self {
        Self {
            orchestrator_model: config.escalation_model.clone(),
            conflict_resolution_enabled: config.conflict_resolution_enabled,
            review_after_merge: config.review_after_merge,
            build_command: None,
            test_command: None,
            should_create_pr,
            issue_number: config.issue_number,
        }
    }
}

async fn is_gh_available() -> bool {
    Command::new("gh")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

async fn run_git_checked(args: &[&str], cwd: &std::path::Path) -> Result<bool, IntegrationError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .await
        .map_err(|e| IntegrationError::GitCommand {
            operation: args.join(" "),
            message: e.to_string(),
        })?;
    Ok(output.status.success())
}

async fn run_shell(command: &str, cwd: &std::path::Path) -> (bool, String) {
    match Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .output()
        .await
    {
        Ok(output) => {
            let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            (output.status.success(), combined)
        }
        Err(e) => (false, e.to_string()),
    }
}

/// Result of one full integration pass, matching the distilled
/// `(success, pr_url, error_message)` contract.
pub struct IntegrationOutcome {
    pub success: bool,
    pub pr_url: Option<String>,
    pub error: Option<String>,
}

#[allow(clippy::too_many_arguments)]
pub async fn integrate_results(
    worktrees: &WorktreeManager,
    agent: Arc<dyn AgentRunner>,
    coordination: &CoordinationBus,
    results: &[WorkerResult],
    base_branch: &str,
    task: &str,
    options: &IntegrationOptions,
) -> Result<IntegrationOutcome, IntegrationError> {
    let successful: Vec<&WorkerResult> = results.iter().filter(|r| r.success).collect();
    if successful.is_empty() {
        return Err(IntegrationError::NoSuccessfulWorkers);
    }

    if options.should_create_pr && !is_gh_available().await {
        return Err(IntegrationError::GitHubCliMissing);
    }

    let integration_path = worktrees.create_integration_worktree(base_branch).await?;

    let mut merged: Vec<String> = Vec::new();
    for result in &successful {
        let branch = worktrees.branch_name(&result.worker_id);
        let summary = result.summary.as_deref().unwrap_or("completed");
        let message = format!("Merge {}: {}", result.worker_id, summary);

        let merged_ok = run_git_checked(
            &["merge", "--no-ff", "-m", &message, &branch],
            &integration_path,
        )
        .await?;

        if merged_ok {
            merged.push(result.worker_id.clone());
            continue;
        }

        if options.conflict_resolution_enabled {
            let resolved = resolve_conflict(
                agent.clone(),
                &integration_path,
                &options.orchestrator_model,
            )
            .await;
            if resolved {
                merged.push(result.worker_id.clone());
                continue;
            }
        }

        let _ = run_git_checked(&["merge", "--abort"], &integration_path).await;
        let diff = worktrees
            .diff_between(base_branch, &branch)
            .await
            .ok()
            .map(|d| d.chars().take(2000).collect::<String>());
        return Err(IntegrationError::merge_conflict(
            &result.worker_id,
            &merged,
            diff,
        ));
    }

    if let Some(build_command) = &options.build_command {
        let (success, output) = run_shell(build_command, &integration_path).await;
        if !success {
            return Ok(IntegrationOutcome {
                success: false,
                pr_url: None,
                error: Some(format!("Build failed: {output}")),
            });
        }
    }

    if let Some(test_command) = &options.test_command {
        let (success, output) = run_shell(test_command, &integration_path).await;
        if !success {
            return Ok(IntegrationOutcome {
                success: false,
                pr_url: None,
                error: Some(format!("Tests failed: {output}")),
            });
        }
    }

    if options.review_after_merge {
        run_review(
            agent.clone(),
            &integration_path,
            &options.orchestrator_model,
            coordination,
        )
        .await;
    }

    let pr_url = if options.should_create_pr {
        Some(
            create_pr(
                worktrees,
                &integration_path,
                base_branch,
                task,
                results,
                options.issue_number,
            )
            .await?,
        )
    } else {
        None
    };

    Ok(IntegrationOutcome {
        success: true,
        pr_url,
        error: None,
    })
}

async fn resolve_conflict(
    agent: Arc<dyn AgentRunner>,
    integration_path: &std::path::Path,
    orchestrator_model: &str,
) -> bool {
    let request = AgentRequest {
        system_prompt: CONFLICT_RESOLVER_SYSTEM_PROMPT.to_string(),
        prompt: "Resolve the current merge conflict and commit the result.".to_string(),
        working_dir: integration_path.to_path_buf(),
        model: orchestrator_model.to_string(),
        timeout_secs: AUX_TIMEOUT_SECS,
        allowed_tools: AUX_TOOLS.iter().map(|s| s.to_string()).collect(),
        permission_mode: "acceptEdits".to_string(),
        budget_usd: CONFLICT_RESOLVER_BUDGET_USD,
        max_turns: CONFLICT_RESOLVER_MAX_TURNS,
        output_schema: None,
    };
    matches!(agent.run(request).await, Ok(outcome) if outcome.success)
}

async fn run_review(
    agent: Arc<dyn AgentRunner>,
    integration_path: &std::path::Path,
    orchestrator_model: &str,
    coordination: &CoordinationBus,
) {
    let summary = coordination.format_summary();
    let prompt = if summary.is_empty() {
        "Review the merged changes for semantic conflicts and fix any issues you find."
            .to_string()
    } else {
        format!(
            "Review the merged changes for semantic conflicts and fix any issues you find.\n\n{summary}"
        )
    };
    let request = AgentRequest {
        system_prompt: REVIEWER_SYSTEM_PROMPT.to_string(),
        prompt,
        working_dir: integration_path.to_path_buf(),
        model: orchestrator_model.to_string(),
        timeout_secs: AUX_TIMEOUT_SECS,
        allowed_tools: AUX_TOOLS.iter().map(|s| s.to_string()).collect(),
        permission_mode: "acceptEdits".to_string(),
        budget_usd: REVIEWER_BUDGET_USD,
        max_turns: REVIEWER_MAX_TURNS,
        output_schema: None,
    };
    let _ = agent.run(request).await;
}

/// Push the integration branch and open a PR for it. Exposed directly (not
/// only through [`integrate_results`]) so checkpoint-gated runs can defer PR
/// creation to a separate approval step against the already-merged
/// integration worktree.
pub async fn create_pr_for_integration(
    worktrees: &WorktreeManager,
    integration_path: &std::path::Path,
    base_branch: &str,
    task: &str,
    results: &[WorkerResult],
    issue_number: Option<u64>,
) -> Result<String, IntegrationError> {
    create_pr(
        worktrees,
        integration_path,
        base_branch,
        task,
        results,
        issue_number,
    )
    .await
}

async fn create_pr(
    worktrees: &WorktreeManager,
    integration_path: &std::path::Path,
    base_branch: &str,
    task: &str,
    results: &[WorkerResult],
    issue_number: Option<u64>,
) -> Result<String, IntegrationError> {
    let integration_branch = worktrees.integration_branch_name();

    Command::new("git")
        .args(["push", "-u", "origin", &integration_branch])
        .current_dir(integration_path)
        .output()
        .await
        .map_err(|e| IntegrationError::GitCommand {
            operation: "push".into(),
            message: e.to_string(),
        })?;

    let mut body = format!("## Task\n{task}\n\n## Workers\n");
    let mut total_cost = 0.0;
    for result in results.iter().filter(|r| r.success) {
        let cost = result.cost_usd.unwrap_or(0.0);
        total_cost += cost;
        let summary = result.summary.as_deref().unwrap_or("completed");
        body.push_str(&format!("- **{}**: {summary} (${cost:.2})\n", result.worker_id));
    }
    body.push_str(&format!("\n**Total cost**: ${total_cost:.2}\n"));
    if let Some(n) = issue_number {
        body.push_str(&format!("\nCloses #{n}\n"));
    }
    body.push_str("\n---\nGenerated by the code-editing swarm.\n");

    let title: String = format!("[swarm] {}", task.chars().take(60).collect::<String>());

    let output = Command::new("gh")
        .args([
            "pr",
            "create",
            "--title",
            &title,
            "--body",
            &body,
            "--base",
            base_branch,
            "--head",
            &integration_branch,
        ])
        .current_dir(integration_path)
        .output()
        .await
        .map_err(|e| GitHubError::CommandFailed {
            command: "gh pr create".into(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(GitHubError::CommandFailed {
            command: "gh pr create".into(),
            message: String::from_utf8_lossy(&output.stderr).to_string(),
        }
        .into());
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Squash-merge a previously-created PR. Called only under autonomous
/// oversight, after PR creation. No direct-merge fallback: a failure here is
/// surfaced but the PR is left open for a human to merge by hand.
pub async fn auto_merge_pr(pr_url: &str, repo_path: &std::path::Path) -> bool {
    Command::new("gh")
        .args(["pr", "merge", pr_url, "--auto", "--squash"])
        .current_dir(repo_path)
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker_result(id: &str, success: bool) -> WorkerResult {
        WorkerResult {
            worker_id: id.to_string(),
            success,
            cost_usd: Some(1.0),
            duration_ms: Some(100),
            summary: Some("did the thing".into()),
            files_changed: Default::default(),
            error: None,
            attempt: 1,
            model_used: Some("sonnet".into()),
        }
    }

    fn run(cmd: &[&str], dir: &std::path::Path) {
        std::process::Command::new(cmd[0])
            .args(&cmd[1..])
            .current_dir(dir)
            .output()
            .unwrap();
    }

    fn setup_repo_with_worker_branch() -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        run(&["git", "init", "-b", "main"], dir.path());
        run(&["git", "config", "user.email", "t@t.com"], dir.path());
        run(&["git", "config", "user.name", "T"], dir.path());
        std::fs::write(dir.path().join("README.md"), "hi").unwrap();
        run(&["git", "add", "."], dir.path());
        run(&["git", "commit", "-m", "init"], dir.path());
        (dir, "main".to_string())
    }

    #[tokio::test]
    async fn empty_successful_set_raises() {
        let (dir, base) = setup_repo_with_worker_branch();
        let worktrees = WorktreeManager::new(dir.path(), "run-1");
        let coordination = CoordinationBus::new(dir.path(), "run-1");
        let mock = Arc::new(coordination::MockAgentRunner::new());
        let options = IntegrationOptions {
            orchestrator_model: "opus".into(),
            conflict_resolution_enabled: true,
            review_after_merge: false,
            build_command: None,
            test_command: None,
            should_create_pr: false,
            issue_number: None,
        };
        let err = integrate_results(
            &worktrees,
            mock,
            &coordination,
            &[worker_result("worker-1", false)],
            &base,
            "task",
            &options,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, IntegrationError::NoSuccessfulWorkers));
    }

    #[tokio::test]
    async fn non_conflicting_merge_succeeds() {
        let (dir, base) = setup_repo_with_worker_branch();
        let worktrees = WorktreeManager::new(dir.path(), "run-1");
        let coordination = CoordinationBus::new(dir.path(), "run-1");
        let worker_path = worktrees.create_worker_worktree("worker-1", &base).await.unwrap();
        std::fs::write(worker_path.join("new.txt"), "content").unwrap();
        run(&["git", "add", "-A"], &worker_path);
        run(&["git", "commit", "-m", "add file"], &worker_path);

        let mock = Arc::new(coordination::MockAgentRunner::new());
        let options = IntegrationOptions {
            orchestrator_model: "opus".into(),
            conflict_resolution_enabled: true,
            review_after_merge: false,
            build_command: None,
            test_command: None,
            should_create_pr: false,
            issue_number: None,
        };
        let outcome = integrate_results(
            &worktrees,
            mock,
            &coordination,
            &[worker_result("worker-1", true)],
            &base,
            "task",
            &options,
        )
        .await
        .unwrap();
        assert!(outcome.success);
        assert!(outcome.pr_url.is_none());
    }
}
