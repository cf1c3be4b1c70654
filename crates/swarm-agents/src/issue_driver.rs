//! Issue Driver — turns labeled GitHub issues into swarm runs.
//!
//! An [`IssueProcessor`] claims one issue (swapping `swarm` for
//! `swarm:active` so a second poll doesn't pick it up), runs the orchestrator
//! against its title/body, and swaps the label again on completion
//! (`swarm:done` or `swarm:failed`), leaving a result comment either way. An
//! [`IssueWatcher`] polls `gh issue list` for newly labeled issues and hands
//! each to a processor.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use coordination::{AgentRunner, IssueConfig, OversightLevel, SwarmConfig, SwarmError, SwarmResult};
use tracing::{error, info, warn};

use crate::github::{self, Issue, RepoSlug};
use crate::orchestrator::Orchestrator;

/// Default run parameters, overridable per-issue via label prefixes
/// (`oversight:`, `model:`, `workers:`, `cost:`, `worker-cost:`).
#[derive(Debug, Clone)]
pub struct IssueDriverDefaults {
    pub model: String,
    pub orchestrator_model: String,
    pub max_workers: usize,
    pub max_cost_usd: f64,
    pub max_worker_cost_usd: f64,
    pub oversight: OversightLevel,
    pub create_pr: bool,
}

impl Default for IssueDriverDefaults {
    fn default() -> Self {
        Self {
            model: "sonnet".to_string(),
            orchestrator_model: "opus".to_string(),
            max_workers: 4,
            max_cost_usd: 50.0,
            max_worker_cost_usd: 5.0,
            oversight: OversightLevel::PrGated,
            create_pr: true,
        }
    }
}

/// Apply `label:value` overrides found in `labels` on top of `defaults`.
/// Unrecognized or malformed values are ignored; a typo'd override label
/// should not crash a run, just fail to take effect.
fn apply_label_overrides(defaults: &IssueDriverDefaults, labels: &[String]) -> IssueDriverDefaults {
    let mut resolved = defaults.clone();
    for label in labels {
        let Some((key, value)) = label.split_once(':') else {
            continue;
        };
        match key {
            "oversight" => {
                if let Ok(level) = value.parse() {
                    resolved.oversight = level;
                }
            }
            "model" => resolved.model = value.to_string(),
            "workers" => {
                if let Ok(n) = value.parse::<usize>() {
                    resolved.max_workers = n.max(1);
                }
            }
            "cost" => {
                if let Ok(n) = value.parse::<f64>() {
                    resolved.max_cost_usd = n;
                }
            }
            "worker-cost" => {
                if let Ok(n) = value.parse::<f64>() {
                    resolved.max_worker_cost_usd = n;
                }
            }
            _ => {}
        }
    }
    resolved
}

/// Drives one issue from claim through to a result comment.
pub struct IssueProcessor {
    repo_path: PathBuf,
    agent: Arc<dyn AgentRunner>,
    defaults: IssueDriverDefaults,
}

impl IssueProcessor {
    pub fn new(repo_path: PathBuf, agent: Arc<dyn AgentRunner>, defaults: IssueDriverDefaults) -> Self {
        Self {
            repo_path,
            agent,
            defaults,
        }
    }

    /// Swap `swarm` for `swarm:active` so a concurrent poll skips this issue.
    pub async fn claim(&self, issue_number: u64) -> Result<(), SwarmError> {
        github::add_label(&self.repo_path, issue_number, "swarm:active").await?;
        github::remove_label(&self.repo_path, issue_number, "swarm").await?;
        Ok(())
    }

    /// Run the full claim → swarm → comment → label lifecycle for one issue.
    pub async fn process(&self, slug: &RepoSlug, issue: Issue) -> Result<SwarmResult, SwarmError> {
        self.claim(issue.number).await?;
        self.post_started_comment(issue.number).await;

        let issue_config = self.build_issue_config(slug, &issue);
        let result = self.run_swarm(issue_config).await;

        match &result {
            Ok(swarm_result) => {
                self.post_result_comment(issue.number, swarm_result).await;
                self.mark_done(issue.number).await;
            }
            Err(e) => {
                self.mark_failed(issue.number, &e.to_string()).await;
            }
        }
        result
    }

    fn build_issue_config(&self, slug: &RepoSlug, issue: &Issue) -> IssueConfig {
        let labels = issue.label_names();
        let resolved = apply_label_overrides(&self.defaults, &labels);
        IssueConfig {
            issue_number: issue.number,
            owner: slug.owner.clone(),
            repo_name: slug.repo.clone(),
            title: issue.title.clone(),
            body: issue.body.clone(),
            labels,
            oversight: Some(resolved.oversight),
            model: Some(resolved.model),
            max_workers: Some(resolved.max_workers),
            max_cost: Some(resolved.max_cost_usd),
            max_worker_cost: Some(resolved.max_worker_cost_usd),
        }
    }

    async fn run_swarm(&self, issue_config: IssueConfig) -> Result<SwarmResult, SwarmError> {
        let config = SwarmConfig {
            task: issue_config.task_description(),
            repo_path: self.repo_path.clone(),
            base_branch: None,
            max_workers: issue_config.max_workers.unwrap_or(self.defaults.max_workers),
            planner_model: self.defaults.orchestrator_model.clone(),
            worker_model: issue_config.model.clone().unwrap_or_else(|| self.defaults.model.clone()),
            escalation_model: self.defaults.orchestrator_model.clone(),
            max_cost_usd: issue_config.max_cost.unwrap_or(self.defaults.max_cost_usd),
            max_worker_cost_usd: issue_config
                .max_worker_cost
                .unwrap_or(self.defaults.max_worker_cost_usd),
            max_attempts: 2,
            escalation_enabled: true,
            conflict_resolution_enabled: true,
            review_after_merge: false,
            oversight: issue_config.oversight.unwrap_or(self.defaults.oversight),
            create_pr: self.defaults.create_pr,
            dry_run: false,
            issue_number: Some(issue_config.issue_number),
        };

        let orchestrator = Orchestrator::new(config, self.agent.clone())?;
        orchestrator.run().await
    }

    async fn post_started_comment(&self, issue_number: u64) {
        let body = "The code-editing swarm has started working on this issue.";
        if let Err(e) = github::post_comment(&self.repo_path, issue_number, body).await {
            warn!(issue_number, error = %e, "failed to post started comment");
        }
    }

    async fn post_result_comment(&self, issue_number: u64, result: &SwarmResult) {
        let body = crate::dashboard::format_result_summary(result);
        if let Err(e) = github::post_comment(&self.repo_path, issue_number, &body).await {
            warn!(issue_number, error = %e, "failed to post result comment");
        }
    }

    async fn mark_done(&self, issue_number: u64) {
        if let Err(e) = github::add_label(&self.repo_path, issue_number, "swarm:done").await {
            warn!(issue_number, error = %e, "failed to add swarm:done label");
        }
        if let Err(e) = github::remove_label(&self.repo_path, issue_number, "swarm:active").await {
            warn!(issue_number, error = %e, "failed to remove swarm:active label");
        }
    }

    async fn mark_failed(&self, issue_number: u64, error: &str) {
        let body = format!("The code-editing swarm failed on this issue:\n\n```\n{error}\n```");
        if let Err(e) = github::post_comment(&self.repo_path, issue_number, &body).await {
            warn!(issue_number, error = %e, "failed to post failure comment");
        }
        if let Err(e) = github::add_label(&self.repo_path, issue_number, "swarm:failed").await {
            warn!(issue_number, error = %e, "failed to add swarm:failed label");
        }
        if let Err(e) = github::remove_label(&self.repo_path, issue_number, "swarm:active").await {
            warn!(issue_number, error = %e, "failed to remove swarm:active label");
        }
    }
}

/// Polls `gh issue list` for newly labeled issues and hands each to an
/// [`IssueProcessor`]. Polling runs in one-second ticks so [`IssueWatcher::stop`]
/// takes effect promptly rather than only between long sleeps.
pub struct IssueWatcher {
    repo_path: PathBuf,
    trigger_label: String,
    poll_interval_secs: u64,
    processor: Arc<IssueProcessor>,
    stop: Arc<AtomicBool>,
}

impl IssueWatcher {
    pub fn new(
        repo_path: PathBuf,
        trigger_label: impl Into<String>,
        poll_interval_secs: u64,
        processor: Arc<IssueProcessor>,
    ) -> Self {
        Self {
            repo_path,
            trigger_label: trigger_label.into(),
            poll_interval_secs,
            processor,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Signal the watcher to stop after its current tick.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub async fn run(&self) -> Result<(), SwarmError> {
        github::ensure_labels_exist(&self.repo_path).await;
        let slug = github::get_repo_slug(&self.repo_path).await?;

        while !self.stop.load(Ordering::SeqCst) {
            match github::list_issues(&self.repo_path, &self.trigger_label, &["swarm:active"]).await
            {
                Ok(issues) => {
                    for issue in issues {
                        info!(issue_number = issue.number, "processing labeled issue");
                        if let Err(e) = self.processor.process(&slug, issue.clone()).await {
                            error!(issue_number = issue.number, error = %e, "issue run failed");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to list issues, will retry next tick");
                }
            }

            for _ in 0..self.poll_interval_secs.max(1) {
                if self.stop.load(Ordering::SeqCst) {
                    break;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_overrides_apply_recognized_prefixes() {
        let defaults = IssueDriverDefaults::default();
        let labels = vec![
            "swarm".to_string(),
            "oversight:autonomous".to_string(),
            "workers:8".to_string(),
            "cost:100.5".to_string(),
            "worker-cost:bogus".to_string(),
        ];
        let resolved = apply_label_overrides(&defaults, &labels);
        assert_eq!(resolved.oversight, OversightLevel::Autonomous);
        assert_eq!(resolved.max_workers, 8);
        assert_eq!(resolved.max_cost_usd, 100.5);
        assert_eq!(resolved.max_worker_cost_usd, defaults.max_worker_cost_usd);
    }

    #[test]
    fn unrecognized_labels_are_ignored() {
        let defaults = IssueDriverDefaults::default();
        let labels = vec!["bug".to_string(), "priority-high".to_string()];
        let resolved = apply_label_overrides(&defaults, &labels);
        assert_eq!(resolved.max_workers, defaults.max_workers);
    }
}
