//! CLI-facing configuration: the flags a user passes to `run`/`plan`, turned
//! into a [`coordination::SwarmConfig`].

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;
use coordination::{OversightLevel, SwarmConfig};

/// Shared flags for `run` and `plan` (`plan` is `run --dry-run` with a
/// smaller surface, handled by the caller setting `dry_run` directly).
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// The task to decompose and execute.
    pub task: String,

    /// Path to the git repository to operate on.
    #[arg(long, default_value = ".")]
    pub repo: PathBuf,

    /// Maximum number of parallel workers.
    #[arg(long, default_value_t = 4)]
    pub workers: usize,

    /// Model used for worker agents.
    #[arg(long, default_value = "sonnet")]
    pub model: String,

    /// Model used for the planner, integrator reviewer, and conflict resolver.
    #[arg(long = "orchestrator-model", default_value = "opus")]
    pub orchestrator_model: String,

    /// Total cost ceiling for the run, in USD.
    #[arg(long = "max-cost", default_value_t = 50.0)]
    pub max_cost: f64,

    /// Per-worker cost ceiling, in USD.
    #[arg(long = "max-worker-cost", default_value_t = 5.0)]
    pub max_worker_cost: f64,

    /// Create a pull request once integration succeeds.
    #[arg(long = "pr", default_value_t = true, action = clap::ArgAction::Set)]
    pub create_pr: bool,

    /// Plan only; do not execute or integrate.
    #[arg(long = "dry-run", default_value_t = false)]
    pub dry_run: bool,

    /// Run a semantic review agent after integration.
    #[arg(long, default_value_t = false)]
    pub review: bool,

    /// Verbose logging.
    #[arg(long, short, default_value_t = false)]
    pub verbose: bool,

    /// Maximum attempts per worker before giving up.
    #[arg(long, default_value_t = 1)]
    pub retries: u32,

    /// Disable escalating to a stronger model on worker retry.
    #[arg(long = "no-escalation", default_value_t = false)]
    pub no_escalation: bool,

    /// Disable agent-assisted conflict resolution during integration.
    #[arg(long = "no-conflict-resolution", default_value_t = false)]
    pub no_conflict_resolution: bool,

    /// Human-oversight level: `autonomous`, `pr-gated`, or `checkpoint`.
    #[arg(long, default_value = "pr-gated")]
    pub oversight: String,

    /// The base branch to plan and integrate against, if not the repository's
    /// current branch.
    #[arg(long = "base-branch")]
    pub base_branch: Option<String>,

    /// An originating issue number, when this run was triggered by one.
    #[arg(long = "issue-number")]
    pub issue_number: Option<u64>,
}

impl RunArgs {
    /// Validate and convert CLI flags into the engine's [`SwarmConfig`].
    ///
    /// Rejects `autonomous` oversight combined with PR creation disabled at
    /// parse time: autonomous mode's only path to merging is through a
    /// created PR (or direct integration without one), so disabling PR
    /// creation under autonomous oversight would silently strand every run.
    pub fn into_config(self) -> Result<SwarmConfig> {
        let oversight: OversightLevel = self
            .oversight
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;

        if matches!(oversight, OversightLevel::Autonomous) && !self.create_pr {
            bail!("--oversight=autonomous requires PR creation (--pr=true); disabling PR creation leaves autonomous runs with no merge path");
        }

        Ok(SwarmConfig {
            task: self.task,
            repo_path: self.repo,
            base_branch: self.base_branch,
            max_workers: self.workers.max(1),
            planner_model: self.orchestrator_model.clone(),
            worker_model: self.model,
            escalation_model: self.orchestrator_model,
            max_cost_usd: self.max_cost,
            max_worker_cost_usd: self.max_worker_cost,
            max_attempts: self.retries.max(1),
            escalation_enabled: !self.no_escalation,
            conflict_resolution_enabled: !self.no_conflict_resolution,
            review_after_merge: self.review,
            oversight,
            create_pr: self.create_pr,
            dry_run: self.dry_run,
            issue_number: self.issue_number,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> RunArgs {
        RunArgs {
            task: "fix the bug".into(),
            repo: PathBuf::from("."),
            workers: 4,
            model: "sonnet".into(),
            orchestrator_model: "opus".into(),
            max_cost: 50.0,
            max_worker_cost: 5.0,
            create_pr: true,
            dry_run: false,
            review: false,
            verbose: false,
            retries: 1,
            no_escalation: false,
            no_conflict_resolution: false,
            oversight: "pr-gated".into(),
            base_branch: None,
            issue_number: None,
        }
    }

    #[test]
    fn converts_into_swarm_config() {
        let config = base_args().into_config().unwrap();
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.oversight, OversightLevel::PrGated);
    }

    #[test]
    fn autonomous_without_pr_is_rejected() {
        let mut args = base_args();
        args.oversight = "autonomous".into();
        args.create_pr = false;
        assert!(args.into_config().is_err());
    }

    #[test]
    fn zero_workers_is_clamped_to_one() {
        let mut args = base_args();
        args.workers = 0;
        let config = args.into_config().unwrap();
        assert_eq!(config.max_workers, 1);
    }
}
