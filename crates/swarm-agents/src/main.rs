//! CLI entry point: `run`, `plan`, `status`, `resume`, `cleanup`, `process`,
//! and `watch`, all driven by the [`swarm_agents::orchestrator::Orchestrator`]
//! and its supporting modules.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use coordination::{ClaudeCliAgentRunner, StateStore};
use tracing::{error, info};

use swarm_agents::config::RunArgs;
use swarm_agents::github;
use swarm_agents::issue_driver::{IssueDriverDefaults, IssueProcessor, IssueWatcher};
use swarm_agents::orchestrator::Orchestrator;
use swarm_agents::{dashboard, orchestrator};

#[derive(Parser)]
#[command(
    name = "swarm-agents",
    about = "Dynamic pool of autonomous code-editing agents"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Plan a task and run it to completion.
    Run(RunArgs),
    /// Plan a task and print the plan without executing it.
    Plan(RunArgs),
    /// Show the active (or most recently active) run.
    Status {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
    },
    /// Resume an interrupted run.
    Resume {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long = "run-id")]
        run_id: Option<String>,
    },
    /// Remove worktrees, coordination files, and branches left by a run.
    Cleanup {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long = "run-id")]
        run_id: Option<String>,
    },
    /// Process a single labeled GitHub issue.
    Process {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long)]
        issue: u64,
    },
    /// Poll GitHub for labeled issues and process them as they arrive.
    Watch {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long = "trigger-label", default_value = "swarm")]
        trigger_label: String,
        #[arg(long = "poll-interval", default_value_t = 15)]
        poll_interval_secs: u64,
    },
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => {
            init_logging(args.verbose);
            run_or_plan(args).await
        }
        Command::Plan(mut args) => {
            init_logging(args.verbose);
            args.dry_run = true;
            run_or_plan(args).await
        }
        Command::Status { repo } => {
            init_logging(false);
            cmd_status(repo)
        }
        Command::Resume { repo, run_id } => {
            init_logging(false);
            cmd_resume(repo, run_id).await
        }
        Command::Cleanup { repo, run_id } => {
            init_logging(false);
            cmd_cleanup(repo, run_id).await
        }
        Command::Process { repo, issue } => {
            init_logging(false);
            cmd_process(repo, issue).await
        }
        Command::Watch {
            repo,
            trigger_label,
            poll_interval_secs,
        } => {
            init_logging(false);
            cmd_watch(repo, trigger_label, poll_interval_secs).await
        }
    }
}

async fn run_or_plan(args: RunArgs) -> Result<()> {
    let dry_run = args.dry_run;
    let config = args.into_config()?;
    let agent = Arc::new(ClaudeCliAgentRunner::new());

    let orchestrator =
        Arc::new(Orchestrator::new(config, agent).context("failed to start orchestrator")?);

    let result = tokio::select! {
        result = orchestrator.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("received interrupt, cleaning up");
            orchestrator.cleanup().await;
            std::process::exit(130);
        }
    };

    let result = match result {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "run failed");
            std::process::exit(1);
        }
    };

    if dry_run {
        if let Some(plan) = &result.plan {
            println!("{}", dashboard::format_plan_table(plan));
        }
    } else {
        println!("{}", dashboard::format_result_summary(&result));
    }
    Ok(())
}

fn cmd_status(repo: PathBuf) -> Result<()> {
    let store = StateStore::new(&repo);
    match store.get_active_run() {
        Some(run) => println!("{}", dashboard::format_run_status(&run)),
        None => match store.get_last_interrupted_run() {
            Some(run) => {
                println!("no active run; most recent interrupted run:\n");
                println!("{}", dashboard::format_run_status(&run));
            }
            None => println!("no runs recorded for {}", repo.display()),
        },
    }
    Ok(())
}

async fn cmd_resume(repo: PathBuf, run_id: Option<String>) -> Result<()> {
    let store = StateStore::new(&repo);
    let run = match run_id {
        Some(id) => store
            .get_run(&id)
            .with_context(|| format!("no run recorded with id '{id}'"))?,
        None => store
            .get_last_interrupted_run()
            .context("no interrupted run to resume")?,
    };

    let config = config_from_snapshot(&run.config_snapshot, repo.clone(), run.task.clone())
        .context("stored run config could not be restored")?;

    let agent = Arc::new(ClaudeCliAgentRunner::new());
    let orchestrator = orchestrator::Orchestrator::with_run_id(config, agent, run.run_id.clone())
        .context("failed to rebuild orchestrator for resume")?;

    let orchestrator = Arc::new(orchestrator);
    let result = tokio::select! {
        result = orchestrator.run_resumed() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("received interrupt, cleaning up");
            orchestrator.cleanup().await;
            std::process::exit(130);
        }
    };

    let result = match result {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "resume failed");
            std::process::exit(1);
        }
    };
    println!("{}", dashboard::format_result_summary(&result));
    Ok(())
}

/// Rebuild a [`coordination::SwarmConfig`] from the permissive key/value map
/// a run's state persists alongside it (see [`coordination::SwarmConfig::snapshot`]).
/// `repo_path` isn't part of that snapshot — the repository a run operates on
/// is implied by where its state store lives, so it comes from the CLI's
/// `--repo` flag instead.
fn config_from_snapshot(
    snapshot: &serde_json::Map<String, serde_json::Value>,
    repo_path: PathBuf,
    task: String,
) -> Result<coordination::SwarmConfig> {
    let get_str = |key: &str, default: &str| -> String {
        snapshot
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or(default)
            .to_string()
    };
    let get_f64 = |key: &str, default: f64| -> f64 {
        snapshot.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
    };
    let get_u64 = |key: &str, default: u64| -> u64 {
        snapshot.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
    };
    let get_bool = |key: &str, default: bool| -> bool {
        snapshot.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    };

    let oversight = snapshot
        .get("oversight")
        .cloned()
        .map(serde_json::from_value::<coordination::OversightLevel>)
        .transpose()
        .context("stored oversight level was not recognized")?
        .unwrap_or_default();

    Ok(coordination::SwarmConfig {
        task,
        repo_path,
        base_branch: snapshot
            .get("base_branch")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        max_workers: get_u64("max_workers", 4) as usize,
        planner_model: get_str("planner_model", "opus"),
        worker_model: get_str("worker_model", "sonnet"),
        escalation_model: get_str("escalation_model", "opus"),
        max_cost_usd: get_f64("max_cost_usd", 50.0),
        max_worker_cost_usd: get_f64("max_worker_cost_usd", 5.0),
        max_attempts: get_u64("max_attempts", 1) as u32,
        escalation_enabled: get_bool("escalation_enabled", true),
        conflict_resolution_enabled: get_bool("conflict_resolution_enabled", true),
        review_after_merge: get_bool("review_after_merge", false),
        oversight,
        create_pr: get_bool("create_pr", true),
        dry_run: get_bool("dry_run", false),
        issue_number: snapshot.get("issue_number").and_then(|v| v.as_u64()),
    })
}

async fn cmd_cleanup(repo: PathBuf, run_id: Option<String>) -> Result<()> {
    let store = StateStore::new(&repo);
    let run_id = match run_id {
        Some(id) => id,
        None => store
            .get_active_run()
            .or_else(|| store.get_last_interrupted_run())
            .map(|r| r.run_id)
            .context("no run id given and no run recorded to clean up")?,
    };

    let worktrees = coordination::WorktreeManager::new(&repo, &run_id);
    worktrees.cleanup_all(true).await;
    store.clear_run(&run_id)?;
    info!(run_id, "cleaned up run");
    println!("cleaned up run {run_id}");
    Ok(())
}

async fn cmd_process(repo: PathBuf, issue_number: u64) -> Result<()> {
    let slug = github::get_repo_slug(&repo).await?;
    let issue = github::get_issue(&repo, issue_number).await?;
    let agent = Arc::new(ClaudeCliAgentRunner::new());
    let processor = Arc::new(IssueProcessor::new(
        repo.clone(),
        agent,
        IssueDriverDefaults::default(),
    ));

    let result = processor.process(&slug, issue).await?;
    println!("{}", dashboard::format_result_summary(&result));
    Ok(())
}

async fn cmd_watch(repo: PathBuf, trigger_label: String, poll_interval_secs: u64) -> Result<()> {
    if poll_interval_secs == 0 {
        bail!("--poll-interval must be at least 1 second");
    }
    let agent = Arc::new(ClaudeCliAgentRunner::new());
    let processor = Arc::new(IssueProcessor::new(
        repo.clone(),
        agent,
        IssueDriverDefaults::default(),
    ));
    let watcher = Arc::new(IssueWatcher::new(
        repo,
        trigger_label,
        poll_interval_secs,
        processor,
    ));

    let stop_handle = watcher.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received interrupt, stopping watcher");
            stop_handle.stop();
        }
    });

    watcher.run().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_run_subcommand() {
        let cli = Cli::parse_from(["swarm-agents", "run", "fix the bug", "--workers", "3"]);
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.task, "fix the bug");
                assert_eq!(args.workers, 3);
            }
            _ => panic!("expected Run"),
        }
    }

    #[test]
    fn cli_parses_watch_subcommand_defaults() {
        let cli = Cli::parse_from(["swarm-agents", "watch"]);
        match cli.command {
            Command::Watch {
                trigger_label,
                poll_interval_secs,
                ..
            } => {
                assert_eq!(trigger_label, "swarm");
                assert_eq!(poll_interval_secs, 15);
            }
            _ => panic!("expected Watch"),
        }
    }
}
