//! Error taxonomy for the orchestration engine.
//!
//! One root [`SwarmError`] wraps every component's narrow error type.
//! Component-internal retries (git lock contention, worker attempts) never
//! surface as errors here; only terminal failures do.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the Worktree Manager.
#[derive(Error, Debug)]
pub enum WorktreeError {
    #[error("git {operation} failed: {message}")]
    GitCommand { operation: String, message: String },

    #[error("git {operation} failed after {attempts} retries: {message}")]
    LockRetriesExhausted {
        operation: String,
        attempts: u32,
        message: String,
    },

    #[error("unknown worker worktree: {worker_id}")]
    UnknownWorker { worker_id: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while running a worker agent.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("worker {worker_id} agent invocation failed: {message}")]
    AgentFailed { worker_id: String, message: String },
}

/// Errors raised by the Planner.
#[derive(Error, Debug)]
pub enum PlanningError {
    #[error("planner produced no output")]
    NoOutput,

    #[error("planner output was not valid JSON: {message}")]
    MalformedOutput { message: String },

    #[error("planner output failed schema validation: {message}")]
    SchemaInvalid { message: String },
}

/// Errors raised during integration.
#[derive(Error, Debug)]
pub enum IntegrationError {
    #[error("no successful workers to integrate")]
    NoSuccessfulWorkers,

    #[error("GitHub CLI ('gh') not found on PATH; install it from https://cli.github.com")]
    GitHubCliMissing,

    #[error("build failed: {0}")]
    BuildFailed(String),

    #[error("test failed: {0}")]
    TestFailed(String),

    #[error(transparent)]
    GitHub(#[from] GitHubError),

    #[error("merge conflict on branch {}: {message}", .conflicting_branches.join(", "))]
    Conflict {
        message: String,
        conflicting_branches: Vec<String>,
        diff_context: Option<String>,
    },

    #[error("git {operation} failed: {message}")]
    GitCommand { operation: String, message: String },
}

impl IntegrationError {
    /// Construct the merge-conflict variant, truncating `diff_context` to 2KB.
    pub fn merge_conflict(
        offending_branch: &str,
        already_merged: &[String],
        diff_context: Option<String>,
    ) -> Self {
        let mut conflicting_branches = vec![offending_branch.to_string()];
        conflicting_branches.extend(already_merged.iter().cloned());
        let diff_context = diff_context.map(|d| {
            if d.chars().count() > 2000 {
                let head: String = d.chars().take(2000).collect();
                format!("{head}... (truncated)")
            } else {
                d
            }
        });
        Self::Conflict {
            message: format!("failed to merge branch {offending_branch}"),
            conflicting_branches,
            diff_context,
        }
    }

    /// The branches implicated in a conflict, for callers that need to report them.
    pub fn conflicting_branches(&self) -> Option<&[String]> {
        match self {
            Self::Conflict {
                conflicting_branches,
                ..
            } => Some(conflicting_branches),
            _ => None,
        }
    }
}

/// Errors raised by the GitHub CLI wrapper.
#[derive(Error, Debug)]
pub enum GitHubError {
    #[error("gh {command} failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("cannot parse GitHub owner/repo from remote URL: {0}")]
    UnparsableRemote(String),

    #[error("no git remote 'origin' found; use --repo owner/repo or add a remote")]
    NoOrigin,
}

/// Errors raised by the State Store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error writing state at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state document at {path} is not valid json: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// The root error type threaded through the orchestrator's public API.
#[derive(Error, Debug)]
pub enum SwarmError {
    #[error(transparent)]
    Worktree(#[from] WorktreeError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error(transparent)]
    Integration(#[from] IntegrationError),

    #[error(transparent)]
    GitHub(#[from] GitHubError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no plan is recorded for run {run_id}; cannot resume")]
    NoResumablePlan { run_id: String },

    #[error("no active or interrupted run found")]
    NoRunToResume,

    #[error("run was cancelled by operator")]
    Cancelled,
}
