//! Data model types shared by every component: configuration, plans,
//! worker tasks/results, persisted run state, and coordination artifacts.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Human intervention policy for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversightLevel {
    /// No pauses; integrate and optionally auto-merge without asking.
    Autonomous,
    /// Integrate automatically but leave the created PR for human review/merge.
    PrGated,
    /// Pause for approval before execute, before integrate, and before PR creation.
    Checkpoint,
}

impl Default for OversightLevel {
    fn default() -> Self {
        Self::PrGated
    }
}

impl std::str::FromStr for OversightLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "autonomous" => Ok(Self::Autonomous),
            "pr-gated" | "pr_gated" => Ok(Self::PrGated),
            "checkpoint" => Ok(Self::Checkpoint),
            other => Err(format!("unknown oversight level: {other}")),
        }
    }
}

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Planning,
    Executing,
    Integrating,
    Completed,
    Failed,
    Interrupted,
    PausedCheckpoint,
}

/// Lifecycle status of a single worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Immutable configuration for one run.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    pub task: String,
    pub repo_path: std::path::PathBuf,
    /// Branch to plan and integrate against. `None` means "whatever branch
    /// the repository is currently on".
    pub base_branch: Option<String>,
    pub max_workers: usize,
    pub planner_model: String,
    pub worker_model: String,
    pub escalation_model: String,
    pub max_cost_usd: f64,
    pub max_worker_cost_usd: f64,
    pub max_attempts: u32,
    pub escalation_enabled: bool,
    pub conflict_resolution_enabled: bool,
    pub review_after_merge: bool,
    pub oversight: OversightLevel,
    pub create_pr: bool,
    pub dry_run: bool,
    pub issue_number: Option<u64>,
}

impl SwarmConfig {
    /// The permissive key/value snapshot persisted alongside a run, per the
    /// "dynamic configuration" design note: known keys plus room for future
    /// ones that an older binary wouldn't recognize.
    pub fn snapshot(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        map.insert("task".into(), self.task.clone().into());
        if let Some(branch) = &self.base_branch {
            map.insert("base_branch".into(), branch.clone().into());
        }
        map.insert("max_workers".into(), self.max_workers.into());
        map.insert("planner_model".into(), self.planner_model.clone().into());
        map.insert("worker_model".into(), self.worker_model.clone().into());
        map.insert(
            "escalation_model".into(),
            self.escalation_model.clone().into(),
        );
        map.insert("max_cost_usd".into(), self.max_cost_usd.into());
        map.insert(
            "max_worker_cost_usd".into(),
            self.max_worker_cost_usd.into(),
        );
        map.insert("max_attempts".into(), self.max_attempts.into());
        map.insert("escalation_enabled".into(), self.escalation_enabled.into());
        map.insert(
            "conflict_resolution_enabled".into(),
            self.conflict_resolution_enabled.into(),
        );
        map.insert("review_after_merge".into(), self.review_after_merge.into());
        map.insert(
            "oversight".into(),
            serde_json::to_value(self.oversight).unwrap_or_default(),
        );
        map.insert("create_pr".into(), self.create_pr.into());
        map.insert("dry_run".into(), self.dry_run.into());
        if let Some(n) = self.issue_number {
            map.insert("issue_number".into(), n.into());
        }
        map
    }
}

/// One independent unit of work handed to a worker agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerTask {
    pub worker_id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub target_files: Vec<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub coordination_notes: String,
    #[serde(default)]
    pub coupled_with: HashSet<String>,
    #[serde(default)]
    pub shared_interfaces: Vec<String>,
}

/// The planner's full decomposition of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub original_task: String,
    pub reasoning: String,
    pub tasks: Vec<WorkerTask>,
    #[serde(default)]
    pub integration_notes: String,
    pub test_command: Option<String>,
    pub build_command: Option<String>,
}

impl Plan {
    /// Truncate to at most `max_workers` tasks, preserving insertion order.
    pub fn truncated(mut self, max_workers: usize) -> Self {
        self.tasks.truncate(max_workers);
        self
    }
}

/// The terminal outcome of one worker attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResult {
    pub worker_id: String,
    pub success: bool,
    pub cost_usd: Option<f64>,
    pub duration_ms: Option<u64>,
    pub summary: Option<String>,
    #[serde(default)]
    pub files_changed: HashSet<String>,
    pub error: Option<String>,
    pub attempt: u32,
    pub model_used: Option<String>,
}

/// Persisted per-worker state within a [`RunState`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerState {
    pub worker_id: String,
    pub title: String,
    pub status: WorkerStatus,
    pub branch: String,
    pub worktree_path: Option<std::path::PathBuf>,
    pub cost_usd: Option<f64>,
    pub duration_ms: Option<u64>,
    pub summary: Option<String>,
    #[serde(default)]
    pub files_changed: HashSet<String>,
    pub error: Option<String>,
    pub attempt: u32,
    pub model_used: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl WorkerState {
    pub fn new_pending(worker_id: &str, title: &str, branch: &str) -> Self {
        Self {
            worker_id: worker_id.to_string(),
            title: title.to_string(),
            status: WorkerStatus::Pending,
            branch: branch.to_string(),
            worktree_path: None,
            cost_usd: None,
            duration_ms: None,
            summary: None,
            files_changed: HashSet::new(),
            error: None,
            attempt: 0,
            model_used: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Reconstruct a synthetic [`WorkerResult`] from a previously-completed
    /// worker, for resume scenarios where integration needs the union of
    /// old and newly-produced results.
    pub fn as_worker_result(&self) -> WorkerResult {
        WorkerResult {
            worker_id: self.worker_id.clone(),
            success: matches!(self.status, WorkerStatus::Completed),
            cost_usd: self.cost_usd,
            duration_ms: self.duration_ms,
            summary: self.summary.clone(),
            files_changed: self.files_changed.clone(),
            error: self.error.clone(),
            attempt: self.attempt,
            model_used: self.model_used.clone(),
        }
    }
}

/// Persisted state for a single run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub task: String,
    pub status: RunStatus,
    pub base_branch: String,
    pub plan: Option<Plan>,
    #[serde(default)]
    pub workers: HashMap<String, WorkerState>,
    pub integration_branch: Option<String>,
    pub pr_url: Option<String>,
    pub total_cost_usd: f64,
    pub error: Option<String>,
    pub started_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub config_snapshot: serde_json::Map<String, serde_json::Value>,
}

/// The top-level persisted document at `.claude-swarm/state.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmState {
    pub version: u32,
    pub active_run: Option<String>,
    #[serde(default)]
    pub runs: HashMap<String, RunState>,
}

impl Default for SwarmState {
    fn default() -> Self {
        Self {
            version: 1,
            active_run: None,
            runs: HashMap::new(),
        }
    }
}

/// A note a worker leaves for any other worker to read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedNote {
    pub worker_id: String,
    pub timestamp: String,
    pub topic: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// The kind of a directed message between workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Info,
    Question,
    Decision,
    Blocker,
}

/// A directed message delivered to one recipient's inbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub from_worker: String,
    pub to_worker: String,
    pub timestamp: String,
    pub topic: String,
    pub content: String,
    pub message_type: MessageType,
}

/// A worker's self-reported progress, readable by any peer or the reviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PeerStatusKind {
    Starting,
    InProgress,
    MilestoneReached,
    Blocked,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerStatus {
    pub worker_id: String,
    pub timestamp: String,
    pub status: PeerStatusKind,
    pub milestone: Option<String>,
    pub details: Option<String>,
}

/// Configuration for a run originating from an issue-tracker item.
#[derive(Debug, Clone)]
pub struct IssueConfig {
    pub issue_number: u64,
    pub owner: String,
    pub repo_name: String,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    pub oversight: Option<OversightLevel>,
    pub model: Option<String>,
    pub max_workers: Option<usize>,
    pub max_cost: Option<f64>,
    pub max_worker_cost: Option<f64>,
}

impl IssueConfig {
    /// The task text handed to the planner: the issue title with any
    /// leading `[swarm]` trigger tag stripped, followed by the body.
    pub fn task_description(&self) -> String {
        let title = self.title.trim();
        let title = title
            .strip_prefix("[swarm]")
            .or_else(|| title.strip_prefix("[Swarm]"))
            .unwrap_or(title)
            .trim();
        if self.body.trim().is_empty() {
            title.to_string()
        } else {
            format!("{title}\n\n{}", self.body.trim())
        }
    }
}

/// The outcome of one complete run, returned to the CLI / issue driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmResult {
    pub run_id: String,
    pub task: String,
    pub plan: Option<Plan>,
    pub worker_results: Vec<WorkerResult>,
    pub integration_success: bool,
    pub pr_url: Option<String>,
    pub total_cost_usd: f64,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_truncates_preserving_order() {
        let plan = Plan {
            original_task: "t".into(),
            reasoning: "r".into(),
            tasks: (0..5)
                .map(|i| WorkerTask {
                    worker_id: format!("worker-{i}"),
                    title: String::new(),
                    description: String::new(),
                    target_files: vec![],
                    acceptance_criteria: vec![],
                    coordination_notes: String::new(),
                    coupled_with: HashSet::new(),
                    shared_interfaces: vec![],
                })
                .collect(),
            integration_notes: String::new(),
            test_command: None,
            build_command: None,
        };
        let truncated = plan.truncated(2);
        assert_eq!(truncated.tasks.len(), 2);
        assert_eq!(truncated.tasks[0].worker_id, "worker-0");
        assert_eq!(truncated.tasks[1].worker_id, "worker-1");
    }

    #[test]
    fn issue_task_description_strips_trigger_tag() {
        let cfg = IssueConfig {
            issue_number: 1,
            owner: "acme".into(),
            repo_name: "widgets".into(),
            title: "[swarm] Fix the thing".into(),
            body: "Details here.".into(),
            labels: vec![],
            oversight: None,
            model: None,
            max_workers: None,
            max_cost: None,
            max_worker_cost: None,
        };
        assert_eq!(cfg.task_description(), "Fix the thing\n\nDetails here.");
    }

    #[test]
    fn peer_status_kebab_case_round_trip() {
        let status = PeerStatus {
            worker_id: "worker-1".into(),
            timestamp: "2026-01-01T00:00:00Z".into(),
            status: PeerStatusKind::MilestoneReached,
            milestone: Some("tests green".into()),
            details: None,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "milestone-reached");
        let round_tripped: PeerStatus = serde_json::from_value(json).unwrap();
        assert_eq!(round_tripped.status, PeerStatusKind::MilestoneReached);
    }

    #[test]
    fn oversight_level_from_str() {
        assert_eq!(
            "autonomous".parse::<OversightLevel>().unwrap(),
            OversightLevel::Autonomous
        );
        assert!("bogus".parse::<OversightLevel>().is_err());
    }

    #[test]
    fn worker_state_round_trips_through_worker_result() {
        let mut state = WorkerState::new_pending("worker-1", "Do a thing", "swarm/r1/worker-1");
        state.status = WorkerStatus::Completed;
        state.cost_usd = Some(1.25);
        state.completed_at = Some("2026-01-01T00:00:01Z".into());
        let result = state.as_worker_result();
        assert!(result.success);
        assert_eq!(result.cost_usd, Some(1.25));
    }
}
