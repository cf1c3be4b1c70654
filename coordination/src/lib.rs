//! Coordination — the shared engine behind a multi-agent code-editing swarm.
//!
//! This crate owns everything that is agent-agnostic: the data model shared
//! across a run, git worktree isolation, atomic state persistence, the
//! append-only event log, the file-backed coordination bus workers use to
//! talk to each other, the Bash command guard, and the opaque boundary to
//! whatever CLI actually produces code edits. The `swarm-agents` crate builds
//! the planning/execution/integration pipeline on top of these primitives.

#![allow(clippy::uninlined_format_args)]

pub mod agent_runner;
pub mod coordination_bus;
pub mod error;
pub mod event_log;
pub mod guard;
pub mod models;
pub mod state_store;
pub mod worktree;

pub use agent_runner::{
    AgentError, AgentOutcome, AgentRequest, AgentRunner, ClaudeCliAgentRunner, ClaudeCliConfig,
    MockAgentRunner,
};
pub use coordination_bus::CoordinationBus;
pub use error::{
    GitHubError, IntegrationError, PlanningError, StoreError, SwarmError, WorkerError,
    WorktreeError,
};
pub use event_log::{EventKind, SessionRecorder};
pub use guard::{evaluate_command, evaluate_tool_call, GuardDecision};
pub use models::{
    IssueConfig, Message, MessageType, OversightLevel, PeerStatus, PeerStatusKind, Plan, RunStatus,
    RunState, SharedNote, SwarmConfig, SwarmResult, SwarmState, WorkerResult, WorkerState,
    WorkerStatus, WorkerTask,
};
pub use state_store::{StateStore, WorkerFieldUpdate};
pub use worktree::WorktreeManager;
