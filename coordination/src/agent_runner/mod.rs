//! Agent Runner — the opaque boundary between the orchestration engine and
//! whatever produces code edits.
//!
//! Every caller (planner, worker, integrator's conflict resolver) goes
//! through [`AgentRunner`]: one request in, one terminal outcome out. The
//! engine never inspects an agent's internal reasoning or tool calls; it
//! only sees cost, turn count, and either a raw text transcript or
//! structured output the agent chose to emit.

mod claude_cli;
mod mock;

pub use claude_cli::{ClaudeCliAgentRunner, ClaudeCliConfig};
pub use mock::MockAgentRunner;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub system_prompt: String,
    pub prompt: String,
    pub working_dir: std::path::PathBuf,
    pub model: String,
    pub timeout_secs: u64,
    /// Tool names the agent may use (e.g. `Read`, `Write`, `Edit`, `Bash`,
    /// `Glob`, `Grep`). An empty vec means "whatever the CLI defaults to".
    pub allowed_tools: Vec<String>,
    /// One of the CLI's permission modes, e.g. `"default"` or
    /// `"acceptEdits"`.
    pub permission_mode: String,
    /// Soft budget in USD for this single invocation. Bookkeeping only: the
    /// subprocess CLI has no flag to enforce a per-call budget, so callers
    /// (Planner, Worker Runner, Integrator) size `max_turns` conservatively
    /// and rely on the orchestrator's running-cost circuit breaker for the
    /// aggregate bound.
    pub budget_usd: f64,
    pub max_turns: u32,
    /// A JSON schema the agent should be steered toward producing in its
    /// structured output, if the underlying CLI supports one. The subprocess
    /// runner embeds this as part of the prompt rather than a CLI flag.
    pub output_schema: Option<serde_json::Value>,
}

impl AgentRequest {
    /// Convenience constructor for the common case: free-running with no
    /// tool restrictions, matching what a test fixture or a simple
    /// invocation needs.
    pub fn new(
        system_prompt: impl Into<String>,
        prompt: impl Into<String>,
        working_dir: impl Into<std::path::PathBuf>,
        model: impl Into<String>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            prompt: prompt.into(),
            working_dir: working_dir.into(),
            model: model.into(),
            timeout_secs,
            allowed_tools: Vec::new(),
            permission_mode: "default".to_string(),
            budget_usd: 0.0,
            max_turns: 0,
            output_schema: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub success: bool,
    pub raw_text: String,
    pub structured_output: Option<serde_json::Value>,
    pub cost_usd: f64,
    pub turns: u32,
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("agent CLI not found at '{path}'; install it or configure the correct path")]
    CliMissing { path: String },

    #[error("failed to spawn agent process: {0}")]
    Spawn(String),

    #[error("agent process timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("agent process exited with status {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("failed to parse agent response envelope: {0}")]
    MalformedResponse(String),
}

#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(&self, request: AgentRequest) -> Result<AgentOutcome, AgentError>;
}
