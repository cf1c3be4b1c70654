//! Deterministic [`AgentRunner`] for tests: a queue of canned outcomes, with
//! optional substring routing so a test can make specific prompts fail while
//! others succeed.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{AgentError, AgentOutcome, AgentRequest, AgentRunner};

pub struct MockAgentRunner {
    default_queue: Mutex<VecDeque<Result<AgentOutcome, AgentErrorKind>>>,
    routes: Mutex<Vec<(String, Result<AgentOutcome, AgentErrorKind>)>>,
}

/// A cloneable stand-in for [`AgentError`], since `AgentError` itself holds
/// no state worth duplicating beyond its message.
#[derive(Clone)]
enum AgentErrorKind {
    Timeout { timeout_secs: u64 },
    NonZeroExit { stderr: String },
}

impl From<AgentErrorKind> for AgentError {
    fn from(kind: AgentErrorKind) -> Self {
        match kind {
            AgentErrorKind::Timeout { timeout_secs } => AgentError::Timeout { timeout_secs },
            AgentErrorKind::NonZeroExit { stderr } => AgentError::NonZeroExit {
                code: Some(1),
                stderr,
            },
        }
    }
}

impl Default for MockAgentRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAgentRunner {
    pub fn new() -> Self {
        Self {
            default_queue: Mutex::new(VecDeque::new()),
            routes: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful outcome for the next call lacking a matching route.
    pub fn push_success(&self, raw_text: impl Into<String>, cost_usd: f64) {
        self.default_queue
            .lock()
            .expect("mock queue lock poisoned")
            .push_back(Ok(AgentOutcome {
                success: true,
                raw_text: raw_text.into(),
                structured_output: None,
                cost_usd,
                turns: 1,
            }));
    }

    pub fn push_structured_success(&self, value: serde_json::Value, cost_usd: f64) {
        self.default_queue
            .lock()
            .expect("mock queue lock poisoned")
            .push_back(Ok(AgentOutcome {
                success: true,
                raw_text: value.to_string(),
                structured_output: Some(value),
                cost_usd,
                turns: 1,
            }));
    }

    pub fn push_timeout(&self, timeout_secs: u64) {
        self.default_queue
            .lock()
            .expect("mock queue lock poisoned")
            .push_back(Err(AgentErrorKind::Timeout { timeout_secs }));
    }

    pub fn push_failure(&self, stderr: impl Into<String>) {
        self.default_queue
            .lock()
            .expect("mock queue lock poisoned")
            .push_back(Err(AgentErrorKind::NonZeroExit {
                stderr: stderr.into(),
            }));
    }

    /// Route prompts containing `substring` to a fixed successful outcome,
    /// independent of the default queue's order.
    pub fn route_success(&self, substring: impl Into<String>, raw_text: impl Into<String>, cost_usd: f64) {
        self.routes
            .lock()
            .expect("mock routes lock poisoned")
            .push((
                substring.into(),
                Ok(AgentOutcome {
                    success: true,
                    raw_text: raw_text.into(),
                    structured_output: None,
                    cost_usd,
                    turns: 1,
                }),
            ));
    }

    pub fn route_failure(&self, substring: impl Into<String>, stderr: impl Into<String>) {
        self.routes
            .lock()
            .expect("mock routes lock poisoned")
            .push((
                substring.into(),
                Err(AgentErrorKind::NonZeroExit {
                    stderr: stderr.into(),
                }),
            ));
    }
}

#[async_trait]
impl AgentRunner for MockAgentRunner {
    async fn run(&self, request: AgentRequest) -> Result<AgentOutcome, AgentError> {
        let routes = self.routes.lock().expect("mock routes lock poisoned");
        for (substring, outcome) in routes.iter() {
            if request.prompt.contains(substring.as_str()) {
                return outcome.clone().map_err(Into::into);
            }
        }
        drop(routes);

        let mut queue = self.default_queue.lock().expect("mock queue lock poisoned");
        queue
            .pop_front()
            .unwrap_or_else(|| {
                Ok(AgentOutcome {
                    success: true,
                    raw_text: String::new(),
                    structured_output: None,
                    cost_usd: 0.0,
                    turns: 0,
                })
            })
            .map_err(Into::into)
    }
}
