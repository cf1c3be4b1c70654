//! Planner — one agent invocation that decomposes a task into a [`Plan`].

use std::sync::Arc;

use coordination::{AgentRequest, AgentRunner, Plan, PlanningError, SwarmConfig};

use crate::prompts::planner_system_prompt;

/// The read-only-plus-shell tool set the planner is allowed: it may inspect
/// the repository but must not edit it.
const PLANNER_TOOLS: &[&str] = &["Read", "Glob", "Grep", "Bash"];
const PLANNER_MAX_TURNS: u32 = 30;
const PLANNER_TIMEOUT_SECS: u64 = 600;

/// Run the planner and return a plan truncated to `config.max_workers` tasks.
pub async fn plan_task(
    agent: Arc<dyn AgentRunner>,
    config: &SwarmConfig,
) -> Result<Plan, PlanningError> {
    let budget_usd = (5.0_f64).min(config.max_cost_usd * 0.2);

    let request = AgentRequest {
        system_prompt: planner_system_prompt(config.max_workers),
        prompt: config.task.clone(),
        working_dir: config.repo_path.clone(),
        model: config.planner_model.clone(),
        timeout_secs: PLANNER_TIMEOUT_SECS,
        allowed_tools: PLANNER_TOOLS.iter().map(|s| s.to_string()).collect(),
        permission_mode: "default".to_string(),
        budget_usd,
        max_turns: PLANNER_MAX_TURNS,
        output_schema: Some(plan_schema()),
    };

    let outcome = agent
        .run(request)
        .await
        .map_err(|e| PlanningError::MalformedOutput {
            message: e.to_string(),
        })?;

    let value = outcome
        .structured_output
        .clone()
        .or_else(|| serde_json::from_str(&outcome.raw_text).ok())
        .ok_or(PlanningError::NoOutput)?;

    let plan: Plan = serde_json::from_value(value).map_err(|e| PlanningError::SchemaInvalid {
        message: e.to_string(),
    })?;

    if plan.tasks.is_empty() {
        return Err(PlanningError::SchemaInvalid {
            message: "plan contained no tasks".to_string(),
        });
    }

    Ok(plan.truncated(config.max_workers))
}

/// A JSON schema describing [`Plan`], steering agents that honor
/// `output_schema` toward the right shape. The subprocess CLI runner folds
/// this into the prompt rather than enforcing it mechanically.
fn plan_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "required": ["original_task", "reasoning", "tasks"],
        "properties": {
            "original_task": { "type": "string" },
            "reasoning": { "type": "string" },
            "tasks": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["worker_id", "title", "description"],
                    "properties": {
                        "worker_id": { "type": "string" },
                        "title": { "type": "string" },
                        "description": { "type": "string" },
                        "target_files": { "type": "array", "items": { "type": "string" } },
                        "acceptance_criteria": { "type": "array", "items": { "type": "string" } }
                    }
                }
            },
            "integration_notes": { "type": "string" },
            "test_command": { "type": ["string", "null"] },
            "build_command": { "type": ["string", "null"] }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordination::MockAgentRunner;
    use coordination::OversightLevel;
    use std::path::PathBuf;

    fn config() -> SwarmConfig {
        SwarmConfig {
            task: "add retries".into(),
            repo_path: PathBuf::from("."),
            base_branch: None,
            max_workers: 2,
            planner_model: "opus".into(),
            worker_model: "sonnet".into(),
            escalation_model: "opus".into(),
            max_cost_usd: 50.0,
            max_worker_cost_usd: 5.0,
            max_attempts: 1,
            escalation_enabled: true,
            conflict_resolution_enabled: true,
            review_after_merge: false,
            oversight: OversightLevel::PrGated,
            create_pr: true,
            dry_run: false,
            issue_number: None,
        }
    }

    #[tokio::test]
    async fn parses_structured_plan_and_truncates() {
        let mock = Arc::new(MockAgentRunner::new());
        mock.push_structured_success(
            serde_json::json!({
                "original_task": "add retries",
                "reasoning": "split by module",
                "tasks": [
                    {"worker_id": "worker-1", "title": "a", "description": "d"},
                    {"worker_id": "worker-2", "title": "b", "description": "d"},
                    {"worker_id": "worker-3", "title": "c", "description": "d"}
                ],
                "test_command": "cargo test",
                "build_command": null
            }),
            0.5,
        );

        let plan = plan_task(mock, &config()).await.unwrap();
        assert_eq!(plan.tasks.len(), 2);
        assert_eq!(plan.tasks[0].worker_id, "worker-1");
    }

    #[tokio::test]
    async fn parses_plan_from_raw_text_when_no_structured_output() {
        let mock = Arc::new(MockAgentRunner::new());
        mock.push_success(
            serde_json::json!({
                "original_task": "t",
                "reasoning": "r",
                "tasks": [{"worker_id": "worker-1", "title": "a", "description": "d"}],
            })
            .to_string(),
            0.1,
        );

        let plan = plan_task(mock, &config()).await.unwrap();
        assert_eq!(plan.tasks.len(), 1);
    }

    #[tokio::test]
    async fn empty_task_list_is_a_planning_error() {
        let mock = Arc::new(MockAgentRunner::new());
        mock.push_structured_success(
            serde_json::json!({"original_task": "t", "reasoning": "r", "tasks": []}),
            0.1,
        );
        let err = plan_task(mock, &config()).await.unwrap_err();
        assert!(matches!(err, PlanningError::SchemaInvalid { .. }));
    }

    #[tokio::test]
    async fn malformed_output_is_a_planning_error() {
        let mock = Arc::new(MockAgentRunner::new());
        mock.push_success("not json at all", 0.0);
        let err = plan_task(mock, &config()).await.unwrap_err();
        assert!(matches!(err, PlanningError::NoOutput));
    }
}
