//! Plain-text status output for the CLI: fixed-width tables for plans, runs,
//! and worker state, plus a blocking yes/no prompt for checkpoint approvals.
//!
//! No terminal UI library is pulled in for this — a handful of `println!`
//! calls with fixed-width columns covers every verb's output.

use std::io::Write as _;

use coordination::{Plan, RunState, SwarmResult, WorkerState, WorkerStatus};

/// Ask a yes/no question on stdin, defaulting to `false` on EOF or a blank
/// line. Used as the fallback checkpoint gate when no other prompt was
/// wired into the orchestrator.
pub fn prompt_yes_no(question: &str) -> bool {
    print!("{question} [y/N] ");
    let _ = std::io::stdout().flush();

    let mut input = String::new();
    if std::io::stdin().read_line(&mut input).is_err() {
        return false;
    }
    matches!(input.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Render a plan as one row per subtask.
pub fn format_plan_table(plan: &Plan) -> String {
    let mut out = format!(
        "Plan: {}\n{}\n\n",
        plan.original_task, plan.reasoning
    );
    out.push_str(&format!(
        "{:<14}{:<40}{}\n",
        "WORKER", "TITLE", "TARGET FILES"
    ));
    out.push_str(&"-".repeat(90));
    out.push('\n');
    for task in &plan.tasks {
        let files = if task.target_files.is_empty() {
            "-".to_string()
        } else {
            task.target_files.join(", ")
        };
        out.push_str(&format!(
            "{:<14}{:<40}{}\n",
            task.worker_id, truncate(&task.title, 38), files
        ));
    }
    if let Some(cmd) = &plan.test_command {
        out.push_str(&format!("\ntest command: {cmd}\n"));
    }
    if let Some(cmd) = &plan.build_command {
        out.push_str(&format!("build command: {cmd}\n"));
    }
    out
}

/// Render one run's workers as a status table, plus the run's own summary line.
pub fn format_run_status(run: &RunState) -> String {
    let mut out = format!(
        "Run {} [{:?}] — {}\n",
        run.run_id, run.status, run.task
    );
    out.push_str(&format!(
        "base: {}   cost: ${:.2}   started: {}\n\n",
        run.base_branch, run.total_cost_usd, run.started_at
    ));

    out.push_str(&format!(
        "{:<14}{:<10}{:<10}{}\n",
        "WORKER", "STATUS", "COST", "SUMMARY"
    ));
    out.push_str(&"-".repeat(90));
    out.push('\n');

    let mut workers: Vec<&WorkerState> = run.workers.values().collect();
    workers.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
    for worker in workers {
        let status = status_label(worker.status);
        let cost = worker
            .cost_usd
            .map(|c| format!("${c:.2}"))
            .unwrap_or_else(|| "-".to_string());
        let summary = worker.summary.as_deref().unwrap_or("-");
        out.push_str(&format!(
            "{:<14}{:<10}{:<10}{}\n",
            worker.worker_id,
            status,
            cost,
            truncate(summary, 60)
        ));
    }

    if let Some(pr) = &run.pr_url {
        out.push_str(&format!("\nPR: {pr}\n"));
    }
    if let Some(error) = &run.error {
        out.push_str(&format!("\nerror: {error}\n"));
    }
    out
}

/// Render the final outcome of a completed run.
pub fn format_result_summary(result: &SwarmResult) -> String {
    let mut out = format!(
        "Run {} finished in {}ms — total cost ${:.2}\n",
        result.run_id, result.duration_ms, result.total_cost_usd
    );
    let succeeded = result.worker_results.iter().filter(|r| r.success).count();
    out.push_str(&format!(
        "{}/{} workers succeeded, integration {}\n",
        succeeded,
        result.worker_results.len(),
        if result.integration_success {
            "succeeded"
        } else {
            "did not complete"
        }
    ));
    if let Some(pr) = &result.pr_url {
        out.push_str(&format!("PR: {pr}\n"));
    }
    out
}

fn status_label(status: WorkerStatus) -> &'static str {
    match status {
        WorkerStatus::Pending => "pending",
        WorkerStatus::Running => "running",
        WorkerStatus::Completed => "completed",
        WorkerStatus::Failed => "failed",
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut truncated: String = s.chars().take(max.saturating_sub(1)).collect();
        truncated.push('…');
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordination::{RunStatus, WorkerTask};
    use std::collections::HashMap;

    fn sample_plan() -> Plan {
        Plan {
            original_task: "add retries".into(),
            reasoning: "split by module".into(),
            tasks: vec![WorkerTask {
                worker_id: "worker-1".into(),
                title: "add retry logic".into(),
                description: "d".into(),
                target_files: vec!["src/client.rs".into()],
                acceptance_criteria: vec![],
                coordination_notes: String::new(),
                coupled_with: Default::default(),
                shared_interfaces: vec![],
            }],
            integration_notes: String::new(),
            test_command: Some("cargo test".into()),
            build_command: None,
        }
    }

    #[test]
    fn plan_table_lists_every_worker() {
        let table = format_plan_table(&sample_plan());
        assert!(table.contains("worker-1"));
        assert!(table.contains("src/client.rs"));
        assert!(table.contains("cargo test"));
    }

    #[test]
    fn run_status_reports_worker_rows() {
        let mut worker = WorkerState::new_pending("worker-1", "add retries", "swarm/r1/worker-1");
        worker.status = WorkerStatus::Completed;
        worker.cost_usd = Some(1.5);
        worker.summary = Some("done".into());

        let mut workers = HashMap::new();
        workers.insert(worker.worker_id.clone(), worker);

        let run = RunState {
            run_id: "r1".into(),
            task: "add retries".into(),
            status: RunStatus::Completed,
            base_branch: "main".into(),
            plan: None,
            workers,
            integration_branch: None,
            pr_url: Some("https://example.com/pr/1".into()),
            total_cost_usd: 1.5,
            error: None,
            started_at: "t0".into(),
            updated_at: "t1".into(),
            config_snapshot: Default::default(),
        };

        let out = format_run_status(&run);
        assert!(out.contains("worker-1"));
        assert!(out.contains("completed"));
        assert!(out.contains("https://example.com/pr/1"));
    }

    #[test]
    fn truncate_adds_ellipsis_only_when_needed() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long title", 10), "this is a…");
    }
}
