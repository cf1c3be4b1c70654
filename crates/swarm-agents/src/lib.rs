//! Library surface for the swarm CLI binary: the orchestration pipeline,
//! CLI argument parsing, and the supporting GitHub/issue-driver/dashboard
//! glue, exposed so integration tests can drive it without shelling out to
//! the binary.

pub mod config;
pub mod dashboard;
pub mod github;
pub mod integrator;
pub mod issue_driver;
pub mod orchestrator;
pub mod planner;
pub mod prompts;
pub mod worker_runner;

pub use config::RunArgs;
pub use issue_driver::{IssueDriverDefaults, IssueProcessor, IssueWatcher};
pub use orchestrator::Orchestrator;
