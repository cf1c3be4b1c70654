//! Thin wrapper over the `gh` CLI: issue listing/labeling/commenting and
//! remote-URL parsing. Every call shells out; there is no GitHub API client
//! in this workspace, matching the "opaque CLI" treatment used for the agent
//! and git boundaries elsewhere.

use std::path::Path;

use coordination::GitHubError;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;

static SSH_REMOTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^git@[^:]+:([^/]+)/(.+?)(?:\.git)?$").unwrap());
static URL_REMOTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:https?|ssh)://[^/]+/([^/]+)/([^/]+?)(?:\.git)?/?$").unwrap());

/// `owner/repo` parsed out of a remote URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    pub owner: String,
    pub repo: String,
}

impl std::fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

pub fn parse_repo_url(url: &str) -> Result<RepoSlug, GitHubError> {
    let url = url.trim();
    if let Some(caps) = SSH_REMOTE.captures(url) {
        return Ok(RepoSlug {
            owner: caps[1].to_string(),
            repo: caps[2].to_string(),
        });
    }
    if let Some(caps) = URL_REMOTE.captures(url) {
        return Ok(RepoSlug {
            owner: caps[1].to_string(),
            repo: caps[2].to_string(),
        });
    }
    Err(GitHubError::UnparsableRemote(url.to_string()))
}

async fn run_gh(args: &[&str], cwd: &Path) -> Result<String, GitHubError> {
    let output = Command::new("gh")
        .args(args)
        .current_dir(cwd)
        .output()
        .await
        .map_err(|e| GitHubError::CommandFailed {
            command: format!("gh {}", args.join(" ")),
            message: e.to_string(),
        })?;
    if !output.status.success() {
        return Err(GitHubError::CommandFailed {
            command: format!("gh {}", args.join(" ")),
            message: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Resolve `owner/repo` from the repository's `origin` remote.
pub async fn get_repo_slug(repo_path: &Path) -> Result<RepoSlug, GitHubError> {
    let output = Command::new("git")
        .args(["remote", "get-url", "origin"])
        .current_dir(repo_path)
        .output()
        .await
        .map_err(|e| GitHubError::CommandFailed {
            command: "git remote get-url origin".into(),
            message: e.to_string(),
        })?;
    if !output.status.success() {
        return Err(GitHubError::NoOrigin);
    }
    parse_repo_url(String::from_utf8_lossy(&output.stdout).trim())
}

/// One issue-tracker record, as reported by `gh issue list`/`gh issue view`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub labels: Vec<IssueLabel>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct IssueLabel {
    pub name: String,
}

impl Issue {
    pub fn label_names(&self) -> Vec<String> {
        self.labels.iter().map(|l| l.name.clone()).collect()
    }
}

/// List open issues carrying `trigger_label`, excluding any that also carry
/// one of `exclude_labels`.
pub async fn list_issues(
    repo_path: &Path,
    trigger_label: &str,
    exclude_labels: &[&str],
) -> Result<Vec<Issue>, GitHubError> {
    let raw = run_gh(
        &[
            "issue",
            "list",
            "--label",
            trigger_label,
            "--json",
            "number,title,body,labels",
            "--state",
            "open",
            "--limit",
            "50",
        ],
        repo_path,
    )
    .await?;
    let issues: Vec<Issue> = serde_json::from_str(&raw).map_err(|e| GitHubError::CommandFailed {
        command: "gh issue list".into(),
        message: e.to_string(),
    })?;
    Ok(issues
        .into_iter()
        .filter(|issue| {
            let names = issue.label_names();
            !exclude_labels
                .iter()
                .any(|excl| names.iter().any(|n| n == excl))
        })
        .collect())
}

pub async fn get_issue(repo_path: &Path, issue_number: u64) -> Result<Issue, GitHubError> {
    let raw = run_gh(
        &[
            "issue",
            "view",
            &issue_number.to_string(),
            "--json",
            "number,title,body,labels",
        ],
        repo_path,
    )
    .await?;
    serde_json::from_str(&raw).map_err(|e| GitHubError::CommandFailed {
        command: "gh issue view".into(),
        message: e.to_string(),
    })
}

pub async fn add_label(repo_path: &Path, issue_number: u64, label: &str) -> Result<(), GitHubError> {
    run_gh(
        &["issue", "edit", &issue_number.to_string(), "--add-label", label],
        repo_path,
    )
    .await?;
    Ok(())
}

pub async fn remove_label(
    repo_path: &Path,
    issue_number: u64,
    label: &str,
) -> Result<(), GitHubError> {
    run_gh(
        &[
            "issue",
            "edit",
            &issue_number.to_string(),
            "--remove-label",
            label,
        ],
        repo_path,
    )
    .await?;
    Ok(())
}

pub async fn post_comment(
    repo_path: &Path,
    issue_number: u64,
    body: &str,
) -> Result<(), GitHubError> {
    run_gh(
        &["issue", "comment", &issue_number.to_string(), "--body", body],
        repo_path,
    )
    .await?;
    Ok(())
}

pub async fn close_issue(repo_path: &Path, issue_number: u64) -> Result<(), GitHubError> {
    run_gh(&["issue", "close", &issue_number.to_string()], repo_path).await?;
    Ok(())
}

/// The swarm's standard label set, created once (idempotently) per repo.
const LABELS: &[(&str, &str, &str)] = &[
    ("swarm", "ededed", "Triggers the code-editing swarm"),
    ("swarm:active", "1d76db", "A swarm run is currently processing this issue"),
    ("swarm:done", "0e8a16", "The swarm completed this issue successfully"),
    ("swarm:failed", "d93f0b", "The swarm failed to complete this issue"),
];

/// Create the standard labels if missing. Individual failures (e.g. an older
/// `gh` without `--force` support) are swallowed since label creation is
/// best-effort bootstrapping, not load-bearing for a single run.
pub async fn ensure_labels_exist(repo_path: &Path) {
    for (name, color, description) in LABELS {
        let _ = run_gh(
            &[
                "label",
                "create",
                name,
                "--color",
                color,
                "--description",
                description,
                "--force",
            ],
            repo_path,
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ssh_remote() {
        let slug = parse_repo_url("git@github.com:acme/widgets.git").unwrap();
        assert_eq!(slug.owner, "acme");
        assert_eq!(slug.repo, "widgets");
    }

    #[test]
    fn parses_https_remote() {
        let slug = parse_repo_url("https://github.com/acme/widgets.git").unwrap();
        assert_eq!(slug.owner, "acme");
        assert_eq!(slug.repo, "widgets");
    }

    #[test]
    fn parses_https_remote_without_git_suffix() {
        let slug = parse_repo_url("https://github.com/acme/widgets").unwrap();
        assert_eq!(slug.repo, "widgets");
    }

    #[test]
    fn rejects_unrecognized_remote() {
        assert!(parse_repo_url("not a url").is_err());
    }

    #[test]
    fn issue_label_names_collects_all() {
        let issue = Issue {
            number: 1,
            title: "t".into(),
            body: String::new(),
            labels: vec![
                IssueLabel { name: "swarm".into() },
                IssueLabel { name: "bug".into() },
            ],
        };
        assert_eq!(issue.label_names(), vec!["swarm", "bug"]);
    }
}
