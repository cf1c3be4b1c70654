//! Subprocess-CLI agent runner: shells out to a locally installed `claude`
//! binary with `--print --output-format json --dangerously-skip-permissions`,
//! feeding the prompt over stdin and reading the JSON envelope back.

use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

use super::{AgentError, AgentOutcome, AgentRequest, AgentRunner};

#[derive(Debug, Clone)]
pub struct ClaudeCliConfig {
    pub binary_path: String,
}

impl Default for ClaudeCliConfig {
    fn default() -> Self {
        Self {
            binary_path: "claude".to_string(),
        }
    }
}

pub struct ClaudeCliAgentRunner {
    config: ClaudeCliConfig,
}

impl ClaudeCliAgentRunner {
    pub fn new() -> Self {
        Self::with_config(ClaudeCliConfig::default())
    }

    pub fn with_config(config: ClaudeCliConfig) -> Self {
        Self { config }
    }

    async fn is_cli_available(&self) -> bool {
        Command::new(&self.config.binary_path)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

impl Default for ClaudeCliAgentRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Shape of the `--output-format json` envelope this runner parses out of
/// the CLI's final stdout line.
#[derive(Debug, Deserialize)]
struct CliEnvelope {
    result: Option<String>,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    total_cost_usd: f64,
    #[serde(default)]
    num_turns: u32,
}

#[async_trait]
impl AgentRunner for ClaudeCliAgentRunner {
    async fn run(&self, request: AgentRequest) -> Result<AgentOutcome, AgentError> {
        if !self.is_cli_available().await {
            return Err(AgentError::CliMissing {
                path: self.config.binary_path.clone(),
            });
        }

        let mut cmd = Command::new(&self.config.binary_path);
        cmd.current_dir(&request.working_dir)
            .arg("--model")
            .arg(&request.model)
            .arg("--append-system-prompt")
            .arg(&request.system_prompt)
            .arg("--print")
            .arg("--output-format")
            .arg("json")
            .arg("--dangerously-skip-permissions")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if !request.permission_mode.is_empty() {
            cmd.arg("--permission-mode").arg(&request.permission_mode);
        }
        if request.max_turns > 0 {
            cmd.arg("--max-turns").arg(request.max_turns.to_string());
        }
        if !request.allowed_tools.is_empty() {
            cmd.arg("--allowedTools").arg(request.allowed_tools.join(","));
        }

        tracing::debug!(model = %request.model, cwd = %request.working_dir.display(), "spawning agent CLI");

        let mut child = cmd
            .spawn()
            .map_err(|e| AgentError::Spawn(e.to_string()))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::Spawn("failed to get stdin handle".into()))?;
        stdin
            .write_all(request.prompt.as_bytes())
            .await
            .map_err(|e| AgentError::Spawn(e.to_string()))?;
        drop(stdin);

        let timeout_duration = Duration::from_secs(request.timeout_secs);
        let wait_result = timeout(timeout_duration, child.wait_with_output()).await;

        let output = match wait_result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(AgentError::Spawn(e.to_string())),
            Err(_) => {
                return Err(AgentError::Timeout {
                    timeout_secs: request.timeout_secs,
                });
            }
        };

        if !output.status.success() {
            return Err(AgentError::NonZeroExit {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let last_line = stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("");
        let envelope: CliEnvelope = serde_json::from_str(last_line)
            .map_err(|e| AgentError::MalformedResponse(e.to_string()))?;

        let raw_text = envelope.result.clone().unwrap_or_default();
        let structured_output = envelope
            .result
            .as_deref()
            .and_then(|r| serde_json::from_str(r).ok());

        Ok(AgentOutcome {
            success: !envelope.is_error,
            raw_text,
            structured_output,
            cost_usd: envelope.total_cost_usd,
            turns: envelope.num_turns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_parses_minimal_json() {
        let raw = r#"{"result":"done","is_error":false,"total_cost_usd":0.42,"num_turns":3}"#;
        let envelope: CliEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.result.as_deref(), Some("done"));
        assert!(!envelope.is_error);
        assert_eq!(envelope.total_cost_usd, 0.42);
        assert_eq!(envelope.num_turns, 3);
    }

    #[test]
    fn envelope_defaults_missing_numeric_fields() {
        let raw = r#"{"result":"done"}"#;
        let envelope: CliEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.total_cost_usd, 0.0);
        assert_eq!(envelope.num_turns, 0);
    }

    #[tokio::test]
    async fn missing_cli_binary_reports_cli_missing() {
        let runner = ClaudeCliAgentRunner::with_config(ClaudeCliConfig {
            binary_path: "definitely-not-a-real-binary-xyz".into(),
        });
        let request = AgentRequest::new("system", "hello", std::env::temp_dir(), "claude-3", 5);
        let err = runner.run(request).await.unwrap_err();
        assert!(matches!(err, AgentError::CliMissing { .. }));
    }
}
