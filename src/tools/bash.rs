use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::timeout;

use super::{PathGuard, Tool, parse_input};
use crate::config::ToolLimits;
use crate::errors::ToolError;
use crate::llm::ToolDefinition;
use crate::util::truncate_output;

#[derive(Debug, Deserialize)]
pub struct BashInput {
    pub command: String,
    /// Milliseconds.
    pub timeout: Option<u64>,
}

/// Worker variables the agent's shell may see. Everything else, the
/// credential master key included, is withheld.
const PASSTHROUGH_ENV: &[&str] = &["PATH", "HOME", "LANG", "TERM", "USER", "TMPDIR"];

pub struct BashTool {
    guard: Arc<PathGuard>,
    default_timeout: Duration,
    byte_cap: u64,
    char_limit: usize,
    env: Vec<(String, String)>,
}

/// Keep only allowlisted variables from `vars`.
fn passthrough_env(vars: impl IntoIterator<Item = (String, String)>) -> Vec<(String, String)> {
    vars.into_iter()
        .filter(|(key, _)| PASSTHROUGH_ENV.contains(&key.as_str()))
        .collect()
}

/// Read at most `cap` bytes, then drain the rest so the child never blocks
/// on a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, cap: u64) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    (&mut reader).take(cap).read_to_end(&mut buf).await?;
    tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
    Ok(buf)
}

impl BashTool {
    pub fn new(guard: Arc<PathGuard>, limits: &ToolLimits) -> Self {
        Self::with_env(guard, limits, std::env::vars())
    }

    /// Build the tool over an explicit parent environment, filtered
    /// through the allowlist.
    pub fn with_env(
        guard: Arc<PathGuard>,
        limits: &ToolLimits,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        Self {
            guard,
            default_timeout: limits.bash_timeout(),
            byte_cap: limits.output_byte_cap,
            char_limit: limits.output_char_limit,
            env: passthrough_env(vars),
        }
    }

    pub async fn run(&self, input: BashInput) -> Result<String, ToolError> {
        let limit = input
            .timeout
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);

        tracing::debug!(command = %input.command, timeout_ms = limit.as_millis() as u64, "bash tool");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&input.command)
            .current_dir(self.guard.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_clear()
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let cap = self.byte_cap;
        let run = async {
            let out = async {
                match stdout {
                    Some(s) => read_capped(s, cap).await,
                    None => Ok(Vec::new()),
                }
            };
            let err = async {
                match stderr {
                    Some(s) => read_capped(s, cap).await,
                    None => Ok(Vec::new()),
                }
            };
            tokio::try_join!(out, err, child.wait())
        };

        let (out, err, status) = match timeout(limit, run).await {
            Ok(result) => result?,
            Err(_) => {
                let _ = child.kill().await;
                return Err(ToolError::Timeout {
                    millis: limit.as_millis() as u64,
                });
            }
        };

        let mut text = String::from_utf8_lossy(&out).into_owned();
        let stderr_text = String::from_utf8_lossy(&err);
        if !stderr_text.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr_text);
        }
        let text = truncate_output(&text, self.char_limit);

        if !status.success() {
            return Err(ToolError::CommandFailed {
                exit_code: status.code().unwrap_or(-1),
                output: text,
            });
        }
        if text.trim().is_empty() {
            return Ok("(no output)".to_string());
        }
        Ok(text)
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &'static str {
        "bash"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: format!(
                "Run a shell command in the repository root. Times out after {}s unless a \
                 timeout (milliseconds) is given. Long output is truncated.",
                self.default_timeout.as_secs()
            ),
            parameters: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "Shell command to execute"},
                    "timeout": {"type": "integer", "description": "Timeout in milliseconds"}
                },
                "required": ["command"]
            }),
        }
    }

    async fn execute(&self, input: serde_json::Value) -> Result<String, ToolError> {
        self.run(parse_input(self.name(), input)?).await
    }
}
