//! Run command tool: execute an allowlisted command in the workspace.
//!
//! The command runs through `sh -c` with the workspace as its working
//! directory. Only commands whose first word is allowlisted may run, and
//! chaining operators are refused so the allowlist cannot be sidestepped.
//! The child is killed when the request is cancelled or times out.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use stepwise_core::error::ToolError;
use stepwise_core::tool::{Tool, ToolContext, ToolResult};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::truncate_output;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const FORBIDDEN_SEQUENCES: &[&str] = &[";", "&", "|", "`", "$(", ">", "<", "\n"];

pub struct RunCommandTool {
    /// Only these commands are allowed. Empty = deny all.
    allowed_commands: Vec<String>,
    max_output_chars: usize,
    timeout: Duration,
}

impl RunCommandTool {
    pub fn new(allowed_commands: Vec<String>, max_output_chars: usize) -> Self {
        Self {
            allowed_commands,
            max_output_chars,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn check_command(&self, command: &str) -> Result<(), String> {
        if let Some(seq) = FORBIDDEN_SEQUENCES.iter().find(|s| command.contains(**s)) {
            return Err(format!("'{}' is not permitted in commands", seq.escape_debug()));
        }

        let base_cmd = command.split_whitespace().next().unwrap_or("");
        if self.allowed_commands.iter().any(|a| a == base_cmd) {
            Ok(())
        } else {
            Err(format!("Command '{base_cmd}' not in allowlist"))
        }
    }

    fn permission_denied(&self, reason: String) -> ToolError {
        ToolError::PermissionDenied {
            tool_name: self.name().into(),
            reason,
        }
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Run a single allowlisted command in the workspace root and return its exit code, stdout and stderr."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": format!(
                        "The command line to run. Allowed commands: {}",
                        self.allowed_commands.join(", ")
                    )
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(
        &self,
        input: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let command = input["command"]
            .as_str()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'command' argument".into()))?;

        self.check_command(command)
            .map_err(|reason| self.permission_denied(reason))?;

        debug!(command = %command, "Executing command");

        let child = Command::new("sh")
            .args(["-c", command])
            .current_dir(&ctx.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: e.to_string(),
            })?;

        // Dropping the wait future drops the child, which kills it
        let output = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                return Err(ToolError::Cancelled(self.name().into()));
            }
            _ = tokio::time::sleep(self.timeout) => {
                return Err(ToolError::Timeout {
                    tool_name: self.name().into(),
                    timeout_secs: self.timeout.as_secs(),
                });
            }
            output = child.wait_with_output() => output.map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: e.to_string(),
            })?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let code = output.status.code().unwrap_or(-1);

        let mut text = stdout.trim_end().to_string();
        if !stderr.trim().is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str("[stderr]: ");
            text.push_str(stderr.trim_end());
        }
        let (text, truncated) = truncate_output(&text, self.max_output_chars);

        let result = if output.status.success() {
            ToolResult::success(text)
        } else {
            warn!(command = %command, exit_code = code, "Command failed");
            ToolResult {
                ok: false,
                output: text,
                error: Some(format!("Command exited with code {code}")),
                metadata: None,
            }
        };

        Ok(result
            .with_metadata("exit_code", code.into())
            .with_metadata("truncated", truncated.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_core::CancellationToken;

    fn tool() -> RunCommandTool {
        RunCommandTool::new(
            vec!["echo".into(), "ls".into(), "sleep".into(), "cat".into()],
            10_000,
        )
    }

    fn ctx(dir: &tempfile::TempDir) -> ToolContext {
        ToolContext::new(CancellationToken::new(), dir.path())
    }

    #[test]
    fn allowlist_check() {
        let tool = tool();
        assert!(tool.check_command("ls -la").is_ok());
        assert!(tool.check_command("echo hi").is_ok());
        assert!(tool.check_command("rm -rf /").is_err());
        assert!(tool.check_command("sudo ls").is_err());
    }

    #[test]
    fn chaining_rejected() {
        let tool = tool();
        assert!(tool.check_command("ls; rm -rf /").is_err());
        assert!(tool.check_command("echo hi && rm x").is_err());
        assert!(tool.check_command("cat x | sh").is_err());
        assert!(tool.check_command("echo $(whoami)").is_err());
        assert!(tool.check_command("echo hi > file").is_err());
    }

    #[test]
    fn empty_allowlist_denies_all() {
        let tool = RunCommandTool::new(vec![], 100);
        assert!(tool.check_command("echo hi").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn execute_echo() {
        let dir = tempfile::tempdir().unwrap();
        let result = tool()
            .execute(serde_json::json!({"command": "echo hello"}), &ctx(&dir))
            .await
            .unwrap();
        assert!(result.ok);
        assert_eq!(result.output, "hello");
        assert_eq!(result.metadata.unwrap()["exit_code"], 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let result = tool()
            .execute(serde_json::json!({"command": "ls"}), &ctx(&dir))
            .await
            .unwrap();
        assert!(result.output.contains("marker.txt"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_failed_result() {
        let dir = tempfile::tempdir().unwrap();
        let result = tool()
            .execute(serde_json::json!({"command": "cat missing.txt"}), &ctx(&dir))
            .await
            .unwrap();
        assert!(!result.ok);
        assert!(result.output.contains("[stderr]"));
        assert!(result.error.unwrap().contains("exited with code"));
    }

    #[tokio::test]
    async fn blocked_command() {
        let dir = tempfile::tempdir().unwrap();
        let result = tool()
            .execute(serde_json::json!({"command": "rm -rf /"}), &ctx(&dir))
            .await;
        assert!(matches!(result, Err(ToolError::PermissionDenied { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancel_kills_command() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(&dir);
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let started = std::time::Instant::now();
        let result = tool()
            .execute(serde_json::json!({"command": "sleep 30"}), &ctx)
            .await;
        assert!(matches!(result, Err(ToolError::Cancelled(_))));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_command() {
        let dir = tempfile::tempdir().unwrap();
        let result = tool()
            .with_timeout(Duration::from_millis(100))
            .execute(serde_json::json!({"command": "sleep 30"}), &ctx(&dir))
            .await;
        assert!(matches!(result, Err(ToolError::Timeout { .. })));
    }
}
