//! Tool: run_command - shell command execution behind the command sub-policy.
//!
//! The command never goes through a shell: the string is split into program +
//! args and spawned directly, stdin wired to null, cwd pinned to the projects
//! root, runtime bounded, and output truncated to the last 4K characters.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use charla_security::{validate_command, ShellDecision};
use tokio::process::Command;

use crate::tools::{Tool, ToolResult};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_OUTPUT_CHARS: usize = 4096;

pub struct RunCommandTool {
    pub allowlist: Vec<String>,
    pub root: PathBuf,
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Run a read-only shell command in the projects directory. Destructive \
         commands are blocked; anything not on the allowlist needs approval."
    }

    fn category(&self) -> &str {
        "shell"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "The command line to run." }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let command = match input.get("command").and_then(|v| v.as_str()) {
            Some(c) if !c.trim().is_empty() => c.trim(),
            _ => return ToolResult::error("missing required parameter: command"),
        };

        // Ask-level commands were resolved by the executor's gate before this
        // point; only the hard denylist is enforced here.
        if let ShellDecision::Deny { reason } = validate_command(command, &self.allowlist) {
            return ToolResult::error(format!("Command blocked: {reason}"));
        }

        // No shell: split into program + args. Quoted arguments are not
        // supported; commands needing them fail the operator scan first.
        let mut parts = command.split_whitespace();
        let program = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();

        let child = Command::new(program)
            .args(&args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(COMMAND_TIMEOUT, child).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => return ToolResult::error(format!("failed to run '{program}': {e}")),
            Err(_) => {
                return ToolResult::error(format!(
                    "command timed out after {}s",
                    COMMAND_TIMEOUT.as_secs()
                ))
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            combined.push_str("\n[stderr]\n");
            combined.push_str(&stderr);
        }
        let text = charla_security::shell::truncate_output_tail(&combined, MAX_OUTPUT_CHARS);

        if output.status.success() {
            ToolResult::success(if text.trim().is_empty() {
                "(no output)".to_string()
            } else {
                text
            })
        } else {
            ToolResult::error(format!("exit status {}\n{text}", output.status))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(dir: &std::path::Path) -> RunCommandTool {
        RunCommandTool {
            allowlist: vec!["echo".to_string(), "ls".to_string()],
            root: dir.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn denied_command_reports_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let result = tool(dir.path())
            .execute(serde_json::json!({"command": "rm -rf /"}))
            .await;
        assert!(result.is_error);
        assert!(result.content.starts_with("Command blocked:"));
    }

    #[tokio::test]
    async fn allowlisted_command_runs_in_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "x").unwrap();
        let result = tool(dir.path())
            .execute(serde_json::json!({"command": "ls"}))
            .await;
        assert!(!result.is_error, "{}", result.content);
        assert!(result.content.contains("f.txt"));
    }
}
