//! File tools scoped to the projects root.
//!
//! All paths resolve under the configured root; traversal outside it is
//! rejected before any filesystem access.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::tools::{Tool, ToolResult};

/// Maximum characters returned by read_file.
const MAX_OUTPUT_CHARS: usize = 30_000;

/// Resolve `relative` under `root`, rejecting absolute paths and `..`.
fn resolve(root: &Path, relative: &str) -> Result<PathBuf, String> {
    let rel = Path::new(relative);
    if rel.is_absolute() {
        return Err("absolute paths are not allowed".to_string());
    }
    if rel
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err("path may not contain '..'".to_string());
    }
    Ok(root.join(rel))
}

pub struct ReadFileTool {
    pub root: PathBuf,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file inside the projects directory."
    }

    fn category(&self) -> &str {
        "files"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the projects root." }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let path = match input.get("path").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolResult::error("missing required parameter: path"),
        };
        let full = match resolve(&self.root, path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        match tokio::fs::read_to_string(&full).await {
            Ok(content) => {
                if content.chars().count() > MAX_OUTPUT_CHARS {
                    let head: String = content.chars().take(MAX_OUTPUT_CHARS).collect();
                    ToolResult::success(format!(
                        "{head}\n\n[output truncated at {MAX_OUTPUT_CHARS} characters]"
                    ))
                } else {
                    ToolResult::success(content)
                }
            }
            Err(e) => ToolResult::error(format!("failed to read '{path}': {e}")),
        }
    }
}

pub struct WriteFileTool {
    pub root: PathBuf,
    /// Gated by `agent.write_enabled`; a disabled tool refuses politely.
    pub enabled: bool,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file inside the projects directory, creating parent \
         directories as needed."
    }

    fn category(&self) -> &str {
        "files"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        if !self.enabled {
            return ToolResult::error("file writing is disabled (agent.write_enabled = false)");
        }
        let path = match input.get("path").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolResult::error("missing required parameter: path"),
        };
        let content = input.get("content").and_then(|v| v.as_str()).unwrap_or("");
        let full = match resolve(&self.root, path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        if let Some(parent) = full.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolResult::error(format!("failed to create directories: {e}"));
            }
        }
        match tokio::fs::write(&full, content).await {
            Ok(()) => ToolResult::success(format!("Wrote {} bytes to {path}", content.len())),
            Err(e) => ToolResult::error(format!("failed to write '{path}': {e}")),
        }
    }
}

pub struct ListFilesTool {
    pub root: PathBuf,
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files and directories inside the projects directory."
    }

    fn category(&self) -> &str {
        "files"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Subdirectory to list (default: root)." }
            }
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let rel = input.get("path").and_then(|v| v.as_str()).unwrap_or("");
        let full = match resolve(&self.root, rel) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        let mut entries = match tokio::fs::read_dir(&full).await {
            Ok(e) => e,
            Err(e) => return ToolResult::error(format!("failed to list '{rel}': {e}")),
        };
        let mut lines = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            let suffix = match entry.file_type().await {
                Ok(t) if t.is_dir() => "/",
                _ => "",
            };
            lines.push(format!("{name}{suffix}"));
        }
        lines.sort();
        if lines.is_empty() {
            ToolResult::success("(empty)")
        } else {
            ToolResult::success(lines.join("\n"))
        }
    }
}
