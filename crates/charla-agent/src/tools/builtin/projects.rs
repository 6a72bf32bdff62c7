//! Project tools - directory listing and summary under the projects root.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::tools::{Tool, ToolResult};

pub struct ListProjectsTool {
    pub root: PathBuf,
}

#[async_trait]
impl Tool for ListProjectsTool {
    fn name(&self) -> &str {
        "list_projects"
    }

    fn description(&self) -> &str {
        "List the user's projects (top-level directories under the projects root)."
    }

    fn category(&self) -> &str {
        "projects"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _input: serde_json::Value) -> ToolResult {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(e) => e,
            Err(e) => return ToolResult::error(format!("failed to list projects: {e}")),
        };
        let mut names = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                let name = entry.file_name().to_string_lossy().to_string();
                if !name.starts_with('.') {
                    names.push(name);
                }
            }
        }
        names.sort();
        if names.is_empty() {
            ToolResult::success("No projects found.")
        } else {
            ToolResult::success(names.join("\n"))
        }
    }
}

pub struct ProjectSummaryTool {
    pub root: PathBuf,
}

#[async_trait]
impl Tool for ProjectSummaryTool {
    fn name(&self) -> &str {
        "project_summary"
    }

    fn description(&self) -> &str {
        "Read a project's PROJECT.md or README.md to summarise its state."
    }

    fn category(&self) -> &str {
        "projects"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "project": { "type": "string", "description": "Project directory name." }
            },
            "required": ["project"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let project = match input.get("project").and_then(|v| v.as_str()) {
            Some(p) if !p.contains("..") && !p.contains('/') => p,
            Some(_) => return ToolResult::error("project must be a plain directory name"),
            None => return ToolResult::error("missing required parameter: project"),
        };
        let dir = self.root.join(project);
        for candidate in ["PROJECT.md", "README.md"] {
            if let Ok(content) = tokio::fs::read_to_string(dir.join(candidate)).await {
                let head: String = content.chars().take(4000).collect();
                return ToolResult::success(format!("# {project} ({candidate})\n\n{head}"));
            }
        }
        ToolResult::error(format!("no PROJECT.md or README.md in '{project}'"))
    }
}
