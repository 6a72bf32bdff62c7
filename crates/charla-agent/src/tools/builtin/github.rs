//! GitHub tools - issue creation and listing against the REST API.
//!
//! Authentication comes from the GITHUB_TOKEN environment variable; without it
//! the tools refuse with a clear message instead of making anonymous writes.

use async_trait::async_trait;

use crate::tools::{Tool, ToolResult};

const API_BASE: &str = "https://api.github.com";

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(20))
        .user_agent("charla/0.2")
        .build()
        .unwrap_or_default()
}

fn token() -> Option<String> {
    std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty())
}

pub struct CreateIssueTool {
    client: reqwest::Client,
}

impl CreateIssueTool {
    pub fn new() -> Self {
        Self { client: client() }
    }
}

impl Default for CreateIssueTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for CreateIssueTool {
    fn name(&self) -> &str {
        "create_github_issue"
    }

    fn description(&self) -> &str {
        "Create an issue in a GitHub repository (owner/repo)."
    }

    fn category(&self) -> &str {
        "github"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "repo": { "type": "string", "description": "owner/repo" },
                "title": { "type": "string" },
                "body": { "type": "string" }
            },
            "required": ["repo", "title"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let Some(token) = token() else {
            return ToolResult::error("GITHUB_TOKEN is not set");
        };
        let repo = match input.get("repo").and_then(|v| v.as_str()) {
            Some(r) if r.contains('/') => r,
            _ => return ToolResult::error("'repo' must be in owner/repo form"),
        };
        let title = match input.get("title").and_then(|v| v.as_str()) {
            Some(t) if !t.trim().is_empty() => t,
            _ => return ToolResult::error("missing required parameter: title"),
        };
        let body = input.get("body").and_then(|v| v.as_str()).unwrap_or("");

        let resp = self
            .client
            .post(format!("{API_BASE}/repos/{repo}/issues"))
            .bearer_auth(token)
            .json(&serde_json::json!({ "title": title, "body": body }))
            .send()
            .await;

        match resp {
            Ok(r) if r.status().is_success() => {
                let json: serde_json::Value = r.json().await.unwrap_or_default();
                let number = json.get("number").and_then(|v| v.as_i64()).unwrap_or(0);
                let url = json.get("html_url").and_then(|v| v.as_str()).unwrap_or("");
                ToolResult::success(format!("Created issue #{number}: {url}"))
            }
            Ok(r) => {
                let status = r.status();
                let text = r.text().await.unwrap_or_default();
                ToolResult::error(format!("GitHub API {status}: {text}"))
            }
            Err(e) => ToolResult::error(format!("request failed: {e}")),
        }
    }
}

pub struct ListIssuesTool {
    client: reqwest::Client,
}

impl ListIssuesTool {
    pub fn new() -> Self {
        Self { client: client() }
    }
}

impl Default for ListIssuesTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ListIssuesTool {
    fn name(&self) -> &str {
        "list_github_issues"
    }

    fn description(&self) -> &str {
        "List open issues in a GitHub repository (owner/repo)."
    }

    fn category(&self) -> &str {
        "github"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "repo": { "type": "string", "description": "owner/repo" }
            },
            "required": ["repo"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let repo = match input.get("repo").and_then(|v| v.as_str()) {
            Some(r) if r.contains('/') => r,
            _ => return ToolResult::error("'repo' must be in owner/repo form"),
        };

        let mut req = self
            .client
            .get(format!("{API_BASE}/repos/{repo}/issues?state=open&per_page=10"));
        if let Some(token) = token() {
            req = req.bearer_auth(token);
        }

        match req.send().await {
            Ok(r) if r.status().is_success() => {
                let issues: Vec<serde_json::Value> = r.json().await.unwrap_or_default();
                if issues.is_empty() {
                    return ToolResult::success("No open issues.");
                }
                let lines: Vec<String> = issues
                    .iter()
                    .map(|i| {
                        format!(
                            "#{} {}",
                            i.get("number").and_then(|v| v.as_i64()).unwrap_or(0),
                            i.get("title").and_then(|v| v.as_str()).unwrap_or("?")
                        )
                    })
                    .collect();
                ToolResult::success(lines.join("\n"))
            }
            Ok(r) => ToolResult::error(format!("GitHub API {}", r.status())),
            Err(e) => ToolResult::error(format!("request failed: {e}")),
        }
    }
}
