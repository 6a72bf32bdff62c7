//! Tool: fetch_url - retrieve a web page as text.

use async_trait::async_trait;

use crate::tools::{Tool, ToolResult};

/// Maximum characters returned to avoid flooding the context window.
const MAX_OUTPUT_CHARS: usize = 10_000;

pub struct FetchUrlTool {
    client: reqwest::Client,
}

impl FetchUrlTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(20))
                .user_agent("charla/0.2")
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for FetchUrlTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FetchUrlTool {
    fn name(&self) -> &str {
        "fetch_url"
    }

    fn description(&self) -> &str {
        "Fetch the contents of a URL (http/https) and return the body as text."
    }

    fn category(&self) -> &str {
        "fetch"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "The URL to fetch." }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let url = match input.get("url").and_then(|v| v.as_str()) {
            Some(u) if u.starts_with("http://") || u.starts_with("https://") => u,
            Some(u) => return ToolResult::error(format!("unsupported URL scheme: {u}")),
            None => return ToolResult::error("missing required parameter: url"),
        };

        let resp = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("fetch failed: {e}")),
        };
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            return ToolResult::error(format!("HTTP {status}: {}", truncate(&body, 500)));
        }
        ToolResult::success(truncate(&body, MAX_OUTPUT_CHARS))
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{head}\n\n[output truncated at {max} characters]")
    }
}
