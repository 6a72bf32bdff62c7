//! Tool: web_search - Brave Search API lookup.

use async_trait::async_trait;

use crate::tools::{Tool, ToolResult};

const API_URL: &str = "https://api.search.brave.com/res/v1/web/search";

pub struct WebSearchTool {
    client: reqwest::Client,
}

impl WebSearchTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web and return the top results with titles, URLs, and snippets."
    }

    fn category(&self) -> &str {
        "search"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let query = match input.get("query").and_then(|v| v.as_str()) {
            Some(q) if !q.trim().is_empty() => q.trim(),
            _ => return ToolResult::error("missing required parameter: query"),
        };
        let Some(key) = std::env::var("BRAVE_API_KEY").ok().filter(|k| !k.is_empty()) else {
            return ToolResult::error("BRAVE_API_KEY is not set");
        };

        let resp = self
            .client
            .get(API_URL)
            .query(&[("q", query), ("count", "5")])
            .header("X-Subscription-Token", key)
            .header("Accept", "application/json")
            .send()
            .await;

        match resp {
            Ok(r) if r.status().is_success() => {
                let json: serde_json::Value = r.json().await.unwrap_or_default();
                let results = json
                    .pointer("/web/results")
                    .and_then(|v| v.as_array())
                    .cloned()
                    .unwrap_or_default();
                if results.is_empty() {
                    return ToolResult::success("No results.");
                }
                let lines: Vec<String> = results
                    .iter()
                    .map(|r| {
                        format!(
                            "- {} — {}\n  {}",
                            r.get("title").and_then(|v| v.as_str()).unwrap_or("?"),
                            r.get("url").and_then(|v| v.as_str()).unwrap_or(""),
                            r.get("description").and_then(|v| v.as_str()).unwrap_or("")
                        )
                    })
                    .collect();
                ToolResult::success(lines.join("\n"))
            }
            Ok(r) => ToolResult::error(format!("search API {}", r.status())),
            Err(e) => ToolResult::error(format!("request failed: {e}")),
        }
    }
}
