//! External tool-server tools (MCP-style).
//!
//! A JSON manifest at `<data_dir>/tool_servers.json` declares remote tools:
//!
//! ```json
//! [{
//!   "endpoint": "http://localhost:8900",
//!   "tools": [{
//!     "name": "jira_search",
//!     "description": "Search Jira issues",
//!     "category": "projects",
//!     "input_schema": {"type": "object", "properties": {"query": {"type": "string"}}}
//!   }]
//! }]
//! ```
//!
//! Invocation is a POST to `{endpoint}/call` with `{"tool": name, "args": …}`;
//! the body comes back as the tool's text result.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{Tool, ToolResult};

#[derive(Debug, Clone, Deserialize)]
pub struct ServerManifest {
    pub endpoint: String,
    pub tools: Vec<ServerToolDecl>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerToolDecl {
    pub name: String,
    pub description: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_schema")]
    pub input_schema: serde_json::Value,
}

fn default_category() -> String {
    "external".to_string()
}

fn default_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object" })
}

/// Load all tool-server manifests; a missing or invalid file is an empty set.
pub fn load_server_tools(data_dir: &str) -> Vec<Arc<dyn Tool>> {
    let path = Path::new(data_dir).join("tool_servers.json");
    let raw = match std::fs::read_to_string(&path) {
        Ok(r) => r,
        Err(_) => return Vec::new(),
    };
    let manifests: Vec<ServerManifest> = match serde_json::from_str(&raw) {
        Ok(m) => m,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "tool server manifest invalid");
            return Vec::new();
        }
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .unwrap_or_default();

    let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
    for manifest in manifests {
        for decl in &manifest.tools {
            debug!(tool = %decl.name, endpoint = %manifest.endpoint, "tool server tool loaded");
            tools.push(Arc::new(ServerTool {
                decl: decl.clone(),
                endpoint: manifest.endpoint.clone(),
                client: client.clone(),
            }));
        }
    }
    tools
}

struct ServerTool {
    decl: ServerToolDecl,
    endpoint: String,
    client: reqwest::Client,
}

#[async_trait]
impl Tool for ServerTool {
    fn name(&self) -> &str {
        &self.decl.name
    }

    fn description(&self) -> &str {
        &self.decl.description
    }

    fn category(&self) -> &str {
        &self.decl.category
    }

    fn input_schema(&self) -> serde_json::Value {
        self.decl.input_schema.clone()
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let body = serde_json::json!({ "tool": self.decl.name, "args": input });
        let resp = self
            .client
            .post(format!("{}/call", self.endpoint))
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(r) if r.status().is_success() => {
                ToolResult::success(r.text().await.unwrap_or_default())
            }
            Ok(r) => ToolResult::error(format!("tool server returned {}", r.status())),
            Err(e) => ToolResult::error(format!("tool server unreachable: {e}")),
        }
    }
}
