//! Tool system for LLM tool calling.
//!
//! Every tool declares a category so the router can map classified intents to
//! a bounded tool subset. The meta-tool `request_more_tools` has no handler
//! here - the executor resolves it inline against the registry.

pub mod builtin;
pub mod registry;
pub mod server;
pub mod skill;

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use charla_llm::ToolDefinition;

/// Name of the meta-tool the executor handles inline.
pub const META_TOOL: &str = "request_more_tools";

/// Result of executing a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Text content returned to the LLM.
    pub content: String,
    /// Whether the tool execution failed.
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
        }
    }
}

/// Trait that all tools implement.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name (e.g. "search_memories").
    fn name(&self) -> &str;
    /// Human-readable description shown to the LLM.
    fn description(&self) -> &str;
    /// Intent category this tool belongs to.
    fn category(&self) -> &str;
    /// JSON Schema for the tool's input parameters.
    fn input_schema(&self) -> serde_json::Value;
    /// Execute the tool with the given input.
    async fn execute(&self, input: serde_json::Value) -> ToolResult;
}

/// Convert a slice of tools to API-level tool definitions.
pub fn to_definitions(tools: &[std::sync::Arc<dyn Tool>]) -> Vec<ToolDefinition> {
    tools
        .iter()
        .map(|t| ToolDefinition {
            name: t.name().to_string(),
            description: t.description().to_string(),
            input_schema: t.input_schema(),
        })
        .collect()
}

/// Definition of the meta-tool, prepended to every selected tool set.
pub fn meta_tool_definition() -> ToolDefinition {
    ToolDefinition {
        name: META_TOOL.to_string(),
        description: "Request additional tools from named categories when the currently \
                      available tools are not enough to complete the task."
            .to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "categories": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Category names to load tools from."
                },
                "reason": {
                    "type": "string",
                    "description": "Why the extra tools are needed."
                }
            },
            "required": ["categories"]
        }),
    }
}

/// The caller identity visible to tools that need it (reminders, projects).
/// Single-writer: the orchestrator sets it at the start of each pipeline run.
pub struct CurrentPrincipal {
    inner: Mutex<Option<String>>,
}

impl CurrentPrincipal {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    pub fn set(&self, principal: &str) {
        *self.inner.lock().unwrap() = Some(principal.to_string());
    }

    pub fn get(&self) -> Option<String> {
        self.inner.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        *self.inner.lock().unwrap() = None;
    }
}

impl Default for CurrentPrincipal {
    fn default() -> Self {
        Self::new()
    }
}
