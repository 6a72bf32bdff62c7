//! Memory tools: remember, search, forget.

use std::sync::Arc;

use async_trait::async_trait;
use charla_store::Store;

use crate::indexer::EmbeddingIndexer;
use crate::tools::{Tool, ToolResult};

pub struct RememberTool {
    pub store: Arc<Store>,
    pub indexer: Arc<EmbeddingIndexer>,
}

#[async_trait]
impl Tool for RememberTool {
    fn name(&self) -> &str {
        "remember_fact"
    }

    fn description(&self) -> &str {
        "Store a fact about the user for future conversations (preferences, \
         projects, people, recurring context)."
    }

    fn category(&self) -> &str {
        "memory"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "The fact to remember." },
                "category": { "type": "string", "description": "Optional category label." }
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let text = match input.get("text").and_then(|v| v.as_str()) {
            Some(t) if !t.trim().is_empty() => t.trim(),
            _ => return ToolResult::error("missing required parameter: text"),
        };
        let category = input.get("category").and_then(|v| v.as_str());

        match self.store.add_memory(text, category) {
            Ok(id) => {
                self.indexer.index_memory(id);
                ToolResult::success(format!("Remembered (memory #{id})."))
            }
            Err(e) => ToolResult::error(format!("failed to save memory: {e}")),
        }
    }
}

pub struct SearchMemoriesTool {
    pub store: Arc<Store>,
    pub indexer: Arc<EmbeddingIndexer>,
}

#[async_trait]
impl Tool for SearchMemoriesTool {
    fn name(&self) -> &str {
        "search_memories"
    }

    fn description(&self) -> &str {
        "Search stored memories about the user by meaning."
    }

    fn category(&self) -> &str {
        "memory"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What to look for." }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let query = match input.get("query").and_then(|v| v.as_str()) {
            Some(q) if !q.trim().is_empty() => q.trim(),
            _ => return ToolResult::error("missing required parameter: query"),
        };

        // Vector search when the embedder is reachable, recency fallback when not.
        let memories = match self.indexer.embed_one(query).await {
            Some(vector) => self
                .store
                .search_similar_memories(&vector, 5)
                .unwrap_or_default(),
            None => self.store.list_active_memories(Some(5)).unwrap_or_default(),
        };

        if memories.is_empty() {
            return ToolResult::success("No matching memories.");
        }
        let lines: Vec<String> = memories
            .iter()
            .map(|m| format!("- [{}] {}", m.id, m.text))
            .collect();
        ToolResult::success(lines.join("\n"))
    }
}

pub struct ForgetTool {
    pub store: Arc<Store>,
}

#[async_trait]
impl Tool for ForgetTool {
    fn name(&self) -> &str {
        "forget_fact"
    }

    fn description(&self) -> &str {
        "Delete a stored memory by its id."
    }

    fn category(&self) -> &str {
        "memory"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "id": { "type": "integer", "description": "Memory id to delete." }
            },
            "required": ["id"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let id = match input.get("id").and_then(|v| v.as_i64()) {
            Some(id) => id,
            None => return ToolResult::error("missing required parameter: id"),
        };
        match self.store.soft_delete_memory(id) {
            Ok(true) => ToolResult::success(format!("Memory #{id} forgotten.")),
            Ok(false) => ToolResult::error(format!("no active memory with id {id}")),
            Err(e) => ToolResult::error(format!("failed to forget: {e}")),
        }
    }
}
