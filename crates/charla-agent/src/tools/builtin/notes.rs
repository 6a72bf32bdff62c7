//! Note tools: save and semantic search.

use std::sync::Arc;

use async_trait::async_trait;
use charla_store::Store;

use crate::indexer::EmbeddingIndexer;
use crate::tools::{Tool, ToolResult};

pub struct SaveNoteTool {
    pub store: Arc<Store>,
    pub indexer: Arc<EmbeddingIndexer>,
}

#[async_trait]
impl Tool for SaveNoteTool {
    fn name(&self) -> &str {
        "save_note"
    }

    fn description(&self) -> &str {
        "Save a titled note for the user (meeting notes, ideas, links)."
    }

    fn category(&self) -> &str {
        "notes"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["title", "content"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let title = input.get("title").and_then(|v| v.as_str()).unwrap_or("");
        let content = input.get("content").and_then(|v| v.as_str()).unwrap_or("");
        if title.is_empty() || content.is_empty() {
            return ToolResult::error("both 'title' and 'content' are required");
        }
        match self.store.add_note(title, content) {
            Ok(id) => {
                self.indexer.index_note(id);
                ToolResult::success(format!("Note #{id} saved: {title}"))
            }
            Err(e) => ToolResult::error(format!("failed to save note: {e}")),
        }
    }
}

pub struct SearchNotesTool {
    pub store: Arc<Store>,
    pub indexer: Arc<EmbeddingIndexer>,
}

#[async_trait]
impl Tool for SearchNotesTool {
    fn name(&self) -> &str {
        "search_notes"
    }

    fn description(&self) -> &str {
        "Search the user's notes by meaning and return the closest matches."
    }

    fn category(&self) -> &str {
        "notes"
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

        let notes = match self.indexer.embed_one(query).await {
            Some(vector) => self
                .store
                .search_similar_notes(&vector, 5)
                .unwrap_or_default()
                .into_iter()
                .map(|(n, _)| n)
                .collect(),
            None => self.store.list_notes(5).unwrap_or_default(),
        };

        if notes.is_empty() {
            return ToolResult::success("No matching notes.");
        }
        let lines: Vec<String> = notes
            .iter()
            .map(|n| {
                let preview: String = n.content.chars().take(160).collect();
                format!("- [{}] {}: {preview}", n.id, n.title)
            })
            .collect();
        ToolResult::success(lines.join("\n"))
    }
}
