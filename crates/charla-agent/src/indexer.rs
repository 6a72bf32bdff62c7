//! Best-effort embedding indexer.
//!
//! Nothing here is allowed to fail the pipeline: embedding errors degrade to
//! "no vector", indexing runs as tracked background work, and the startup
//! backfill both fills missing vectors and prunes orphans left by soft
//! deletes.

use std::sync::Arc;

use charla_core::tracker::TaskTracker;
use charla_llm::LlmProvider;
use charla_store::types::EmbeddingKind;
use charla_store::Store;
use tracing::{debug, info};

pub struct EmbeddingIndexer {
    store: Arc<Store>,
    provider: Arc<dyn LlmProvider>,
    tracker: TaskTracker,
}

impl EmbeddingIndexer {
    pub fn new(store: Arc<Store>, provider: Arc<dyn LlmProvider>, tracker: TaskTracker) -> Self {
        Self {
            store,
            provider,
            tracker,
        }
    }

    /// Embed one text, or `None` if the embedder is unavailable. Callers
    /// proceed as if no vector existed.
    pub async fn embed_one(&self, text: &str) -> Option<Vec<f32>> {
        match self.provider.embed(&[text.to_string()]).await {
            Ok(mut vectors) if !vectors.is_empty() => Some(vectors.remove(0)),
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, "embedding unavailable");
                None
            }
        }
    }

    /// Fire-and-forget: embed and store the vector for a memory.
    pub fn index_memory(&self, id: i64) {
        let store = Arc::clone(&self.store);
        let provider = Arc::clone(&self.provider);
        self.tracker.spawn("index_memory", async move {
            let Some(memory) = store.get_memory(id).ok().flatten() else {
                return;
            };
            if let Ok(mut vectors) = provider.embed(&[memory.text]).await {
                if let Some(v) = vectors.pop() {
                    let _ = store.put_embedding(EmbeddingKind::Memory, id, &v);
                }
            }
        });
    }

    /// Fire-and-forget: embed and store the vector for a note.
    pub fn index_note(&self, id: i64) {
        let store = Arc::clone(&self.store);
        let provider = Arc::clone(&self.provider);
        self.tracker.spawn("index_note", async move {
            let Some(note) = store.get_note(id).ok().flatten() else {
                return;
            };
            let text = format!("{}\n{}", note.title, note.content);
            if let Ok(mut vectors) = provider.embed(&[text]).await {
                if let Some(v) = vectors.pop() {
                    let _ = store.put_embedding(EmbeddingKind::Note, id, &v);
                }
            }
        });
    }

    pub fn remove(&self, kind: EmbeddingKind, id: i64) {
        let _ = self.store.remove_embedding(kind, id);
    }

    /// Startup pass: drop orphan vectors, then embed every source missing one.
    pub async fn backfill(&self) {
        for id in self.store.orphan_memory_embeddings().unwrap_or_default() {
            let _ = self.store.remove_embedding(EmbeddingKind::Memory, id);
        }

        let missing_memories = self.store.memories_missing_embedding().unwrap_or_default();
        let missing_notes = self.store.notes_missing_embedding().unwrap_or_default();
        if missing_memories.is_empty() && missing_notes.is_empty() {
            return;
        }
        info!(
            memories = missing_memories.len(),
            notes = missing_notes.len(),
            "embedding backfill started"
        );

        for id in missing_memories {
            if let Some(memory) = self.store.get_memory(id).ok().flatten() {
                if let Some(v) = self.embed_one(&memory.text).await {
                    let _ = self.store.put_embedding(EmbeddingKind::Memory, id, &v);
                }
            }
        }
        for id in missing_notes {
            if let Some(note) = self.store.get_note(id).ok().flatten() {
                let text = format!("{}\n{}", note.title, note.content);
                if let Some(v) = self.embed_one(&text).await {
                    let _ = self.store.put_embedding(EmbeddingKind::Note, id, &v);
                }
            }
        }
        info!("embedding backfill finished");
    }
}
