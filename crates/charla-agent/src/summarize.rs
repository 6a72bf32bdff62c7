//! Background conversation maintenance: summaries and memory extraction.
//!
//! Both run as fire-and-forget work after a turn completes. Failures are
//! logged and dropped - the next turn simply tries again.

use std::sync::Arc;

use charla_llm::{ChatRequest, LlmProvider, Message};
use charla_store::Store;
use tracing::{info, warn};

use crate::indexer::EmbeddingIndexer;

/// Oldest turns folded into one summary batch.
const SUMMARY_BATCH: usize = 40;

/// Produce a fresh summary once the unsummarised tail crosses the threshold.
pub async fn maybe_summarize(
    store: &Store,
    provider: &dyn LlmProvider,
    model: &str,
    conversation_id: i64,
    threshold: usize,
) {
    let pending = match store.unsummarised_count(conversation_id) {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, "summarise: count failed");
            return;
        }
    };
    if (pending as usize) < threshold {
        return;
    }

    let total = store.count_messages(conversation_id).unwrap_or(0);
    let messages = store
        .get_recent_messages(conversation_id, SUMMARY_BATCH)
        .unwrap_or_default();
    if messages.is_empty() {
        return;
    }

    let previous = store
        .latest_summary(conversation_id)
        .ok()
        .flatten()
        .map(|s| s.text)
        .unwrap_or_default();

    let transcript: String = messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.text))
        .collect::<Vec<_>>()
        .join("\n");

    let mut prompt = String::new();
    if !previous.is_empty() {
        prompt.push_str(&format!("Previous summary:\n{previous}\n\n"));
    }
    prompt.push_str(&format!(
        "Summarise this conversation in under 150 words, keeping names, dates, \
         and open tasks:\n\n{transcript}"
    ));

    let req = ChatRequest::new(model.to_string(), vec![Message::user(prompt)]);
    match provider.chat(&req).await {
        Ok(resp) if !resp.text.trim().is_empty() => {
            if let Err(e) = store.write_summary(conversation_id, resp.text.trim(), total) {
                warn!(error = %e, "summarise: write failed");
            } else {
                info!(conversation_id, covered = total, "conversation summarised");
            }
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "summarise: LLM call failed"),
    }
}

/// Extract memorable facts from the recent turns into long-term memories.
/// The model returns a JSON array of strings; anything unparseable is dropped.
pub async fn maybe_extract_memories(
    store: &Arc<Store>,
    provider: &dyn LlmProvider,
    model: &str,
    indexer: &EmbeddingIndexer,
    conversation_id: i64,
) {
    let messages = store
        .get_recent_messages(conversation_id, 6)
        .unwrap_or_default();
    if messages.is_empty() {
        return;
    }
    let transcript: String = messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.text))
        .collect::<Vec<_>>()
        .join("\n");

    let req = ChatRequest::new(
        model.to_string(),
        vec![Message::user(format!(
            "Extract durable facts about the USER from these turns (preferences, \
             projects, people, instructions). Return ONLY a JSON array of short \
             strings, [] if nothing is worth keeping:\n\n{transcript}"
        ))],
    );

    let resp = match provider.chat(&req).await {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "memory extraction call failed");
            return;
        }
    };

    // The array may be wrapped in prose or a code fence.
    let raw = resp.text.trim();
    let json_str = match (raw.find('['), raw.rfind(']')) {
        (Some(s), Some(e)) if e >= s => &raw[s..=e],
        _ => return,
    };
    let facts: Vec<String> = match serde_json::from_str(json_str) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "memory extraction parse failed");
            return;
        }
    };

    let existing: Vec<String> = store
        .list_active_memories(None)
        .unwrap_or_default()
        .into_iter()
        .map(|m| m.text)
        .collect();

    for fact in facts.into_iter().take(10) {
        let fact = fact.trim().to_string();
        if fact.is_empty() || existing.iter().any(|m| m == &fact) {
            continue;
        }
        match store.add_memory(&fact, None) {
            Ok(id) => indexer.index_memory(id),
            Err(e) => warn!(error = %e, "memory extraction save failed"),
        }
    }
}
