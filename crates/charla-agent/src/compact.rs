//! Tool output compaction.
//!
//! Oversized tool results are compacted in three tiers: JSON-aware canonical
//! field extraction (names and IDs survive byte-exact), an LLM summary when
//! the payload has no structured fit, and character truncation as the last
//! resort.

use charla_llm::{ChatRequest, LlmProvider, Message};
use tracing::debug;

/// Outputs at or below this size pass through untouched.
pub const COMPACT_THRESHOLD_CHARS: usize = 2000;

/// Fields preserved verbatim during JSON extraction.
const CANONICAL_FIELDS: &[&str] = &[
    "name", "id", "title", "url", "summary", "description", "status", "number",
];

/// Compact `raw` if it exceeds the threshold.
pub async fn compact_tool_output(
    raw: &str,
    provider: &dyn LlmProvider,
    summary_model: &str,
) -> String {
    if raw.chars().count() <= COMPACT_THRESHOLD_CHARS {
        return raw.to_string();
    }

    if let Some(extracted) = extract_canonical_json(raw) {
        return extracted;
    }

    // No structured fit - ask the model for a summary that keeps identifiers.
    let req = ChatRequest::new(
        summary_model.to_string(),
        vec![Message::user(format!(
            "Summarise this tool output in under 200 words. Preserve every name, \
             ID, URL, and number exactly as written:\n\n{raw}"
        ))],
    );
    match provider.chat(&req).await {
        Ok(resp) if !resp.text.trim().is_empty() => resp.text,
        _ => {
            debug!("summary compaction failed, falling back to truncation");
            truncate_chars(raw, COMPACT_THRESHOLD_CHARS)
        }
    }
}

/// If `raw` parses as JSON, rebuild it keeping only canonical fields (at any
/// nesting level) with their values bit-exact. Returns `None` when the result
/// carries no information.
pub fn extract_canonical_json(raw: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw.trim()).ok()?;
    let compacted = keep_canonical(&value);
    let out = serde_json::to_string_pretty(&compacted).ok()?;
    if matches!(
        &compacted,
        serde_json::Value::Null | serde_json::Value::Object(_) | serde_json::Value::Array(_)
            if is_empty(&compacted)
    ) {
        return None;
    }
    Some(out)
}

fn is_empty(v: &serde_json::Value) -> bool {
    match v {
        serde_json::Value::Null => true,
        serde_json::Value::Object(m) => m.is_empty(),
        serde_json::Value::Array(a) => a.iter().all(is_empty),
        _ => false,
    }
}

fn keep_canonical(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, v) in map {
                if CANONICAL_FIELDS.contains(&key.as_str()) && !v.is_object() && !v.is_array() {
                    out.insert(key.clone(), v.clone());
                } else if v.is_object() || v.is_array() {
                    let nested = keep_canonical(v);
                    if !is_empty(&nested) {
                        out.insert(key.clone(), nested);
                    }
                }
            }
            serde_json::Value::Object(out)
        }
        // Scalar array elements only matter inside canonical keys, which are
        // copied whole above; here we keep just the structured elements.
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items
                .iter()
                .filter(|v| v.is_object() || v.is_array())
                .map(keep_canonical)
                .filter(|v| !is_empty(v))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    let head: String = s.chars().take(max).collect();
    format!("{head}\n[truncated]")
}
