//! Intent classification: one short generation mapping the message to tool
//! categories.
//!
//! The classifier never crashes the pipeline. LLM failures fall back to the
//! URL fast path, then the sticky set, then "none". Output tokens outside the
//! known category set are dropped.

use std::sync::Arc;
use std::time::Duration;

use charla_llm::{ChatRequest, LlmProvider, Message};
use charla_trace::{SpanKind, TraceHandle};
use tracing::debug;

/// Sentinel meaning "no tools needed".
pub const NONE_CATEGORY: &str = "none";

pub struct IntentClassifier {
    provider: Arc<dyn LlmProvider>,
    model: String,
    timeout: Duration,
}

impl IntentClassifier {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            provider,
            model: model.into(),
            timeout,
        }
    }

    /// Classify `text` into categories from `known` (the registry's closed
    /// set). `history_tail` disambiguates follow-ups; `sticky` is the
    /// previous turn's category set.
    pub async fn classify(
        &self,
        text: &str,
        history_tail: &[String],
        sticky: &[String],
        known: &[String],
        trace: &TraceHandle,
    ) -> Vec<String> {
        let mut span = trace.span("classify", SpanKind::Generation);
        span.set_input(text);

        let mut categories = match tokio::time::timeout(
            self.timeout,
            self.call_llm(text, history_tail, known),
        )
        .await
        {
            Ok(Some(cats)) => cats,
            Ok(None) | Err(_) => {
                debug!("classifier unavailable, relying on fast paths");
                Vec::new()
            }
        };

        // Empty or "none" results go through the fast paths: a link replaces
        // the whole set with fetch, otherwise the previous turn's sticky set
        // keeps follow-ups on their tools.
        if categories.is_empty() || categories == [NONE_CATEGORY] {
            if contains_url(text) {
                categories = vec!["fetch".to_string()];
            } else if !sticky.is_empty() {
                categories = sticky.to_vec();
            } else {
                categories = vec![NONE_CATEGORY.to_string()];
            }
        } else if contains_url(text) && !categories.iter().any(|c| c == "fetch") {
            // Real categories plus a link: fetch joins the set.
            categories.push("fetch".to_string());
        }

        span.set_output(&categories.join(","));
        span.finish();
        categories
    }

    async fn call_llm(
        &self,
        text: &str,
        history_tail: &[String],
        known: &[String],
    ) -> Option<Vec<String>> {
        let system = format!(
            "Classify the user's message into tool categories.\n\
             Valid categories: {}, none.\n\
             Reply with a comma-separated list of category names only. \
             Use 'none' when no tools are needed.",
            known.join(", ")
        );
        let mut prompt = String::new();
        if !history_tail.is_empty() {
            prompt.push_str("Recent conversation:\n");
            prompt.push_str(&history_tail.join("\n"));
            prompt.push_str("\n\n");
        }
        prompt.push_str("Message: ");
        prompt.push_str(text);

        let req = ChatRequest::new(
            self.model.clone(),
            vec![Message::system(system), Message::user(prompt)],
        )
        .with_think(false);

        let resp = self.provider.chat(&req).await.ok()?;
        Some(parse_categories(&resp.text, known))
    }
}

/// Keep only tokens from the closed set; "none" survives only alone.
fn parse_categories(raw: &str, known: &[String]) -> Vec<String> {
    let mut out: Vec<String> = raw
        .to_lowercase()
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric() && c != '_'))
        .filter(|t| !t.is_empty())
        .filter(|t| *t == NONE_CATEGORY || known.iter().any(|k| k == t))
        .map(String::from)
        .collect();
    out.dedup();
    if out.len() > 1 {
        out.retain(|c| c != NONE_CATEGORY);
    }
    out
}

fn contains_url(text: &str) -> bool {
    text.contains("http://") || text.contains("https://")
}
