//! Context builder - assembles the single system message per LLM call.
//!
//! Strictly no I/O here: every section arrives pre-fetched by the
//! orchestrator's fan-out phases. The builder only formats, omits empty
//! sections, and logs the token-budget estimate (chars/4 proxy; WARNING above
//! 80%, ERROR above 100% - nothing is dropped automatically).

use std::collections::BTreeMap;
use std::sync::Arc;

use charla_store::types::{Memory, Note, Summary};
use tracing::{error, warn};

use crate::tools::Tool;

/// Default ceiling for the chars/4 token estimate.
pub const DEFAULT_TOKEN_CEILING: usize = 8000;

/// Pre-fetched inputs for one system message.
#[derive(Default)]
pub struct ContextSections {
    pub memories: Vec<Memory>,
    pub facts: BTreeMap<String, String>,
    pub active_projects: Option<String>,
    pub notes: Vec<Note>,
    pub daily_activity: Option<String>,
    pub summary: Option<Summary>,
    /// Tools of the active categories; empty when the classifier said "none".
    pub capabilities: Vec<Arc<dyn Tool>>,
    pub scratchpad: Option<String>,
}

/// Render the consolidated system message.
pub fn build_system_message(preamble: &str, sections: &ContextSections, token_ceiling: usize) -> String {
    let mut out = String::with_capacity(4096);
    out.push_str(preamble);

    if !sections.memories.is_empty() {
        out.push_str("\n\n<user_memories>\n");
        for m in &sections.memories {
            out.push_str(&format!("- {}\n", m.text));
        }
        out.push_str("</user_memories>");
    }

    if !sections.facts.is_empty() {
        out.push_str("\n\n<user_facts>\n");
        for (key, value) in &sections.facts {
            out.push_str(&format!("{key}: {value}\n"));
        }
        out.push_str("</user_facts>");
    }

    if let Some(projects) = sections.active_projects.as_deref().filter(|p| !p.is_empty()) {
        out.push_str("\n\n<active_projects>\n");
        out.push_str(projects);
        out.push_str("\n</active_projects>");
    }

    if !sections.notes.is_empty() {
        out.push_str("\n\n<relevant_notes>\n");
        for n in &sections.notes {
            let preview: String = n.content.chars().take(300).collect();
            out.push_str(&format!("## {}\n{preview}\n", n.title));
        }
        out.push_str("</relevant_notes>");
    }

    if let Some(activity) = sections.daily_activity.as_deref().filter(|a| !a.is_empty()) {
        out.push_str("\n\n<recent_activity>\n");
        out.push_str(activity);
        out.push_str("\n</recent_activity>");
    }

    if let Some(summary) = &sections.summary {
        out.push_str("\n\n<conversation_summary>\n");
        out.push_str(&summary.text);
        out.push_str("\n</conversation_summary>");
    }

    if !sections.capabilities.is_empty() {
        out.push_str("\n\n<capabilities>\n");
        for tool in &sections.capabilities {
            out.push_str(&format!("- {}: {}\n", tool.name(), tool.description()));
        }
        out.push_str("</capabilities>");
    }

    if let Some(scratchpad) = sections.scratchpad.as_deref().filter(|s| !s.is_empty()) {
        out.push_str("\n\n<scratchpad_context>\n");
        out.push_str(scratchpad);
        out.push_str("\n</scratchpad_context>");
    }

    log_token_estimate(&out, token_ceiling);
    out
}

/// chars/4 estimate against the configured ceiling. The log line is the whole
/// surface - tuning is manual.
fn log_token_estimate(message: &str, ceiling: usize) {
    if ceiling == 0 {
        return;
    }
    let estimate = message.chars().count() / 4;
    let pct = estimate * 100 / ceiling;
    if pct > 100 {
        error!(estimate, ceiling, pct, "context exceeds token budget");
    } else if pct > 80 {
        warn!(estimate, ceiling, pct, "context close to token budget");
    }
}
