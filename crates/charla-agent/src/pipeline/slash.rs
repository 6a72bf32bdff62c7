//! Slash command surface - intercepted before the LLM path.
//!
//! Failure is always a human-readable reply, never an error code: this is a
//! chat surface.

use std::sync::Arc;

use charla_store::types::EmbeddingKind;
use tracing::info;

use crate::session;
use crate::AgentDeps;

/// Handle a slash command. `None` means "not a command, run the LLM path"
/// (e.g. a message that merely starts with a slash-like token).
pub async fn handle(deps: &Arc<AgentDeps>, principal: &str, text: &str) -> Option<String> {
    let (command, args) = match text.split_once(char::is_whitespace) {
        Some((c, rest)) => (c, rest.trim()),
        None => (text, ""),
    };

    let reply = match command {
        "/help" => help_text(),
        "/remember" => remember(deps, args),
        "/forget" => forget(deps, args),
        "/memories" => list_memories(deps),
        "/clear" => clear(deps, principal),
        "/review-skill" => review_skill(deps, args),
        "/feedback" => feedback(deps, principal, args),
        "/rate" => rate(deps, principal, args),
        "/approve-prompt" => approve_prompt(deps, args),
        "/agent" => agent(deps, principal, args),
        "/agent-resume" => agent_resume(deps, principal),
        "/cancel" => cancel(deps, principal),
        "/dev-review" => dev_review(deps, principal, args),
        _ => return None,
    };
    Some(reply)
}

fn help_text() -> String {
    "*Charla commands*\n\
     /remember <text> — store a memory\n\
     /forget <id|text> — delete a memory\n\
     /memories — list stored memories\n\
     /clear — clear the conversation (memories survive)\n\
     /review-skill [name] — list or inspect skills\n\
     /feedback <text> — correct the last reply\n\
     /rate <1..5> — rate the last reply\n\
     /approve-prompt <name> <version> — activate a prompt version\n\
     /agent <objective> — start an agent work session\n\
     /agent-resume — resume the last agent session\n\
     /cancel — cancel the running agent session\n\
     /dev-review — inspect recent traces"
        .to_string()
}

fn remember(deps: &Arc<AgentDeps>, args: &str) -> String {
    if args.is_empty() {
        return "Usage: /remember <text>".to_string();
    }
    match deps.store.add_memory(args, None) {
        Ok(id) => {
            deps.indexer.index_memory(id);
            deps.mirror.flush();
            format!("Remembered (#{id}).")
        }
        Err(e) => format!("Could not save that: {e}"),
    }
}

fn forget(deps: &Arc<AgentDeps>, args: &str) -> String {
    if args.is_empty() {
        return "Usage: /forget <id|text>".to_string();
    }
    let memory = match args.parse::<i64>() {
        Ok(id) => deps.store.get_memory(id).ok().flatten(),
        Err(_) => deps.store.find_memory_by_text(args).ok().flatten(),
    };
    let Some(memory) = memory else {
        return format!("No memory matching '{args}'.");
    };
    match deps.store.soft_delete_memory(memory.id) {
        Ok(true) => {
            deps.indexer.remove(EmbeddingKind::Memory, memory.id);
            deps.mirror.flush();
            format!("Forgotten: {}", memory.text)
        }
        _ => format!("Could not forget memory #{}.", memory.id),
    }
}

fn list_memories(deps: &Arc<AgentDeps>) -> String {
    match deps.store.list_active_memories(Some(20)) {
        Ok(memories) if memories.is_empty() => "No memories yet.".to_string(),
        Ok(memories) => {
            let lines: Vec<String> = memories
                .iter()
                .map(|m| format!("{}. {}", m.id, m.text))
                .collect();
            format!("*Memories*\n{}", lines.join("\n"))
        }
        Err(e) => format!("Could not list memories: {e}"),
    }
}

fn clear(deps: &Arc<AgentDeps>, principal: &str) -> String {
    let conv_id = match deps.conversation_id(principal) {
        Ok(id) => id,
        Err(e) => return format!("Could not clear: {e}"),
    };
    match deps.store.clear_conversation(conv_id) {
        Ok(removed) if removed.is_empty() => "Nothing to clear.".to_string(),
        Ok(removed) => {
            let snapshot = deps.snapshots.write(principal, &removed);
            match snapshot {
                Ok(path) => format!(
                    "Cleared {} messages (snapshot at {}). Memories are untouched.",
                    removed.len(),
                    path.display()
                ),
                Err(_) => format!("Cleared {} messages. Memories are untouched.", removed.len()),
            }
        }
        Err(e) => format!("Could not clear: {e}"),
    }
}

fn review_skill(deps: &Arc<AgentDeps>, args: &str) -> String {
    let skills_dir = std::path::Path::new(&deps.config.paths.data_dir).join("skills");
    let skills = crate::tools::skill::load_skills(&skills_dir);
    if skills.is_empty() {
        return "No skills installed.".to_string();
    }
    if args.is_empty() {
        let lines: Vec<String> = skills
            .iter()
            .map(|s| format!("- {} — {}", s.meta.name, s.meta.description))
            .collect();
        return format!("*Skills*\n{}", lines.join("\n"));
    }
    match skills.iter().find(|s| s.meta.name == args) {
        Some(skill) => {
            let tools: Vec<&str> = skill.meta.tools.iter().map(|t| t.name.as_str()).collect();
            format!(
                "*{}* v{}\n{}\nTools: {}",
                skill.meta.name,
                skill.meta.version.as_deref().unwrap_or("?"),
                skill.meta.description,
                if tools.is_empty() {
                    "(none)".to_string()
                } else {
                    tools.join(", ")
                }
            )
        }
        None => format!("No skill named '{args}'."),
    }
}

fn feedback(deps: &Arc<AgentDeps>, principal: &str, args: &str) -> String {
    if args.is_empty() {
        return "Usage: /feedback <what the reply should have been>".to_string();
    }
    let latest_trace = deps
        .store
        .get_traces_by_principal(principal, 1)
        .ok()
        .and_then(|mut v| v.pop());

    let (user_text, reply) = last_exchange(deps, principal);
    super::curate::curate_correction(
        deps,
        latest_trace.as_ref().map(|t| t.id.as_str()),
        &user_text,
        &reply,
        args,
    );
    if let Some(trace) = &latest_trace {
        let _ = deps
            .store
            .append_score(&trace.id, "human_feedback", 0.0, "human", Some(args));
    }
    "Thanks — filed as a correction.".to_string()
}

fn rate(deps: &Arc<AgentDeps>, principal: &str, args: &str) -> String {
    let rating: i64 = match args.parse() {
        Ok(n) if (1..=5).contains(&n) => n,
        _ => return "Usage: /rate <1..5>".to_string(),
    };
    let Some(trace) = deps
        .store
        .get_traces_by_principal(principal, 1)
        .ok()
        .and_then(|mut v| v.pop())
    else {
        return "Nothing recent to rate.".to_string();
    };
    let value = (rating - 1) as f64 / 4.0;
    match deps
        .store
        .append_score(&trace.id, "human_rating", value, "human", None)
    {
        Ok(()) => format!("Rated {rating}/5 — thanks!"),
        Err(e) => format!("Could not record the rating: {e}"),
    }
}

fn approve_prompt(deps: &Arc<AgentDeps>, args: &str) -> String {
    let mut parts = args.split_whitespace();
    let (Some(name), Some(version)) = (parts.next(), parts.next()) else {
        return "Usage: /approve-prompt <name> <version>".to_string();
    };
    let Ok(version) = version.parse::<i64>() else {
        return "Version must be a number.".to_string();
    };
    match deps.store.activate_prompt_version(name, version) {
        Ok(()) => format!("Prompt '{name}' v{version} is now active."),
        Err(e) => format!("Could not activate: {e}"),
    }
}

fn agent(deps: &Arc<AgentDeps>, principal: &str, args: &str) -> String {
    if args.is_empty() {
        return "Usage: /agent <objective>".to_string();
    }
    if deps.agent_cancel.contains_key(principal) {
        return "An agent session is already running. /cancel it first.".to_string();
    }
    info!(principal, "agent session requested");
    session::start_session(Arc::clone(deps), principal.to_string(), args.to_string());
    "Agent session started — I'll report back here.".to_string()
}

fn agent_resume(deps: &Arc<AgentDeps>, principal: &str) -> String {
    match session::resume_session(Arc::clone(deps), principal.to_string()) {
        Some(message) => message,
        None => "Resuming the last agent session.".to_string(),
    }
}

fn cancel(deps: &Arc<AgentDeps>, principal: &str) -> String {
    match deps.agent_cancel.get(principal) {
        Some(token) => {
            token.cancel();
            "Cancellation requested — the session will stop at the next step.".to_string()
        }
        None => "No agent session is running.".to_string(),
    }
}

fn dev_review(deps: &Arc<AgentDeps>, principal: &str, args: &str) -> String {
    let target = if args.is_empty() { principal } else { args };
    let traces = match deps.store.get_traces_by_principal(target, 5) {
        Ok(t) if !t.is_empty() => t,
        _ => return format!("No traces for {target}."),
    };
    let mut out = format!("*Recent traces for {target}*\n");
    for trace in traces {
        let tools = deps.store.get_tool_calls(&trace.id).unwrap_or_default();
        let scores = deps.store.get_scores(&trace.id).unwrap_or_default();
        let failed: Vec<&str> = scores
            .iter()
            .filter(|s| s.source == "system" && s.value == 0.0)
            .map(|s| s.name.as_str())
            .collect();
        out.push_str(&format!(
            "- {} [{}] {} tools, {} scores{}\n",
            trace.id,
            trace.status,
            tools.len(),
            scores.len(),
            if failed.is_empty() {
                String::new()
            } else {
                format!(", failed: {}", failed.join("/"))
            }
        ));
    }
    out
}

/// The most recent user/assistant pair, for feedback entries.
fn last_exchange(deps: &Arc<AgentDeps>, principal: &str) -> (String, String) {
    let Ok(conv_id) = deps.conversation_id(principal) else {
        return (String::new(), String::new());
    };
    let recent = deps.store.get_recent_messages(conv_id, 10).unwrap_or_default();
    let user = recent
        .iter()
        .rev()
        .find(|m| m.role == charla_store::types::MessageRole::User)
        .map(|m| m.text.clone())
        .unwrap_or_default();
    let assistant = recent
        .iter()
        .rev()
        .find(|m| m.role == charla_store::types::MessageRole::Assistant)
        .map(|m| m.text.clone())
        .unwrap_or_default();
    (user, assistant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests_support::test_deps;

    #[tokio::test]
    async fn remember_and_memories_round_trip() {
        let deps = test_deps().await;
        let reply = handle(&deps, "+34", "/remember likes green tea")
            .await
            .unwrap();
        assert!(reply.starts_with("Remembered"));

        let listing = handle(&deps, "+34", "/memories").await.unwrap();
        assert!(listing.contains("likes green tea"));
    }

    #[tokio::test]
    async fn forget_by_text_soft_deletes() {
        let deps = test_deps().await;
        handle(&deps, "+34", "/remember timezone is Europe/Madrid").await;
        let reply = handle(&deps, "+34", "/forget Europe/Madrid").await.unwrap();
        assert!(reply.starts_with("Forgotten"));
        let listing = handle(&deps, "+34", "/memories").await.unwrap();
        assert_eq!(listing, "No memories yet.");
    }

    #[tokio::test]
    async fn clear_keeps_memories_and_snapshots_messages() {
        let deps = test_deps().await;
        let conv = deps.conversation_id("+34").unwrap();
        deps.store
            .save_message(conv, charla_store::types::MessageRole::User, "hola", None)
            .unwrap();
        handle(&deps, "+34", "/remember keeps this").await;

        let reply = handle(&deps, "+34", "/clear").await.unwrap();
        assert!(reply.contains("Cleared 1 messages"));
        assert_eq!(deps.store.count_messages(conv).unwrap(), 0);
        assert_eq!(deps.store.list_active_memories(None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rate_attaches_score_to_latest_trace() {
        let deps = test_deps().await;
        deps.store.start_trace("t1", "+34", "chat").unwrap();
        deps.store.finish_trace("t1", "completed", None).unwrap();

        let reply = handle(&deps, "+34", "/rate 5").await.unwrap();
        assert!(reply.contains("5/5"));
        let scores = deps.store.get_scores("t1").unwrap();
        assert_eq!(scores[0].name, "human_rating");
        assert_eq!(scores[0].value, 1.0);
        assert_eq!(scores[0].source, "human");
    }

    #[tokio::test]
    async fn rate_validates_range() {
        let deps = test_deps().await;
        let reply = handle(&deps, "+34", "/rate 9").await.unwrap();
        assert!(reply.starts_with("Usage"));
    }

    #[tokio::test]
    async fn feedback_files_a_correction_entry() {
        let deps = test_deps().await;
        let conv = deps.conversation_id("+34").unwrap();
        deps.store
            .save_message(conv, charla_store::types::MessageRole::User, "2+2?", None)
            .unwrap();
        deps.store
            .save_message(conv, charla_store::types::MessageRole::Assistant, "5", None)
            .unwrap();

        handle(&deps, "+34", "/feedback the answer is 4").await;
        let entries = deps
            .store
            .list_dataset_entries(Some(charla_store::types::DatasetTier::Correction))
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].expected_output.as_deref(), Some("the answer is 4"));
        assert_eq!(entries[0].input, "2+2?");
    }

    #[tokio::test]
    async fn approve_prompt_flips_active_version() {
        let deps = test_deps().await;
        deps.store
            .save_prompt_version("classifier", "v1", "human")
            .unwrap();
        let reply = handle(&deps, "+34", "/approve-prompt classifier 1")
            .await
            .unwrap();
        assert!(reply.contains("now active"));
        assert!(deps.store.get_active_prompt("classifier").unwrap().is_some());
    }

    #[tokio::test]
    async fn cancel_without_session_says_so() {
        let deps = test_deps().await;
        let reply = handle(&deps, "+34", "/cancel").await.unwrap();
        assert_eq!(reply, "No agent session is running.");
    }

    #[tokio::test]
    async fn unknown_command_falls_through_to_llm_path() {
        let deps = test_deps().await;
        assert!(handle(&deps, "+34", "/unknowncmd hello").await.is_none());
    }
}
