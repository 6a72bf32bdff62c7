//! Critical-path orchestrator.
//!
//! One inbound message becomes one (or zero) outbound reply through ordered
//! phases with parallel fan-out inside each:
//!
//! ```text
//! 0. HITL / slash interception          (sequential)
//! 1. conv lookup + classifier task spawn
//! A. embed(text) ‖ save_message(user) ‖ load_daily_activity
//! B. memory search ‖ note search ‖ windowed history ‖ projects summary
//! C. await classifier (URL fast path + sticky fallback live inside it)
//! D. build context → tool loop → guardrails → send
//! bg. assistant save · summaries · memory extraction · mirror · curation
//!     · sticky save · trace finish
//! ```
//!
//! Phase B consumes Phase A's embedding, so the join between them is a real
//! barrier. `build_context` performs no I/O - every read happens in A/B.

use std::sync::Arc;

use charla_core::types::{InboundEvent, MessageEnvelope};
use charla_core::CharlaError;
use charla_llm::Message;
use charla_store::types::{MessageRole, StoredMessage};
use charla_trace::{in_current_context, with_trace};
use tracing::{info, warn};

use crate::classify::NONE_CATEGORY;
use crate::context::{build_system_message, ContextSections, DEFAULT_TOKEN_CEILING};
use crate::executor::{ExecOptions, ToolGate};
use crate::facts::extract_user_facts;
use crate::session::gate::ShellGuardGate;
use crate::AgentDeps;

/// System preamble ahead of the context sections.
const PREAMBLE: &str = "You are Charla, a personal WhatsApp assistant. Be concise, warm, and \
     practical. Answer in the user's language.";

/// Reply used when the LLM path fails outright; guardrails still run on it.
const FALLBACK_REPLY: &str =
    "Lo siento, algo ha salido mal procesando tu mensaje. / Sorry, something went wrong \
     while processing your message.";

/// Entry point for everything the webhook accepted.
pub async fn handle_event(deps: Arc<AgentDeps>, event: InboundEvent) {
    match event {
        InboundEvent::Message(envelope) => {
            handle_message(deps, envelope).await;
        }
        InboundEvent::Reaction(envelope) => {
            super::reaction::handle_reaction(deps, envelope).await;
        }
    }
}

/// Process one message envelope end to end. Returns the reply that was sent,
/// if any (tests assert on it).
pub async fn handle_message(deps: Arc<AgentDeps>, envelope: MessageEnvelope) -> Option<String> {
    let principal = envelope.principal.as_str().to_string();

    // A pending HITL approval consumes the message before anything else.
    if let Some(approved) = deps.hitl.try_resolve(&principal, &envelope.text) {
        let ack = if approved {
            "Approved — continuing."
        } else {
            "Denied — the agent will skip that action."
        };
        let _ = deps.outbound.send_message(&principal, ack).await;
        return Some(ack.to_string());
    }

    // Slash commands bypass the LLM path entirely.
    if envelope.text.trim_start().starts_with('/') {
        if let Some(reply) = super::slash::handle(&deps, &principal, envelope.text.trim()).await {
            let _ = deps.outbound.send_message(&principal, &reply).await;
            return Some(reply);
        }
    }

    let trace = deps.recorder.begin_trace(&principal, "chat");
    let reply = with_trace(trace.clone(), process_core(Arc::clone(&deps), envelope, &trace)).await;

    match &reply {
        Some(_) => {}
        None => trace.finish("failed", None),
    }
    reply
}

async fn process_core(
    deps: Arc<AgentDeps>,
    envelope: MessageEnvelope,
    trace: &charla_trace::TraceHandle,
) -> Option<String> {
    let principal = envelope.principal.as_str().to_string();
    deps.principal_cell.set(&principal);

    let _ = deps
        .outbound
        .mark_as_read(&envelope.provider_message_id)
        .await;

    // 0. Reply-to expansion.
    let text = match &envelope.reply_to {
        Some(ctx) => match &ctx.quoted_text {
            Some(quoted) => format!("[Replying to: \"{quoted}\"]\n{}", envelope.text),
            None => envelope.text.clone(),
        },
        None => envelope.text.clone(),
    };

    // 1. Conversation lookup (cached) and early classifier spawn.
    let conv_id = match deps.conversation_id(&principal) {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "conversation lookup failed");
            return None;
        }
    };
    let sticky = deps.store.get_sticky_categories(conv_id).unwrap_or_default();
    let history_tail: Vec<String> = deps
        .store
        .get_recent_messages(conv_id, 4)
        .unwrap_or_default()
        .iter()
        .map(|m| format!("{}: {}", m.role, m.text))
        .collect();

    let classify_task = {
        let deps = Arc::clone(&deps);
        let text = text.clone();
        let sticky = sticky.clone();
        let known = deps.registry.known_categories();
        let trace = trace.clone();
        tokio::spawn(in_current_context(async move {
            deps.classifier
                .classify(&text, &history_tail, &sticky, &known, &trace)
                .await
        }))
    };

    // Phase A: embed ‖ persist the user turn ‖ read today's activity.
    let (embedding, saved, daily_activity) = tokio::join!(
        deps.indexer.embed_one(&text),
        async {
            deps.store.save_message(
                conv_id,
                MessageRole::User,
                &text,
                Some(&envelope.provider_message_id),
            )
        },
        async { deps.activity.load_today() }
    );
    if let Err(e) = saved {
        warn!(error = %e, "user message save failed");
    }

    // Phase B: retrieval fan-out over the Phase A embedding.
    let retrieval_span = trace.span("retrieval", charla_trace::SpanKind::Retrieval);
    let top_k = deps.config.memory.semantic_search_top_k;
    let threshold = deps.config.memory.memory_similarity_threshold;
    let (memories, notes, windowed, preamble) = tokio::join!(
        async {
            match &embedding {
                Some(v) => {
                    let hits = deps
                        .store
                        .search_similar_memories_with_distance(v, top_k, threshold)
                        .unwrap_or_default();
                    if hits.is_empty() {
                        // Nothing under the threshold: top-3 regardless.
                        deps.store.search_similar_memories(v, 3).unwrap_or_default()
                    } else {
                        hits.into_iter().map(|(m, _)| m).collect()
                    }
                }
                None => deps.store.list_active_memories(Some(3)).unwrap_or_default(),
            }
        },
        async {
            match &embedding {
                Some(v) => deps
                    .store
                    .search_similar_notes(v, top_k)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(n, _)| n)
                    .collect(),
                None => Vec::new(),
            }
        },
        async {
            deps.store
                .get_windowed_history(conv_id, deps.config.conversation.history_verbatim_count)
                .unwrap_or((Vec::new(), None))
        },
        async {
            // Operator-approved preamble overrides the compiled-in default.
            deps.store
                .get_active_prompt("system_preamble")
                .ok()
                .flatten()
                .map(|p| p.content)
        }
    );
    let (history, summary) = windowed;
    let projects_summary = load_projects_summary(&deps.config.paths.projects_root);
    retrieval_span.finish();

    // Phase C: classification result + user facts.
    let categories = classify_task
        .await
        .unwrap_or_else(|_| vec![NONE_CATEGORY.to_string()]);
    let memory_texts: Vec<String> = memories.iter().map(|m| m.text.clone()).collect();
    let user_facts = extract_user_facts(&memory_texts);

    // Phase D: context → tool loop → guardrails → egress.
    let no_tools = categories == [NONE_CATEGORY];
    let selected_tools = if no_tools {
        Vec::new()
    } else {
        deps.registry
            .select_tools(&categories, deps.config.tools.tools_per_call)
    };

    let sections = ContextSections {
        memories,
        facts: user_facts,
        active_projects: projects_summary,
        notes,
        daily_activity,
        summary,
        capabilities: selected_tools.clone(),
        scratchpad: None,
    };
    let system_message = build_system_message(
        preamble.as_deref().unwrap_or(PREAMBLE),
        &sections,
        DEFAULT_TOKEN_CEILING,
    );
    let llm_history = to_llm_history(&history, &text);

    let gate: Arc<dyn ToolGate> = Arc::new(ShellGuardGate {
        allowlist: deps.config.agent.shell_allowlist.clone(),
    });

    let (reply, tool_outputs) = match deps
        .executor
        .run(
            &system_message,
            llm_history,
            selected_tools,
            trace,
            ExecOptions {
                gate: Some(gate),
                ..Default::default()
            },
        )
        .await
    {
        Ok(outcome) => (outcome.reply, outcome.tool_outputs),
        Err(e) => {
            warn!(error = %e, kind = e.kind(), "tool loop failed, sending fallback");
            (FALLBACK_REPLY.to_string(), Vec::new())
        }
    };

    let outcome = deps
        .guardrails
        .validate_and_remediate(&text, reply, &tool_outputs, trace)
        .await;
    let final_reply = outcome.reply.clone();
    let failed_checks: Vec<(String, String)> = outcome
        .checks
        .iter()
        .filter(|c| !c.passed)
        .map(|c| (c.name.to_string(), c.details.clone()))
        .collect();

    // Transport policy: one retry, then drop. The reply path never panics.
    let provider_id = match deps.outbound.send_message(&principal, &final_reply).await {
        Ok(id) => id,
        Err(first) => {
            warn!(error = %first, "send failed, retrying once");
            match deps.outbound.send_message(&principal, &final_reply).await {
                Ok(id) => id,
                Err(second) => {
                    warn!(error = %second, "send retry failed, dropping reply");
                    None
                }
            }
        }
    };

    // Background: everything that must not delay the reply.
    spawn_background(
        &deps,
        trace,
        conv_id,
        &principal,
        &text,
        &final_reply,
        provider_id.clone(),
        categories,
        failed_checks,
    );

    info!(principal = %principal, "reply sent");
    Some(final_reply)
}

#[allow(clippy::too_many_arguments)]
fn spawn_background(
    deps: &Arc<AgentDeps>,
    trace: &charla_trace::TraceHandle,
    conv_id: i64,
    principal: &str,
    user_text: &str,
    reply: &str,
    provider_id: Option<String>,
    categories: Vec<String>,
    failed_checks: Vec<(String, String)>,
) {
    let deps = Arc::clone(deps);
    let trace = trace.clone();
    let principal = principal.to_string();
    let user_text = user_text.to_string();
    let reply = reply.to_string();

    deps.tracker.clone().spawn(
        "post_reply_maintenance",
        in_current_context(async move {
            if let Err(e) = deps.store.save_message(
                conv_id,
                MessageRole::Assistant,
                &reply,
                provider_id.as_deref(),
            ) {
                warn!(error = %e, "assistant message save failed");
            }

            if categories != [NONE_CATEGORY] {
                let _ = deps.store.set_sticky_categories(conv_id, &categories);
            }

            deps.activity
                .append(&format!("{principal}: {}", truncated(&user_text, 80)));

            // Guardrail failures feed short-lived self corrections, one per
            // kind per cooldown window.
            for (kind, details) in &failed_checks {
                let hint = match kind.as_str() {
                    "language_match" => format!("reply in the user's language ({details})"),
                    "no_pii" => "do not echo contact data the user did not provide".to_string(),
                    "not_empty" => "always produce a substantive reply".to_string(),
                    _ => continue,
                };
                let _ = deps.store.add_self_correction(kind, &hint);
            }

            crate::summarize::maybe_summarize(
                &deps.store,
                deps.provider.as_ref(),
                &deps.config.llm.chat_model,
                conv_id,
                deps.config.conversation.summary_threshold,
            )
            .await;

            let _ = deps
                .store
                .trim_conversation(conv_id, deps.config.conversation.conversation_max_messages);

            crate::summarize::maybe_extract_memories(
                &deps.store,
                deps.provider.as_ref(),
                &deps.config.llm.classifier_model,
                &deps.indexer,
                conv_id,
            )
            .await;

            if deps.config.memory.memory_file_watch_enabled {
                deps.mirror.sync_from_file();
            }
            deps.mirror.flush();

            super::curate::curate_after_turn(
                &deps,
                trace.trace_id(),
                &user_text,
                &reply,
                &failed_checks,
            );

            trace.finish("completed", provider_id.as_deref());
        }),
    );
}

/// Windowed store history → LLM messages. Tool/system rows never re-enter the
/// prompt. If the tail somehow misses the current user turn (save raced a
/// trim), it is appended so the model always sees it last.
fn to_llm_history(history: &[StoredMessage], current_text: &str) -> Vec<Message> {
    let mut out: Vec<Message> = history
        .iter()
        .filter_map(|m| match m.role {
            MessageRole::User => Some(Message::user(m.text.clone())),
            MessageRole::Assistant => Some(Message::assistant(m.text.clone())),
            MessageRole::System | MessageRole::Tool => None,
        })
        .collect();

    let has_current = out
        .last()
        .map(|m| m.content == current_text)
        .unwrap_or(false);
    if !has_current {
        out.push(Message::user(current_text.to_string()));
    }
    out
}

/// One line per project directory; `None` when the root is missing or empty.
fn load_projects_summary(projects_root: &str) -> Option<String> {
    let entries = std::fs::read_dir(projects_root).ok()?;
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| !n.starts_with('.'))
        .collect();
    if names.is_empty() {
        return None;
    }
    names.sort();
    Some(names.join(", "))
}

fn truncated(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests_support::test_deps_with_mocks;
    use charla_core::types::Principal;

    fn envelope(text: &str, provider_id: &str) -> MessageEnvelope {
        MessageEnvelope {
            principal: Principal::from("+34600111222"),
            provider_message_id: provider_id.to_string(),
            text: text.to_string(),
            reply_to: None,
            received_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn plain_message_produces_one_reply_and_one_trace() {
        let (deps, llm, outbound) = test_deps_with_mocks().await;
        llm.push_text("none"); // classifier
        llm.push_text("¡Hola! ¿En qué te ayudo?"); // main generation

        let reply = handle_message(Arc::clone(&deps), envelope("hola", "wamid.1")).await;
        assert_eq!(reply.as_deref(), Some("¡Hola! ¿En qué te ayudo?"));
        assert_eq!(outbound.sent_count(), 1);

        // Drain background work, then check persistence.
        deps.tracker
            .shutdown(std::time::Duration::from_secs(5))
            .await;

        let conv = deps.conversation_id("+34600111222").unwrap();
        let messages = deps.store.get_recent_messages(conv, 10).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, "hola");
        assert_eq!(
            messages[0].provider_message_id.as_deref(),
            Some("wamid.1")
        );

        let traces = deps.store.get_traces_by_principal("+34600111222", 10).unwrap();
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].status, "completed");
        // The trace links to the sent reply's provider id.
        assert!(traces[0].provider_message_id.is_some());
    }

    #[tokio::test]
    async fn sticky_categories_are_saved_for_the_next_turn() {
        let (deps, llm, _outbound) = test_deps_with_mocks().await;
        llm.push_text("github"); // classifier
        llm.push_text("Here are your issues."); // main generation (no tool calls)

        handle_message(
            Arc::clone(&deps),
            envelope("show my github issues", "wamid.2"),
        )
        .await;
        deps.tracker
            .shutdown(std::time::Duration::from_secs(5))
            .await;

        let conv = deps.conversation_id("+34600111222").unwrap();
        assert_eq!(
            deps.store.get_sticky_categories(conv).unwrap(),
            vec!["github"]
        );
    }

    #[tokio::test]
    async fn empty_reply_is_remediated_before_send() {
        let (deps, llm, outbound) = test_deps_with_mocks().await;
        llm.push_text("none"); // classifier
        llm.push_text(""); // main generation: empty → not_empty fails
        llm.push_text("Recovered reply."); // remediation

        let reply = handle_message(Arc::clone(&deps), envelope("hey", "wamid.3")).await;
        assert_eq!(reply.as_deref(), Some("Recovered reply."));
        assert_eq!(outbound.sent_count(), 1);
    }

    #[tokio::test]
    async fn reply_to_context_is_expanded_into_the_prompt() {
        let (deps, llm, _outbound) = test_deps_with_mocks().await;
        llm.push_text("none");
        llm.push_text("About that link: it's the deploy guide.");

        let mut env = envelope("what was this?", "wamid.4");
        env.reply_to = Some(charla_core::types::ReplyContext {
            quoted_message_id: "wamid.old".to_string(),
            quoted_text: Some("https://wiki/deploy".to_string()),
        });
        handle_message(Arc::clone(&deps), env).await;
        deps.tracker
            .shutdown(std::time::Duration::from_secs(5))
            .await;

        let conv = deps.conversation_id("+34600111222").unwrap();
        let messages = deps.store.get_recent_messages(conv, 10).unwrap();
        assert!(messages[0].text.contains("[Replying to: \"https://wiki/deploy\"]"));
    }

    #[tokio::test]
    async fn hitl_approval_short_circuits_the_pipeline() {
        let (deps, _llm, outbound) = test_deps_with_mocks().await;
        let _rx = deps.hitl.request("+34600111222");

        let reply = handle_message(Arc::clone(&deps), envelope("yes", "wamid.5")).await;
        assert_eq!(reply.as_deref(), Some("Approved — continuing."));
        // Only the ack went out; no LLM turn ran.
        assert_eq!(outbound.sent_count(), 1);
        let traces = deps.store.get_traces_by_principal("+34600111222", 10).unwrap();
        assert!(traces.is_empty());
    }
}
