//! Agent outer loop: planner → workers → synthesis, with a reactive fallback,
//! loop detection, HITL pauses, and a durable per-session journal.

pub mod gate;
pub mod hitl;
pub mod journal;
pub mod planner;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use charla_llm::Message;
use charla_store::types::SessionStatus;
use charla_trace::{with_trace, SpanKind, TraceHandle};
use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::executor::{ExecOptions, ToolGate};
use crate::session::gate::PolicyGate;
use crate::session::journal::{RoundRecord, SessionJournal};
use crate::session::planner::{
    create_plan, synthesize, worker_categories, AgentPlan, PlannedTask, Synthesis,
};
use crate::AgentDeps;

/// Worker preamble for executor runs inside a session.
const WORKER_SYSTEM: &str =
    "You are a worker agent completing one task of a larger objective. Use your \
     tools, then report the result. Keep notes for later rounds inside \
     <scratchpad>...</scratchpad> tags and track progress as a markdown \
     checklist (- [ ] / - [x]).";

/// Repeated identical tool calls: warn at this count.
const LOOP_WARN_AT: usize = 3;
/// Circuit-break the session at this count.
const LOOP_BREAK_AT: usize = 5;

enum SessionEnd {
    Completed(String),
    Failed(String),
    Cancelled,
}

/// Kick off a new agent session in the background (dispatched by `/agent`).
pub fn start_session(deps: Arc<AgentDeps>, principal: String, objective: String) {
    let tracker = deps.tracker.clone();
    tracker.spawn("agent_session", async move {
        run_session(deps, principal, objective, None).await;
    });
}

/// Resume the latest session for a principal from its journal tail.
/// Returns a user-facing message when nothing is resumable.
pub fn resume_session(deps: Arc<AgentDeps>, principal: String) -> Option<String> {
    let latest = deps.store.latest_agent_session(&principal).ok().flatten()?;
    if matches!(
        latest.status,
        SessionStatus::Running | SessionStatus::AwaitingHuman
    ) {
        return Some("An agent session is already active.".to_string());
    }
    let journal = SessionJournal::new(&deps.config.paths.data_dir, &latest.id);
    let resume_state = journal.read_last();
    let objective = latest.objective.clone();
    let tracker = deps.tracker.clone();
    tracker.spawn("agent_resume", async move {
        run_session(deps, principal, objective, resume_state).await;
    });
    None
}

async fn run_session(
    deps: Arc<AgentDeps>,
    principal: String,
    objective: String,
    resume_from: Option<RoundRecord>,
) {
    let session_id = Uuid::now_v7().to_string();
    if let Err(e) = deps
        .store
        .create_agent_session(&session_id, &principal, &objective)
    {
        warn!(error = %e, "agent session row creation failed");
        let _ = deps
            .outbound
            .send_message(&principal, "Could not start the agent session.")
            .await;
        return;
    }

    let cancel = CancellationToken::new();
    deps.agent_cancel.insert(principal.clone(), cancel.clone());
    deps.principal_cell.set(&principal);

    let trace = deps.recorder.begin_trace(&principal, "agent");
    let journal = SessionJournal::new(&deps.config.paths.data_dir, &session_id);

    let end = with_trace(
        trace.clone(),
        drive_session(
            &deps,
            &trace,
            &session_id,
            &journal,
            &cancel,
            &principal,
            &objective,
            resume_from,
        ),
    )
    .await;

    deps.agent_cancel.remove(&principal);
    deps.hitl.clear(&principal);

    let (status, reply) = match end {
        SessionEnd::Completed(reply) => (SessionStatus::Completed, reply),
        SessionEnd::Failed(reason) => (SessionStatus::Failed, reason),
        SessionEnd::Cancelled => (
            SessionStatus::Cancelled,
            "Agent session cancelled.".to_string(),
        ),
    };
    let _ = deps.store.set_session_status(&session_id, status);

    // Final replies pass the same guardrails as chat replies.
    let outcome = deps
        .guardrails
        .validate_and_remediate(&objective, reply, &[], &trace)
        .await;
    let provider_id = deps
        .outbound
        .send_message(&principal, &outcome.reply)
        .await
        .ok()
        .flatten();

    let trace_status = match status {
        SessionStatus::Completed => "completed",
        _ => "failed",
    };
    trace.finish(trace_status, provider_id.as_deref());
    info!(session = %session_id, status = status.as_str(), "agent session finished");
}

#[allow(clippy::too_many_arguments)]
async fn drive_session(
    deps: &Arc<AgentDeps>,
    trace: &TraceHandle,
    session_id: &str,
    journal: &SessionJournal,
    cancel: &CancellationToken,
    principal: &str,
    objective: &str,
    resume_from: Option<RoundRecord>,
) -> SessionEnd {
    let gate: Arc<dyn ToolGate> = Arc::new(PolicyGate {
        policy: Arc::clone(&deps.policy),
        audit: Arc::clone(&deps.audit),
        hitl: Arc::clone(&deps.hitl),
        outbound: Arc::clone(&deps.outbound),
        store: Arc::clone(&deps.store),
        session_id: session_id.to_string(),
        principal: principal.to_string(),
        hitl_timeout: Duration::from_secs(deps.config.agent.hitl_timeout_secs),
        shell_allowlist: deps.config.agent.shell_allowlist.clone(),
    });

    // Resume goes straight to the reactive loop with the journalled state.
    if let Some(record) = resume_from {
        return run_reactive(
            deps,
            trace,
            session_id,
            journal,
            cancel,
            &gate,
            objective,
            record.task_plan_snapshot,
            record.scratchpad,
            record.round,
        )
        .await;
    }

    // UNDERSTAND: one retry, then the reactive fallback.
    let plan = match create_plan(
        &deps.provider,
        &deps.config.llm.chat_model,
        objective,
        "planner:create_plan",
        trace,
    )
    .await
    {
        Some(plan) => plan,
        None => match create_plan(
            &deps.provider,
            &deps.config.llm.chat_model,
            objective,
            "planner:create_plan",
            trace,
        )
        .await
        {
            Some(plan) => plan,
            None => {
                info!("planner unavailable, falling back to reactive session");
                return run_reactive(
                    deps,
                    trace,
                    session_id,
                    journal,
                    cancel,
                    &gate,
                    objective,
                    String::new(),
                    String::new(),
                    0,
                )
                .await;
            }
        },
    };

    run_planned(
        deps, trace, session_id, journal, cancel, &gate, objective, plan,
    )
    .await
}

/// EXECUTE + SYNTHESIZE over a structured plan, replanning up to the limit.
#[allow(clippy::too_many_arguments)]
async fn run_planned(
    deps: &Arc<AgentDeps>,
    trace: &TraceHandle,
    session_id: &str,
    journal: &SessionJournal,
    cancel: &CancellationToken,
    gate: &Arc<dyn ToolGate>,
    objective: &str,
    mut plan: AgentPlan,
) -> SessionEnd {
    let mut detector = LoopDetector::default();
    let mut replans = 0;
    let mut round = 0usize;

    loop {
        let mut done: Vec<String> = Vec::new();
        let mut results: Vec<(String, String)> = Vec::new();

        // Dependency waves: everything whose prerequisites are complete runs
        // concurrently; a wave with no ready tasks ends the execution phase.
        loop {
            if cancel.is_cancelled() {
                return SessionEnd::Cancelled;
            }
            let ready: Vec<PlannedTask> = plan
                .tasks
                .iter()
                .filter(|t| {
                    !done.contains(&t.id) && t.depends_on.iter().all(|d| done.contains(d))
                })
                .cloned()
                .collect();
            if ready.is_empty() {
                break;
            }

            let wave = join_all(
                ready
                    .iter()
                    .map(|task| run_worker(deps, trace, gate, cancel, task)),
            )
            .await;

            for (task, (output, tool_sigs)) in ready.iter().zip(wave) {
                done.push(task.id.clone());
                round += 1;
                let _ = deps.store.bump_session_round(session_id);

                for sig in &tool_sigs {
                    match detector.observe(sig) {
                        LoopSignal::Break => {
                            return SessionEnd::Failed(format!(
                                "Session stopped: the same tool call repeated {LOOP_BREAK_AT} \
                                 times ({sig})."
                            ));
                        }
                        LoopSignal::Warn => {
                            warn!(signature = %sig, "repeated tool call detected");
                        }
                        LoopSignal::None => {}
                    }
                }

                let record = RoundRecord {
                    round,
                    tool_calls: tool_sigs,
                    reply_preview: preview(&output, 200),
                    task_plan_snapshot: plan.as_markdown(&done),
                    scratchpad: extract_scratchpad(&output).unwrap_or_default(),
                };
                if let Err(e) = journal.append(&record) {
                    warn!(error = %e, "journal append failed");
                }
                results.push((task.id.clone(), output));
            }
        }

        if done.len() < plan.tasks.len() {
            warn!(
                completed = done.len(),
                total = plan.tasks.len(),
                "plan has unreachable tasks (dependency cycle?)"
            );
        }

        match synthesize(
            &deps.provider,
            &deps.config.llm.chat_model,
            objective,
            &results,
            "planner:synthesize",
            trace,
        )
        .await
        {
            Synthesis::Final(reply) => return SessionEnd::Completed(reply),
            Synthesis::Replan(reason) if replans < deps.config.agent.max_replans => {
                replans += 1;
                info!(replans, reason = %reason, "replanning");
                let amended = format!("{objective}\n\nPrevious round feedback: {reason}");
                match create_plan(
                    &deps.provider,
                    &deps.config.llm.chat_model,
                    &amended,
                    "planner:replan",
                    trace,
                )
                .await
                {
                    Some(new_plan) => plan = new_plan,
                    None => {
                        return SessionEnd::Completed(summarise_results(&results));
                    }
                }
            }
            Synthesis::Replan(_) => {
                return SessionEnd::Completed(summarise_results(&results));
            }
        }
    }
}

/// One worker = one executor run under its own span.
async fn run_worker(
    deps: &Arc<AgentDeps>,
    trace: &TraceHandle,
    gate: &Arc<dyn ToolGate>,
    cancel: &CancellationToken,
    task: &PlannedTask,
) -> (String, Vec<String>) {
    let span = trace.span(&format!("worker:{}", task.id), SpanKind::Other);
    let categories = worker_categories(&task.worker_type);
    let tools = deps
        .registry
        .select_tools(&categories, deps.config.agent.tools_per_round);

    let outcome = deps
        .executor
        .run(
            WORKER_SYSTEM,
            vec![Message::user(task.description.clone())],
            tools,
            trace,
            ExecOptions {
                parent_span_id: Some(span.span_id().to_string()),
                gate: Some(Arc::clone(gate)),
                cancel: Some(cancel.clone()),
                task_plan: None,
            },
        )
        .await;
    span.finish();

    match outcome {
        Ok(o) => {
            let sigs = o
                .tool_calls
                .iter()
                .map(|(name, args)| format!("{name}({args})"))
                .collect();
            let reply = if o.reply.is_empty() {
                "(worker produced no output)".to_string()
            } else {
                o.reply
            };
            (reply, sigs)
        }
        Err(e) => (format!("worker failed: {e}"), Vec::new()),
    }
}

/// Reactive fallback: free-running rounds with task-plan and scratchpad
/// re-injection.
#[allow(clippy::too_many_arguments)]
async fn run_reactive(
    deps: &Arc<AgentDeps>,
    trace: &TraceHandle,
    session_id: &str,
    journal: &SessionJournal,
    cancel: &CancellationToken,
    gate: &Arc<dyn ToolGate>,
    objective: &str,
    mut task_plan: String,
    mut scratchpad: String,
    start_round: usize,
) -> SessionEnd {
    let mut detector = LoopDetector::default();
    let mut last_reply = String::new();
    let categories = deps.registry.known_categories();

    for round in (start_round + 1)..=(start_round + deps.config.agent.max_iterations) {
        if cancel.is_cancelled() {
            return SessionEnd::Cancelled;
        }

        let tools = deps
            .registry
            .select_tools(&categories, deps.config.agent.tools_per_round);

        let mut history = vec![Message::user(objective.to_string())];
        if !scratchpad.is_empty() {
            history.push(Message::system(format!("Scratchpad:\n{scratchpad}")));
        }

        let outcome = match deps
            .executor
            .run(
                WORKER_SYSTEM,
                history,
                tools,
                trace,
                ExecOptions {
                    parent_span_id: None,
                    gate: Some(Arc::clone(gate)),
                    cancel: Some(cancel.clone()),
                    task_plan: if task_plan.is_empty() {
                        None
                    } else {
                        Some(task_plan.clone())
                    },
                },
            )
            .await
        {
            Ok(o) => o,
            Err(e) => return SessionEnd::Failed(format!("agent round failed: {e}")),
        };
        if outcome.cancelled {
            return SessionEnd::Cancelled;
        }

        let _ = deps.store.bump_session_round(session_id);

        for (name, args) in &outcome.tool_calls {
            let sig = format!("{name}({args})");
            match detector.observe(&sig) {
                LoopSignal::Break => {
                    return SessionEnd::Failed(format!(
                        "Session stopped: the same tool call repeated {LOOP_BREAK_AT} times \
                         ({sig})."
                    ));
                }
                LoopSignal::Warn => {
                    scratchpad.push_str(&format!(
                        "\nnote: `{sig}` has been tried several times already; change approach."
                    ));
                }
                LoopSignal::None => {}
            }
        }

        if let Some(plan) = extract_checklist(&outcome.reply) {
            task_plan = plan;
        }
        if let Some(pad) = extract_scratchpad(&outcome.reply) {
            scratchpad = pad;
        }
        if !outcome.reply.is_empty() {
            last_reply = outcome.reply.clone();
        }

        let record = RoundRecord {
            round,
            tool_calls: outcome
                .tool_calls
                .iter()
                .map(|(name, args)| format!("{name}({args})"))
                .collect(),
            reply_preview: preview(&outcome.reply, 200),
            task_plan_snapshot: task_plan.clone(),
            scratchpad: scratchpad.clone(),
        };
        if let Err(e) = journal.append(&record) {
            warn!(error = %e, "journal append failed");
        }

        // Done when the model stops calling tools and no checklist item is open.
        if outcome.tool_calls.is_empty() && unchecked_count(&task_plan) == 0 {
            return SessionEnd::Completed(strip_scratchpad(&last_reply));
        }
    }

    if last_reply.is_empty() {
        SessionEnd::Failed("Agent ran out of iterations without a result.".to_string())
    } else {
        SessionEnd::Completed(strip_scratchpad(&last_reply))
    }
}

/// Last-resort reply when synthesis cannot converge: the raw task results.
fn summarise_results(results: &[(String, String)]) -> String {
    let mut out = String::from("Here is what I completed:\n");
    for (id, output) in results {
        out.push_str(&format!("\n*{id}*\n{}\n", preview(output, 400)));
    }
    out
}

// ── loop detection ──────────────────────────────────────────────────────────

#[derive(Default)]
struct LoopDetector {
    counts: HashMap<String, usize>,
}

enum LoopSignal {
    None,
    Warn,
    Break,
}

impl LoopDetector {
    fn observe(&mut self, signature: &str) -> LoopSignal {
        let count = self.counts.entry(signature.to_string()).or_insert(0);
        *count += 1;
        if *count >= LOOP_BREAK_AT {
            LoopSignal::Break
        } else if *count == LOOP_WARN_AT {
            LoopSignal::Warn
        } else {
            LoopSignal::None
        }
    }
}

// ── text helpers ────────────────────────────────────────────────────────────

fn preview(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Scratchpad content between the last pair of tags.
pub fn extract_scratchpad(text: &str) -> Option<String> {
    let start = text.rfind("<scratchpad>")? + "<scratchpad>".len();
    let end = text[start..].find("</scratchpad>")? + start;
    Some(text[start..end].trim().to_string())
}

/// The checklist lines of a reply, if any.
pub fn extract_checklist(text: &str) -> Option<String> {
    let lines: Vec<&str> = text
        .lines()
        .filter(|l| {
            let t = l.trim_start();
            t.starts_with("- [ ]") || t.starts_with("- [x]") || t.starts_with("- [X]")
        })
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

pub fn unchecked_count(task_plan: &str) -> usize {
    task_plan
        .lines()
        .filter(|l| l.trim_start().starts_with("- [ ]"))
        .count()
}

fn strip_scratchpad(text: &str) -> String {
    match (text.find("<scratchpad>"), text.find("</scratchpad>")) {
        (Some(start), Some(end)) if end > start => {
            let mut out = String::new();
            out.push_str(&text[..start]);
            out.push_str(&text[end + "</scratchpad>".len()..]);
            out.trim().to_string()
        }
        _ => text.trim().to_string(),
    }
}
