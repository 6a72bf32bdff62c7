//! Planner calls: structured plan creation, synthesis, and replanning.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use charla_llm::{ChatRequest, LlmProvider, Message};
use charla_trace::{SpanKind, TraceHandle};
use tracing::debug;

/// Tool categories each worker type receives.
pub const WORKER_TOOL_SETS: &[(&str, &[&str])] = &[
    ("reader", &["files", "notes", "memory"]),
    ("coder", &["files", "shell"]),
    ("analyst", &["fetch", "search", "notes"]),
    ("general", &["files", "notes", "fetch"]),
];

pub fn worker_categories(worker_type: &str) -> Vec<String> {
    WORKER_TOOL_SETS
        .iter()
        .find(|(name, _)| *name == worker_type)
        .or_else(|| WORKER_TOOL_SETS.iter().find(|(name, _)| *name == "general"))
        .map(|(_, cats)| cats.iter().map(|c| c.to_string()).collect())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPlan {
    pub tasks: Vec<PlannedTask>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedTask {
    pub id: String,
    pub description: String,
    pub worker_type: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl AgentPlan {
    /// Single-task fallback used when plan parsing fails.
    pub fn fallback(objective: &str) -> Self {
        Self {
            tasks: vec![PlannedTask {
                id: "task_1".to_string(),
                description: objective.to_string(),
                worker_type: "general".to_string(),
                depends_on: Vec::new(),
            }],
        }
    }

    /// Render as a markdown checklist with `done` ids checked.
    pub fn as_markdown(&self, done: &[String]) -> String {
        self.tasks
            .iter()
            .map(|t| {
                let mark = if done.contains(&t.id) { "x" } else { " " };
                format!("- [{mark}] {}: {}", t.id, t.description)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Ask the planner for a structured plan. Returns `None` when the response
/// does not parse - the caller falls back to a single general task.
/// `span_name` distinguishes the initial plan from replans.
pub async fn create_plan(
    provider: &Arc<dyn LlmProvider>,
    model: &str,
    objective: &str,
    span_name: &str,
    trace: &TraceHandle,
) -> Option<AgentPlan> {
    let mut span = trace.span(span_name, SpanKind::Generation);
    span.set_input(objective);

    let worker_types: Vec<&str> = WORKER_TOOL_SETS.iter().map(|(n, _)| *n).collect();
    let req = ChatRequest::new(
        model.to_string(),
        vec![
            Message::system(format!(
                "You are a task planner. Break the objective into tasks. Reply with \
                 ONLY a JSON object: {{\"tasks\": [{{\"id\": \"task_1\", \
                 \"description\": \"...\", \"worker_type\": \"...\", \
                 \"depends_on\": []}}]}}. Worker types: {}.",
                worker_types.join(", ")
            )),
            Message::user(objective.to_string()),
        ],
    )
    .with_think(false);

    let resp = match provider.chat(&req).await {
        Ok(r) => {
            span.record_usage(r.input_tokens, r.output_tokens, &r.model, r.total_duration_ms);
            r
        }
        Err(e) => {
            span.fail(&e.to_string());
            span.finish();
            return None;
        }
    };
    span.set_output(&resp.text);
    span.finish();

    parse_plan(&resp.text)
}

/// Extract the JSON object from a possibly prose-wrapped planner reply.
pub fn parse_plan(raw: &str) -> Option<AgentPlan> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    let plan: AgentPlan = serde_json::from_str(&raw[start..=end]).ok()?;
    if plan.tasks.is_empty() {
        debug!("planner returned an empty task list");
        return None;
    }
    Some(plan)
}

/// Outcome of the synthesis step.
pub enum Synthesis {
    Final(String),
    /// The planner wants another planning round; carries its reasoning.
    Replan(String),
}

/// Review worker results and either produce the final reply or request a
/// replan (reply starting with `REPLAN:`).
pub async fn synthesize(
    provider: &Arc<dyn LlmProvider>,
    model: &str,
    objective: &str,
    results: &[(String, String)],
    span_name: &str,
    trace: &TraceHandle,
) -> Synthesis {
    let mut span = trace.span(span_name, SpanKind::Generation);

    let summary: String = results
        .iter()
        .map(|(id, out)| {
            let preview: String = out.chars().take(800).collect();
            format!("## {id}\n{preview}")
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let req = ChatRequest::new(
        model.to_string(),
        vec![
            Message::system(
                "Review the task results against the objective. If the objective is met, \
                 write the final reply for the user. If more work is needed, reply with \
                 a single line starting with 'REPLAN:' followed by what is missing."
                    .to_string(),
            ),
            Message::user(format!("Objective: {objective}\n\nResults:\n{summary}")),
        ],
    );

    match provider.chat(&req).await {
        Ok(resp) => {
            span.record_usage(
                resp.input_tokens,
                resp.output_tokens,
                &resp.model,
                resp.total_duration_ms,
            );
            span.set_output(&resp.text);
            span.finish();
            let text = resp.text.trim().to_string();
            match text.strip_prefix("REPLAN:") {
                Some(reason) => Synthesis::Replan(reason.trim().to_string()),
                None => Synthesis::Final(text),
            }
        }
        Err(e) => {
            span.fail(&e.to_string());
            span.finish();
            // Synthesis failure degrades to a plain results dump.
            Synthesis::Final(format!("Completed with partial results:\n\n{summary}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_json_parses_from_prose_wrapper() {
        let raw = r#"Here is the plan:
{"tasks": [
  {"id": "task_1", "description": "read the notes", "worker_type": "reader", "depends_on": []},
  {"id": "task_2", "description": "write summary", "worker_type": "coder", "depends_on": ["task_1"]}
]}
Good luck!"#;
        let plan = parse_plan(raw).unwrap();
        assert_eq!(plan.tasks.len(), 2);
        assert_eq!(plan.tasks[1].depends_on, vec!["task_1"]);
    }

    #[test]
    fn garbage_plan_yields_none() {
        assert!(parse_plan("I cannot plan this").is_none());
        assert!(parse_plan(r#"{"tasks": []}"#).is_none());
    }

    #[test]
    fn unknown_worker_type_falls_back_to_general() {
        assert_eq!(
            worker_categories("astronaut"),
            vec!["files", "notes", "fetch"]
        );
        assert_eq!(worker_categories("coder"), vec!["files", "shell"]);
    }

    #[test]
    fn markdown_checklist_marks_done_tasks() {
        let plan = AgentPlan {
            tasks: vec![
                PlannedTask {
                    id: "task_1".to_string(),
                    description: "a".to_string(),
                    worker_type: "general".to_string(),
                    depends_on: vec![],
                },
                PlannedTask {
                    id: "task_2".to_string(),
                    description: "b".to_string(),
                    worker_type: "general".to_string(),
                    depends_on: vec![],
                },
            ],
        };
        let md = plan.as_markdown(&["task_1".to_string()]);
        assert!(md.contains("- [x] task_1"));
        assert!(md.contains("- [ ] task_2"));
    }
}
