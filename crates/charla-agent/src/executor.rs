//! Bounded LLM ↔ tools loop.
//!
//! Flow per iteration: generation (with the active tool schemas) → split tool
//! calls into meta/regular preserving indices → meta calls expand the active
//! tool set inline → regular calls run concurrently → results re-enter the
//! message list in original call order → stale results are pruned → repeat.
//! The final iteration always runs without tools so the loop ends in text.
//!
//! The active tool set is an immutable snapshot per iteration: meta-tool
//! additions take effect on the next one.

use std::sync::Arc;
use std::time::Duration;

use charla_core::CharlaError;
use charla_llm::{ChatRequest, LlmProvider, Message, ToolCall};
use charla_trace::{SpanKind, TraceHandle};
use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::compact::compact_tool_output;
use crate::tools::{meta_tool_definition, registry::ToolRegistry, to_definitions, Tool, META_TOOL};

/// Tool-result messages older than this many iterations are pruned.
const STALE_AFTER_ITERATIONS: usize = 2;
/// Preview length for pruned results.
const PRUNE_PREVIEW_CHARS: usize = 120;
/// The running tool set never grows beyond this multiple of the budget.
const MAX_ACTIVE_MULTIPLIER: usize = 2;

/// Verdict from the security gate for one regular tool call.
pub enum GateDecision {
    Allow,
    /// Returned as the tool's output; the call never executes.
    Deny(String),
}

/// Security hook consulted before each non-meta tool call (agent mode).
/// FLAG resolution - pausing for human approval - happens inside `check`.
#[async_trait::async_trait]
pub trait ToolGate: Send + Sync {
    async fn check(&self, tool: &str, args: &serde_json::Value) -> GateDecision;
}

/// Per-run options.
#[derive(Default)]
pub struct ExecOptions {
    pub parent_span_id: Option<String>,
    pub gate: Option<Arc<dyn ToolGate>>,
    /// Agent mode: the markdown checklist re-injected every iteration.
    pub task_plan: Option<String>,
    pub cancel: Option<CancellationToken>,
}

pub struct ExecutorOutcome {
    pub reply: String,
    pub iterations: usize,
    /// Raw outputs of every executed tool, in call order.
    pub tool_outputs: Vec<String>,
    /// (name, arguments) of every executed tool call, in call order.
    pub tool_calls: Vec<(String, serde_json::Value)>,
    pub cancelled: bool,
}

pub struct ToolExecutor {
    provider: Arc<dyn LlmProvider>,
    registry: Arc<ToolRegistry>,
    chat_model: String,
    compact_model: String,
    max_iterations: usize,
    tools_per_call: usize,
    llm_timeout: Duration,
}

struct Entry {
    msg: Message,
    /// Iteration that produced this tool result; `None` for everything else.
    tool_iter: Option<usize>,
    pruned: bool,
}

impl ToolExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        registry: Arc<ToolRegistry>,
        chat_model: impl Into<String>,
        compact_model: impl Into<String>,
        max_iterations: usize,
        tools_per_call: usize,
        llm_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            registry,
            chat_model: chat_model.into(),
            compact_model: compact_model.into(),
            max_iterations,
            tools_per_call,
            llm_timeout,
        }
    }

    /// Drive the loop to a textual reply.
    pub async fn run(
        &self,
        system_message: &str,
        history: Vec<Message>,
        initial_tools: Vec<Arc<dyn Tool>>,
        trace: &TraceHandle,
        opts: ExecOptions,
    ) -> Result<ExecutorOutcome, CharlaError> {
        let mut active_tools: Vec<Arc<dyn Tool>> = Vec::new();
        for tool in initial_tools {
            if !active_tools.iter().any(|t| t.name() == tool.name()) {
                active_tools.push(tool);
            }
        }

        let mut entries: Vec<Entry> = Vec::with_capacity(history.len() + 8);
        entries.push(Entry {
            msg: Message::system(system_message),
            tool_iter: None,
            pruned: false,
        });
        for msg in history {
            entries.push(Entry {
                msg,
                tool_iter: None,
                pruned: false,
            });
        }

        let mut outcome = ExecutorOutcome {
            reply: String::new(),
            iterations: 0,
            tool_outputs: Vec::new(),
            tool_calls: Vec::new(),
            cancelled: false,
        };

        for iteration in 1..=self.max_iterations {
            if opts
                .cancel
                .as_ref()
                .is_some_and(|token| token.is_cancelled())
            {
                outcome.cancelled = true;
                return Ok(outcome);
            }

            outcome.iterations = iteration;
            self.prune_stale(&mut entries, iteration);

            let final_iteration = iteration == self.max_iterations;
            let tool_defs = if final_iteration || active_tools.is_empty() {
                Vec::new()
            } else {
                let mut defs = vec![meta_tool_definition()];
                defs.extend(to_definitions(&active_tools));
                defs
            };

            let mut request_messages: Vec<Message> =
                entries.iter().map(|e| e.msg.clone()).collect();
            if let Some(plan) = &opts.task_plan {
                request_messages.push(Message::system(format!("Current task plan:\n{plan}")));
            }

            let req = ChatRequest::new(self.chat_model.clone(), request_messages)
                .with_tools(tool_defs);

            let mut span = trace.span_with_parent(
                &format!("llm:iteration_{iteration}"),
                SpanKind::Generation,
                opts.parent_span_id.as_deref(),
            );
            let resp = match tokio::time::timeout(self.llm_timeout, self.provider.chat(&req)).await
            {
                Ok(Ok(resp)) => resp,
                Ok(Err(e)) => {
                    span.fail(&e.to_string());
                    span.finish();
                    return Err(CharlaError::Llm(e.to_string()));
                }
                Err(_) => {
                    span.fail("timeout");
                    span.finish();
                    return Err(CharlaError::Timeout {
                        what: "llm.chat".to_string(),
                        ms: self.llm_timeout.as_millis() as u64,
                    });
                }
            };
            span.record_usage(
                resp.input_tokens,
                resp.output_tokens,
                &resp.model,
                resp.total_duration_ms,
            );
            span.finish();

            if resp.is_final_text() {
                info!(iteration, "tool loop complete");
                outcome.reply = resp.text;
                return Ok(outcome);
            }

            if !resp.text.is_empty() {
                entries.push(Entry {
                    msg: Message::assistant(resp.text.clone()),
                    tool_iter: None,
                    pruned: false,
                });
            }

            // Split into meta and regular calls, keeping original indices so
            // results re-enter the conversation in call order.
            let mut meta_calls: Vec<(usize, ToolCall)> = Vec::new();
            let mut regular_calls: Vec<(usize, ToolCall)> = Vec::new();
            for (index, call) in resp.tool_calls.into_iter().enumerate() {
                if call.name == META_TOOL {
                    meta_calls.push((index, call));
                } else {
                    regular_calls.push((index, call));
                }
            }

            let mut results: Vec<(usize, String)> = Vec::new();

            for (index, call) in &meta_calls {
                let content = self.handle_meta_call(&call.arguments, &mut active_tools);
                results.push((*index, content));
            }

            let snapshot = active_tools.clone();
            let executed = join_all(regular_calls.iter().map(|(index, call)| {
                let tools = &snapshot;
                let gate = opts.gate.clone();
                let parent = opts.parent_span_id.clone();
                async move {
                    let output = self
                        .execute_one(call, tools, gate.as_deref(), parent.as_deref(), trace)
                        .await;
                    (*index, call.clone(), output)
                }
            }))
            .await;

            for (index, call, output) in executed {
                outcome.tool_calls.push((call.name.clone(), call.arguments));
                outcome.tool_outputs.push(output.clone());
                results.push((index, output));
            }

            results.sort_by_key(|(index, _)| *index);
            for (_, content) in results {
                entries.push(Entry {
                    msg: Message::tool(content),
                    tool_iter: Some(iteration),
                    pruned: false,
                });
            }
        }

        // All iterations spent and the final (tool-less) call still didn't
        // return - the loop above always returns inside the final iteration,
        // so reaching here means max_iterations == 0.
        Ok(outcome)
    }

    /// Resolve `request_more_tools` against the registry, de-duplicating into
    /// the running set under the hard cap.
    fn handle_meta_call(
        &self,
        args: &serde_json::Value,
        active_tools: &mut Vec<Arc<dyn Tool>>,
    ) -> String {
        let requested: Vec<String> = args
            .get("categories")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        if requested.is_empty() {
            return "No new tools added (no categories requested).".to_string();
        }

        let per_cat = (self.tools_per_call / requested.len().max(1)).max(2);
        let cap = self.tools_per_call * MAX_ACTIVE_MULTIPLIER;
        let mut added: Vec<String> = Vec::new();

        for category in &requested {
            let already_active = active_tools.iter().any(|t| t.category() == category);
            if already_active {
                continue;
            }
            for tool in self
                .registry
                .tools_for_category(category)
                .into_iter()
                .take(per_cat)
            {
                if active_tools.len() >= cap {
                    break;
                }
                if !active_tools.iter().any(|t| t.name() == tool.name()) {
                    added.push(tool.name().to_string());
                    active_tools.push(tool);
                }
            }
        }

        if added.is_empty() {
            "No new tools added (categories already active or unknown).".to_string()
        } else {
            debug!(added = ?added, "meta-tool expanded the active set");
            format!("Added tools: [{}]", added.join(", "))
        }
    }

    /// Gate, execute, and compact one regular tool call inside a tool span.
    async fn execute_one(
        &self,
        call: &ToolCall,
        tools: &[Arc<dyn Tool>],
        gate: Option<&dyn ToolGate>,
        parent_span_id: Option<&str>,
        trace: &TraceHandle,
    ) -> String {
        let mut span = trace.span_with_parent(
            &format!("tool:{}", call.name),
            SpanKind::Tool,
            parent_span_id,
        );
        span.set_input(&call.arguments.to_string());

        if let Some(gate) = gate {
            if let GateDecision::Deny(message) = gate.check(&call.name, &call.arguments).await {
                span.fail(&message);
                span.finish();
                return message;
            }
        }

        let Some(tool) = tools.iter().find(|t| t.name() == call.name) else {
            let message = format!("unknown tool: {}", call.name);
            span.fail(&message);
            span.finish();
            return message;
        };

        let result = tool.execute(call.arguments.clone()).await;
        if result.is_error {
            warn!(tool = %call.name, "tool returned an error");
        }
        let output =
            compact_tool_output(&result.content, self.provider.as_ref(), &self.compact_model)
                .await;
        span.set_output(&output);
        span.finish();
        output
    }

    /// Replace tool results older than the last two iterations with a short
    /// summary so context length stays bounded.
    fn prune_stale(&self, entries: &mut [Entry], current_iteration: usize) {
        for entry in entries.iter_mut() {
            let Some(produced_at) = entry.tool_iter else {
                continue;
            };
            if entry.pruned || produced_at + STALE_AFTER_ITERATIONS >= current_iteration {
                continue;
            }
            let preview: String = entry.msg.content.chars().take(PRUNE_PREVIEW_CHARS).collect();
            entry.msg.content = format!("[stale tool result, summarised] {preview}");
            entry.pruned = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolResult;
    use async_trait::async_trait;
    use charla_llm::{ChatResponse, ProviderError, Role};
    use std::sync::Mutex;

    /// Provider that answers with a scripted sequence and records every request.
    struct ScriptedProvider {
        script: Mutex<Vec<ChatResponse>>,
        requests: Mutex<Vec<ChatRequest>>,
        /// When true, keep emitting a tool call as long as tools are offered.
        loop_forever: bool,
    }

    impl ScriptedProvider {
        fn new(script: Vec<ChatResponse>) -> Self {
            Self {
                script: Mutex::new(script),
                requests: Mutex::new(Vec::new()),
                loop_forever: false,
            }
        }

        fn looping() -> Self {
            Self {
                script: Mutex::new(Vec::new()),
                requests: Mutex::new(Vec::new()),
                loop_forever: true,
            }
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    fn tool_call_response(name: &str, args: serde_json::Value) -> ChatResponse {
        ChatResponse {
            tool_calls: vec![ToolCall {
                name: name.to_string(),
                arguments: args,
            }],
            ..Default::default()
        }
    }

    fn text_response(text: &str) -> ChatResponse {
        ChatResponse {
            text: text.to_string(),
            ..Default::default()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            self.requests.lock().unwrap().push(req.clone());
            if self.loop_forever {
                return Ok(if req.tools.is_empty() {
                    text_response("forced final answer")
                } else {
                    tool_call_response("probe", serde_json::json!({"n": 1}))
                });
            }
            Ok(self
                .script
                .lock()
                .unwrap()
                .remove(0))
        }

        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            Ok(vec![])
        }
    }

    struct SleepyTool {
        name: String,
        category: String,
        delay_ms: u64,
    }

    #[async_trait]
    impl Tool for SleepyTool {
        fn name(&self) -> &str {
            &self.name
        }
        fn description(&self) -> &str {
            "test tool"
        }
        fn category(&self) -> &str {
            &self.category
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, _input: serde_json::Value) -> ToolResult {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            ToolResult::success(format!("output of {}", self.name))
        }
    }

    fn tool(name: &str, category: &str, delay_ms: u64) -> Arc<dyn Tool> {
        Arc::new(SleepyTool {
            name: name.to_string(),
            category: category.to_string(),
            delay_ms,
        })
    }

    fn executor(provider: Arc<ScriptedProvider>, registry: Arc<ToolRegistry>) -> ToolExecutor {
        ToolExecutor::new(
            provider,
            registry,
            "chat-model",
            "compact-model",
            5,
            8,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn loop_is_bounded_and_final_call_has_no_tools() {
        let provider = Arc::new(ScriptedProvider::looping());
        let registry = Arc::new(ToolRegistry::new());
        registry.register(tool("probe", "test", 0));
        let exec = executor(Arc::clone(&provider), Arc::clone(&registry));

        let outcome = exec
            .run(
                "system",
                vec![Message::user("go")],
                vec![registry.find("probe").unwrap()],
                &TraceHandle::noop(),
                ExecOptions::default(),
            )
            .await
            .unwrap();

        // Exactly 5 generations; the 5th was made with tools disabled.
        assert_eq!(provider.request_count(), 5);
        let requests = provider.requests.lock().unwrap();
        assert!(requests[..4].iter().all(|r| !r.tools.is_empty()));
        assert!(requests[4].tools.is_empty());
        assert_eq!(outcome.reply, "forced final answer");
        assert_eq!(outcome.iterations, 5);
    }

    #[tokio::test]
    async fn tool_results_keep_original_call_order() {
        // slow first, fast second: completion order inverts, message order must not.
        let provider = Arc::new(ScriptedProvider::new(vec![
            ChatResponse {
                tool_calls: vec![
                    ToolCall {
                        name: "slow".to_string(),
                        arguments: serde_json::json!({}),
                    },
                    ToolCall {
                        name: "fast".to_string(),
                        arguments: serde_json::json!({}),
                    },
                ],
                ..Default::default()
            },
            text_response("done"),
        ]));
        let registry = Arc::new(ToolRegistry::new());
        registry.register(tool("slow", "test", 80));
        registry.register(tool("fast", "test", 0));
        let exec = executor(Arc::clone(&provider), Arc::clone(&registry));

        let outcome = exec
            .run(
                "system",
                vec![Message::user("go")],
                vec![
                    registry.find("slow").unwrap(),
                    registry.find("fast").unwrap(),
                ],
                &TraceHandle::noop(),
                ExecOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.tool_outputs.len(), 2);
        // The second request carries both tool results, slow before fast.
        let requests = provider.requests.lock().unwrap();
        let tool_msgs: Vec<&Message> = requests[1]
            .messages
            .iter()
            .filter(|m| matches!(m.role, Role::Tool))
            .collect();
        assert_eq!(tool_msgs.len(), 2);
        assert!(tool_msgs[0].content.contains("slow"));
        assert!(tool_msgs[1].content.contains("fast"));
    }

    #[tokio::test]
    async fn meta_call_expands_tool_set_for_next_iteration() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_call_response(
                META_TOOL,
                serde_json::json!({"categories": ["extra"], "reason": "need more"}),
            ),
            text_response("done"),
        ]));
        let registry = Arc::new(ToolRegistry::new());
        registry.register(tool("base_tool", "base", 0));
        registry.register(tool("extra_tool", "extra", 0));
        let exec = executor(Arc::clone(&provider), Arc::clone(&registry));

        exec.run(
            "system",
            vec![Message::user("go")],
            vec![registry.find("base_tool").unwrap()],
            &TraceHandle::noop(),
            ExecOptions::default(),
        )
        .await
        .unwrap();

        let requests = provider.requests.lock().unwrap();
        // First request: meta + base only. Second: extra_tool joined.
        let first: Vec<_> = requests[0].tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(first, vec![META_TOOL, "base_tool"]);
        let second: Vec<_> = requests[1].tools.iter().map(|t| t.name.as_str()).collect();
        assert!(second.contains(&"extra_tool"));
        // The meta result message reports what was added.
        let tool_msgs: Vec<_> = requests[1]
            .messages
            .iter()
            .filter(|m| matches!(m.role, Role::Tool))
            .collect();
        assert!(tool_msgs[0].content.contains("Added tools: [extra_tool]"));
    }

    #[tokio::test]
    async fn unknown_category_reports_no_new_tools() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_call_response(META_TOOL, serde_json::json!({"categories": ["martian"]})),
            text_response("done"),
        ]));
        let registry = Arc::new(ToolRegistry::new());
        registry.register(tool("base_tool", "base", 0));
        let exec = executor(Arc::clone(&provider), Arc::clone(&registry));

        let outcome = exec
            .run(
                "system",
                vec![Message::user("go")],
                vec![registry.find("base_tool").unwrap()],
                &TraceHandle::noop(),
                ExecOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.reply, "done");
        let requests = provider.requests.lock().unwrap();
        let tool_msgs: Vec<_> = requests[1]
            .messages
            .iter()
            .filter(|m| matches!(m.role, Role::Tool))
            .collect();
        assert!(tool_msgs[0].content.starts_with("No new tools added"));
    }

    #[tokio::test]
    async fn gate_deny_becomes_tool_output_without_execution() {
        struct DenyAll;
        #[async_trait]
        impl ToolGate for DenyAll {
            async fn check(&self, tool: &str, _args: &serde_json::Value) -> GateDecision {
                GateDecision::Deny(format!("Command blocked: {tool} is not allowed"))
            }
        }

        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_call_response("probe", serde_json::json!({})),
            text_response("done"),
        ]));
        let registry = Arc::new(ToolRegistry::new());
        registry.register(tool("probe", "test", 0));
        let exec = executor(Arc::clone(&provider), Arc::clone(&registry));

        let outcome = exec
            .run(
                "system",
                vec![Message::user("go")],
                vec![registry.find("probe").unwrap()],
                &TraceHandle::noop(),
                ExecOptions {
                    gate: Some(Arc::new(DenyAll)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome.tool_outputs.len(), 1);
        assert!(outcome.tool_outputs[0].starts_with("Command blocked:"));
        assert_eq!(outcome.reply, "done");
    }

    #[tokio::test]
    async fn stale_results_are_pruned_after_two_iterations() {
        let big_output = "useful data ".repeat(20);
        let provider = Arc::new(ScriptedProvider::looping());
        let registry = Arc::new(ToolRegistry::new());
        struct BigTool(String);
        #[async_trait]
        impl Tool for BigTool {
            fn name(&self) -> &str {
                "probe"
            }
            fn description(&self) -> &str {
                "big"
            }
            fn category(&self) -> &str {
                "test"
            }
            fn input_schema(&self) -> serde_json::Value {
                serde_json::json!({"type": "object"})
            }
            async fn execute(&self, _input: serde_json::Value) -> ToolResult {
                ToolResult::success(self.0.clone())
            }
        }
        registry.register(Arc::new(BigTool(big_output)));
        let exec = executor(Arc::clone(&provider), Arc::clone(&registry));

        exec.run(
            "system",
            vec![Message::user("go")],
            vec![registry.find("probe").unwrap()],
            &TraceHandle::noop(),
            ExecOptions::default(),
        )
        .await
        .unwrap();

        // By the 5th request the iteration-1 result must be pruned.
        let requests = provider.requests.lock().unwrap();
        let last = &requests[4];
        let first_tool_msg = last
            .messages
            .iter()
            .find(|m| matches!(m.role, Role::Tool))
            .unwrap();
        assert!(first_tool_msg.content.starts_with("[stale tool result"));
    }

    #[tokio::test]
    async fn task_plan_is_reinjected_every_iteration() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_call_response("probe", serde_json::json!({})),
            text_response("done"),
        ]));
        let registry = Arc::new(ToolRegistry::new());
        registry.register(tool("probe", "test", 0));
        let exec = executor(Arc::clone(&provider), Arc::clone(&registry));

        exec.run(
            "system",
            vec![Message::user("go")],
            vec![registry.find("probe").unwrap()],
            &TraceHandle::noop(),
            ExecOptions {
                task_plan: Some("- [ ] write file".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let requests = provider.requests.lock().unwrap();
        for req in requests.iter() {
            let plan_msgs = req
                .messages
                .iter()
                .filter(|m| m.content.contains("Current task plan"))
                .count();
            assert_eq!(plan_msgs, 1);
        }
    }

    #[tokio::test]
    async fn cancellation_stops_before_the_next_generation() {
        let provider = Arc::new(ScriptedProvider::looping());
        let registry = Arc::new(ToolRegistry::new());
        registry.register(tool("probe", "test", 0));
        let exec = executor(Arc::clone(&provider), Arc::clone(&registry));

        let token = CancellationToken::new();
        token.cancel();
        let outcome = exec
            .run(
                "system",
                vec![Message::user("go")],
                vec![registry.find("probe").unwrap()],
                &TraceHandle::noop(),
                ExecOptions {
                    cancel: Some(token),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(outcome.cancelled);
        assert_eq!(provider.request_count(), 0);
    }
}
