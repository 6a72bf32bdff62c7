//! The guardrails runner: deterministic checks, optional LLM judges, and
//! single-shot remediation, all under one `guardrails` span.

use std::sync::Arc;
use std::time::Duration;

use charla_core::config::GuardrailsConfig;
use charla_llm::{ChatRequest, LlmProvider, Message};
use charla_trace::{SpanGuard, SpanKind, TraceHandle};
use tracing::{debug, warn};

use crate::checks::{self, CheckResult};
use crate::language;
use crate::pii;

pub struct GuardrailsPipeline {
    config: GuardrailsConfig,
    provider: Arc<dyn LlmProvider>,
    chat_model: String,
    judge_model: String,
}

/// Result of validating one reply.
pub struct GuardrailOutcome {
    pub reply: String,
    pub checks: Vec<CheckResult>,
    pub remediated: bool,
}

impl GuardrailsPipeline {
    pub fn new(
        config: GuardrailsConfig,
        provider: Arc<dyn LlmProvider>,
        chat_model: impl Into<String>,
        judge_model: impl Into<String>,
    ) -> Self {
        Self {
            config,
            provider,
            chat_model: chat_model.into(),
            judge_model: judge_model.into(),
        }
    }

    /// Validate `reply`, applying single-shot remediation where a check's
    /// policy allows it. Every check's score lands on the trace with
    /// `source = system`. Never fails: the worst case is the original reply
    /// passed through with failing scores recorded.
    pub async fn validate_and_remediate(
        &self,
        user_text: &str,
        reply: String,
        tool_outputs: &[String],
        trace: &TraceHandle,
    ) -> GuardrailOutcome {
        if !self.config.enabled {
            return GuardrailOutcome {
                reply,
                checks: Vec::new(),
                remediated: false,
            };
        }

        let span = trace.span("guardrails", SpanKind::Guardrail);
        let mut checks: Vec<CheckResult> = Vec::new();
        let mut current = reply;
        let mut remediated = false;

        // not_empty - retry once with a direct re-prompt.
        let result = checks::not_empty(&current);
        if !result.passed {
            let prompt = format!(
                "The user said:\n{user_text}\n\nYour previous reply was empty. \
                 Write a short, helpful reply now."
            );
            if let Some(fixed) = self.remediate(&prompt, &span).await {
                if !fixed.trim().is_empty() {
                    current = fixed;
                    remediated = true;
                }
            }
        }
        checks.push(result);

        // language_match - remediate with a bilingual hint, target language first.
        if self.config.language_check {
            let result = language::language_match(user_text, &current);
            if !result.passed {
                let lang = result.details.clone();
                let prompt = format!(
                    "El usuario escribió:\n{user_text}\n\nTu borrador:\n{current}\n\n\
                     responde en {lang} con el mismo contenido.\n\n\
                     IMPORTANT: reply in the user's language."
                );
                if let Some(fixed) = self.remediate(&prompt, &span).await {
                    if !fixed.trim().is_empty() {
                        current = fixed;
                        remediated = true;
                    }
                }
            }
            checks.push(result);
        }

        // PII - redact in place, no LLM involved.
        if self.config.pii_check {
            let (result, redacted) = pii::check_and_redact(&current, user_text);
            if let Some(clean) = redacted {
                current = clean;
            }
            checks.push(result);
        }

        // Length and raw-JSON checks log and pass through.
        let result = checks::excessive_length(&current);
        if !result.passed {
            warn!(details = %result.details, "reply exceeds length guardrail, sending anyway");
        }
        checks.push(result);

        let result = checks::no_raw_tool_json(&current);
        if !result.passed {
            warn!("reply contains raw tool-call JSON");
        }
        checks.push(result);

        // Opt-in LLM judges, each under the configured timeout, fail-open.
        if self.config.llm_checks {
            if !tool_outputs.is_empty() {
                checks.push(
                    self.run_judge(
                        "tool_coherence",
                        format!(
                            "Tool outputs:\n{}\n\nReply:\n{}\n\nDoes the reply correctly use \
                             the tool outputs? Answer only yes or no.",
                            tool_outputs.join("\n---\n"),
                            current
                        ),
                    )
                    .await,
                );
            }
            checks.push(
                self.run_judge(
                    "hallucination_check",
                    format!(
                        "User message:\n{user_text}\n\nReply:\n{current}\n\nDoes the reply state \
                         anything not supported by the conversation? Answer only yes for \
                         unsupported claims, no otherwise."
                    ),
                )
                .await,
            );
        }

        for check in &checks {
            trace.score(
                check.name,
                check.value,
                "system",
                if check.details.is_empty() {
                    None
                } else {
                    Some(check.details.as_str())
                },
            );
        }

        span.finish();
        GuardrailOutcome {
            reply: current,
            checks,
            remediated,
        }
    }

    /// One remediation generation in a child span. Returns `None` on any
    /// failure - the caller keeps the original reply.
    async fn remediate(&self, prompt: &str, parent: &SpanGuard) -> Option<String> {
        let mut child = parent.child("guardrails:remediation", SpanKind::Generation);
        child.set_input(prompt);

        let req = ChatRequest::new(self.chat_model.clone(), vec![Message::user(prompt)]);
        match self.provider.chat(&req).await {
            Ok(resp) => {
                child.record_usage(
                    resp.input_tokens,
                    resp.output_tokens,
                    &resp.model,
                    resp.total_duration_ms,
                );
                child.set_output(&resp.text);
                child.finish();
                Some(resp.text)
            }
            Err(e) => {
                debug!(error = %e, "remediation call failed, keeping original reply");
                child.fail(&e.to_string());
                child.finish();
                None
            }
        }
    }

    /// Binary yes/no judge with `think` disabled. Timeout or error ⇒ fail-open.
    async fn run_judge(&self, name: &'static str, prompt: String) -> CheckResult {
        let req = ChatRequest::new(self.judge_model.clone(), vec![Message::user(&prompt)])
            .with_think(false);
        let timeout = Duration::from_secs(self.config.llm_timeout_secs);

        match tokio::time::timeout(timeout, self.provider.chat(&req)).await {
            Ok(Ok(resp)) => {
                let verdict = resp.text.trim().to_lowercase();
                // "yes" means the judge found a problem for hallucination_check,
                // but means coherent for tool_coherence - normalise per judge.
                let problem = match name {
                    "hallucination_check" => verdict.starts_with("yes"),
                    _ => verdict.starts_with("no"),
                };
                if problem {
                    CheckResult::fail(name, verdict)
                } else {
                    CheckResult::pass(name)
                }
            }
            Ok(Err(e)) => {
                debug!(judge = name, error = %e, "judge call failed, failing open");
                CheckResult::errored(name)
            }
            Err(_) => {
                debug!(judge = name, "judge timed out, failing open");
                CheckResult::errored(name)
            }
        }
    }
}
