use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use charla_store::types::SpanRow;
use charla_store::Store;
use tracing::debug;
use uuid::Uuid;

/// Payloads stored on spans are capped at this many characters.
const MAX_PAYLOAD_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Generation,
    Tool,
    Guardrail,
    Retrieval,
    Other,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Generation => "generation",
            SpanKind::Tool => "tool",
            SpanKind::Guardrail => "guardrail",
            SpanKind::Retrieval => "retrieval",
            SpanKind::Other => "other",
        }
    }
}

impl fmt::Display for SpanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Factory for trace handles. One per process.
pub struct TraceRecorder {
    store: Arc<Store>,
    enabled: bool,
    sample_rate: f64,
    remote_endpoint: Option<String>,
    client: reqwest::Client,
}

impl TraceRecorder {
    pub fn new(
        store: Arc<Store>,
        enabled: bool,
        sample_rate: f64,
        remote_endpoint: Option<String>,
    ) -> Self {
        Self {
            store,
            enabled,
            sample_rate,
            remote_endpoint,
            client: reqwest::Client::new(),
        }
    }

    /// Begin a trace for one inbound message or agent session.
    ///
    /// The sampling coin is flipped here; a sampled-out message gets a no-op
    /// handle so call sites stay identical either way.
    pub fn begin_trace(&self, principal: &str, message_type: &str) -> TraceHandle {
        let sampled = self.enabled && rand::random::<f64>() < self.sample_rate;
        if !sampled {
            return TraceHandle { inner: None };
        }

        let id = Uuid::new_v4().to_string();
        if let Err(e) = self.store.start_trace(&id, principal, message_type) {
            debug!(error = %e, "trace start failed, disabling trace");
            return TraceHandle { inner: None };
        }

        TraceHandle {
            inner: Some(Arc::new(TraceInner {
                id,
                store: Arc::clone(&self.store),
                remote_endpoint: self.remote_endpoint.clone(),
                client: self.client.clone(),
            })),
        }
    }
}

struct TraceInner {
    id: String,
    store: Arc<Store>,
    remote_endpoint: Option<String>,
    client: reqwest::Client,
}

/// Cheap, clonable handle bound to one trace (or to nothing when sampled out).
#[derive(Clone)]
pub struct TraceHandle {
    inner: Option<Arc<TraceInner>>,
}

impl TraceHandle {
    /// Handle that records nothing. Used when tracing is disabled and in tests.
    pub fn noop() -> Self {
        Self { inner: None }
    }

    pub fn is_sampled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.inner.as_deref().map(|i| i.id.as_str())
    }

    /// Open a span. Closes (and records) on drop or on an explicit finish.
    pub fn span(&self, name: &str, kind: SpanKind) -> SpanGuard {
        self.span_with_parent(name, kind, None)
    }

    pub fn span_with_parent(
        &self,
        name: &str,
        kind: SpanKind,
        parent_span_id: Option<&str>,
    ) -> SpanGuard {
        SpanGuard {
            trace: self.inner.clone(),
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            kind,
            parent_span_id: parent_span_id.map(String::from),
            started_at: chrono::Utc::now().to_rfc3339(),
            started: Instant::now(),
            status: "completed".to_string(),
            input_payload: None,
            output_payload: None,
            metadata: serde_json::Map::new(),
            recorded: false,
        }
    }

    /// Attach a score to this trace.
    pub fn score(&self, name: &str, value: f64, source: &str, comment: Option<&str>) {
        if let Some(inner) = &self.inner {
            if let Err(e) = inner.store.append_score(&inner.id, name, value, source, comment) {
                debug!(error = %e, score = name, "score append failed");
            }
        }
    }

    /// Close the trace. `provider_message_id` links the trace to the sent
    /// reply so reactions can find it later.
    pub fn finish(&self, status: &str, provider_message_id: Option<&str>) {
        if let Some(inner) = &self.inner {
            if let Err(e) = inner.store.finish_trace(&inner.id, status, provider_message_id) {
                debug!(error = %e, "trace finish failed");
            }
        }
    }
}

/// Scoped span: fill in payloads/metadata, then drop (or `finish`) to record.
pub struct SpanGuard {
    trace: Option<Arc<TraceInner>>,
    id: String,
    name: String,
    kind: SpanKind,
    parent_span_id: Option<String>,
    started_at: String,
    started: Instant,
    status: String,
    input_payload: Option<String>,
    output_payload: Option<String>,
    metadata: serde_json::Map<String, serde_json::Value>,
    recorded: bool,
}

impl SpanGuard {
    pub fn span_id(&self) -> &str {
        &self.id
    }

    /// Open a child span under this one.
    pub fn child(&self, name: &str, kind: SpanKind) -> SpanGuard {
        let handle = TraceHandle {
            inner: self.trace.clone(),
        };
        handle.span_with_parent(name, kind, Some(&self.id))
    }

    pub fn set_input(&mut self, payload: &str) {
        self.input_payload = Some(truncate_chars(payload, MAX_PAYLOAD_CHARS));
    }

    pub fn set_output(&mut self, payload: &str) {
        self.output_payload = Some(truncate_chars(payload, MAX_PAYLOAD_CHARS));
    }

    pub fn set_metadata(&mut self, key: &str, value: serde_json::Value) {
        self.metadata.insert(key.to_string(), value);
    }

    /// Attach token usage in the conventional gen_ai keys.
    pub fn record_usage(&mut self, input_tokens: u32, output_tokens: u32, model: &str, duration_ms: u64) {
        self.set_metadata("gen_ai.usage.input_tokens", input_tokens.into());
        self.set_metadata("gen_ai.usage.output_tokens", output_tokens.into());
        self.set_metadata("gen_ai.response.model", model.into());
        self.set_metadata("total_duration_ms", duration_ms.into());
    }

    pub fn fail(&mut self, reason: &str) {
        self.status = "failed".to_string();
        self.set_output(reason);
    }

    /// Record now instead of at drop.
    pub fn finish(mut self) {
        self.record();
    }

    fn record(&mut self) {
        if self.recorded {
            return;
        }
        self.recorded = true;

        let Some(inner) = &self.trace else { return };

        let row = SpanRow {
            id: self.id.clone(),
            trace_id: inner.id.clone(),
            parent_span_id: self.parent_span_id.clone(),
            name: self.name.clone(),
            kind: self.kind.as_str().to_string(),
            status: self.status.clone(),
            started_at: self.started_at.clone(),
            latency_ms: self.started.elapsed().as_millis() as i64,
            input_payload: self.input_payload.clone(),
            output_payload: self.output_payload.clone(),
            metadata: if self.metadata.is_empty() {
                None
            } else {
                Some(serde_json::Value::Object(self.metadata.clone()).to_string())
            },
        };

        if let Err(e) = inner.store.append_span(&row) {
            debug!(error = %e, span = %self.name, "span append failed");
        }

        // Optional remote sink: fire-and-forget, never on the critical path.
        if let Some(endpoint) = &inner.remote_endpoint {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let client = inner.client.clone();
                let endpoint = endpoint.clone();
                let body = serde_json::json!({
                    "trace_id": row.trace_id,
                    "span_id": row.id,
                    "name": row.name,
                    "kind": row.kind,
                    "status": row.status,
                    "latency_ms": row.latency_ms,
                });
                handle.spawn(async move {
                    if let Err(e) = client.post(&endpoint).json(&body).send().await {
                        debug!(error = %e, "remote span sink failed");
                    }
                });
            }
        }
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        self.record();
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(store: Arc<Store>, rate: f64) -> TraceRecorder {
        TraceRecorder::new(store, true, rate, None)
    }

    #[test]
    fn sampled_out_handle_is_noop() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let rec = recorder(Arc::clone(&store), 0.0);
        let trace = rec.begin_trace("+34", "chat");
        assert!(!trace.is_sampled());

        let span = trace.span("anything", SpanKind::Other);
        drop(span);
        trace.score("not_empty", 1.0, "system", None);
        trace.finish("completed", None);
        // Nothing persisted anywhere.
        assert!(store.get_traces_by_principal("+34", 10).unwrap().is_empty());
    }

    #[test]
    fn spans_form_a_parent_child_tree() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let rec = recorder(Arc::clone(&store), 1.0);
        let trace = rec.begin_trace("+34", "chat");
        let trace_id = trace.trace_id().unwrap().to_string();

        {
            let parent = trace.span("guardrails", SpanKind::Guardrail);
            let child = parent.child("guardrails:remediation", SpanKind::Generation);
            drop(child);
            drop(parent);
        }
        trace.finish("completed", Some("wamid.R"));

        let spans = store.get_spans(&trace_id).unwrap();
        assert_eq!(spans.len(), 2);
        let child = spans
            .iter()
            .find(|s| s.name == "guardrails:remediation")
            .unwrap();
        let parent = spans.iter().find(|s| s.name == "guardrails").unwrap();
        assert_eq!(child.parent_span_id.as_deref(), Some(parent.id.as_str()));

        let row = store.get_trace(&trace_id).unwrap().unwrap();
        assert_eq!(row.provider_message_id.as_deref(), Some("wamid.R"));
    }

    #[test]
    fn payloads_are_truncated_to_limit() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let rec = recorder(Arc::clone(&store), 1.0);
        let trace = rec.begin_trace("+34", "chat");
        let trace_id = trace.trace_id().unwrap().to_string();

        let mut span = trace.span("tool:fetch_url", SpanKind::Tool);
        span.set_output(&"x".repeat(5000));
        span.finish();

        let spans = store.get_spans(&trace_id).unwrap();
        let out = spans[0].output_payload.as_ref().unwrap();
        assert!(out.chars().count() <= MAX_PAYLOAD_CHARS + 1);
    }

    #[test]
    fn usage_metadata_lands_on_span() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let rec = recorder(Arc::clone(&store), 1.0);
        let trace = rec.begin_trace("+34", "chat");
        let trace_id = trace.trace_id().unwrap().to_string();

        let mut span = trace.span("llm:iteration_1", SpanKind::Generation);
        span.record_usage(120, 30, "qwen3:14b", 900);
        span.finish();

        let spans = store.get_spans(&trace_id).unwrap();
        let meta: serde_json::Value =
            serde_json::from_str(spans[0].metadata.as_ref().unwrap()).unwrap();
        assert_eq!(meta["gen_ai.usage.input_tokens"], 120);
        assert_eq!(meta["gen_ai.response.model"], "qwen3:14b");
    }
}
