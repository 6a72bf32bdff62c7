//! Webhook ingress: provider event parsing → dedup → rate limit → pipeline.
//!
//! Signature verification and TLS live in front of this process; by the time
//! a request lands here it is trusted transport. The handler always answers
//! 200 so the provider stops retrying - drops are deliberate and logged.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use charla_core::types::{InboundEvent, MessageEnvelope, Principal, ReactionEnvelope, ReplyContext};
use charla_store::dedup::DedupOutcome;
use tracing::{debug, info, warn};

use crate::app::AppState;

pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<serde_json::Value>,
) -> StatusCode {
    for event in parse_events(&payload) {
        dispatch(&state, event);
    }
    StatusCode::OK
}

fn dispatch(state: &Arc<AppState>, event: InboundEvent) {
    let (principal, provider_id) = match &event {
        InboundEvent::Message(m) => (m.principal.clone(), m.provider_message_id.clone()),
        InboundEvent::Reaction(r) => (r.principal.clone(), format!("react:{}", r.target_message_id)),
    };

    // Single-user system: anything outside the allowlist is dropped outright.
    if !state
        .deps
        .config
        .allowed_principals
        .iter()
        .any(|p| p == principal.as_str())
    {
        warn!(principal = %principal, "unknown principal, dropping event");
        return;
    }

    // First-wins dedup: concurrent webhook retries cost at most one pipeline run.
    if state.deps.store.claim_provider_message(&provider_id) == DedupOutcome::AlreadySeen {
        debug!(provider_id, "duplicate event dropped");
        return;
    }

    // Rate limit: silently drop, no reply.
    if !state.limiter.accepted(principal.as_str()) {
        info!(principal = %principal, "rate limited, dropping event");
        return;
    }

    let deps = Arc::clone(&state.deps);
    state.deps.tracker.clone().spawn("pipeline", async move {
        charla_agent::pipeline::handle_event(deps, event).await;
    });
}

/// Flatten the provider's entry/changes nesting into typed events. Unsupported
/// message types are dropped with a debug log.
pub fn parse_events(payload: &serde_json::Value) -> Vec<InboundEvent> {
    let mut events = Vec::new();

    let entries = payload
        .get("entry")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    for entry in &entries {
        let changes = entry
            .get("changes")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        for change in &changes {
            let messages = change
                .pointer("/value/messages")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            for message in &messages {
                if let Some(event) = parse_message(message) {
                    events.push(event);
                }
            }
        }
    }
    events
}

fn parse_message(message: &serde_json::Value) -> Option<InboundEvent> {
    let from = message.get("from").and_then(|v| v.as_str())?;
    let id = message.get("id").and_then(|v| v.as_str())?;
    let kind = message.get("type").and_then(|v| v.as_str())?;

    match kind {
        "text" => {
            let body = message.pointer("/text/body").and_then(|v| v.as_str())?;
            let reply_to = message
                .pointer("/context/id")
                .and_then(|v| v.as_str())
                .map(|quoted| ReplyContext {
                    quoted_message_id: quoted.to_string(),
                    quoted_text: message
                        .pointer("/context/quoted_text")
                        .and_then(|v| v.as_str())
                        .map(String::from),
                });
            Some(InboundEvent::Message(MessageEnvelope {
                principal: Principal::from(from),
                provider_message_id: id.to_string(),
                text: body.to_string(),
                reply_to,
                received_at: chrono::Utc::now(),
            }))
        }
        "reaction" => {
            let target = message
                .pointer("/reaction/message_id")
                .and_then(|v| v.as_str())?;
            let emoji = message
                .pointer("/reaction/emoji")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            Some(InboundEvent::Reaction(ReactionEnvelope {
                principal: Principal::from(from),
                target_message_id: target.to_string(),
                emoji: emoji.to_string(),
            }))
        }
        other => {
            debug!(kind = other, "unsupported message type dropped");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_payload(id: &str, body: &str) -> serde_json::Value {
        serde_json::json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "messages": [{
                            "from": "34600111222",
                            "id": id,
                            "type": "text",
                            "text": { "body": body }
                        }]
                    }
                }]
            }]
        })
    }

    #[test]
    fn text_message_parses_to_envelope() {
        let events = parse_events(&text_payload("wamid.X", "hola"));
        assert_eq!(events.len(), 1);
        match &events[0] {
            InboundEvent::Message(m) => {
                assert_eq!(m.principal.as_str(), "34600111222");
                assert_eq!(m.provider_message_id, "wamid.X");
                assert_eq!(m.text, "hola");
            }
            _ => panic!("expected a message event"),
        }
    }

    #[test]
    fn reaction_parses_to_reaction_event() {
        let payload = serde_json::json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "messages": [{
                            "from": "34600111222",
                            "id": "wamid.react1",
                            "type": "reaction",
                            "reaction": { "message_id": "wamid.R", "emoji": "👎" }
                        }]
                    }
                }]
            }]
        });
        let events = parse_events(&payload);
        assert_eq!(events.len(), 1);
        match &events[0] {
            InboundEvent::Reaction(r) => {
                assert_eq!(r.target_message_id, "wamid.R");
                assert_eq!(r.emoji, "👎");
            }
            _ => panic!("expected a reaction event"),
        }
    }

    #[test]
    fn unsupported_types_are_dropped() {
        let payload = serde_json::json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "messages": [{
                            "from": "34600111222",
                            "id": "wamid.S",
                            "type": "sticker",
                            "sticker": { "id": "abc" }
                        }]
                    }
                }]
            }]
        });
        assert!(parse_events(&payload).is_empty());
    }

    #[test]
    fn malformed_payload_parses_to_nothing() {
        assert!(parse_events(&serde_json::json!({"unexpected": true})).is_empty());
        assert!(parse_events(&serde_json::json!(null)).is_empty());
    }
}
