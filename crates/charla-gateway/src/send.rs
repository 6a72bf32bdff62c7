//! WhatsApp Cloud API egress client.
//!
//! Long replies are split into ≤4096-character pieces at the most natural
//! break available; the first piece's provider message id is the one returned
//! (it is what links the trace to the delivered reply).

use std::time::Duration;

use async_trait::async_trait;
use charla_core::config::WhatsAppConfig;
use charla_core::CharlaError;
use tracing::{debug, warn};

use charla_agent::Outbound;

/// WhatsApp's hard limit is 4096 characters per text message.
const CHUNK_MAX: usize = 4096;

/// Break preferences, tried in order inside the size window.
const BREAKS: &[&str] = &["\n\n", "\n", " "];

pub struct WhatsAppClient {
    client: reqwest::Client,
    api_base: String,
    access_token: String,
    phone_number_id: String,
}

impl WhatsAppClient {
    pub fn new(config: &WhatsAppConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(20))
                .build()
                .unwrap_or_default(),
            api_base: config.api_base.clone(),
            access_token: config.access_token.clone(),
            phone_number_id: config.phone_number_id.clone(),
        }
    }

    async fn post_message(&self, body: serde_json::Value) -> Result<Option<String>, CharlaError> {
        let url = format!("{}/{}/messages", self.api_base, self.phone_number_id);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| CharlaError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(CharlaError::Transport(format!("HTTP {status}: {text}")));
        }
        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CharlaError::Transport(e.to_string()))?;
        Ok(json
            .pointer("/messages/0/id")
            .and_then(|v| v.as_str())
            .map(String::from))
    }
}

#[async_trait]
impl Outbound for WhatsAppClient {
    async fn send_message(
        &self,
        principal: &str,
        text: &str,
    ) -> Result<Option<String>, CharlaError> {
        let pieces = split_message(text);
        let mut first_id: Option<String> = None;

        for (i, piece) in pieces.iter().enumerate() {
            let body = serde_json::json!({
                "messaging_product": "whatsapp",
                "to": principal,
                "type": "text",
                "text": { "body": piece },
            });
            match self.post_message(body).await {
                Ok(id) => {
                    if first_id.is_none() {
                        first_id = id;
                    }
                }
                Err(e) => {
                    // A failed first piece fails the send; a failed later
                    // piece is logged and the rest still goes out.
                    if i == 0 {
                        return Err(e);
                    }
                    warn!(error = %e, piece = i, "piece send failed");
                }
            }
            if i + 1 < pieces.len() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }

        debug!(principal, pieces = pieces.len(), "message sent");
        Ok(first_id)
    }

    async fn send_reaction(
        &self,
        provider_message_id: &str,
        emoji: &str,
    ) -> Result<(), CharlaError> {
        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "type": "reaction",
            "reaction": { "message_id": provider_message_id, "emoji": emoji },
        });
        self.post_message(body).await.map(|_| ())
    }

    async fn mark_as_read(&self, provider_message_id: &str) -> Result<(), CharlaError> {
        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "status": "read",
            "message_id": provider_message_id,
        });
        self.post_message(body).await.map(|_| ())
    }
}

/// Split `text` into pieces that fit the provider limit.
///
/// Each piece ends at the best break found inside the size window: paragraph
/// break first, then line break, then space, then a hard cut for an unbroken
/// run. Leading whitespace of the following piece is dropped.
pub fn split_message(text: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut rest = text;

    while rest.len() > CHUNK_MAX {
        let window = window_end(rest, CHUNK_MAX);
        let cut = BREAKS
            .iter()
            .find_map(|sep| rest[..window].rfind(sep).filter(|&p| p > 0))
            .unwrap_or(window);
        let piece = rest[..cut].trim_end();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        rest = rest[cut..].trim_start_matches(|c: char| c == '\n' || c == ' ');
    }
    if !rest.is_empty() || pieces.is_empty() {
        pieces.push(rest.to_string());
    }
    pieces
}

/// Largest char-boundary index at or below `max` bytes.
fn window_end(s: &str, max: usize) -> usize {
    let mut end = max.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}
