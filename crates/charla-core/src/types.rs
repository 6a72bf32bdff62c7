use serde::{Deserialize, Serialize};
use std::fmt;

/// External identity of the single user: the sender address in the messaging
/// provider (a phone number for WhatsApp).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal(pub String);

impl Principal {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Principal {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Principal {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Quoted-message context attached when the user replies to an earlier message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyContext {
    pub quoted_message_id: String,
    pub quoted_text: Option<String>,
}

/// A validated inbound message, already parsed out of the provider webhook.
/// Audio and images arrive pre-transcribed/captioned by the upstream media
/// collaborators; the pipeline only ever sees text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub principal: Principal,
    /// Provider-assigned message id ("wamid...."). Dedup key.
    pub provider_message_id: String,
    pub text: String,
    #[serde(default)]
    pub reply_to: Option<ReplyContext>,
    pub received_at: chrono::DateTime<chrono::Utc>,
}

/// An emoji reaction to a previously sent message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionEnvelope {
    pub principal: Principal,
    /// Provider id of the message the reaction targets.
    pub target_message_id: String,
    pub emoji: String,
}

/// Everything the webhook can hand to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundEvent {
    Message(MessageEnvelope),
    Reaction(ReactionEnvelope),
}

/// Fixed reaction-to-score mapping. Emojis outside the map score 0.5 with the
/// emoji itself as the comment so nothing is silently dropped.
pub fn reaction_score(emoji: &str) -> (f64, Option<String>) {
    match emoji {
        "\u{1F44D}" | "\u{2764}\u{FE0F}" | "\u{2764}" => (1.0, None), // 👍 ❤️
        "\u{1F602}" => (0.8, None),                                   // 😂
        "\u{1F642}" | "\u{1F610}" | "\u{1F44C}" => (0.5, None),       // 🙂 😐 👌
        "\u{1F44E}" => (0.0, None),                                   // 👎
        other => (0.5, Some(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thumbs_up_scores_one() {
        assert_eq!(reaction_score("👍"), (1.0, None));
    }

    #[test]
    fn heart_scores_one() {
        assert_eq!(reaction_score("❤️"), (1.0, None));
    }

    #[test]
    fn laugh_scores_point_eight() {
        assert_eq!(reaction_score("😂"), (0.8, None));
    }

    #[test]
    fn thumbs_down_scores_zero() {
        assert_eq!(reaction_score("👎"), (0.0, None));
    }

    #[test]
    fn unknown_emoji_scores_half_with_comment() {
        let (value, comment) = reaction_score("🦀");
        assert_eq!(value, 0.5);
        assert_eq!(comment.as_deref(), Some("🦀"));
    }
}
