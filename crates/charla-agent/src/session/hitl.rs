//! Human-in-the-loop mailbox.
//!
//! One pending approval slot per principal. A flagged tool call parks a
//! oneshot sender here; the next inbound message matching an approval pattern
//! resolves it. Requesting again overwrites the slot (the old waiter resolves
//! to deny when its sender drops).

use dashmap::DashMap;
use tokio::sync::oneshot;

pub struct HitlMailbox {
    pending: DashMap<String, oneshot::Sender<bool>>,
}

impl HitlMailbox {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }

    /// Park an approval request for `principal`.
    pub fn request(&self, principal: &str) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(principal.to_string(), tx);
        rx
    }

    pub fn is_pending(&self, principal: &str) -> bool {
        self.pending.contains_key(principal)
    }

    /// Try to interpret `text` as an approval reply. Returns the decision if
    /// a request was pending and the text matched; `None` otherwise (the
    /// message then flows through the normal pipeline).
    pub fn try_resolve(&self, principal: &str, text: &str) -> Option<bool> {
        let decision = parse_approval(text)?;
        let (_, tx) = self.pending.remove(principal)?;
        let _ = tx.send(decision);
        Some(decision)
    }

    /// Drop a pending request without resolving (session ended or timed out).
    pub fn clear(&self, principal: &str) {
        self.pending.remove(principal);
    }
}

impl Default for HitlMailbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Bilingual yes/no matching.
fn parse_approval(text: &str) -> Option<bool> {
    let normalized = text.trim().to_lowercase();
    match normalized.as_str() {
        "yes" | "y" | "si" | "sí" | "ok" | "approve" | "dale" => Some(true),
        "no" | "n" | "deny" | "cancel" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn yes_resolves_to_approved() {
        let mailbox = HitlMailbox::new();
        let rx = mailbox.request("+34");
        assert!(mailbox.is_pending("+34"));

        assert_eq!(mailbox.try_resolve("+34", "sí"), Some(true));
        assert!(!mailbox.is_pending("+34"));
        assert_eq!(rx.await, Ok(true));
    }

    #[tokio::test]
    async fn no_resolves_to_denied() {
        let mailbox = HitlMailbox::new();
        let rx = mailbox.request("+34");
        assert_eq!(mailbox.try_resolve("+34", "no"), Some(false));
        assert_eq!(rx.await, Ok(false));
    }

    #[tokio::test]
    async fn unrelated_text_leaves_the_slot_pending() {
        let mailbox = HitlMailbox::new();
        let _rx = mailbox.request("+34");
        assert_eq!(mailbox.try_resolve("+34", "¿qué hora es?"), None);
        assert!(mailbox.is_pending("+34"));
    }

    #[tokio::test]
    async fn resolution_without_request_is_ignored() {
        let mailbox = HitlMailbox::new();
        assert_eq!(mailbox.try_resolve("+34", "yes"), None);
    }
}
