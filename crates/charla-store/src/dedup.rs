//! Processed-message ledger - atomic first-wins dedup of webhook deliveries.

use tracing::warn;

use crate::Store;

/// Outcome of a dedup claim. At most one caller per provider id sees
/// `Claimed`; everyone else gets `AlreadySeen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    Claimed,
    AlreadySeen,
}

impl Store {
    /// Claim a provider message id. `INSERT OR IGNORE` makes the first-wins
    /// race a single atomic statement; the changed-row count tells us whether
    /// we won it.
    ///
    /// Store failures resolve to `Claimed` (fail-open): a duplicate costs one
    /// extra pipeline run, a dropped first webhook would lose the message.
    pub fn claim_provider_message(&self, provider_id: &str) -> DedupOutcome {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn();
        match conn.execute(
            "INSERT OR IGNORE INTO processed_messages (provider_message_id, created_at)
             VALUES (?1, ?2)",
            rusqlite::params![provider_id, now],
        ) {
            Ok(1) => DedupOutcome::Claimed,
            Ok(_) => DedupOutcome::AlreadySeen,
            Err(e) => {
                warn!(provider_id, error = %e, "dedup claim failed, failing open");
                DedupOutcome::Claimed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_claim_wins() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(
            store.claim_provider_message("wamid.X"),
            DedupOutcome::Claimed
        );
        assert_eq!(
            store.claim_provider_message("wamid.X"),
            DedupOutcome::AlreadySeen
        );
    }

    #[test]
    fn distinct_ids_both_claim() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(
            store.claim_provider_message("wamid.A"),
            DedupOutcome::Claimed
        );
        assert_eq!(
            store.claim_provider_message("wamid.B"),
            DedupOutcome::Claimed
        );
    }
}
