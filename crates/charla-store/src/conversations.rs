//! Conversations, messages, and summaries.
//!
//! Message ordering is strictly by integer id. History windowing returns the
//! verbatim tail plus the latest summary covering everything older - no LLM
//! call happens here.

use rusqlite::OptionalExtension;

use crate::error::Result;
use crate::types::{Conversation, MessageRole, StoredMessage, Summary};
use crate::Store;

impl Store {
    /// Look up or lazily create the conversation for a principal.
    pub fn get_or_create_conversation(&self, principal: &str) -> Result<i64> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO conversations (principal, created_at, updated_at)
             VALUES (?1, ?2, ?2)",
            rusqlite::params![principal, now],
        )?;
        // Read back - covers the race where two tasks insert simultaneously.
        let id = conn.query_row(
            "SELECT id FROM conversations WHERE principal = ?1",
            rusqlite::params![principal],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn get_conversation(&self, id: i64) -> Result<Option<Conversation>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, principal, created_at, updated_at FROM conversations WHERE id = ?1",
                rusqlite::params![id],
                |row| {
                    Ok(Conversation {
                        id: row.get(0)?,
                        principal: row.get(1)?,
                        created_at: row.get(2)?,
                        updated_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Append a message. `provider_message_id` is unique when present; a
    /// second insert with the same id is a conflict the egress layer relies on.
    pub fn save_message(
        &self,
        conversation_id: i64,
        role: MessageRole,
        text: &str,
        provider_message_id: Option<&str>,
    ) -> Result<i64> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO messages (conversation_id, role, text, provider_message_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![conversation_id, role.as_str(), text, provider_message_id, now],
        )?;
        let id = conn.last_insert_rowid();
        conn.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            rusqlite::params![now, conversation_id],
        )?;
        Ok(id)
    }

    /// Last `n` messages, oldest first.
    pub fn get_recent_messages(&self, conversation_id: i64, n: usize) -> Result<Vec<StoredMessage>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, role, text, provider_message_id, created_at
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![conversation_id, n as i64], row_to_message)?;
        let mut msgs: Vec<_> = rows.filter_map(|r| r.ok()).collect();
        msgs.reverse();
        Ok(msgs)
    }

    /// Verbatim tail of `verbatim_n` messages plus the latest summary covering
    /// the part that fell out of the window (if one exists).
    pub fn get_windowed_history(
        &self,
        conversation_id: i64,
        verbatim_n: usize,
    ) -> Result<(Vec<StoredMessage>, Option<Summary>)> {
        let tail = self.get_recent_messages(conversation_id, verbatim_n)?;
        let total = self.count_messages(conversation_id)?;
        let summary = if total > tail.len() as i64 {
            self.latest_summary(conversation_id)?
        } else {
            None
        };
        Ok((tail, summary))
    }

    pub fn count_messages(&self, conversation_id: i64) -> Result<i64> {
        let conn = self.conn();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            rusqlite::params![conversation_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn latest_summary(&self, conversation_id: i64) -> Result<Option<Summary>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, conversation_id, text, covered_message_count, created_at
                 FROM summaries
                 WHERE conversation_id = ?1
                 ORDER BY id DESC
                 LIMIT 1",
                rusqlite::params![conversation_id],
                |row| {
                    Ok(Summary {
                        id: row.get(0)?,
                        conversation_id: row.get(1)?,
                        text: row.get(2)?,
                        covered_message_count: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn write_summary(
        &self,
        conversation_id: i64,
        text: &str,
        covered_message_count: i64,
    ) -> Result<i64> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO summaries (conversation_id, text, covered_message_count, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![conversation_id, text, covered_message_count, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Messages accumulated since the latest summary's coverage mark. Drives
    /// the background summarisation trigger.
    pub fn unsummarised_count(&self, conversation_id: i64) -> Result<i64> {
        let total = self.count_messages(conversation_id)?;
        let covered = self
            .latest_summary(conversation_id)?
            .map(|s| s.covered_message_count)
            .unwrap_or(0);
        Ok((total - covered).max(0))
    }

    /// Remove all messages from a conversation, returning them so the caller
    /// can write a snapshot. Memories and summaries are untouched.
    pub fn clear_conversation(&self, conversation_id: i64) -> Result<Vec<StoredMessage>> {
        let removed = {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, role, text, provider_message_id, created_at
                 FROM messages WHERE conversation_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(rusqlite::params![conversation_id], row_to_message)?;
            rows.filter_map(|r| r.ok()).collect::<Vec<_>>()
        };
        let conn = self.conn();
        conn.execute(
            "DELETE FROM messages WHERE conversation_id = ?1",
            rusqlite::params![conversation_id],
        )?;
        Ok(removed)
    }

    /// Enforce the per-conversation message cap by deleting the oldest rows.
    /// Summaries cover what the window loses. Returns how many were removed.
    pub fn trim_conversation(&self, conversation_id: i64, max_messages: usize) -> Result<usize> {
        let total = self.count_messages(conversation_id)?;
        let excess = total - max_messages as i64;
        if excess <= 0 {
            return Ok(0);
        }
        let conn = self.conn();
        let n = conn.execute(
            "DELETE FROM messages WHERE id IN (
                SELECT id FROM messages WHERE conversation_id = ?1
                ORDER BY id LIMIT ?2
            )",
            rusqlite::params![conversation_id, excess],
        )?;
        Ok(n)
    }

    /// Find the message carrying a provider id (reaction targets, reply-to).
    pub fn get_message_by_provider_id(&self, provider_id: &str) -> Result<Option<StoredMessage>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, conversation_id, role, text, provider_message_id, created_at
                 FROM messages WHERE provider_message_id = ?1",
                rusqlite::params![provider_id],
                row_to_message,
            )
            .optional()?;
        Ok(row)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let role_str: String = row.get(2)?;
    Ok(StoredMessage {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role: role_str.parse().unwrap_or(MessageRole::User),
        text: row.get(3)?,
        provider_message_id: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_is_created_once() {
        let store = Store::open_in_memory().unwrap();
        let a = store.get_or_create_conversation("+34600111222").unwrap();
        let b = store.get_or_create_conversation("+34600111222").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn messages_are_ordered_by_id() {
        let store = Store::open_in_memory().unwrap();
        let conv = store.get_or_create_conversation("+1").unwrap();
        for i in 0..5 {
            store
                .save_message(conv, MessageRole::User, &format!("m{i}"), None)
                .unwrap();
        }
        let recent = store.get_recent_messages(conv, 3).unwrap();
        let texts: Vec<_> = recent.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn windowed_history_attaches_summary_only_when_older_messages_exist() {
        let store = Store::open_in_memory().unwrap();
        let conv = store.get_or_create_conversation("+1").unwrap();
        for i in 0..4 {
            store
                .save_message(conv, MessageRole::User, &format!("m{i}"), None)
                .unwrap();
        }
        store.write_summary(conv, "earlier talk", 2).unwrap();

        let (tail, summary) = store.get_windowed_history(conv, 2).unwrap();
        assert_eq!(tail.len(), 2);
        assert!(summary.is_some());

        let (tail, summary) = store.get_windowed_history(conv, 10).unwrap();
        assert_eq!(tail.len(), 4);
        assert!(summary.is_none());
    }

    #[test]
    fn duplicate_provider_id_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        let conv = store.get_or_create_conversation("+1").unwrap();
        store
            .save_message(conv, MessageRole::Assistant, "hi", Some("wamid.1"))
            .unwrap();
        let dup = store.save_message(conv, MessageRole::Assistant, "hi again", Some("wamid.1"));
        assert!(dup.is_err());
    }

    #[test]
    fn trim_deletes_only_the_oldest_excess() {
        let store = Store::open_in_memory().unwrap();
        let conv = store.get_or_create_conversation("+1").unwrap();
        for i in 0..6 {
            store
                .save_message(conv, MessageRole::User, &format!("m{i}"), None)
                .unwrap();
        }
        assert_eq!(store.trim_conversation(conv, 4).unwrap(), 2);
        let remaining = store.get_recent_messages(conv, 10).unwrap();
        assert_eq!(remaining[0].text, "m2");
        assert_eq!(store.trim_conversation(conv, 4).unwrap(), 0);
    }

    #[test]
    fn clear_returns_removed_and_keeps_summaries() {
        let store = Store::open_in_memory().unwrap();
        let conv = store.get_or_create_conversation("+1").unwrap();
        store.save_message(conv, MessageRole::User, "a", None).unwrap();
        store.write_summary(conv, "s", 1).unwrap();

        let removed = store.clear_conversation(conv).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(store.count_messages(conv).unwrap(), 0);
        assert!(store.latest_summary(conv).unwrap().is_some());
    }
}
