//! Long-term memories: globally scoped facts with soft delete.
//!
//! The `self_correction` category is special: entries expire within 24 hours,
//! are never mirrored to the markdown file, and insertion is rate-limited to
//! one per guardrail kind every two hours.

use rusqlite::OptionalExtension;

use crate::error::Result;
use crate::types::Memory;
use crate::Store;

/// Category reserved for guardrail-driven self corrections.
pub const SELF_CORRECTION: &str = "self_correction";
/// Hours a self-correction memory stays alive.
const SELF_CORRECTION_TTL_HOURS: i64 = 24;
/// Minimum hours between two self corrections for the same guardrail kind.
const SELF_CORRECTION_COOLDOWN_HOURS: i64 = 2;

impl Store {
    pub fn add_memory(&self, text: &str, category: Option<&str>) -> Result<i64> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO memories (text, category, active, expires_at, created_at)
             VALUES (?1, ?2, 1, NULL, ?3)",
            rusqlite::params![text, category, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert a self-correction memory for `kind` unless one was recorded for
    /// the same kind within the cooldown window. Returns the new id, or `None`
    /// when the cooldown suppressed it.
    pub fn add_self_correction(&self, kind: &str, text: &str) -> Result<Option<i64>> {
        let now = chrono::Utc::now();
        let cooldown_floor =
            (now - chrono::Duration::hours(SELF_CORRECTION_COOLDOWN_HOURS)).to_rfc3339();
        let prefix = format!("{kind}:%");

        let conn = self.conn();
        let recent: Option<i64> = conn
            .query_row(
                "SELECT id FROM memories
                 WHERE category = ?1 AND text LIKE ?2 AND created_at > ?3
                 LIMIT 1",
                rusqlite::params![SELF_CORRECTION, prefix, cooldown_floor],
                |row| row.get(0),
            )
            .optional()?;
        if recent.is_some() {
            return Ok(None);
        }

        let expires = (now + chrono::Duration::hours(SELF_CORRECTION_TTL_HOURS)).to_rfc3339();
        conn.execute(
            "INSERT INTO memories (text, category, active, expires_at, created_at)
             VALUES (?1, ?2, 1, ?3, ?4)",
            rusqlite::params![
                format!("{kind}: {text}"),
                SELF_CORRECTION,
                expires,
                now.to_rfc3339()
            ],
        )?;
        Ok(Some(conn.last_insert_rowid()))
    }

    /// Soft delete. The row stays; `active` flips so the indexer can prune the
    /// vector on its next pass.
    pub fn soft_delete_memory(&self, id: i64) -> Result<bool> {
        let conn = self.conn();
        let n = conn.execute(
            "UPDATE memories SET active = 0 WHERE id = ?1 AND active = 1",
            rusqlite::params![id],
        )?;
        Ok(n > 0)
    }

    /// Active, unexpired memories, newest first.
    pub fn list_active_memories(&self, limit: Option<usize>) -> Result<Vec<Memory>> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, text, category, active, expires_at, created_at
             FROM memories
             WHERE active = 1 AND (expires_at IS NULL OR expires_at > ?1)
             ORDER BY id DESC
             LIMIT ?2",
        )?;
        let cap = limit.map(|n| n as i64).unwrap_or(i64::MAX);
        let rows = stmt.query_map(rusqlite::params![now, cap], row_to_memory)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn get_memory(&self, id: i64) -> Result<Option<Memory>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, text, category, active, expires_at, created_at
                 FROM memories WHERE id = ?1",
                rusqlite::params![id],
                row_to_memory,
            )
            .optional()?;
        Ok(row)
    }

    /// Find an active memory whose text contains `needle` (used by `/forget <text>`).
    pub fn find_memory_by_text(&self, needle: &str) -> Result<Option<Memory>> {
        let pattern = format!("%{needle}%");
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, text, category, active, expires_at, created_at
                 FROM memories
                 WHERE active = 1 AND text LIKE ?1
                 ORDER BY id DESC LIMIT 1",
                rusqlite::params![pattern],
                row_to_memory,
            )
            .optional()?;
        Ok(row)
    }
}

pub(crate) fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<Memory> {
    Ok(Memory {
        id: row.get(0)?,
        text: row.get(1)?,
        category: row.get(2)?,
        active: row.get::<_, i64>(3)? != 0,
        expires_at: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_delete_hides_from_active_list() {
        let store = Store::open_in_memory().unwrap();
        let id = store.add_memory("likes green tea", None).unwrap();
        assert_eq!(store.list_active_memories(None).unwrap().len(), 1);
        assert!(store.soft_delete_memory(id).unwrap());
        assert!(store.list_active_memories(None).unwrap().is_empty());
        // Row still exists for the indexer prune pass.
        assert!(store.get_memory(id).unwrap().is_some());
    }

    #[test]
    fn self_correction_cooldown_suppresses_repeat() {
        let store = Store::open_in_memory().unwrap();
        let first = store
            .add_self_correction("language_match", "reply in the user's language")
            .unwrap();
        assert!(first.is_some());
        let second = store
            .add_self_correction("language_match", "again")
            .unwrap();
        assert!(second.is_none());
        // Different kind is not affected by the cooldown.
        let other = store.add_self_correction("not_empty", "say something").unwrap();
        assert!(other.is_some());
    }

    #[test]
    fn self_correction_carries_expiry() {
        let store = Store::open_in_memory().unwrap();
        let id = store
            .add_self_correction("no_pii", "never echo phone numbers")
            .unwrap()
            .unwrap();
        let mem = store.get_memory(id).unwrap().unwrap();
        assert_eq!(mem.category.as_deref(), Some(SELF_CORRECTION));
        assert!(mem.expires_at.is_some());
    }

    #[test]
    fn find_by_text_matches_substring() {
        let store = Store::open_in_memory().unwrap();
        store.add_memory("timezone is Europe/Madrid", None).unwrap();
        let found = store.find_memory_by_text("Europe/Madrid").unwrap();
        assert!(found.is_some());
    }
}
