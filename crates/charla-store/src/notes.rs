//! User notes - titled documents the assistant can search semantically.

use rusqlite::OptionalExtension;

use crate::error::Result;
use crate::types::Note;
use crate::Store;

impl Store {
    pub fn add_note(&self, title: &str, content: &str) -> Result<i64> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO notes (title, content, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![title, content, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_note(&self, id: i64) -> Result<Option<Note>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, title, content, created_at FROM notes WHERE id = ?1",
                rusqlite::params![id],
                row_to_note,
            )
            .optional()?;
        Ok(row)
    }

    pub fn list_notes(&self, limit: usize) -> Result<Vec<Note>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, title, content, created_at FROM notes ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(rusqlite::params![limit as i64], row_to_note)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn delete_note(&self, id: i64) -> Result<bool> {
        let conn = self.conn();
        let n = conn.execute("DELETE FROM notes WHERE id = ?1", rusqlite::params![id])?;
        Ok(n > 0)
    }
}

fn row_to_note(row: &rusqlite::Row<'_>) -> rusqlite::Result<Note> {
    Ok(Note {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        created_at: row.get(3)?,
    })
}
