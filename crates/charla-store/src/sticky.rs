//! Per-conversation sticky categories - the previous turn's intent set, used
//! to disambiguate follow-up messages the classifier can't place.

use rusqlite::OptionalExtension;

use crate::error::Result;
use crate::Store;

impl Store {
    pub fn set_sticky_categories(&self, conversation_id: i64, categories: &[String]) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let json = serde_json::to_string(categories)?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO conversation_state (conversation_id, sticky_categories, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(conversation_id)
             DO UPDATE SET sticky_categories = ?2, updated_at = ?3",
            rusqlite::params![conversation_id, json, now],
        )?;
        Ok(())
    }

    pub fn get_sticky_categories(&self, conversation_id: i64) -> Result<Vec<String>> {
        let conn = self.conn();
        let json: Option<String> = conn
            .query_row(
                "SELECT sticky_categories FROM conversation_state WHERE conversation_id = ?1",
                rusqlite::params![conversation_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(json
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default())
    }
}
