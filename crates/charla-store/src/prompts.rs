//! Versioned prompt storage. At most one active version per prompt name,
//! enforced in the activation transaction.

use rusqlite::OptionalExtension;

use crate::error::Result;
use crate::types::PromptVersion;
use crate::Store;

impl Store {
    /// Save a new version. The version number is the next integer for that
    /// prompt name; the new row is not active until explicitly activated.
    pub fn save_prompt_version(
        &self,
        prompt_name: &str,
        content: &str,
        created_by: &str,
    ) -> Result<i64> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn();
        let next: i64 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM prompt_versions WHERE prompt_name = ?1",
            rusqlite::params![prompt_name],
            |row| row.get(0),
        )?;
        conn.execute(
            "INSERT INTO prompt_versions
             (prompt_name, version, content, is_active, created_by, created_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?5)",
            rusqlite::params![prompt_name, next, content, created_by, now],
        )?;
        Ok(next)
    }

    /// Activate one version, deactivating any other in the same transaction.
    pub fn activate_prompt_version(&self, prompt_name: &str, version: i64) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE prompt_versions SET is_active = 0 WHERE prompt_name = ?1",
            rusqlite::params![prompt_name],
        )?;
        let n = tx.execute(
            "UPDATE prompt_versions SET is_active = 1 WHERE prompt_name = ?1 AND version = ?2",
            rusqlite::params![prompt_name, version],
        )?;
        if n == 0 {
            return Err(crate::StoreError::NotFound {
                what: format!("prompt {prompt_name} v{version}"),
            });
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_active_prompt(&self, prompt_name: &str) -> Result<Option<PromptVersion>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, prompt_name, version, content, is_active, created_by, created_at
                 FROM prompt_versions
                 WHERE prompt_name = ?1 AND is_active = 1",
                rusqlite::params![prompt_name],
                row_to_prompt,
            )
            .optional()?;
        Ok(row)
    }

    pub fn list_prompt_versions(&self, prompt_name: &str) -> Result<Vec<PromptVersion>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, prompt_name, version, content, is_active, created_by, created_at
             FROM prompt_versions WHERE prompt_name = ?1 ORDER BY version",
        )?;
        let rows = stmt.query_map(rusqlite::params![prompt_name], row_to_prompt)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

fn row_to_prompt(row: &rusqlite::Row<'_>) -> rusqlite::Result<PromptVersion> {
    Ok(PromptVersion {
        id: row.get(0)?,
        prompt_name: row.get(1)?,
        version: row.get(2)?,
        content: row.get(3)?,
        is_active: row.get::<_, i64>(4)? != 0,
        created_by: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activation_is_exclusive() {
        let store = Store::open_in_memory().unwrap();
        let v1 = store.save_prompt_version("classifier", "v1 text", "human").unwrap();
        let v2 = store.save_prompt_version("classifier", "v2 text", "agent").unwrap();
        assert_eq!((v1, v2), (1, 2));

        store.activate_prompt_version("classifier", 1).unwrap();
        store.activate_prompt_version("classifier", 2).unwrap();

        let active: Vec<_> = store
            .list_prompt_versions("classifier")
            .unwrap()
            .into_iter()
            .filter(|p| p.is_active)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].version, 2);
    }

    #[test]
    fn activating_missing_version_fails() {
        let store = Store::open_in_memory().unwrap();
        store.save_prompt_version("planner", "x", "human").unwrap();
        assert!(store.activate_prompt_version("planner", 9).is_err());
    }
}
