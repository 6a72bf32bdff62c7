//! Durable cron registry - the rows the scheduler re-registers on startup.

use crate::error::Result;
use crate::types::CronRow;
use crate::Store;

impl Store {
    pub fn save_cron(
        &self,
        id: &str,
        principal: &str,
        expression: &str,
        message: &str,
        timezone: &str,
    ) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO cron_jobs (id, principal, expression, message, timezone, active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
            rusqlite::params![id, principal, expression, message, timezone, now],
        )?;
        Ok(())
    }

    pub fn list_active_crons(&self) -> Result<Vec<CronRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, principal, expression, message, timezone, active, created_at
             FROM cron_jobs WHERE active = 1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(CronRow {
                id: row.get(0)?,
                principal: row.get(1)?,
                expression: row.get(2)?,
                message: row.get(3)?,
                timezone: row.get(4)?,
                active: row.get::<_, i64>(5)? != 0,
                created_at: row.get(6)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Deactivation keeps the row for audit; the scheduler drops the live
    /// registration separately.
    pub fn deactivate_cron(&self, id: &str) -> Result<bool> {
        let conn = self.conn();
        let n = conn.execute(
            "UPDATE cron_jobs SET active = 0 WHERE id = ?1",
            rusqlite::params![id],
        )?;
        Ok(n > 0)
    }
}
