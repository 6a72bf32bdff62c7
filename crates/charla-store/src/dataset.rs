//! Evaluation dataset entries and JSONL export.

use crate::error::Result;
use crate::types::{DatasetEntry, DatasetTier};
use crate::Store;

impl Store {
    #[allow(clippy::too_many_arguments)]
    pub fn add_dataset_entry(
        &self,
        tier: DatasetTier,
        input: &str,
        output: &str,
        expected_output: Option<&str>,
        metadata: Option<&serde_json::Value>,
        tags: &[String],
        trace_id: Option<&str>,
    ) -> Result<i64> {
        let now = chrono::Utc::now().to_rfc3339();
        let meta_json = metadata.map(|m| m.to_string());
        let tags_json = serde_json::to_string(tags)?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO dataset_entries
             (trace_id, entry_type, input, output, expected_output, metadata, tags, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                trace_id,
                tier.as_str(),
                input,
                output,
                expected_output,
                meta_json,
                tags_json,
                now
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_dataset_entries(&self, tier: Option<DatasetTier>) -> Result<Vec<DatasetEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, trace_id, entry_type, input, output, expected_output,
                    metadata, tags, created_at
             FROM dataset_entries
             WHERE (?1 IS NULL OR entry_type = ?1)
             ORDER BY id",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![tier.map(|t| t.as_str())],
            row_to_entry,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Render every entry as one JSON object per line.
    pub fn export_dataset_jsonl(&self) -> Result<String> {
        let entries = self.list_dataset_entries(None)?;
        let mut out = String::new();
        for e in entries {
            let line = serde_json::json!({
                "entry_type": e.entry_type,
                "input": e.input,
                "output": e.output,
                "expected_output": e.expected_output,
                "metadata": e.metadata,
                "tags": e.tags,
                "trace_id": e.trace_id,
                "created_at": e.created_at,
            });
            out.push_str(&line.to_string());
            out.push('\n');
        }
        Ok(out)
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<DatasetEntry> {
    let meta_str: Option<String> = row.get(6)?;
    let tags_str: String = row.get(7)?;
    Ok(DatasetEntry {
        id: row.get(0)?,
        trace_id: row.get(1)?,
        entry_type: row.get(2)?,
        input: row.get(3)?,
        output: row.get(4)?,
        expected_output: row.get(5)?,
        metadata: meta_str.and_then(|s| serde_json::from_str(&s).ok()),
        tags: serde_json::from_str(&tags_str).unwrap_or_default(),
        created_at: row.get(8)?,
    })
}
