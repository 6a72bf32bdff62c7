//! Trace, span, and score persistence - the recorder's store-side sink.

use rusqlite::OptionalExtension;

use crate::error::Result;
use crate::types::{ScoreRow, SpanRow, TraceRow};
use crate::Store;

impl Store {
    pub fn start_trace(&self, id: &str, principal: &str, message_type: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO traces (id, principal, message_type, status, started_at)
             VALUES (?1, ?2, ?3, 'started', ?4)",
            rusqlite::params![id, principal, message_type, now],
        )?;
        Ok(())
    }

    pub fn finish_trace(
        &self,
        id: &str,
        status: &str,
        provider_message_id: Option<&str>,
    ) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "UPDATE traces
             SET status = ?1, completed_at = ?2,
                 provider_message_id = COALESCE(?3, provider_message_id)
             WHERE id = ?4",
            rusqlite::params![status, now, provider_message_id, id],
        )?;
        Ok(())
    }

    pub fn append_span(&self, span: &SpanRow) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO spans
             (id, trace_id, parent_span_id, name, kind, status, started_at,
              latency_ms, input_payload, output_payload, metadata)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            rusqlite::params![
                span.id,
                span.trace_id,
                span.parent_span_id,
                span.name,
                span.kind,
                span.status,
                span.started_at,
                span.latency_ms,
                span.input_payload,
                span.output_payload,
                span.metadata,
            ],
        )?;
        Ok(())
    }

    pub fn append_score(
        &self,
        trace_id: &str,
        name: &str,
        value: f64,
        source: &str,
        comment: Option<&str>,
    ) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO scores (trace_id, name, value, source, comment, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![trace_id, name, value, source, comment, now],
        )?;
        Ok(())
    }

    pub fn get_trace(&self, id: &str) -> Result<Option<TraceRow>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, principal, message_type, status, provider_message_id,
                        started_at, completed_at
                 FROM traces WHERE id = ?1",
                rusqlite::params![id],
                row_to_trace,
            )
            .optional()?;
        Ok(row)
    }

    /// The trace whose reply carried `provider_message_id` - how a reaction
    /// event finds the turn it scores.
    pub fn get_trace_by_provider_message(&self, provider_id: &str) -> Result<Option<TraceRow>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, principal, message_type, status, provider_message_id,
                        started_at, completed_at
                 FROM traces WHERE provider_message_id = ?1
                 ORDER BY started_at DESC LIMIT 1",
                rusqlite::params![provider_id],
                row_to_trace,
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_traces_by_principal(&self, principal: &str, limit: usize) -> Result<Vec<TraceRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, principal, message_type, status, provider_message_id,
                    started_at, completed_at
             FROM traces WHERE principal = ?1
             ORDER BY started_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![principal, limit as i64], row_to_trace)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn get_spans(&self, trace_id: &str) -> Result<Vec<SpanRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, trace_id, parent_span_id, name, kind, status, started_at,
                    latency_ms, input_payload, output_payload, metadata
             FROM spans WHERE trace_id = ?1 ORDER BY started_at",
        )?;
        let rows = stmt.query_map(rusqlite::params![trace_id], row_to_span)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Tool spans of a trace - the `/dev-review` surface.
    pub fn get_tool_calls(&self, trace_id: &str) -> Result<Vec<SpanRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, trace_id, parent_span_id, name, kind, status, started_at,
                    latency_ms, input_payload, output_payload, metadata
             FROM spans WHERE trace_id = ?1 AND kind = 'tool' ORDER BY started_at",
        )?;
        let rows = stmt.query_map(rusqlite::params![trace_id], row_to_span)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn get_scores(&self, trace_id: &str) -> Result<Vec<ScoreRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, trace_id, name, value, source, comment, created_at
             FROM scores WHERE trace_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(rusqlite::params![trace_id], |row| {
            Ok(ScoreRow {
                id: row.get(0)?,
                trace_id: row.get(1)?,
                name: row.get(2)?,
                value: row.get(3)?,
                source: row.get(4)?,
                comment: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Drop traces (with spans and scores) older than `days`. Returns the
    /// number of traces removed.
    pub fn cleanup_traces_older_than(&self, days: u32) -> Result<usize> {
        let floor = (chrono::Utc::now() - chrono::Duration::days(days as i64)).to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "DELETE FROM spans WHERE trace_id IN (SELECT id FROM traces WHERE started_at < ?1)",
            rusqlite::params![floor],
        )?;
        conn.execute(
            "DELETE FROM scores WHERE trace_id IN (SELECT id FROM traces WHERE started_at < ?1)",
            rusqlite::params![floor],
        )?;
        let n = conn.execute(
            "DELETE FROM traces WHERE started_at < ?1",
            rusqlite::params![floor],
        )?;
        Ok(n)
    }
}

fn row_to_trace(row: &rusqlite::Row<'_>) -> rusqlite::Result<TraceRow> {
    Ok(TraceRow {
        id: row.get(0)?,
        principal: row.get(1)?,
        message_type: row.get(2)?,
        status: row.get(3)?,
        provider_message_id: row.get(4)?,
        started_at: row.get(5)?,
        completed_at: row.get(6)?,
    })
}

fn row_to_span(row: &rusqlite::Row<'_>) -> rusqlite::Result<SpanRow> {
    Ok(SpanRow {
        id: row.get(0)?,
        trace_id: row.get(1)?,
        parent_span_id: row.get(2)?,
        name: row.get(3)?,
        kind: row.get(4)?,
        status: row.get(5)?,
        started_at: row.get(6)?,
        latency_ms: row.get(7)?,
        input_payload: row.get(8)?,
        output_payload: row.get(9)?,
        metadata: row.get(10)?,
    })
}
