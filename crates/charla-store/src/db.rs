use rusqlite::Connection;

use crate::error::Result;

/// Open the database file with WAL journaling and a busy timeout so background
/// writers never starve the reply path.
pub fn open(path: &str) -> Result<Connection> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let conn = Connection::open(path)?;
    // journal_mode returns the resulting mode as a row, so query it.
    let _: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(conn)
}

/// Initialise all tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_conversation_tables(conn)?;
    create_memory_tables(conn)?;
    create_ledger_table(conn)?;
    create_trace_tables(conn)?;
    create_dataset_table(conn)?;
    create_prompt_table(conn)?;
    create_state_table(conn)?;
    create_cron_table(conn)?;
    create_session_table(conn)?;
    Ok(())
}

fn create_conversation_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            principal   TEXT NOT NULL UNIQUE,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS messages (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id     INTEGER NOT NULL REFERENCES conversations(id),
            role                TEXT NOT NULL,
            text                TEXT NOT NULL,
            provider_message_id TEXT UNIQUE,
            created_at          TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_conv
            ON messages(conversation_id, id);
        CREATE TABLE IF NOT EXISTS summaries (
            id                    INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id       INTEGER NOT NULL REFERENCES conversations(id),
            text                  TEXT NOT NULL,
            covered_message_count INTEGER NOT NULL,
            created_at            TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn create_memory_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memories (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            text        TEXT NOT NULL,
            category    TEXT,
            active      INTEGER NOT NULL DEFAULT 1,
            expires_at  TEXT,
            created_at  TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS notes (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            title       TEXT NOT NULL,
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS embeddings (
            kind        TEXT NOT NULL,
            source_id   INTEGER NOT NULL,
            vector      BLOB NOT NULL,
            created_at  TEXT NOT NULL,
            PRIMARY KEY (kind, source_id)
        );",
    )?;
    Ok(())
}

fn create_ledger_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS processed_messages (
            provider_message_id TEXT PRIMARY KEY,
            created_at          TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn create_trace_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS traces (
            id                  TEXT PRIMARY KEY,
            principal           TEXT NOT NULL,
            message_type        TEXT NOT NULL,
            status              TEXT NOT NULL,
            provider_message_id TEXT,
            started_at          TEXT NOT NULL,
            completed_at        TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_traces_principal
            ON traces(principal, started_at DESC);
        CREATE TABLE IF NOT EXISTS spans (
            id             TEXT PRIMARY KEY,
            trace_id       TEXT NOT NULL REFERENCES traces(id),
            parent_span_id TEXT,
            name           TEXT NOT NULL,
            kind           TEXT NOT NULL,
            status         TEXT NOT NULL,
            started_at     TEXT NOT NULL,
            latency_ms     INTEGER NOT NULL DEFAULT 0,
            input_payload  TEXT,
            output_payload TEXT,
            metadata       TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_spans_trace ON spans(trace_id);
        CREATE TABLE IF NOT EXISTS scores (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            trace_id   TEXT NOT NULL REFERENCES traces(id),
            name       TEXT NOT NULL,
            value      REAL NOT NULL,
            source     TEXT NOT NULL,
            comment    TEXT,
            created_at TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn create_dataset_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS dataset_entries (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            trace_id        TEXT,
            entry_type      TEXT NOT NULL,
            input           TEXT NOT NULL,
            output          TEXT NOT NULL,
            expected_output TEXT,
            metadata        TEXT,
            tags            TEXT,
            created_at      TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn create_prompt_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS prompt_versions (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            prompt_name TEXT NOT NULL,
            version     INTEGER NOT NULL,
            content     TEXT NOT NULL,
            is_active   INTEGER NOT NULL DEFAULT 0,
            created_by  TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE(prompt_name, version)
        );",
    )?;
    Ok(())
}

fn create_state_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversation_state (
            conversation_id   INTEGER PRIMARY KEY REFERENCES conversations(id),
            sticky_categories TEXT NOT NULL,
            updated_at        TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn create_cron_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS cron_jobs (
            id         TEXT PRIMARY KEY,
            principal  TEXT NOT NULL,
            expression TEXT NOT NULL,
            message    TEXT NOT NULL,
            timezone   TEXT NOT NULL,
            active     INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn create_session_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS agent_sessions (
            id          TEXT PRIMARY KEY,
            principal   TEXT NOT NULL,
            objective   TEXT NOT NULL,
            status      TEXT NOT NULL,
            round_count INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );",
    )?;
    Ok(())
}
