//! Persistence layer - the narrow repository contract the pipeline consumes.
//!
//! One SQLite file, WAL mode, short critical sections behind a
//! `Mutex<Connection>`. Each entity family lives in its own module as an
//! `impl Store` block; callers only ever see the operations named here.

use std::sync::Mutex;

use rusqlite::Connection;

pub mod conversations;
pub mod crons;
pub mod dataset;
pub mod db;
pub mod dedup;
pub mod embeddings;
pub mod error;
pub mod memories;
pub mod notes;
pub mod prompts;
pub mod sessions;
pub mod sticky;
pub mod traces;
pub mod types;

pub use error::{Result, StoreError};

/// Shared handle over the single SQLite database.
pub struct Store {
    db: Mutex<Connection>,
}

impl Store {
    /// Wrap an already-open connection and initialise the schema.
    /// Schema init failure is fatal for the process (startup aborts).
    pub fn new(conn: Connection) -> Result<Self> {
        db::init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Open (or create) the database file at `path` in WAL mode.
    pub fn open(path: &str) -> Result<Self> {
        let conn = db::open(path)?;
        Self::new(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::new(conn)
    }

    pub(crate) fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.db.lock().unwrap()
    }
}
