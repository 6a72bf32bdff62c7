//! Durable agent-session journal: one append-only JSONL stream per session.
//!
//! Writes are best-effort - an I/O failure is logged by the caller and the
//! session continues. On restart, `/agent-resume` reads the last record to
//! pick up the task plan and scratchpad.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round: usize,
    pub tool_calls: Vec<String>,
    pub reply_preview: String,
    pub task_plan_snapshot: String,
    pub scratchpad: String,
}

pub struct SessionJournal {
    path: PathBuf,
}

impl SessionJournal {
    pub fn new(data_dir: &str, session_id: &str) -> Self {
        Self {
            path: Path::new(data_dir)
                .join("sessions")
                .join(format!("{session_id}.jsonl")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &RoundRecord) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }

    pub fn count_records(&self) -> usize {
        std::fs::read_to_string(&self.path)
            .map(|c| c.lines().filter(|l| !l.trim().is_empty()).count())
            .unwrap_or(0)
    }

    /// Last record, if the journal exists and parses.
    pub fn read_last(&self) -> Option<RoundRecord> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        let line = content.lines().filter(|l| !l.trim().is_empty()).next_back()?;
        serde_json::from_str(line).ok()
    }
}
