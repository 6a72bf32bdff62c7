//! Hash-chained audit trail for agentic tool calls.
//!
//! One JSON record per line, append-only. Each record carries
//! `previous_hash` - the SHA-256 of the previous line exactly as written -
//! and `entry_hash` - the SHA-256 of the current record serialized without
//! its own hash. The chain is verifiable offline with nothing but the file.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, SecurityError};

/// Hash value used for the first record's `previous_hash`.
const GENESIS: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: String,
    pub tool: String,
    pub args: serde_json::Value,
    /// Policy action that was applied ("allow" / "deny" / "flag").
    pub decision: String,
    /// What actually happened ("executed" / "blocked" / "approved" / "denied_by_human" / "timeout").
    pub outcome: String,
    pub previous_hash: String,
    #[serde(default)]
    pub entry_hash: String,
}

pub struct AuditLog {
    path: PathBuf,
    /// SHA-256 of the last line as written; GENESIS before any record.
    last_line_hash: Mutex<String>,
}

impl AuditLog {
    /// Open (or create) the log at `path`, seeding the chain state from the
    /// existing tail so appends continue a prior run's chain.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let last = match std::fs::read_to_string(&path) {
            Ok(content) => content
                .lines()
                .filter(|l| !l.trim().is_empty())
                .next_back()
                .map(sha256_hex)
                .unwrap_or_else(|| GENESIS.to_string()),
            Err(_) => GENESIS.to_string(),
        };
        Ok(Self {
            path,
            last_line_hash: Mutex::new(last),
        })
    }

    /// Append one decision+outcome record. Returns the record as written.
    pub fn append(
        &self,
        tool: &str,
        args: &serde_json::Value,
        decision: &str,
        outcome: &str,
    ) -> Result<AuditRecord> {
        let mut last = self.last_line_hash.lock().unwrap();

        let mut record = AuditRecord {
            timestamp: chrono::Utc::now().to_rfc3339(),
            tool: tool.to_string(),
            args: args.clone(),
            decision: decision.to_string(),
            outcome: outcome.to_string(),
            previous_hash: last.clone(),
            entry_hash: String::new(),
        };
        record.entry_hash = sha256_hex(&canonical(&record)?);

        let line = serde_json::to_string(&record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;

        *last = sha256_hex(&line);
        Ok(record)
    }

    /// Re-read the whole file and verify both hashes of every record.
    /// Returns the number of valid records.
    pub fn verify(&self) -> Result<usize> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return Ok(0),
        };

        let mut expected_prev = GENESIS.to_string();
        let mut count = 0usize;
        for (index, line) in content.lines().filter(|l| !l.trim().is_empty()).enumerate() {
            let record: AuditRecord =
                serde_json::from_str(line).map_err(|e| SecurityError::ChainBroken {
                    index,
                    reason: format!("unparseable record: {e}"),
                })?;

            if record.previous_hash != expected_prev {
                return Err(SecurityError::ChainBroken {
                    index,
                    reason: "previous_hash does not match prior record".to_string(),
                });
            }
            let recomputed = sha256_hex(&canonical(&record)?);
            if record.entry_hash != recomputed {
                return Err(SecurityError::ChainBroken {
                    index,
                    reason: "entry_hash does not match record content".to_string(),
                });
            }

            expected_prev = sha256_hex(line);
            count += 1;
        }
        Ok(count)
    }
}

/// Serialization the entry hash covers: the record with `entry_hash` blanked.
fn canonical(record: &AuditRecord) -> Result<String> {
    let mut blanked = record.clone();
    blanked.entry_hash = String::new();
    Ok(serde_json::to_string(&blanked)?)
}

fn sha256_hex(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_links_previous_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = AuditLog::open(&path).unwrap();

        let r0 = log
            .append("run_command", &serde_json::json!({"command": "ls"}), "allow", "executed")
            .unwrap();
        let r1 = log
            .append("write_file", &serde_json::json!({"path": "x"}), "flag", "approved")
            .unwrap();

        assert_eq!(r0.previous_hash, GENESIS);
        // r1.previous_hash = sha256 of r0's full serialized line.
        let line0 = serde_json::to_string(&r0).unwrap();
        assert_eq!(r1.previous_hash, sha256_hex(&line0));

        assert_eq!(log.verify().unwrap(), 2);
    }

    #[test]
    fn reopened_log_continues_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let log = AuditLog::open(&path).unwrap();
            log.append("a", &serde_json::json!({}), "allow", "executed")
                .unwrap();
        }
        {
            let log = AuditLog::open(&path).unwrap();
            log.append("b", &serde_json::json!({}), "deny", "blocked")
                .unwrap();
            assert_eq!(log.verify().unwrap(), 2);
        }
    }

    #[test]
    fn tampering_breaks_verification() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = AuditLog::open(&path).unwrap();
        log.append("a", &serde_json::json!({}), "allow", "executed")
            .unwrap();
        log.append("b", &serde_json::json!({}), "allow", "executed")
            .unwrap();

        // Rewrite the first record's outcome in place.
        let content = std::fs::read_to_string(&path).unwrap();
        let tampered = content.replacen("executed", "blocked", 1);
        std::fs::write(&path, tampered).unwrap();

        assert!(matches!(
            log.verify(),
            Err(SecurityError::ChainBroken { .. })
        ));
    }

    #[test]
    fn empty_log_verifies_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path().join("audit.jsonl")).unwrap();
        assert_eq!(log.verify().unwrap(), 0);
    }
}
