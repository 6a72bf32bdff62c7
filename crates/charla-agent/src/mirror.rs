//! Markdown mirror of the memory store, plus the daily activity log and
//! `/clear` snapshots.
//!
//! The mirror and the store form a cycle (file edits sync in, store writes
//! flush out). A one-bit sync guard breaks it: while a flush is writing the
//! file, sync-from-file is a no-op, and vice versa. Two consecutive syncs
//! with no interleaved writes are no-ops.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use charla_store::memories::SELF_CORRECTION;
use charla_store::Store;
use tracing::{debug, warn};

pub struct MemoryMirror {
    store: Arc<Store>,
    file_path: PathBuf,
    enabled: bool,
    /// The sync guard: set while either direction is writing.
    guard: AtomicBool,
}

impl MemoryMirror {
    pub fn new(store: Arc<Store>, data_dir: &str, enabled: bool) -> Self {
        Self {
            store,
            file_path: Path::new(data_dir).join("memories.md"),
            enabled,
            guard: AtomicBool::new(false),
        }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Write the active memories to the markdown file. Self-correction
    /// memories are never mirrored.
    pub fn flush(&self) {
        if !self.enabled {
            return;
        }
        if self.guard.swap(true, Ordering::SeqCst) {
            debug!("mirror flush skipped: sync in progress");
            return;
        }

        let result = self.write_file();
        self.guard.store(false, Ordering::SeqCst);
        if let Err(e) = result {
            warn!(error = %e, "memory mirror flush failed");
        }
    }

    fn write_file(&self) -> std::io::Result<()> {
        let memories = self.store.list_active_memories(None).unwrap_or_default();
        let mut out = String::from("# Memories\n\n");
        for m in memories.iter().rev() {
            if m.category.as_deref() == Some(SELF_CORRECTION) {
                continue;
            }
            out.push_str(&format!("- [{}] {}\n", m.id, m.text));
        }
        if let Some(parent) = self.file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.file_path, out)
    }

    /// Pull manual edits from the file into the store: lines without an id
    /// marker are new memories. Returns how many were added.
    pub fn sync_from_file(&self) -> usize {
        if !self.enabled {
            return 0;
        }
        if self.guard.swap(true, Ordering::SeqCst) {
            debug!("mirror sync skipped: flush in progress");
            return 0;
        }

        let added = self.read_new_lines();
        self.guard.store(false, Ordering::SeqCst);

        // Re-flush so the file gains id markers for what was just imported.
        if added > 0 {
            self.flush();
        }
        added
    }

    fn read_new_lines(&self) -> usize {
        let content = match std::fs::read_to_string(&self.file_path) {
            Ok(c) => c,
            Err(_) => return 0,
        };
        let mut added = 0;
        for line in content.lines() {
            let Some(text) = line.trim().strip_prefix("- ") else {
                continue;
            };
            // "[12] text" lines mirror existing rows; bare lines are new.
            if text.starts_with('[') {
                continue;
            }
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            match self.store.add_memory(text, None) {
                Ok(_) => added += 1,
                Err(e) => warn!(error = %e, "mirror import failed"),
            }
        }
        added
    }
}

/// Append-only per-day activity files under `<data_dir>/daily/`.
pub struct ActivityLog {
    dir: PathBuf,
}

impl ActivityLog {
    pub fn new(data_dir: &str) -> Self {
        Self {
            dir: Path::new(data_dir).join("daily"),
        }
    }

    fn today_path(&self) -> PathBuf {
        let today = chrono::Utc::now().format("%Y-%m-%d");
        self.dir.join(format!("{today}.md"))
    }

    pub fn append(&self, line: &str) {
        if std::fs::create_dir_all(&self.dir).is_err() {
            return;
        }
        let stamp = chrono::Utc::now().format("%H:%M");
        let entry = format!("- {stamp} {line}\n");
        use std::io::Write;
        if let Ok(mut file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.today_path())
        {
            let _ = file.write_all(entry.as_bytes());
        }
    }

    /// Today's activity, or `None` when nothing was logged yet.
    pub fn load_today(&self) -> Option<String> {
        std::fs::read_to_string(self.today_path())
            .ok()
            .filter(|c| !c.trim().is_empty())
    }
}

/// Conversation snapshots written before `/clear` removes messages.
pub struct SnapshotWriter {
    dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(data_dir: &str) -> Self {
        Self {
            dir: Path::new(data_dir).join("snapshots"),
        }
    }

    /// Persist the removed messages; returns the snapshot path.
    pub fn write(
        &self,
        principal: &str,
        messages: &[charla_store::types::StoredMessage],
    ) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
        let path = self.dir.join(format!("{stamp}-{principal}.md"));
        let mut out = format!("# Snapshot for {principal}\n\n");
        for m in messages {
            out.push_str(&format!("**{}**: {}\n\n", m.role, m.text));
        }
        std::fs::write(&path, out)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mirror(dir: &Path) -> (Arc<Store>, MemoryMirror) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let mirror = MemoryMirror::new(Arc::clone(&store), dir.to_str().unwrap(), true);
        (store, mirror)
    }

    #[test]
    fn store_write_reaches_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let (store, mirror) = mirror(dir.path());
        store.add_memory("likes green tea", None).unwrap();
        mirror.flush();

        let content = std::fs::read_to_string(mirror.file_path()).unwrap();
        assert!(content.contains("likes green tea"));
    }

    #[test]
    fn file_edit_reaches_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let (store, mirror) = mirror(dir.path());
        store.add_memory("existing", None).unwrap();
        mirror.flush();

        // Simulate a manual edit appending a new bullet.
        let mut content = std::fs::read_to_string(mirror.file_path()).unwrap();
        content.push_str("- prefers dark mode\n");
        std::fs::write(mirror.file_path(), content).unwrap();

        let added = mirror.sync_from_file();
        assert_eq!(added, 1);
        let texts: Vec<_> = store
            .list_active_memories(None)
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert!(texts.contains(&"prefers dark mode".to_string()));
    }

    #[test]
    fn two_consecutive_syncs_are_noops() {
        let dir = tempfile::tempdir().unwrap();
        let (store, mirror) = mirror(dir.path());
        store.add_memory("one", None).unwrap();
        mirror.flush();

        assert_eq!(mirror.sync_from_file(), 0);
        assert_eq!(mirror.sync_from_file(), 0);
        assert_eq!(store.list_active_memories(None).unwrap().len(), 1);
    }

    #[test]
    fn self_corrections_are_never_mirrored() {
        let dir = tempfile::tempdir().unwrap();
        let (store, mirror) = mirror(dir.path());
        store.add_memory("normal fact", None).unwrap();
        store
            .add_self_correction("language_match", "reply in spanish")
            .unwrap();
        mirror.flush();

        let content = std::fs::read_to_string(mirror.file_path()).unwrap();
        assert!(content.contains("normal fact"));
        assert!(!content.contains("reply in spanish"));
    }

    #[test]
    fn daily_log_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let log = ActivityLog::new(dir.path().to_str().unwrap());
        assert!(log.load_today().is_none());
        log.append("replied about tea");
        let today = log.load_today().unwrap();
        assert!(today.contains("replied about tea"));
    }

    #[test]
    fn snapshot_contains_cleared_messages() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_in_memory().unwrap();
        let conv = store.get_or_create_conversation("+34").unwrap();
        store
            .save_message(conv, charla_store::types::MessageRole::User, "hola", None)
            .unwrap();
        let removed = store.clear_conversation(conv).unwrap();

        let writer = SnapshotWriter::new(dir.path().to_str().unwrap());
        let path = writer.write("+34", &removed).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("hola"));
    }
}
