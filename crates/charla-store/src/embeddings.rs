//! Vector storage and similarity search.
//!
//! SQLite has no vector type, so vectors are f32 little-endian blobs and the
//! cosine ranking runs in Rust over the candidate rows. At single-user scale
//! (hundreds of memories) a full scan beats maintaining an ANN index.

use crate::error::Result;
use crate::types::{EmbeddingKind, Memory, Note};
use crate::Store;

/// Encode a vector as little-endian f32 bytes.
pub fn encode_vector(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

/// Decode little-endian f32 bytes; trailing partial floats are dropped.
pub fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine distance in [0, 2]; 0 = identical direction. Zero-magnitude inputs
/// rank last (distance 2.0).
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 2.0;
    }
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 2.0;
    }
    1.0 - dot / (na.sqrt() * nb.sqrt())
}

impl Store {
    pub fn put_embedding(&self, kind: EmbeddingKind, source_id: i64, vector: &[f32]) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT OR REPLACE INTO embeddings (kind, source_id, vector, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![kind.as_str(), source_id, encode_vector(vector), now],
        )?;
        Ok(())
    }

    pub fn remove_embedding(&self, kind: EmbeddingKind, source_id: i64) -> Result<bool> {
        let conn = self.conn();
        let n = conn.execute(
            "DELETE FROM embeddings WHERE kind = ?1 AND source_id = ?2",
            rusqlite::params![kind.as_str(), source_id],
        )?;
        Ok(n > 0)
    }

    /// Memory ids that have no vector yet - the startup backfill work list.
    pub fn memories_missing_embedding(&self) -> Result<Vec<i64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT m.id FROM memories m
             LEFT JOIN embeddings e ON e.kind = 'memory' AND e.source_id = m.id
             WHERE m.active = 1 AND e.source_id IS NULL",
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn notes_missing_embedding(&self) -> Result<Vec<i64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT n.id FROM notes n
             LEFT JOIN embeddings e ON e.kind = 'note' AND e.source_id = n.id
             WHERE e.source_id IS NULL",
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Vectors attached to soft-deleted memories. The indexer prunes these so
    /// no orphan embeddings survive a deletion.
    pub fn orphan_memory_embeddings(&self) -> Result<Vec<i64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT e.source_id FROM embeddings e
             JOIN memories m ON m.id = e.source_id
             WHERE e.kind = 'memory' AND m.active = 0",
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Top-k active memories by cosine distance to `query`.
    pub fn search_similar_memories(&self, query: &[f32], k: usize) -> Result<Vec<Memory>> {
        Ok(self
            .search_similar_memories_with_distance(query, k, f32::MAX)?
            .into_iter()
            .map(|(m, _)| m)
            .collect())
    }

    /// Top-k active memories with distances, dropping anything at or above
    /// `threshold`.
    pub fn search_similar_memories_with_distance(
        &self,
        query: &[f32],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<(Memory, f32)>> {
        let candidates = {
            let now = chrono::Utc::now().to_rfc3339();
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT m.id, m.text, m.category, m.active, m.expires_at, m.created_at, e.vector
                 FROM memories m
                 JOIN embeddings e ON e.kind = 'memory' AND e.source_id = m.id
                 WHERE m.active = 1 AND (m.expires_at IS NULL OR m.expires_at > ?1)",
            )?;
            let rows = stmt.query_map(rusqlite::params![now], |row| {
                let mem = crate::memories::row_to_memory(row)?;
                let blob: Vec<u8> = row.get(6)?;
                Ok((mem, blob))
            })?;
            rows.filter_map(|r| r.ok()).collect::<Vec<_>>()
        };

        let mut scored: Vec<(Memory, f32)> = candidates
            .into_iter()
            .map(|(mem, blob)| {
                let dist = cosine_distance(query, &decode_vector(&blob));
                (mem, dist)
            })
            .filter(|(_, d)| *d < threshold)
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    /// Top-k notes by cosine distance to `query`.
    pub fn search_similar_notes(&self, query: &[f32], k: usize) -> Result<Vec<(Note, f32)>> {
        let candidates = {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT n.id, n.title, n.content, n.created_at, e.vector
                 FROM notes n
                 JOIN embeddings e ON e.kind = 'note' AND e.source_id = n.id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    Note {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        content: row.get(2)?,
                        created_at: row.get(3)?,
                    },
                    row.get::<_, Vec<u8>>(4)?,
                ))
            })?;
            rows.filter_map(|r| r.ok()).collect::<Vec<_>>()
        };

        let mut scored: Vec<(Note, f32)> = candidates
            .into_iter()
            .map(|(note, blob)| {
                let dist = cosine_distance(query, &decode_vector(&blob));
                (note, dist)
            })
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_blob_roundtrip() {
        let v = vec![0.25f32, -1.5, 3.0];
        assert_eq!(decode_vector(&encode_vector(&v)), v);
    }

    #[test]
    fn cosine_distance_orders_by_angle() {
        let a = [1.0f32, 0.0];
        let same = [2.0f32, 0.0];
        let orthogonal = [0.0f32, 1.0];
        assert!(cosine_distance(&a, &same) < 1e-6);
        assert!((cosine_distance(&a, &orthogonal) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn search_ranks_closest_memory_first() {
        let store = Store::open_in_memory().unwrap();
        let id_tea = store.add_memory("likes tea", None).unwrap();
        let id_rust = store.add_memory("codes in rust", None).unwrap();
        store
            .put_embedding(EmbeddingKind::Memory, id_tea, &[1.0, 0.0])
            .unwrap();
        store
            .put_embedding(EmbeddingKind::Memory, id_rust, &[0.0, 1.0])
            .unwrap();

        let hits = store.search_similar_memories(&[0.9, 0.1], 2).unwrap();
        assert_eq!(hits[0].id, id_tea);
    }

    #[test]
    fn threshold_filters_distant_memories() {
        let store = Store::open_in_memory().unwrap();
        let id = store.add_memory("likes tea", None).unwrap();
        store
            .put_embedding(EmbeddingKind::Memory, id, &[0.0, 1.0])
            .unwrap();

        let hits = store
            .search_similar_memories_with_distance(&[1.0, 0.0], 5, 0.5)
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn soft_deleted_memory_becomes_orphan_candidate() {
        let store = Store::open_in_memory().unwrap();
        let id = store.add_memory("old fact", None).unwrap();
        store
            .put_embedding(EmbeddingKind::Memory, id, &[1.0])
            .unwrap();
        store.soft_delete_memory(id).unwrap();

        assert_eq!(store.orphan_memory_embeddings().unwrap(), vec![id]);
        store.remove_embedding(EmbeddingKind::Memory, id).unwrap();
        assert!(store.orphan_memory_embeddings().unwrap().is_empty());
    }

    #[test]
    fn backfill_list_contains_unembedded_sources() {
        let store = Store::open_in_memory().unwrap();
        let a = store.add_memory("a", None).unwrap();
        let b = store.add_memory("b", None).unwrap();
        store.put_embedding(EmbeddingKind::Memory, a, &[1.0]).unwrap();
        assert_eq!(store.memories_missing_embedding().unwrap(), vec![b]);
    }
}
