//! The similarity-store contract and a deterministic reference backend.
//!
//! The core requires only four operations from an external similarity
//! engine: upsert, approximate search, optional delete, and full iteration
//! for maintenance. A real ANN engine satisfies the contract out of process;
//! [`LexicalStore`] is the in-crate reference implementation used by tests
//! and usable as a degraded backend.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::fragment::{MemoryId, MemoryMetadata};
use super::{MemoryError, MemoryResult};
use crate::jsonio;

/// One search result from the store.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: MemoryId,
    /// Similarity in [0, 1], backend-defined.
    pub score: f64,
    pub content: String,
    pub metadata: MemoryMetadata,
}

/// One record from full iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMemory {
    pub id: MemoryId,
    pub content: String,
    pub metadata: MemoryMetadata,
}

/// The contract the core requires from a similarity engine.
///
/// The core prefers `superseded_by` markers over `delete`; delete exists for
/// backends that reclaim space.
pub trait VectorStore {
    /// Upsert a memory. Storing an existing id replaces content and metadata.
    fn store(&mut self, id: &str, content: &str, metadata: MemoryMetadata) -> MemoryResult<()>;

    /// Approximate nearest-neighbour search. `area` filters on
    /// `classification.area` when given.
    fn search(&self, query: &str, k: usize, area: Option<&str>) -> MemoryResult<Vec<SearchHit>>;

    /// Remove a memory. Returns whether it existed.
    fn delete(&mut self, id: &str) -> MemoryResult<bool>;

    /// Every stored record, for maintenance scans.
    fn iterate_all(&self) -> MemoryResult<Vec<StoredMemory>>;
}

// ---------------------------------------------------------------------------
// Lexical reference backend
// ---------------------------------------------------------------------------

/// Deterministic similarity backend: token-set Jaccard over lowercased
/// alphanumeric tokens. No embeddings, no randomness; scores are exactly
/// reproducible, which the integration tests rely on.
#[derive(Debug, Default)]
pub struct LexicalStore {
    records: BTreeMap<MemoryId, StoredMemory>,
    /// Persistence target; `None` keeps the store purely in memory.
    path: Option<PathBuf>,
}

impl LexicalStore {
    /// Purely in-memory store.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Store persisted as a single JSON index under the memory directory.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records: Vec<StoredMemory> = jsonio::read_json(&path).unwrap_or_default();
        Self {
            records: records.into_iter().map(|r| (r.id.clone(), r)).collect(),
            path: Some(path),
        }
    }

    /// Write the index back to disk, if this store is file-backed.
    pub fn persist(&self) -> MemoryResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let records: Vec<&StoredMemory> = self.records.values().collect();
        jsonio::write_json(path, &records).map_err(|e| MemoryError::IndexIo {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Fetch one record by id.
    pub fn get(&self, id: &str) -> Option<&StoredMemory> {
        self.records.get(id)
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn tokens(text: &str) -> BTreeSet<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 1)
            .map(str::to_string)
            .collect()
    }

    /// Token-set Jaccard similarity of two texts.
    pub fn similarity(a: &str, b: &str) -> f64 {
        let ta = Self::tokens(a);
        let tb = Self::tokens(b);
        if ta.is_empty() || tb.is_empty() {
            return 0.0;
        }
        let inter = ta.intersection(&tb).count() as f64;
        let union = ta.union(&tb).count() as f64;
        inter / union
    }
}

impl VectorStore for LexicalStore {
    fn store(&mut self, id: &str, content: &str, metadata: MemoryMetadata) -> MemoryResult<()> {
        self.records.insert(
            id.to_string(),
            StoredMemory {
                id: id.to_string(),
                content: content.to_string(),
                metadata,
            },
        );
        Ok(())
    }

    fn search(&self, query: &str, k: usize, area: Option<&str>) -> MemoryResult<Vec<SearchHit>> {
        let mut hits: Vec<SearchHit> = self
            .records
            .values()
            .filter(|r| area.map_or(true, |a| r.metadata.classification.area == a))
            .map(|r| SearchHit {
                id: r.id.clone(),
                score: Self::similarity(query, &r.content),
                content: r.content.clone(),
                metadata: r.metadata.clone(),
            })
            .filter(|h| h.score > 0.0)
            .collect();
        // Deterministic order: score descending, id ascending on ties.
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    fn delete(&mut self, id: &str) -> MemoryResult<bool> {
        Ok(self.records.remove(id).is_some())
    }

    fn iterate_all(&self) -> MemoryResult<Vec<StoredMemory>> {
        Ok(self.records.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn put(store: &mut LexicalStore, id: &str, content: &str) {
        store
            .store(id, content, MemoryMetadata::new(Utc::now()))
            .unwrap();
    }

    #[test]
    fn search_orders_by_overlap() {
        let mut store = LexicalStore::in_memory();
        put(&mut store, "m1", "rust borrow checker errors");
        put(&mut store, "m2", "python packaging");
        put(&mut store, "m3", "rust lifetime errors in the borrow checker");

        let hits = store.search("borrow checker", 10, None).unwrap();
        assert_eq!(hits[0].id, "m1");
        assert!(hits.iter().all(|h| h.id != "m2"));
    }

    #[test]
    fn area_filter_applies() {
        let mut store = LexicalStore::in_memory();
        let mut meta = MemoryMetadata::new(Utc::now());
        meta.classification.area = "ontology".into();
        store.store("e1", "acme corporation entity", meta).unwrap();
        put(&mut store, "m1", "acme corporation notes");

        let hits = store.search("acme", 10, Some("ontology")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "e1");
    }

    #[test]
    fn upsert_replaces() {
        let mut store = LexicalStore::in_memory();
        put(&mut store, "m1", "old text");
        put(&mut store, "m1", "new text");
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("m1").unwrap().content, "new text");
    }

    #[test]
    fn persists_and_reopens() {
        let dir = tempfile::TempDir::new().unwrap();
        let index = dir.path().join("index.json");
        {
            let mut store = LexicalStore::open(&index);
            put(&mut store, "m1", "remember this");
            store.persist().unwrap();
        }
        let store = LexicalStore::open(&index);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("m1").unwrap().content, "remember this");
    }
}
