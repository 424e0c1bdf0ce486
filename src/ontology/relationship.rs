//! Typed, directional relationships in an append-only JSONL store.
//!
//! Turns append; maintenance compacts (write-new-then-rename). Deprecated
//! edges and edges below the surface threshold are stored but never
//! returned from queries.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{short_id, OntologyError, OntologyResult};
use crate::jsonio;

/// One typed edge between entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub rel_id: String,
    #[serde(rename = "type")]
    pub rel_type: String,
    pub from_entity: String,
    pub to_entity: String,
    #[serde(default)]
    pub from_entity_name: String,
    #[serde(default)]
    pub to_entity_name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    pub confidence: f64,
    #[serde(default)]
    pub provenance: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deprecated: bool,
}

impl Relationship {
    pub fn new(
        rel_type: &str,
        from_entity: &str,
        to_entity: &str,
        confidence: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            rel_id: rel_key(from_entity, rel_type, to_entity),
            rel_type: rel_type.to_string(),
            from_entity: from_entity.to_string(),
            to_entity: to_entity.to_string(),
            from_entity_name: String::new(),
            to_entity_name: String::new(),
            properties: BTreeMap::new(),
            confidence,
            provenance: None,
            created_at: now,
            updated_at: now,
            deprecated: false,
        }
    }

    pub fn named(mut self, from_name: &str, to_name: &str) -> Self {
        self.from_entity_name = from_name.to_string();
        self.to_entity_name = to_name.to_string();
        self
    }

    pub fn with_property(mut self, key: &str, value: Value) -> Self {
        self.properties.insert(key.to_string(), value);
        self
    }
}

/// Stable edge id from endpoints and type.
pub fn rel_key(from_entity: &str, rel_type: &str, to_entity: &str) -> String {
    short_id("rel_", &format!("{from_entity}:{rel_type}:{to_entity}"))
}

/// The type vocabulary (`ontology/ontology_schema.json`). Edges with types
/// outside the schema are still stored, but upkeep logs them so connector
/// typos surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OntologySchema {
    pub entity_types: Vec<String>,
    pub relationship_types: Vec<String>,
}

impl Default for OntologySchema {
    fn default() -> Self {
        Self {
            entity_types: [
                "person",
                "organization",
                "location",
                "event",
                "document",
                "account",
            ]
            .map(str::to_string)
            .to_vec(),
            relationship_types: [
                "employed_by",
                "owns",
                "affiliated",
                "co_mentioned",
                "co_located",
                "temporally_linked",
                "knowledge_link",
                "retrieved_together",
                "related_to",
            ]
            .map(str::to_string)
            .to_vec(),
        }
    }
}

impl OntologySchema {
    pub fn load(path: &std::path::Path) -> Self {
        jsonio::read_json(path).unwrap_or_default()
    }

    pub fn known_relationship(&self, rel_type: &str) -> bool {
        self.relationship_types.iter().any(|t| t == rel_type)
    }
}

/// JSONL-backed relationship store.
#[derive(Debug, Clone)]
pub struct RelationshipStore {
    path: PathBuf,
}

impl RelationshipStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_err(&self, source: std::io::Error) -> OntologyError {
        OntologyError::RelationshipIo {
            path: self.path.display().to_string(),
            source,
        }
    }

    /// Every stored edge, including deprecated and low-confidence ones.
    pub fn load_all(&self) -> Vec<Relationship> {
        jsonio::read_jsonl(&self.path)
    }

    /// Append edges whose `rel_id` is not already present. Returns the
    /// number actually written.
    pub fn append_new(&self, relationships: &[Relationship]) -> OntologyResult<usize> {
        let existing: BTreeSet<String> =
            self.load_all().into_iter().map(|r| r.rel_id).collect();
        let fresh: Vec<&Relationship> = relationships
            .iter()
            .filter(|r| !existing.contains(&r.rel_id))
            .collect();
        jsonio::append_jsonl(&self.path, &fresh).map_err(|e| self.io_err(e))?;
        Ok(fresh.len())
    }

    /// Edges touching any of `entity_ids`, above the surface threshold and
    /// not deprecated, sorted by confidence descending, capped at `limit`.
    pub fn neighbours(
        &self,
        entity_ids: &BTreeSet<String>,
        min_confidence: f64,
        limit: usize,
    ) -> Vec<Relationship> {
        let mut rels: Vec<Relationship> = self
            .load_all()
            .into_iter()
            .filter(|r| !r.deprecated && r.confidence >= min_confidence)
            .filter(|r| entity_ids.contains(&r.from_entity) || entity_ids.contains(&r.to_entity))
            .collect();
        rels.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.rel_id.cmp(&b.rel_id))
        });
        rels.truncate(limit);
        rels
    }

    /// Apply an update to matching edges, rewriting the file atomically.
    /// Returns how many edges changed.
    pub fn update_where(
        &self,
        mut predicate: impl FnMut(&Relationship) -> bool,
        mut update: impl FnMut(&mut Relationship),
    ) -> OntologyResult<usize> {
        let mut rels = self.load_all();
        let mut changed = 0;
        for rel in rels.iter_mut() {
            if predicate(rel) {
                update(rel);
                changed += 1;
            }
        }
        if changed > 0 {
            jsonio::rewrite_jsonl(&self.path, &rels).map_err(|e| self.io_err(e))?;
        }
        Ok(changed)
    }

    /// Drop deprecated edges from the file (the audit of their existence
    /// lives in the resolution audit log). Atomic rewrite. Returns the
    /// number removed.
    pub fn compact(&self) -> OntologyResult<usize> {
        let rels = self.load_all();
        let kept: Vec<Relationship> = rels.iter().filter(|r| !r.deprecated).cloned().collect();
        let removed = rels.len() - kept.len();
        if removed > 0 {
            jsonio::rewrite_jsonl(&self.path, &kept).map_err(|e| self.io_err(e))?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, RelationshipStore) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = RelationshipStore::new(dir.path().join("relationships.jsonl"));
        (dir, store)
    }

    #[test]
    fn append_is_idempotent_by_rel_id() {
        let (_dir, store) = store();
        let now = Utc::now();
        let rel = Relationship::new("co_mentioned", "ent_a", "ent_b", 0.8, now);

        assert_eq!(store.append_new(&[rel.clone()]).unwrap(), 1);
        assert_eq!(store.append_new(&[rel]).unwrap(), 0);
        assert_eq!(store.load_all().len(), 1);
    }

    #[test]
    fn neighbours_filter_and_sort() {
        let (_dir, store) = store();
        let now = Utc::now();
        store
            .append_new(&[
                Relationship::new("co_mentioned", "a", "b", 0.5, now),
                Relationship::new("employed_by", "a", "c", 0.9, now),
                Relationship::new("co_located", "x", "y", 0.9, now),
                Relationship::new("weak", "a", "d", 0.1, now),
            ])
            .unwrap();

        let ids: BTreeSet<String> = ["a".to_string()].into_iter().collect();
        let got = store.neighbours(&ids, 0.3, 10);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].rel_type, "employed_by");
        assert_eq!(got[1].rel_type, "co_mentioned");
    }

    #[test]
    fn compact_drops_deprecated_atomically() {
        let (_dir, store) = store();
        let now = Utc::now();
        let mut dead = Relationship::new("co_mentioned", "a", "b", 0.5, now);
        dead.deprecated = true;
        store
            .append_new(&[dead, Relationship::new("kept", "a", "c", 0.5, now)])
            .unwrap();

        assert_eq!(store.compact().unwrap(), 1);
        let remaining = store.load_all();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].rel_type, "kept");
    }

    #[test]
    fn update_where_rewrites() {
        let (_dir, store) = store();
        let now = Utc::now();
        store
            .append_new(&[Relationship::new("retrieved_together", "a", "b", 0.3, now)])
            .unwrap();
        let changed = store
            .update_where(
                |r| r.rel_type == "retrieved_together",
                |r| r.confidence = 0.6,
            )
            .unwrap();
        assert_eq!(changed, 1);
        assert!((store.load_all()[0].confidence - 0.6).abs() < f64::EPSILON);
    }
}
