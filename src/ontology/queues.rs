//! Ontology work queues: candidate ingestion, the human review queue, and
//! the append-only resolution audit log.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::Candidate;
use super::resolution::AxisScores;
use super::{OntologyError, OntologyResult};
use crate::jsonio;

/// One scored comparison, appended for every pair the resolver considered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub candidate_a: String,
    pub candidate_b: String,
    pub composite_score: f64,
    pub axis_scores: AxisScores,
    /// "merge", "flag", or "distinct".
    pub action: String,
}

/// A pair in the review band, preserved for a human decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewEntry {
    pub timestamp: DateTime<Utc>,
    pub status: String,
    pub score: f64,
    pub axis_scores: AxisScores,
    pub candidate_a: String,
    pub candidate_b: String,
    pub entity_type: String,
}

/// Append-only JSONL of resolver decisions.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(&self, entries: &[AuditEntry]) -> OntologyResult<()> {
        jsonio::append_jsonl(&self.path, entries).map_err(|e| OntologyError::QueueIo {
            path: self.path.display().to_string(),
            source: e,
        })
    }

    pub fn load_all(&self) -> Vec<AuditEntry> {
        jsonio::read_jsonl(&self.path)
    }
}

/// Append-only JSONL of ambiguous pairs awaiting review.
#[derive(Debug, Clone)]
pub struct ReviewQueue {
    path: PathBuf,
}

impl ReviewQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(&self, entries: &[ReviewEntry]) -> OntologyResult<()> {
        jsonio::append_jsonl(&self.path, entries).map_err(|e| OntologyError::QueueIo {
            path: self.path.display().to_string(),
            source: e,
        })
    }

    pub fn load_all(&self) -> Vec<ReviewEntry> {
        jsonio::read_jsonl(&self.path)
    }
}

/// Candidate queue fed by source connectors and drained by maintenance.
#[derive(Debug, Clone)]
pub struct IngestionQueue {
    path: PathBuf,
}

impl IngestionQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_err(&self, source: std::io::Error) -> OntologyError {
        OntologyError::QueueIo {
            path: self.path.display().to_string(),
            source,
        }
    }

    /// Enqueue candidates. Records whose `(source_id, record_id)` is already
    /// queued are skipped unless `force_reingest`. Returns the count
    /// actually written.
    pub fn enqueue(&self, candidates: &[Candidate], force_reingest: bool) -> OntologyResult<usize> {
        let existing: BTreeSet<String> = if force_reingest {
            BTreeSet::new()
        } else {
            self.load_all()
                .iter()
                .map(|c| c.provenance.record_key())
                .collect()
        };
        let fresh: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| !existing.contains(&c.provenance.record_key()))
            .collect();
        jsonio::append_jsonl(&self.path, &fresh).map_err(|e| self.io_err(e))?;
        Ok(fresh.len())
    }

    /// Unresolved candidates, up to `limit`.
    pub fn pending(&self, limit: usize) -> Vec<Candidate> {
        self.load_all()
            .into_iter()
            .filter(|c| !c.resolved)
            .take(limit)
            .collect()
    }

    /// Mark candidates resolved by candidate id. Atomic rewrite.
    pub fn mark_resolved(&self, candidate_ids: &BTreeSet<String>) -> OntologyResult<usize> {
        let mut all = self.load_all();
        let mut changed = 0;
        for candidate in all.iter_mut() {
            if !candidate.resolved && candidate_ids.contains(&candidate.candidate_id()) {
                candidate.resolved = true;
                changed += 1;
            }
        }
        if changed > 0 {
            jsonio::rewrite_jsonl(&self.path, &all).map_err(|e| self.io_err(e))?;
        }
        Ok(changed)
    }

    fn load_all(&self) -> Vec<Candidate> {
        jsonio::read_jsonl(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::entity::Provenance;
    use serde_json::Value;

    fn candidate(record_id: &str) -> Candidate {
        let mut properties = std::collections::BTreeMap::new();
        properties.insert("name".to_string(), Value::from("Acme"));
        Candidate {
            entity_type: "organization".to_string(),
            properties,
            relationship_hints: vec![],
            provenance: Provenance {
                source_id: "src".to_string(),
                record_id: record_id.to_string(),
                source_type: "csv".to_string(),
                ingested_at: Utc::now(),
                confidence: 0.7,
            },
            resolved: false,
        }
    }

    #[test]
    fn ingest_is_idempotent_unless_forced() {
        let dir = tempfile::TempDir::new().unwrap();
        let queue = IngestionQueue::new(dir.path().join("ingestion_queue.jsonl"));

        assert_eq!(queue.enqueue(&[candidate("r1")], false).unwrap(), 1);
        assert_eq!(queue.enqueue(&[candidate("r1")], false).unwrap(), 0);
        assert_eq!(queue.pending(10).len(), 1);

        // Force re-ingest appends a second copy.
        assert_eq!(queue.enqueue(&[candidate("r1")], true).unwrap(), 1);
        assert_eq!(queue.pending(10).len(), 2);
    }

    #[test]
    fn mark_resolved_hides_from_pending() {
        let dir = tempfile::TempDir::new().unwrap();
        let queue = IngestionQueue::new(dir.path().join("ingestion_queue.jsonl"));
        queue
            .enqueue(&[candidate("r1"), candidate("r2")], false)
            .unwrap();

        let ids: BTreeSet<String> = [candidate("r1").candidate_id()].into_iter().collect();
        assert_eq!(queue.mark_resolved(&ids).unwrap(), 1);

        let pending = queue.pending(10);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].provenance.record_id, "r2");
    }
}
