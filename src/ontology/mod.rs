//! Ontology store and entity resolution.
//!
//! Entities are classified memories in the shared store (`area = "ontology"`
//! plus an `ontology` metadata block); relationships are typed directional
//! edges in an append-only JSONL. Resolution is fully deterministic:
//! preprocess → block → score → threshold → transitive closure. No model
//! calls anywhere in this layer.

pub mod discovery;
pub mod entity;
pub mod query;
pub mod queues;
pub mod relationship;
pub mod resolution;

pub use entity::{Candidate, OntologyMeta, Provenance, RelationshipHint};
pub use query::OntologyQuery;
pub use queues::{AuditEntry, IngestionQueue, ReviewEntry, ReviewQueue};
pub use relationship::{OntologySchema, Relationship, RelationshipStore};
pub use resolution::{ResolutionOutcome, Resolver};

use miette::Diagnostic;
use thiserror::Error;

/// Errors from the ontology layer. Trapped at component boundaries.
#[derive(Debug, Error, Diagnostic)]
pub enum OntologyError {
    #[error("relationship store I/O failed: {path}")]
    #[diagnostic(
        code(seshat::ontology::relationship_io),
        help("Check permissions on ontology/relationships.jsonl under the state root.")
    )]
    RelationshipIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("queue I/O failed: {path}")]
    #[diagnostic(
        code(seshat::ontology::queue_io),
        help("Check permissions on the ontology queue files under the state root.")
    )]
    QueueIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Memory(#[from] crate::memory::MemoryError),
}

pub type OntologyResult<T> = std::result::Result<T, OntologyError>;

/// Short stable id from a key string: prefix + first 12 hex chars of the
/// keyed content hash.
pub(crate) fn short_id(prefix: &str, key: &str) -> String {
    let digest = blake3::hash(key.as_bytes());
    let hex = digest.to_hex();
    format!("{prefix}{}", &hex.as_str()[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_ids_are_stable_and_distinct() {
        let a = short_id("ent_", "person:john smith:src:1");
        let b = short_id("ent_", "person:john smith:src:1");
        let c = short_id("ent_", "person:jane smith:src:1");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("ent_"));
        assert_eq!(a.len(), 4 + 12);
    }
}
