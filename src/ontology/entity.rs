//! Entity candidates, ontology metadata, and entity storage on top of the
//! shared memory store.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::relationship::Relationship;
use super::{short_id, OntologyResult};
use crate::memory::fragment::{
    Classification, Lineage, MemoryMetadata, Relevance, Source, Utility, Validity, ONTOLOGY_AREA,
};
use crate::memory::store::VectorStore;

/// Where a candidate record came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub source_id: String,
    pub record_id: String,
    #[serde(default)]
    pub source_type: String,
    pub ingested_at: DateTime<Utc>,
    /// Source trust in [0, 1]; the merge policy prefers higher.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

impl Provenance {
    /// Dedup key for idempotent ingest.
    pub fn record_key(&self) -> String {
        format!("{}:{}", self.source_id, self.record_id)
    }
}

/// A relationship suggestion carried by a candidate, resolved against
/// existing entities after the candidate itself resolves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipHint {
    #[serde(rename = "type")]
    pub rel_type: String,
    /// Free-form name or identifier of the target entity.
    pub target_hint: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

/// An unresolved entity record from a source connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub entity_type: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    #[serde(default)]
    pub relationship_hints: Vec<RelationshipHint>,
    pub provenance: Provenance,
    /// Queue marker; resolved candidates are skipped on re-read.
    #[serde(default, rename = "_resolved")]
    pub resolved: bool,
}

impl Candidate {
    pub fn name(&self) -> &str {
        self.properties
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    pub fn aliases(&self) -> Vec<&str> {
        self.properties
            .get("aliases")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    pub fn str_prop(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    /// Stable candidate id from provenance.
    pub fn candidate_id(&self) -> String {
        short_id("cand_", &self.provenance.record_key())
    }
}

/// One merge applied to an entity, kept for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRecord {
    pub merged_from_a: String,
    pub merged_from_b: String,
    pub score: f64,
    pub timestamp: DateTime<Utc>,
}

/// Ontology block carried on entity memories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OntologyMeta {
    pub entity_type: String,
    pub entity_id: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    #[serde(default)]
    pub provenance_chain: Vec<Provenance>,
    #[serde(default)]
    pub merge_history: Vec<MergeRecord>,
    #[serde(default)]
    pub investigation_tags: Vec<String>,
}

/// A candidate that survived resolution and is ready to store.
#[derive(Debug, Clone)]
pub struct ResolvedEntity {
    pub entity_type: String,
    pub properties: BTreeMap<String, Value>,
    pub relationship_hints: Vec<RelationshipHint>,
    pub provenance_chain: Vec<Provenance>,
    pub merge_history: Vec<MergeRecord>,
}

impl ResolvedEntity {
    pub fn from_candidate(c: &Candidate) -> Self {
        Self {
            entity_type: c.entity_type.clone(),
            properties: c.properties.clone(),
            relationship_hints: c.relationship_hints.clone(),
            provenance_chain: vec![c.provenance.clone()],
            merge_history: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.properties
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
    }

    /// Stable entity id: type, normalized name, and anchor provenance.
    pub fn entity_id(&self) -> String {
        let anchor = self
            .provenance_chain
            .first()
            .map(Provenance::record_key)
            .unwrap_or_default();
        let norm = self.name().to_lowercase();
        short_id("ent_", &format!("{}:{}:{}", self.entity_type, norm.trim(), anchor))
    }
}

/// Maximum length of a generated entity summary.
const SUMMARY_MAX: usize = 500;

/// Natural-language summary stored as the entity memory's content, so the
/// similarity engine can find entities from free-text queries.
pub fn build_summary(entity: &ResolvedEntity, relationships: &[Relationship]) -> String {
    let mut parts = vec![format!("{} ({})", entity.name(), entity.entity_type)];

    if let Some(desc) = entity.properties.get("description").and_then(Value::as_str) {
        parts.push(desc.chars().take(120).collect());
    } else {
        let mut details = Vec::new();
        for key in ["type", "jurisdiction", "role", "date_of_birth"] {
            if let Some(v) = entity.properties.get(key).and_then(Value::as_str) {
                details.push(format!("{key}: {v}"));
            }
        }
        if !details.is_empty() {
            parts.push(details.join(", "));
        }
    }

    let aliases: Vec<&str> = entity
        .properties
        .get("aliases")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).take(3).collect())
        .unwrap_or_default();
    if !aliases.is_empty() {
        parts.push(format!("Also known as: {}", aliases.join(", ")));
    }

    let sources: Vec<&str> = entity
        .provenance_chain
        .iter()
        .map(|p| p.source_id.as_str())
        .filter(|s| !s.is_empty())
        .take(3)
        .collect();
    if !sources.is_empty() {
        parts.push(format!("Sources: {}", sources.join(", ")));
    }

    let connections: Vec<String> = relationships
        .iter()
        .take(4)
        .filter(|r| !r.to_entity_name.is_empty())
        .map(|r| format!("{}: {}", r.rel_type, r.to_entity_name))
        .collect();
    if !connections.is_empty() {
        parts.push(format!("Connections: {}", connections.join(", ")));
    }

    let summary = parts.join(" — ");
    summary.chars().take(SUMMARY_MAX).collect()
}

/// Store a resolved entity as a classified memory. Upserts by entity id;
/// returns the id.
pub fn store_entity(
    store: &mut dyn VectorStore,
    entity: &ResolvedEntity,
    relationships: &[Relationship],
    now: DateTime<Utc>,
) -> OntologyResult<String> {
    let entity_id = entity.entity_id();
    let summary = build_summary(entity, relationships);

    let confidence = entity
        .provenance_chain
        .iter()
        .map(|p| p.confidence)
        .fold(0.0_f64, f64::max);
    let validity = if confidence >= 0.8 {
        Validity::Confirmed
    } else {
        Validity::AgentInferred
    };

    let metadata = MemoryMetadata {
        classification: Classification {
            validity,
            relevance: Relevance::Active,
            utility: Utility::Tactical,
            source: Source::ExternalRetrieved,
            tags: Default::default(),
            area: ONTOLOGY_AREA.to_string(),
        },
        lineage: {
            let mut lineage = Lineage::new(now);
            lineage.domain = Some("investigation".to_string());
            lineage
        },
        ontology: Some(OntologyMeta {
            entity_type: entity.entity_type.clone(),
            entity_id: entity_id.clone(),
            properties: entity.properties.clone(),
            provenance_chain: entity.provenance_chain.clone(),
            merge_history: entity.merge_history.clone(),
            investigation_tags: Vec::new(),
        }),
    };

    store.store(&entity_id, &summary, metadata)?;
    tracing::info!(entity_id = %entity_id, entity_type = %entity.entity_type, "entity stored");
    Ok(entity_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::store::LexicalStore;

    fn provenance(source: &str, record: &str) -> Provenance {
        Provenance {
            source_id: source.to_string(),
            record_id: record.to_string(),
            source_type: "csv".to_string(),
            ingested_at: Utc::now(),
            confidence: 0.9,
        }
    }

    fn entity() -> ResolvedEntity {
        let mut properties = BTreeMap::new();
        properties.insert("name".to_string(), Value::from("Acme Corporation"));
        properties.insert(
            "aliases".to_string(),
            Value::from(vec!["Acme Corp", "Acme Inc"]),
        );
        properties.insert("jurisdiction".to_string(), Value::from("Delaware"));
        ResolvedEntity {
            entity_type: "organization".to_string(),
            properties,
            relationship_hints: vec![],
            provenance_chain: vec![provenance("sec_filings", "r1")],
            merge_history: vec![],
        }
    }

    #[test]
    fn summary_reads_naturally() {
        let s = build_summary(&entity(), &[]);
        assert!(s.starts_with("Acme Corporation (organization)"));
        assert!(s.contains("jurisdiction: Delaware"));
        assert!(s.contains("Also known as: Acme Corp, Acme Inc"));
        assert!(s.contains("Sources: sec_filings"));
        assert!(s.len() <= 500);
    }

    #[test]
    fn entity_id_is_stable() {
        let e = entity();
        assert_eq!(e.entity_id(), e.entity_id());
        assert!(e.entity_id().starts_with("ent_"));
    }

    #[test]
    fn stored_entity_is_confirmed_and_ontology_area() {
        let mut store = LexicalStore::in_memory();
        let e = entity();
        let id = store_entity(&mut store, &e, &[], Utc::now()).unwrap();

        let record = store.get(&id).unwrap();
        assert_eq!(record.metadata.classification.area, "ontology");
        assert_eq!(record.metadata.classification.validity, Validity::Confirmed);
        let ont = record.metadata.ontology.as_ref().unwrap();
        assert_eq!(ont.entity_id, id);
        assert_eq!(ont.provenance_chain.len(), 1);
    }
}
