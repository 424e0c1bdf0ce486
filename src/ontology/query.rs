//! Ontology-aware retrieval extension.
//!
//! Before memory expansion, scan the user message for known entity names or
//! aliases; for each hit contribute entity-specific query variants and a
//! structured context block of 1-hop connections read from the relationship
//! store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;

use super::relationship::{Relationship, RelationshipStore};
use super::OntologyResult;
use crate::config::OntologyQueryConfig;
use crate::memory::fragment::ONTOLOGY_AREA;
use crate::memory::store::{StoredMemory, VectorStore};

/// Minimum name length considered for substring detection.
const MIN_ENTITY_NAME_LEN: usize = 3;

/// Similarity floor for semantic entity detection.
const ENTITY_SEARCH_THRESHOLD: f64 = 0.4;

/// Capitalized word sequences, 1–4 words, as entity name candidates.
static RE_NAME_CANDIDATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z][a-zA-Z]{1,25}(?:\s+[A-Z][a-zA-Z]{1,25}){0,3})\b").unwrap()
});

/// What the extension contributes to the turn.
#[derive(Debug, Default)]
pub struct OntologyContext {
    /// Additional similarity queries for the memory enhancer.
    pub extra_queries: Vec<String>,
    /// Structured block injected into the model context.
    pub context_block: Option<String>,
    /// Entity ids detected in the message.
    pub matched_entity_ids: BTreeSet<String>,
}

/// The query-time extension.
#[derive(Debug, Clone)]
pub struct OntologyQuery {
    config: OntologyQueryConfig,
    /// Edges below this confidence are never surfaced.
    min_confidence: f64,
}

impl OntologyQuery {
    pub fn new(config: OntologyQueryConfig, min_confidence: f64) -> Self {
        Self {
            config,
            min_confidence,
        }
    }

    /// Detect entities in the message and expand their neighbourhood.
    pub fn run(
        &self,
        store: &dyn VectorStore,
        relationships: &RelationshipStore,
        message: &str,
    ) -> OntologyResult<OntologyContext> {
        let mut out = OntologyContext::default();
        if !self.config.enabled || message.trim().is_empty() {
            return Ok(out);
        }

        let ontology_memories: Vec<StoredMemory> = store
            .iterate_all()?
            .into_iter()
            .filter(|m| m.metadata.classification.area == ONTOLOGY_AREA)
            .collect();
        if ontology_memories.is_empty() {
            return Ok(out);
        }

        let mut matched: BTreeMap<String, StoredMemory> = BTreeMap::new();
        if self.config.entity_detection_in_messages {
            detect_by_name(message, &ontology_memories, &mut matched);
        }
        self.detect_by_similarity(store, message, &mut matched)?;

        if matched.is_empty() {
            return Ok(out);
        }
        out.matched_entity_ids = matched.keys().cloned().collect();

        // Entity-specific query variants for the memory enhancer.
        for memory in matched.values() {
            if let Some(ont) = &memory.metadata.ontology {
                let name = ont
                    .properties
                    .get("name")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or(&ont.entity_id);
                out.extra_queries.push(format!("relationships of {name}"));
                out.extra_queries
                    .push(format!("{} connected to {name}", ont.entity_type));
            }
        }

        // 1-hop expansion, sorted by confidence.
        let rels = if self.config.auto_expand_relationships {
            relationships.neighbours(
                &out.matched_entity_ids,
                self.min_confidence,
                self.config.max_connected_entities,
            )
        } else {
            Vec::new()
        };

        // Summaries of connected entities not directly matched.
        let by_entity: BTreeMap<String, &StoredMemory> = ontology_memories
            .iter()
            .filter_map(|m| {
                m.metadata
                    .ontology
                    .as_ref()
                    .map(|o| (o.entity_id.clone(), m))
            })
            .collect();
        let mut connected: Vec<&StoredMemory> = Vec::new();
        for rel in &rels {
            for id in [&rel.from_entity, &rel.to_entity] {
                if !out.matched_entity_ids.contains(id.as_str()) {
                    if let Some(memory) = by_entity.get(id.as_str()) {
                        if !connected.iter().any(|m| m.id == memory.id) {
                            connected.push(memory);
                        }
                    }
                }
            }
        }
        connected.truncate(self.config.max_connected_entities);

        out.context_block = format_context(&matched, &rels, &connected);
        tracing::info!(
            entities = matched.len(),
            relationships = rels.len(),
            "ontology context injected"
        );
        Ok(out)
    }

    /// Semantic detection over the ontology area: entities whose summaries
    /// score above the floor against the raw message.
    fn detect_by_similarity(
        &self,
        store: &dyn VectorStore,
        message: &str,
        matched: &mut BTreeMap<String, StoredMemory>,
    ) -> OntologyResult<()> {
        let hits = store.search(
            message,
            self.config.max_connected_entities,
            Some(ONTOLOGY_AREA),
        )?;
        for hit in hits {
            if hit.score < ENTITY_SEARCH_THRESHOLD {
                continue;
            }
            let Some(entity_id) = hit
                .metadata
                .ontology
                .as_ref()
                .map(|o| o.entity_id.clone())
            else {
                continue;
            };
            matched.entry(entity_id).or_insert(StoredMemory {
                id: hit.id,
                content: hit.content,
                metadata: hit.metadata,
            });
        }
        Ok(())
    }
}

/// Substring detection: entity name or alias appears in the message, or a
/// capitalized sequence from the message equals a known name.
fn detect_by_name(
    message: &str,
    memories: &[StoredMemory],
    matched: &mut BTreeMap<String, StoredMemory>,
) {
    let message_lower = message.to_lowercase();
    let candidates: BTreeSet<String> = RE_NAME_CANDIDATE
        .captures_iter(message)
        .map(|c| c[1].to_lowercase())
        .collect();

    for memory in memories {
        let Some(ont) = &memory.metadata.ontology else {
            continue;
        };
        if matched.contains_key(&ont.entity_id) {
            continue;
        }
        let mut names: Vec<String> = Vec::new();
        if let Some(n) = ont.properties.get("name").and_then(serde_json::Value::as_str) {
            names.push(n.to_lowercase());
        }
        if let Some(aliases) = ont
            .properties
            .get("aliases")
            .and_then(serde_json::Value::as_array)
        {
            names.extend(
                aliases
                    .iter()
                    .filter_map(serde_json::Value::as_str)
                    .map(str::to_lowercase),
            );
        }
        let hit = names.iter().any(|n| {
            n.len() >= MIN_ENTITY_NAME_LEN
                && (message_lower.contains(n.as_str()) || candidates.contains(n))
        });
        if hit {
            matched.insert(ont.entity_id.clone(), memory.clone());
        }
    }
}

fn format_context(
    matched: &BTreeMap<String, StoredMemory>,
    rels: &[Relationship],
    connected: &[&StoredMemory],
) -> Option<String> {
    if matched.is_empty() && rels.is_empty() {
        return None;
    }
    let mut lines = vec!["# Ontology Context".to_string(), String::new()];

    lines.push("## Known Entities".to_string());
    for memory in matched.values().take(6) {
        lines.push(format!("- {}", memory.content));
    }
    lines.push(String::new());

    if !rels.is_empty() {
        lines.push("## Known Connections".to_string());
        for rel in rels.iter().take(10) {
            let from = display_name(&rel.from_entity_name, &rel.from_entity);
            let to = display_name(&rel.to_entity_name, &rel.to_entity);
            lines.push(format!(
                "- {from} --[{}]--> {to} [confidence: {:.2}]",
                rel.rel_type, rel.confidence
            ));
        }
        lines.push(String::new());
    }

    if !connected.is_empty() {
        lines.push("## Connected Entities".to_string());
        for memory in connected.iter().take(5) {
            lines.push(format!("- {}", memory.content));
        }
        lines.push(String::new());
    }

    Some(lines.join("\n").trim_end().to_string())
}

fn display_name<'a>(name: &'a str, id: &'a str) -> &'a str {
    if name.is_empty() {
        id
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::store::LexicalStore;
    use crate::ontology::entity::{store_entity, Provenance, ResolvedEntity};
    use chrono::Utc;
    use serde_json::Value;

    fn seed_entity(store: &mut LexicalStore, name: &str, aliases: &[&str]) -> String {
        let mut properties = std::collections::BTreeMap::new();
        properties.insert("name".to_string(), Value::from(name));
        properties.insert("aliases".to_string(), Value::from(aliases.to_vec()));
        let entity = ResolvedEntity {
            entity_type: "organization".to_string(),
            properties,
            relationship_hints: vec![],
            provenance_chain: vec![Provenance {
                source_id: "src".to_string(),
                record_id: name.to_string(),
                source_type: String::new(),
                ingested_at: Utc::now(),
                confidence: 0.9,
            }],
            merge_history: vec![],
        };
        store_entity(store, &entity, &[], Utc::now()).unwrap()
    }

    fn query() -> OntologyQuery {
        OntologyQuery::new(OntologyQueryConfig::default(), 0.3)
    }

    #[test]
    fn detects_by_name_and_alias() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut store = LexicalStore::in_memory();
        let acme = seed_entity(&mut store, "Acme Corporation", &["Acme Corp"]);
        seed_entity(&mut store, "Globex", &[]);
        let rels = RelationshipStore::new(dir.path().join("relationships.jsonl"));

        let out = query()
            .run(&store, &rels, "what do we know about Acme Corp and its filings?")
            .unwrap();
        assert!(out.matched_entity_ids.contains(&acme));
        assert!(out
            .extra_queries
            .iter()
            .any(|q| q == "relationships of Acme Corporation"));
        assert!(out
            .extra_queries
            .iter()
            .any(|q| q == "organization connected to Acme Corporation"));
    }

    #[test]
    fn expands_one_hop_connections() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut store = LexicalStore::in_memory();
        let acme = seed_entity(&mut store, "Acme Corporation", &[]);
        let globex = seed_entity(&mut store, "Globex Industrial", &[]);
        let rels = RelationshipStore::new(dir.path().join("relationships.jsonl"));
        rels.append_new(&[Relationship::new(
            "co_mentioned",
            &acme,
            &globex,
            0.8,
            Utc::now(),
        )
        .named("Acme Corporation", "Globex Industrial")])
            .unwrap();

        let out = query()
            .run(&store, &rels, "dig into Acme Corporation")
            .unwrap();
        let block = out.context_block.unwrap();
        assert!(block.contains("## Known Connections"));
        assert!(block.contains("Acme Corporation --[co_mentioned]--> Globex Industrial"));
        assert!(block.contains("## Connected Entities"));
        assert!(block.contains("Globex Industrial (organization)"));
    }

    #[test]
    fn no_entities_means_no_context() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LexicalStore::in_memory();
        let rels = RelationshipStore::new(dir.path().join("relationships.jsonl"));
        let out = query().run(&store, &rels, "refactor the parser").unwrap();
        assert!(out.context_block.is_none());
        assert!(out.extra_queries.is_empty());
    }
}
