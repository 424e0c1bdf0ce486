//! Relationship discovery: deterministic edge inference over resolved
//! entities, plus promotion of memory-layer links into typed edges.
//!
//! Confidence ladder: explicit hints resolve at their match strength,
//! co-mention at 0.8 (three or more sources) or 0.5, shared address at 0.6,
//! temporal proximity at 0.4. Low-confidence edges are stored but filtered
//! at query time.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::entity::ResolvedEntity;
use super::relationship::Relationship;
use super::resolution::{canonicalize_address, normalize_name, subsequence_ratio};
use crate::config::DiscoveryConfig;
use crate::memory::store::StoredMemory;

/// Confidence for co-mention backed by three or more sources.
const CO_MENTION_STRONG: f64 = 0.8;
const CO_MENTION_WEAK: f64 = 0.5;
const CO_LOCATED_CONFIDENCE: f64 = 0.6;
const TEMPORAL_CONFIDENCE: f64 = 0.4;
/// Hint target match strength required for a full-confidence edge.
const HINT_RESOLVE_THRESHOLD: f64 = 0.8;
/// Confidence for promoted memory-layer links.
const MEMORY_LINK_CONFIDENCE: f64 = 0.5;

/// An entity with its assigned store id, the unit discovery works over.
#[derive(Debug, Clone)]
pub struct StoredEntity {
    pub entity_id: String,
    pub entity: ResolvedEntity,
}

impl StoredEntity {
    fn name(&self) -> &str {
        self.entity.name()
    }
}

/// Entities sharing a source record → `co_mentioned`.
pub fn co_mentioned(entities: &[StoredEntity], now: DateTime<Utc>) -> Vec<Relationship> {
    // record key → entity indices appearing in it.
    let mut by_record: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, e) in entities.iter().enumerate() {
        for prov in &e.entity.provenance_chain {
            by_record.entry(prov.record_key()).or_default().push(i);
        }
    }

    // pair → distinct source ids backing the co-mention.
    let mut pair_sources: BTreeMap<(usize, usize), BTreeSet<String>> = BTreeMap::new();
    for (record_key, members) in &by_record {
        if members.len() < 2 {
            continue;
        }
        let source_id = record_key.split(':').next().unwrap_or("").to_string();
        for a in 0..members.len() {
            for b in (a + 1)..members.len() {
                let (i, j) = (members[a].min(members[b]), members[a].max(members[b]));
                if i != j {
                    pair_sources.entry((i, j)).or_default().insert(source_id.clone());
                }
            }
        }
    }

    pair_sources
        .into_iter()
        .map(|((i, j), sources)| {
            let confidence = if sources.len() >= 3 {
                CO_MENTION_STRONG
            } else {
                CO_MENTION_WEAK
            };
            Relationship::new(
                "co_mentioned",
                &entities[i].entity_id,
                &entities[j].entity_id,
                confidence,
                now,
            )
            .named(entities[i].name(), entities[j].name())
            .with_property("source_count", Value::from(sources.len()))
        })
        .collect()
}

/// Entities at the same canonicalized address → `co_located`.
pub fn co_located(entities: &[StoredEntity], now: DateTime<Utc>) -> Vec<Relationship> {
    let mut by_address: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, e) in entities.iter().enumerate() {
        let addr = e
            .entity
            .properties
            .get("address")
            .or_else(|| e.entity.properties.get("location"))
            .and_then(Value::as_str)
            .map(canonicalize_address)
            .unwrap_or_default();
        if !addr.is_empty() {
            by_address.entry(addr).or_default().push(i);
        }
    }

    let mut rels = Vec::new();
    for (addr, members) in &by_address {
        for a in 0..members.len() {
            for b in (a + 1)..members.len() {
                let (i, j) = (members[a], members[b]);
                rels.push(
                    Relationship::new(
                        "co_located",
                        &entities[i].entity_id,
                        &entities[j].entity_id,
                        CO_LOCATED_CONFIDENCE,
                        now,
                    )
                    .named(entities[i].name(), entities[j].name())
                    .with_property("address", Value::from(addr.clone())),
                );
            }
        }
    }
    rels
}

/// Entities whose dated records fall within the temporal window →
/// `temporally_linked`.
pub fn temporally_linked(
    entities: &[StoredEntity],
    config: &DiscoveryConfig,
    now: DateTime<Utc>,
) -> Vec<Relationship> {
    let dated: Vec<(usize, chrono::NaiveDate)> = entities
        .iter()
        .enumerate()
        .filter_map(|(i, e)| {
            ["date", "start_date", "filing_date", "effective_date"]
                .iter()
                .find_map(|k| e.entity.properties.get(*k).and_then(Value::as_str))
                .and_then(super::resolution::normalize_date)
                .map(|d| (i, d))
        })
        .collect();

    let mut rels = Vec::new();
    for a in 0..dated.len() {
        for b in (a + 1)..dated.len() {
            let (i, da) = dated[a];
            let (j, db) = dated[b];
            let delta = (da - db).num_days().abs();
            if delta <= config.temporal_window_days {
                rels.push(
                    Relationship::new(
                        "temporally_linked",
                        &entities[i].entity_id,
                        &entities[j].entity_id,
                        TEMPORAL_CONFIDENCE,
                        now,
                    )
                    .named(entities[i].name(), entities[j].name())
                    .with_property("days_apart", Value::from(delta)),
                );
            }
        }
    }
    rels
}

/// Resolve each entity's relationship hints against the known entity set.
///
/// A hint whose target matches an existing entity at or above the resolve
/// threshold gets an edge at that strength; weaker matches still produce an
/// edge at the scored confidence; unmatched hints get an `unresolved:` stub
/// target so the claim is not lost.
pub fn resolve_hints(entities: &[StoredEntity], now: DateTime<Utc>) -> Vec<Relationship> {
    let mut rels = Vec::new();
    for source in entities {
        for hint in &source.entity.relationship_hints {
            let target_norm = normalize_name(&hint.target_hint);
            if target_norm.is_empty() {
                continue;
            }

            let best = entities
                .iter()
                .filter(|e| e.entity_id != source.entity_id)
                .map(|e| {
                    let score = subsequence_ratio(&normalize_name(e.name()), &target_norm);
                    (score, e)
                })
                .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

            let rel = match best {
                Some((score, target)) if score >= HINT_RESOLVE_THRESHOLD => Relationship::new(
                    &hint.rel_type,
                    &source.entity_id,
                    &target.entity_id,
                    score,
                    now,
                )
                .named(source.name(), target.name()),
                Some((score, target)) if score > 0.0 => Relationship::new(
                    &hint.rel_type,
                    &source.entity_id,
                    &target.entity_id,
                    score,
                    now,
                )
                .named(source.name(), target.name()),
                _ => Relationship::new(
                    &hint.rel_type,
                    &source.entity_id,
                    &format!("unresolved:{target_norm}"),
                    0.0,
                    now,
                )
                .named(source.name(), &hint.target_hint),
            };
            rels.push(rel);
        }
    }
    rels
}

/// Promote related-memory links between ontology entities to typed
/// `knowledge_link` edges.
pub fn promote_memory_links(
    ontology_memories: &[StoredMemory],
    now: DateTime<Utc>,
) -> Vec<Relationship> {
    let by_memory_id: BTreeMap<&str, &StoredMemory> = ontology_memories
        .iter()
        .map(|m| (m.id.as_str(), m))
        .collect();

    let mut rels = Vec::new();
    let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
    for memory in ontology_memories {
        let Some(from_ont) = memory.metadata.ontology.as_ref() else {
            continue;
        };
        for related_id in &memory.metadata.lineage.related_memory_ids {
            let Some(related) = by_memory_id.get(related_id.as_str()) else {
                continue;
            };
            let Some(to_ont) = related.metadata.ontology.as_ref() else {
                continue;
            };
            let key = if from_ont.entity_id < to_ont.entity_id {
                (from_ont.entity_id.clone(), to_ont.entity_id.clone())
            } else {
                (to_ont.entity_id.clone(), from_ont.entity_id.clone())
            };
            if !seen.insert(key) {
                continue;
            }
            rels.push(Relationship::new(
                "knowledge_link",
                &from_ont.entity_id,
                &to_ont.entity_id,
                MEMORY_LINK_CONFIDENCE,
                now,
            ));
        }
    }
    rels
}

/// Derive `retrieved_together` confidence from a co-retrieval count.
pub fn co_retrieval_confidence(count: usize) -> f64 {
    (0.2 + count as f64 * 0.1).clamp(0.3, 0.9)
}
