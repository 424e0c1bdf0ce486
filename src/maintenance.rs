//! Out-of-band maintenance: deduplication, related-memory linking, cluster
//! detection, dormancy flagging, and ontology upkeep.
//!
//! Runs between turns, every `maintenance_interval_loops` cycles, never
//! concurrently with the turn pipeline. Maintenance never deletes a memory:
//! losers get `superseded_by` pointers, dormancy is a flag, and only
//! already-deprecated relationship edges are compacted away.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{ClassificationConfig, OntologyConfig};
use crate::memory::co_retrieval::CoRetrievalLog;
use crate::memory::fragment::{MemoryMetadata, Utility, Validity, ONTOLOGY_AREA};
use crate::memory::store::{StoredMemory, VectorStore};
use crate::memory::MemoryResult;
use crate::ontology::discovery::{self, StoredEntity};
use crate::ontology::entity::store_entity;
use crate::ontology::queues::{AuditLog, IngestionQueue, ReviewQueue};
use crate::ontology::relationship::RelationshipStore;
use crate::ontology::resolution::Resolver;
use crate::paths::StateRoot;

/// One dedup decision, appended to the resolution audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupDecision {
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub winner: String,
    pub loser: String,
    pub similarity: f64,
    /// Which rule decided: "validity_rank", "newer_wins", "flag_only".
    pub rule: String,
}

/// Counters from one maintenance run.
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub dedup_resolved: usize,
    pub dedup_flagged: usize,
    pub links_created: usize,
    pub clusters_found: usize,
    pub dormancy_flagged: usize,
    pub entities_resolved: usize,
    pub relationships_written: usize,
    pub relationships_compacted: usize,
}

/// The maintenance pass. Holds tunables; state comes in per run so the
/// caller keeps single-writer ownership of the stores.
#[derive(Debug)]
pub struct Maintenance {
    config: ClassificationConfig,
    ontology: OntologyConfig,
}

impl Maintenance {
    pub fn new(config: ClassificationConfig, ontology: OntologyConfig) -> Self {
        Self { config, ontology }
    }

    /// Whether this cycle number is due for maintenance.
    pub fn due(&self, cycle: u64) -> bool {
        let interval = self.config.maintenance_interval_loops;
        interval > 0 && cycle > 0 && cycle % interval == 0
    }

    /// Run every phase. Each phase is independent; a failing phase logs and
    /// the rest continue.
    pub fn run(
        &self,
        store: &mut dyn VectorStore,
        co_log: &mut CoRetrievalLog,
        root: &StateRoot,
        cycle: u64,
        now: DateTime<Utc>,
    ) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        if self.config.deduplication.enabled {
            match self.deduplicate(store, root, now) {
                Ok((resolved, flagged)) => {
                    report.dedup_resolved = resolved;
                    report.dedup_flagged = flagged;
                }
                Err(e) => tracing::warn!(error = %e, "dedup phase failed"),
            }
        }

        if self.config.related_memories.enabled {
            match self.link_related(store) {
                Ok(count) => report.links_created = count,
                Err(e) => tracing::warn!(error = %e, "linking phase failed"),
            }
        }

        report.clusters_found = co_log.detect_clusters(self.config.co_retrieval.cluster_threshold);

        match self.flag_dormant(store, cycle) {
            Ok(count) => report.dormancy_flagged = count,
            Err(e) => tracing::warn!(error = %e, "dormancy phase failed"),
        }

        if self.ontology.enabled {
            self.ontology_upkeep(store, co_log, root, now, &mut report);
        }

        tracing::info!(
            cycle,
            dedup = report.dedup_resolved,
            links = report.links_created,
            clusters = report.clusters_found,
            dormant = report.dormancy_flagged,
            entities = report.entities_resolved,
            "maintenance pass complete"
        );
        report
    }

    // ── Phase 1: deduplication ──────────────────────────────────────────

    fn deduplicate(
        &self,
        store: &mut dyn VectorStore,
        root: &StateRoot,
        now: DateTime<Utc>,
    ) -> MemoryResult<(usize, usize)> {
        let cfg = &self.config.deduplication;
        let all = store.iterate_all()?;
        let mut by_id: BTreeMap<String, StoredMemory> =
            all.iter().map(|m| (m.id.clone(), m.clone())).collect();

        let mut processed: BTreeSet<(String, String)> = BTreeSet::new();
        let mut decisions: Vec<DedupDecision> = Vec::new();
        let mut resolved = 0;
        let mut flagged = 0;

        for record in &all {
            if resolved >= cfg.max_pairs_per_cycle {
                break;
            }
            if !by_id[&record.id].metadata.retrievable() || record.content.len() < 10 {
                continue;
            }

            let hits = store.search(&record.content, 6, None)?;
            for hit in hits {
                if resolved >= cfg.max_pairs_per_cycle {
                    break;
                }
                if hit.id == record.id || hit.score < cfg.similarity_threshold {
                    continue;
                }
                let pair = if record.id < hit.id {
                    (record.id.clone(), hit.id.clone())
                } else {
                    (hit.id.clone(), record.id.clone())
                };
                if !processed.insert(pair) {
                    continue;
                }
                // Read the live copies: earlier pairs may have deprecated one.
                let meta_a = by_id[&record.id].metadata.clone();
                let meta_b = by_id[&hit.id].metadata.clone();
                if !meta_a.retrievable() || !meta_b.retrievable() {
                    continue;
                }

                match resolve_pair(&record.id, &meta_a, &hit.id, &meta_b, cfg.auto_deprecate_agent_inferred) {
                    PairAction::FlagOnly(rule) => {
                        flagged += 1;
                        decisions.push(DedupDecision {
                            timestamp: now,
                            kind: "memory_dedup".to_string(),
                            winner: String::new(),
                            loser: String::new(),
                            similarity: hit.score,
                            rule: rule.to_string(),
                        });
                    }
                    PairAction::Supersede { winner, loser, rule } => {
                        apply_supersede(&mut by_id, &winner, &loser, now);
                        decisions.push(DedupDecision {
                            timestamp: now,
                            kind: "memory_dedup".to_string(),
                            winner,
                            loser,
                            similarity: hit.score,
                            rule: rule.to_string(),
                        });
                        resolved += 1;
                    }
                    PairAction::Skip => {}
                }
            }
        }

        // Write back every record whose metadata changed.
        for (id, record) in &by_id {
            let original = all.iter().find(|m| &m.id == id);
            let changed = original
                .map(|o| {
                    serde_json::to_string(&o.metadata).ok()
                        != serde_json::to_string(&record.metadata).ok()
                })
                .unwrap_or(true);
            if changed {
                store.store(id, &record.content, record.metadata.clone())?;
            }
        }

        if !decisions.is_empty() {
            if let Err(e) = crate::jsonio::append_jsonl(&root.resolution_audit(), &decisions) {
                tracing::warn!(error = %e, "dedup audit append failed");
            }
        }
        Ok((resolved, flagged))
    }

    // ── Phase 2: related-memory linking ─────────────────────────────────

    fn link_related(&self, store: &mut dyn VectorStore) -> MemoryResult<usize> {
        let cfg = &self.config.related_memories;
        let all = store.iterate_all()?;

        let tagged: Vec<(usize, BTreeSet<String>)> = all
            .iter()
            .enumerate()
            .filter(|(_, m)| m.metadata.retrievable())
            .map(|(i, m)| (i, m.metadata.link_tags()))
            .filter(|(_, tags)| tags.len() >= cfg.tag_overlap_threshold)
            .collect();

        let mut records: Vec<StoredMemory> = all.clone();
        let mut links = 0;

        for a in 0..tagged.len() {
            for b in (a + 1)..tagged.len() {
                let (i, tags_a) = &tagged[a];
                let (j, tags_b) = &tagged[b];
                if tags_a.intersection(tags_b).count() < cfg.tag_overlap_threshold {
                    continue;
                }
                let id_i = records[*i].id.clone();
                let id_j = records[*j].id.clone();
                let added_i = add_related(&mut records[*i].metadata, &id_j, cfg.max_related_per_memory);
                let added_j = add_related(&mut records[*j].metadata, &id_i, cfg.max_related_per_memory);
                if added_i || added_j {
                    links += 1;
                }
            }
        }

        for (record, original) in records.iter().zip(all.iter()) {
            if record.metadata.lineage.related_memory_ids
                != original.metadata.lineage.related_memory_ids
            {
                store.store(&record.id, &record.content, record.metadata.clone())?;
            }
        }
        Ok(links)
    }

    // ── Phase 4: dormancy ───────────────────────────────────────────────

    fn flag_dormant(&self, store: &mut dyn VectorStore, cycle: u64) -> MemoryResult<usize> {
        let threshold = self.config.archival_threshold_cycles;
        let all = store.iterate_all()?;
        let mut count = 0;

        for mut record in all {
            let c = &record.metadata.classification;
            let l = &record.metadata.lineage;
            if c.validity == Validity::Deprecated
                || c.relevance == crate::memory::fragment::Relevance::Dormant
                || c.utility == Utility::LoadBearing
                || l.dormancy_candidate
                || l.access_count > 0
            {
                continue;
            }
            if cycle.saturating_sub(l.classified_at_cycle) >= threshold {
                record.metadata.lineage.dormancy_candidate = true;
                store.store(&record.id, &record.content, record.metadata)?;
                count += 1;
            }
        }
        Ok(count)
    }

    // ── Phase 5: ontology upkeep ────────────────────────────────────────

    fn ontology_upkeep(
        &self,
        store: &mut dyn VectorStore,
        co_log: &CoRetrievalLog,
        root: &StateRoot,
        now: DateTime<Utc>,
        report: &mut MaintenanceReport,
    ) {
        let queue = IngestionQueue::new(root.ingestion_queue());
        let review = ReviewQueue::new(root.review_queue());
        let audit = AuditLog::new(root.resolution_audit());
        let relationships = RelationshipStore::new(root.relationships());
        let schema = crate::ontology::relationship::OntologySchema::load(&root.ontology_schema());
        let resolver = Resolver::new(self.ontology.entity_resolution.clone());
        let discovery_cfg = &self.ontology.relationship_extraction;

        // Resolve pending candidates.
        let pending = queue.pending(500);
        if !pending.is_empty() && self.ontology.entity_resolution.enabled {
            let outcome = resolver.resolve_batch(&pending, now);
            if let Err(e) = audit.append(&outcome.audit) {
                tracing::warn!(error = %e, "resolution audit append failed");
            }
            if let Err(e) = review.append(&outcome.flagged) {
                tracing::warn!(error = %e, "review queue append failed");
            }

            let mut stored: Vec<StoredEntity> = Vec::new();
            for entity in outcome.merged.iter().chain(outcome.distinct.iter()) {
                match store_entity(store, entity, &[], now) {
                    Ok(entity_id) => stored.push(StoredEntity {
                        entity_id,
                        entity: entity.clone(),
                    }),
                    Err(e) => tracing::warn!(error = %e, "entity store failed"),
                }
            }
            report.entities_resolved = stored.len();

            let resolved_ids: BTreeSet<String> =
                pending.iter().map(|c| c.candidate_id()).collect();
            if let Err(e) = queue.mark_resolved(&resolved_ids) {
                tracing::warn!(error = %e, "queue mark_resolved failed");
            }

            // Discover relationships among the stored batch.
            if discovery_cfg.enabled {
                let mut rels = discovery::co_mentioned(&stored, now);
                rels.extend(discovery::co_located(&stored, now));
                rels.extend(discovery::temporally_linked(&stored, discovery_cfg, now));
                rels.extend(discovery::resolve_hints(&stored, now));
                rels.retain(|r| {
                    r.confidence > 0.0 || r.to_entity.starts_with("unresolved:")
                });
                for rel in &rels {
                    if !schema.known_relationship(&rel.rel_type) {
                        tracing::warn!(rel_type = rel.rel_type.as_str(), "relationship type not in schema");
                    }
                }
                match relationships.append_new(&rels) {
                    Ok(n) => report.relationships_written += n,
                    Err(e) => tracing::warn!(error = %e, "relationship append failed"),
                }
            }
        }

        // Promote related-memory links between ontology entities.
        if discovery_cfg.promote_memory_links {
            if let Ok(all) = store.iterate_all() {
                let ontology_memories: Vec<StoredMemory> = all
                    .into_iter()
                    .filter(|m| m.metadata.classification.area == ONTOLOGY_AREA)
                    .collect();
                let promoted = discovery::promote_memory_links(&ontology_memories, now);
                let surfaced: Vec<_> = promoted
                    .into_iter()
                    .filter(|r| r.confidence >= discovery_cfg.min_confidence_to_surface)
                    .collect();
                match relationships.append_new(&surfaced) {
                    Ok(n) => report.relationships_written += n,
                    Err(e) => tracing::warn!(error = %e, "link promotion failed"),
                }
            }
        }

        // Refresh retrieved_together confidence from co-retrieval counts.
        for candidate in &co_log.cluster_candidates {
            if candidate.memory_ids.len() != 2 {
                continue;
            }
            let confidence = discovery::co_retrieval_confidence(candidate.co_retrieval_count);
            let (a, b) = (&candidate.memory_ids[0], &candidate.memory_ids[1]);
            let rel = crate::ontology::relationship::Relationship::new(
                "retrieved_together",
                a,
                b,
                confidence,
                now,
            );
            let updated = relationships
                .update_where(
                    |r| r.rel_id == rel.rel_id,
                    |r| {
                        r.confidence = confidence;
                        r.updated_at = now;
                    },
                )
                .unwrap_or(0);
            if updated == 0 && both_entities(store, a, b) {
                if let Ok(n) = relationships.append_new(&[rel]) {
                    report.relationships_written += n;
                }
            }
        }

        // Compact deprecated edges.
        match relationships.compact() {
            Ok(n) => report.relationships_compacted = n,
            Err(e) => tracing::warn!(error = %e, "relationship compaction failed"),
        }
    }
}

/// Whether both ids are ontology entity memories.
fn both_entities(store: &dyn VectorStore, a: &str, b: &str) -> bool {
    let Ok(all) = store.iterate_all() else {
        return false;
    };
    let is_entity = |id: &str| {
        all.iter()
            .any(|m| m.id == id && m.metadata.classification.area == ONTOLOGY_AREA)
    };
    is_entity(a) && is_entity(b)
}

enum PairAction {
    Skip,
    FlagOnly(&'static str),
    Supersede {
        winner: String,
        loser: String,
        rule: &'static str,
    },
}

/// Resolution priority: confirmed > user_asserted > agent_inferred >
/// deprecated; equal tiers resolve newer-wins. Load-bearing memories and
/// both-user-asserted conflicts are flagged, never auto-deprecated.
fn resolve_pair(
    id_a: &str,
    meta_a: &MemoryMetadata,
    id_b: &str,
    meta_b: &MemoryMetadata,
    auto_deprecate: bool,
) -> PairAction {
    if meta_a.classification.utility == Utility::LoadBearing
        || meta_b.classification.utility == Utility::LoadBearing
    {
        return PairAction::FlagOnly("load_bearing");
    }

    let rank = |v: Validity| match v {
        Validity::Confirmed => 3,
        Validity::UserAsserted => 2,
        Validity::AgentInferred => 1,
        Validity::Deprecated => 0,
    };
    let (rank_a, rank_b) = (rank(meta_a.classification.validity), rank(meta_b.classification.validity));

    if meta_a.classification.validity == Validity::UserAsserted
        && meta_b.classification.validity == Validity::UserAsserted
    {
        return PairAction::FlagOnly("both_user_asserted");
    }

    if rank_a != rank_b {
        let (winner, loser) = if rank_a > rank_b { (id_a, id_b) } else { (id_b, id_a) };
        return PairAction::Supersede {
            winner: winner.to_string(),
            loser: loser.to_string(),
            rule: "validity_rank",
        };
    }

    if !auto_deprecate {
        return PairAction::Skip;
    }
    // Same tier: newer supersedes older.
    let (winner, loser) = if meta_a.lineage.created_at >= meta_b.lineage.created_at {
        (id_a, id_b)
    } else {
        (id_b, id_a)
    };
    PairAction::Supersede {
        winner: winner.to_string(),
        loser: loser.to_string(),
        rule: "newer_wins",
    }
}

fn apply_supersede(
    by_id: &mut BTreeMap<String, StoredMemory>,
    winner_id: &str,
    loser_id: &str,
    now: DateTime<Utc>,
) {
    if let Some(loser) = by_id.get_mut(loser_id) {
        loser.metadata.classification.validity = Validity::Deprecated;
        loser.metadata.lineage.superseded_by = Some(winner_id.to_string());
        loser.metadata.lineage.deprecated_at = Some(now);
        loser.metadata.lineage.deprecated_reason = Some("deduplication".to_string());
    }
    if let Some(winner) = by_id.get_mut(winner_id) {
        let supersedes = &mut winner.metadata.lineage.supersedes;
        if !supersedes.iter().any(|s| s == loser_id) {
            supersedes.push(loser_id.to_string());
        }
    }
}

/// Add to `related_memory_ids` under the cap. Returns whether it was new.
fn add_related(metadata: &mut MemoryMetadata, related_id: &str, max_per: usize) -> bool {
    let ids = &mut metadata.lineage.related_memory_ids;
    if ids.iter().any(|r| r == related_id) || ids.len() >= max_per {
        return false;
    }
    ids.push(related_id.to_string());
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::fragment::Source;
    use crate::memory::store::LexicalStore;

    fn root() -> (tempfile::TempDir, StateRoot) {
        let dir = tempfile::TempDir::new().unwrap();
        let root = StateRoot::create(dir.path()).unwrap();
        (dir, root)
    }

    fn maintenance() -> Maintenance {
        Maintenance::new(ClassificationConfig::default(), OntologyConfig::default())
    }

    fn put(
        store: &mut LexicalStore,
        id: &str,
        content: &str,
        validity: Validity,
        created: DateTime<Utc>,
    ) {
        let mut meta = MemoryMetadata::new(created);
        meta.classification.validity = validity;
        if validity == Validity::UserAsserted {
            meta.classification.source = Source::UserAsserted;
        }
        store.store(id, content, meta).unwrap();
    }

    #[test]
    fn due_gates_on_interval() {
        let m = maintenance();
        assert!(!m.due(0));
        assert!(!m.due(24));
        assert!(m.due(25));
        assert!(m.due(50));
    }

    #[test]
    fn dedup_user_asserted_beats_newer_inferred() {
        let (_dir, root) = root();
        let mut store = LexicalStore::in_memory();
        let mut co_log = CoRetrievalLog::default();
        let now = Utc::now();

        let t1 = now - chrono::Duration::days(10);
        // Identical content: similarity 1.0, well above 0.90.
        put(&mut store, "m1", "the deploy target is the staging cluster", Validity::UserAsserted, t1);
        put(&mut store, "m2", "the deploy target is the staging cluster", Validity::AgentInferred, now);

        let report = maintenance().run(&mut store, &mut co_log, &root, 25, now);
        assert_eq!(report.dedup_resolved, 1);

        let m1 = store.get("m1").unwrap();
        let m2 = store.get("m2").unwrap();
        assert_eq!(m1.metadata.classification.validity, Validity::UserAsserted);
        assert_eq!(m2.metadata.classification.validity, Validity::Deprecated);
        assert_eq!(m2.metadata.lineage.superseded_by.as_deref(), Some("m1"));
        assert_eq!(m1.metadata.lineage.supersedes, vec!["m2".to_string()]);

        // Non-destructive: both records still exist.
        assert_eq!(store.len(), 2);

        // Decision is in the audit log.
        let audit: Vec<DedupDecision> = crate::jsonio::read_jsonl(&root.resolution_audit());
        assert!(audit.iter().any(|d| d.rule == "validity_rank" && d.winner == "m1"));
    }

    #[test]
    fn dedup_is_idempotent() {
        let (_dir, root) = root();
        let mut store = LexicalStore::in_memory();
        let mut co_log = CoRetrievalLog::default();
        let now = Utc::now();

        put(&mut store, "m1", "remember the api token lives in the vault", Validity::AgentInferred, now - chrono::Duration::days(1));
        put(&mut store, "m2", "remember the api token lives in the vault", Validity::AgentInferred, now);

        let m = maintenance();
        let first = m.run(&mut store, &mut co_log, &root, 25, now);
        assert_eq!(first.dedup_resolved, 1);
        let second = m.run(&mut store, &mut co_log, &root, 50, now);
        assert_eq!(second.dedup_resolved, 0);
    }

    #[test]
    fn load_bearing_is_never_deprecated() {
        let (_dir, root) = root();
        let mut store = LexicalStore::in_memory();
        let mut co_log = CoRetrievalLog::default();
        let now = Utc::now();

        let mut meta = MemoryMetadata::new(now);
        meta.classification.utility = Utility::LoadBearing;
        store.store("lb", "never commit directly to the main branch", meta).unwrap();
        put(&mut store, "dup", "never commit directly to the main branch", Validity::AgentInferred, now);

        let report = maintenance().run(&mut store, &mut co_log, &root, 25, now);
        assert_eq!(report.dedup_resolved, 0);
        assert!(report.dedup_flagged >= 1);
        assert!(store.get("lb").unwrap().metadata.retrievable());
        assert!(store.get("dup").unwrap().metadata.retrievable());
    }

    #[test]
    fn related_linking_by_tag_overlap() {
        let (_dir, root) = root();
        let mut store = LexicalStore::in_memory();
        let mut co_log = CoRetrievalLog::default();
        let now = Utc::now();

        for id in ["a", "b"] {
            let mut meta = MemoryMetadata::new(now);
            meta.lineage.domain = Some("bugfix".to_string());
            meta.classification.tags.insert("auth".to_string());
            store
                .store(id, &format!("note {id} entirely different words {id}{id}"), meta)
                .unwrap();
        }

        let report = maintenance().run(&mut store, &mut co_log, &root, 25, now);
        assert_eq!(report.links_created, 1);
        assert_eq!(
            store.get("a").unwrap().metadata.lineage.related_memory_ids,
            vec!["b".to_string()]
        );
        assert_eq!(
            store.get("b").unwrap().metadata.lineage.related_memory_ids,
            vec!["a".to_string()]
        );
    }

    #[test]
    fn dormancy_flags_untouched_memories() {
        let (_dir, root) = root();
        let mut store = LexicalStore::in_memory();
        let mut co_log = CoRetrievalLog::default();
        let now = Utc::now();

        put(&mut store, "old", "a memory nothing ever retrieves again", Validity::AgentInferred, now);
        let mut touched = MemoryMetadata::new(now);
        touched.lineage.access_count = 4;
        store.store("hot", "a memory retrieved all the time", touched).unwrap();

        let report = maintenance().run(&mut store, &mut co_log, &root, 50, now);
        assert_eq!(report.dormancy_flagged, 1);
        assert!(store.get("old").unwrap().metadata.lineage.dormancy_candidate);
        assert!(!store.get("hot").unwrap().metadata.lineage.dormancy_candidate);
        // Flag only: relevance is untouched.
        assert_eq!(
            store.get("old").unwrap().metadata.classification.relevance,
            crate::memory::fragment::Relevance::Active
        );
    }
}
