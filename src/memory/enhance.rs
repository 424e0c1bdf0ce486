//! Retrieval-time memory enhancement.
//!
//! Before each model call: expand the user message into query variants,
//! merge similarity hits keeping the best score per memory, blend in a
//! temporal recency component (with exemptions), boost memories related to
//! the provisional selection, and emit the top-k with access tracking.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};

use super::fragment::MemoryId;
use super::store::{SearchHit, VectorStore};
use super::MemoryResult;
use crate::config::RetrievalConfig;

/// Fixed stopword set for the keyword variant.
static STOPWORDS: LazyLock<BTreeSet<&'static str>> = LazyLock::new(|| {
    [
        "a", "an", "and", "are", "as", "at", "be", "but", "by", "can", "could", "do", "does",
        "for", "from", "has", "have", "how", "i", "in", "is", "it", "its", "me", "my", "not",
        "of", "on", "or", "our", "please", "should", "so", "that", "the", "their", "then",
        "there", "these", "this", "to", "was", "we", "were", "what", "when", "where", "which",
        "who", "will", "with", "would", "you", "your",
    ]
    .into_iter()
    .collect()
});

/// Maximum tokens kept in the keyword variant.
const MAX_KEYWORD_TOKENS: usize = 12;

/// A memory selected for injection into the model context.
#[derive(Debug, Clone)]
pub struct RetrievedMemory {
    pub id: MemoryId,
    pub content: String,
    pub similarity: f64,
    pub recency: f64,
    pub final_score: f64,
}

/// Keyword variant: stopwords removed, tokens longer than 2 characters,
/// input order preserved, at most 12 tokens.
pub fn keyword_variant(message: &str) -> String {
    message
        .split(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
        .filter(|t| t.len() > 2)
        .filter(|t| !STOPWORDS.contains(t.to_lowercase().as_str()))
        .take(MAX_KEYWORD_TOKENS)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Expand a message into query variants: original, keyword, and
/// domain-prefixed keyword when a domain is known. Duplicate variants are
/// dropped so re-expansion yields the same merged candidate set.
pub fn expand_query(message: &str, domain: Option<&str>) -> Vec<String> {
    let mut variants = vec![message.to_string()];
    let keywords = keyword_variant(message);
    if !keywords.is_empty() && keywords != message {
        variants.push(keywords.clone());
    }
    if let Some(domain) = domain {
        if !keywords.is_empty() {
            let prefixed = format!("{domain}: {keywords}");
            if !variants.contains(&prefixed) {
                variants.push(prefixed);
            }
        }
    }
    variants
}

/// Retrieval-time enhancer. Holds only tunables; the store is passed per
/// call so the turn pipeline keeps single-writer ownership.
#[derive(Debug, Clone)]
pub struct Enhancer {
    config: RetrievalConfig,
}

impl Enhancer {
    pub fn new(config: RetrievalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Recency component for a memory whose decay reference is `reference`.
    ///
    /// `exp(-ln2 / half_life * age_hours)` floored at the configured minimum.
    /// Exempt memories are handled by the caller (pinned to 1.0).
    pub fn recency(&self, reference: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        let age_hours = (now - reference).num_seconds().max(0) as f64 / 3600.0;
        let decay_rate = std::f64::consts::LN_2 / self.config.half_life_hours;
        (-decay_rate * age_hours).exp().max(self.config.min_recency_score)
    }

    /// Run the full retrieval pass. `extra_queries` lets the ontology
    /// extension contribute entity-specific variants. Selected memories get
    /// their access count and last-accessed stamp updated in the store.
    pub fn retrieve(
        &self,
        store: &mut dyn VectorStore,
        message: &str,
        domain: Option<&str>,
        extra_queries: &[String],
        now: DateTime<Utc>,
    ) -> MemoryResult<Vec<RetrievedMemory>> {
        if !self.config.enabled {
            return Ok(Vec::new());
        }

        let mut queries = expand_query(message, domain);
        for q in extra_queries {
            if !queries.contains(q) {
                queries.push(q.clone());
            }
        }

        // Merge hits across variants, keeping the best similarity per id.
        let mut pool: BTreeMap<MemoryId, SearchHit> = BTreeMap::new();
        for query in &queries {
            for hit in store.search(query, self.config.k_per_variant, None)? {
                if !hit.metadata.retrievable() {
                    continue;
                }
                match pool.get(&hit.id) {
                    Some(existing) if existing.score >= hit.score => {}
                    _ => {
                        pool.insert(hit.id.clone(), hit);
                    }
                }
            }
        }

        if pool.is_empty() {
            return Ok(Vec::new());
        }

        // Decay-weighted rescoring.
        let w = self.config.decay_weight;
        let mut scored: Vec<(SearchHit, f64, f64)> = pool
            .into_values()
            .map(|hit| {
                let recency = if hit.metadata.decay_exempt() {
                    1.0
                } else {
                    self.recency(hit.metadata.lineage.decay_reference(), now)
                };
                let final_score = (1.0 - w) * hit.score + w * recency;
                (hit, recency, final_score)
            })
            .collect();
        sort_scored(&mut scored);

        // Related boost: memories linked from the provisional selection that
        // sit outside it get one boost, then the pool is re-ranked.
        let k = self.config.max_injected;
        let provisional: BTreeSet<MemoryId> =
            scored.iter().take(k).map(|(h, _, _)| h.id.clone()).collect();
        let mut boosted: BTreeSet<MemoryId> = BTreeSet::new();
        for (hit, _, _) in scored.iter().take(k) {
            for related in &hit.metadata.lineage.related_memory_ids {
                if !provisional.contains(related) {
                    boosted.insert(related.clone());
                }
            }
        }
        if !boosted.is_empty() {
            for (hit, _, final_score) in scored.iter_mut() {
                if boosted.contains(&hit.id) {
                    *final_score += self.config.related_boost;
                }
            }
            sort_scored(&mut scored);
        }

        scored.truncate(k);

        // Access tracking on the emitted set.
        let mut selected = Vec::with_capacity(scored.len());
        for (hit, recency, final_score) in scored {
            let mut metadata = hit.metadata.clone();
            metadata.lineage.access_count += 1;
            metadata.lineage.last_accessed = Some(now);
            store.store(&hit.id, &hit.content, metadata)?;

            selected.push(RetrievedMemory {
                id: hit.id,
                content: hit.content,
                similarity: hit.score,
                recency,
                final_score,
            });
        }

        tracing::info!(
            count = selected.len(),
            variants = queries.len(),
            domain = domain.unwrap_or(""),
            "memory retrieval"
        );
        Ok(selected)
    }
}

fn sort_scored(scored: &mut [(SearchHit, f64, f64)]) {
    scored.sort_by(|a, b| {
        b.2.partial_cmp(&a.2)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.id.cmp(&b.0.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::fragment::{MemoryMetadata, Source, Utility};
    use crate::memory::store::LexicalStore;
    use chrono::Duration;

    fn enhancer() -> Enhancer {
        Enhancer::new(RetrievalConfig::default())
    }

    #[test]
    fn keyword_variant_caps_and_preserves_order() {
        let msg = "please fix the authentication module in the server because the login flow keeps failing for returning users again and again repeatedly";
        let kw = keyword_variant(msg);
        let tokens: Vec<&str> = kw.split(' ').collect();
        assert!(tokens.len() <= 12);
        assert!(tokens.iter().all(|t| t.len() > 2));
        assert_eq!(tokens[0], "fix");
        // Order preserved.
        let auth_pos = tokens.iter().position(|t| *t == "authentication").unwrap();
        let login_pos = tokens.iter().position(|t| *t == "login").unwrap();
        assert!(auth_pos < login_pos);
    }

    #[test]
    fn expansion_has_no_duplicates_and_keyword_is_idempotent() {
        let variants = expand_query("fix the login bug", Some("bugfix"));
        let unique: BTreeSet<&String> = variants.iter().collect();
        assert_eq!(unique.len(), variants.len());

        // The keyword reduction is a fixpoint: reducing it again changes
        // nothing, so re-expansion cannot grow the merged candidate set.
        let kw = keyword_variant("fix the login bug");
        assert_eq!(keyword_variant(&kw), kw);
    }

    #[test]
    fn exempt_memories_pin_recency() {
        let now = Utc::now();
        let mut store = LexicalStore::in_memory();

        let mut old = MemoryMetadata::new(now - Duration::days(60));
        old.classification.utility = Utility::LoadBearing;
        store
            .store("lb", "deploy requires the staging checklist", old)
            .unwrap();

        let mut stale = MemoryMetadata::new(now - Duration::days(60));
        stale.classification.source = Source::AgentInferred;
        store
            .store("stale", "deploy checklist notes staging", stale)
            .unwrap();

        let e = enhancer();
        let out = e
            .retrieve(&mut store, "staging deploy checklist", None, &[], now)
            .unwrap();
        let lb = out.iter().find(|m| m.id == "lb").unwrap();
        let st = out.iter().find(|m| m.id == "stale").unwrap();
        assert!((lb.recency - 1.0).abs() < f64::EPSILON);
        assert!(st.recency < 1.0);
    }

    #[test]
    fn related_boost_displaces_tail() {
        // Mirrors the displacement scenario: F sits outside the top-5 until
        // A's related link boosts it past E.
        let now = Utc::now();
        let mut cfg = RetrievalConfig::default();
        cfg.decay_weight = 0.0; // isolate similarity + boost
        let e = Enhancer::new(cfg);

        let mut store = ScriptedStore::default();
        store.add("A", 0.90, &["F"]);
        store.add("B", 0.80, &[]);
        store.add("C", 0.70, &[]);
        store.add("D", 0.60, &[]);
        store.add("E", 0.55, &[]);
        store.add("F", 0.50, &[]);

        let out = e.retrieve(&mut store, "query", None, &[], now).unwrap();
        let ids: Vec<&str> = out.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C", "D", "F"]);
        let f = out.iter().find(|m| m.id == "F").unwrap();
        assert!((f.final_score - 0.58).abs() < 1e-9);
    }

    #[test]
    fn access_tracking_updates_store() {
        let now = Utc::now();
        let mut store = LexicalStore::in_memory();
        store
            .store(
                "m1",
                "remember the database password rotation schedule",
                MemoryMetadata::new(now),
            )
            .unwrap();

        let e = enhancer();
        e.retrieve(&mut store, "database rotation schedule", None, &[], now)
            .unwrap();

        let rec = store.get("m1").unwrap();
        assert_eq!(rec.metadata.lineage.access_count, 1);
        assert_eq!(rec.metadata.lineage.last_accessed, Some(now));
    }

    /// Store stub with fixed similarity scores, for rank-order tests.
    #[derive(Default)]
    struct ScriptedStore {
        hits: Vec<(String, f64, Vec<String>)>,
        records: std::collections::BTreeMap<String, MemoryMetadata>,
    }

    impl ScriptedStore {
        fn add(&mut self, id: &str, score: f64, related: &[&str]) {
            let mut meta = MemoryMetadata::new(Utc::now());
            meta.lineage.related_memory_ids = related.iter().map(|s| s.to_string()).collect();
            self.records.insert(id.to_string(), meta.clone());
            self.hits
                .push((id.to_string(), score, related.iter().map(|s| s.to_string()).collect()));
        }
    }

    impl VectorStore for ScriptedStore {
        fn store(
            &mut self,
            id: &str,
            _content: &str,
            metadata: MemoryMetadata,
        ) -> crate::memory::MemoryResult<()> {
            self.records.insert(id.to_string(), metadata);
            Ok(())
        }

        fn search(
            &self,
            _query: &str,
            k: usize,
            _area: Option<&str>,
        ) -> crate::memory::MemoryResult<Vec<SearchHit>> {
            Ok(self
                .hits
                .iter()
                .take(k)
                .map(|(id, score, _)| SearchHit {
                    id: id.clone(),
                    score: *score,
                    content: format!("content of {id}"),
                    metadata: self.records[id].clone(),
                })
                .collect())
        }

        fn delete(&mut self, _id: &str) -> crate::memory::MemoryResult<bool> {
            Ok(false)
        }

        fn iterate_all(&self) -> crate::memory::MemoryResult<Vec<super::super::store::StoredMemory>> {
            Ok(Vec::new())
        }
    }
}
