//! Configuration surface for every subsystem.
//!
//! Each subsystem reads its own section; every section carries an `enabled`
//! flag and a disabled component degrades to passthrough. Missing or corrupt
//! config files fall back to the documented defaults.

use serde::{Deserialize, Serialize};

use crate::jsonio;
use crate::paths::StateRoot;

// ---------------------------------------------------------------------------
// Memory classification config (memory/classification_config.json)
// ---------------------------------------------------------------------------

/// Retrieval-time memory enhancement parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub enabled: bool,
    /// Similarity queries issued per query variant (default: 8).
    pub k_per_variant: usize,
    /// Decay half-life in hours (default: 168 = one week).
    pub half_life_hours: f64,
    /// Blend weight of recency against similarity (default: 0.15).
    pub decay_weight: f64,
    /// Floor for the recency component (default: 0.1).
    pub min_recency_score: f64,
    /// Score bonus for memories related to a selected memory (default: 0.08).
    pub related_boost: f64,
    /// Memories injected into the model context (default: 5).
    pub max_injected: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            k_per_variant: 8,
            half_life_hours: 168.0,
            decay_weight: 0.15,
            min_recency_score: 0.1,
            related_boost: 0.08,
            max_injected: 5,
        }
    }
}

/// Deduplication parameters for the maintenance pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub enabled: bool,
    /// Similarity above which a pair is a duplicate candidate (default: 0.90).
    pub similarity_threshold: f64,
    /// Pairs resolved per maintenance cycle (default: 20).
    pub max_pairs_per_cycle: usize,
    /// Whether both-agent-inferred pairs auto-deprecate the older (default: true).
    pub auto_deprecate_agent_inferred: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: 0.90,
            max_pairs_per_cycle: 20,
            auto_deprecate_agent_inferred: true,
        }
    }
}

/// Related-memory linking parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelatedConfig {
    pub enabled: bool,
    /// Shared tags required to cross-link a pair (default: 3).
    pub tag_overlap_threshold: usize,
    /// Cap on related ids per memory (default: 10).
    pub max_related_per_memory: usize,
}

impl Default for RelatedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tag_overlap_threshold: 3,
            max_related_per_memory: 10,
        }
    }
}

/// Co-retrieval log bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoRetrievalConfig {
    /// FIFO bound on log entries (default: 500).
    pub max_entries: usize,
    /// Co-occurrence count that promotes a pair to cluster candidate (default: 5).
    pub cluster_threshold: usize,
}

impl Default for CoRetrievalConfig {
    fn default() -> Self {
        Self {
            max_entries: 500,
            cluster_threshold: 5,
        }
    }
}

/// Top-level memory classification config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    pub retrieval: RetrievalConfig,
    pub deduplication: DedupConfig,
    pub related_memories: RelatedConfig,
    pub co_retrieval: CoRetrievalConfig,
    /// Idle turns between maintenance passes (default: 25).
    pub maintenance_interval_loops: u64,
    /// Maintenance cycles of zero accesses before a memory is flagged
    /// dormant (default: 50).
    pub archival_threshold_cycles: u64,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            retrieval: RetrievalConfig::default(),
            deduplication: DedupConfig::default(),
            related_memories: RelatedConfig::default(),
            co_retrieval: CoRetrievalConfig::default(),
            maintenance_interval_loops: 25,
            archival_threshold_cycles: 50,
        }
    }
}

impl ClassificationConfig {
    pub fn load(root: &StateRoot) -> Self {
        jsonio::read_json(&root.classification_config()).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Ontology config (ontology/ontology_config.json)
// ---------------------------------------------------------------------------

/// Entity resolution thresholds and scoring weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    pub enabled: bool,
    /// Composite score at or above which candidates auto-merge (default: 0.85).
    pub merge_threshold: f64,
    /// Lower bound of the human-review band (default: 0.60).
    pub review_threshold: f64,
    pub scoring_weights: ScoringWeights,
    /// Whether union-find consolidates merge chains (default: true).
    pub transitive_closure: bool,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            merge_threshold: 0.85,
            review_threshold: 0.60,
            scoring_weights: ScoringWeights::default(),
            transitive_closure: true,
        }
    }
}

/// Weights of the five resolution scoring axes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub name: f64,
    pub identifier: f64,
    pub address: f64,
    pub date: f64,
    pub context: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            name: 0.35,
            identifier: 0.30,
            address: 0.15,
            date: 0.10,
            context: 0.10,
        }
    }
}

impl ScoringWeights {
    pub fn total(&self) -> f64 {
        self.name + self.identifier + self.address + self.date + self.context
    }
}

/// Relationship discovery parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    /// Source records required for a co_mentioned edge (default: 1).
    pub co_occurrence_min_sources: usize,
    /// Window for temporally_linked edges (default: 30 days).
    pub temporal_window_days: i64,
    /// Confidence below which stored edges are not returned (default: 0.3).
    pub min_confidence_to_surface: f64,
    /// Whether maintenance promotes related-memory links between ontology
    /// entities to typed relationships (default: true).
    pub promote_memory_links: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            co_occurrence_min_sources: 1,
            temporal_window_days: 30,
            min_confidence_to_surface: 0.3,
            promote_memory_links: true,
        }
    }
}

/// Ontology-aware retrieval extension parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OntologyQueryConfig {
    pub enabled: bool,
    pub entity_detection_in_messages: bool,
    pub auto_expand_relationships: bool,
    /// Cap on 1-hop neighbours injected (default: 10).
    pub max_connected_entities: usize,
}

impl Default for OntologyQueryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            entity_detection_in_messages: true,
            auto_expand_relationships: true,
            max_connected_entities: 10,
        }
    }
}

/// Top-level ontology config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OntologyConfig {
    pub enabled: bool,
    pub entity_resolution: ResolutionConfig,
    pub relationship_extraction: DiscoveryConfig,
    pub ontology_query: OntologyQueryConfig,
}

impl Default for OntologyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            entity_resolution: ResolutionConfig::default(),
            relationship_extraction: DiscoveryConfig::default(),
            ontology_query: OntologyQueryConfig::default(),
        }
    }
}

impl OntologyConfig {
    pub fn load(root: &StateRoot) -> Self {
        jsonio::read_json(&root.ontology_config()).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Pipeline-wide config
// ---------------------------------------------------------------------------

/// Tool gate thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolGateConfig {
    pub enabled: bool,
    /// Consecutive failures of one tool before advice fires (default: 2).
    pub tool_threshold: u32,
    /// Recent failures across all tools before step-back advice (default: 5).
    pub global_threshold: usize,
    /// Bound on the failure ring (default: 20).
    pub max_history: usize,
}

impl Default for ToolGateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tool_threshold: 2,
            global_threshold: 5,
            max_history: 20,
        }
    }
}

/// Supervisor anomaly scan parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub enabled: bool,
    /// Turns between repeated steering for the same anomaly (default: 3).
    pub cooldown_turns: u64,
    /// Context fill fraction that triggers wrap-up steering (default: 0.80).
    pub context_exhaustion_threshold: f64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_turns: 3,
            context_exhaustion_threshold: 0.80,
        }
    }
}

/// Context watchdog parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub enabled: bool,
    /// Assumed context window when the embedder does not report one
    /// (default: 100_000 tokens, sized for local models).
    pub context_window_tokens: u64,
    /// Fill fraction that logs a warning (default: 0.70).
    pub warn_threshold: f64,
    /// Fill fraction that logs critical (default: 0.85).
    pub critical_threshold: f64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            context_window_tokens: 100_000,
            warn_threshold: 0.70,
            critical_threshold: 0.85,
        }
    }
}

/// Aggregated configuration for one core instance.
#[derive(Debug, Clone, Default)]
pub struct CoreConfig {
    pub classification: ClassificationConfig,
    pub ontology: OntologyConfig,
    pub tool_gate: ToolGateConfig,
    pub supervisor: SupervisorConfig,
    pub watchdog: WatchdogConfig,
}

impl CoreConfig {
    /// Load every section from the state root, defaulting per-section.
    pub fn load(root: &StateRoot) -> Self {
        Self {
            classification: ClassificationConfig::load(root),
            ontology: OntologyConfig::load(root),
            tool_gate: ToolGateConfig::default(),
            supervisor: SupervisorConfig::default(),
            watchdog: WatchdogConfig::default(),
        }
    }
}
