//! Memory fragment metadata: classification axes and lineage.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identifier of a memory in the store.
pub type MemoryId = String;

/// Area label reserved for ontology entities.
pub const ONTOLOGY_AREA: &str = "ontology";

/// How trustworthy a memory's content is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Validity {
    Confirmed,
    UserAsserted,
    AgentInferred,
    Deprecated,
}

/// Whether a memory is currently in play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relevance {
    Active,
    Background,
    Dormant,
}

/// How important a memory is to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Utility {
    LoadBearing,
    Tactical,
    Trivial,
}

/// Where a memory came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    UserAsserted,
    ExternalRetrieved,
    AgentInferred,
}

/// Classification axes on a memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub validity: Validity,
    pub relevance: Relevance,
    pub utility: Utility,
    pub source: Source,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Coarse partition label; "ontology" is reserved for entities.
    #[serde(default = "default_area")]
    pub area: String,
}

fn default_area() -> String {
    "default".to_string()
}

impl Default for Classification {
    fn default() -> Self {
        Self {
            validity: Validity::AgentInferred,
            relevance: Relevance::Active,
            utility: Utility::Tactical,
            source: Source::AgentInferred,
            tags: BTreeSet::new(),
            area: default_area(),
        }
    }
}

/// Lineage and access bookkeeping on a memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lineage {
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_accessed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub access_count: u64,
    /// Ids this record replaced (set by deduplication on the winner).
    #[serde(default)]
    pub supersedes: Vec<MemoryId>,
    /// Newer record that replaces this one (set on the loser).
    #[serde(default)]
    pub superseded_by: Option<MemoryId>,
    /// Bounded set of cross-linked memories, maintained by the linking pass.
    #[serde(default)]
    pub related_memory_ids: Vec<MemoryId>,
    /// Domain the belief state held when this memory was written.
    #[serde(default)]
    pub domain: Option<String>,
    /// Maintenance cycle at which the memory was first classified.
    #[serde(default)]
    pub classified_at_cycle: u64,
    /// Set by the dormancy check; never auto-reclassified.
    #[serde(default)]
    pub dormancy_candidate: bool,
    #[serde(default)]
    pub deprecated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deprecated_reason: Option<String>,
}

impl Lineage {
    /// Fresh lineage stamped at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            last_accessed: None,
            access_count: 0,
            supersedes: Vec::new(),
            superseded_by: None,
            related_memory_ids: Vec::new(),
            domain: None,
            classified_at_cycle: 0,
            dormancy_candidate: false,
            deprecated_at: None,
            deprecated_reason: None,
        }
    }

    /// Reference instant for decay: last access, else creation.
    pub fn decay_reference(&self) -> DateTime<Utc> {
        self.last_accessed.unwrap_or(self.created_at)
    }
}

/// Full metadata block stored alongside a memory's content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryMetadata {
    pub classification: Classification,
    pub lineage: Lineage,
    /// Present only on ontology entity memories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ontology: Option<crate::ontology::entity::OntologyMeta>,
}

impl MemoryMetadata {
    /// Default metadata stamped at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            classification: Classification::default(),
            lineage: Lineage::new(now),
            ontology: None,
        }
    }

    /// Whether retrieval must treat this memory as always fresh.
    ///
    /// Load-bearing, user-asserted, and confirmed memories are exempt from
    /// temporal decay: their recency component is pinned to 1.0.
    pub fn decay_exempt(&self) -> bool {
        self.classification.utility == Utility::LoadBearing
            || self.classification.source == Source::UserAsserted
            || self.classification.validity == Validity::Confirmed
    }

    /// Whether the memory is out of play for retrieval.
    pub fn retrievable(&self) -> bool {
        self.classification.validity != Validity::Deprecated
    }

    /// Tag set used by the related-memory linking pass: classification axis
    /// values, explicit tags, domain, and area.
    pub fn link_tags(&self) -> BTreeSet<String> {
        let mut tags = BTreeSet::new();
        let c = &self.classification;
        tags.insert(format!("validity:{}", axis_str(&c.validity)));
        tags.insert(format!("relevance:{}", relevance_str(&c.relevance)));
        tags.insert(format!("utility:{}", utility_str(&c.utility)));
        tags.insert(format!("source:{}", source_str(&c.source)));
        tags.extend(c.tags.iter().cloned());
        if let Some(domain) = &self.lineage.domain {
            tags.insert(format!("domain:{domain}"));
        }
        tags.insert(format!("area:{}", c.area));
        tags
    }
}

fn axis_str(v: &Validity) -> &'static str {
    match v {
        Validity::Confirmed => "confirmed",
        Validity::UserAsserted => "user_asserted",
        Validity::AgentInferred => "agent_inferred",
        Validity::Deprecated => "deprecated",
    }
}

fn relevance_str(r: &Relevance) -> &'static str {
    match r {
        Relevance::Active => "active",
        Relevance::Background => "background",
        Relevance::Dormant => "dormant",
    }
}

fn utility_str(u: &Utility) -> &'static str {
    match u {
        Utility::LoadBearing => "load_bearing",
        Utility::Tactical => "tactical",
        Utility::Trivial => "trivial",
    }
}

fn source_str(s: &Source) -> &'static str {
    match s {
        Source::UserAsserted => "user_asserted",
        Source::ExternalRetrieved => "external_retrieved",
        Source::AgentInferred => "agent_inferred",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> MemoryMetadata {
        MemoryMetadata::new(Utc::now())
    }

    #[test]
    fn decay_exemptions() {
        let mut m = meta();
        assert!(!m.decay_exempt());

        m.classification.utility = Utility::LoadBearing;
        assert!(m.decay_exempt());

        let mut m = meta();
        m.classification.source = Source::UserAsserted;
        assert!(m.decay_exempt());

        let mut m = meta();
        m.classification.validity = Validity::Confirmed;
        assert!(m.decay_exempt());
    }

    #[test]
    fn decay_reference_falls_back_to_created() {
        let now = Utc::now();
        let mut m = meta();
        assert_eq!(m.lineage.decay_reference(), m.lineage.created_at);
        m.lineage.last_accessed = Some(now);
        assert_eq!(m.lineage.decay_reference(), now);
    }

    #[test]
    fn link_tags_cover_axes_and_domain() {
        let mut m = meta();
        m.lineage.domain = Some("bugfix".into());
        m.classification.tags.insert("auth".into());
        let tags = m.link_tags();
        assert!(tags.contains("validity:agent_inferred"));
        assert!(tags.contains("domain:bugfix"));
        assert!(tags.contains("auth"));
        assert!(tags.contains("area:default"));
    }
}
