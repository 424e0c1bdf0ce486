//! Slot taxonomy: the data-driven description of domains, triggers, and
//! slots. Adding a domain is a JSON edit, never a code change.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::jsonio;
use crate::paths::StateRoot;

/// Sentinel domain that always passes through.
pub const CONVERSATIONAL: &str = "conversational";

/// Global knobs shared by every domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxonomyGlobals {
    /// Turns a belief state survives without reinforcement (default: 6).
    pub belief_state_ttl_turns: u64,
    /// Clarifying questions allowed per belief state (default: 2).
    pub max_clarification_questions: u32,
    /// Triggers shorter than this are ignored (default: 3).
    pub min_trigger_word_length: usize,
    /// Pronouns that mark a short message as underspecified.
    pub ambiguous_pronouns: Vec<String>,
    /// Continuation phrases that reuse the live belief state.
    pub underspec_phrases: Vec<String>,
    /// Extension → language map for the file-extension resolver.
    pub file_extensions: BTreeMap<String, String>,
}

impl Default for TaxonomyGlobals {
    fn default() -> Self {
        Self {
            belief_state_ttl_turns: 6,
            max_clarification_questions: 2,
            min_trigger_word_length: 3,
            ambiguous_pronouns: ["it", "that", "this", "them", "those", "these"]
                .map(str::to_string)
                .to_vec(),
            underspec_phrases: [
                "do that again",
                "try again",
                "same as before",
                "fix it",
                "keep going",
                "continue",
                "once more",
            ]
            .map(str::to_string)
            .to_vec(),
            file_extensions: [
                (".rs", "rust"),
                (".py", "python"),
                (".js", "javascript"),
                (".ts", "typescript"),
                (".go", "go"),
                (".sh", "shell"),
                (".sql", "sql"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        }
    }
}

/// Slot value type hint used by the context-inference resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotType {
    #[default]
    String,
    Bool,
    Enum,
}

/// Resolvers, tried in chain order; the first non-null value wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverKind {
    KeywordMap,
    FileExtensionInference,
    LastMentionedFile,
    LastMentionedPath,
    LastMentionedEntity,
    HistoryScan,
    ContextInference,
}

/// Definition of a single slot within a domain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotDef {
    pub resolvers: Vec<ResolverKind>,
    /// Keyword → value table for the keyword-map resolver.
    pub keyword_map: BTreeMap<String, String>,
    #[serde(rename = "type")]
    pub slot_type: SlotType,
    pub enum_values: Vec<String>,
    /// A nullable slot never triggers clarification.
    pub nullable: bool,
    /// Question asked when the slot stays unfilled.
    pub question: Option<String>,
    /// Fallback value after the resolver chain.
    pub default: Option<String>,
    /// Slot is required only when another slot holds one of these values.
    pub required_when: Option<BTreeMap<String, Vec<String>>>,
}

impl SlotDef {
    /// Whether this slot is required given the values resolved so far.
    pub fn required_given(&self, resolved: &BTreeMap<String, String>) -> bool {
        match &self.required_when {
            None => true,
            Some(conditions) => conditions
                .iter()
                .any(|(slot, values)| resolved.get(slot).is_some_and(|v| values.contains(v))),
        }
    }

    /// The clarifying question, with a generated fallback.
    pub fn clarifying_question(&self, slot_name: &str) -> String {
        self.question.clone().unwrap_or_else(|| {
            format!(
                "Could you clarify: what is the {}?",
                slot_name.replace('_', " ")
            )
        })
    }
}

/// A task domain: triggers, slots, threshold, preamble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Ordered trigger keywords and phrases.
    #[serde(default)]
    pub triggers: Vec<String>,
    #[serde(default)]
    pub required_slots: Vec<String>,
    #[serde(default)]
    pub optional_slots: Vec<String>,
    #[serde(default)]
    pub slot_definitions: BTreeMap<String, SlotDef>,
    /// Confidence required before enrichment (default: 0.7).
    #[serde(default = "default_threshold")]
    pub confidence_threshold: f64,
    /// Instruction block injected on enrichment.
    #[serde(default)]
    pub preamble: String,
}

fn default_threshold() -> f64 {
    0.7
}

/// The full taxonomy document. Domain order matters: classification ties
/// break toward the earlier domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotTaxonomy {
    pub global: TaxonomyGlobals,
    pub domains: Vec<Domain>,
}

impl Default for SlotTaxonomy {
    fn default() -> Self {
        Self {
            global: TaxonomyGlobals::default(),
            domains: Vec::new(),
        }
    }
}

impl SlotTaxonomy {
    /// Load from the state root; missing or malformed files yield the empty
    /// taxonomy (every message classifies conversational).
    pub fn load(root: &StateRoot) -> Self {
        jsonio::read_json(&root.slot_taxonomy()).unwrap_or_default()
    }

    pub fn domain(&self, name: &str) -> Option<&Domain> {
        self.domains.iter().find(|d| d.name == name)
    }
}
