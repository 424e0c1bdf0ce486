//! The tracker proper: classification, slot filling, confidence, branching.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::resolve;
use super::taxonomy::{Domain, SlotTaxonomy, CONVERSATIONAL};
use super::BstResult;

/// Persisted cross-turn belief about the task in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeliefState {
    pub domain: String,
    /// Slot name → resolved value; unresolved required slots hold `None`.
    pub slots: BTreeMap<String, Option<String>>,
    pub confidence: f64,
    /// Trigger-match component, kept so clarification answers (which carry
    /// no triggers themselves) rescore against the original classification.
    #[serde(default)]
    pub trigger_score: f64,
    pub created_turn: u64,
    pub ttl_remaining_turns: u64,
    #[serde(default)]
    pub clarifications_asked: u32,
}

impl BeliefState {
    /// Decrement TTL at turn start. Returns whether the state survives.
    pub fn tick(&mut self) -> bool {
        self.ttl_remaining_turns = self.ttl_remaining_turns.saturating_sub(1);
        self.ttl_remaining_turns > 0
    }

    /// Whether a required slot is still awaiting an answer.
    pub fn awaiting_answer(&self) -> bool {
        self.clarifications_asked > 0 && self.slots.values().any(Option::is_none)
    }

    fn filled(&self) -> BTreeMap<String, String> {
        self.slots
            .iter()
            .filter_map(|(k, v)| v.clone().map(|v| (k.clone(), v)))
            .collect()
    }
}

/// What the tracker decided for this turn.
#[derive(Debug, Clone, PartialEq)]
pub enum BstAction {
    /// Replace the user message with the enriched composition.
    Enrich {
        message: String,
        domain: String,
        confidence: f64,
        filled_slots: Vec<String>,
    },
    /// Emit a clarifying question instead of doing task work.
    Clarify {
        question: String,
        missing_slot: String,
        domain: String,
    },
    /// Leave the message untouched.
    Passthrough,
}

/// Outcome of one tracker run: the action plus the belief state to persist
/// (`None` clears it).
#[derive(Debug)]
pub struct TrackerRun {
    pub action: BstAction,
    pub belief: Option<BeliefState>,
}

/// The belief state tracker. Stateless over the taxonomy; the belief state
/// itself lives on the core context and is passed in and out explicitly.
#[derive(Debug)]
pub struct Tracker {
    taxonomy: SlotTaxonomy,
}

impl Tracker {
    pub fn new(taxonomy: SlotTaxonomy) -> Self {
        Self { taxonomy }
    }

    pub fn taxonomy(&self) -> &SlotTaxonomy {
        &self.taxonomy
    }

    /// Process one user message.
    pub fn process(
        &self,
        message: &str,
        history: &[String],
        belief: Option<&BeliefState>,
        turn: u64,
    ) -> BstResult<TrackerRun> {
        let trimmed = message.trim();
        if trimmed.is_empty() {
            return Ok(TrackerRun {
                action: BstAction::Passthrough,
                belief: belief.cloned(),
            });
        }

        // Underspecified follow-ups reuse the live belief state wholesale.
        if self.is_underspecified(trimmed) {
            if let Some(prior) = belief.filter(|b| b.ttl_remaining_turns > 0) {
                return Ok(self.continue_task(trimmed, prior));
            }
        }

        let (domain_name, trigger_score) = self.classify(trimmed);

        if domain_name == CONVERSATIONAL {
            // A message with no triggers while a clarification is pending is
            // the answer to that clarification, not a domain change.
            if let Some(prior) = belief.filter(|b| b.ttl_remaining_turns > 0 && b.awaiting_answer())
            {
                if let Some(domain) = self.taxonomy.domain(&prior.domain) {
                    return Ok(self.rescore(domain, trimmed, history, Some(prior), prior.trigger_score, turn));
                }
            }
            // Explicit domain change clears any lingering belief.
            return Ok(TrackerRun {
                action: BstAction::Passthrough,
                belief: None,
            });
        }

        let domain = self
            .taxonomy
            .domain(&domain_name)
            .expect("classify returns taxonomy domains");
        let prior_same_domain = belief.filter(|b| b.domain == domain_name);
        Ok(self.rescore(domain, trimmed, history, prior_same_domain, trigger_score, turn))
    }

    /// Fill slots from the message, overlay any prior fills, score, branch.
    fn rescore(
        &self,
        domain: &Domain,
        message: &str,
        history: &[String],
        prior: Option<&BeliefState>,
        trigger_score: f64,
        turn: u64,
    ) -> TrackerRun {
        let clarifications_asked = prior.map(|b| b.clarifications_asked).unwrap_or(0);

        let (mut slots, _) = self.fill_slots(domain, message, history);
        if let Some(prior) = prior {
            for (name, value) in &prior.slots {
                let keep_prior = value.is_some()
                    && slots.get(name).map_or(true, |fresh| fresh.is_none());
                if keep_prior {
                    slots.insert(name.clone(), value.clone());
                }
            }
        }

        // Recompute what is still missing against the merged slot map.
        let resolved: BTreeMap<String, String> = slots
            .iter()
            .filter_map(|(k, v)| v.clone().map(|v| (k.clone(), v)))
            .collect();
        let mut missing_required = Vec::new();
        for name in &domain.required_slots {
            let def = domain.slot_definitions.get(name).cloned().unwrap_or_default();
            let unfilled = slots.get(name).map_or(true, Option::is_none);
            if unfilled && !def.nullable && def.required_given(&resolved) {
                missing_required.push(name.clone());
            }
        }

        let total_required = domain.required_slots.len();
        let fill_rate = if total_required == 0 {
            1.0
        } else {
            (total_required - missing_required.len()) as f64 / total_required as f64
        };
        let confidence = 0.4 * trigger_score + 0.6 * fill_rate;

        let mut next_belief = BeliefState {
            domain: domain.name.clone(),
            slots,
            confidence,
            trigger_score,
            created_turn: turn,
            ttl_remaining_turns: self.taxonomy.global.belief_state_ttl_turns,
            clarifications_asked,
        };

        if confidence >= domain.confidence_threshold {
            let filled = next_belief.filled();
            let enriched = enrich_message(message, domain, &filled);
            let filled_slots: Vec<String> = filled.keys().cloned().collect();
            tracing::info!(
                domain = %domain.name,
                confidence = format!("{confidence:.2}").as_str(),
                slots = ?filled_slots,
                "bst enriched"
            );
            return TrackerRun {
                action: BstAction::Enrich {
                    message: enriched,
                    domain: domain.name.clone(),
                    confidence,
                    filled_slots,
                },
                belief: Some(next_belief),
            };
        }

        if let Some(missing) = missing_required.first() {
            if clarifications_asked < self.taxonomy.global.max_clarification_questions {
                let def = domain.slot_definitions.get(missing).cloned().unwrap_or_default();
                next_belief.clarifications_asked = clarifications_asked + 1;
                tracing::info!(domain = %domain.name, slot = %missing, "bst clarify");
                return TrackerRun {
                    action: BstAction::Clarify {
                        question: def.clarifying_question(missing),
                        missing_slot: missing.clone(),
                        domain: domain.name.clone(),
                    },
                    belief: Some(next_belief),
                };
            }
        }

        TrackerRun {
            action: BstAction::Passthrough,
            belief: Some(next_belief),
        }
    }

    // ── Classification ──────────────────────────────────────────────────

    /// Score every domain by trigger matches; ties break toward the earlier
    /// domain in the taxonomy. Returns `(domain, score in [0, 1])`.
    fn classify(&self, message: &str) -> (String, f64) {
        let lower = message.to_lowercase();
        let min_len = self.taxonomy.global.min_trigger_word_length;

        let mut best: Option<(&Domain, f64)> = None;
        for domain in &self.taxonomy.domains {
            if domain.name == CONVERSATIONAL {
                continue;
            }
            let matched: Vec<&String> = domain
                .triggers
                .iter()
                .filter(|t| t.len() >= min_len && lower.contains(t.to_lowercase().as_str()))
                .collect();
            if matched.is_empty() {
                continue;
            }
            // Longer trigger phrases weigh extra.
            let word_weight: usize = matched.iter().map(|t| t.split_whitespace().count()).sum();
            let raw = matched.len() as f64 + word_weight as f64 * 0.1;
            match best {
                Some((_, best_raw)) if best_raw >= raw => {}
                _ => best = Some((domain, raw)),
            }
        }

        match best {
            Some((domain, raw)) => {
                let confidence = (raw / (raw + 1.0).max(3.0)).min(1.0);
                (domain.name.clone(), confidence)
            }
            None => (CONVERSATIONAL.to_string(), 1.0),
        }
    }

    // ── Slot filling ────────────────────────────────────────────────────

    /// Resolve required then optional slots. Returns the slot map and the
    /// names of required slots that stayed unfilled.
    fn fill_slots(
        &self,
        domain: &Domain,
        message: &str,
        history: &[String],
    ) -> (BTreeMap<String, Option<String>>, Vec<String>) {
        let globals = &self.taxonomy.global;
        let mut slots: BTreeMap<String, Option<String>> = BTreeMap::new();
        let mut resolved: BTreeMap<String, String> = BTreeMap::new();
        let mut missing = Vec::new();

        for name in &domain.required_slots {
            let def = domain.slot_definitions.get(name).cloned().unwrap_or_default();
            let value = resolve::resolve_slot(name, &def, message, history, globals);

            if value.is_none() && !def.required_given(&resolved) {
                // Conditionally required and the condition does not hold.
                continue;
            }
            if let Some(v) = &value {
                resolved.insert(name.clone(), v.clone());
            } else if !def.nullable {
                missing.push(name.clone());
            }
            slots.insert(name.clone(), value);
        }

        for name in &domain.optional_slots {
            let def = domain.slot_definitions.get(name).cloned().unwrap_or_default();
            if let Some(v) = resolve::resolve_slot(name, &def, message, history, globals) {
                resolved.insert(name.clone(), v.clone());
                slots.insert(name.clone(), Some(v));
            }
        }

        (slots, missing)
    }

    // ── Underspecified handling ─────────────────────────────────────────

    fn is_underspecified(&self, message: &str) -> bool {
        let lower = message.to_lowercase();
        let words: Vec<&str> = lower.split_whitespace().collect();
        if words.len() <= 5
            && self
                .taxonomy
                .global
                .ambiguous_pronouns
                .iter()
                .any(|p| words.contains(&p.as_str()))
        {
            return true;
        }
        self.taxonomy
            .global
            .underspec_phrases
            .iter()
            .any(|ph| lower.contains(ph.as_str()))
    }

    /// Re-attach the persisted context to a continuation message.
    fn continue_task(&self, message: &str, prior: &BeliefState) -> TrackerRun {
        let Some(domain) = self.taxonomy.domain(&prior.domain) else {
            return TrackerRun {
                action: BstAction::Passthrough,
                belief: None,
            };
        };

        let filled = prior.filled();
        let mut sections = vec![format!("[CONTINUING TASK — Domain: {}]", prior.domain)];
        if !filled.is_empty() {
            let lines: Vec<String> = filled.iter().map(|(k, v)| format!("  {k}: {v}")).collect();
            sections.push(format!("[PRIOR CONTEXT]\n{}", lines.join("\n")));
        }
        if !domain.preamble.is_empty() {
            sections.push(format!("[INSTRUCTION]\n{}", domain.preamble));
        }
        sections.push(format!("[USER MESSAGE]\n{message}"));

        TrackerRun {
            action: BstAction::Enrich {
                message: sections.join("\n\n"),
                domain: prior.domain.clone(),
                confidence: prior.confidence,
                filled_slots: filled.keys().cloned().collect(),
            },
            belief: Some(prior.clone()),
        }
    }
}

/// Compose the enriched message: `[TASK CONTEXT]`, `[INSTRUCTION]`,
/// `[USER MESSAGE]` (verbatim), in that order.
fn enrich_message(original: &str, domain: &Domain, filled: &BTreeMap<String, String>) -> String {
    let mut sections = Vec::new();
    if !filled.is_empty() {
        let lines: Vec<String> = filled.iter().map(|(k, v)| format!("  {k}: {v}")).collect();
        sections.push(format!("[TASK CONTEXT]\n{}", lines.join("\n")));
    }
    if !domain.preamble.is_empty() {
        sections.push(format!("[INSTRUCTION]\n{}", domain.preamble));
    }
    sections.push(format!("[USER MESSAGE]\n{original}"));
    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bst::taxonomy::{ResolverKind, SlotDef, TaxonomyGlobals};

    fn refactor_taxonomy() -> SlotTaxonomy {
        let mut slot_definitions = BTreeMap::new();
        slot_definitions.insert(
            "target_file".to_string(),
            SlotDef {
                resolvers: vec![
                    ResolverKind::LastMentionedFile,
                    ResolverKind::LastMentionedPath,
                ],
                question: Some("Which file?".to_string()),
                ..Default::default()
            },
        );
        SlotTaxonomy {
            global: TaxonomyGlobals::default(),
            domains: vec![Domain {
                name: "refactor".to_string(),
                description: "code restructuring".to_string(),
                triggers: vec!["refactor".to_string(), "clean up".to_string()],
                required_slots: vec!["target_file".to_string()],
                optional_slots: vec![],
                slot_definitions,
                confidence_threshold: 0.7,
                preamble: "Refactor carefully. Preserve behavior.".to_string(),
            }],
        }
    }

    #[test]
    fn clarifies_then_accepts_bare_answer() {
        let tracker = Tracker::new(refactor_taxonomy());

        // Turn 1: trigger matches, no file mentioned anywhere.
        let run = tracker
            .process("refactor the auth module", &[], None, 1)
            .unwrap();
        match &run.action {
            BstAction::Clarify {
                question,
                missing_slot,
                domain,
            } => {
                assert_eq!(question, "Which file?");
                assert_eq!(missing_slot, "target_file");
                assert_eq!(domain, "refactor");
            }
            other => panic!("expected clarify, got {other:?}"),
        }
        let belief = run.belief.unwrap();
        assert_eq!(belief.domain, "refactor");
        assert_eq!(belief.slots.get("target_file"), Some(&None));
        assert_eq!(belief.ttl_remaining_turns, 6);
        assert_eq!(belief.clarifications_asked, 1);
        assert!(belief.awaiting_answer());

        // Turn 2: the user answers with just the file path.
        let history = vec!["refactor the auth module".to_string()];
        let run = tracker
            .process("agent/auth.py", &history, Some(&belief), 2)
            .unwrap();
        match &run.action {
            BstAction::Enrich {
                message, domain, ..
            } => {
                assert_eq!(domain, "refactor");
                assert!(message.contains("[TASK CONTEXT]\n  target_file: agent/auth.py"));
                assert!(message.contains("[INSTRUCTION]\nRefactor carefully."));
                assert!(message.ends_with("[USER MESSAGE]\nagent/auth.py"));
            }
            other => panic!("expected enrich, got {other:?}"),
        }
    }

    #[test]
    fn conversational_clears_belief() {
        let tracker = Tracker::new(refactor_taxonomy());
        let prior = BeliefState {
            domain: "refactor".to_string(),
            slots: BTreeMap::new(),
            confidence: 0.9,
            trigger_score: 0.4,
            created_turn: 1,
            ttl_remaining_turns: 4,
            clarifications_asked: 0,
        };
        let run = tracker
            .process("thanks, looks great", &[], Some(&prior), 2)
            .unwrap();
        assert_eq!(run.action, BstAction::Passthrough);
        assert!(run.belief.is_none());
    }

    #[test]
    fn underspecified_continues_prior_task() {
        let tracker = Tracker::new(refactor_taxonomy());
        let mut slots = BTreeMap::new();
        slots.insert("target_file".to_string(), Some("agent/auth.py".to_string()));
        let prior = BeliefState {
            domain: "refactor".to_string(),
            slots,
            confidence: 0.85,
            trigger_score: 0.4,
            created_turn: 1,
            ttl_remaining_turns: 5,
            clarifications_asked: 0,
        };
        let run = tracker.process("fix it", &[], Some(&prior), 3).unwrap();
        match &run.action {
            BstAction::Enrich { message, .. } => {
                assert!(message.starts_with("[CONTINUING TASK — Domain: refactor]"));
                assert!(message.contains("target_file: agent/auth.py"));
            }
            other => panic!("expected continuation enrich, got {other:?}"),
        }
    }

    #[test]
    fn clarification_budget_is_bounded() {
        let tracker = Tracker::new(refactor_taxonomy());
        let mut belief: Option<BeliefState> = None;
        let mut clarifies = 0;
        for turn in 1..=4 {
            let run = tracker
                .process("refactor the auth module", &[], belief.as_ref(), turn)
                .unwrap();
            if matches!(run.action, BstAction::Clarify { .. }) {
                clarifies += 1;
            }
            belief = run.belief;
        }
        assert_eq!(clarifies, 2);
    }

    #[test]
    fn ttl_ticks_down() {
        let mut b = BeliefState {
            domain: "refactor".to_string(),
            slots: BTreeMap::new(),
            confidence: 0.8,
            trigger_score: 0.4,
            created_turn: 1,
            ttl_remaining_turns: 2,
            clarifications_asked: 0,
        };
        assert!(b.tick());
        assert!(!b.tick());
    }
}
