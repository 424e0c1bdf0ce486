//! `CoreContext`: the process-wide mutable state carried through the turn
//! pipeline. No hidden singletons; everything a component reads or writes
//! across turns lives here.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::bst::BeliefState;
use crate::org::pace::PaceState;
use crate::org::profile::Role;
use crate::workflow::engine::Traversal;
use crate::workflow::graph::Event;

/// Recent user messages kept for history-backed slot resolvers.
const MAX_HISTORY: usize = 16;

/// Mutable cross-turn state owned by the pipeline.
#[derive(Debug, Default)]
pub struct CoreContext {
    /// Global turn counter; also the maintenance cycle counter.
    pub turn: u64,
    pub belief: Option<BeliefState>,
    /// Recent raw user messages, oldest first.
    pub history: Vec<String>,
    pub active_role: Option<Role>,
    pub prev_role_id: Option<String>,
    pub pace: PaceState,
    /// Per-role turn counters for the SALUTE emission interval.
    pub role_turns: BTreeMap<String, u64>,
    pub traversal: Option<Traversal>,
    /// Event log for the current turn; cleared at turn start.
    pub events: Vec<Event>,
    pub turns_since_progress: u64,
    pub unrecoverable_error: bool,
    pub task_started: Option<DateTime<Utc>>,
}

impl CoreContext {
    /// Advance to a new turn: bump counters, clear per-turn state, age the
    /// belief state.
    pub fn begin_turn(&mut self) {
        self.turn += 1;
        self.events.clear();
        if let Some(belief) = &mut self.belief {
            if !belief.tick() {
                self.belief = None;
            }
        }
    }

    pub fn push_history(&mut self, message: &str) {
        self.history.push(message.to_string());
        if self.history.len() > MAX_HISTORY {
            self.history.remove(0);
        }
    }

    /// Bump and return the active role's own turn counter.
    pub fn bump_role_turn(&mut self, role_id: &str) -> u64 {
        let counter = self.role_turns.entry(role_id.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    pub fn role_turn(&self, role_id: &str) -> u64 {
        self.role_turns.get(role_id).copied().unwrap_or(0)
    }

    /// The belief state's domain, if one is live.
    pub fn domain(&self) -> Option<&str> {
        self.belief.as_ref().map(|b| b.domain.as_str())
    }

    /// Record progress (or the lack of it) for stall detection.
    pub fn note_progress(&mut self, progressed: bool, now: DateTime<Utc>) {
        if progressed {
            self.turns_since_progress = 0;
            if self.task_started.is_none() {
                self.task_started = Some(now);
            }
        } else {
            self.turns_since_progress += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;

    #[test]
    fn belief_expires_on_tick() {
        let mut ctx = CoreContext::default();
        ctx.belief = Some(BeliefState {
            domain: "bugfix".to_string(),
            slots: Map::new(),
            confidence: 0.8,
            trigger_score: 0.4,
            created_turn: 1,
            ttl_remaining_turns: 1,
            clarifications_asked: 0,
        });
        ctx.begin_turn();
        assert!(ctx.belief.is_none());
    }

    #[test]
    fn history_is_bounded() {
        let mut ctx = CoreContext::default();
        for i in 0..40 {
            ctx.push_history(&format!("message {i}"));
        }
        assert_eq!(ctx.history.len(), MAX_HISTORY);
        assert_eq!(ctx.history[0], "message 24");
    }

    #[test]
    fn role_turns_are_independent() {
        let mut ctx = CoreContext::default();
        assert_eq!(ctx.bump_role_turn("scout"), 1);
        assert_eq!(ctx.bump_role_turn("scout"), 2);
        assert_eq!(ctx.bump_role_turn("lead"), 1);
        assert_eq!(ctx.role_turn("scout"), 2);
    }
}
