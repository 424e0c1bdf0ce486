//! PACE evaluation: four-tier failure response with hysteretic recovery.
//!
//! The current tier is the highest whose trigger holds. Escalation is
//! immediate; recovery to a lower tier requires two consecutive turns in
//! which no higher tier's trigger holds, so a flapping signal cannot bounce
//! the level down mid-streak.

use serde::{Deserialize, Serialize};

use super::profile::{Doctrine, PacePlan, PaceTrigger};

/// The four PACE tiers, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaceLevel {
    Primary,
    Alternate,
    Contingent,
    Emergency,
}

impl PaceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaceLevel::Primary => "primary",
            PaceLevel::Alternate => "alternate",
            PaceLevel::Contingent => "contingent",
            PaceLevel::Emergency => "emergency",
        }
    }

    /// One tier more severe, saturating at emergency.
    pub fn escalated(&self) -> PaceLevel {
        match self {
            PaceLevel::Primary => PaceLevel::Alternate,
            PaceLevel::Alternate => PaceLevel::Contingent,
            _ => PaceLevel::Emergency,
        }
    }
}

/// Signals the triggers evaluate against, gathered once per turn.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentSignals {
    pub consecutive_tool_failures: u32,
    pub turns_since_progress: u64,
    pub context_fill_pct: f64,
    pub unrecoverable_error: bool,
}

impl PaceTrigger {
    /// Whether this trigger currently holds.
    pub fn holds(&self, signals: &AgentSignals) -> bool {
        match self {
            PaceTrigger::Never => false,
            PaceTrigger::ConsecutiveFailuresAtLeast { count } => {
                signals.consecutive_tool_failures >= *count
            }
            PaceTrigger::TurnsWithoutProgressOver { turns } => {
                signals.turns_since_progress > *turns
            }
            PaceTrigger::ContextFillOver { fraction } => signals.context_fill_pct > *fraction,
            PaceTrigger::UnrecoverableError => signals.unrecoverable_error,
            PaceTrigger::AnyOf { triggers } => triggers.iter().any(|t| t.holds(signals)),
        }
    }
}

/// A logged tier change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaceTransition {
    pub from: PaceLevel,
    pub to: PaceLevel,
}

impl PaceTransition {
    pub fn escalated(&self) -> bool {
        self.to > self.from
    }
}

/// Per-role PACE state with recovery hysteresis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaceState {
    level: PaceLevelField,
    /// Consecutive turns in which no tier above the target held.
    clean_turns: u8,
}

// Serialized as the bare level; clean_turns is operational detail.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
struct PaceLevelField(PaceLevel);

impl Default for PaceLevelField {
    fn default() -> Self {
        PaceLevelField(PaceLevel::Primary)
    }
}

/// Turns of quiet required before stepping down a tier.
const RECOVERY_TURNS: u8 = 2;

impl PaceState {
    pub fn level(&self) -> PaceLevel {
        self.level.0
    }

    /// Force a tier, bypassing triggers. Used by workflow `escalate` nodes
    /// and turn-level timeouts. Returns the transition if the level changed.
    pub fn force(&mut self, to: PaceLevel) -> Option<PaceTransition> {
        let from = self.level.0;
        if to == from {
            return None;
        }
        self.level = PaceLevelField(to);
        self.clean_turns = 0;
        Some(PaceTransition { from, to })
    }

    /// Evaluate the plan's triggers for this turn.
    ///
    /// The target tier is the highest whose trigger holds; emergency also
    /// fires when the stall exceeds 1.5× the doctrine threshold. Escalation
    /// applies immediately; de-escalation waits for [`RECOVERY_TURNS`]
    /// consecutive quiet turns.
    pub fn evaluate(
        &mut self,
        plan: &PacePlan,
        doctrine: &Doctrine,
        signals: &AgentSignals,
    ) -> Option<PaceTransition> {
        let hard_stall =
            signals.turns_since_progress as f64 > doctrine.max_turns_without_progress as f64 * 1.5;

        let target = if plan.emergency.trigger.holds(signals) || hard_stall {
            PaceLevel::Emergency
        } else if plan.contingent.trigger.holds(signals) {
            PaceLevel::Contingent
        } else if plan.alternate.trigger.holds(signals) {
            PaceLevel::Alternate
        } else {
            PaceLevel::Primary
        };

        let current = self.level.0;
        if target > current {
            self.level = PaceLevelField(target);
            self.clean_turns = 0;
            let transition = PaceTransition {
                from: current,
                to: target,
            };
            tracing::warn!(from = current.as_str(), to = target.as_str(), "pace escalated");
            return Some(transition);
        }

        if target < current {
            self.clean_turns += 1;
            if self.clean_turns >= RECOVERY_TURNS {
                self.level = PaceLevelField(target);
                self.clean_turns = 0;
                let transition = PaceTransition {
                    from: current,
                    to: target,
                };
                tracing::info!(from = current.as_str(), to = target.as_str(), "pace restored");
                return Some(transition);
            }
            return None;
        }

        self.clean_turns = 0;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> PacePlan {
        PacePlan::standard()
    }

    fn signals(failures: u32) -> AgentSignals {
        AgentSignals {
            consecutive_tool_failures: failures,
            ..Default::default()
        }
    }

    #[test]
    fn escalates_immediately_at_trigger() {
        let mut state = PaceState::default();
        let doctrine = Doctrine::default();

        assert!(state.evaluate(&plan(), &doctrine, &signals(2)).is_none());
        let t = state.evaluate(&plan(), &doctrine, &signals(3)).unwrap();
        assert_eq!(t.from, PaceLevel::Primary);
        assert_eq!(t.to, PaceLevel::Alternate);
        assert!(t.escalated());
    }

    #[test]
    fn recovery_requires_two_clean_turns() {
        let mut state = PaceState::default();
        let doctrine = Doctrine::default();
        state.evaluate(&plan(), &doctrine, &signals(3)).unwrap();

        // First clean turn: still alternate.
        assert!(state.evaluate(&plan(), &doctrine, &signals(0)).is_none());
        assert_eq!(state.level(), PaceLevel::Alternate);

        // Second clean turn: restored.
        let t = state.evaluate(&plan(), &doctrine, &signals(0)).unwrap();
        assert_eq!(t.to, PaceLevel::Primary);
        assert!(!t.escalated());
    }

    #[test]
    fn flapping_resets_recovery_counter() {
        let mut state = PaceState::default();
        let doctrine = Doctrine::default();
        state.evaluate(&plan(), &doctrine, &signals(3)).unwrap();

        assert!(state.evaluate(&plan(), &doctrine, &signals(0)).is_none());
        // Trigger holds again: counter resets, level never decreased.
        assert!(state.evaluate(&plan(), &doctrine, &signals(3)).is_none());
        assert!(state.evaluate(&plan(), &doctrine, &signals(0)).is_none());
        assert_eq!(state.level(), PaceLevel::Alternate);
    }

    #[test]
    fn hard_stall_forces_emergency() {
        let mut state = PaceState::default();
        let doctrine = Doctrine::default();
        let s = AgentSignals {
            turns_since_progress: 19, // > 12 * 1.5
            ..Default::default()
        };
        let t = state.evaluate(&plan(), &doctrine, &s).unwrap();
        assert_eq!(t.to, PaceLevel::Emergency);
    }

    #[test]
    fn unrecoverable_error_is_emergency() {
        let mut state = PaceState::default();
        let doctrine = Doctrine::default();
        let s = AgentSignals {
            unrecoverable_error: true,
            ..Default::default()
        };
        assert_eq!(
            state.evaluate(&plan(), &doctrine, &s).unwrap().to,
            PaceLevel::Emergency
        );
    }
}
