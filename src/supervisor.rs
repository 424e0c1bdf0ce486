//! Post-turn supervision: anomaly scan with cooldown-gated steering, plus
//! the context watchdog that tracks window fill.
//!
//! Steering messages are additive context for the next turn; they never
//! replace the workflow's current-node instruction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::{SupervisorConfig, WatchdogConfig};
use crate::org::pace::PaceLevel;
use crate::toolgate::failure::FailureTracker;

/// Anomaly classes the supervisor watches for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anomaly {
    Stall,
    Loop,
    ContextExhaustion,
    CascadeFailure,
    PaceEscalation,
}

/// Same-tool-same-kind repetitions that count as a loop.
const LOOP_REPETITIONS: usize = 3;
/// Distinct failing tools in the recent ring that count as a cascade.
const CASCADE_DISTINCT_TOOLS: usize = 3;

/// One steering injection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Steering {
    pub anomaly: Anomaly,
    pub message: String,
}

/// Signals the scan reads, gathered at end of turn.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanInput<'a> {
    pub turn: u64,
    pub turns_since_progress: u64,
    /// Stall threshold from the active role's doctrine (default: 12).
    pub max_turns_without_progress: u64,
    pub context_fill_pct: f64,
    pub pace: Option<PaceLevel>,
    /// The active PACE tier's action text, for role-specific steering.
    pub pace_action: Option<&'a str>,
}

/// The supervisor: anomaly table plus per-anomaly cooldown state.
#[derive(Debug)]
pub struct Supervisor {
    config: SupervisorConfig,
    last_fired: BTreeMap<Anomaly, u64>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            last_fired: BTreeMap::new(),
        }
    }

    /// Scan agent state; returns steering messages for the next turn.
    pub fn scan(&mut self, input: ScanInput<'_>, tracker: &FailureTracker) -> Vec<Steering> {
        if !self.config.enabled {
            return Vec::new();
        }
        let mut steering = Vec::new();

        let stall_threshold = if input.max_turns_without_progress > 0 {
            input.max_turns_without_progress
        } else {
            12
        };
        if input.turns_since_progress > stall_threshold {
            self.fire(Anomaly::Stall, input.turn, &mut steering, || {
                format!(
                    "No progress for {} turns. Step back and reassess the approach: restate \
                     the goal, list what has been tried, and pick a different next action.",
                    input.turns_since_progress
                )
            });
        }

        if let Some((tool, kind)) = tracker.repeated_failure(LOOP_REPETITIONS) {
            self.fire(Anomaly::Loop, input.turn, &mut steering, || {
                format!(
                    "Tool \"{tool}\" keeps failing with {kind:?} errors. Stop repeating the \
                     same call; try a different method or tool."
                )
            });
        }

        if input.context_fill_pct > self.config.context_exhaustion_threshold {
            self.fire(Anomaly::ContextExhaustion, input.turn, &mut steering, || {
                format!(
                    "Context window is {:.0}% full. Wrap up the current task: summarize \
                     progress and finish the most important remaining step.",
                    input.context_fill_pct * 100.0
                )
            });
        }

        if tracker.recent_distinct_tools(usize::MAX) >= CASCADE_DISTINCT_TOOLS {
            self.fire(Anomaly::CascadeFailure, input.turn, &mut steering, || {
                "Several different tools are failing. Verify the environment before \
                 continuing: working directory, permissions, network, and service health."
                    .to_string()
            });
        }

        if matches!(input.pace, Some(PaceLevel::Contingent | PaceLevel::Emergency)) {
            let action = input.pace_action.unwrap_or(
                "Escalate to the supervising role: report current state and wait for direction.",
            );
            let action = action.to_string();
            self.fire(Anomaly::PaceEscalation, input.turn, &mut steering, || {
                format!("PACE is at an escalated tier. {action}")
            });
        }

        for s in &steering {
            tracing::warn!(anomaly = ?s.anomaly, "supervisor steering injected");
        }
        steering
    }

    fn fire(
        &mut self,
        anomaly: Anomaly,
        turn: u64,
        out: &mut Vec<Steering>,
        message: impl FnOnce() -> String,
    ) {
        if let Some(last) = self.last_fired.get(&anomaly) {
            if turn.saturating_sub(*last) < self.config.cooldown_turns {
                return;
            }
        }
        self.last_fired.insert(anomaly, turn);
        out.push(Steering {
            anomaly,
            message: message(),
        });
    }
}

// ---------------------------------------------------------------------------
// Context watchdog
// ---------------------------------------------------------------------------

/// Tracks context window fill and estimates remaining turns from the
/// rolling mean of per-turn token growth.
#[derive(Debug)]
pub struct ContextWatchdog {
    config: WatchdogConfig,
    last_total: Option<u64>,
    /// Recent per-turn token deltas.
    deltas: Vec<u64>,
    fill_pct: f64,
    tokens_used: u64,
}

/// Samples kept for the turns-remaining estimate.
const MAX_DELTA_SAMPLES: usize = 20;

impl ContextWatchdog {
    pub fn new(config: WatchdogConfig) -> Self {
        Self {
            config,
            last_total: None,
            deltas: Vec::new(),
            fill_pct: 0.0,
            tokens_used: 0,
        }
    }

    /// Record the assembled prompt's token count for this turn.
    pub fn observe(&mut self, total_tokens: u64) {
        if !self.config.enabled {
            return;
        }
        self.tokens_used = total_tokens;
        self.fill_pct = total_tokens as f64 / self.config.context_window_tokens.max(1) as f64;

        if let Some(last) = self.last_total {
            if total_tokens > last {
                self.deltas.push(total_tokens - last);
                if self.deltas.len() > MAX_DELTA_SAMPLES {
                    self.deltas.remove(0);
                }
            }
        }
        self.last_total = Some(total_tokens);

        if self.fill_pct >= self.config.critical_threshold {
            tracing::warn!(
                tokens = total_tokens,
                fill = format!("{:.0}%", self.fill_pct * 100.0).as_str(),
                "context critical"
            );
        } else if self.fill_pct >= self.config.warn_threshold {
            tracing::warn!(
                tokens = total_tokens,
                fill = format!("{:.0}%", self.fill_pct * 100.0).as_str(),
                "context filling"
            );
        }
    }

    pub fn fill_pct(&self) -> f64 {
        self.fill_pct
    }

    pub fn tokens_used(&self) -> u64 {
        self.tokens_used
    }

    pub fn tokens_max(&self) -> u64 {
        self.config.context_window_tokens
    }

    /// Estimated turns until the window fills; `None` until at least two
    /// growth samples exist.
    pub fn turns_remaining(&self) -> Option<u32> {
        if self.deltas.len() < 2 {
            return None;
        }
        let mean = self.deltas.iter().sum::<u64>() as f64 / self.deltas.len() as f64;
        if mean <= 0.0 {
            return None;
        }
        let remaining = self
            .config
            .context_window_tokens
            .saturating_sub(self.tokens_used) as f64;
        Some((remaining / mean).floor() as u32)
    }
}
