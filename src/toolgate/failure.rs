//! Failure accounting: a bounded ring of recent failures across all tools
//! plus per-tool consecutive counters, reset atomically on success.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::classify::ErrorKind;

/// Preview length kept from a failing response message.
const PREVIEW_LEN: usize = 150;

/// One recorded tool failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub tool_name: String,
    pub error_kind: ErrorKind,
    pub message_preview: String,
    pub turn: u64,
}

/// Failure state consumed by the advisor, PACE evaluation, SALUTE, and the
/// supervisor. Counters are monotonic within a streak.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailureTracker {
    history: VecDeque<FailureRecord>,
    consecutive: BTreeMap<String, u32>,
    total: u64,
}

impl FailureTracker {
    /// Record a failure, trimming the ring past `max_history`.
    pub fn record_failure(
        &mut self,
        tool_name: &str,
        kind: ErrorKind,
        message: &str,
        turn: u64,
        max_history: usize,
    ) {
        let preview: String = message.chars().take(PREVIEW_LEN).collect();
        self.history.push_back(FailureRecord {
            tool_name: tool_name.to_string(),
            error_kind: kind,
            message_preview: preview,
            turn,
        });
        while self.history.len() > max_history {
            self.history.pop_front();
        }
        *self.consecutive.entry(tool_name.to_string()).or_insert(0) += 1;
        self.total += 1;
    }

    /// A success resets the tool's consecutive counter. The ring keeps its
    /// history.
    pub fn record_success(&mut self, tool_name: &str) {
        if let Some(count) = self.consecutive.get_mut(tool_name) {
            *count = 0;
        }
    }

    /// Consecutive failures of one tool.
    pub fn consecutive(&self, tool_name: &str) -> u32 {
        self.consecutive.get(tool_name).copied().unwrap_or(0)
    }

    /// Highest consecutive count across tools; PACE triggers read this.
    pub fn max_consecutive(&self) -> u32 {
        self.consecutive.values().copied().max().unwrap_or(0)
    }

    /// Failures recorded since process start (not bounded by the ring).
    pub fn total_failures(&self) -> u64 {
        self.total
    }

    /// The retained ring, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &FailureRecord> {
        self.history.iter()
    }

    /// Most recent failure of a given tool, if still in the ring.
    pub fn last_failure_of(&self, tool_name: &str) -> Option<&FailureRecord> {
        self.history.iter().rev().find(|r| r.tool_name == tool_name)
    }

    /// Number of ring entries within the last `window` records.
    pub fn recent_count(&self, window: usize) -> usize {
        self.history.len().min(window)
    }

    /// Distinct tools among the last `window` ring entries; the supervisor's
    /// cascade-failure signal.
    pub fn recent_distinct_tools(&self, window: usize) -> usize {
        self.history
            .iter()
            .rev()
            .take(window)
            .map(|r| r.tool_name.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Whether the same tool failed with the same kind at least `n` times in
    /// the recent ring; the supervisor's loop signal.
    pub fn repeated_failure(&self, n: usize) -> Option<(&str, ErrorKind)> {
        let mut counts: BTreeMap<(&str, ErrorKind), usize> = BTreeMap::new();
        for record in &self.history {
            let entry = counts
                .entry((record.tool_name.as_str(), record.error_kind))
                .or_insert(0);
            *entry += 1;
            if *entry >= n {
                return Some((record.tool_name.as_str(), record.error_kind));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_is_bounded() {
        let mut t = FailureTracker::default();
        for turn in 0..30 {
            t.record_failure("tool_a", ErrorKind::Execution, "boom", turn, 20);
        }
        assert_eq!(t.history().count(), 20);
        assert_eq!(t.total_failures(), 30);
        assert_eq!(t.consecutive("tool_a"), 30);
    }

    #[test]
    fn success_resets_only_that_tool() {
        let mut t = FailureTracker::default();
        t.record_failure("a", ErrorKind::Timeout, "x", 1, 20);
        t.record_failure("b", ErrorKind::Timeout, "x", 1, 20);
        t.record_success("a");
        assert_eq!(t.consecutive("a"), 0);
        assert_eq!(t.consecutive("b"), 1);
        assert_eq!(t.max_consecutive(), 1);
    }

    #[test]
    fn repeated_failure_detects_loops() {
        let mut t = FailureTracker::default();
        t.record_failure("a", ErrorKind::Permission, "x", 1, 20);
        t.record_failure("a", ErrorKind::Timeout, "x", 2, 20);
        t.record_failure("a", ErrorKind::Permission, "x", 3, 20);
        assert!(t.repeated_failure(3).is_none());
        t.record_failure("a", ErrorKind::Permission, "x", 4, 20);
        assert_eq!(t.repeated_failure(3), Some(("a", ErrorKind::Permission)));
    }

    #[test]
    fn distinct_tools_in_window() {
        let mut t = FailureTracker::default();
        for (i, tool) in ["a", "b", "c", "a"].iter().enumerate() {
            t.record_failure(tool, ErrorKind::Execution, "x", i as u64, 20);
        }
        assert_eq!(t.recent_distinct_tools(10), 3);
    }
}
