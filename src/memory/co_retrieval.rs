//! Co-retrieval log: which memories were emitted together, and which pairs
//! co-occur often enough to be cluster candidates.
//!
//! The turn pipeline appends; the maintenance pass reads and promotes.
//! The entry list is a bounded FIFO; cluster candidates are observations
//! only, never consolidated automatically.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::fragment::MemoryId;
use super::{MemoryError, MemoryResult};
use crate::jsonio;

/// One retrieval event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoRetrievalEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub domain: Option<String>,
    pub memory_ids: Vec<MemoryId>,
    /// Maintenance cycle counter at the time of retrieval.
    pub cycle: u64,
}

/// A pair of memories observed retrieved together often.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterCandidate {
    /// Exactly two ids, sorted.
    pub memory_ids: Vec<MemoryId>,
    pub co_retrieval_count: usize,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// The persisted log document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoRetrievalLog {
    pub entries: Vec<CoRetrievalEntry>,
    pub cluster_candidates: Vec<ClusterCandidate>,
}

impl CoRetrievalLog {
    /// Append an event, evicting oldest entries past `max_entries`.
    pub fn record(
        &mut self,
        now: DateTime<Utc>,
        domain: Option<&str>,
        memory_ids: &[MemoryId],
        cycle: u64,
        max_entries: usize,
    ) {
        if memory_ids.is_empty() {
            return;
        }
        self.entries.push(CoRetrievalEntry {
            timestamp: now,
            domain: domain.map(str::to_string),
            memory_ids: memory_ids.to_vec(),
            cycle,
        });
        if self.entries.len() > max_entries {
            let excess = self.entries.len() - max_entries;
            self.entries.drain(..excess);
        }
    }

    /// Count co-occurrences of every sorted id pair across all entries.
    pub fn pair_counts(&self) -> BTreeMap<(MemoryId, MemoryId), PairStats> {
        let mut counts: BTreeMap<(MemoryId, MemoryId), PairStats> = BTreeMap::new();
        for entry in &self.entries {
            let mut ids: Vec<&MemoryId> = entry.memory_ids.iter().collect();
            ids.sort();
            ids.dedup();
            for i in 0..ids.len() {
                for j in (i + 1)..ids.len() {
                    let key = (ids[i].clone(), ids[j].clone());
                    let stats = counts.entry(key).or_insert(PairStats {
                        count: 0,
                        first_seen: entry.timestamp,
                        last_seen: entry.timestamp,
                    });
                    stats.count += 1;
                    stats.last_seen = entry.timestamp;
                }
            }
        }
        counts
    }

    /// Promote pairs past `cluster_threshold` to cluster candidates and
    /// refresh counts on existing candidates. Returns newly added count.
    pub fn detect_clusters(&mut self, cluster_threshold: usize) -> usize {
        let counts = self.pair_counts();

        // Refresh existing candidates first.
        for cand in &mut self.cluster_candidates {
            if cand.memory_ids.len() != 2 {
                continue;
            }
            let key = (cand.memory_ids[0].clone(), cand.memory_ids[1].clone());
            if let Some(stats) = counts.get(&key) {
                cand.co_retrieval_count = stats.count;
                cand.last_seen = stats.last_seen;
            }
        }

        let existing: std::collections::BTreeSet<(MemoryId, MemoryId)> = self
            .cluster_candidates
            .iter()
            .filter(|c| c.memory_ids.len() == 2)
            .map(|c| (c.memory_ids[0].clone(), c.memory_ids[1].clone()))
            .collect();

        let mut added = 0;
        for (pair, stats) in counts {
            if stats.count >= cluster_threshold && !existing.contains(&pair) {
                self.cluster_candidates.push(ClusterCandidate {
                    memory_ids: vec![pair.0, pair.1],
                    co_retrieval_count: stats.count,
                    first_seen: stats.first_seen,
                    last_seen: stats.last_seen,
                });
                added += 1;
            }
        }
        added
    }
}

/// Aggregate stats for one id pair.
#[derive(Debug, Clone, Copy)]
pub struct PairStats {
    pub count: usize,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// File-backed handle over the log.
#[derive(Debug)]
pub struct CoRetrievalFile {
    path: PathBuf,
}

impl CoRetrievalFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> CoRetrievalLog {
        jsonio::read_json(&self.path).unwrap_or_default()
    }

    pub fn save(&self, log: &CoRetrievalLog) -> MemoryResult<()> {
        jsonio::write_json(&self.path, log).map_err(|e| MemoryError::IndexIo {
            path: self.path.display().to_string(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[&str]) -> Vec<MemoryId> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn fifo_eviction() {
        let mut log = CoRetrievalLog::default();
        let now = Utc::now();
        for i in 0..10 {
            log.record(now, None, &ids(&[&format!("m{i}"), "x"]), 0, 5);
        }
        assert_eq!(log.entries.len(), 5);
        assert_eq!(log.entries[0].memory_ids[0], "m5");
    }

    #[test]
    fn cluster_promotion_at_threshold() {
        let mut log = CoRetrievalLog::default();
        let now = Utc::now();
        for _ in 0..5 {
            log.record(now, Some("bugfix"), &ids(&["a", "b"]), 0, 100);
        }
        log.record(now, None, &ids(&["a", "c"]), 0, 100);

        let added = log.detect_clusters(5);
        assert_eq!(added, 1);
        assert_eq!(log.cluster_candidates[0].memory_ids, ids(&["a", "b"]));
        assert_eq!(log.cluster_candidates[0].co_retrieval_count, 5);

        // Second detection with no new entries adds nothing.
        assert_eq!(log.detect_clusters(5), 0);
    }

    #[test]
    fn single_id_entries_ignored() {
        let mut log = CoRetrievalLog::default();
        log.record(Utc::now(), None, &ids(&["solo"]), 0, 100);
        assert!(log.pair_counts().is_empty());
    }
}
