//! SALUTE reports: the fixed-schema status record emitted by the kernel.
//!
//! Two files per role: `<role_id>_latest.json` (last-writer-wins) and an
//! immutable timestamped archive copy. External observers read these files;
//! the core never pushes events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::pace::PaceLevel;
use super::{OrgError, OrgResult};
use crate::jsonio;
use crate::paths::StateRoot;

/// Coarse activity state reported in SALUTE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusState {
    Idle,
    Active,
    Waiting,
    ErrorRecovery,
    Escalating,
    Complete,
    Aborted,
}

/// Health rollup derived from PACE and failure counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Nominal,
    Degraded,
    Critical,
}

impl Health {
    /// Critical at contingent/emergency, degraded at alternate or any tool
    /// with two consecutive failures, else nominal.
    pub fn derive(pace: PaceLevel, max_consecutive_failures: u32) -> Self {
        match pace {
            PaceLevel::Contingent | PaceLevel::Emergency => Health::Critical,
            PaceLevel::Alternate => Health::Degraded,
            PaceLevel::Primary if max_consecutive_failures >= 2 => Health::Degraded,
            PaceLevel::Primary => Health::Nominal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    pub state: StatusState,
    /// Workflow progress in [0, 1].
    pub progress: f64,
    pub pace_level: PaceLevel,
    pub health: Health,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Activity {
    pub current_task: String,
    pub domain: String,
    pub workflow: String,
    pub step: usize,
    pub total_steps: usize,
    pub current_tool: String,
    pub iterations_on_step: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Location {
    pub cwd: String,
    pub files_modified: Vec<String>,
    pub files_read: Vec<String>,
    pub resources_claimed: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Unit {
    pub role_id: String,
    pub reports_to: String,
    pub organization: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeBlock {
    pub timestamp: DateTime<Utc>,
    pub task_started: Option<DateTime<Utc>>,
    pub elapsed_s: i64,
    pub turns_elapsed: u64,
    pub turns_since_progress: u64,
    /// `None` while the context watchdog has no per-turn estimate.
    pub context_turns_remaining: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Environment {
    pub model: String,
    pub context_fill_pct: f64,
    pub context_tokens_used: u64,
    pub context_tokens_max: u64,
    pub tool_failures_consecutive: u32,
    pub tool_failures_total: u64,
    pub memory_fragments_stored: u64,
}

/// The full report document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaluteReport {
    /// Schema marker for external observers.
    #[serde(rename = "_schema")]
    pub schema: String,
    pub status: Status,
    pub activity: Activity,
    pub location: Location,
    pub unit: Unit,
    pub time: TimeBlock,
    pub environment: Environment,
}

impl SaluteReport {
    pub const SCHEMA: &'static str = "orgkernel:salute_report/1";
}

/// Writes latest and archive copies under `organizations/reports/`.
#[derive(Debug, Clone)]
pub struct SaluteWriter {
    root: StateRoot,
}

impl SaluteWriter {
    pub fn new(root: StateRoot) -> Self {
        Self { root }
    }

    /// Overwrite the role's latest file and add an immutable archive copy.
    pub fn emit(&self, report: &SaluteReport) -> OrgResult<()> {
        let role_id = &report.unit.role_id;
        let latest = self.root.salute_latest(role_id);
        jsonio::write_json(&latest, report).map_err(|e| OrgError::SaluteWrite {
            role_id: role_id.clone(),
            source: e,
        })?;

        let stamp = report.time.timestamp.format("%Y%m%dT%H%M%S%.3fZ").to_string();
        let archive = self.root.salute_archive(role_id, &stamp);
        jsonio::write_json(&archive, report).map_err(|e| OrgError::SaluteWrite {
            role_id: role_id.clone(),
            source: e,
        })?;
        Ok(())
    }

    /// Best-effort cleanup of archive entries older than `ttl_seconds`.
    /// Not required for correctness; failures are ignored.
    pub fn cleanup_archive(&self, ttl_seconds: u64) {
        let Ok(entries) = std::fs::read_dir(self.root.reports_archive_dir()) else {
            return;
        };
        let cutoff = std::time::SystemTime::now()
            .checked_sub(std::time::Duration::from_secs(ttl_seconds));
        let Some(cutoff) = cutoff else { return };
        for entry in entries.flatten() {
            let stale = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(|mtime| mtime < cutoff)
                .unwrap_or(false);
            if stale {
                let _ = std::fs::remove_file(entry.path());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn report(role_id: &str, ts: DateTime<Utc>) -> SaluteReport {
        SaluteReport {
            schema: SaluteReport::SCHEMA.to_string(),
            status: Status {
                state: StatusState::Active,
                progress: 0.5,
                pace_level: PaceLevel::Primary,
                health: Health::Nominal,
            },
            activity: Activity::default(),
            location: Location::default(),
            unit: Unit {
                role_id: role_id.to_string(),
                reports_to: "lead".to_string(),
                organization: "software_dev".to_string(),
            },
            time: TimeBlock {
                timestamp: ts,
                task_started: None,
                elapsed_s: 0,
                turns_elapsed: 3,
                turns_since_progress: 0,
                context_turns_remaining: None,
            },
            environment: Environment::default(),
        }
    }

    #[test]
    fn emits_latest_and_archive() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = StateRoot::create(dir.path()).unwrap();
        let writer = SaluteWriter::new(root.clone());

        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        writer.emit(&report("scout", ts)).unwrap();

        assert!(root.salute_latest("scout").is_file());
        let archives: Vec<_> = std::fs::read_dir(root.reports_archive_dir())
            .unwrap()
            .flatten()
            .collect();
        assert_eq!(archives.len(), 1);
        assert!(archives[0]
            .file_name()
            .to_string_lossy()
            .starts_with("scout_20260301T120000"));
    }

    #[test]
    fn re_emission_is_idempotent_modulo_timestamp() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = StateRoot::create(dir.path()).unwrap();
        let writer = SaluteWriter::new(root.clone());
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

        writer.emit(&report("scout", ts)).unwrap();
        let first = std::fs::read_to_string(root.salute_latest("scout")).unwrap();
        writer.emit(&report("scout", ts)).unwrap();
        let second = std::fs::read_to_string(root.salute_latest("scout")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn health_rollup() {
        assert_eq!(Health::derive(PaceLevel::Primary, 0), Health::Nominal);
        assert_eq!(Health::derive(PaceLevel::Primary, 2), Health::Degraded);
        assert_eq!(Health::derive(PaceLevel::Alternate, 0), Health::Degraded);
        assert_eq!(Health::derive(PaceLevel::Emergency, 0), Health::Critical);
    }
}
