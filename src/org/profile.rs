//! Organization and role profiles: the JSON documents under
//! `organizations/` that describe the hierarchy, capabilities, PACE plans,
//! and doctrine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Position of a role in the hierarchy. Selection prefers the most
/// specialized role that can handle a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleType {
    Commander,
    Executive,
    Specialist,
}

impl RoleType {
    /// Selection rank: lower is preferred.
    pub fn rank(&self) -> u8 {
        match self {
            RoleType::Specialist => 0,
            RoleType::Executive => 1,
            RoleType::Commander => 2,
        }
    }
}

/// What a role is allowed to touch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    /// Domains this role handles; drives role selection.
    pub domains: Vec<String>,
    /// Workflow whitelist. Empty means all workflows are allowed.
    pub workflows: Vec<String>,
    pub tools_primary: Vec<String>,
    pub tools_secondary: Vec<String>,
}

/// Structured PACE trigger predicate, evaluated against agent signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaceTrigger {
    /// Never fires; the usual primary-tier trigger.
    Never,
    ConsecutiveFailuresAtLeast { count: u32 },
    TurnsWithoutProgressOver { turns: u64 },
    ContextFillOver { fraction: f64 },
    UnrecoverableError,
    AnyOf { triggers: Vec<PaceTrigger> },
}

impl Default for PaceTrigger {
    fn default() -> Self {
        PaceTrigger::Never
    }
}

/// One tier of a PACE plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PaceTier {
    pub trigger: PaceTrigger,
    /// What the agent should do at this tier; surfaced by the supervisor.
    pub action: String,
    pub escalate_to: Option<String>,
}

/// Four-tier failure-response plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PacePlan {
    pub primary: PaceTier,
    pub alternate: PaceTier,
    pub contingent: PaceTier,
    pub emergency: PaceTier,
}

impl PacePlan {
    /// A conventional plan keyed off consecutive failures and progress.
    pub fn standard() -> Self {
        Self {
            primary: PaceTier::default(),
            alternate: PaceTier {
                trigger: PaceTrigger::ConsecutiveFailuresAtLeast { count: 3 },
                action: "Retry with an alternative method.".to_string(),
                escalate_to: None,
            },
            contingent: PaceTier {
                trigger: PaceTrigger::AnyOf {
                    triggers: vec![
                        PaceTrigger::ConsecutiveFailuresAtLeast { count: 5 },
                        PaceTrigger::TurnsWithoutProgressOver { turns: 12 },
                    ],
                },
                action: "Escalate to the supervising role and wait for direction.".to_string(),
                escalate_to: None,
            },
            emergency: PaceTier {
                trigger: PaceTrigger::AnyOf {
                    triggers: vec![
                        PaceTrigger::ConsecutiveFailuresAtLeast { count: 8 },
                        PaceTrigger::UnrecoverableError,
                    ],
                },
                action: "Abort the task and report state.".to_string(),
                escalate_to: None,
            },
        }
    }
}

/// Per-role operating doctrine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Doctrine {
    /// Turns between periodic SALUTE emissions (default: 5).
    pub salute_interval_turns: u64,
    /// Stall threshold consumed by PACE and the supervisor (default: 12).
    pub max_turns_without_progress: u64,
    /// Retries a role may attempt before escalating (default: 3).
    pub autonomous_retry_limit: u32,
}

impl Default for Doctrine {
    fn default() -> Self {
        Self {
            salute_interval_turns: 5,
            max_turns_without_progress: 12,
            autonomous_retry_limit: 3,
        }
    }
}

/// A role profile document (`organizations/roles/<role_id>.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub role_id: String,
    #[serde(default)]
    pub role_name: String,
    pub role_type: RoleType,
    /// 1 = commander tier, 3 = specialist tier.
    #[serde(default = "default_authority")]
    pub authority_level: u8,
    #[serde(default)]
    pub reports_to: Option<String>,
    #[serde(default)]
    pub can_delegate: bool,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub pace_plan: PacePlan,
    #[serde(default)]
    pub doctrine: Doctrine,
}

fn default_authority() -> u8 {
    3
}

impl Role {
    /// Whether the role's workflow whitelist admits this workflow id.
    /// An empty whitelist admits everything.
    pub fn allows_workflow(&self, workflow_id: &str) -> bool {
        self.capabilities.workflows.is_empty()
            || self.capabilities.workflows.iter().any(|w| w == workflow_id)
    }
}

/// Single-process or multi-process deployment of the same hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrgMode {
    Microcosm,
    Macrocosm,
}

/// A node of the hierarchy map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchyNode {
    pub subordinates: Vec<String>,
}

/// An organization document; `organizations/active.json` is the sentinel
/// naming the one currently in force.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub org_id: String,
    #[serde(default)]
    pub mission: String,
    /// role_id → subordinates.
    #[serde(default)]
    pub hierarchy: BTreeMap<String, HierarchyNode>,
    #[serde(default)]
    pub communication_channels: Vec<String>,
    #[serde(default = "default_mode")]
    pub mode: OrgMode,
}

fn default_mode() -> OrgMode {
    OrgMode::Microcosm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_type_rank_prefers_specialists() {
        assert!(RoleType::Specialist.rank() < RoleType::Executive.rank());
        assert!(RoleType::Executive.rank() < RoleType::Commander.rank());
    }

    #[test]
    fn empty_whitelist_allows_all() {
        let role = Role {
            role_id: "r".into(),
            role_name: String::new(),
            role_type: RoleType::Specialist,
            authority_level: 3,
            reports_to: None,
            can_delegate: false,
            capabilities: Capabilities::default(),
            requirements: vec![],
            pace_plan: PacePlan::default(),
            doctrine: Doctrine::default(),
        };
        assert!(role.allows_workflow("anything"));
    }

    #[test]
    fn trigger_json_shape() {
        let t: PaceTrigger = serde_json::from_str(
            r#"{"kind": "consecutive_failures_at_least", "count": 3}"#,
        )
        .unwrap();
        assert_eq!(t, PaceTrigger::ConsecutiveFailuresAtLeast { count: 3 });
    }
}
