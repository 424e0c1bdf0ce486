//! The kernel proper: active-organization loading and role selection.

use std::time::SystemTime;

use super::profile::{Organization, Role};
use super::salute::StatusState;
use super::PaceLevel;
use crate::jsonio;
use crate::paths::StateRoot;

/// Loads the active organization (mtime-cached) and selects roles.
///
/// Absence of the sentinel means the org layer is inert: no role activates
/// and every downstream filter defaults to allow-all.
#[derive(Debug, Default)]
pub struct OrgKernel {
    cache: Option<(SystemTime, Organization)>,
}

impl OrgKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// The active organization, if the sentinel exists and parses.
    /// Re-reads only when the file's modification time changes.
    pub fn active_org(&mut self, root: &StateRoot) -> Option<Organization> {
        let path = root.active_org();
        let mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok()?;

        if let Some((cached_mtime, org)) = &self.cache {
            if *cached_mtime == mtime {
                return Some(org.clone());
            }
        }

        let org: Organization = jsonio::read_json(&path)?;
        self.cache = Some((mtime, org.clone()));
        Some(org)
    }

    /// Select the role for a classified domain.
    ///
    /// Candidates are hierarchy members whose capabilities include the
    /// domain; specialists beat executives beat commanders, ties break by
    /// role id. `conversational` and empty domains never activate a role.
    pub fn select_role(&self, root: &StateRoot, org: &Organization, domain: &str) -> Option<Role> {
        if domain.is_empty() || domain == crate::bst::taxonomy::CONVERSATIONAL {
            return None;
        }

        let mut candidates: Vec<Role> = org
            .hierarchy
            .keys()
            .filter_map(|role_id| self.load_role(root, role_id))
            .filter(|role| role.capabilities.domains.iter().any(|d| d == domain))
            .collect();

        candidates.sort_by(|a, b| {
            a.role_type
                .rank()
                .cmp(&b.role_type.rank())
                .then_with(|| a.role_id.cmp(&b.role_id))
        });
        candidates.into_iter().next()
    }

    /// Load one role profile. Missing or malformed profiles are skipped.
    pub fn load_role(&self, root: &StateRoot, role_id: &str) -> Option<Role> {
        jsonio::read_json(&root.role_profile(role_id))
    }
}

/// Derive the SALUTE activity state from PACE and workflow presence.
pub fn derive_state(
    pace: PaceLevel,
    workflow_active: bool,
    workflow_complete: bool,
    has_domain: bool,
) -> StatusState {
    if workflow_complete {
        return StatusState::Complete;
    }
    match pace {
        PaceLevel::Emergency => StatusState::Aborted,
        PaceLevel::Contingent => StatusState::Escalating,
        PaceLevel::Alternate => StatusState::ErrorRecovery,
        PaceLevel::Primary => {
            if workflow_active || has_domain {
                StatusState::Active
            } else {
                StatusState::Idle
            }
        }
    }
}
