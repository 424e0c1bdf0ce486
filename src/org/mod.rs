//! Organization kernel: role-based coordination over the turn pipeline.
//!
//! When an active organization sentinel exists, the kernel selects the role
//! matching the classified domain, applies its capability filter to the
//! workflow engine, evaluates PACE from failure and progress signals, and
//! emits SALUTE status records. Without a sentinel the whole layer is inert
//! and every downstream filter defaults to allow-all.

pub mod kernel;
pub mod pace;
pub mod profile;
pub mod salute;

pub use kernel::OrgKernel;
pub use pace::{AgentSignals, PaceLevel, PaceState, PaceTransition};
pub use profile::{
    Capabilities, Doctrine, Organization, OrgMode, PacePlan, PaceTier, PaceTrigger, Role, RoleType,
};
pub use salute::{SaluteReport, SaluteWriter, StatusState};

use miette::Diagnostic;
use thiserror::Error;

/// Errors from the org layer. Trapped at the pipeline boundary: any failure
/// degrades to "no role active".
#[derive(Debug, Error, Diagnostic)]
pub enum OrgError {
    #[error("role profile missing: {role_id}")]
    #[diagnostic(
        code(seshat::org::role_missing),
        help("The active organization references a role with no profile under organizations/roles/.")
    )]
    RoleMissing { role_id: String },

    #[error("salute write failed for role {role_id}")]
    #[diagnostic(
        code(seshat::org::salute_write),
        help("Check permissions on organizations/reports/ under the state root.")
    )]
    SaluteWrite {
        role_id: String,
        #[source]
        source: std::io::Error,
    },
}

pub type OrgResult<T> = std::result::Result<T, OrgError>;
