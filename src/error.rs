//! Crate-level errors and the component boundary type.
//!
//! Subsystems carry their own error enums; the turn pipeline never lets any
//! of them propagate. Every component invocation is wrapped in [`Outcome`],
//! which collapses "disabled", "precondition absent", and "trapped error"
//! into the same neutral result so the pipeline degrades to passthrough.

use miette::Diagnostic;
use thiserror::Error;

/// Errors surfaced by the core outside the per-turn pipeline (setup, direct
/// API use). Inside the pipeline these are trapped at component boundaries.
#[derive(Debug, Error, Diagnostic)]
pub enum CoreError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Paths(#[from] crate::paths::PathError),

    #[error("state file read failed: {path}")]
    #[diagnostic(
        code(seshat::core::state_read),
        help("Check that the state root exists and the file is readable JSON.")
    )]
    StateRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("state file write failed: {path}")]
    #[diagnostic(
        code(seshat::core::state_write),
        help("Check directory permissions under the state root.")
    )]
    StateWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed state file: {path} — {message}")]
    #[diagnostic(
        code(seshat::core::state_parse),
        help("The file is not valid JSON for its schema. Fix or delete it; the core falls back to defaults.")
    )]
    StateParse { path: String, message: String },
}

/// Convenience alias for core-level operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Result of running one pipeline component behind its boundary.
///
/// `Skipped` and `Failed` are treated identically by the caller (no effect
/// applied); they are distinguished only for logging. With every component
/// skipped or failed, the pipeline is an identity function over the user
/// message.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// The component ran and produced an effect.
    Applied(T),
    /// The component was disabled or its preconditions were absent.
    Skipped(&'static str),
    /// The component errored; the error was trapped and logged.
    Failed(String),
}

impl<T> Outcome<T> {
    /// The applied value, if any.
    pub fn applied(self) -> Option<T> {
        match self {
            Outcome::Applied(v) => Some(v),
            _ => None,
        }
    }

    /// Whether the component produced an effect.
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied(_))
    }

    /// Whether the component trapped an error.
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

/// Run a fallible component body behind a boundary: errors become
/// [`Outcome::Failed`] with a warning log line, never a panic or propagation.
pub fn boundary<T, E: std::fmt::Display>(
    component: &'static str,
    result: std::result::Result<T, E>,
) -> Outcome<T> {
    match result {
        Ok(v) => Outcome::Applied(v),
        Err(e) => {
            tracing::warn!(component, error = %e, "component error, passthrough");
            Outcome::Failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_traps_errors() {
        let ok: Result<u32, String> = Ok(7);
        assert_eq!(boundary("test", ok), Outcome::Applied(7));

        let err: Result<u32, String> = Err("broken".into());
        let out = boundary("test", err);
        assert!(out.is_failed());
        assert_eq!(out.applied(), None);
    }
}
