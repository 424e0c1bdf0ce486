//! Tool fallback and meta-reasoning gate.
//!
//! Two hook points surround every tool invocation the model makes:
//! - **before**: validate arguments against the tool's static schema and,
//!   when failure counters are high, surface recovery advice.
//! - **after**: classify the response message into an error kind, update the
//!   bounded failure ring and the per-tool consecutive counters.
//!
//! The gate's own bugs must never block tool execution: callers wrap both
//! hooks in the pipeline boundary and treat failures as passthrough.

pub mod advisor;
pub mod classify;
pub mod failure;
pub mod schema;

pub use classify::{classify_response, ErrorKind};
pub use failure::{FailureRecord, FailureTracker};
pub use schema::{SchemaRegistry, ToolSchema};

use std::collections::BTreeMap;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ToolGateConfig;

/// Response returned by a tool invocation. Classification reads only
/// `message`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolResponse {
    pub message: String,
    #[serde(default)]
    pub break_loop: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional: Option<BTreeMap<String, serde_json::Value>>,
}

impl ToolResponse {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            break_loop: false,
            additional: None,
        }
    }
}

/// Errors from the gate. Trapped at the pipeline boundary.
#[derive(Debug, Error, Diagnostic)]
pub enum GateError {
    #[error("unknown tool: \"{name}\"")]
    #[diagnostic(
        code(seshat::toolgate::unknown_tool),
        help("No schema is registered for this tool; the gate passes the call through unvalidated.")
    )]
    UnknownTool { name: String },

    #[error("missing required argument \"{argument}\" for tool \"{tool}\"")]
    #[diagnostic(
        code(seshat::toolgate::missing_argument),
        help("The argument has no alias, no default, and was not supplied.")
    )]
    MissingArgument { tool: String, argument: String },
}

pub type GateResult<T> = std::result::Result<T, GateError>;

/// Decision produced by the before-hook.
#[derive(Debug, Clone)]
pub enum GateDecision {
    /// Execute with the (alias-resolved, default-filled) arguments.
    Proceed { args: BTreeMap<String, String> },
    /// Skip execution; present this synthetic failure instead.
    Reject { synthetic: ToolResponse },
}

/// The gate: schema validation, advice, and failure accounting.
#[derive(Debug)]
pub struct ToolGate {
    config: ToolGateConfig,
    schemas: SchemaRegistry,
    tracker: FailureTracker,
}

impl ToolGate {
    pub fn new(config: ToolGateConfig, schemas: SchemaRegistry) -> Self {
        Self {
            config,
            schemas,
            tracker: FailureTracker::default(),
        }
    }

    pub fn tracker(&self) -> &FailureTracker {
        &self.tracker
    }

    /// Before-hook: validate arguments and collect advice for the model.
    ///
    /// Advice strings are additive context, anchored after the current user
    /// message. An unfixable argument mismatch becomes a synthetic `syntax`
    /// failure without executing the tool.
    pub fn before(
        &mut self,
        tool_name: &str,
        args: &BTreeMap<String, String>,
        turn: u64,
    ) -> (GateDecision, Vec<String>) {
        if !self.config.enabled {
            return (GateDecision::Proceed { args: args.clone() }, Vec::new());
        }

        let advice = advisor::advise(&self.tracker, tool_name, &self.config);

        let decision = match self.schemas.validate(tool_name, args) {
            Ok(resolved) => GateDecision::Proceed { args: resolved },
            Err(e @ GateError::MissingArgument { .. }) => {
                let message = format!("syntax error: {e}");
                self.tracker.record_failure(
                    tool_name,
                    ErrorKind::Syntax,
                    &message,
                    turn,
                    self.config.max_history,
                );
                GateDecision::Reject {
                    synthetic: ToolResponse::text(message),
                }
            }
            // No schema registered: pass through unvalidated.
            Err(GateError::UnknownTool { .. }) => GateDecision::Proceed { args: args.clone() },
        };

        (decision, advice)
    }

    /// After-hook: classify the response, update counters. Returns the
    /// classified error kind (`None` on success).
    pub fn after(&mut self, tool_name: &str, response: &ToolResponse, turn: u64) -> Option<ErrorKind> {
        if !self.config.enabled {
            return None;
        }
        match classify_response(&response.message) {
            None => {
                self.tracker.record_success(tool_name);
                None
            }
            Some(kind) => {
                self.tracker.record_failure(
                    tool_name,
                    kind,
                    &response.message,
                    turn,
                    self.config.max_history,
                );
                tracing::warn!(tool = tool_name, kind = ?kind, "tool failure recorded");
                Some(kind)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> ToolGate {
        let mut schemas = SchemaRegistry::default();
        schemas.register(
            ToolSchema::new("code_execution_tool")
                .required("runtime")
                .required("code")
                .alias("language", "runtime")
                .default("session", "0"),
        );
        ToolGate::new(ToolGateConfig::default(), schemas)
    }

    fn args(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn alias_and_default_resolution() {
        let mut g = gate();
        let (decision, _) = g.before(
            "code_execution_tool",
            &args(&[("language", "python"), ("code", "print(1)")]),
            1,
        );
        match decision {
            GateDecision::Proceed { args } => {
                assert_eq!(args.get("runtime").map(String::as_str), Some("python"));
                assert!(!args.contains_key("language"));
                assert_eq!(args.get("session").map(String::as_str), Some("0"));
            }
            other => panic!("expected proceed, got {other:?}"),
        }
    }

    #[test]
    fn unfixable_args_become_synthetic_syntax_failure() {
        let mut g = gate();
        let (decision, _) = g.before("code_execution_tool", &args(&[("code", "x")]), 1);
        match decision {
            GateDecision::Reject { synthetic } => {
                assert!(synthetic.message.contains("syntax error"));
            }
            other => panic!("expected reject, got {other:?}"),
        }
        assert_eq!(g.tracker().consecutive("code_execution_tool"), 1);
    }

    #[test]
    fn success_resets_consecutive_counter() {
        let mut g = gate();
        for turn in 0..3 {
            g.after(
                "code_execution_tool",
                &ToolResponse::text("Error: permission denied"),
                turn,
            );
        }
        assert_eq!(g.tracker().consecutive("code_execution_tool"), 3);

        g.after("code_execution_tool", &ToolResponse::text("done: 42"), 3);
        assert_eq!(g.tracker().consecutive("code_execution_tool"), 0);
        // History is not cleared by success.
        assert_eq!(g.tracker().total_failures(), 3);
    }

    #[test]
    fn advice_fires_at_threshold() {
        let mut g = gate();
        g.after(
            "code_execution_tool",
            &ToolResponse::text("permission denied: /etc"),
            1,
        );
        let (_, advice) = g.before("code_execution_tool", &args(&[("runtime", "python"), ("code", "x")]), 2);
        assert!(advice.is_empty());

        g.after(
            "code_execution_tool",
            &ToolResponse::text("permission denied: /etc"),
            2,
        );
        let (_, advice) = g.before("code_execution_tool", &args(&[("runtime", "python"), ("code", "x")]), 3);
        assert_eq!(advice.len(), 1);
        assert!(advice[0].contains("Permission denied"));
    }

    #[test]
    fn unknown_tool_passes_through() {
        let mut g = gate();
        let (decision, _) = g.before("mystery_tool", &args(&[("a", "b")]), 1);
        assert!(matches!(decision, GateDecision::Proceed { .. }));
    }
}
