//! Workflow graph schema and the per-turn event record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::jsonio;
use crate::paths::StateRoot;

/// Node kinds. `start` and `exit` delimit the traversal; `task` nodes carry
/// the instruction injected into the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Start,
    Task,
    Decision,
    Escalate,
    Checkpoint,
    Exit,
}

/// Verification predicate run over the turn result after a task node.
/// A closed set: workflow JSON never carries arbitrary callbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Verification {
    /// The turn's tool executions all succeeded.
    ToolSucceeded,
    /// Regex over the turn's result text.
    OutputMatches { pattern: String },
    /// A path exists on disk.
    FileExists { path: String },
    AlwaysPass,
}

impl Verification {
    /// Evaluate against the turn's observable result.
    pub fn passes(&self, tool_succeeded: bool, output_text: &str) -> bool {
        match self {
            Verification::ToolSucceeded => tool_succeeded,
            Verification::OutputMatches { pattern } => regex::Regex::new(pattern)
                .map(|re| re.is_match(output_text))
                .unwrap_or(false),
            Verification::FileExists { path } => std::path::Path::new(path).exists(),
            Verification::AlwaysPass => true,
        }
    }
}

/// Edge conditions, evaluated in a fixed order per transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeCondition {
    OnSuccess,
    OnFail,
    OnRetry,
    OnExhaust,
    Always,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub condition: EdgeCondition,
    /// Retries allowed before `on_retry` is exhausted (default: 3).
    #[serde(default)]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub instruction: String,
    #[serde(default)]
    pub verification: Option<Verification>,
}

/// One workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub workflow_id: String,
    #[serde(default)]
    pub trigger_domains: Vec<String>,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl WorkflowGraph {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn start_node(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.node_type == NodeType::Start)
    }

    /// Outgoing edges of a node, in declaration order.
    pub fn edges_from<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> {
        self.edges.iter().filter(move |e| e.from == id)
    }

    /// Progress denominators: task and checkpoint nodes count as steps.
    pub fn total_steps(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n.node_type, NodeType::Task | NodeType::Checkpoint))
            .count()
    }
}

/// The workflow library (`workflows/library.json`). Order matters: ties in
/// selection break toward the earlier workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowLibrary {
    pub workflows: Vec<WorkflowGraph>,
}

impl WorkflowLibrary {
    pub fn load(root: &StateRoot) -> Self {
        jsonio::read_json(&root.workflow_library()).unwrap_or_default()
    }

    pub fn get(&self, workflow_id: &str) -> Option<&WorkflowGraph> {
        self.workflows.iter().find(|w| w.workflow_id == workflow_id)
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Traversal event kinds. Write-only during a turn; SALUTE and the
/// supervisor consume them afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    NodeEntered,
    NodeVerified,
    EdgeFollowed,
    Retry,
    Escalate,
    Checkpoint,
    Exit,
    Canceled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub node_id: String,
    #[serde(default)]
    pub detail: String,
}

impl Event {
    pub fn new(event_type: EventType, node_id: &str, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            node_id: node_id.to_string(),
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_predicates() {
        assert!(Verification::ToolSucceeded.passes(true, ""));
        assert!(!Verification::ToolSucceeded.passes(false, ""));
        assert!(Verification::OutputMatches {
            pattern: r"(?i)all \d+ tests pass".to_string()
        }
        .passes(false, "ok: all 12 tests pass"));
        assert!(!Verification::OutputMatches {
            pattern: "[".to_string() // invalid pattern never passes
        }
        .passes(true, "anything"));
        assert!(Verification::AlwaysPass.passes(false, ""));
    }

    #[test]
    fn library_json_shape() {
        let json = r#"{
          "workflows": [{
            "workflow_id": "bugfix_workflow",
            "trigger_domains": ["bugfix"],
            "nodes": [
              {"id": "s", "type": "start"},
              {"id": "repro", "type": "task", "instruction": "Reproduce the bug.",
               "verification": {"kind": "tool_succeeded"}},
              {"id": "done", "type": "exit"}
            ],
            "edges": [
              {"from": "s", "to": "repro", "condition": "always"},
              {"from": "repro", "to": "done", "condition": "on_success"},
              {"from": "repro", "to": "repro", "condition": "on_retry", "max_retries": 2}
            ]
          }]
        }"#;
        let lib: WorkflowLibrary = serde_json::from_str(json).unwrap();
        let wf = lib.get("bugfix_workflow").unwrap();
        assert_eq!(wf.total_steps(), 1);
        assert_eq!(wf.start_node().unwrap().id, "s");
        assert_eq!(wf.edges_from("repro").count(), 2);
    }
}
