//! Graph workflow engine.
//!
//! Workflows are directed graphs matched to the classified domain (and
//! filtered by the active role). The engine holds traversal state across
//! turns, injects the current node's instruction into the turn, and advances
//! along conditional edges based on the previous turn's verification.

pub mod engine;
pub mod graph;

pub use engine::{AdvanceResult, Traversal, WorkflowEngine};
pub use graph::{
    Edge, EdgeCondition, Event, EventType, Node, NodeType, Verification, WorkflowGraph,
    WorkflowLibrary,
};

use miette::Diagnostic;
use thiserror::Error;

/// Errors from the workflow layer. Trapped at the pipeline boundary: a
/// missing library or unmatched workflow simply injects no instruction.
#[derive(Debug, Error, Diagnostic)]
pub enum WorkflowError {
    #[error("workflow \"{workflow_id}\" has no start node")]
    #[diagnostic(
        code(seshat::workflow::no_start),
        help("Every workflow graph needs exactly one node with type \"start\".")
    )]
    NoStart { workflow_id: String },

    #[error("node \"{node_id}\" not found in workflow \"{workflow_id}\"")]
    #[diagnostic(
        code(seshat::workflow::dangling_node),
        help("An edge references a node id that is not declared in the graph.")
    )]
    DanglingNode {
        workflow_id: String,
        node_id: String,
    },

    #[error("traversal stuck in workflow \"{workflow_id}\" at node \"{node_id}\"")]
    #[diagnostic(
        code(seshat::workflow::stuck),
        help("No edge out of this node matched the outcome, and there is no `always` fallback.")
    )]
    Stuck {
        workflow_id: String,
        node_id: String,
    },
}

pub type WorkflowResult<T> = std::result::Result<T, WorkflowError>;
