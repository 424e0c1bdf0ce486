//! Selection and traversal.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::graph::{
    Edge, EdgeCondition, Event, EventType, NodeType, WorkflowGraph, WorkflowLibrary,
};
use super::{WorkflowError, WorkflowResult};

/// Default retry allowance when an `on_retry` edge carries no `max_retries`.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Walk-step cap per advance, guarding against cyclic `always` chains.
const MAX_WALK_STEPS: usize = 64;

/// Cross-turn traversal state for one workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Traversal {
    pub workflow_id: String,
    pub current_node: String,
    pub visited: Vec<String>,
    pub retry_count_by_node: BTreeMap<String, u32>,
    pub complete: bool,
}

impl Traversal {
    /// Distinct steps (task/checkpoint nodes) visited so far.
    pub fn steps_done(&self, graph: &WorkflowGraph) -> usize {
        self.visited
            .iter()
            .filter(|id| {
                graph
                    .node(id)
                    .map(|n| matches!(n.node_type, NodeType::Task | NodeType::Checkpoint))
                    .unwrap_or(false)
            })
            .count()
    }

    /// Workflow progress in [0, 1] for SALUTE.
    pub fn progress(&self, graph: &WorkflowGraph) -> f64 {
        let total = graph.total_steps();
        if total == 0 {
            return if self.complete { 1.0 } else { 0.0 };
        }
        (self.steps_done(graph) as f64 / total as f64).min(1.0)
    }

    fn visit(&mut self, node_id: &str) {
        if !self.visited.iter().any(|v| v == node_id) {
            self.visited.push(node_id.to_string());
        }
    }
}

/// What an advance produced.
#[derive(Debug, Clone, Default)]
pub struct AdvanceResult {
    /// PACE escalations requested by `escalate` nodes.
    pub escalations: u32,
    /// Whether the traversal reached an exit node.
    pub completed: bool,
    /// Whether a checkpoint was crossed (a progress signal).
    pub progressed: bool,
}

/// The engine: workflow selection plus traversal mechanics. The traversal
/// state itself lives on the core context.
#[derive(Debug, Default)]
pub struct WorkflowEngine {
    library: WorkflowLibrary,
}

impl WorkflowEngine {
    pub fn new(library: WorkflowLibrary) -> Self {
        Self { library }
    }

    pub fn library(&self) -> &WorkflowLibrary {
        &self.library
    }

    /// Select a workflow for the domain, honoring the role's whitelist.
    /// First match in library order wins.
    pub fn select(
        &self,
        domain: &str,
        allowed: impl Fn(&str) -> bool,
    ) -> Option<&WorkflowGraph> {
        self.library
            .workflows
            .iter()
            .find(|w| w.trigger_domains.iter().any(|d| d == domain) && allowed(&w.workflow_id))
    }

    /// Begin traversal: enter the start node and walk until a task node (or
    /// exit) is reached.
    pub fn begin(
        &self,
        graph: &WorkflowGraph,
        events: &mut Vec<Event>,
    ) -> WorkflowResult<(Traversal, AdvanceResult)> {
        let start = graph.start_node().ok_or_else(|| WorkflowError::NoStart {
            workflow_id: graph.workflow_id.clone(),
        })?;
        let mut traversal = Traversal {
            workflow_id: graph.workflow_id.clone(),
            current_node: start.id.clone(),
            visited: vec![start.id.clone()],
            retry_count_by_node: BTreeMap::new(),
            complete: false,
        };
        events.push(Event::new(EventType::NodeEntered, &start.id, "start"));
        let result = self.settle(graph, &mut traversal, true, events)?;
        Ok((traversal, result))
    }

    /// The instruction the current node injects into the turn, if any.
    pub fn current_instruction<'a>(
        &self,
        graph: &'a WorkflowGraph,
        traversal: &Traversal,
    ) -> Option<&'a str> {
        if traversal.complete {
            return None;
        }
        graph
            .node(&traversal.current_node)
            .filter(|n| n.node_type == NodeType::Task && !n.instruction.is_empty())
            .map(|n| n.instruction.as_str())
    }

    /// Advance past the current task node given the turn's verification
    /// outcome, then walk to the next resting node.
    pub fn advance(
        &self,
        graph: &WorkflowGraph,
        traversal: &mut Traversal,
        verified: bool,
        events: &mut Vec<Event>,
    ) -> WorkflowResult<AdvanceResult> {
        if traversal.complete {
            return Ok(AdvanceResult {
                completed: true,
                ..Default::default()
            });
        }
        events.push(Event::new(
            EventType::NodeVerified,
            &traversal.current_node,
            if verified { "pass" } else { "fail" },
        ));
        let mut result = AdvanceResult::default();
        self.step(graph, traversal, verified, events)?;
        if !traversal.complete {
            let settle = self.settle(graph, traversal, verified, events)?;
            result.escalations += settle.escalations;
            result.completed |= settle.completed;
            result.progressed |= settle.progressed;
        }
        Ok(result)
    }

    /// Walk through pass-through nodes (start, decision, escalate,
    /// checkpoint) until resting on a task or exit node.
    fn settle(
        &self,
        graph: &WorkflowGraph,
        traversal: &mut Traversal,
        outcome: bool,
        events: &mut Vec<Event>,
    ) -> WorkflowResult<AdvanceResult> {
        let mut result = AdvanceResult::default();
        for _ in 0..MAX_WALK_STEPS {
            let node = graph.node(&traversal.current_node).ok_or_else(|| {
                WorkflowError::DanglingNode {
                    workflow_id: graph.workflow_id.clone(),
                    node_id: traversal.current_node.clone(),
                }
            })?;
            match node.node_type {
                NodeType::Task => return Ok(result),
                NodeType::Exit => {
                    events.push(Event::new(EventType::Exit, &node.id, ""));
                    traversal.complete = true;
                    result.completed = true;
                    return Ok(result);
                }
                NodeType::Escalate => {
                    events.push(Event::new(EventType::Escalate, &node.id, &node.instruction));
                    result.escalations += 1;
                }
                NodeType::Checkpoint => {
                    events.push(Event::new(EventType::Checkpoint, &node.id, &node.instruction));
                    result.progressed = true;
                }
                NodeType::Start | NodeType::Decision => {}
            }
            self.step(graph, traversal, outcome, events)?;
            if traversal.complete {
                result.completed = true;
                return Ok(result);
            }
        }
        Err(WorkflowError::Stuck {
            workflow_id: graph.workflow_id.clone(),
            node_id: traversal.current_node.clone(),
        })
    }

    /// Follow exactly one edge out of the current node.
    fn step(
        &self,
        graph: &WorkflowGraph,
        traversal: &mut Traversal,
        outcome: bool,
        events: &mut Vec<Event>,
    ) -> WorkflowResult<()> {
        let node_id = traversal.current_node.clone();
        let edge = self.pick_edge(graph, traversal, &node_id, outcome);
        let Some((edge, is_retry)) = edge else {
            return Err(WorkflowError::Stuck {
                workflow_id: graph.workflow_id.clone(),
                node_id,
            });
        };

        if is_retry {
            let count = traversal.retry_count_by_node.entry(node_id.clone()).or_insert(0);
            *count += 1;
            events.push(Event::new(EventType::Retry, &node_id, format!("retry {count}")));
        }

        events.push(Event::new(
            EventType::EdgeFollowed,
            &node_id,
            format!("-> {}", edge.to),
        ));
        traversal.current_node = edge.to.clone();
        traversal.visit(&edge.to);
        events.push(Event::new(EventType::NodeEntered, &edge.to, ""));
        Ok(())
    }

    /// Edge choice for an outcome, in condition order: `on_success`;
    /// failing, `on_retry` while under its budget, `on_exhaust` once over
    /// it, else `on_fail`; `always` as the final fallback.
    fn pick_edge<'a>(
        &self,
        graph: &'a WorkflowGraph,
        traversal: &Traversal,
        node_id: &'a str,
        outcome: bool,
    ) -> Option<(&'a Edge, bool)> {
        let edges: Vec<&Edge> = graph.edges_from(node_id).collect();
        let find = |cond: EdgeCondition| edges.iter().find(|e| e.condition == cond).copied();

        if outcome {
            if let Some(e) = find(EdgeCondition::OnSuccess) {
                return Some((e, false));
            }
        } else {
            if let Some(retry) = find(EdgeCondition::OnRetry) {
                let budget = retry.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
                let used = traversal
                    .retry_count_by_node
                    .get(node_id)
                    .copied()
                    .unwrap_or(0);
                if used < budget {
                    return Some((retry, true));
                }
                if let Some(e) = find(EdgeCondition::OnExhaust) {
                    return Some((e, false));
                }
            }
            if let Some(e) = find(EdgeCondition::OnFail) {
                return Some((e, false));
            }
            if let Some(e) = find(EdgeCondition::OnExhaust) {
                return Some((e, false));
            }
        }
        find(EdgeCondition::Always).map(|e| (e, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::graph::{Node, Verification};

    fn node(id: &str, node_type: NodeType, instruction: &str) -> Node {
        Node {
            id: id.to_string(),
            node_type,
            instruction: instruction.to_string(),
            verification: Some(Verification::ToolSucceeded),
        }
    }

    fn edge(from: &str, to: &str, condition: EdgeCondition) -> Edge {
        Edge {
            from: from.to_string(),
            to: to.to_string(),
            condition,
            max_retries: None,
        }
    }

    /// start → repro(task) → fix(task) → verify(checkpoint) → done(exit),
    /// with retry on repro and escalation on exhaust.
    fn bugfix_graph() -> WorkflowGraph {
        WorkflowGraph {
            workflow_id: "bugfix_workflow".to_string(),
            trigger_domains: vec!["bugfix".to_string()],
            nodes: vec![
                node("s", NodeType::Start, ""),
                node("repro", NodeType::Task, "Reproduce the reported bug."),
                node("fix", NodeType::Task, "Apply the fix."),
                node("check", NodeType::Checkpoint, "fix applied"),
                node("esc", NodeType::Escalate, "could not reproduce"),
                node("done", NodeType::Exit, ""),
            ],
            edges: vec![
                edge("s", "repro", EdgeCondition::Always),
                Edge {
                    from: "repro".into(),
                    to: "repro".into(),
                    condition: EdgeCondition::OnRetry,
                    max_retries: Some(2),
                },
                edge("repro", "fix", EdgeCondition::OnSuccess),
                edge("repro", "esc", EdgeCondition::OnExhaust),
                edge("esc", "done", EdgeCondition::Always),
                edge("fix", "check", EdgeCondition::OnSuccess),
                edge("fix", "fix", EdgeCondition::OnFail),
                edge("check", "done", EdgeCondition::Always),
            ],
        }
    }

    #[test]
    fn selection_honors_domain_and_whitelist() {
        let engine = WorkflowEngine::new(WorkflowLibrary {
            workflows: vec![bugfix_graph()],
        });
        assert!(engine.select("bugfix", |_| true).is_some());
        assert!(engine.select("codegen", |_| true).is_none());
        assert!(engine.select("bugfix", |id| id != "bugfix_workflow").is_none());
    }

    #[test]
    fn happy_path_walks_to_exit() {
        let engine = WorkflowEngine::new(WorkflowLibrary::default());
        let graph = bugfix_graph();
        let mut events = Vec::new();

        let (mut traversal, _) = engine.begin(&graph, &mut events).unwrap();
        assert_eq!(traversal.current_node, "repro");
        assert_eq!(
            engine.current_instruction(&graph, &traversal),
            Some("Reproduce the reported bug.")
        );

        let r = engine.advance(&graph, &mut traversal, true, &mut events).unwrap();
        assert!(!r.completed);
        assert_eq!(traversal.current_node, "fix");

        let r = engine.advance(&graph, &mut traversal, true, &mut events).unwrap();
        assert!(r.completed);
        assert!(r.progressed); // crossed the checkpoint
        assert!(traversal.complete);
        assert!(events.iter().any(|e| e.event_type == EventType::Exit));
    }

    #[test]
    fn retries_then_exhaust_escalates() {
        let engine = WorkflowEngine::new(WorkflowLibrary::default());
        let graph = bugfix_graph();
        let mut events = Vec::new();
        let (mut traversal, _) = engine.begin(&graph, &mut events).unwrap();

        // Two failures consume the retry budget, staying on repro.
        for expected in 1..=2u32 {
            let r = engine.advance(&graph, &mut traversal, false, &mut events).unwrap();
            assert_eq!(traversal.current_node, "repro");
            assert_eq!(traversal.retry_count_by_node["repro"], expected);
            assert_eq!(r.escalations, 0);
        }

        // Third failure exhausts: on_exhaust → escalate → exit.
        let r = engine.advance(&graph, &mut traversal, false, &mut events).unwrap();
        assert_eq!(r.escalations, 1);
        assert!(r.completed);
        assert!(events.iter().any(|e| e.event_type == EventType::Escalate));
    }

    #[test]
    fn progress_counts_tasks_and_checkpoints() {
        let engine = WorkflowEngine::new(WorkflowLibrary::default());
        let graph = bugfix_graph();
        let mut events = Vec::new();
        let (mut traversal, _) = engine.begin(&graph, &mut events).unwrap();

        assert!((traversal.progress(&graph) - 1.0 / 3.0).abs() < 1e-9);
        engine.advance(&graph, &mut traversal, true, &mut events).unwrap();
        assert!((traversal.progress(&graph) - 2.0 / 3.0).abs() < 1e-9);
        engine.advance(&graph, &mut traversal, true, &mut events).unwrap();
        assert!((traversal.progress(&graph) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn missing_start_is_an_error() {
        let engine = WorkflowEngine::new(WorkflowLibrary::default());
        let graph = WorkflowGraph {
            workflow_id: "broken".to_string(),
            trigger_domains: vec![],
            nodes: vec![node("t", NodeType::Task, "x")],
            edges: vec![],
        };
        let mut events = Vec::new();
        assert!(matches!(
            engine.begin(&graph, &mut events),
            Err(WorkflowError::NoStart { .. })
        ));
    }
}
