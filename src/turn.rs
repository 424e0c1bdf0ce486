//! The per-turn pipeline: enrich → route → plan → retrieve → (model call,
//! tool executions, driven by the embedder) → supervise.
//!
//! [`Core`] owns every subsystem and the cross-turn context. The embedding
//! application drives one turn as:
//!
//! ```text
//! let plan = core.begin_turn(user_message);
//! match plan {
//!     TurnPlan::Clarification { question } => reply with the question,
//!     TurnPlan::Model(input) => {
//!         call the model with input.assemble();
//!         for each tool call: core.gate_tool(..) / core.record_tool_result(..);
//!         core.end_turn(TurnReport { .. });
//!     }
//! }
//! ```
//!
//! Every component runs behind a boundary: a failing component degrades to
//! passthrough, and with everything disabled the pipeline is the identity
//! function over the user message.

use std::collections::BTreeMap;

use chrono::Utc;

use crate::bst::{BstAction, Tracker};
use crate::config::CoreConfig;
use crate::context::CoreContext;
use crate::error::{boundary, CoreResult, Outcome};
use crate::memory::co_retrieval::{CoRetrievalFile, CoRetrievalLog};
use crate::memory::enhance::{Enhancer, RetrievedMemory};
use crate::memory::store::VectorStore;
use crate::maintenance::{Maintenance, MaintenanceReport};
use crate::ontology::query::OntologyQuery;
use crate::ontology::relationship::RelationshipStore;
use crate::org::kernel::{derive_state, OrgKernel};
use crate::org::pace::{AgentSignals, PaceLevel};
use crate::org::profile::{PacePlan, Role};
use crate::org::salute::{
    Activity, Environment, Health, Location, SaluteReport, SaluteWriter, Status, TimeBlock, Unit,
};
use crate::paths::StateRoot;
use crate::supervisor::{ContextWatchdog, ScanInput, Steering, Supervisor};
use crate::toolgate::{GateDecision, SchemaRegistry, ToolGate, ToolResponse};
use crate::workflow::engine::WorkflowEngine;
use crate::workflow::graph::{Event, EventType, WorkflowLibrary};

/// What the pipeline decided to do with a user message.
#[derive(Debug)]
pub enum TurnPlan {
    /// Reply with this question; no model task call this turn.
    Clarification { question: String },
    /// Call the model with the assembled input.
    Model(ModelInput),
}

/// Everything that goes into the model call for one turn.
#[derive(Debug, Default)]
pub struct ModelInput {
    /// The user message, possibly BST-enriched.
    pub message: String,
    /// Current workflow node instruction, if a workflow is active.
    pub instruction: Option<String>,
    /// Memories selected by retrieval enhancement.
    pub memories: Vec<RetrievedMemory>,
    /// Structured entity/relationship block from the ontology extension.
    pub ontology_context: Option<String>,
    /// Supervisor steering and tool-gate advice carried into this turn.
    pub steering: Vec<String>,
}

impl ModelInput {
    /// Concatenate the sections in contract order: the (enriched) user
    /// message, the current workflow instruction, memory context, ontology
    /// context, then steering anchored after the message block.
    pub fn assemble(&self) -> String {
        let mut sections: Vec<String> = vec![self.message.clone()];
        if let Some(instruction) = &self.instruction {
            sections.push(format!("# Current Step\n{instruction}"));
        }
        if !self.memories.is_empty() {
            let lines: Vec<String> = self
                .memories
                .iter()
                .map(|m| format!("- {}", m.content))
                .collect();
            sections.push(format!("# Recalled Memories\n{}", lines.join("\n")));
        }
        if let Some(block) = &self.ontology_context {
            sections.push(block.clone());
        }
        if !self.steering.is_empty() {
            let lines: Vec<String> = self.steering.iter().map(|s| format!("- {s}")).collect();
            sections.push(format!("# Guidance\n{}", lines.join("\n")));
        }
        sections.join("\n\n")
    }
}

/// The embedder's account of what the model turn did.
#[derive(Debug, Clone, Default)]
pub struct TurnReport {
    /// Whether the turn's tool executions succeeded overall.
    pub tool_succeeded: bool,
    /// The turn's visible result text, for verification predicates.
    pub output_text: String,
    /// Token count of the assembled prompt, for the context watchdog.
    pub tokens_used: Option<u64>,
}

/// The scaffolding core: every subsystem plus the cross-turn context.
pub struct Core {
    root: StateRoot,
    config: CoreConfig,
    tracker: Tracker,
    kernel: OrgKernel,
    engine: WorkflowEngine,
    gate: ToolGate,
    enhancer: Enhancer,
    ontology_query: OntologyQuery,
    relationships: RelationshipStore,
    co_file: CoRetrievalFile,
    co_log: CoRetrievalLog,
    maintenance: Maintenance,
    supervisor: Supervisor,
    watchdog: ContextWatchdog,
    salute: SaluteWriter,
    store: Box<dyn VectorStore>,
    ctx: CoreContext,
    /// Steering queued by the previous turn's supervisor scan.
    pending_steering: Vec<Steering>,
    /// Advice queued by the tool gate for the next model call.
    pending_advice: Vec<String>,
}

impl Core {
    /// Open a core over a state root and a similarity store. All config,
    /// taxonomy, and workflow files are read from the root; missing files
    /// mean the corresponding component passes through.
    pub fn open(
        root: impl Into<std::path::PathBuf>,
        store: Box<dyn VectorStore>,
        schemas: SchemaRegistry,
    ) -> CoreResult<Self> {
        let root = StateRoot::create(root)?;
        let config = CoreConfig::load(&root);

        let taxonomy = crate::bst::SlotTaxonomy::load(&root);
        let library = WorkflowLibrary::load(&root);
        let co_file = CoRetrievalFile::new(root.co_retrieval_log());
        let co_log = co_file.load();

        Ok(Self {
            tracker: Tracker::new(taxonomy),
            kernel: OrgKernel::new(),
            engine: WorkflowEngine::new(library),
            gate: ToolGate::new(config.tool_gate.clone(), schemas),
            enhancer: Enhancer::new(config.classification.retrieval.clone()),
            ontology_query: OntologyQuery::new(
                config.ontology.ontology_query.clone(),
                config.ontology.relationship_extraction.min_confidence_to_surface,
            ),
            relationships: RelationshipStore::new(root.relationships()),
            co_file,
            co_log,
            maintenance: Maintenance::new(
                config.classification.clone(),
                config.ontology.clone(),
            ),
            supervisor: Supervisor::new(config.supervisor.clone()),
            watchdog: ContextWatchdog::new(config.watchdog.clone()),
            salute: SaluteWriter::new(root.clone()),
            store,
            ctx: CoreContext::default(),
            pending_steering: Vec::new(),
            pending_advice: Vec::new(),
            root,
            config,
        })
    }

    // ── Turn entry ──────────────────────────────────────────────────────

    /// Run the pre-model pipeline for one user message.
    pub fn begin_turn(&mut self, message: &str) -> TurnPlan {
        self.ctx.begin_turn();
        let now = Utc::now();

        // 1. Belief state tracking.
        let bst_outcome = boundary(
            "bst",
            self.tracker
                .process(message, &self.ctx.history, self.ctx.belief.as_ref(), self.ctx.turn),
        );
        let effective_message = match bst_outcome {
            Outcome::Applied(run) => {
                self.ctx.belief = run.belief;
                match run.action {
                    BstAction::Clarify { question, .. } => {
                        self.ctx.push_history(message);
                        return TurnPlan::Clarification { question };
                    }
                    BstAction::Enrich { message, .. } => message,
                    BstAction::Passthrough => message.to_string(),
                }
            }
            outcome => {
                // A trapped pipeline failure mid-task is unrecoverable for
                // PACE purposes; the turn itself still passes through.
                if outcome.is_failed() && self.ctx.traversal.is_some() {
                    self.ctx.unrecoverable_error = true;
                }
                message.to_string()
            }
        };
        self.ctx.push_history(message);

        // 2. Organization kernel.
        if let Err(e) = self.run_org_kernel(now) {
            tracing::warn!(error = %e, "org kernel error, no role active");
            self.ctx.active_role = None;
        }

        // 3. Graph workflow.
        let instruction = self.run_workflow();

        // 4 + 5. Ontology-aware extension, then memory enhancement. Both
        // query on the raw user message; enrichment labels would only skew
        // the similarity search.
        let (memories, ontology_context) = self.run_retrieval(message, now);

        // Steering: supervisor injections from last turn plus queued tool
        // advice, anchored after the user message.
        let mut steering: Vec<String> = self
            .pending_steering
            .drain(..)
            .map(|s| s.message)
            .collect();
        steering.append(&mut self.pending_advice);

        TurnPlan::Model(ModelInput {
            message: effective_message,
            instruction,
            memories,
            ontology_context,
            steering,
        })
    }

    fn run_org_kernel(&mut self, now: chrono::DateTime<Utc>) -> crate::org::OrgResult<()> {
        let Some(org) = self.kernel.active_org(&self.root) else {
            self.ctx.active_role = None;
            self.ctx.prev_role_id = None;
            return Ok(());
        };

        let domain = self.ctx.domain().unwrap_or("").to_string();
        let role = self.kernel.select_role(&self.root, &org, &domain);

        match &role {
            Some(role) => {
                let switched = self
                    .ctx
                    .prev_role_id
                    .as_deref()
                    .map(|prev| prev != role.role_id)
                    .unwrap_or(false);
                if switched {
                    tracing::info!(
                        from = self.ctx.prev_role_id.as_deref().unwrap_or(""),
                        to = role.role_id.as_str(),
                        "role switch"
                    );
                    // A new role never resumes the old role's workflow.
                    self.ctx.traversal = None;
                } else if self.ctx.prev_role_id.is_none() {
                    tracing::info!(role = role.role_id.as_str(), "role activated");
                }
                self.ctx.prev_role_id = Some(role.role_id.clone());
            }
            None => {
                self.ctx.prev_role_id = None;
                self.ctx.traversal = None;
            }
        }
        self.ctx.active_role = role;

        // PACE evaluation against current signals.
        if let Some(role) = self.ctx.active_role.clone() {
            let signals = self.signals();
            if self
                .ctx
                .pace
                .evaluate(&role.pace_plan, &role.doctrine, &signals)
                .is_some()
            {
                self.emit_salute(&role, now);
            }

            // Periodic emission on the role's own turn counter.
            let role_turn = self.ctx.bump_role_turn(&role.role_id);
            let interval = role.doctrine.salute_interval_turns.max(1);
            if role_turn % interval == 0 {
                self.emit_salute(&role, now);
            }
        }
        Ok(())
    }

    fn run_workflow(&mut self) -> Option<String> {
        let domain = self.ctx.domain()?.to_string();
        let role = self.ctx.active_role.clone();
        let allowed = |workflow_id: &str| {
            role.as_ref()
                .map(|r| r.allows_workflow(workflow_id))
                .unwrap_or(true)
        };

        // Resume the in-flight traversal when it still matches.
        let mut resumed: Option<Option<String>> = None;
        if let Some(traversal) = &self.ctx.traversal {
            if !traversal.complete {
                if let Some(graph) = self.engine.library().get(&traversal.workflow_id) {
                    let still_matches = graph.trigger_domains.iter().any(|d| d == &domain)
                        && allowed(&graph.workflow_id);
                    if still_matches {
                        resumed = Some(
                            self.engine
                                .current_instruction(graph, traversal)
                                .map(str::to_string),
                        );
                    }
                }
            }
        }
        match resumed {
            Some(instruction) => return instruction,
            None => self.ctx.traversal = None,
        }

        let graph = self.engine.select(&domain, allowed)?.clone();
        let mut events = Vec::new();
        match self.engine.begin(&graph, &mut events) {
            Ok((traversal, begun)) => {
                self.ctx.events.append(&mut events);
                self.apply_escalations(begun.escalations);
                let instruction = self
                    .engine
                    .current_instruction(&graph, &traversal)
                    .map(str::to_string);
                self.ctx.traversal = Some(traversal);
                tracing::info!(workflow = graph.workflow_id.as_str(), "workflow selected");
                instruction
            }
            Err(e) => {
                tracing::warn!(error = %e, "workflow begin failed, no instruction");
                None
            }
        }
    }

    fn run_retrieval(
        &mut self,
        message: &str,
        now: chrono::DateTime<Utc>,
    ) -> (Vec<RetrievedMemory>, Option<String>) {
        let mut extra_queries = Vec::new();
        let mut ontology_context = None;

        if self.config.ontology.enabled {
            match self
                .ontology_query
                .run(self.store.as_ref(), &self.relationships, message)
            {
                Ok(out) => {
                    extra_queries = out.extra_queries;
                    ontology_context = out.context_block;
                }
                Err(e) => tracing::warn!(error = %e, "ontology query failed, skipped"),
            }
        }

        let memories = match self.enhancer.retrieve(
            self.store.as_mut(),
            message,
            self.ctx.domain(),
            &extra_queries,
            now,
        ) {
            Ok(memories) => memories,
            Err(e) => {
                tracing::warn!(error = %e, "memory retrieval failed, skipped");
                Vec::new()
            }
        };

        if !memories.is_empty() {
            let ids: Vec<String> = memories.iter().map(|m| m.id.clone()).collect();
            self.co_log.record(
                now,
                self.ctx.domain(),
                &ids,
                self.ctx.turn,
                self.config.classification.co_retrieval.max_entries,
            );
            if let Err(e) = self.co_file.save(&self.co_log) {
                tracing::warn!(error = %e, "co-retrieval log save failed");
            }
        }

        (memories, ontology_context)
    }

    // ── Tool hooks ──────────────────────────────────────────────────────

    /// Before-hook around a tool invocation. Advice collected here reaches
    /// the model with the next turn's steering block.
    pub fn gate_tool(
        &mut self,
        tool_name: &str,
        args: &BTreeMap<String, String>,
    ) -> GateDecision {
        let (decision, mut advice) = self.gate.before(tool_name, args, self.ctx.turn);
        self.pending_advice.append(&mut advice);
        decision
    }

    /// After-hook: classify the response and update failure accounting.
    /// Returns the error message to surface, with a reflection block
    /// appended once the same tool keeps failing.
    pub fn record_tool_result(&mut self, tool_name: &str, response: &ToolResponse) -> String {
        let kind = self.gate.after(tool_name, response, self.ctx.turn);
        let consecutive = self.gate.tracker().consecutive(tool_name);
        if kind.is_some() && consecutive >= self.config.tool_gate.tool_threshold {
            format!(
                "{}{}",
                response.message,
                crate::toolgate::advisor::reflection_block(tool_name, consecutive)
            )
        } else {
            response.message.clone()
        }
    }

    // ── Turn exit ───────────────────────────────────────────────────────

    /// Run the post-model pipeline: verification, PACE, supervision,
    /// SALUTE, and (when due) maintenance.
    pub fn end_turn(&mut self, report: TurnReport) {
        let now = Utc::now();

        if let Some(tokens) = report.tokens_used {
            self.watchdog.observe(tokens);
        }

        // Advance the workflow on the verification outcome.
        let mut progressed = false;
        let mut workflow_changed = false;
        if let Some(mut traversal) = self.ctx.traversal.take() {
            if let Some(graph) = self.engine.library().get(&traversal.workflow_id).cloned() {
                let verified = graph
                    .node(&traversal.current_node)
                    .and_then(|n| n.verification.as_ref())
                    .map(|v| v.passes(report.tool_succeeded, &report.output_text))
                    .unwrap_or(report.tool_succeeded);

                let mut events = Vec::new();
                match self.engine.advance(&graph, &mut traversal, verified, &mut events) {
                    Ok(advanced) => {
                        self.ctx.events.append(&mut events);
                        self.apply_escalations(advanced.escalations);
                        progressed = verified || advanced.progressed;
                        workflow_changed = advanced.completed || advanced.escalations > 0;
                        if advanced.completed {
                            tracing::info!(
                                workflow = traversal.workflow_id.as_str(),
                                "workflow complete"
                            );
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "workflow advance failed"),
                }
            }
            self.ctx.traversal = Some(traversal);
        } else {
            progressed = report.tool_succeeded;
        }
        self.ctx.note_progress(progressed, now);

        // Re-evaluate PACE with post-turn counters.
        if let Some(role) = self.ctx.active_role.clone() {
            let signals = self.signals();
            let transitioned = self
                .ctx
                .pace
                .evaluate(&role.pace_plan, &role.doctrine, &signals)
                .is_some();
            if transitioned || workflow_changed {
                self.emit_salute(&role, now);
            }
        }

        // Supervisor scan queues steering for the next turn.
        let role = self.ctx.active_role.clone();
        let pace_action = role.as_ref().map(|r| tier_action(&r.pace_plan, self.ctx.pace.level()));
        let input = ScanInput {
            turn: self.ctx.turn,
            turns_since_progress: self.ctx.turns_since_progress,
            max_turns_without_progress: role
                .as_ref()
                .map(|r| r.doctrine.max_turns_without_progress)
                .unwrap_or(0),
            context_fill_pct: self.watchdog.fill_pct(),
            pace: role.as_ref().map(|_| self.ctx.pace.level()),
            pace_action: pace_action.as_deref(),
        };
        let mut steering = self.supervisor.scan(input, self.gate.tracker());
        self.pending_steering.append(&mut steering);

        // Out-of-band maintenance between turns.
        if self.maintenance.due(self.ctx.turn) {
            let report = self.run_maintenance(now);
            tracing::debug!(?report, "maintenance report");
        }
    }

    /// External cancellation: mark the traversal and leave partial effects
    /// in place for the next SALUTE.
    pub fn cancel_turn(&mut self) {
        if let Some(traversal) = &self.ctx.traversal {
            self.ctx.events.push(Event::new(
                EventType::Canceled,
                &traversal.current_node,
                "turn canceled",
            ));
        }
    }

    /// Turn-level timeout: cancel and escalate to emergency.
    pub fn timeout_turn(&mut self) {
        self.cancel_turn();
        self.ctx.pace.force(PaceLevel::Emergency);
        if let Some(role) = self.ctx.active_role.clone() {
            self.emit_salute(&role, Utc::now());
        }
    }

    /// Run the maintenance pass now, regardless of the interval.
    pub fn run_maintenance(&mut self, now: chrono::DateTime<Utc>) -> MaintenanceReport {
        let report = self.maintenance.run(
            self.store.as_mut(),
            &mut self.co_log,
            &self.root,
            self.ctx.turn,
            now,
        );
        if let Err(e) = self.co_file.save(&self.co_log) {
            tracing::warn!(error = %e, "co-retrieval log save failed");
        }
        report
    }

    // ── SALUTE ──────────────────────────────────────────────────────────

    fn emit_salute(&mut self, role: &Role, now: chrono::DateTime<Utc>) {
        let report = self.build_salute(role, now);
        if let Err(e) = self.salute.emit(&report) {
            tracing::warn!(error = %e, "salute emission failed");
        }
        // Hour-old archives are cleanup candidates; never required.
        self.salute.cleanup_archive(3600);
    }

    fn build_salute(&mut self, role: &Role, now: chrono::DateTime<Utc>) -> SaluteReport {
        let pace = self.ctx.pace.level();
        let tracker = self.gate.tracker();

        let (workflow, step, total_steps, progress) = match &self.ctx.traversal {
            Some(traversal) => match self.engine.library().get(&traversal.workflow_id) {
                Some(graph) => (
                    traversal.workflow_id.clone(),
                    traversal.steps_done(graph),
                    graph.total_steps(),
                    traversal.progress(graph),
                ),
                None => (traversal.workflow_id.clone(), 0, 0, 0.0),
            },
            None => (String::new(), 0, 0, 0.0),
        };
        let workflow_active = self
            .ctx
            .traversal
            .as_ref()
            .map(|t| !t.complete)
            .unwrap_or(false);
        let workflow_complete = self
            .ctx
            .traversal
            .as_ref()
            .map(|t| t.complete)
            .unwrap_or(false);

        let domain = self.ctx.domain().unwrap_or("").to_string();
        let memory_count = self
            .store
            .iterate_all()
            .map(|all| all.len() as u64)
            .unwrap_or(0);

        SaluteReport {
            schema: SaluteReport::SCHEMA.to_string(),
            status: Status {
                state: derive_state(pace, workflow_active, workflow_complete, !domain.is_empty()),
                progress,
                pace_level: pace,
                health: Health::derive(pace, tracker.max_consecutive()),
            },
            activity: Activity {
                current_task: if workflow.is_empty() {
                    domain.clone()
                } else {
                    workflow.clone()
                },
                domain,
                workflow,
                step,
                total_steps,
                current_tool: tracker
                    .history()
                    .last()
                    .map(|r| r.tool_name.clone())
                    .unwrap_or_default(),
                iterations_on_step: self.ctx.turns_since_progress,
            },
            location: Location {
                cwd: std::env::current_dir()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
                files_modified: Vec::new(),
                files_read: Vec::new(),
                resources_claimed: Vec::new(),
            },
            unit: Unit {
                role_id: role.role_id.clone(),
                reports_to: role.reports_to.clone().unwrap_or_default(),
                organization: self
                    .kernel
                    .active_org(&self.root)
                    .map(|o| o.org_id)
                    .unwrap_or_default(),
            },
            time: TimeBlock {
                timestamp: now,
                task_started: self.ctx.task_started,
                elapsed_s: self
                    .ctx
                    .task_started
                    .map(|t| (now - t).num_seconds())
                    .unwrap_or(0),
                turns_elapsed: self.ctx.role_turn(&role.role_id),
                turns_since_progress: self.ctx.turns_since_progress,
                context_turns_remaining: self.watchdog.turns_remaining(),
            },
            environment: Environment {
                model: String::new(),
                context_fill_pct: self.watchdog.fill_pct(),
                context_tokens_used: self.watchdog.tokens_used(),
                context_tokens_max: self.watchdog.tokens_max(),
                tool_failures_consecutive: tracker.max_consecutive(),
                tool_failures_total: tracker.total_failures(),
                memory_fragments_stored: memory_count,
            },
        }
    }

    // ── Shared helpers & accessors ──────────────────────────────────────

    fn signals(&self) -> AgentSignals {
        AgentSignals {
            consecutive_tool_failures: self.gate.tracker().max_consecutive(),
            turns_since_progress: self.ctx.turns_since_progress,
            context_fill_pct: self.watchdog.fill_pct(),
            unrecoverable_error: self.ctx.unrecoverable_error,
        }
    }

    fn apply_escalations(&mut self, escalations: u32) {
        for _ in 0..escalations {
            let next = self.ctx.pace.level().escalated();
            self.ctx.pace.force(next);
        }
    }

    pub fn context(&self) -> &CoreContext {
        &self.ctx
    }

    pub fn pace_level(&self) -> PaceLevel {
        self.ctx.pace.level()
    }

    pub fn store(&self) -> &dyn VectorStore {
        self.store.as_ref()
    }

    pub fn store_mut(&mut self) -> &mut dyn VectorStore {
        self.store.as_mut()
    }

    pub fn state_root(&self) -> &StateRoot {
        &self.root
    }

    pub fn co_retrieval_log(&self) -> &CoRetrievalLog {
        &self.co_log
    }
}

/// The action text of the tier PACE currently sits at.
fn tier_action(plan: &PacePlan, level: PaceLevel) -> String {
    let tier = match level {
        PaceLevel::Primary => &plan.primary,
        PaceLevel::Alternate => &plan.alternate,
        PaceLevel::Contingent => &plan.contingent,
        PaceLevel::Emergency => &plan.emergency,
    };
    tier.action.clone()
}
