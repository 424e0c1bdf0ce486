//! # seshat
//!
//! Deterministic cognitive scaffolding around an unreliable local language
//! model. Every decision in this crate is rule-based: the model is a black
//! box with a turn input and a turn output, and the scaffolding compensates
//! for its failures instead of asking it to self-correct.
//!
//! ## Architecture
//!
//! Per turn, in strict sequence:
//!
//! - **Belief state tracking** (`bst`): classify the message into a domain,
//!   fill slots through resolver chains, enrich or ask one clarifying
//!   question.
//! - **Organization kernel** (`org`): select the role for the domain, apply
//!   its capability filter, evaluate PACE, emit SALUTE status files.
//! - **Graph workflows** (`workflow`): match a workflow to the domain,
//!   inject the current node's instruction, advance on verification.
//! - **Tool gate** (`toolgate`): validate tool arguments, classify failures,
//!   advise on recovery, count consecutive failures.
//! - **Memory enhancement** (`memory`): multi-variant retrieval with decay
//!   weighting, related-memory boosting, and access tracking over a
//!   pluggable similarity store.
//! - **Ontology** (`ontology`): typed entities and relationships with a
//!   deterministic resolution pipeline.
//! - **Supervision** (`supervisor`): post-turn anomaly scan with
//!   cooldown-gated steering.
//!
//! Between turns, a periodic `maintenance` pass deduplicates, links related
//! memories, detects retrieval clusters, flags dormancy, and keeps the
//! ontology current. Nothing is ever deleted: superseded records point at
//! their replacements.
//!
//! ## Library usage
//!
//! ```no_run
//! use seshat::memory::LexicalStore;
//! use seshat::toolgate::SchemaRegistry;
//! use seshat::turn::{Core, TurnPlan, TurnReport};
//!
//! let mut core = Core::open(
//!     "/var/lib/agent/state",
//!     Box::new(LexicalStore::in_memory()),
//!     SchemaRegistry::default(),
//! )
//! .unwrap();
//!
//! match core.begin_turn("fix the login bug in agent/auth.py") {
//!     TurnPlan::Clarification { question } => println!("{question}"),
//!     TurnPlan::Model(input) => {
//!         let _prompt = input.assemble();
//!         // ... call the model, execute tools through the gate hooks ...
//!         core.end_turn(TurnReport { tool_succeeded: true, ..Default::default() });
//!     }
//! }
//! ```

pub mod bst;
pub mod config;
pub mod context;
pub mod error;
mod jsonio;
pub mod maintenance;
pub mod memory;
pub mod ontology;
pub mod org;
pub mod paths;
pub mod supervisor;
pub mod toolgate;
pub mod turn;
pub mod workflow;

pub use error::{CoreError, CoreResult, Outcome};
pub use paths::StateRoot;
pub use turn::{Core, ModelInput, TurnPlan, TurnReport};
