//! Belief State Tracker: the domain-classifying, slot-filling front-end.
//!
//! Runs first in the turn pipeline. Classifies the user message into a
//! taxonomy domain, fills typed slots through deterministic resolver chains,
//! and either enriches the message, asks one clarifying question, or gets
//! out of the way. Never blocks the turn: any failure degrades to
//! passthrough with the original message intact.

pub mod resolve;
pub mod taxonomy;
pub mod tracker;

pub use taxonomy::{Domain, ResolverKind, SlotDef, SlotTaxonomy, SlotType, TaxonomyGlobals};
pub use tracker::{BeliefState, BstAction, Tracker};

use miette::Diagnostic;
use thiserror::Error;

/// Errors from the tracker. Trapped at the pipeline boundary.
#[derive(Debug, Error, Diagnostic)]
pub enum BstError {
    #[error("slot taxonomy unavailable: {message}")]
    #[diagnostic(
        code(seshat::bst::taxonomy),
        help("Check slot_taxonomy.json under the state root; the tracker passes through without it.")
    )]
    Taxonomy { message: String },

    #[error("unknown domain referenced: {domain}")]
    #[diagnostic(
        code(seshat::bst::unknown_domain),
        help("The persisted belief state names a domain no longer in the taxonomy.")
    )]
    UnknownDomain { domain: String },
}

pub type BstResult<T> = std::result::Result<T, BstError>;
