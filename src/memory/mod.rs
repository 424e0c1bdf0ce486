//! Memory layer: classified fragments over a pluggable similarity store.
//!
//! - **fragment**: the classification + lineage metadata model carried by
//!   every memory.
//! - **store**: the [`VectorStore`] contract the core requires from an
//!   external similarity engine, plus a deterministic lexical reference
//!   implementation.
//! - **enhance**: retrieval-time multi-variant search with decay weighting,
//!   related-memory boosting, and access tracking.
//! - **co_retrieval**: bounded log of which memories were emitted together.
//!
//! Memories are never deleted: "removal" is `relevance = dormant` or a
//! `superseded_by` pointer to a newer record.

pub mod co_retrieval;
pub mod enhance;
pub mod fragment;
pub mod store;

pub use co_retrieval::{CoRetrievalFile, CoRetrievalLog};
pub use enhance::{expand_query, keyword_variant, Enhancer, RetrievedMemory};
pub use fragment::{
    Classification, Lineage, MemoryId, MemoryMetadata, Relevance, Source, Utility, Validity,
};
pub use store::{LexicalStore, SearchHit, StoredMemory, VectorStore};

use miette::Diagnostic;
use thiserror::Error;

/// Errors from the memory layer.
#[derive(Debug, Error, Diagnostic)]
pub enum MemoryError {
    #[error("memory not found: {id}")]
    #[diagnostic(
        code(seshat::memory::not_found),
        help("The id does not exist in the store. It may have been stored under a different area.")
    )]
    NotFound { id: String },

    #[error("store backend failure: {message}")]
    #[diagnostic(
        code(seshat::memory::backend),
        help("The similarity backend rejected the operation. Check its logs and the store contract.")
    )]
    Backend { message: String },

    #[error("memory index I/O failed: {path}")]
    #[diagnostic(
        code(seshat::memory::index_io),
        help("Check permissions on the memory directory under the state root.")
    )]
    IndexIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience alias for memory operations.
pub type MemoryResult<T> = std::result::Result<T, MemoryError>;
