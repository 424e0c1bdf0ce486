//! On-disk state layout for the scaffolding core.
//!
//! All persisted state lives under one root directory in human-readable JSON
//! and JSONL. The same layout serves single-process and multi-process modes;
//! in the latter, the root sits on a shared filesystem and SALUTE files are
//! the coordination channel.

use std::path::{Path, PathBuf};

use miette::Diagnostic;
use thiserror::Error;

/// Errors from state-root resolution.
#[derive(Debug, Error, Diagnostic)]
pub enum PathError {
    #[error("failed to create state directory: {path}")]
    #[diagnostic(
        code(seshat::paths::create_dir),
        help("Check that the parent directory exists and you have write permissions.")
    )]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type PathResult<T> = std::result::Result<T, PathError>;

/// Resolved directory layout under a single state root.
///
/// ```text
/// <root>/
///   slot_taxonomy.json
///   organizations/{active.json, roles/, reports/, reports/archive/}
///   workflows/library.json
///   memory/{classification_config.json, co_retrieval_log.json}
///   ontology/{ontology_schema.json, ontology_config.json, relationships.jsonl,
///             ingestion_queue.jsonl, resolution_audit.jsonl, review_queue.jsonl}
/// ```
#[derive(Debug, Clone)]
pub struct StateRoot {
    root: PathBuf,
}

impl StateRoot {
    /// Wrap a root directory, creating the full layout beneath it.
    pub fn create(root: impl Into<PathBuf>) -> PathResult<Self> {
        let this = Self { root: root.into() };
        for dir in [
            this.root.clone(),
            this.organizations_dir(),
            this.roles_dir(),
            this.reports_dir(),
            this.reports_archive_dir(),
            this.workflows_dir(),
            this.memory_dir(),
            this.ontology_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| PathError::CreateDir {
                path: dir.display().to_string(),
                source: e,
            })?;
        }
        Ok(this)
    }

    /// The root directory itself.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn slot_taxonomy(&self) -> PathBuf {
        self.root.join("slot_taxonomy.json")
    }

    pub fn organizations_dir(&self) -> PathBuf {
        self.root.join("organizations")
    }

    /// Sentinel record for the currently active organization.
    pub fn active_org(&self) -> PathBuf {
        self.organizations_dir().join("active.json")
    }

    pub fn roles_dir(&self) -> PathBuf {
        self.organizations_dir().join("roles")
    }

    pub fn role_profile(&self, role_id: &str) -> PathBuf {
        self.roles_dir().join(format!("{role_id}.json"))
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.organizations_dir().join("reports")
    }

    pub fn reports_archive_dir(&self) -> PathBuf {
        self.reports_dir().join("archive")
    }

    pub fn salute_latest(&self, role_id: &str) -> PathBuf {
        self.reports_dir().join(format!("{role_id}_latest.json"))
    }

    pub fn salute_archive(&self, role_id: &str, stamp: &str) -> PathBuf {
        self.reports_archive_dir()
            .join(format!("{role_id}_{stamp}.json"))
    }

    pub fn workflows_dir(&self) -> PathBuf {
        self.root.join("workflows")
    }

    pub fn workflow_library(&self) -> PathBuf {
        self.workflows_dir().join("library.json")
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.root.join("memory")
    }

    pub fn classification_config(&self) -> PathBuf {
        self.memory_dir().join("classification_config.json")
    }

    pub fn co_retrieval_log(&self) -> PathBuf {
        self.memory_dir().join("co_retrieval_log.json")
    }

    pub fn ontology_dir(&self) -> PathBuf {
        self.root.join("ontology")
    }

    pub fn ontology_schema(&self) -> PathBuf {
        self.ontology_dir().join("ontology_schema.json")
    }

    pub fn ontology_config(&self) -> PathBuf {
        self.ontology_dir().join("ontology_config.json")
    }

    pub fn relationships(&self) -> PathBuf {
        self.ontology_dir().join("relationships.jsonl")
    }

    pub fn ingestion_queue(&self) -> PathBuf {
        self.ontology_dir().join("ingestion_queue.jsonl")
    }

    pub fn resolution_audit(&self) -> PathBuf {
        self.ontology_dir().join("resolution_audit.jsonl")
    }

    pub fn review_queue(&self) -> PathBuf {
        self.ontology_dir().join("review_queue.jsonl")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_full_layout() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = StateRoot::create(dir.path()).unwrap();

        assert!(root.roles_dir().is_dir());
        assert!(root.reports_archive_dir().is_dir());
        assert!(root.workflows_dir().is_dir());
        assert!(root.memory_dir().is_dir());
        assert!(root.ontology_dir().is_dir());
        assert_eq!(
            root.salute_latest("scout"),
            root.reports_dir().join("scout_latest.json")
        );
    }
}
