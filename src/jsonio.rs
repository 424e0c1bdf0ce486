//! Small JSON/JSONL file helpers shared by the persistence layers.
//!
//! Reads degrade to `None` on missing or malformed files; the caller falls
//! back to defaults. Writes are pretty-printed JSON for single documents and
//! compact one-object-per-line for JSONL appends.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Read and parse a JSON document. Missing or malformed files yield `None`
/// with a warning (malformed only).
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let text = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&text) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "malformed state file, using defaults");
            None
        }
    }
}

/// Write a pretty-printed JSON document.
pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(value).map_err(std::io::Error::other)?;
    fs::write(path, text)
}

/// Append entries to a JSONL file, one compact object per line.
pub(crate) fn append_jsonl<T: Serialize>(path: &Path, entries: &[T]) -> std::io::Result<()> {
    if entries.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
    for entry in entries {
        let line = serde_json::to_string(entry).map_err(std::io::Error::other)?;
        writeln!(file, "{line}")?;
    }
    Ok(())
}

/// Read every parseable line of a JSONL file. Unparseable lines are skipped.
pub(crate) fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    let Ok(text) = fs::read_to_string(path) else {
        return Vec::new();
    };
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect()
}

/// Rewrite a JSONL file atomically: write to a sibling temp file, then rename.
pub(crate) fn rewrite_jsonl<T: Serialize>(path: &Path, entries: &[T]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("jsonl.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        for entry in entries {
            let line = serde_json::to_string(entry).map_err(std::io::Error::other)?;
            writeln!(file, "{line}")?;
        }
    }
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Rec {
        id: u32,
    }

    #[test]
    fn jsonl_roundtrip_skips_bad_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("log.jsonl");

        append_jsonl(&path, &[Rec { id: 1 }, Rec { id: 2 }]).unwrap();
        std::fs::write(
            &path,
            format!("{}\nnot json\n", std::fs::read_to_string(&path).unwrap().trim_end()),
        )
        .unwrap();

        let recs: Vec<Rec> = read_jsonl(&path);
        assert_eq!(recs, vec![Rec { id: 1 }, Rec { id: 2 }]);
    }

    #[test]
    fn read_json_missing_is_none() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing: Option<Rec> = read_json(&dir.path().join("nope.json"));
        assert!(missing.is_none());
    }

    #[test]
    fn rewrite_is_atomic_rename() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rels.jsonl");
        rewrite_jsonl(&path, &[Rec { id: 9 }]).unwrap();
        assert!(!path.with_extension("jsonl.tmp").exists());
        let recs: Vec<Rec> = read_jsonl(&path);
        assert_eq!(recs.len(), 1);
    }
}
