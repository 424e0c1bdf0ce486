//! Tool response classification: ordered regex table, first match wins.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Fixed failure taxonomy for tool responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    NotFound,
    Permission,
    Syntax,
    Network,
    Resource,
    Dependency,
    Execution,
}

/// Classification table. Order matters: the first matching row wins, so the
/// specific kinds sit above the generic `execution` catch-all.
static PATTERNS: LazyLock<Vec<(Regex, ErrorKind)>> = LazyLock::new(|| {
    [
        (
            r"(?i)timeout|timed?\s*out|deadline exceeded|connection.*reset",
            ErrorKind::Timeout,
        ),
        (
            r"(?i)not found|no such file|does not exist|404|command not found|unknown tool",
            ErrorKind::NotFound,
        ),
        (
            r"(?i)permission denied|access denied|forbidden|403|unauthorized|401",
            ErrorKind::Permission,
        ),
        (
            r"(?i)syntax error|invalid argument|unexpected token|parse error|malformed|missing required",
            ErrorKind::Syntax,
        ),
        (
            r"(?i)connection refused|network unreachable|DNS|ECONNREFUSED|could not resolve",
            ErrorKind::Network,
        ),
        (
            r"(?i)out of memory|disk full|no space left|quota exceeded|resource exhausted",
            ErrorKind::Resource,
        ),
        (
            r"(?i)no module named|import error|ModuleNotFoundError|package.*not installed|unresolved import",
            ErrorKind::Dependency,
        ),
        (r"(?i)error|exception|failed|traceback|panicked", ErrorKind::Execution),
    ]
    .into_iter()
    .map(|(pat, kind)| (Regex::new(pat).expect("static pattern"), kind))
    .collect()
});

/// Classify a tool response message. `None` means success.
pub fn classify_response(message: &str) -> Option<ErrorKind> {
    if message.is_empty() {
        return None;
    }
    PATTERNS
        .iter()
        .find(|(re, _)| re.is_match(message))
        .map(|(_, kind)| *kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_match_wins_over_generic() {
        // "error" also matches the execution catch-all; the specific row
        // earlier in the table must win.
        assert_eq!(
            classify_response("Error: permission denied for /etc/shadow"),
            Some(ErrorKind::Permission)
        );
        assert_eq!(
            classify_response("error: connection timed out after 30s"),
            Some(ErrorKind::Timeout)
        );
    }

    #[test]
    fn success_is_none() {
        assert_eq!(classify_response("wrote 3 files, all tests passing"), None);
        assert_eq!(classify_response(""), None);
    }

    #[test]
    fn each_kind_classifies() {
        let cases = [
            ("deadline exceeded", ErrorKind::Timeout),
            ("bash: foo: command not found", ErrorKind::NotFound),
            ("HTTP 403 Forbidden", ErrorKind::Permission),
            ("SyntaxError: unexpected token", ErrorKind::Syntax),
            ("connect ECONNREFUSED 127.0.0.1:5432", ErrorKind::Network),
            ("no space left on device", ErrorKind::Resource),
            ("ModuleNotFoundError: requests", ErrorKind::Dependency),
            ("Traceback (most recent call last)", ErrorKind::Execution),
        ];
        for (msg, kind) in cases {
            assert_eq!(classify_response(msg), Some(kind), "message: {msg}");
        }
    }
}
