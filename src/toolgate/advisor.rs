//! Fallback advice: a static `(tool, error kind) → guidance` table consulted
//! when a tool keeps failing, plus the step-back advisory when failures
//! accumulate across tools.

use super::classify::ErrorKind;
use super::failure::FailureTracker;
use crate::config::ToolGateConfig;

/// Wildcard matcher in the advice table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Match {
    Tool(&'static str),
    AnyTool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KindMatch {
    Kind(ErrorKind),
    AnyKind,
}

/// Advice rows. Lookup order for `(tool, kind)`: exact, then
/// `(tool, any)`, then `(any, kind)`.
const FALLBACK_TABLE: &[(Match, KindMatch, &str)] = &[
    (
        Match::Tool("code_execution_tool"),
        KindMatch::Kind(ErrorKind::Syntax),
        "The code has syntax errors. Review the code for typos, missing quotes, \
         unmatched brackets, or incorrect indentation before retrying.",
    ),
    (
        Match::Tool("code_execution_tool"),
        KindMatch::Kind(ErrorKind::Dependency),
        "A required package is missing. Install it first, then retry the original command.",
    ),
    (
        Match::Tool("code_execution_tool"),
        KindMatch::Kind(ErrorKind::Timeout),
        "The command timed out. Consider: break it into smaller steps, add a timeout flag, \
         or check if a process is hanging.",
    ),
    (
        Match::Tool("code_execution_tool"),
        KindMatch::Kind(ErrorKind::Permission),
        "Permission denied. Try: check file ownership, or verify you are operating in the \
         correct directory.",
    ),
    (
        Match::Tool("code_execution_tool"),
        KindMatch::Kind(ErrorKind::NotFound),
        "Command or file not found. Verify: correct path, correct spelling, command is installed.",
    ),
    (
        Match::Tool("knowledge_tool"),
        KindMatch::Kind(ErrorKind::NotFound),
        "No relevant knowledge found. Try: broaden your search terms, use fewer keywords, \
         or try alternative phrasing.",
    ),
    (
        Match::Tool("knowledge_tool"),
        KindMatch::AnyKind,
        "Knowledge tool failed. Consider searching the filesystem directly, or ask the user \
         for clarification.",
    ),
    (
        Match::Tool("call_subordinate"),
        KindMatch::Kind(ErrorKind::Timeout),
        "Subordinate agent timed out. Consider: simplify the delegated task, break it into \
         smaller subtasks, or handle it directly.",
    ),
    (
        Match::Tool("call_subordinate"),
        KindMatch::AnyKind,
        "Subordinate failed. Consider: handle the task directly instead of delegating, or \
         rephrase the instruction more precisely.",
    ),
    (
        Match::AnyTool,
        KindMatch::Kind(ErrorKind::Timeout),
        "Operation timed out. Break the task into smaller steps and retry.",
    ),
    (
        Match::AnyTool,
        KindMatch::Kind(ErrorKind::Permission),
        "Access denied. Check permissions and paths before retrying.",
    ),
    (
        Match::AnyTool,
        KindMatch::Kind(ErrorKind::NotFound),
        "Target not found. Verify names, paths, and spelling.",
    ),
    (
        Match::AnyTool,
        KindMatch::Kind(ErrorKind::Syntax),
        "Invalid syntax or arguments. Review the command format and retry.",
    ),
    (
        Match::AnyTool,
        KindMatch::Kind(ErrorKind::Network),
        "Network issue detected. Verify connectivity before retrying.",
    ),
    (
        Match::AnyTool,
        KindMatch::Kind(ErrorKind::Dependency),
        "Missing dependency. Install required packages first.",
    ),
    (
        Match::AnyTool,
        KindMatch::Kind(ErrorKind::Resource),
        "System resource limit hit. Free resources before retrying.",
    ),
    (
        Match::AnyTool,
        KindMatch::Kind(ErrorKind::Execution),
        "Execution error. Review the error message carefully, identify the root cause, \
         and adjust your approach.",
    ),
];

/// Advisory injected when failures accumulate across the whole ring.
pub const STEP_BACK_ADVICE: &str =
    "Multiple tool failures detected. Stop and reassess your approach. Consider: \
     (1) Is there a simpler way to accomplish this task? \
     (2) Are you missing information you should ask the user about? \
     (3) Would a different tool or method work better?";

/// Look up advice for a failing tool: exact pair, then tool wildcard, then
/// kind wildcard.
pub fn lookup(tool_name: &str, kind: ErrorKind) -> Option<&'static str> {
    let tool_matches = |m: &Match| matches!(m, Match::Tool(t) if *t == tool_name);
    let kind_matches = |m: &KindMatch| matches!(m, KindMatch::Kind(k) if *k == kind);

    let exact = FALLBACK_TABLE
        .iter()
        .find(|(t, k, _)| tool_matches(t) && kind_matches(k));
    let tool_any = FALLBACK_TABLE
        .iter()
        .find(|(t, k, _)| tool_matches(t) && *k == KindMatch::AnyKind);
    let any_kind = FALLBACK_TABLE
        .iter()
        .find(|(t, k, _)| *t == Match::AnyTool && kind_matches(k));
    exact.or(tool_any).or(any_kind).map(|(_, _, advice)| *advice)
}

/// Collect advice for the tool about to run.
pub fn advise(tracker: &FailureTracker, tool_name: &str, config: &ToolGateConfig) -> Vec<String> {
    let mut advice = Vec::new();

    if tracker.consecutive(tool_name) >= config.tool_threshold {
        if let Some(record) = tracker.last_failure_of(tool_name) {
            if let Some(text) = lookup(tool_name, record.error_kind) {
                advice.push(text.to_string());
            }
        }
    }

    if tracker.recent_count(config.global_threshold) >= config.global_threshold {
        advice.push(STEP_BACK_ADVICE.to_string());
    }

    advice
}

/// Reflection block appended to a failing tool's error message once the same
/// tool has failed repeatedly; the model must answer before acting again.
pub fn reflection_block(tool_name: &str, count: u32) -> String {
    format!(
        "\n---\nREFLECTION REQUIRED — Tool \"{tool_name}\" has failed {count} consecutive times.\n\
         Before attempting any action, answer in your thoughts:\n\
         1. What specifically caused the failure?\n\
         2. Are you using the right tool for this step?\n\
         3. What will you do differently this time?\n\
         Only after answering these questions, take your next action.\n---"
    )
}
