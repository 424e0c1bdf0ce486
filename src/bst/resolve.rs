//! Slot resolvers: pure functions over the message, recent history, and the
//! slot definition. Each returns the first value it can justify, or `None`.

use std::sync::LazyLock;

use regex::Regex;

use super::taxonomy::{ResolverKind, SlotDef, SlotType, TaxonomyGlobals};

static RE_FILE_BACKTICK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]+\.[a-zA-Z]{1,5})`").unwrap());
static RE_FILE_QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]+\.[a-zA-Z]{1,5})""#).unwrap());
static RE_FILE_BARE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\S+\.[a-zA-Z]{1,5})\b").unwrap());
static RE_PATH_ABS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(/[a-zA-Z0-9_.-]+(?:/[a-zA-Z0-9_.-]+)+)").unwrap());
static RE_PATH_HOME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(~/[a-zA-Z0-9_./-]+)").unwrap());
static RE_ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"`([^`]+)`|"([^"]+)"|'([^']+)'"#).unwrap());

/// How many recent messages the history-backed resolvers look at.
pub const MAX_HISTORY_SCAN: usize = 8;

/// Run one resolver against the message and history.
pub fn run_resolver(
    kind: ResolverKind,
    slot_name: &str,
    def: &SlotDef,
    message: &str,
    history: &[String],
    globals: &TaxonomyGlobals,
) -> Option<String> {
    match kind {
        ResolverKind::KeywordMap => keyword_map(def, message),
        ResolverKind::FileExtensionInference => file_extension(message, history, globals),
        ResolverKind::LastMentionedFile => last_file(message, history),
        ResolverKind::LastMentionedPath => last_path(message, history),
        ResolverKind::LastMentionedEntity => last_entity(message),
        ResolverKind::HistoryScan => history_scan(slot_name, history),
        ResolverKind::ContextInference => context_inference(def, message, globals),
    }
}

/// Resolve a slot through its full chain, falling back to the default.
pub fn resolve_slot(
    slot_name: &str,
    def: &SlotDef,
    message: &str,
    history: &[String],
    globals: &TaxonomyGlobals,
) -> Option<String> {
    for kind in &def.resolvers {
        if let Some(v) = run_resolver(*kind, slot_name, def, message, history, globals) {
            return Some(v);
        }
    }
    def.default.clone()
}

fn keyword_map(def: &SlotDef, message: &str) -> Option<String> {
    let lower = message.to_lowercase();
    def.keyword_map
        .iter()
        .find(|(keyword, _)| lower.contains(keyword.as_str()))
        .map(|(_, value)| value.clone())
}

fn file_extension(message: &str, history: &[String], globals: &TaxonomyGlobals) -> Option<String> {
    let text = combined(message, history, MAX_HISTORY_SCAN);
    globals
        .file_extensions
        .iter()
        .find(|(ext, _)| text.contains(ext.as_str()))
        .map(|(_, lang)| lang.clone())
}

fn last_file(message: &str, history: &[String]) -> Option<String> {
    let text = combined(message, history, 3);
    for re in [&*RE_FILE_BACKTICK, &*RE_FILE_QUOTED, &*RE_FILE_BARE] {
        if let Some(m) = re.captures_iter(&text).last() {
            return Some(m[1].to_string());
        }
    }
    None
}

fn last_path(message: &str, history: &[String]) -> Option<String> {
    let text = combined(message, history, 3);
    for re in [&*RE_PATH_ABS, &*RE_PATH_HOME] {
        if let Some(m) = re.captures_iter(&text).last() {
            return Some(m[1].to_string());
        }
    }
    None
}

fn last_entity(message: &str) -> Option<String> {
    RE_ENTITY.captures_iter(message).last().and_then(|caps| {
        caps.iter()
            .skip(1)
            .flatten()
            .next()
            .map(|m| m.as_str().to_string())
    })
}

/// Fuzzy scan of recent history for values matching the slot's shape.
fn history_scan(slot_name: &str, history: &[String]) -> Option<String> {
    let file_like = ["file", "path", "source", "target", "script"]
        .iter()
        .any(|k| slot_name.contains(k));
    if !file_like {
        return None;
    }
    let text = history
        .iter()
        .rev()
        .take(MAX_HISTORY_SCAN)
        .cloned()
        .collect::<Vec<_>>()
        .join(" ");
    last_file(&text, &[]).or_else(|| last_path(&text, &[]))
}

/// Lightweight inline answers: language names, booleans, enum values.
fn context_inference(def: &SlotDef, message: &str, globals: &TaxonomyGlobals) -> Option<String> {
    let lower = message.to_lowercase();

    match def.slot_type {
        SlotType::Bool => {
            const NEGATIVES: [&str; 6] = ["no", "don't", "do not", "ignore", "skip", "without"];
            const POSITIVES: [&str; 7] = [
                "yes",
                "always",
                "definitely",
                "make sure",
                "keep",
                "preserve",
                "maintain",
            ];
            if NEGATIVES.iter().any(|w| lower.contains(w)) {
                return Some("false".to_string());
            }
            if POSITIVES.iter().any(|w| lower.contains(w)) {
                return Some("true".to_string());
            }
            None
        }
        SlotType::Enum => def
            .enum_values
            .iter()
            .find(|v| lower.contains(v.to_lowercase().as_str()))
            .cloned(),
        SlotType::String => {
            // Language mentions resolve through the extension map's values.
            globals
                .file_extensions
                .values()
                .find(|lang| lower.contains(lang.as_str()))
                .cloned()
        }
    }
}

fn combined(message: &str, history: &[String], n: usize) -> String {
    let mut parts: Vec<&str> = history
        .iter()
        .rev()
        .take(n)
        .map(String::as_str)
        .collect::<Vec<_>>();
    parts.reverse();
    parts.push(message);
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn globals() -> TaxonomyGlobals {
        TaxonomyGlobals::default()
    }

    #[test]
    fn file_refs_prefer_most_recent() {
        let got = last_file("check `a.py` then edit `b.py`", &[]);
        assert_eq!(got.as_deref(), Some("b.py"));
    }

    #[test]
    fn file_refs_come_from_history_too() {
        let history = vec!["we edited agent/auth.py earlier".to_string()];
        let got = last_file("now add the tests", &history);
        assert_eq!(got.as_deref(), Some("agent/auth.py"));
    }

    #[test]
    fn paths_resolve_absolute_and_home() {
        assert_eq!(
            last_path("logs are in /var/log/agent", &[]).as_deref(),
            Some("/var/log/agent")
        );
        assert_eq!(
            last_path("config lives at ~/agent/config", &[]).as_deref(),
            Some("~/agent/config")
        );
    }

    #[test]
    fn extension_infers_language() {
        let got = file_extension("please refactor main.rs", &[], &globals());
        assert_eq!(got.as_deref(), Some("rust"));
    }

    #[test]
    fn bool_inference_checks_negation_first() {
        let def = SlotDef {
            slot_type: SlotType::Bool,
            ..Default::default()
        };
        let g = globals();
        // "don't" wins even though "keep" also appears.
        assert_eq!(
            context_inference(&def, "don't keep the old behavior", &g),
            Some("false".to_string())
        );
        assert_eq!(
            context_inference(&def, "keep the old behavior", &g),
            Some("true".to_string())
        );
    }

    #[test]
    fn chain_falls_back_to_default() {
        let def = SlotDef {
            resolvers: vec![ResolverKind::LastMentionedFile],
            default: Some("main".to_string()),
            ..Default::default()
        };
        let got = resolve_slot("branch", &def, "merge the change", &[], &globals());
        assert_eq!(got.as_deref(), Some("main"));
    }

    #[test]
    fn enum_inference_matches_verbatim() {
        let def = SlotDef {
            slot_type: SlotType::Enum,
            enum_values: vec!["staging".to_string(), "production".to_string()],
            ..Default::default()
        };
        let got = context_inference(&def, "deploy this to staging please", &globals());
        assert_eq!(got.as_deref(), Some("staging"));
    }
}
