//! Deterministic entity resolution: preprocess → block → score → threshold
//! → transitive closure.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde_json::Value;

use super::entity::{Candidate, MergeRecord, ResolvedEntity};
use super::queues::{AuditEntry, ReviewEntry};
use crate::config::{ResolutionConfig, ScoringWeights};

// ---------------------------------------------------------------------------
// Stage 1: preprocessing
// ---------------------------------------------------------------------------

static HONORIFICS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(mr|mrs|ms|dr|prof|jr|sr|iii|ii|iv|esq|phd|md|dds|dvm|jd)\b\.?").unwrap()
});

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Address abbreviation expansions, applied in order.
static ADDR_REPLACEMENTS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)\bst\b", "street"),
        (r"(?i)\bave\b", "avenue"),
        (r"(?i)\bblvd\b", "boulevard"),
        (r"(?i)\bdr\b", "drive"),
        (r"(?i)\bln\b", "lane"),
        (r"(?i)\brd\b", "road"),
        (r"(?i)\bcorp\b", "corporation"),
        (r"(?i)\binc\b", "incorporated"),
        (r"(?i)\bllc\b", "llc"),
        (r"(?i)\bco\b", "company"),
        (r"(?i)\bltd\b", "limited"),
        (r"(?i)\bplc\b", "plc"),
        (r"(?i)\bintl\b", "international"),
    ]
    .into_iter()
    .map(|(pat, rep)| (Regex::new(pat).expect("static pattern"), rep))
    .collect()
});

/// Identifier property names recognized during extraction.
const IDENTIFIER_FIELDS: [&str; 14] = [
    "ein",
    "duns",
    "ticker",
    "lei",
    "registration_number",
    "ssn_last4",
    "passport",
    "npi",
    "isin",
    "cusip",
    "sedol",
    "contract_id",
    "fec_id",
    "lobbyist_id",
];

/// Lowercase, strip honorifics and suffixes, collapse whitespace.
pub fn normalize_name(name: &str) -> String {
    let lower = name.to_lowercase();
    let stripped = HONORIFICS.replace_all(&lower, "");
    WHITESPACE.replace_all(stripped.trim(), " ").to_string()
}

/// Expand abbreviations, lowercase, collapse whitespace.
pub fn canonicalize_address(addr: &str) -> String {
    let mut out = addr.to_lowercase();
    for (pattern, replacement) in ADDR_REPLACEMENTS.iter() {
        out = pattern.replace_all(&out, *replacement).to_string();
    }
    WHITESPACE.replace_all(out.trim(), " ").to_string()
}

/// Parse a date string in the formats sources actually emit.
pub fn normalize_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    for fmt in ["%Y-%m-%d", "%m/%d/%Y", "%m-%d-%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    // Year only.
    if s.len() == 4 {
        if let Ok(year) = s.parse::<i32>() {
            return NaiveDate::from_ymd_opt(year, 1, 1);
        }
    }
    for fmt in ["%B %d, %Y", "%b %d, %Y", "%d %B %Y", "%d %b %Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    None
}

/// Extract recognized identifiers from candidate properties, including a
/// nested `identifiers` map.
pub fn extract_identifiers(properties: &BTreeMap<String, Value>) -> BTreeMap<String, String> {
    let mut ids = BTreeMap::new();
    for (key, value) in properties {
        let k = key.to_lowercase();
        if IDENTIFIER_FIELDS.contains(&k.as_str()) {
            if let Some(v) = value_as_string(value) {
                ids.insert(k, v.trim().to_lowercase());
            }
        }
    }
    if let Some(Value::Object(map)) = properties.get("identifiers") {
        for (key, value) in map {
            if let Some(v) = value_as_string(value) {
                ids.insert(key.to_lowercase(), v.trim().to_lowercase());
            }
        }
    }
    ids
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Normalized view of one candidate.
#[derive(Debug, Clone, Default)]
pub struct Normalized {
    pub name: String,
    pub aliases: Vec<String>,
    pub address: String,
    pub dates: Vec<NaiveDate>,
    pub identifiers: BTreeMap<String, String>,
}

/// Normalize every comparable field of a candidate.
pub fn preprocess(candidate: &Candidate) -> Normalized {
    let address = candidate
        .str_prop("address")
        .or_else(|| candidate.str_prop("location"))
        .unwrap_or("");
    let dates = ["date", "date_of_birth", "start_date", "filing_date", "effective_date"]
        .iter()
        .filter_map(|k| candidate.str_prop(k))
        .filter_map(normalize_date)
        .collect();
    Normalized {
        name: normalize_name(candidate.name()),
        aliases: candidate.aliases().iter().map(|a| normalize_name(a)).collect(),
        address: canonicalize_address(address),
        dates,
        identifiers: extract_identifiers(&candidate.properties),
    }
}

// ---------------------------------------------------------------------------
// Stage 2: blocking
// ---------------------------------------------------------------------------

/// Metaphone-lite key: vowels collapse to V, common digraphs simplify,
/// repeated consonants deduplicate; first four characters.
pub fn phonetic_key(name: &str) -> String {
    if name.len() < 2 {
        return name.to_uppercase();
    }
    let mut s = name.to_uppercase();
    s = s.replace("PH", "F").replace("CK", "K").replace("SCH", "S");
    let mut out = String::new();
    let mut last: Option<char> = None;
    for c in s.chars() {
        if !c.is_ascii_alphabetic() {
            continue;
        }
        let mapped = if "AEIOU".contains(c) { 'V' } else { c };
        if last == Some(mapped) && mapped != 'V' {
            continue;
        }
        out.push(mapped);
        last = Some(mapped);
    }
    out.chars().take(4).collect()
}

/// Candidate index pairs sharing at least one block: exact identifier,
/// name-prefix + type, or phonetic key + type.
pub fn candidate_pairs(candidates: &[Candidate], normalized: &[Normalized]) -> BTreeSet<(usize, usize)> {
    let mut blocks: BTreeMap<String, Vec<usize>> = BTreeMap::new();

    for (i, norm) in normalized.iter().enumerate() {
        let entity_type = &candidates[i].entity_type;

        for (id_key, id_val) in &norm.identifiers {
            blocks
                .entry(format!("id:{id_key}:{id_val}"))
                .or_default()
                .push(i);
        }

        if !norm.name.is_empty() {
            let prefix: String = norm.name.chars().take(3).collect();
            blocks
                .entry(format!("np:{entity_type}:{prefix}"))
                .or_default()
                .push(i);
            for alias in norm.aliases.iter().take(3) {
                if !alias.is_empty() {
                    let prefix: String = alias.chars().take(3).collect();
                    blocks
                        .entry(format!("np:{entity_type}:{prefix}"))
                        .or_default()
                        .push(i);
                }
            }
            let phon = phonetic_key(&norm.name);
            if !phon.is_empty() {
                blocks
                    .entry(format!("ph:{entity_type}:{phon}"))
                    .or_default()
                    .push(i);
            }
        }
    }

    let mut pairs = BTreeSet::new();
    for indices in blocks.values() {
        for a in 0..indices.len() {
            for b in (a + 1)..indices.len() {
                let (i, j) = (indices[a].min(indices[b]), indices[a].max(indices[b]));
                if i != j {
                    pairs.insert((i, j));
                }
            }
        }
    }
    pairs
}

// ---------------------------------------------------------------------------
// Stage 3: scoring
// ---------------------------------------------------------------------------

/// Longest-common-subsequence similarity ratio: `2·lcs / (|a| + |b|)`.
pub fn subsequence_ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev = vec![0_usize; b.len() + 1];
    let mut curr = vec![0_usize; b.len() + 1];
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            curr[j] = if a[i - 1] == b[j - 1] {
                prev[j - 1] + 1
            } else {
                prev[j].max(curr[j - 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    let lcs = prev[b.len()] as f64;
    2.0 * lcs / (a.len() + b.len()) as f64
}

fn name_score(a: &Normalized, b: &Normalized) -> f64 {
    let names_a: Vec<&String> = std::iter::once(&a.name).chain(a.aliases.iter()).collect();
    let names_b: Vec<&String> = std::iter::once(&b.name).chain(b.aliases.iter()).collect();
    let mut best = 0.0_f64;
    for na in &names_a {
        if na.is_empty() {
            continue;
        }
        for nb in &names_b {
            if nb.is_empty() {
                continue;
            }
            best = best.max(subsequence_ratio(na, nb));
        }
    }
    best
}

fn identifier_score(a: &Normalized, b: &Normalized) -> f64 {
    for (key, va) in &a.identifiers {
        if let Some(vb) = b.identifiers.get(key) {
            if !va.is_empty() && va == vb {
                return 1.0;
            }
        }
    }
    0.0
}

fn address_score(a: &Normalized, b: &Normalized) -> f64 {
    if a.address.is_empty() || b.address.is_empty() {
        return 0.0;
    }
    let ta: BTreeSet<&str> = a.address.split_whitespace().collect();
    let tb: BTreeSet<&str> = b.address.split_whitespace().collect();
    let inter = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        inter / union
    }
}

fn date_score(a: &Normalized, b: &Normalized) -> f64 {
    let mut best = 0.0_f64;
    for da in &a.dates {
        for db in &b.dates {
            let delta = (*da - *db).num_days().abs() as f64;
            best = best.max((1.0 - delta / 365.0).max(0.0));
        }
    }
    best
}

fn context_tokens(candidate: &Candidate) -> BTreeSet<String> {
    let mut tokens = BTreeSet::new();
    for hint in &candidate.relationship_hints {
        for t in normalize_name(&hint.target_hint).split_whitespace() {
            tokens.insert(t.to_string());
        }
    }
    for key in ["description", "type", "jurisdiction"] {
        if let Some(v) = candidate.str_prop(key) {
            for t in v.to_lowercase().split_whitespace() {
                tokens.insert(t.to_string());
            }
        }
    }
    tokens
}

fn context_score(a: &Candidate, b: &Candidate) -> f64 {
    let ta = context_tokens(a);
    let tb = context_tokens(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let inter = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    inter / union
}

/// Per-axis scores of one comparison.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct AxisScores {
    pub name: f64,
    pub identifier: f64,
    pub address: f64,
    pub date: f64,
    pub context: f64,
}

/// Weighted composite over the five axes.
///
/// Only comparable axes enter the denominator: an axis where either side
/// has no data (no shared identifier key, no address, no dates, no context
/// tokens) is absent evidence, not evidence of difference. Two records that
/// agree on everything they both carry can therefore still clear the merge
/// threshold. Names are always comparable.
pub fn composite_score(
    a: &Candidate,
    na: &Normalized,
    b: &Candidate,
    nb: &Normalized,
    weights: &ScoringWeights,
) -> (f64, AxisScores) {
    let axes = AxisScores {
        name: name_score(na, nb),
        identifier: identifier_score(na, nb),
        address: address_score(na, nb),
        date: date_score(na, nb),
        context: context_score(a, b),
    };

    let id_comparable = na
        .identifiers
        .keys()
        .any(|k| nb.identifiers.contains_key(k));
    let addr_comparable = !na.address.is_empty() && !nb.address.is_empty();
    let date_comparable = !na.dates.is_empty() && !nb.dates.is_empty();
    let ctx_comparable = !context_tokens(a).is_empty() && !context_tokens(b).is_empty();

    let mut numerator = weights.name * axes.name;
    let mut denominator = weights.name;
    for (comparable, weight, score) in [
        (id_comparable, weights.identifier, axes.identifier),
        (addr_comparable, weights.address, axes.address),
        (date_comparable, weights.date, axes.date),
        (ctx_comparable, weights.context, axes.context),
    ] {
        if comparable {
            numerator += weight * score;
            denominator += weight;
        }
    }
    if denominator <= 0.0 {
        return (0.0, axes);
    }
    (numerator / denominator, axes)
}

/// Threshold decision for one pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Merge,
    Review,
    Distinct,
}

pub fn decide(composite: f64, config: &ResolutionConfig) -> Decision {
    if composite >= config.merge_threshold {
        Decision::Merge
    } else if composite >= config.review_threshold {
        Decision::Review
    } else {
        Decision::Distinct
    }
}

// ---------------------------------------------------------------------------
// Stage 5: transitive closure
// ---------------------------------------------------------------------------

/// Union-find with path compression and union by rank.
#[derive(Debug)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    pub fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            let root = self.find(self.parent[x]);
            self.parent[x] = root;
        }
        self.parent[x]
    }

    pub fn union(&mut self, x: usize, y: usize) {
        let (mut rx, mut ry) = (self.find(x), self.find(y));
        if rx == ry {
            return;
        }
        if self.rank[rx] < self.rank[ry] {
            std::mem::swap(&mut rx, &mut ry);
        }
        self.parent[ry] = rx;
        if self.rank[rx] == self.rank[ry] {
            self.rank[rx] += 1;
        }
    }

    /// Groups of equivalent indices, singletons included.
    pub fn groups(&mut self) -> Vec<Vec<usize>> {
        let mut map: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..self.parent.len() {
            let root = self.find(i);
            map.entry(root).or_default().push(i);
        }
        map.into_values().collect()
    }
}

// ---------------------------------------------------------------------------
// Merge policy
// ---------------------------------------------------------------------------

/// Merge two resolved entities. The higher-confidence provenance wins on
/// conflicting scalars; aliases become a union set (canonical name
/// excluded); both provenances are preserved.
pub fn merge_entities(
    a: ResolvedEntity,
    b: ResolvedEntity,
    score: f64,
    now: DateTime<Utc>,
) -> ResolvedEntity {
    let conf = |e: &ResolvedEntity| {
        e.provenance_chain
            .iter()
            .map(|p| p.confidence)
            .fold(0.0_f64, f64::max)
    };
    let (primary, secondary) = if conf(&a) >= conf(&b) { (a, b) } else { (b, a) };

    let merged_from_a = primary
        .provenance_chain
        .first()
        .map(|p| p.record_key())
        .unwrap_or_default();
    let merged_from_b = secondary
        .provenance_chain
        .first()
        .map(|p| p.record_key())
        .unwrap_or_default();

    // Secondary first, primary overlays: primary wins conflicts.
    let mut properties = secondary.properties.clone();
    for (k, v) in &primary.properties {
        properties.insert(k.clone(), v.clone());
    }

    let canonical = properties
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let mut aliases: BTreeSet<String> = BTreeSet::new();
    for entity in [&primary, &secondary] {
        if let Some(Value::Array(list)) = entity.properties.get("aliases") {
            aliases.extend(list.iter().filter_map(Value::as_str).map(str::to_string));
        }
        if let Some(name) = entity.properties.get("name").and_then(Value::as_str) {
            aliases.insert(name.to_string());
        }
    }
    aliases.remove(&canonical);
    aliases.remove("");
    properties.insert(
        "aliases".to_string(),
        Value::from(aliases.into_iter().collect::<Vec<String>>()),
    );

    let mut relationship_hints = primary.relationship_hints.clone();
    relationship_hints.extend(secondary.relationship_hints.clone());

    let mut provenance_chain = primary.provenance_chain.clone();
    provenance_chain.extend(secondary.provenance_chain.clone());

    let mut merge_history = primary.merge_history.clone();
    merge_history.extend(secondary.merge_history.clone());
    merge_history.push(MergeRecord {
        merged_from_a,
        merged_from_b,
        score,
        timestamp: now,
    });

    ResolvedEntity {
        entity_type: primary.entity_type.clone(),
        properties,
        relationship_hints,
        provenance_chain,
        merge_history,
    }
}

// ---------------------------------------------------------------------------
// Batch pipeline
// ---------------------------------------------------------------------------

/// Result of resolving one candidate batch.
#[derive(Debug, Default)]
pub struct ResolutionOutcome {
    /// Entities produced by merging groups of two or more candidates.
    pub merged: Vec<ResolvedEntity>,
    /// Candidates that stayed singletons.
    pub distinct: Vec<ResolvedEntity>,
    /// Pairs in the review band, never auto-merged.
    pub flagged: Vec<ReviewEntry>,
    /// Every scored pair, for the audit log.
    pub audit: Vec<AuditEntry>,
}

/// The resolver: one config, pure batch runs.
#[derive(Debug, Clone)]
pub struct Resolver {
    config: ResolutionConfig,
}

impl Resolver {
    pub fn new(config: ResolutionConfig) -> Self {
        Self { config }
    }

    /// Run the full pipeline over a batch.
    pub fn resolve_batch(&self, candidates: &[Candidate], now: DateTime<Utc>) -> ResolutionOutcome {
        let mut outcome = ResolutionOutcome::default();
        if candidates.is_empty() {
            return outcome;
        }

        let normalized: Vec<Normalized> = candidates.iter().map(preprocess).collect();
        let pairs = candidate_pairs(candidates, &normalized);
        tracing::info!(
            candidates = candidates.len(),
            pairs = pairs.len(),
            "resolution batch"
        );

        let mut uf = UnionFind::new(candidates.len());
        let mut merge_scores: BTreeMap<(usize, usize), f64> = BTreeMap::new();

        for (i, j) in pairs {
            let (composite, axes) = composite_score(
                &candidates[i],
                &normalized[i],
                &candidates[j],
                &normalized[j],
                &self.config.scoring_weights,
            );
            let decision = decide(composite, &self.config);

            outcome.audit.push(AuditEntry {
                timestamp: now,
                candidate_a: candidates[i].candidate_id(),
                candidate_b: candidates[j].candidate_id(),
                composite_score: composite,
                axis_scores: axes,
                action: match decision {
                    Decision::Merge => "merge",
                    Decision::Review => "flag",
                    Decision::Distinct => "distinct",
                }
                .to_string(),
            });

            match decision {
                Decision::Merge => {
                    if self.config.transitive_closure {
                        uf.union(i, j);
                    }
                    merge_scores.insert((i, j), composite);
                }
                Decision::Review => outcome.flagged.push(ReviewEntry {
                    timestamp: now,
                    status: "pending".to_string(),
                    score: composite,
                    axis_scores: axes,
                    candidate_a: candidates[i].candidate_id(),
                    candidate_b: candidates[j].candidate_id(),
                    entity_type: candidates[i].entity_type.clone(),
                }),
                Decision::Distinct => {}
            }
        }

        if !self.config.transitive_closure {
            // Without closure, only direct pairs merge; fold each pair.
            let mut consumed = BTreeSet::new();
            for ((i, j), score) in &merge_scores {
                if consumed.contains(i) || consumed.contains(j) {
                    continue;
                }
                consumed.insert(*i);
                consumed.insert(*j);
                let merged = merge_entities(
                    ResolvedEntity::from_candidate(&candidates[*i]),
                    ResolvedEntity::from_candidate(&candidates[*j]),
                    *score,
                    now,
                );
                outcome.merged.push(merged);
            }
            for (i, c) in candidates.iter().enumerate() {
                if !consumed.contains(&i) {
                    outcome.distinct.push(ResolvedEntity::from_candidate(c));
                }
            }
            return outcome;
        }

        for group in uf.groups() {
            if group.len() == 1 {
                outcome
                    .distinct
                    .push(ResolvedEntity::from_candidate(&candidates[group[0]]));
                continue;
            }
            let mut merged = ResolvedEntity::from_candidate(&candidates[group[0]]);
            for &k in &group[1..] {
                let pair_score = merge_scores
                    .iter()
                    .find(|((i, j), _)| group.contains(i) && (*i == k || *j == k))
                    .map(|(_, s)| *s)
                    .unwrap_or(self.config.merge_threshold);
                merged = merge_entities(
                    merged,
                    ResolvedEntity::from_candidate(&candidates[k]),
                    pair_score,
                    now,
                );
            }
            outcome.merged.push(merged);
        }

        tracing::info!(
            merged = outcome.merged.len(),
            flagged = outcome.flagged.len(),
            distinct = outcome.distinct.len(),
            "resolution result"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::entity::Provenance;

    fn candidate(name: &str, props: &[(&str, &str)], source: &str, record: &str) -> Candidate {
        let mut properties: BTreeMap<String, Value> = BTreeMap::new();
        properties.insert("name".to_string(), Value::from(name));
        for (k, v) in props {
            properties.insert(k.to_string(), Value::from(*v));
        }
        Candidate {
            entity_type: "person".to_string(),
            properties,
            relationship_hints: vec![],
            provenance: Provenance {
                source_id: source.to_string(),
                record_id: record.to_string(),
                source_type: "csv".to_string(),
                ingested_at: Utc::now(),
                confidence: 0.8,
            },
            resolved: false,
        }
    }

    #[test]
    fn normalization() {
        assert_eq!(normalize_name("Dr. John A. Smith Jr."), "john a. smith");
        assert_eq!(
            canonicalize_address("123 Main St"),
            "123 main street"
        );
        assert_eq!(
            normalize_date("03/15/1990"),
            NaiveDate::from_ymd_opt(1990, 3, 15)
        );
        assert_eq!(
            normalize_date("1990"),
            NaiveDate::from_ymd_opt(1990, 1, 1)
        );
        assert_eq!(
            normalize_date("March 15, 1990"),
            NaiveDate::from_ymd_opt(1990, 3, 15)
        );
        assert_eq!(normalize_date("not a date"), None);
    }

    #[test]
    fn phonetic_keys_collapse_similar_names() {
        assert_eq!(phonetic_key("Philip"), phonetic_key("Filip"));
        assert_ne!(phonetic_key("Smith"), phonetic_key("Jones"));
    }

    #[test]
    fn subsequence_ratio_bounds() {
        assert!((subsequence_ratio("abc", "abc") - 1.0).abs() < f64::EPSILON);
        assert_eq!(subsequence_ratio("abc", "xyz"), 0.0);
        let mid = subsequence_ratio("john a. smith", "j. smith");
        assert!(mid > 0.6 && mid < 1.0, "got {mid}");
    }

    #[test]
    fn identifier_match_merges_despite_name_variation() {
        // Same EIN, abbreviated name, abbreviated street address: the
        // composite clears the merge bar on the comparable axes.
        let a = candidate(
            "John A. Smith",
            &[("address", "123 Main St"), ("ein", "12-3456789")],
            "src_a",
            "1",
        );
        let b = candidate(
            "J. Smith",
            &[("address", "123 Main Street"), ("ein", "12-3456789")],
            "src_b",
            "1",
        );

        let resolver = Resolver::new(ResolutionConfig::default());
        let out = resolver.resolve_batch(&[a, b], Utc::now());

        assert_eq!(out.merged.len(), 1);
        assert!(out.distinct.is_empty());
        let merged = &out.merged[0];
        assert_eq!(merged.provenance_chain.len(), 2);
        assert_eq!(merged.merge_history.len(), 1);
        // The non-canonical name survives as an alias.
        let aliases = merged.properties.get("aliases").unwrap();
        assert!(aliases.as_array().unwrap().iter().any(|v| {
            let s = v.as_str().unwrap();
            s == "John A. Smith" || s == "J. Smith"
        }));
        // Audit carries the decision.
        assert!(out.audit.iter().any(|e| e.action == "merge"));
    }

    #[test]
    fn review_band_flags_without_merging() {
        // Similar-but-not-identical names at the same address, with no
        // identifier to confirm: reviewable, never auto-merged.
        let a = candidate("Smithfield Group", &[("address", "123 Main St")], "s", "1");
        let b = candidate("Smith & Wesson", &[("address", "123 Main Street")], "s", "2");

        let resolver = Resolver::new(ResolutionConfig::default());
        let out = resolver.resolve_batch(&[a, b], Utc::now());

        assert!(out.merged.is_empty());
        assert_eq!(out.distinct.len(), 2);
        assert_eq!(out.flagged.len(), 1);
        assert_eq!(out.flagged[0].status, "pending");
    }

    #[test]
    fn transitive_closure_collapses_chains() {
        // A ~ B and B ~ C via shared identifiers; A and C never compared
        // directly still land in one entity with all three provenances.
        let mut b = candidate(
            "Acme Corporation",
            &[("ein", "11-1111111"), ("duns", "222222222")],
            "s",
            "2",
        );
        b.properties.insert(
            "aliases".to_string(),
            Value::from(vec!["Acme Corp", "Acme Inc"]),
        );
        let a = candidate("Acme Corp", &[("ein", "11-1111111")], "s", "1");
        let c = candidate("Acme Inc", &[("duns", "222222222")], "s", "3");

        let resolver = Resolver::new(ResolutionConfig::default());
        let out = resolver.resolve_batch(&[a, b, c], Utc::now());

        assert_eq!(out.merged.len(), 1);
        assert!(out.distinct.is_empty());
        assert_eq!(out.merged[0].provenance_chain.len(), 3);
    }

    #[test]
    fn unrelated_candidates_stay_distinct() {
        let a = candidate("Zebra Holdings", &[], "s", "1");
        let b = candidate("Quark Labs", &[], "s", "2");
        let resolver = Resolver::new(ResolutionConfig::default());
        let out = resolver.resolve_batch(&[a, b], Utc::now());
        assert!(out.merged.is_empty());
        assert_eq!(out.distinct.len(), 2);
    }
}
