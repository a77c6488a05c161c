//! AC name normalization and matching
//!
//! Every place that resolves a free-text constituency name goes through this
//! module so the bundled loader, the reference cache and the CLI agree on which
//! entry a name refers to. Matching is tiered and deterministic: the first tier
//! that matches anything wins, and within a tier the first candidate in input
//! order wins. There is no scoring.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static PARENTHETICAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\([^)]*\)").expect("valid regex"));

/// Known spelling variants, keyed by [`normalize_name`] output, mapped to the
/// master-data spelling
static AC_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("cooch behar uttar", "COOCHBEHAR UTTAR (SC)"),
        ("cooch behar north", "COOCHBEHAR UTTAR (SC)"),
        ("coochbehar north", "COOCHBEHAR UTTAR (SC)"),
        ("cooch behar dakshin", "COOCHBEHAR DAKSHIN"),
        ("cooch behar south", "COOCHBEHAR DAKSHIN"),
        ("coochbehar south", "COOCHBEHAR DAKSHIN"),
        ("alipurduar", "ALIPURDUARS"),
        ("dabgram phulbari", "DABGRAM-PHULBARI"),
        ("dabgram-phulbari", "DABGRAM-PHULBARI"),
        ("matigara naxalbari", "MATIGARA-NAXALBARI (SC)"),
        ("matigara-naxalbari", "MATIGARA-NAXALBARI (SC)"),
        ("sitalkuchi", "SITALKUCHI (SC)"),
        ("sitalkuchhi", "SITALKUCHI (SC)"),
        ("mathabhanga", "MATHABHANGA (SC)"),
        ("mathbhanga", "MATHABHANGA (SC)"),
    ])
});

/// Which tier produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchTier {
    /// Case-insensitive equality after whitespace normalization
    Exact,
    /// One name contains the other
    Contains,
    /// Equality once parenthetical suffixes such as "(SC)" are removed
    Stripped,
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercase with whitespace collapsed
pub fn normalize_basic(s: &str) -> String {
    collapse_whitespace(&s.to_lowercase())
}

pub fn strip_parenthetical(s: &str) -> String {
    collapse_whitespace(&PARENTHETICAL.replace_all(s, " "))
}

/// Lowercase, parenthetical suffixes removed, whitespace collapsed
pub fn normalize_name(s: &str) -> String {
    normalize_basic(&strip_parenthetical(s))
}

/// Master-data spelling for a known variant, if there is one
pub fn canonical_ac_name(name: &str) -> Option<&'static str> {
    AC_ALIASES.get(normalize_name(name).as_str()).copied()
}

/// The alias-table spelling of `name`, or `name` trimmed
pub fn resolve_alias(name: &str) -> String {
    match canonical_ac_name(name) {
        Some(canonical) => canonical.to_string(),
        None => name.trim().to_string(),
    }
}

/// True for identifiers that are AC numbers rather than names
pub fn is_numeric_identifier(s: &str) -> bool {
    let s = s.trim();
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

/// Best candidate for `query`, as an index into `candidates`
///
/// The query is first rewritten through the alias table, then the tiers are
/// tried in order over the whole candidate list.
pub fn best_match<S: AsRef<str>>(query: &str, candidates: &[S]) -> Option<(usize, MatchTier)> {
    let query = resolve_alias(query);
    let wanted = normalize_basic(&query);
    if wanted.is_empty() {
        return None;
    }

    let basic: Vec<String> = candidates
        .iter()
        .map(|c| normalize_basic(c.as_ref()))
        .collect();

    if let Some(i) = basic.iter().position(|c| *c == wanted) {
        return Some((i, MatchTier::Exact));
    }

    if let Some(i) = basic
        .iter()
        .position(|c| !c.is_empty() && (c.contains(&wanted) || wanted.contains(c.as_str())))
    {
        return Some((i, MatchTier::Contains));
    }

    let stripped = normalize_name(&query);
    if stripped.is_empty() {
        return None;
    }
    candidates
        .iter()
        .position(|c| normalize_name(c.as_ref()) == stripped)
        .map(|i| (i, MatchTier::Stripped))
}

/// A cached reference entry as seen by [`match_cached_entry`]
#[derive(Debug, Clone, Copy)]
pub struct CachedEntryRef<'a> {
    /// AC identifier part of the composite key (name or number)
    pub identifier: &'a str,
    /// Display name stored with the entry
    pub display_name: Option<&'a str>,
}

/// Fallback lookup over cached entries after an exact key miss
///
/// Tiers: (1) normalized display name equals the normalized search term;
/// (2) the entry is keyed by AC number and its display name contains, or is
/// contained by, the search term; (3) the normalized identifier equals the
/// normalized search term.
pub fn match_cached_entry(search: &str, entries: &[CachedEntryRef<'_>]) -> Option<usize> {
    let wanted = normalize_name(&resolve_alias(search));
    if wanted.is_empty() {
        return None;
    }

    let display = |e: &CachedEntryRef<'_>| e.display_name.map(normalize_name);

    if let Some(i) = entries
        .iter()
        .position(|e| display(e).is_some_and(|d| d == wanted))
    {
        return Some(i);
    }

    if let Some(i) = entries.iter().position(|e| {
        is_numeric_identifier(e.identifier)
            && display(e)
                .is_some_and(|d| !d.is_empty() && (d.contains(&wanted) || wanted.contains(&d)))
    }) {
        return Some(i);
    }

    entries
        .iter()
        .position(|e| normalize_name(e.identifier) == wanted)
}
