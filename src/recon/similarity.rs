//! Text normalization and description similarity for the matching engine.
//!
//! Similarity is a Dice coefficient over normalized token sets: lowercase,
//! punctuation folded to spaces, whitespace collapsed. Deliberately simple —
//! the engine must stay deterministic, and the accept threshold is
//! configuration, not a property of the algorithm.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

/// Business-name suffixes folded away when normalizing vendor names.
const VENDOR_SUFFIXES: &[&str] = &[
    "incorporated",
    "company",
    "corp",
    "inc",
    "llc",
    "ltd",
    "co",
];

fn non_word() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\s]").expect("static regex"))
}

fn whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize_text(input: &str) -> String {
    let lower = input.to_lowercase();
    let depunct = non_word().replace_all(&lower, " ");
    whitespace().replace_all(depunct.trim(), " ").to_string()
}

/// Normalize a vendor name for comparison: fold case/whitespace/punctuation
/// and drop common legal suffixes ("Acme Corp." and "ACME, Inc" both
/// normalize to "acme").
pub fn normalize_vendor(name: &str) -> String {
    normalize_text(name)
        .split(' ')
        .filter(|t| !VENDOR_SUFFIXES.contains(t))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Dice coefficient over normalized token sets, in `[0, 1]`.
pub fn description_similarity(a: &str, b: &str) -> f32 {
    let norm_a = normalize_text(a);
    let norm_b = normalize_text(b);
    let tokens_a: HashSet<&str> = norm_a.split(' ').filter(|t| !t.is_empty()).collect();
    let tokens_b: HashSet<&str> = norm_b.split(' ').filter(|t| !t.is_empty()).collect();

    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let shared = tokens_a.intersection(&tokens_b).count();
    (2.0 * shared as f32) / (tokens_a.len() + tokens_b.len()) as f32
}
