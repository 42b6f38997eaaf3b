//! Name normalization shared by the taxonomy cache and tag enrichment.

use std::collections::HashSet;

/// Legal-entity suffixes dropped from the end of organisation names.
const COMPANY_SUFFIXES: &[&str] = &[
    "ltd",
    "limited",
    "inc",
    "incorporated",
    "gmbh",
    "llc",
    "plc",
    "corp",
    "corporation",
    "co",
    "company",
    "sa",
    "spa",
    "sarl",
    "bv",
    "oy",
    "ab",
    "as",
];

/// Lowercase and collapse whitespace.
pub fn normalize_simple(value: &str) -> String {
    value
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Organisation-name key: lowercase, ASCII alphanumerics and whitespace only,
/// trailing company suffixes removed.
pub fn normalize_name(value: &str) -> String {
    let cleaned: String = value
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace())
        .collect();
    let mut parts: Vec<&str> = cleaned.split_whitespace().collect();
    while parts.last().is_some_and(|p| COMPANY_SUFFIXES.contains(p)) {
        parts.pop();
    }
    parts.join(" ")
}

/// Trim, drop empties and remove case-insensitive duplicates, keeping the
/// first spelling and the original order.
pub fn dedupe_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut output = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim();
        if tag.is_empty() {
            continue;
        }
        if seen.insert(tag.to_lowercase()) {
            output.push(tag.to_string());
        }
    }
    output
}
