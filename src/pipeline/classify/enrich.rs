//! Validation and enrichment of classifier output.
//!
//! The classifier proposes tags freely. Before they are written the list is
//! cleaned (blacklist, duplicates of other fields), capped, and topped up
//! with tags the pipeline always wants: an error marker, the OCR models, the
//! year and the default country.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{Datelike, Local, NaiveDate};
use regex::Regex;

use super::normalize::{dedupe_tags, normalize_name, normalize_simple};
use crate::pipeline::ocr::contains_redacted_marker;
use crate::paperless::CustomFieldValue;

/// Phrases in a transcription that mean the OCR output is not trustworthy.
const ERROR_PHRASES: &[&str] = &[
    "i'm sorry, i can't assist with that.",
    "i can't assist with that",
    "chatgpt refused to transcribe",
    "[redacted]",
];

/// Tag names the classifier may not set; the pipeline owns them.
const BLACKLISTED_TAGS: &[&str] = &["new", "ai", "error", "indexed"];

static MODEL_FOOTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)transcribed by model:\s*(.+)").expect("valid regex"));

pub fn needs_error_tag(text: &str) -> bool {
    let lower = text.to_lowercase();
    ERROR_PHRASES.iter().any(|p| lower.contains(p)) || contains_redacted_marker(text)
}

/// Model names listed in every `Transcribed by model:` line, first seen first.
pub fn extract_model_tags(text: &str) -> Vec<String> {
    let names = MODEL_FOOTER_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .flat_map(|m| m.as_str().split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty());
    dedupe_tags(names)
}

pub fn filter_blacklisted_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .filter(|t| !BLACKLISTED_TAGS.contains(&normalize_simple(t).as_str()))
        .cloned()
        .collect()
}

/// Drop tags that only repeat the correspondent, document type or person.
pub fn filter_redundant_tags(
    tags: &[String],
    correspondent: &str,
    document_type: &str,
    person: &str,
) -> Vec<String> {
    let corr_key = normalize_name(correspondent);
    let type_key = normalize_simple(document_type);
    let person_key = normalize_simple(person);

    tags.iter()
        .filter(|tag| {
            let simple = normalize_simple(tag);
            let name = normalize_name(tag);
            let same_corr = !corr_key.is_empty() && (corr_key == simple || corr_key == name);
            let same_type = !type_key.is_empty() && type_key == simple;
            let same_person = !person_key.is_empty() && person_key == simple;
            !(same_corr || same_type || same_person)
        })
        .cloned()
        .collect()
}

// ──────────────────────────────────────────────
// Dates and language
// ──────────────────────────────────────────────

/// Calendar date from `YYYY-MM-DD`, optionally followed by a `T...` time.
pub fn parse_iso_date(value: &str) -> Option<NaiveDate> {
    let date_part = value.trim().split('T').next().unwrap_or("").trim();
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

/// Classifier date, or `None` with a warning when it is present but invalid.
pub fn parse_document_date(value: &str) -> Option<NaiveDate> {
    if value.trim().is_empty() {
        return None;
    }
    let parsed = parse_iso_date(value);
    if parsed.is_none() {
        tracing::warn!(document_date = value, "Invalid document_date from classifier");
    }
    parsed
}

/// Date used for the year tag: the classified date, else the stored creation
/// date, else today.
pub fn resolve_date_for_tags(classified: Option<NaiveDate>, created: Option<&str>) -> NaiveDate {
    classified
        .or_else(|| created.and_then(parse_iso_date))
        .unwrap_or_else(|| Local::now().date_naive())
}

/// Two-letter language code or `und`.
pub fn normalize_language(value: &str) -> Option<String> {
    let lang = value.trim().to_lowercase();
    if lang.is_empty() {
        return None;
    }
    if lang == "und" {
        return Some(lang);
    }
    let two_letters = |s: &str| s.len() == 2 && s.chars().all(|c| c.is_ascii_alphabetic());
    if two_letters(&lang) {
        return Some(lang);
    }
    if lang.contains('-') || lang.contains('_') {
        let prefix = lang.split(['-', '_']).next().unwrap_or("");
        if two_letters(prefix) {
            return Some(prefix.to_string());
        }
    }
    Some("und".to_string())
}

// ──────────────────────────────────────────────
// Enrichment
// ──────────────────────────────────────────────

/// Final tag names for a classified document.
///
/// Required tags (error marker, OCR models, year, default country) are always
/// kept and never count against `tag_limit`. Output is lower-cased.
pub fn enrich_tags(
    tags: &[String],
    source_text: &str,
    date_for_tags: NaiveDate,
    default_country_tag: &str,
    tag_limit: usize,
) -> Vec<String> {
    let base = dedupe_tags(tags);

    let mut required = Vec::new();
    if needs_error_tag(source_text) {
        required.push("ERROR".to_string());
    }
    required.extend(extract_model_tags(source_text));
    required.push(date_for_tags.year().to_string());
    if !default_country_tag.trim().is_empty() {
        required.push(default_country_tag.trim().to_string());
    }
    let required = dedupe_tags(required);
    let required_keys: HashSet<String> = required.iter().map(|t| t.to_lowercase()).collect();

    let optional: Vec<String> = base
        .into_iter()
        .filter(|t| !required_keys.contains(&t.to_lowercase()))
        .collect();
    let before = optional.len();
    let kept: Vec<String> = optional.into_iter().take(tag_limit).collect();
    if kept.len() < before {
        tracing::warn!(
            before,
            after = kept.len(),
            limit = tag_limit,
            "Trimmed non-required tags to limit"
        );
    }

    dedupe_tags(required.into_iter().chain(kept))
        .into_iter()
        .map(|t| t.to_lowercase())
        .collect()
}

/// Set `field_id` to `value`, replacing an existing entry for the field.
pub fn upsert_custom_field(
    existing: &[CustomFieldValue],
    field_id: u32,
    value: &str,
) -> Vec<CustomFieldValue> {
    let value = serde_json::Value::String(value.to_string());
    let mut fields = existing.to_vec();
    match fields.iter_mut().find(|f| f.field == field_id) {
        Some(entry) => entry.value = value,
        None => fields.push(CustomFieldValue { field: field_id, value }),
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    // ── enrichment ──

    #[test]
    fn required_tags_survive_the_cap() {
        let text = "I can't assist with that\n\nTranscribed by model: X";
        let tags = strings(&["a", "b", "c", "d", "e"]);
        let out = enrich_tags(&tags, text, date("2023-05-01"), "Norway", 2);
        assert_eq!(out, vec!["error", "x", "2023", "norway", "a", "b"]);
    }

    #[test]
    fn zero_limit_keeps_only_required() {
        let out = enrich_tags(&strings(&["a", "b"]), "clean text", date("2021-01-01"), "", 0);
        assert_eq!(out, vec!["2021"]);
    }

    #[test]
    fn candidate_matching_required_tag_is_not_counted() {
        let out = enrich_tags(
            &strings(&["2024", "Bills", "Taxes"]),
            "Transcribed by model: gpt-5-mini, o4-mini",
            date("2024-02-02"),
            "",
            1,
        );
        assert_eq!(out, vec!["gpt-5-mini", "o4-mini", "2024", "bills"]);
    }

    #[test]
    fn model_tags_from_every_footer_line() {
        let text = "x\nTranscribed by model: a, b\ny\ntranscribed by model: b, c";
        assert_eq!(extract_model_tags(text), vec!["a", "b", "c"]);
    }

    #[test]
    fn error_tag_phrases() {
        assert!(needs_error_tag("CHATGPT REFUSED TO TRANSCRIBE"));
        assert!(needs_error_tag("name: [ Redacted ]"));
        assert!(!needs_error_tag("Invoice total 12.00"));
    }

    // ── filters ──

    #[test]
    fn blacklisted_tags_removed() {
        let out = filter_blacklisted_tags(&strings(&["New", "bills", " AI ", "Indexed"]));
        assert_eq!(out, vec!["bills"]);
    }

    #[test]
    fn redundant_tags_removed() {
        let out = filter_redundant_tags(
            &strings(&["Acme", "acme ltd", "Invoice", "John Smith", "Utilities"]),
            "ACME Ltd.",
            "invoice",
            "John  Smith",
        );
        assert_eq!(out, vec!["Utilities"]);
    }

    #[test]
    fn empty_fields_remove_nothing() {
        let tags = strings(&["a", "b"]);
        assert_eq!(filter_redundant_tags(&tags, "", "", ""), tags);
    }

    // ── dates ──

    #[test]
    fn date_parsing() {
        assert_eq!(parse_document_date("2024-03-01"), Some(date("2024-03-01")));
        assert_eq!(parse_document_date("2024-03-01T10:00:00Z"), Some(date("2024-03-01")));
        assert_eq!(parse_document_date("03/01/2024"), None);
        assert_eq!(parse_document_date(""), None);
    }

    #[test]
    fn tag_date_falls_back_to_created() {
        assert_eq!(
            resolve_date_for_tags(None, Some("2019-07-04T00:00:00+02:00")),
            date("2019-07-04")
        );
        assert_eq!(
            resolve_date_for_tags(Some(date("2020-01-01")), Some("2019-07-04")),
            date("2020-01-01")
        );
        assert_eq!(
            resolve_date_for_tags(None, Some("garbage")),
            Local::now().date_naive()
        );
    }

    // ── language ──

    #[test]
    fn language_codes() {
        assert_eq!(normalize_language(""), None);
        assert_eq!(normalize_language("EN").as_deref(), Some("en"));
        assert_eq!(normalize_language("en-US").as_deref(), Some("en"));
        assert_eq!(normalize_language("pt_BR").as_deref(), Some("pt"));
        assert_eq!(normalize_language("UND").as_deref(), Some("und"));
        assert_eq!(normalize_language("English").as_deref(), Some("und"));
        assert_eq!(normalize_language("eng-GB").as_deref(), Some("und"));
    }

    // ── custom fields ──

    #[test]
    fn custom_field_upsert() {
        let existing = vec![
            CustomFieldValue { field: 1, value: serde_json::json!("x") },
            CustomFieldValue { field: 7, value: serde_json::json!("old") },
        ];
        let updated = upsert_custom_field(&existing, 7, "Jane");
        assert_eq!(updated.len(), 2);
        assert_eq!(updated[1].value, serde_json::json!("Jane"));

        let added = upsert_custom_field(&existing, 9, "Jane");
        assert_eq!(added.len(), 3);
        assert_eq!(added[2].field, 9);
    }
}
