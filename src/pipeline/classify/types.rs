use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ClassifyError;

/// Metadata proposed by the classifier for one document.
///
/// Every field is already trimmed; blanks mean "no value".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub title: String,
    pub correspondent: String,
    pub tags: Vec<String>,
    pub document_date: String,
    pub document_type: String,
    pub language: String,
    pub person: String,
}

impl ClassificationResult {
    /// No usable field and no usable tag.
    pub fn is_empty(&self) -> bool {
        self.tags.iter().all(|t| t.trim().is_empty())
            && [
                &self.title,
                &self.correspondent,
                &self.document_date,
                &self.document_type,
                &self.language,
                &self.person,
            ]
            .iter()
            .all(|v| v.trim().is_empty())
    }
}

/// Document types that carry no information.
const GENERIC_DOCUMENT_TYPES: &[&str] = &[
    "document",
    "documents",
    "other",
    "misc",
    "miscellaneous",
    "unknown",
    "general",
    "unspecified",
    "n/a",
    "na",
    "none",
];

/// True for an empty or placeholder document type.
pub fn is_generic_document_type(value: &str) -> bool {
    let normalized = super::normalize::normalize_simple(value);
    normalized.is_empty() || GENERIC_DOCUMENT_TYPES.contains(&normalized.as_str())
}

// ──────────────────────────────────────────────
// Response parsing
// ──────────────────────────────────────────────

/// Parse a model reply into a result.
///
/// Accepts bare JSON or JSON wrapped in prose (the outermost `{...}` slice is
/// tried second). The top level must be an object.
pub fn parse_classification_response(text: &str) -> Result<ClassificationResult, ClassifyError> {
    let value = serde_json::from_str::<Value>(text).or_else(|first_err| {
        match (text.find('{'), text.rfind('}')) {
            (Some(start), Some(end)) if end > start => {
                serde_json::from_str::<Value>(&text[start..=end])
                    .map_err(|e| ClassifyError::InvalidResponse(e.to_string()))
            }
            _ => Err(ClassifyError::InvalidResponse(first_err.to_string())),
        }
    })?;

    let Value::Object(map) = value else {
        return Err(ClassifyError::InvalidResponse(
            "classification response is not a JSON object".into(),
        ));
    };

    let get_str = |key: &str| -> String { map.get(key).map(stringify).unwrap_or_default() };

    let tags = match map.get("tags") {
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        Some(Value::Array(items)) => items
            .iter()
            .map(stringify)
            .filter(|t| !t.is_empty())
            .collect(),
        _ => Vec::new(),
    };

    Ok(ClassificationResult {
        title: get_str("title"),
        correspondent: get_str("correspondent"),
        tags,
        document_date: get_str("document_date"),
        document_type: get_str("document_type"),
        language: get_str("language"),
        person: get_str("person"),
    })
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        other => other.to_string().trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json() {
        let result = parse_classification_response(
            r#"{"title":" Power bill ","correspondent":"Acme","tags":["Utilities"," "],
                "document_date":"2024-03-01","document_type":"Invoice","language":"en","person":""}"#,
        )
        .unwrap();
        assert_eq!(result.title, "Power bill");
        assert_eq!(result.tags, vec!["Utilities"]);
        assert_eq!(result.document_date, "2024-03-01");
    }

    #[test]
    fn parses_json_inside_prose() {
        let result =
            parse_classification_response("Sure! {\"title\": \"x\", \"tags\": \"one\"} hope that helps")
                .unwrap();
        assert_eq!(result.title, "x");
        assert_eq!(result.tags, vec!["one"]);
    }

    #[test]
    fn non_string_values_are_stringified() {
        let result =
            parse_classification_response(r#"{"title": 42, "tags": [2024, null, "a"], "person": null}"#)
                .unwrap();
        assert_eq!(result.title, "42");
        assert_eq!(result.tags, vec!["2024", "a"]);
        assert_eq!(result.person, "");
    }

    #[test]
    fn rejects_non_object_and_garbage() {
        assert!(parse_classification_response("[1, 2]").is_err());
        assert!(parse_classification_response("no json here").is_err());
    }

    #[test]
    fn empty_detection() {
        assert!(ClassificationResult::default().is_empty());
        let only_blank_tags = ClassificationResult {
            tags: vec!["  ".into()],
            ..Default::default()
        };
        assert!(only_blank_tags.is_empty());
        let with_title = ClassificationResult {
            title: "x".into(),
            ..Default::default()
        };
        assert!(!with_title.is_empty());
    }

    #[test]
    fn generic_types() {
        assert!(is_generic_document_type(""));
        assert!(is_generic_document_type("  Other "));
        assert!(is_generic_document_type("N/A"));
        assert!(!is_generic_document_type("Invoice"));
    }
}
