use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const NO_DOCUMENT_MARKER: &str = "No pitch deck provided.";
pub const EXTRACTION_FAILED_MARKER: &str =
    "Pitch deck extraction failed. Analysis based on founder-provided information.";
pub const NO_MEANINGFUL_CONTENT_MARKER: &str = "Pitch deck extraction returned no meaningful content. Analysis is based exclusively on founder-provided information.";

const FAILURE_SENTINELS: [&str; 2] = [NO_DOCUMENT_MARKER, "Pitch deck extraction failed."];

const PLACEHOLDER_VALUES: [&str; 9] = [
    "not provided",
    "n/a",
    "na",
    "none",
    "unknown",
    "null",
    "-",
    "—",
    "",
];

pub const MIN_MEANINGFUL_FIELDS: usize = 3;
pub const MIN_PROSE_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionStats {
    pub fields_total: usize,
    pub fields_populated: usize,
    pub word_count: usize,
}

/// Whether an extraction result is worth handing to later stages.
pub fn is_meaningful_extraction(data: &str) -> bool {
    let trimmed = data.trim();

    if FAILURE_SENTINELS
        .iter()
        .any(|sentinel| trimmed.starts_with(sentinel))
    {
        return false;
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(fields)) => {
            fields.values().filter(|value| is_populated(value)).count() >= MIN_MEANINGFUL_FIELDS
        }
        _ => trimmed.chars().count() >= MIN_PROSE_CHARS,
    }
}

/// Non-gating summary numbers shown to the user after extraction.
pub fn extraction_stats(data: &str) -> ExtractionStats {
    match serde_json::from_str::<Value>(data.trim()) {
        Ok(Value::Object(fields)) => ExtractionStats {
            fields_total: fields.len(),
            fields_populated: fields.values().filter(|value| is_populated(value)).count(),
            word_count: fields
                .values()
                .filter_map(display_text)
                .map(|text| count_words(&text))
                .sum(),
        },
        _ => ExtractionStats {
            fields_total: 0,
            fields_populated: 0,
            word_count: count_words(data),
        },
    }
}

fn is_populated(value: &Value) -> bool {
    display_text(value)
        .map(|text| {
            let normalized = text.trim().to_lowercase();
            !PLACEHOLDER_VALUES.contains(&normalized.as_str())
        })
        .unwrap_or(false)
}

/// Flat text rendering of a field value; `None` for null.
fn display_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .map(|item| display_text(item).unwrap_or_default())
                .collect::<Vec<_>>()
                .join(","),
        ),
        other => Some(other.to_string()),
    }
}

fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn with_fields(populated: usize) -> String {
        let mut object = serde_json::Map::new();
        for index in 0..populated {
            object.insert(format!("field_{index}"), json!(format!("value {index}")));
        }
        object.insert("team".to_string(), json!("Not provided"));
        object.insert("market".to_string(), json!("N/A"));
        object.insert("traction".to_string(), json!(null));
        object.insert("notes".to_string(), json!("  —  "));
        Value::Object(object).to_string()
    }

    #[test]
    fn two_real_fields_are_rejected() {
        assert!(!is_meaningful_extraction(&with_fields(2)));
    }

    #[test]
    fn three_real_fields_are_accepted() {
        assert!(is_meaningful_extraction(&with_fields(3)));
    }

    #[test]
    fn sentinels_are_rejected_outright() {
        assert!(!is_meaningful_extraction(NO_DOCUMENT_MARKER));
        let long_failure = format!("{EXTRACTION_FAILED_MARKER} {}", "padding ".repeat(30));
        assert!(!is_meaningful_extraction(&long_failure));
    }

    #[test]
    fn prose_needs_minimum_length() {
        assert!(!is_meaningful_extraction("The deck mentions a team of four."));
        assert!(is_meaningful_extraction(&"The deck describes the product. ".repeat(5)));
    }

    #[test]
    fn stats_count_fields_and_words() {
        let data = json!({
            "problem": "slow invoicing for freelancers",
            "team": "unknown",
            "competitors": ["Acme Corp", "Globex"],
            "revenue": 12000,
        })
        .to_string();

        let stats = extraction_stats(&data);
        assert_eq!(stats.fields_total, 4);
        assert_eq!(stats.fields_populated, 3);
        assert_eq!(stats.word_count, 4 + 1 + 2 + 1);
    }

    #[test]
    fn stats_for_prose_only_count_words() {
        let stats = extraction_stats("three little words");
        assert_eq!(stats, ExtractionStats { fields_total: 0, fields_populated: 0, word_count: 3 });
    }
}
