//! Recovery of JSON values from free-form model output.
//!
//! Strategies are tried in order: the whole text, the first fenced code
//! block, then the first balanced object/array literal embedded in prose.

use crate::error::StructuredParseError;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    Direct,
    FencedBlock,
    EmbeddedLiteral,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Structured {
    pub value: Value,
    pub strategy: ParseStrategy,
}

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"```(?:json|JSON)?\s*([\s\S]*?)```").expect("fence pattern is valid")
    })
}

pub fn parse_structured(text: &str) -> Result<Structured, StructuredParseError> {
    let trimmed = text.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(Structured {
            value,
            strategy: ParseStrategy::Direct,
        });
    }

    if let Some(block) = fence_regex()
        .captures(trimmed)
        .and_then(|capture| capture.get(1))
    {
        if let Ok(value) = serde_json::from_str::<Value>(block.as_str().trim()) {
            return Ok(Structured {
                value,
                strategy: ParseStrategy::FencedBlock,
            });
        }
    }

    if let Some(value) = first_embedded_literal(trimmed) {
        return Ok(Structured {
            value,
            strategy: ParseStrategy::EmbeddedLiteral,
        });
    }

    Err(StructuredParseError::NoStructuredContent)
}

pub fn parse_as<T: DeserializeOwned>(text: &str) -> Result<T, StructuredParseError> {
    let structured = parse_structured(text)?;
    serde_json::from_value(structured.value)
        .map_err(|error| StructuredParseError::Shape(error.to_string()))
}

/// Tries every `{` / `[` as a candidate start, in order, and returns the first
/// balanced literal that parses.
fn first_embedded_literal(text: &str) -> Option<Value> {
    text.char_indices()
        .filter(|(_, ch)| *ch == '{' || *ch == '[')
        .find_map(|(start, _)| {
            let end = balanced_end(&text[start..])?;
            serde_json::from_str(&text[start..start + end]).ok()
        })
}

/// Byte length of the balanced literal at the start of `text`, skipping
/// brackets inside string literals.
fn balanced_end(text: &str) -> Option<usize> {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (index, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(ch) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(index + ch.len_utf8());
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_json_is_parsed_directly() {
        let parsed = parse_structured("  {\"score\": 4}  ").unwrap();
        assert_eq!(parsed.strategy, ParseStrategy::Direct);
        assert_eq!(parsed.value, json!({"score": 4}));
    }

    #[test]
    fn fenced_block_is_used_when_whole_text_is_not_json() {
        let text = "Here you go:\n```json\n{\"green_flags\": [], \"red_flags\": []}\n```\nThanks";
        let parsed = parse_structured(text).unwrap();
        assert_eq!(parsed.strategy, ParseStrategy::FencedBlock);
        assert_eq!(parsed.value["red_flags"], json!([]));
    }

    #[test]
    fn embedded_literal_is_recovered_from_prose() {
        let text = "Sure! The analysis is {\"summary\": \"uses {braces} and ]\"} — hope that helps {";
        let parsed = parse_structured(text).unwrap();
        assert_eq!(parsed.strategy, ParseStrategy::EmbeddedLiteral);
        assert_eq!(parsed.value, json!({"summary": "uses {braces} and ]"}));
    }

    #[test]
    fn broken_fence_falls_through_to_embedded_scan() {
        let text = "```\nnot json\n``` but later [1, 2, 3] appears";
        let parsed = parse_structured(text).unwrap();
        assert_eq!(parsed.strategy, ParseStrategy::EmbeddedLiteral);
        assert_eq!(parsed.value, json!([1, 2, 3]));
    }

    #[test]
    fn prose_without_structure_is_a_typed_failure() {
        let result = parse_structured("I could not analyse this deck, sorry.");
        assert!(matches!(result, Err(StructuredParseError::NoStructuredContent)));
    }

    #[test]
    fn parse_as_reports_shape_mismatch() {
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Needs {
            field: u32,
        }

        let result = parse_as::<Needs>("{\"other\": true}");
        assert!(matches!(result, Err(StructuredParseError::Shape(_))));
    }
}
