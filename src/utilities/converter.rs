//! Recovering JSON objects from LLM text.
//!
//! Extractor backends are asked for JSON but frequently wrap it in prose or
//! Markdown fences. These helpers find the object before it is validated
//! against a schema.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::utilities::errors::ExtractionError;

static CODE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)```").unwrap());
static JSON_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[\s\S]*\}").unwrap());

/// Parse `text` as a JSON object, or `None` if it is anything else.
pub fn validate_json_object(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

/// Find the first JSON object in `text`.
///
/// Tries, in order: the whole text, each fenced code block, and the widest
/// `{ ... }` span.
pub fn extract_json_object(text: &str) -> Result<Value, ExtractionError> {
    if let Some(value) = validate_json_object(text) {
        return Ok(value);
    }

    for cap in CODE_BLOCK.captures_iter(text) {
        if let Some(value) = cap.get(1).and_then(|m| validate_json_object(m.as_str())) {
            return Ok(value);
        }
    }

    if let Some(m) = JSON_OBJECT.find(text) {
        if let Some(value) = validate_json_object(m.as_str()) {
            return Ok(value);
        }
    }

    Err(ExtractionError::NoJson {
        raw: truncate(text, 500),
    })
}

/// Lower-case every top-level key so `"Answer"` and `"answer"` both validate.
pub fn lowercase_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect(),
        ),
        other => other,
    }
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
