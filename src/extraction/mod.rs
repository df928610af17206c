//! Structured extraction: free text in, schema-conforming record out.
//!
//! The bridge performs two conversions per sample, each with its own schema:
//!
//! - the runtime envelope into a [`StructuredInput`] (`question`, `target`)
//! - the agent's answer into a [`StructuredOutput`] (`answer`,
//!   `explanation`, `citations`, `target`)
//!
//! A [`StructuredExtractor`] only produces raw JSON text. [`extract_typed`]
//! recovers the object from that text and validates it, so every
//! malformed reply becomes a typed [`ExtractionError`].

mod llm_extractor;
mod pattern;

pub use llm_extractor::LlmExtractor;
pub use pattern::PatternExtractor;

use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::utilities::converter::{extract_json_object, lowercase_keys, truncate};
use crate::utilities::errors::ExtractionError;

// ---------------------------------------------------------------------------
// Schemas
// ---------------------------------------------------------------------------

/// A record type an extractor can be asked to produce.
pub trait ExtractionSchema: DeserializeOwned + Serialize + Send {
    /// Schema name, also used as the `json_schema` name sent to LLMs.
    const NAME: &'static str;

    /// JSON Schema describing the record.
    fn json_schema() -> Value;

    /// Checks serde cannot express (non-empty fields and so on).
    fn validate(&self) -> Result<(), ExtractionError> {
        Ok(())
    }
}

/// Question and ground truth recovered from a sample envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredInput {
    /// The question and its lettered choices.
    pub question: String,
    /// Letter of the correct choice.
    pub target: String,
}

impl ExtractionSchema for StructuredInput {
    const NAME: &'static str = "StructuredInput";

    fn json_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "Question, the question and multiple choice answers"
                },
                "target": {
                    "type": "string",
                    "description": "Target, just the letter of the target"
                }
            },
            "required": ["question", "target"],
            "additionalProperties": false
        })
    }

    fn validate(&self) -> Result<(), ExtractionError> {
        if self.question.trim().is_empty() {
            return Err(ExtractionError::MissingField {
                schema: Self::NAME,
                field: "question",
            });
        }
        if self.target.trim().is_empty() {
            return Err(ExtractionError::MissingField {
                schema: Self::NAME,
                field: "target",
            });
        }
        Ok(())
    }
}

/// The agent's answer in structured form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredOutput {
    /// A choice letter, or `NA` for "insufficient information".
    pub answer: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub citations: Vec<String>,
    /// Echo of the target appended to the agent's text.
    #[serde(default)]
    pub target: String,
}

impl ExtractionSchema for StructuredOutput {
    const NAME: &'static str = "StructuredOutput";

    fn json_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "answer": {
                    "type": "string",
                    "description": "Answer, the single letter answer to the question, in the format of LETTER or NA if NA is chosen"
                },
                "explanation": {
                    "type": "string",
                    "description": "Explanation, a short explanation of the answer with any citations found within the text."
                },
                "citations": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Citations, a list of citations found within the text."
                },
                "target": {
                    "type": "string",
                    "description": "The target answer, in the format of LETTER"
                }
            },
            "required": ["answer", "explanation", "citations", "target"],
            "additionalProperties": false
        })
    }

    fn validate(&self) -> Result<(), ExtractionError> {
        if self.answer.trim().is_empty() {
            return Err(ExtractionError::MissingField {
                schema: Self::NAME,
                field: "answer",
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Extractor trait
// ---------------------------------------------------------------------------

/// Converts free text into a JSON object matching a schema.
#[async_trait]
pub trait StructuredExtractor: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Return JSON text for `schema_name`. The text is validated by the
    /// caller, so implementations may return whatever their backend said.
    async fn extract(
        &self,
        text: &str,
        schema_name: &'static str,
        schema: &Value,
    ) -> Result<String, ExtractionError>;
}

/// Run `extractor` on `text` and decode the reply as `T`.
pub async fn extract_typed<T: ExtractionSchema>(
    extractor: &dyn StructuredExtractor,
    text: &str,
) -> Result<T, ExtractionError> {
    let raw = extractor.extract(text, T::NAME, &T::json_schema()).await?;
    decode(&raw)
}

/// Recover and validate a `T` from raw extractor output.
pub fn decode<T: ExtractionSchema>(raw: &str) -> Result<T, ExtractionError> {
    let value = lowercase_keys(extract_json_object(raw)?);
    let record: T = serde_json::from_value(value).map_err(|e| ExtractionError::Schema {
        schema: T::NAME,
        message: e.to_string(),
        raw: truncate(raw, 500),
    })?;
    record.validate()?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_output() {
        let raw = r#"{"Answer": "E", "Explanation": "30.8% of TADs", "Citations": ["hua2024 pages 4-4"], "Target": "E"}"#;
        let output: StructuredOutput = decode(raw).unwrap();
        assert_eq!(output.answer, "E");
        assert_eq!(output.citations, vec!["hua2024 pages 4-4".to_string()]);
        assert_eq!(output.target, "E");
    }

    #[test]
    fn test_decode_output_defaults_optional_fields() {
        let output: StructuredOutput = decode(r#"{"answer": "B"}"#).unwrap();
        assert_eq!(output.explanation, "");
        assert!(output.citations.is_empty());
    }

    #[test]
    fn test_decode_missing_answer() {
        let err = decode::<StructuredOutput>(r#"{"explanation": "no idea"}"#).unwrap_err();
        assert!(matches!(err, ExtractionError::Schema { schema: "StructuredOutput", .. }));

        let err = decode::<StructuredOutput>(r#"{"answer": "  "}"#).unwrap_err();
        assert!(matches!(err, ExtractionError::MissingField { field: "answer", .. }));
    }

    #[test]
    fn test_decode_wrong_types() {
        let err = decode::<StructuredOutput>(r#"{"answer": "A", "citations": "x"}"#).unwrap_err();
        assert!(matches!(err, ExtractionError::Schema { .. }));
    }

    #[test]
    fn test_decode_input_requires_target() {
        let err = decode::<StructuredInput>(r#"{"question": "Q?", "target": ""}"#).unwrap_err();
        assert!(matches!(err, ExtractionError::MissingField { field: "target", .. }));
    }

    #[test]
    fn test_decode_not_json() {
        let err = decode::<StructuredInput>("I could not parse that.").unwrap_err();
        assert!(matches!(err, ExtractionError::NoJson { .. }));
    }

    #[test]
    fn test_schemas_list_required_fields() {
        assert_eq!(StructuredInput::json_schema()["required"], json!(["question", "target"]));
        assert_eq!(
            StructuredOutput::json_schema()["required"].as_array().unwrap().len(),
            4
        );
    }
}
