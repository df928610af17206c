//! Deterministic extraction from conventional text layouts.
//!
//! Understands the sample envelope (`...` followed by a `Target: X` line)
//! and answers that state their choice on an `ANSWER: X` line. Useful
//! offline, in tests, and with agents prompted to use that format.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use super::{ExtractionSchema, StructuredExtractor, StructuredInput, StructuredOutput};
use crate::dataset::UNCERTAIN_ANSWER_CHOICE;
use crate::utilities::errors::ExtractionError;

static TARGET_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*Target:[ \t]*(\S+)[ \t]*$").unwrap());
static ANSWER_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*(?i:final[ \t]+)?(?i:answer)[ \t]*[:=][ \t]*\(?([A-Z]{1,2})\)?\.?[ \t]*$").unwrap()
});
static BARE_LETTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\(?([A-Z]{1,2})\)?\.?$").unwrap());
static CITATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(([^()]+?\bpages?\s+\d+(?:\s*-\s*\d+)?)\)").unwrap());

/// Regex-based [`StructuredExtractor`].
#[derive(Debug, Clone)]
pub struct PatternExtractor {
    no_answer: String,
}

impl Default for PatternExtractor {
    fn default() -> Self {
        Self::new(UNCERTAIN_ANSWER_CHOICE)
    }
}

impl PatternExtractor {
    /// `no_answer` is the abstention text; answers quoting it map to `NA`.
    pub fn new(no_answer: impl Into<String>) -> Self {
        Self {
            no_answer: no_answer.into(),
        }
    }

    fn parse_input(&self, text: &str) -> Result<StructuredInput, ExtractionError> {
        let caps = TARGET_LINE
            .captures_iter(text)
            .last()
            .ok_or(ExtractionError::MissingField {
                schema: StructuredInput::NAME,
                field: "target",
            })?;
        let line = caps.get(0).map_or(0..0, |m| m.range());
        let question = format!("{}{}", &text[..line.start], &text[line.end..]);

        Ok(StructuredInput {
            question: question.trim().to_string(),
            target: caps[1].to_string(),
        })
    }

    fn parse_output(&self, text: &str) -> Result<StructuredOutput, ExtractionError> {
        let target = TARGET_LINE
            .captures_iter(text)
            .last()
            .map(|caps| caps[1].to_string())
            .unwrap_or_default();
        let body = TARGET_LINE.replace_all(text, "");

        let answer = self
            .find_answer(&body)
            .ok_or(ExtractionError::MissingField {
                schema: StructuredOutput::NAME,
                field: "answer",
            })?;

        let explanation = ANSWER_LINE.replace_all(&body, "").trim().to_string();

        let mut citations: Vec<String> = Vec::new();
        for caps in CITATION.captures_iter(&body) {
            let citation = caps[1].trim().to_string();
            if !citations.contains(&citation) {
                citations.push(citation);
            }
        }

        Ok(StructuredOutput {
            answer,
            explanation,
            citations,
            target,
        })
    }

    fn find_answer(&self, body: &str) -> Option<String> {
        if let Some(caps) = ANSWER_LINE.captures_iter(body).last() {
            return Some(caps[1].to_string());
        }
        if let Some(caps) = BARE_LETTER.captures(body.trim()) {
            return Some(caps[1].to_string());
        }
        let lowered = body.to_lowercase();
        if lowered.contains(&self.no_answer.to_lowercase())
            || lowered.contains("insufficient information")
        {
            return Some("NA".to_string());
        }
        None
    }
}

#[async_trait]
impl StructuredExtractor for PatternExtractor {
    fn name(&self) -> &str {
        "pattern"
    }

    async fn extract(
        &self,
        text: &str,
        schema_name: &'static str,
        _schema: &Value,
    ) -> Result<String, ExtractionError> {
        let value = if schema_name == StructuredInput::NAME {
            json!(self.parse_input(text)?)
        } else if schema_name == StructuredOutput::NAME {
            json!(self.parse_output(text)?)
        } else {
            return Err(ExtractionError::Schema {
                schema: schema_name,
                message: "pattern extractor has no rule for this schema".to_string(),
                raw: String::new(),
            });
        };
        Ok(value.to_string())
    }
}
