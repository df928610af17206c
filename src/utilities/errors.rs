//! Error types for the evaluation harness.
//!
//! Configuration problems are reported eagerly when a component is
//! constructed. Everything that can go wrong while a single sample is in
//! flight (extraction, the agent itself, the chat backend) is a per-sample
//! error and never aborts a run.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Precondition failures detected while building a component.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The input table is missing one or more required columns.
    #[error("Dataset is missing required columns: {missing:?}")]
    MissingColumns { missing: Vec<String> },

    /// The input could not be read as a table of rows at all.
    #[error("Invalid dataset table: {message}")]
    InvalidTable { message: String },

    /// A row could not be read as a question record.
    #[error("Invalid record at row {row}: {message}")]
    InvalidRecord { row: usize, message: String },

    /// The prompt template cannot be formatted with a question.
    #[error("Invalid prompt template: {message}")]
    InvalidTemplate { message: String },

    /// The agent does not satisfy the invocation contract.
    #[error("Agent '{agent}' cannot be evaluated: {message}")]
    InvalidAgent { agent: String, message: String },

    /// A settings value is out of range or unreadable.
    #[error("Invalid settings: {message}")]
    InvalidSettings { message: String },
}

impl ConfigurationError {
    pub fn invalid_table(message: impl Into<String>) -> Self {
        Self::InvalidTable {
            message: message.into(),
        }
    }

    pub fn invalid_record(row: usize, message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            row,
            message: message.into(),
        }
    }

    pub fn invalid_template(message: impl Into<String>) -> Self {
        Self::InvalidTemplate {
            message: message.into(),
        }
    }

    pub fn invalid_agent(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidAgent {
            agent: agent.into(),
            message: message.into(),
        }
    }

    pub fn invalid_settings(message: impl Into<String>) -> Self {
        Self::InvalidSettings {
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Chat backend
// ---------------------------------------------------------------------------

/// Failures talking to a chat-completion backend.
#[derive(Debug, Error)]
pub enum LlmError {
    /// No API key was configured or found in the environment.
    #[error("API key not set. Set OPENAI_API_KEY or pass api_key in the LLM settings.")]
    MissingApiKey,

    /// The client settings cannot be used to build a client.
    #[error("Invalid LLM settings: {0}")]
    InvalidSettings(String),

    /// Transport-level failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// The response body did not have the expected shape.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Every retry attempt failed.
    #[error("Request failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

// ---------------------------------------------------------------------------
// Structured extraction
// ---------------------------------------------------------------------------

/// Failures converting free text into a schema-conforming record.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The extractor's own backend call failed.
    #[error("Extraction backend failed: {0}")]
    Backend(#[from] LlmError),

    /// No JSON object could be recovered from the extractor's reply.
    #[error("No JSON object found in extractor output: {raw}")]
    NoJson { raw: String },

    /// JSON was found but does not match the schema.
    #[error("Extracted {schema} does not match schema: {message}")]
    Schema {
        schema: &'static str,
        message: String,
        raw: String,
    },

    /// A required field was absent or empty in the source text.
    #[error("Could not find field '{field}' for {schema}")]
    MissingField {
        schema: &'static str,
        field: &'static str,
    },
}

// ---------------------------------------------------------------------------
// Agent invocation
// ---------------------------------------------------------------------------

/// The agent under evaluation failed on one sample.
#[derive(Debug, Error)]
#[error("Agent '{agent}' failed: {source}")]
pub struct AgentInvocationError {
    pub agent: String,
    #[source]
    pub source: anyhow::Error,
}

impl AgentInvocationError {
    pub fn new(agent: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            agent: agent.into(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

/// Everything that can stop one bridge invocation from producing output.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The runtime envelope carried no message text.
    #[error("Sample envelope has no message content")]
    EmptyEnvelope,

    /// Step 1: question/target could not be recovered from the envelope.
    #[error("Input extraction failed: {0}")]
    InputExtraction(#[source] ExtractionError),

    /// Step 2: the template could not be formatted.
    #[error("Template formatting failed: {0}")]
    Template(String),

    /// Step 3: the agent itself failed.
    #[error(transparent)]
    Agent(#[from] AgentInvocationError),

    /// Step 4: the agent's answer could not be structured.
    #[error("Output extraction failed: {0}")]
    OutputExtraction(#[source] ExtractionError),
}

impl BridgeError {
    /// Whether the failure came from the agent rather than the harness.
    pub fn is_agent_failure(&self) -> bool {
        matches!(self, BridgeError::Agent(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_columns_message_lists_columns() {
        let err = ConfigurationError::MissingColumns {
            missing: vec!["ideal".to_string(), "distractors".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("ideal"));
        assert!(msg.contains("distractors"));
    }

    #[test]
    fn test_agent_error_keeps_source() {
        let err = AgentInvocationError::new("stub", anyhow::anyhow!("connection reset"));
        assert_eq!(err.to_string(), "Agent 'stub' failed: connection reset");
        let bridge: BridgeError = err.into();
        assert!(bridge.is_agent_failure());
    }

    #[test]
    fn test_extraction_failures_are_not_agent_failures() {
        let err = BridgeError::OutputExtraction(ExtractionError::MissingField {
            schema: "StructuredOutput",
            field: "answer",
        });
        assert!(!err.is_agent_failure());
        assert!(err.to_string().contains("answer"));
    }
}
