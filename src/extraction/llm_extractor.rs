//! LLM-backed structured extraction.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::StructuredExtractor;
use crate::config::LlmSettings;
use crate::llm::{ChatMessage, ChatModel, OpenAIChat};
use crate::utilities::errors::ExtractionError;

const AGENT_INSTRUCTIONS: &str =
    "You are an agent that is able to parse the output of a given text and return the desired output.";

const ANSWER_MESSAGE_TEMPLATE: &str =
    "Please could you parse the following text and return the desired output.\n\nText:\n";

/// Asks a chat model to restate text as JSON matching a schema.
///
/// The schema is sent as a strict `json_schema` response format, so
/// backends that honour it return bare JSON.
#[derive(Debug, Clone)]
pub struct LlmExtractor {
    llm: Arc<dyn ChatModel>,
}

impl LlmExtractor {
    pub fn new(llm: Arc<dyn ChatModel>) -> Self {
        Self { llm }
    }

    /// Extractor backed by an [`OpenAIChat`] built from `settings`.
    pub fn from_settings(settings: LlmSettings) -> Result<Self, ExtractionError> {
        Ok(Self::new(Arc::new(OpenAIChat::new(settings)?)))
    }

    fn response_format(schema_name: &str, schema: &Value) -> Value {
        json!({
            "type": "json_schema",
            "json_schema": {
                "name": schema_name,
                "schema": schema,
                "strict": true
            }
        })
    }
}

#[async_trait]
impl StructuredExtractor for LlmExtractor {
    fn name(&self) -> &str {
        self.llm.model()
    }

    async fn extract(
        &self,
        text: &str,
        schema_name: &'static str,
        schema: &Value,
    ) -> Result<String, ExtractionError> {
        let messages = [
            ChatMessage::system(AGENT_INSTRUCTIONS),
            ChatMessage::user(format!("{}{}", ANSWER_MESSAGE_TEMPLATE, text)),
        ];
        let format = Self::response_format(schema_name, schema);
        let completion = self.llm.complete(&messages, Some(&format)).await?;
        log::debug!(
            "Extracted {} with {} ({} prompt / {} completion tokens)",
            schema_name,
            completion.model,
            completion.usage.prompt_tokens,
            completion.usage.completion_tokens
        );
        Ok(completion.content)
    }
}
