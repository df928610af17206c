//! Baseline agent that sends the prompt straight to a chat model.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{AgentKwargs, AgentResponse, QaAgent};
use crate::config::LlmSettings;
use crate::llm::{ChatMessage, ChatModel, OpenAIChat};
use crate::types::usage_metrics::TokenPair;
use crate::utilities::errors::{ConfigurationError, LlmError};

/// Per-thousand-token prices used to estimate a call's cost.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

impl Pricing {
    pub fn new(prompt_per_1k: f64, completion_per_1k: f64) -> Self {
        Self {
            prompt_per_1k,
            completion_per_1k,
        }
    }

    pub fn cost(&self, usage: TokenPair) -> f64 {
        (usage.prompt_tokens as f64 * self.prompt_per_1k
            + usage.completion_tokens as f64 * self.completion_per_1k)
            / 1000.0
    }
}

/// Answers with a single chat completion and no retrieval.
///
/// Recognized keyword arguments:
/// - `system_prompt` (string): sent as a system message before the prompt.
#[derive(Debug, Clone)]
pub struct DirectLlmAgent {
    name: String,
    llm: Arc<dyn ChatModel>,
    pricing: Option<Pricing>,
}

impl DirectLlmAgent {
    pub fn new(llm: Arc<dyn ChatModel>) -> Self {
        Self {
            name: format!("direct:{}", llm.model()),
            llm,
            pricing: None,
        }
    }

    pub fn from_settings(settings: LlmSettings) -> Result<Self, LlmError> {
        Ok(Self::new(Arc::new(OpenAIChat::new(settings)?)))
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_pricing(mut self, pricing: Pricing) -> Self {
        self.pricing = Some(pricing);
        self
    }
}

#[async_trait]
impl QaAgent for DirectLlmAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn check_ready(&self) -> Result<(), ConfigurationError> {
        if self.llm.model().trim().is_empty() {
            return Err(ConfigurationError::invalid_agent(&self.name, "no model configured"));
        }
        Ok(())
    }

    async fn invoke(&self, prompt: &str, kwargs: &AgentKwargs) -> anyhow::Result<AgentResponse> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = kwargs.get("system_prompt").and_then(Value::as_str) {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(prompt));

        let completion = self.llm.complete(&messages, None).await?;
        let usage = completion.usage;

        let mut response = AgentResponse::new(completion.content).with_tokens(
            completion.model,
            usage.prompt_tokens,
            usage.completion_tokens,
        );
        if let Some(pricing) = self.pricing {
            response = response.with_cost(pricing.cost(usage));
        }
        Ok(response)
    }
}
