//! Chat-completion backend.
//!
//! [`ChatModel`] is the seam between the harness and any LLM: the
//! structured extractor and the direct baseline agent both talk to it.
//! [`OpenAIChat`] implements it against the OpenAI Chat Completions API (or
//! any compatible server).

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::LlmSettings;
use crate::types::usage_metrics::TokenPair;
use crate::utilities::converter::truncate;
use crate::utilities::errors::LlmError;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `"system"`, `"user"` or `"assistant"`.
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A completed chat call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub content: String,
    /// Model name as reported by the backend.
    pub model: String,
    pub usage: TokenPair,
}

// ---------------------------------------------------------------------------
// ChatModel trait
// ---------------------------------------------------------------------------

/// Anything that can answer a conversation.
#[async_trait]
pub trait ChatModel: Send + Sync + fmt::Debug {
    /// Configured model name.
    fn model(&self) -> &str;

    /// Run one completion. `response_format` is passed through verbatim
    /// (e.g. a `json_schema` format) when the backend supports it.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        response_format: Option<&Value>,
    ) -> Result<ChatCompletion, LlmError>;
}

// ---------------------------------------------------------------------------
// OpenAI implementation
// ---------------------------------------------------------------------------

/// OpenAI-compatible chat client.
///
/// Retries rate limits (429) and server errors (5xx) with exponential
/// backoff; other client errors fail immediately.
#[derive(Debug, Clone)]
pub struct OpenAIChat {
    settings: LlmSettings,
    client: reqwest::Client,
}

impl OpenAIChat {
    pub fn new(settings: LlmSettings) -> Result<Self, LlmError> {
        let timeout = settings.timeout().ok_or_else(|| {
            LlmError::InvalidSettings(format!(
                "timeout_secs {} is not a usable request timeout",
                settings.timeout_secs
            ))
        })?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { settings, client })
    }

    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.settings.api_base_url().trim_end_matches('/'))
    }

    fn build_request_body(&self, messages: &[ChatMessage], response_format: Option<&Value>) -> Value {
        let mut body = json!({
            "model": self.settings.model,
            "messages": messages,
            "temperature": self.settings.temperature,
        });
        if let Some(format) = response_format {
            body["response_format"] = format.clone();
        }
        body
    }

    async fn send_once(&self, api_key: &str, body: &Value) -> Result<Value, Attempt> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Attempt::Retry(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Attempt::Retry("rate limited (429)".to_string()));
        }
        if status.is_server_error() {
            return Err(Attempt::Retry(format!("server error {}", status)));
        }

        let text = response
            .text()
            .await
            .map_err(|e| Attempt::Retry(e.to_string()))?;

        if status.is_client_error() {
            return Err(Attempt::Fatal(LlmError::Api {
                status: status.as_u16(),
                body: truncate(&text, 500),
            }));
        }

        serde_json::from_str(&text).map_err(|e| {
            Attempt::Fatal(LlmError::MalformedResponse(format!(
                "{} - body: {}",
                e,
                truncate(&text, 500)
            )))
        })
    }
}

enum Attempt {
    Retry(String),
    Fatal(LlmError),
}

/// Pull content, model and usage out of a Chat Completions response.
pub fn parse_completion(response: &Value, fallback_model: &str) -> Result<ChatCompletion, LlmError> {
    let content = response
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| LlmError::MalformedResponse("missing choices[0].message.content".to_string()))?;

    let model = response
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or(fallback_model)
        .to_string();

    let usage = response.get("usage");
    let tokens = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| usage.and_then(|u| u.get(*k)).and_then(Value::as_u64))
            .unwrap_or(0)
    };

    Ok(ChatCompletion {
        content: content.to_string(),
        model,
        usage: TokenPair::new(
            tokens(&["prompt_tokens", "input_tokens"]),
            tokens(&["completion_tokens", "output_tokens"]),
        ),
    })
}

#[async_trait]
impl ChatModel for OpenAIChat {
    fn model(&self) -> &str {
        &self.settings.model
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        response_format: Option<&Value>,
    ) -> Result<ChatCompletion, LlmError> {
        let api_key = self.settings.resolved_api_key().ok_or(LlmError::MissingApiKey)?;
        let body = self.build_request_body(messages, response_format);

        log::debug!(
            "OpenAIChat.complete: model={}, messages={}",
            self.settings.model,
            messages.len()
        );

        let mut retry_delay = std::time::Duration::from_secs(1);
        let mut last_error = String::from("no attempt made");

        for attempt in 0..=self.settings.max_retries {
            if attempt > 0 {
                log::warn!(
                    "Chat API retry attempt {} after {:?}: {}",
                    attempt,
                    retry_delay,
                    last_error
                );
                tokio::time::sleep(retry_delay).await;
                retry_delay *= 2;
            }

            match self.send_once(&api_key, &body).await {
                Ok(response) => return parse_completion(&response, &self.settings.model),
                Err(Attempt::Fatal(e)) => return Err(e),
                Err(Attempt::Retry(reason)) => last_error = reason,
            }
        }

        Err(LlmError::RetriesExhausted {
            attempts: self.settings.max_retries + 1,
            last_error,
        })
    }
}
