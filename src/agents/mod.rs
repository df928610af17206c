//! Agents under evaluation.
//!
//! An agent is anything that can answer a formatted prompt: implement
//! [`QaAgent`] directly, wrap an async closure in a [`FnAgent`], or use the
//! [`DirectLlmAgent`] baseline.

mod direct_llm;

pub use direct_llm::{DirectLlmAgent, Pricing};

use std::collections::HashMap;
use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::usage_metrics::TokenCounts;
use crate::utilities::errors::ConfigurationError;

/// Free-form keyword configuration forwarded to every agent call.
pub type AgentKwargs = HashMap<String, Value>;

// ---------------------------------------------------------------------------
// Agent response
// ---------------------------------------------------------------------------

/// What an agent returns for one prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Free-text answer.
    pub answer: String,
    /// Cost of producing the answer, if the agent tracks it.
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub token_counts: TokenCounts,
}

impl AgentResponse {
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    #[must_use]
    pub fn with_tokens(mut self, model: impl Into<String>, prompt_tokens: u64, completion_tokens: u64) -> Self {
        self.token_counts.record(model, prompt_tokens, completion_tokens);
        self
    }
}

impl From<String> for AgentResponse {
    fn from(answer: String) -> Self {
        Self::new(answer)
    }
}

impl From<&str> for AgentResponse {
    fn from(answer: &str) -> Self {
        Self::new(answer)
    }
}

// ---------------------------------------------------------------------------
// QaAgent trait
// ---------------------------------------------------------------------------

/// The capability the harness evaluates: prompt in, answer out.
#[async_trait]
pub trait QaAgent: Send + Sync {
    /// Name used in logs and results.
    fn name(&self) -> &str;

    /// Check the agent can be invoked at all. Called once when a bridge is
    /// built, never per sample.
    fn check_ready(&self) -> Result<(), ConfigurationError> {
        if self.name().trim().is_empty() {
            return Err(ConfigurationError::invalid_agent("", "agent name cannot be empty"));
        }
        Ok(())
    }

    /// Answer one formatted prompt.
    async fn invoke(&self, prompt: &str, kwargs: &AgentKwargs) -> anyhow::Result<AgentResponse>;
}

// ---------------------------------------------------------------------------
// Closure agent
// ---------------------------------------------------------------------------

/// Adapts an async closure into a [`QaAgent`].
///
/// The closure receives owned copies of the prompt and keyword arguments
/// and may return anything convertible into an [`AgentResponse`] (a plain
/// `String` works).
///
/// ```
/// use mcq_eval::agents::FnAgent;
///
/// let agent = FnAgent::new("always-a", |_prompt, _kwargs| async move {
///     Ok::<_, anyhow::Error>("ANSWER: A".to_string())
/// });
/// ```
pub struct FnAgent<F> {
    name: String,
    f: F,
}

impl<F> FnAgent<F> {
    pub fn new<Fut, R>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(String, AgentKwargs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Into<AgentResponse> + Send + 'static,
    {
        Self { name: name.into(), f }
    }
}

impl<F> std::fmt::Debug for FnAgent<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnAgent").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F, Fut, R> QaAgent for FnAgent<F>
where
    F: Fn(String, AgentKwargs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    R: Into<AgentResponse> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, prompt: &str, kwargs: &AgentKwargs) -> anyhow::Result<AgentResponse> {
        let response = (self.f)(prompt.to_string(), kwargs.clone()).await?;
        Ok(response.into())
    }
}
