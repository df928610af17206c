//! Evaluation settings.
//!
//! Settings are plain values passed into each component's constructor.
//! Every field has a default, so a YAML file only needs to name what it
//! overrides:
//!
//! ```yaml
//! concurrency: 8
//! shuffle_seed: 42
//! extraction:
//!   model: gpt-4o-mini
//!   temperature: 0.0
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bridge::MULTIPLE_CHOICE_TEMPLATE;
use crate::dataset::UNCERTAIN_ANSWER_CHOICE;
use crate::utilities::errors::ConfigurationError;

/// Default number of samples in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Default model for structured extraction.
pub const DEFAULT_EXTRACTION_MODEL: &str = "gpt-4o-mini";

/// Longest accepted request timeout for a chat backend, in seconds.
pub const MAX_TIMEOUT_SECS: f64 = 86_400.0;

// ---------------------------------------------------------------------------
// Agent failure policy
// ---------------------------------------------------------------------------

/// What to do with a sample whose agent call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentFailurePolicy {
    /// Score the sample INCORRECT; it stays in both metric denominators.
    #[default]
    ScoreIncorrect,
    /// Drop the sample from aggregation; it is counted as errored.
    Exclude,
}

// ---------------------------------------------------------------------------
// LLM settings
// ---------------------------------------------------------------------------

/// Connection settings for an OpenAI-compatible chat backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub model: String,
    pub temperature: f64,
    /// Falls back to `OPENAI_API_KEY` when unset. Never serialized.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: f64,
    pub max_retries: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_EXTRACTION_MODEL.to_string(),
            temperature: 0.1,
            api_key: None,
            base_url: None,
            timeout_secs: 120.0,
            max_retries: 2,
        }
    }
}

impl LlmSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// The configured key, or `OPENAI_API_KEY` from the environment.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|key| !key.is_empty())
    }

    pub fn api_base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
    }

    /// The request timeout, or `None` when `timeout_secs` is not a
    /// positive number of seconds up to [`MAX_TIMEOUT_SECS`].
    pub fn timeout(&self) -> Option<Duration> {
        if !(self.timeout_secs > 0.0 && self.timeout_secs <= MAX_TIMEOUT_SECS) {
            return None;
        }
        Duration::try_from_secs_f64(self.timeout_secs).ok()
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.model.trim().is_empty() {
            return Err(ConfigurationError::invalid_settings("model name cannot be empty"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigurationError::invalid_settings(format!(
                "temperature {} is outside 0.0..=2.0",
                self.temperature
            )));
        }
        if self.timeout().is_none() {
            return Err(ConfigurationError::invalid_settings(format!(
                "timeout_secs {} is outside (0, {}]",
                self.timeout_secs, MAX_TIMEOUT_SECS
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Evaluation settings
// ---------------------------------------------------------------------------

/// Settings for one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalSettings {
    /// Prompt template for the agent; must contain `{question}`.
    pub template: String,
    /// Text of the abstention choice, also used as the no-answer sentinel.
    pub no_answer: String,
    /// Samples in flight at once (at least 1).
    pub concurrency: usize,
    /// Seed for choice shuffling. `None` draws from entropy.
    pub shuffle_seed: Option<u64>,
    pub agent_failure_policy: AgentFailurePolicy,
    /// Backend used by the LLM extractor.
    pub extraction: LlmSettings,
}

impl Default for EvalSettings {
    fn default() -> Self {
        Self {
            template: MULTIPLE_CHOICE_TEMPLATE.to_string(),
            no_answer: UNCERTAIN_ANSWER_CHOICE.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            shuffle_seed: None,
            agent_failure_policy: AgentFailurePolicy::default(),
            extraction: LlmSettings::default(),
        }
    }
}

impl EvalSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigurationError> {
        let settings: EvalSettings = serde_yaml::from_str(yaml)
            .map_err(|e| ConfigurationError::invalid_settings(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigurationError> {
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            ConfigurationError::invalid_settings(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&yaml)
    }

    #[must_use]
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[must_use]
    pub fn with_shuffle_seed(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    #[must_use]
    pub fn with_agent_failure_policy(mut self, policy: AgentFailurePolicy) -> Self {
        self.agent_failure_policy = policy;
        self
    }

    #[must_use]
    pub fn with_extraction(mut self, extraction: LlmSettings) -> Self {
        self.extraction = extraction;
        self
    }

    /// Check ranges. The template is checked by the bridge itself.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.concurrency == 0 {
            return Err(ConfigurationError::invalid_settings("concurrency must be at least 1"));
        }
        if self.no_answer.trim().is_empty() {
            return Err(ConfigurationError::invalid_settings("no_answer cannot be empty"));
        }
        self.extraction.validate()
    }
}
