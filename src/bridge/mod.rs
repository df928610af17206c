//! Agent bridge.
//!
//! Lets any [`QaAgent`] take part in the sample, answer, score loop. Each
//! invocation does four things in order:
//!
//! 1. extract `{question, target}` from the sample envelope
//! 2. format the prompt template with the question
//! 3. call the agent
//! 4. extract `{answer, explanation, citations, target}` from the agent's
//!    answer with the target appended
//!
//! The bridge holds no mutable state, so one instance serves every sample
//! of a run concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub use crate::llm::ChatMessage;

use crate::agents::{AgentKwargs, QaAgent};
use crate::dataset::{Sample, UNCERTAIN_ANSWER_CHOICE};
use crate::extraction::{extract_typed, StructuredExtractor, StructuredInput, StructuredOutput};
use crate::types::usage_metrics::TokenCounts;
use crate::utilities::errors::{AgentInvocationError, BridgeError, ConfigurationError};
use crate::utilities::string_utils::{interpolate_only, template_variables};

/// Default agent prompt. `{question}` receives the question and its
/// lettered choices.
pub const MULTIPLE_CHOICE_TEMPLATE: &str = "The following is a multiple choice question about biology.
Please answer by responding with the letter of the correct answer.

Think step by step.

{question}
";

static CHOICE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*([A-Z]{1,2})\)[ \t]*(.*?)[ \t]*$").unwrap());

/// A choice label at the start of an answer, as in `B) 31%` or `(B) 31%`.
static LEADING_CHOICE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\(?([A-Z]{1,2})\)").unwrap());

// ---------------------------------------------------------------------------
// Envelope and output
// ---------------------------------------------------------------------------

/// A sample as the task runtime hands it to a solver: a conversation whose
/// first message carries the prompt and a `Target:` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSample {
    pub id: usize,
    pub messages: Vec<ChatMessage>,
}

impl RawSample {
    pub fn new(id: usize, messages: Vec<ChatMessage>) -> Self {
        Self { id, messages }
    }

    /// Wrap a built sample in its runtime envelope.
    pub fn from_sample(sample: &Sample) -> Self {
        let content = format!("{}\n\nTarget: {}", sample.prompt, sample.target);
        Self::new(sample.id, vec![ChatMessage::user(content)])
    }

    /// Content of the first non-blank message.
    pub fn text(&self) -> Option<&str> {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .find(|c| !c.trim().is_empty())
    }
}

/// What the bridge produces for one sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgedOutput {
    /// Question text as recovered from the envelope.
    pub question: String,
    /// Normalized answer: a choice letter, or the no-answer sentinel.
    pub answer: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub citations: Vec<String>,
    /// Target recovered from the envelope.
    pub target: String,
    /// The agent's unstructured reply.
    #[serde(default)]
    pub raw_answer: String,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub token_counts: TokenCounts,
}

impl BridgedOutput {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Answer normalization
// ---------------------------------------------------------------------------

/// Map an extracted answer onto the scorer's vocabulary.
///
/// The answer is trimmed and upper-cased. An answer that opens with one of
/// the question's choice labels (`B) 31%`) is reduced to that letter. `NA`,
/// the sentinel text itself, or the letter under which `question` lists the
/// sentinel all become the sentinel string. Letters that are not among the
/// question's choices are kept as they are.
pub fn normalize_answer(answer: &str, question: &str, no_answer: &str) -> String {
    let trimmed = answer.trim();
    if trimmed.eq_ignore_ascii_case(no_answer.trim()) {
        return no_answer.to_string();
    }

    let choices: Vec<(String, String)> = CHOICE_LINE
        .captures_iter(question)
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
        .collect();
    let is_listed = |letter: &str| choices.iter().any(|(l, _)| l == letter);

    let upper = trimmed.to_uppercase();
    let leading = LEADING_CHOICE
        .captures(&upper)
        .map(|caps| caps[1].to_string())
        .filter(|letter| choices.is_empty() || is_listed(letter));
    let letter = leading.unwrap_or_else(|| {
        upper
            .trim_matches(|c: char| c == '(' || c == ')' || c == '.' || c.is_whitespace())
            .to_string()
    });
    if letter == "NA" {
        return no_answer.to_string();
    }

    if choices
        .iter()
        .any(|(l, text)| *l == letter && text.eq_ignore_ascii_case(no_answer.trim()))
    {
        return no_answer.to_string();
    }

    if !choices.is_empty() && !is_listed(&letter) {
        log::warn!("Answer '{}' is not one of the listed choices", letter);
    }
    letter
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

/// Adapter between the task runtime and a [`QaAgent`].
#[derive(Clone)]
pub struct AgentBridge {
    agent: Arc<dyn QaAgent>,
    extractor: Arc<dyn StructuredExtractor>,
    template: String,
    no_answer: String,
    kwargs: AgentKwargs,
}

impl std::fmt::Debug for AgentBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentBridge")
            .field("agent", &self.agent.name())
            .field("extractor", &self.extractor.name())
            .field("template", &self.template)
            .finish()
    }
}

impl AgentBridge {
    /// Build a bridge, checking the agent and template up front.
    ///
    /// `template` defaults to [`MULTIPLE_CHOICE_TEMPLATE`]. It must contain
    /// `{question}` and no other placeholder.
    pub fn new(
        agent: Arc<dyn QaAgent>,
        extractor: Arc<dyn StructuredExtractor>,
        template: Option<String>,
    ) -> Result<Self, ConfigurationError> {
        agent.check_ready()?;

        let template = template.unwrap_or_else(|| MULTIPLE_CHOICE_TEMPLATE.to_string());
        let variables = template_variables(&template);
        if !variables.iter().any(|v| v == "question") {
            return Err(ConfigurationError::invalid_template(
                "template must contain a {question} placeholder",
            ));
        }
        if let Some(other) = variables.iter().find(|v| *v != "question") {
            return Err(ConfigurationError::invalid_template(format!(
                "template placeholder {{{}}} has no value; only {{question}} is supplied",
                other
            )));
        }

        Ok(Self {
            agent,
            extractor,
            template,
            no_answer: UNCERTAIN_ANSWER_CHOICE.to_string(),
            kwargs: AgentKwargs::new(),
        })
    }

    #[must_use]
    pub fn with_no_answer(mut self, no_answer: impl Into<String>) -> Self {
        self.no_answer = no_answer.into();
        self
    }

    /// Keyword configuration forwarded to every agent call.
    #[must_use]
    pub fn with_kwargs(mut self, kwargs: AgentKwargs) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn agent_name(&self) -> &str {
        self.agent.name()
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Format the agent prompt for `question`.
    pub fn format_prompt(&self, question: &str) -> Result<String, BridgeError> {
        let mut inputs = HashMap::new();
        inputs.insert("question".to_string(), question.to_string());
        interpolate_only(&self.template, &inputs).map_err(BridgeError::Template)
    }

    /// Run one sample through extraction, the agent, and extraction again.
    pub async fn run(&self, sample: &RawSample) -> Result<BridgedOutput, BridgeError> {
        let text = sample.text().ok_or(BridgeError::EmptyEnvelope)?;

        let input: StructuredInput = extract_typed(self.extractor.as_ref(), text)
            .await
            .map_err(BridgeError::InputExtraction)?;

        let prompt = self.format_prompt(&input.question)?;

        log::debug!("Sample {}: invoking agent '{}'", sample.id, self.agent.name());
        let response = self
            .agent
            .invoke(&prompt, &self.kwargs)
            .await
            .map_err(|e| AgentInvocationError::new(self.agent.name(), e))?;

        let answer_text = format!("{}\nTarget: {}", response.answer, input.target);
        let output: StructuredOutput = extract_typed(self.extractor.as_ref(), &answer_text)
            .await
            .map_err(BridgeError::OutputExtraction)?;

        Ok(BridgedOutput {
            answer: normalize_answer(&output.answer, &input.question, &self.no_answer),
            question: input.question,
            explanation: output.explanation,
            citations: output.citations,
            target: input.target,
            raw_answer: response.answer,
            cost: response.cost.unwrap_or(0.0),
            token_counts: response.token_counts,
        })
    }
}

/// A bridge as a plain async callable.
pub type BridgeFn =
    Arc<dyn Fn(RawSample) -> BoxFuture<'static, Result<BridgedOutput, BridgeError>> + Send + Sync>;

/// Build a bridge and return it as a callable, for runtimes that take a
/// solver function rather than an [`AgentBridge`].
pub fn make_bridge(
    agent: Arc<dyn QaAgent>,
    extractor: Arc<dyn StructuredExtractor>,
    template: Option<String>,
    kwargs: AgentKwargs,
) -> Result<BridgeFn, ConfigurationError> {
    let bridge = Arc::new(AgentBridge::new(agent, extractor, template)?.with_kwargs(kwargs));
    Ok(Arc::new(move |sample: RawSample| {
        let bridge = Arc::clone(&bridge);
        Box::pin(async move { bridge.run(&sample).await }) as BoxFuture<'static, _>
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentResponse, FnAgent};
    use crate::dataset::{Record, SampleBuilder};
    use crate::extraction::PatternExtractor;
    use crate::utilities::errors::ExtractionError;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const QUESTION: &str = "Question: What share of TADs are reorganized?\nA) 11%\nB) 31%\nC) Insufficient information to answer the question.";

    fn envelope(target: &str) -> RawSample {
        RawSample::new(0, vec![ChatMessage::user(format!("{}\n\nTarget: {}", QUESTION, target))])
    }

    fn pattern() -> Arc<dyn StructuredExtractor> {
        Arc::new(PatternExtractor::default())
    }

    fn agent_answering(reply: &'static str) -> Arc<dyn QaAgent> {
        Arc::new(FnAgent::new("stub", move |_prompt, _kwargs| async move {
            Ok::<_, anyhow::Error>(reply)
        }))
    }

    #[test]
    fn test_normalize_answer() {
        let na = UNCERTAIN_ANSWER_CHOICE;
        assert_eq!(normalize_answer(" b ", QUESTION, na), "B");
        assert_eq!(normalize_answer("(A).", QUESTION, na), "A");
        assert_eq!(normalize_answer("NA", QUESTION, na), na);
        assert_eq!(normalize_answer("na", QUESTION, na), na);
        assert_eq!(normalize_answer("C", QUESTION, na), na);
        assert_eq!(normalize_answer(na, QUESTION, na), na);
        // Unknown letters are kept for the scorer to mark wrong.
        assert_eq!(normalize_answer("Q", QUESTION, na), "Q");
    }

    #[test]
    fn test_normalize_answer_with_choice_text() {
        let na = UNCERTAIN_ANSWER_CHOICE;
        assert_eq!(normalize_answer("B) 31%", QUESTION, na), "B");
        assert_eq!(normalize_answer("(a) 11%", QUESTION, na), "A");
        assert_eq!(
            normalize_answer("c) Insufficient information to answer the question.", QUESTION, na),
            na
        );
        // A label the question never lists is not taken as the answer.
        assert_eq!(normalize_answer("Z) none of these", QUESTION, na), "Z) NONE OF THESE");
    }

    #[test]
    fn test_template_validation() {
        let missing = AgentBridge::new(agent_answering("A"), pattern(), Some("Answer this.".into()));
        assert!(matches!(missing, Err(ConfigurationError::InvalidTemplate { .. })));

        let extra = AgentBridge::new(
            agent_answering("A"),
            pattern(),
            Some("{context}\n{question}".into()),
        );
        assert!(matches!(extra, Err(ConfigurationError::InvalidTemplate { .. })));

        let bridge = AgentBridge::new(agent_answering("A"), pattern(), None).unwrap();
        assert_eq!(bridge.template(), MULTIPLE_CHOICE_TEMPLATE);
    }

    #[test]
    fn test_invalid_agent_rejected_at_construction() {
        let nameless: Arc<dyn QaAgent> =
            Arc::new(FnAgent::new("", |_p, _k| async move { Ok::<_, anyhow::Error>("A") }));
        assert!(matches!(
            AgentBridge::new(nameless, pattern(), None),
            Err(ConfigurationError::InvalidAgent { .. })
        ));
    }

    #[tokio::test]
    async fn test_run_prompt_and_output() {
        let agent = Arc::new(FnAgent::new("checker", |prompt: String, _kwargs| async move {
            assert!(prompt.starts_with("The following is a multiple choice question"));
            assert!(prompt.contains("B) 31%"));
            assert!(!prompt.contains("Target:"));
            Ok::<_, anyhow::Error>(
                AgentResponse::new("31% of TADs change (hua2024 pages 4-4).\nANSWER: B")
                    .with_cost(0.01)
                    .with_tokens("gpt-4o", 100, 20),
            )
        }));
        let bridge = AgentBridge::new(agent, pattern(), None).unwrap();

        let output = bridge.run(&envelope("B")).await.unwrap();
        assert_eq!(output.answer, "B");
        assert_eq!(output.target, "B");
        assert_eq!(output.citations, vec!["hua2024 pages 4-4".to_string()]);
        assert_eq!(output.cost, 0.01);
        assert_eq!(output.token_counts.get("gpt-4o").unwrap().total(), 120);
        assert!(output.raw_answer.ends_with("ANSWER: B"));
    }

    #[tokio::test]
    async fn test_run_maps_abstention_letter_to_sentinel() {
        let bridge = AgentBridge::new(agent_answering("ANSWER: C"), pattern(), None).unwrap();
        let output = bridge.run(&envelope("B")).await.unwrap();
        assert_eq!(output.answer, UNCERTAIN_ANSWER_CHOICE);
        assert_eq!(output.cost, 0.0);
        assert!(output.token_counts.is_empty());
    }

    #[tokio::test]
    async fn test_kwargs_forwarded() {
        let agent = Arc::new(FnAgent::new("kw", |_prompt, kwargs: AgentKwargs| async move {
            let letter = kwargs["letter"].as_str().unwrap_or("?").to_string();
            Ok::<_, anyhow::Error>(format!("ANSWER: {}", letter))
        }));
        let mut kwargs = AgentKwargs::new();
        kwargs.insert("letter".into(), Value::String("A".into()));
        let bridge = make_bridge(agent, pattern(), None, kwargs).unwrap();

        let output = bridge(envelope("A")).await.unwrap();
        assert_eq!(output.answer, "A");
    }

    #[tokio::test]
    async fn test_agent_failure_is_typed() {
        let agent = Arc::new(FnAgent::new("flaky", |_p, _k| async move {
            Err::<String, _>(anyhow::anyhow!("timeout talking to index"))
        }));
        let bridge = AgentBridge::new(agent, pattern(), None).unwrap();
        let err = bridge.run(&envelope("A")).await.unwrap_err();
        assert!(err.is_agent_failure());
        assert!(err.to_string().contains("timeout talking to index"));
    }

    #[tokio::test]
    async fn test_extraction_failures() {
        let bridge = AgentBridge::new(agent_answering("I cannot decide."), pattern(), None).unwrap();

        let err = bridge.run(&envelope("A")).await.unwrap_err();
        assert!(matches!(err, BridgeError::OutputExtraction(_)));

        let no_target = RawSample::new(1, vec![ChatMessage::user(QUESTION)]);
        let err = bridge.run(&no_target).await.unwrap_err();
        assert!(matches!(err, BridgeError::InputExtraction(_)));

        let empty = RawSample::new(2, vec![ChatMessage::user("  ")]);
        assert!(matches!(bridge.run(&empty).await, Err(BridgeError::EmptyEnvelope)));
    }

    #[derive(Debug, Default)]
    struct CountingExtractor {
        inner: PatternExtractor,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StructuredExtractor for CountingExtractor {
        fn name(&self) -> &str {
            "counting"
        }

        async fn extract(
            &self,
            text: &str,
            schema_name: &'static str,
            schema: &Value,
        ) -> Result<String, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.extract(text, schema_name, schema).await
        }
    }

    #[tokio::test]
    async fn test_two_extractions_per_sample() {
        let extractor = Arc::new(CountingExtractor::default());
        let bridge = AgentBridge::new(agent_answering("ANSWER: A"), extractor.clone(), None).unwrap();

        let mut builder = SampleBuilder::seeded(5);
        let sample = builder
            .build_sample(0, &Record::new("Q?", "yes", ["no", "maybe"]))
            .unwrap();
        bridge.run(&RawSample::from_sample(&sample)).await.unwrap();
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
    }
}
