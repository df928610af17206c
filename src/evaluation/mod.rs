//! Evaluation orchestrator.
//!
//! An [`Evaluation`] owns a validated question table, an agent and the
//! settings for one benchmark. [`Evaluation::run`] builds shuffled samples,
//! runs them through one shared bridge, scores them and aggregates the
//! result.
//!
//! ```no_run
//! use std::sync::Arc;
//! use mcq_eval::agents::FnAgent;
//! use mcq_eval::config::EvalSettings;
//! use mcq_eval::dataset::RecordTable;
//! use mcq_eval::evaluation::Evaluation;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let table = RecordTable::from_json(&std::fs::read_to_string("litqa2.json")?)?;
//! let agent = Arc::new(FnAgent::new("always-a", |_prompt, _kwargs| async move {
//!     Ok::<_, anyhow::Error>("Option A matches the cited study.\nANSWER: A")
//! }));
//!
//! let evaluation = Evaluation::with_llm_extractor(table, agent, EvalSettings::default())?;
//! let result = evaluation.run(Some(10), None).await?;
//! result.print_summary();
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::{AgentKwargs, QaAgent};
use crate::bridge::AgentBridge;
use crate::config::{AgentFailurePolicy, EvalSettings};
use crate::dataset::{Record, RecordTable, SampleBuilder};
use crate::extraction::{LlmExtractor, StructuredExtractor};
use crate::scoring::{accuracy, coverage, precision, McqScorer, Score};
use crate::task::{duration_serde, RunLimits, SampleLog, SampleStatus, TaskRunner};
use crate::types::usage_metrics::{TokenCounts, UsageMetrics};
use crate::utilities::errors::ConfigurationError;

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// Aggregate outcome of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub run_id: String,
    pub agent: String,
    pub started_at: DateTime<Utc>,
    pub accuracy: f64,
    pub precision: f64,
    pub coverage: f64,
    /// Samples scheduled (after `max_samples`).
    pub total_samples: usize,
    /// Samples that contribute to the metrics.
    pub scored: usize,
    /// Samples whose bridge call failed, whether scored or excluded.
    pub errored: usize,
    /// Samples dropped by the failure policy.
    pub excluded: usize,
    /// Samples stopped by the time limit.
    pub cancelled: usize,
    pub usage: UsageMetrics,
    pub samples: Vec<SampleLog>,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl EvaluationResult {
    fn aggregate(
        agent: &str,
        started_at: DateTime<Utc>,
        samples: Vec<SampleLog>,
        policy: AgentFailurePolicy,
        duration: Duration,
    ) -> Self {
        let mut scores: Vec<Score> = Vec::with_capacity(samples.len());
        let mut usage = UsageMetrics::new();
        let (mut errored, mut excluded, mut cancelled) = (0, 0, 0);

        for log in &samples {
            if let Some(output) = &log.output {
                usage.add(Some(output.cost), &output.token_counts);
            }
            match log.status {
                SampleStatus::Cancelled => {
                    cancelled += 1;
                    continue;
                }
                SampleStatus::Errored => {
                    errored += 1;
                    if log.agent_failure && policy == AgentFailurePolicy::Exclude {
                        excluded += 1;
                        continue;
                    }
                }
                SampleStatus::Completed => {}
            }
            if let Some(score) = &log.score {
                scores.push(score.clone());
            }
        }

        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            agent: agent.to_string(),
            started_at,
            accuracy: accuracy(&scores),
            precision: precision(&scores),
            coverage: coverage(&scores),
            total_samples: samples.len(),
            scored: scores.len(),
            errored,
            excluded,
            cancelled,
            usage,
            samples,
            duration,
        }
    }

    pub fn total_cost(&self) -> f64 {
        self.usage.total_cost
    }

    pub fn token_counts(&self) -> &TokenCounts {
        &self.usage.token_counts
    }

    /// Print a summary to stdout.
    pub fn print_summary(&self) {
        println!();
        println!("=== Evaluation Summary ===");
        println!("Run: {}", self.run_id);
        println!("Agent: {}", self.agent);
        println!("Started: {}", self.started_at.to_rfc3339());
        println!();
        println!(
            "Samples: {} total, {} scored, {} errored, {} excluded, {} cancelled",
            self.total_samples, self.scored, self.errored, self.excluded, self.cancelled
        );
        println!("Accuracy:  {:.3}", self.accuracy);
        println!("Precision: {:.3}", self.precision);
        println!("Coverage:  {:.3}", self.coverage);
        println!();
        println!("Cost: {:.4}", self.usage.total_cost);
        for (model, tokens) in self.usage.token_counts.iter() {
            println!(
                "  {}: {} prompt / {} completion tokens",
                model, tokens.prompt_tokens, tokens.completion_tokens
            );
        }
        println!("Duration: {:.1}s", self.duration.as_secs_f64());
    }

    /// Write the result to a JSON file.
    pub fn write_json(&self, path: &Path) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// One configured benchmark of one agent.
#[derive(Debug)]
pub struct Evaluation {
    records: Vec<Record>,
    bridge: Arc<AgentBridge>,
    settings: EvalSettings,
}

impl Evaluation {
    /// Validate everything a run needs.
    ///
    /// # Errors
    /// [`ConfigurationError`] if the settings are out of range, the table
    /// lacks `question`, `ideal` or `distractors`, a row is invalid, the
    /// template has no `{question}`, or the agent is not ready.
    pub fn new(
        data: RecordTable,
        agent: Arc<dyn QaAgent>,
        extractor: Arc<dyn StructuredExtractor>,
        settings: EvalSettings,
    ) -> Result<Self, ConfigurationError> {
        settings.validate()?;
        let records = data.records()?;
        let bridge = AgentBridge::new(agent, extractor, Some(settings.template.clone()))?
            .with_no_answer(settings.no_answer.clone());

        Ok(Self {
            records,
            bridge: Arc::new(bridge),
            settings,
        })
    }

    /// Same as [`Evaluation::new`], extracting with an [`LlmExtractor`]
    /// built from `settings.extraction`.
    pub fn with_llm_extractor(
        data: RecordTable,
        agent: Arc<dyn QaAgent>,
        settings: EvalSettings,
    ) -> Result<Self, ConfigurationError> {
        settings.validate()?;
        let extractor = LlmExtractor::from_settings(settings.extraction.clone())
            .map_err(|e| ConfigurationError::invalid_settings(e.to_string()))?;
        Self::new(data, agent, Arc::new(extractor), settings)
    }

    /// Keyword configuration forwarded to every agent call.
    #[must_use]
    pub fn with_agent_kwargs(mut self, kwargs: AgentKwargs) -> Self {
        self.bridge = Arc::new((*self.bridge).clone().with_kwargs(kwargs));
        self
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn settings(&self) -> &EvalSettings {
        &self.settings
    }

    /// Run the benchmark.
    ///
    /// Per-sample failures never abort the run; they are scored or
    /// excluded according to the failure policy and counted in the result.
    pub async fn run(
        &self,
        max_samples: Option<usize>,
        time_limit: Option<Duration>,
    ) -> Result<EvaluationResult, ConfigurationError> {
        let started_at = Utc::now();
        let start = Instant::now();

        let samples = SampleBuilder::from_seed(self.settings.shuffle_seed)
            .with_no_answer(self.settings.no_answer.clone())
            .build_dataset(&self.records)?;

        log::info!(
            "Evaluating agent '{}' on {} samples (max_samples={:?}, time_limit={:?})",
            self.bridge.agent_name(),
            samples.len(),
            max_samples,
            time_limit
        );

        let runner = TaskRunner::new(
            Arc::clone(&self.bridge),
            McqScorer::new(self.settings.no_answer.clone()),
        )
        .with_concurrency(self.settings.concurrency);
        let logs = runner.run(samples, RunLimits::new(max_samples, time_limit)).await;

        let result = EvaluationResult::aggregate(
            self.bridge.agent_name(),
            started_at,
            logs,
            self.settings.agent_failure_policy,
            start.elapsed(),
        );

        if result.errored > 0 || result.cancelled > 0 {
            log::warn!(
                "Run {}: {} samples errored, {} cancelled",
                result.run_id,
                result.errored,
                result.cancelled
            );
        }
        log::info!(
            "Run {} finished: accuracy={:.3} precision={:.3} scored={}/{}",
            result.run_id,
            result.accuracy,
            result.precision,
            result.scored,
            result.total_samples
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentResponse, FnAgent};
    use crate::extraction::PatternExtractor;
    use serde_json::{json, Value};

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn table() -> RecordTable {
        RecordTable::from_json(
            &json!([
                {"question": "Which enzyme unwinds DNA?", "ideal": "Helicase", "distractors": ["Ligase", "Primase"]},
                {"question": "Which organelle makes ATP?", "ideal": "Mitochondrion", "distractors": ["Ribosome", "Golgi", "Lysosome"]},
                {"question": "What is the monomer of proteins?", "ideal": "Amino acid", "distractors": ["Nucleotide"]}
            ])
            .to_string(),
        )
        .unwrap()
    }

    fn extractor() -> Arc<dyn StructuredExtractor> {
        Arc::new(PatternExtractor::default())
    }

    const IDEALS: [&str; 3] = ["Helicase", "Mitochondrion", "Amino acid"];

    /// Finds the ideal answer's letter in the prompt.
    fn letter_of_ideal(prompt: &str) -> Option<String> {
        prompt.lines().find_map(|line| {
            let (letter, text) = line.split_once(") ")?;
            IDEALS.contains(&text).then(|| letter.trim().to_string())
        })
    }

    fn ideal_agent() -> Arc<dyn QaAgent> {
        Arc::new(FnAgent::new("ideal", |prompt: String, _kwargs| async move {
            let letter = letter_of_ideal(&prompt).unwrap_or_default();
            Ok::<_, anyhow::Error>(
                AgentResponse::new(format!("ANSWER: {}", letter))
                    .with_cost(0.5)
                    .with_tokens("stub-model", 10, 2),
            )
        }))
    }

    #[tokio::test]
    async fn test_stub_agent_scores_perfectly() {
        init_logger();
        let evaluation = Evaluation::new(
            table(),
            ideal_agent(),
            extractor(),
            EvalSettings::default().with_shuffle_seed(42),
        )
        .unwrap();

        let result = evaluation.run(None, None).await.unwrap();
        assert_eq!(result.total_samples, 3);
        assert_eq!(result.scored, 3);
        assert_eq!(result.accuracy, 1.0);
        assert_eq!(result.precision, 1.0);
        assert_eq!(result.coverage, 1.0);
        assert_eq!(result.total_cost(), 1.5);
        assert_eq!(result.token_counts().get("stub-model").unwrap().total(), 36);
        assert_eq!(result.agent, "ideal");
    }

    #[tokio::test]
    async fn test_abstaining_agent() {
        let agent = Arc::new(FnAgent::new("unsure", |_p, _k| async move {
            Ok::<_, anyhow::Error>("There is insufficient information to answer the question.")
        }));
        let evaluation =
            Evaluation::new(table(), agent, extractor(), EvalSettings::default()).unwrap();
        let result = evaluation.run(None, None).await.unwrap();
        assert_eq!(result.scored, 3);
        assert_eq!(result.accuracy, 0.0);
        assert_eq!(result.precision, 0.0);
        assert_eq!(result.coverage, 0.0);
    }

    #[tokio::test]
    async fn test_max_samples_limits_run() {
        let evaluation =
            Evaluation::new(table(), ideal_agent(), extractor(), EvalSettings::default()).unwrap();
        let result = evaluation.run(Some(2), None).await.unwrap();
        assert_eq!(result.total_samples, 2);
        assert_eq!(result.accuracy, 1.0);
    }

    #[tokio::test]
    async fn test_agent_failure_policy() {
        let failing = || -> Arc<dyn QaAgent> {
            Arc::new(FnAgent::new("failing", |prompt: String, _k| async move {
                if prompt.contains("ATP") {
                    Err(anyhow::anyhow!("retrieval index offline"))
                } else {
                    Ok(format!("ANSWER: {}", letter_of_ideal(&prompt).unwrap_or_default()))
                }
            }))
        };

        let scored = Evaluation::new(table(), failing(), extractor(), EvalSettings::default())
            .unwrap()
            .run(None, None)
            .await
            .unwrap();
        assert_eq!(scored.errored, 1);
        assert_eq!(scored.excluded, 0);
        assert_eq!(scored.scored, 3);
        assert!((scored.accuracy - 2.0 / 3.0).abs() < 1e-12);

        let settings = EvalSettings::default().with_agent_failure_policy(AgentFailurePolicy::Exclude);
        let excluded = Evaluation::new(table(), failing(), extractor(), settings)
            .unwrap()
            .run(None, None)
            .await
            .unwrap();
        assert_eq!(excluded.errored, 1);
        assert_eq!(excluded.excluded, 1);
        assert_eq!(excluded.scored, 2);
        assert_eq!(excluded.accuracy, 1.0);
    }

    #[tokio::test]
    async fn test_time_limit_reports_cancelled() {
        let agent = Arc::new(FnAgent::new("slow", |_p, _k| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, anyhow::Error>("ANSWER: A")
        }));
        let evaluation =
            Evaluation::new(table(), agent, extractor(), EvalSettings::default()).unwrap();
        let result = evaluation
            .run(None, Some(Duration::from_millis(50)))
            .await
            .unwrap();
        assert_eq!(result.cancelled, 3);
        assert_eq!(result.scored, 0);
        assert_eq!(result.accuracy, 0.0);
    }

    #[tokio::test]
    async fn test_time_limit_scores_only_finished_samples() {
        // DNA abstains, proteins answer correctly, ATP stalls past the limit.
        let agent = Arc::new(FnAgent::new("partial", |prompt: String, _k| async move {
            if prompt.contains("ATP") {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            if prompt.contains("DNA") {
                return Ok::<_, anyhow::Error>("There is insufficient information to answer the question.".to_string());
            }
            Ok(format!("ANSWER: {}", letter_of_ideal(&prompt).unwrap_or_default()))
        }));
        let result = Evaluation::new(table(), agent, extractor(), EvalSettings::default())
            .unwrap()
            .run(None, Some(Duration::from_millis(300)))
            .await
            .unwrap();

        assert_eq!(result.total_samples, 3);
        assert_eq!(result.scored, 2);
        assert_eq!(result.cancelled, 1);
        assert_eq!(result.scored + result.cancelled, result.total_samples);
        assert_eq!(result.accuracy, 0.5);
        assert_eq!(result.precision, 1.0);
        assert_eq!(result.coverage, 0.5);

        let stalled = &result.samples[1];
        assert_eq!(stalled.status, SampleStatus::Cancelled);
        assert!(stalled.score.is_none());
        assert!(result.samples[0].score.is_some());
        assert!(result.samples[2].score.is_some());
    }

    #[tokio::test]
    async fn test_unbounded_time_limit_completes_run() {
        let result = Evaluation::new(table(), ideal_agent(), extractor(), EvalSettings::default())
            .unwrap()
            .run(None, Some(Duration::MAX))
            .await
            .unwrap();
        assert_eq!(result.scored, 3);
        assert_eq!(result.cancelled, 0);
        assert_eq!(result.accuracy, 1.0);
    }

    #[tokio::test]
    async fn test_agent_kwargs_reach_agent() {
        let agent = Arc::new(FnAgent::new("kw", |prompt: String, kwargs: AgentKwargs| async move {
            let letter = if kwargs.get("cheat").and_then(Value::as_bool) == Some(true) {
                letter_of_ideal(&prompt).unwrap_or_default()
            } else {
                "Z".to_string()
            };
            Ok::<_, anyhow::Error>(format!("ANSWER: {}", letter))
        }));
        let mut kwargs = AgentKwargs::new();
        kwargs.insert("cheat".to_string(), Value::Bool(true));

        let result = Evaluation::new(table(), agent, extractor(), EvalSettings::default())
            .unwrap()
            .with_agent_kwargs(kwargs)
            .run(None, None)
            .await
            .unwrap();
        assert_eq!(result.accuracy, 1.0);
    }

    #[test]
    fn test_construction_errors() {
        let missing = RecordTable::from_json(r#"[{"question": "Q?", "ideal": "a"}]"#).unwrap();
        let err = Evaluation::new(missing, ideal_agent(), extractor(), EvalSettings::default())
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingColumns { ref missing } if missing == &vec!["distractors".to_string()]));

        let bad_template = EvalSettings::default().with_template("no placeholder here");
        let err = Evaluation::new(table(), ideal_agent(), extractor(), bad_template).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidTemplate { .. }));
    }

    #[test]
    fn test_llm_extractor_rejects_bad_timeout_before_building() {
        for timeout_secs in [1e20, f64::INFINITY] {
            let mut settings = EvalSettings::default();
            settings.extraction.timeout_secs = timeout_secs;
            let err = Evaluation::with_llm_extractor(table(), ideal_agent(), settings).unwrap_err();
            assert!(matches!(err, ConfigurationError::InvalidSettings { .. }));
            assert!(err.to_string().contains("timeout_secs"));
        }
    }

    #[tokio::test]
    async fn test_write_json() {
        let result = Evaluation::new(
            table(),
            ideal_agent(),
            extractor(),
            EvalSettings::default().with_shuffle_seed(1),
        )
        .unwrap()
        .run(None, None)
        .await
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.json");
        result.write_json(&path).unwrap();

        let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["accuracy"], 1.0);
        assert_eq!(written["samples"].as_array().unwrap().len(), 3);
        assert_eq!(written["samples"][0]["score"]["value"], "CORRECT");
        assert_eq!(written["run_id"], result.run_id.as_str());
    }
}
