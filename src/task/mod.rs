//! Task runtime: drives samples through a bridge and a scorer.
//!
//! Samples run concurrently with a bounded number in flight. A whole-run
//! time limit turns into a single deadline; samples still running when it
//! passes are dropped and logged as [`SampleStatus::Cancelled`], and
//! samples not yet started are never started.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use crate::bridge::{AgentBridge, BridgedOutput, RawSample};
use crate::config::DEFAULT_CONCURRENCY;
use crate::dataset::Sample;
use crate::scoring::{McqScorer, Score};

/// Caps applied to one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunLimits {
    /// Evaluate at most this many samples, taken in dataset order.
    pub max_samples: Option<usize>,
    /// Wall-clock budget for the whole run.
    pub time_limit: Option<Duration>,
}

impl RunLimits {
    pub fn new(max_samples: Option<usize>, time_limit: Option<Duration>) -> Self {
        Self {
            max_samples,
            time_limit,
        }
    }
}

/// Terminal state of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleStatus {
    /// The bridge produced output and it was scored.
    Completed,
    /// The bridge failed. The sample still carries an INCORRECT score.
    Errored,
    /// The run's time limit passed first. Never scored.
    Cancelled,
}

/// Per-sample record kept by the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleLog {
    pub sample_id: usize,
    pub target: String,
    pub status: SampleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<BridgedOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<Score>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether an error came from the agent rather than extraction.
    #[serde(default)]
    pub agent_failure: bool,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl SampleLog {
    fn cancelled(sample: &Sample, duration: Duration) -> Self {
        Self {
            sample_id: sample.id,
            target: sample.target.clone(),
            status: SampleStatus::Cancelled,
            output: None,
            score: None,
            error: None,
            agent_failure: false,
            duration,
        }
    }

    pub fn cost(&self) -> f64 {
        self.output.as_ref().map_or(0.0, |o| o.cost)
    }
}

/// Runs samples through an [`AgentBridge`] and scores each result.
#[derive(Debug, Clone)]
pub struct TaskRunner {
    bridge: Arc<AgentBridge>,
    scorer: McqScorer,
    concurrency: usize,
}

impl TaskRunner {
    pub fn new(bridge: Arc<AgentBridge>, scorer: McqScorer) -> Self {
        Self {
            bridge,
            scorer,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Run every sample to a terminal state. Logs come back in sample
    /// order regardless of completion order.
    pub async fn run(&self, samples: Vec<Sample>, limits: RunLimits) -> Vec<SampleLog> {
        let take = limits.max_samples.unwrap_or(samples.len());
        // A limit too large to represent as an instant means no deadline.
        let deadline = limits
            .time_limit
            .and_then(|limit| tokio::time::Instant::now().checked_add(limit));

        log::debug!(
            "Running {} samples with concurrency {}",
            take.min(samples.len()),
            self.concurrency
        );

        let mut logs: Vec<SampleLog> = stream::iter(samples.into_iter().take(take))
            .map(|sample| self.run_sample(sample, deadline))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        logs.sort_by_key(|log| log.sample_id);
        logs
    }

    async fn run_sample(&self, sample: Sample, deadline: Option<tokio::time::Instant>) -> SampleLog {
        let start = Instant::now();

        if deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
            return SampleLog::cancelled(&sample, Duration::ZERO);
        }

        let raw = RawSample::from_sample(&sample);
        let result = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, self.bridge.run(&raw)).await {
                Ok(result) => result,
                Err(_) => {
                    log::warn!("Sample {} cancelled by the run time limit", sample.id);
                    return SampleLog::cancelled(&sample, start.elapsed());
                }
            },
            None => self.bridge.run(&raw).await,
        };

        let score = self.scorer.score_result(&result, &sample.target);
        let duration = start.elapsed();

        match result {
            Ok(output) => {
                log::debug!(
                    "Sample {}: answer={} target={} -> {}",
                    sample.id,
                    output.answer,
                    sample.target,
                    score.value
                );
                SampleLog {
                    sample_id: sample.id,
                    target: sample.target,
                    status: SampleStatus::Completed,
                    output: Some(output),
                    score: Some(score),
                    error: None,
                    agent_failure: false,
                    duration,
                }
            }
            Err(e) => {
                log::warn!("Sample {} failed: {}", sample.id, e);
                SampleLog {
                    sample_id: sample.id,
                    target: sample.target,
                    status: SampleStatus::Errored,
                    output: None,
                    score: Some(score),
                    error: Some(e.to_string()),
                    agent_failure: e.is_agent_failure(),
                    duration,
                }
            }
        }
    }
}

/// Durations as fractional seconds.
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}
