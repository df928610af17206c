//! Multiple-choice scoring and aggregate metrics.
//!
//! The scorer compares a bridged answer to the sample's target letter and
//! never fails: anything it cannot read is scored [`Outcome::Incorrect`]
//! with the reason recorded in the explanation.

use serde::{Deserialize, Serialize};

use crate::bridge::BridgedOutput;
use crate::dataset::UNCERTAIN_ANSWER_CHOICE;
use crate::utilities::errors::BridgeError;

// ---------------------------------------------------------------------------
// Outcome and score
// ---------------------------------------------------------------------------

/// Result category of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Correct,
    Incorrect,
    /// The agent chose the abstention option.
    NoAnswer,
}

impl Outcome {
    /// Numeric value used by the metrics. `-1.0` only marks abstentions
    /// for filtering and is never averaged.
    pub fn as_f64(self) -> f64 {
        match self {
            Outcome::Correct => 1.0,
            Outcome::Incorrect => 0.0,
            Outcome::NoAnswer => -1.0,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Outcome::Correct => "CORRECT",
            Outcome::Incorrect => "INCORRECT",
            Outcome::NoAnswer => "NOANSWER",
        };
        f.write_str(s)
    }
}

/// Score for one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub value: Outcome,
    /// The answer that was scored, if one could be read.
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl Score {
    pub fn new(value: Outcome, answer: impl Into<String>) -> Self {
        Self {
            value,
            answer: Some(answer.into()),
            explanation: None,
        }
    }

    /// INCORRECT score for a sample whose output could not be read.
    pub fn unreadable(reason: impl Into<String>) -> Self {
        Self {
            value: Outcome::Incorrect,
            answer: None,
            explanation: Some(reason.into()),
        }
    }

    #[must_use]
    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

/// Scores bridged answers against target letters.
#[derive(Debug, Clone)]
pub struct McqScorer {
    no_answer: String,
}

impl Default for McqScorer {
    fn default() -> Self {
        Self::new(UNCERTAIN_ANSWER_CHOICE)
    }
}

impl McqScorer {
    pub fn new(no_answer: impl Into<String>) -> Self {
        Self {
            no_answer: no_answer.into(),
        }
    }

    pub fn no_answer(&self) -> &str {
        &self.no_answer
    }

    /// Classify one answer. Rules apply in order:
    ///
    /// 1. target and answer are both the sentinel: CORRECT
    /// 2. answer is the sentinel: NOANSWER
    /// 3. answer equals the target: CORRECT
    /// 4. otherwise: INCORRECT
    pub fn classify(&self, answer: &str, target: &str) -> Outcome {
        let answer_na = answer == self.no_answer;
        if target == self.no_answer && answer_na {
            Outcome::Correct
        } else if answer_na {
            Outcome::NoAnswer
        } else if answer == target {
            Outcome::Correct
        } else {
            Outcome::Incorrect
        }
    }

    pub fn score(&self, output: &BridgedOutput, target: &str) -> Score {
        let value = self.classify(&output.answer, target);
        let score = Score::new(value, output.answer.clone());
        if output.explanation.is_empty() {
            score
        } else {
            score.with_explanation(output.explanation.clone())
        }
    }

    /// Score a serialized [`BridgedOutput`].
    pub fn score_json(&self, raw: &str, target: &str) -> Score {
        match serde_json::from_str::<BridgedOutput>(raw) {
            Ok(output) => self.score(&output, target),
            Err(e) => Score::unreadable(format!("could not parse bridged output: {}", e)),
        }
    }

    /// Score the outcome of a bridge run. Failures become INCORRECT with
    /// the error as explanation.
    pub fn score_result(&self, result: &Result<BridgedOutput, BridgeError>, target: &str) -> Score {
        match result {
            Ok(output) => self.score(output, target),
            Err(e) => Score::unreadable(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

fn count(scores: &[Score], outcome: Outcome) -> usize {
    scores.iter().filter(|s| s.value == outcome).count()
}

/// CORRECT over all scored samples.
pub fn accuracy(scores: &[Score]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    count(scores, Outcome::Correct) as f64 / scores.len() as f64
}

/// CORRECT over samples the agent attempted (not NOANSWER). `0.0` when no
/// sample was attempted.
pub fn precision(scores: &[Score]) -> f64 {
    let attempted = scores.len() - count(scores, Outcome::NoAnswer);
    if attempted == 0 {
        return 0.0;
    }
    count(scores, Outcome::Correct) as f64 / attempted as f64
}

/// Fraction of samples the agent attempted.
pub fn coverage(scores: &[Score]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let attempted = scores.len() - count(scores, Outcome::NoAnswer);
    attempted as f64 / scores.len() as f64
}
