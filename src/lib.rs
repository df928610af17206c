//! # mcq-eval
//!
//! Benchmark question-answering agents on multiple-choice datasets.
//!
//! Each record (`question`, `ideal`, `distractors`) becomes a sample with
//! shuffled lettered choices and a trailing "insufficient information"
//! option. A bridge hands each sample to the agent under test, turns the
//! agent's free-text reply into a structured answer, and the scorer rates it
//! CORRECT, INCORRECT or NOANSWER. The run reports accuracy, precision
//! (accuracy on answered samples) and coverage, plus the agent's cost and
//! token usage.
//!
//! Entry point: [`Evaluation`].

pub mod agents;
pub mod bridge;
pub mod config;
pub mod dataset;
pub mod evaluation;
pub mod extraction;
pub mod llm;
pub mod scoring;
pub mod task;
pub mod types;
pub mod utilities;

pub use agents::{AgentResponse, DirectLlmAgent, FnAgent, QaAgent};
pub use bridge::{make_bridge, AgentBridge, BridgedOutput, RawSample};
pub use config::{AgentFailurePolicy, EvalSettings, LlmSettings};
pub use dataset::{Record, RecordTable, Sample, SampleBuilder, UNCERTAIN_ANSWER_CHOICE};
pub use evaluation::{Evaluation, EvaluationResult};
pub use extraction::{LlmExtractor, PatternExtractor, StructuredExtractor};
pub use scoring::{McqScorer, Outcome, Score};
pub use utilities::errors::{
    AgentInvocationError, BridgeError, ConfigurationError, ExtractionError, LlmError,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
