//! Token and cost telemetry.
//!
//! Samples finish in any order, so every accumulation here is plain
//! addition: merging the same set of reports in any order yields the same
//! totals.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Prompt and completion tokens for one model.
///
/// Serialized as a `[prompt_tokens, completion_tokens]` pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u64; 2]", into = "[u64; 2]")]
pub struct TokenPair {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenPair {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

impl From<[u64; 2]> for TokenPair {
    fn from(pair: [u64; 2]) -> Self {
        Self::new(pair[0], pair[1])
    }
}

impl From<TokenPair> for [u64; 2] {
    fn from(pair: TokenPair) -> Self {
        [pair.prompt_tokens, pair.completion_tokens]
    }
}

/// Token usage keyed by model name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenCounts(BTreeMap<String, TokenPair>);

impl TokenCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add usage for `model` to whatever is already recorded.
    pub fn record(&mut self, model: impl Into<String>, prompt_tokens: u64, completion_tokens: u64) {
        let entry = self.0.entry(model.into()).or_default();
        entry.prompt_tokens += prompt_tokens;
        entry.completion_tokens += completion_tokens;
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: &TokenCounts) {
        for (model, pair) in &other.0 {
            self.record(model.clone(), pair.prompt_tokens, pair.completion_tokens);
        }
    }

    pub fn get(&self, model: &str) -> Option<TokenPair> {
        self.0.get(model).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TokenPair)> {
        self.0.iter()
    }

    /// Sum over all models.
    pub fn total(&self) -> TokenPair {
        self.0.values().fold(TokenPair::default(), |acc, p| {
            TokenPair::new(
                acc.prompt_tokens + p.prompt_tokens,
                acc.completion_tokens + p.completion_tokens,
            )
        })
    }
}

impl<S: Into<String>> FromIterator<(S, TokenPair)> for TokenCounts {
    fn from_iter<I: IntoIterator<Item = (S, TokenPair)>>(iter: I) -> Self {
        let mut counts = TokenCounts::new();
        for (model, pair) in iter {
            counts.record(model, pair.prompt_tokens, pair.completion_tokens);
        }
        counts
    }
}

/// Cost and token usage accumulated over a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageMetrics {
    /// Total reported cost, in the agent's currency unit.
    pub total_cost: f64,
    /// Tokens per model.
    pub token_counts: TokenCounts,
    /// Number of reports folded in.
    pub reports: u64,
}

impl UsageMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one sample's telemetry in.
    pub fn add(&mut self, cost: Option<f64>, token_counts: &TokenCounts) {
        self.total_cost += cost.unwrap_or(0.0);
        self.token_counts.merge(token_counts);
        self.reports += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accumulates() {
        let mut counts = TokenCounts::new();
        counts.record("gpt-4o-mini", 100, 20);
        counts.record("gpt-4o-mini", 50, 5);
        assert_eq!(counts.get("gpt-4o-mini"), Some(TokenPair::new(150, 25)));
        assert_eq!(counts.total().total(), 175);
    }

    #[test]
    fn test_merge_is_order_independent() {
        let a: TokenCounts = [("m1", TokenPair::new(1, 2))].into_iter().collect();
        let b: TokenCounts = [("m1", TokenPair::new(10, 20)), ("m2", TokenPair::new(3, 4))]
            .into_iter()
            .collect();

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);
        assert_eq!(ab, ba);
        assert_eq!(ab.get("m1"), Some(TokenPair::new(11, 22)));
    }

    #[test]
    fn test_serializes_as_pairs() {
        let counts: TokenCounts = [("gpt-4o-mini", TokenPair::new(7, 3))].into_iter().collect();
        let json = serde_json::to_value(&counts).unwrap();
        assert_eq!(json, serde_json::json!({"gpt-4o-mini": [7, 3]}));

        let back: TokenCounts = serde_json::from_value(json).unwrap();
        assert_eq!(back, counts);
    }

    #[test]
    fn test_usage_metrics_add() {
        let mut usage = UsageMetrics::new();
        let counts: TokenCounts = [("m", TokenPair::new(1, 1))].into_iter().collect();
        usage.add(Some(0.25), &counts);
        usage.add(None, &TokenCounts::new());
        assert_eq!(usage.total_cost, 0.25);
        assert_eq!(usage.reports, 2);
        assert_eq!(usage.token_counts.get("m"), Some(TokenPair::new(1, 1)));

        let mut reversed = UsageMetrics::new();
        reversed.add(None, &TokenCounts::new());
        reversed.add(Some(0.25), &counts);
        assert_eq!(reversed, usage);
    }
}
