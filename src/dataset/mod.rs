//! Question records and multiple-choice samples.
//!
//! A [`Record`] is one row of the input table: a question, its ideal answer,
//! and a list of distractors. The [`SampleBuilder`] turns each record into a
//! [`Sample`] with shuffled, lettered choices and the abstention choice
//! appended last.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::utilities::errors::ConfigurationError;

/// Text of the abstention choice appended to every sample.
pub const UNCERTAIN_ANSWER_CHOICE: &str = "Insufficient information to answer the question.";

/// Columns every input table must provide.
pub const REQUIRED_COLUMNS: [&str; 3] = ["question", "ideal", "distractors"];

/// Letter for the choice at `index` (`0 -> 'A'`).
pub fn choice_letter(index: usize) -> String {
    if index < 26 {
        char::from(b'A' + index as u8).to_string()
    } else {
        // Past Z: AA, AB, ...
        format!("{}{}", choice_letter(index / 26 - 1), choice_letter(index % 26))
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// One multiple-choice question as it appears in the input table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub question: String,
    /// The correct answer text.
    pub ideal: String,
    /// Incorrect answer texts.
    pub distractors: Vec<String>,
}

impl Record {
    pub fn new(
        question: impl Into<String>,
        ideal: impl Into<String>,
        distractors: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            question: question.into(),
            ideal: ideal.into(),
            distractors: distractors.into_iter().map(Into::into).collect(),
        }
    }

    /// Check the record can become a sample. `row` is only used for the message.
    pub fn validate(&self, row: usize) -> Result<(), ConfigurationError> {
        if self.question.trim().is_empty() {
            return Err(ConfigurationError::invalid_record(row, "question is empty"));
        }
        if self.ideal.trim().is_empty() {
            return Err(ConfigurationError::invalid_record(row, "ideal answer is empty"));
        }
        if self.distractors.is_empty() {
            return Err(ConfigurationError::invalid_record(row, "distractors is empty"));
        }
        if self.distractors.iter().any(|d| d == &self.ideal) {
            return Err(ConfigurationError::invalid_record(
                row,
                format!("ideal answer '{}' also appears among distractors", self.ideal),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Record table
// ---------------------------------------------------------------------------

/// Row-oriented input table, the shape of a dataframe exported as records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordTable {
    rows: Vec<Map<String, Value>>,
}

impl RecordTable {
    pub fn from_records(rows: Vec<Map<String, Value>>) -> Self {
        Self { rows }
    }

    /// Parse a JSON array of row objects.
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        let rows: Vec<Map<String, Value>> = serde_json::from_str(json).map_err(|e| {
            ConfigurationError::invalid_table(format!("expected a JSON array of objects: {}", e))
        })?;
        Ok(Self::from_records(rows))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Columns present in every row. Empty for a table with no rows.
    pub fn columns(&self) -> BTreeSet<String> {
        let mut rows = self.rows.iter();
        let Some(first) = rows.next() else {
            return BTreeSet::new();
        };
        let mut columns: BTreeSet<String> = first.keys().cloned().collect();
        for row in rows {
            columns.retain(|c| row.contains_key(c));
        }
        columns
    }

    /// Required columns absent from at least one row. A table with no rows
    /// has no row lacking a column, so nothing is reported missing.
    pub fn missing_columns(&self) -> Vec<String> {
        if self.rows.is_empty() {
            return Vec::new();
        }
        let columns = self.columns();
        REQUIRED_COLUMNS
            .iter()
            .filter(|c| !columns.contains(**c))
            .map(|c| c.to_string())
            .collect()
    }

    /// Convert and validate every row. An empty table yields no records.
    ///
    /// # Errors
    /// [`ConfigurationError::MissingColumns`] listing every missing column, or
    /// [`ConfigurationError::InvalidRecord`] for the first bad row.
    pub fn records(&self) -> Result<Vec<Record>, ConfigurationError> {
        let missing = self.missing_columns();
        if !missing.is_empty() {
            return Err(ConfigurationError::MissingColumns { missing });
        }

        self.rows
            .iter()
            .enumerate()
            .map(|(row, fields)| {
                let record = Record {
                    question: string_field(fields, "question", row)?,
                    ideal: string_field(fields, "ideal", row)?,
                    distractors: string_list_field(fields, "distractors", row)?,
                };
                record.validate(row)?;
                Ok(record)
            })
            .collect()
    }
}

fn string_field(fields: &Map<String, Value>, name: &str, row: usize) -> Result<String, ConfigurationError> {
    match fields.get(name) {
        Some(Value::String(s)) => Ok(s.clone()),
        other => Err(ConfigurationError::invalid_record(
            row,
            format!("column '{}' must be a string, got {}", name, type_name(other)),
        )),
    }
}

fn string_list_field(
    fields: &Map<String, Value>,
    name: &str,
    row: usize,
) -> Result<Vec<String>, ConfigurationError> {
    let Some(Value::Array(items)) = fields.get(name) else {
        return Err(ConfigurationError::invalid_record(
            row,
            format!("column '{}' must be a list of strings, got {}", name, type_name(fields.get(name))),
        ));
    };
    items
        .iter()
        .map(|item| match item {
            Value::String(s) => Ok(s.clone()),
            other => Err(ConfigurationError::invalid_record(
                row,
                format!("column '{}' contains a non-string item {}", name, other),
            )),
        })
        .collect()
}

fn type_name(value: Option<&Value>) -> &'static str {
    match value {
        None => "nothing",
        Some(Value::Null) => "null",
        Some(Value::Bool(_)) => "a boolean",
        Some(Value::Number(_)) => "a number",
        Some(Value::String(_)) => "a string",
        Some(Value::Array(_)) => "a list",
        Some(Value::Object(_)) => "an object",
    }
}

// ---------------------------------------------------------------------------
// Sample
// ---------------------------------------------------------------------------

/// A formatted multiple-choice question with a known correct letter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Position in the source table.
    pub id: usize,
    /// Question line followed by one `LETTER) text` line per choice.
    pub prompt: String,
    /// Shuffled answers followed by the abstention choice.
    pub choices: Vec<String>,
    /// Letter of the ideal answer.
    pub target: String,
}

impl Sample {
    /// Letters for every choice, in order.
    pub fn letters(&self) -> Vec<String> {
        (0..self.choices.len()).map(choice_letter).collect()
    }

    /// Letter of the abstention choice (always the last one).
    pub fn no_answer_letter(&self) -> String {
        choice_letter(self.choices.len().saturating_sub(1))
    }

    /// Choice text for `letter`, if the sample has one.
    pub fn choice_for(&self, letter: &str) -> Option<&str> {
        self.letters()
            .iter()
            .position(|l| l == letter)
            .map(|idx| self.choices[idx].as_str())
    }
}

// ---------------------------------------------------------------------------
// Sample builder
// ---------------------------------------------------------------------------

/// Turns records into samples.
///
/// Seed the builder for reproducible shuffles; an unseeded builder draws its
/// seed from the operating system.
#[derive(Debug)]
pub struct SampleBuilder {
    rng: StdRng,
    no_answer: String,
}

impl Default for SampleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleBuilder {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            no_answer: UNCERTAIN_ANSWER_CHOICE.to_string(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            no_answer: UNCERTAIN_ANSWER_CHOICE.to_string(),
        }
    }

    pub fn from_seed(seed: Option<u64>) -> Self {
        seed.map_or_else(Self::new, Self::seeded)
    }

    /// Use a different abstention text.
    #[must_use]
    pub fn with_no_answer(mut self, no_answer: impl Into<String>) -> Self {
        self.no_answer = no_answer.into();
        self
    }

    /// Build one sample. `id` is carried through to the sample unchanged.
    pub fn build_sample(&mut self, id: usize, record: &Record) -> Result<Sample, ConfigurationError> {
        record.validate(id)?;

        // Shuffle positions rather than texts so duplicate distractors never
        // make the ideal's position ambiguous. Position 0 is the ideal.
        let mut order: Vec<usize> = (0..=record.distractors.len()).collect();
        order.shuffle(&mut self.rng);

        let mut choices: Vec<String> = order
            .iter()
            .map(|&i| {
                if i == 0 {
                    record.ideal.clone()
                } else {
                    record.distractors[i - 1].clone()
                }
            })
            .collect();
        choices.push(self.no_answer.clone());

        let ideal_idx = order.iter().position(|&i| i == 0).unwrap_or(0);
        let prompt = format_prompt(&record.question, &choices);

        Ok(Sample {
            id,
            prompt,
            choices,
            target: choice_letter(ideal_idx),
        })
    }

    /// Build every sample, in input order.
    pub fn build_dataset(&mut self, records: &[Record]) -> Result<Vec<Sample>, ConfigurationError> {
        records
            .iter()
            .enumerate()
            .map(|(id, record)| self.build_sample(id, record))
            .collect()
    }
}

/// `Question: ...` followed by lettered choices.
pub fn format_prompt(question: &str, choices: &[String]) -> String {
    let lines: Vec<String> = choices
        .iter()
        .enumerate()
        .map(|(i, choice)| format!("{}) {}", choice_letter(i), choice))
        .collect();
    format!("Question: {}\n{}", question.trim(), lines.join("\n"))
}
