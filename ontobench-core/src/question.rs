//! Question rows: the unit of work handed to the orchestrator.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::table::ResultTable;

/// Column holding the ontology entity a question is scoped to.
pub const ROOT_ENTITY_COLUMN: &str = "Root Entity";
/// Column holding the answer type label.
pub const ANSWER_TYPE_COLUMN: &str = "Answer Type";
/// Column holding the gold answer.
pub const ANSWER_COLUMN: &str = "Answer";
/// Column holding per-row explanation guidance, when present.
pub const EXPLANATION_COLUMN: &str = "explanation_context";

/// Question columns the orchestrator falls back to, in order.
pub const QUESTION_COLUMN_FALLBACKS: [&str; 2] = ["Question", "SPARQL Query"];

/// Expected answer shape; drives prompt instructions and scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerType {
    Binary,
    MultiChoice,
    Other,
}

impl AnswerType {
    /// Parse the label used in question CSVs (`BIN`, `binary`, `MC`, `multi choice`).
    pub fn parse(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "binary" | "bin" => Self::Binary,
            "multi choice" | "multi_choice" | "multichoice" | "mc" => Self::MultiChoice,
            _ => Self::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Binary => "binary",
            Self::MultiChoice => "multi choice",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for AnswerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One evaluable unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionRow {
    /// Stable identifier, unique within a batch
    pub index: usize,
    /// Question or formal query sent to the model
    pub query_text: String,
    /// Entity used to look up ontology context
    pub root_entity: String,
    pub answer_type: AnswerType,
    /// Gold answer, used only for scoring
    pub expected_answer: Option<String>,
    /// Reasoning guidance for explanation-guided prompts
    pub explanation_context: Option<String>,
}

impl QuestionRow {
    pub fn new(
        index: usize,
        query_text: impl Into<String>,
        root_entity: impl Into<String>,
        answer_type: AnswerType,
    ) -> Self {
        Self {
            index,
            query_text: query_text.into(),
            root_entity: root_entity.into(),
            answer_type,
            expected_answer: None,
            explanation_context: None,
        }
    }

    pub fn with_expected(mut self, answer: impl Into<String>) -> Self {
        self.expected_answer = Some(answer.into());
        self
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation_context = Some(explanation.into());
        self
    }

    /// Extract question rows from a table.
    ///
    /// `question_column` must exist; `Root Entity` and `Answer Type` are
    /// required, `Answer` and `explanation_context` are optional.
    pub fn from_table(table: &ResultTable, question_column: &str) -> Result<Vec<Self>> {
        for required in [question_column, ROOT_ENTITY_COLUMN, ANSWER_TYPE_COLUMN] {
            if !table.has_column(required) {
                return Err(Error::validation(format!(
                    "input table is missing required column '{}'",
                    required
                )));
            }
        }

        let mut rows = Vec::with_capacity(table.len());
        for index in table.indices() {
            let cell = |column: &str| table.get(index, column).unwrap_or_default().to_string();
            let optional = |column: &str| {
                table
                    .get(index, column)
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
            };

            rows.push(Self {
                index,
                query_text: cell(question_column),
                root_entity: cell(ROOT_ENTITY_COLUMN).trim().to_string(),
                answer_type: AnswerType::parse(&cell(ANSWER_TYPE_COLUMN)),
                expected_answer: optional(ANSWER_COLUMN),
                explanation_context: optional(EXPLANATION_COLUMN),
            });
        }
        Ok(rows)
    }
}

/// Check that no index appears twice in a batch.
pub fn ensure_unique_indices(rows: &[QuestionRow]) -> Result<()> {
    let mut seen = HashSet::with_capacity(rows.len());
    for row in rows {
        if !seen.insert(row.index) {
            return Err(Error::validation(format!(
                "row index {} appears more than once in the batch",
                row.index
            )));
        }
    }
    Ok(())
}
