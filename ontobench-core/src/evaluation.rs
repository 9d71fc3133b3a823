//! Exact-match evaluation of recorded responses against gold answers.
//!
//! Answers are compared as sets of lowercased items. A response column
//! `{model}_response` gains `{model}_response_precision`, `_recall`, `_f1`
//! and `_accuracy` columns, where accuracy is the Jaccard index of the two
//! sets.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::aggregate::RESPONSE_SUFFIX;
use crate::error::Result;
use crate::explanation::ExplanationIndex;
use crate::question::{ANSWER_COLUMN, ANSWER_TYPE_COLUMN};
use crate::table::ResultTable;

/// Column holding the formal query used to match tag complexity.
pub const QUERY_COLUMN: &str = "SPARQL Query";
pub const SHORTEST_TAG_COLUMN: &str = "shortest_tag_complexity";
pub const LONGEST_TAG_COLUMN: &str = "longest_tag_complexity";

/// Suffixes of the per-model evaluation columns.
pub const EVALUATION_SUFFIXES: [&str; 4] = ["precision", "recall", "f1", "accuracy"];

/// Split an answer cell into its lowercased items.
///
/// Accepts list literals (`['a', "b"]`), quoted scalars, `TRUE`/`FALSE` and
/// plain comma-separated text.
pub fn parse_answer_list(text: &str) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    if let Some(inner) = text.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
        return parse_list_items(inner).unwrap_or_else(|| split_commas(inner));
    }

    if let Some(scalar) = unquote(text) {
        return vec![scalar.trim().to_lowercase()];
    }

    split_commas(text)
}

fn split_commas(text: &str) -> Vec<String> {
    text.split(',')
        .map(|item| item.trim().to_lowercase())
        .filter(|item| !item.is_empty())
        .collect()
}

/// The content of a fully quoted string, if `text` is one.
fn unquote(text: &str) -> Option<&str> {
    let quote = text.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let inner = text.strip_prefix(quote)?.strip_suffix(quote)?;
    (!inner.is_empty() && !inner.contains(quote)).then_some(inner)
}

/// Parse the inside of a list literal. `None` when the quoting is malformed.
fn parse_list_items(inner: &str) -> Option<Vec<String>> {
    let mut items = Vec::new();
    let mut chars = inner.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let Some(&first) = chars.peek() else {
            break;
        };

        let item = if first == '\'' || first == '"' {
            chars.next();
            let mut value = String::new();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => value.push(chars.next()?),
                    c if c == first => {
                        closed = true;
                        break;
                    }
                    c => value.push(c),
                }
            }
            if !closed {
                return None;
            }
            value
        } else {
            let mut value = String::new();
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                value.push(c);
                chars.next();
            }
            value
        };
        items.push(item.trim().to_lowercase());

        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        match chars.next() {
            None => break,
            Some(',') => continue,
            Some(_) => return None,
        }
    }

    Some(items)
}

/// Set overlap between a gold and a predicted answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCounts {
    pub n_correct: usize,
    pub n_gold: usize,
    pub n_pred: usize,
}

impl MatchCounts {
    pub fn union(&self) -> usize {
        self.n_gold + self.n_pred - self.n_correct
    }
}

pub fn exact_match(gold: &[String], pred: &[String]) -> MatchCounts {
    let gold: BTreeSet<&str> = gold.iter().map(String::as_str).collect();
    let pred: BTreeSet<&str> = pred.iter().map(String::as_str).collect();
    MatchCounts {
        n_correct: gold.intersection(&pred).count(),
        n_gold: gold.len(),
        n_pred: pred.len(),
    }
}

/// How a prediction matched its gold answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Perfect,
    Partial,
    Zero,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExactMatchMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy: f64,
}

impl ExactMatchMetrics {
    pub fn from_counts(counts: MatchCounts) -> Self {
        let ratio = |num: usize, den: usize| if den > 0 { num as f64 / den as f64 } else { 0.0 };

        let precision = ratio(counts.n_correct, counts.n_pred);
        let recall = ratio(counts.n_correct, counts.n_gold);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        // Two empty answers agree
        let accuracy = match counts.union() {
            0 => 1.0,
            union => counts.n_correct as f64 / union as f64,
        };

        Self {
            precision,
            recall,
            f1,
            accuracy,
        }
    }

    /// Score a pair of raw answer cells.
    pub fn score(gold: &str, pred: &str) -> Self {
        Self::from_counts(exact_match(&parse_answer_list(gold), &parse_answer_list(pred)))
    }

    pub fn match_type(&self) -> MatchType {
        if self.accuracy >= 1.0 {
            MatchType::Perfect
        } else if self.accuracy > 0.0 {
            MatchType::Partial
        } else {
            MatchType::Zero
        }
    }
}

/// Aggregate scores for one response column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelEvaluationSummary {
    pub model: String,
    pub rows: usize,
    pub mean_precision: f64,
    pub mean_recall: f64,
    pub mean_f1: f64,
    pub mean_accuracy: f64,
    pub perfect: usize,
    pub partial: usize,
    pub zero: usize,
    /// Mean accuracy per answer-type label
    pub accuracy_by_answer_type: BTreeMap<String, f64>,
}

impl ModelEvaluationSummary {
    fn from_scores(model: String, scores: &[(String, ExactMatchMetrics)]) -> Self {
        let rows = scores.len();
        let mean = |f: fn(&ExactMatchMetrics) -> f64| {
            if rows == 0 {
                0.0
            } else {
                scores.iter().map(|(_, m)| f(m)).sum::<f64>() / rows as f64
            }
        };

        let mut summary = Self {
            model,
            rows,
            mean_precision: mean(|m| m.precision),
            mean_recall: mean(|m| m.recall),
            mean_f1: mean(|m| m.f1),
            mean_accuracy: mean(|m| m.accuracy),
            ..Self::default()
        };

        let mut by_type: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        for (answer_type, metrics) in scores {
            match metrics.match_type() {
                MatchType::Perfect => summary.perfect += 1,
                MatchType::Partial => summary.partial += 1,
                MatchType::Zero => summary.zero += 1,
            }
            let slot = by_type.entry(answer_type.clone()).or_default();
            slot.0 += metrics.accuracy;
            slot.1 += 1;
        }
        summary.accuracy_by_answer_type = by_type
            .into_iter()
            .map(|(label, (total, count))| (label, total / count as f64))
            .collect();
        summary
    }
}

/// Results of evaluating a whole table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub models: Vec<ModelEvaluationSummary>,
    /// Rows that received a tag-complexity value
    pub tag_complexity_rows: Option<usize>,
}

impl EvaluationReport {
    pub fn get(&self, model: &str) -> Option<&ModelEvaluationSummary> {
        self.models.iter().find(|m| m.model == model)
    }
}

/// Response columns in sorted order.
pub fn response_columns(table: &ResultTable) -> Vec<String> {
    let mut columns = table.columns_with_suffix(RESPONSE_SUFFIX);
    columns.sort();
    columns
}

/// Add exact-match columns for every response column.
pub fn evaluate_table(table: &mut ResultTable, answer_column: &str) -> Result<EvaluationReport> {
    let columns = response_columns(table);
    if columns.is_empty() {
        warn!("no response columns to evaluate");
    }

    let mut report = EvaluationReport::default();
    for column in columns {
        let mut scores = Vec::with_capacity(table.len());
        for index in table.indices() {
            let gold = table.get(index, answer_column).unwrap_or_default();
            let pred = table.get(index, &column).unwrap_or_default();
            let answer_type = table.get(index, ANSWER_TYPE_COLUMN).unwrap_or_default().to_string();
            let metrics = ExactMatchMetrics::score(gold, pred);

            table.set(index, &format!("{}_precision", column), format!("{:.4}", metrics.precision))?;
            table.set(index, &format!("{}_recall", column), format!("{:.4}", metrics.recall))?;
            table.set(index, &format!("{}_f1", column), format!("{:.4}", metrics.f1))?;
            table.set(index, &format!("{}_accuracy", column), format!("{:.4}", metrics.accuracy))?;
            scores.push((answer_type, metrics));
        }

        let model = column
            .strip_suffix(RESPONSE_SUFFIX)
            .unwrap_or(&column)
            .to_string();
        let summary = ModelEvaluationSummary::from_scores(model, &scores);
        info!(
            model = %summary.model,
            accuracy = summary.mean_accuracy,
            f1 = summary.mean_f1,
            perfect = summary.perfect,
            partial = summary.partial,
            zero = summary.zero,
            "evaluated responses"
        );
        report.models.push(summary);
    }
    Ok(report)
}

/// Shortest and longest rule-tag length behind a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagComplexity {
    pub shortest: usize,
    pub longest: usize,
}

/// Tag complexity per query text. Queries shared by several entries take
/// the overall extremes.
pub fn tag_complexity_by_query(index: &ExplanationIndex) -> HashMap<String, TagComplexity> {
    let mut by_query: HashMap<String, TagComplexity> = HashMap::new();
    for (_, entry) in index.entries() {
        let lengths = entry.tag_lengths();
        let (Some(&shortest), Some(&longest)) = (lengths.iter().min(), lengths.iter().max()) else {
            continue;
        };
        for query in &entry.sparql_queries {
            by_query
                .entry(query.clone())
                .and_modify(|c| {
                    c.shortest = c.shortest.min(shortest);
                    c.longest = c.longest.max(longest);
                })
                .or_insert(TagComplexity { shortest, longest });
        }
    }
    by_query
}

/// Add tag-complexity columns, 0 where the query is unknown. Returns the
/// number of rows matched.
pub fn add_tag_complexity(
    table: &mut ResultTable,
    index: &ExplanationIndex,
    query_column: &str,
) -> Result<usize> {
    let by_query = tag_complexity_by_query(index);
    let mut matched = 0;
    for row in table.indices() {
        let complexity = table
            .get(row, query_column)
            .and_then(|query| by_query.get(query))
            .copied();
        if complexity.is_some() {
            matched += 1;
        }
        let (shortest, longest) = complexity.map_or((0, 0), |c| (c.shortest, c.longest));
        table.set(row, SHORTEST_TAG_COLUMN, shortest.to_string())?;
        table.set(row, LONGEST_TAG_COLUMN, longest.to_string())?;
    }
    info!(matched, total = table.len(), "tag complexity added");
    Ok(matched)
}

/// Paths written by [`run_evaluation`].
pub fn evaluation_paths(out_prefix: &str) -> (PathBuf, PathBuf) {
    (
        PathBuf::from(format!("{}_results_with_metrics.csv", out_prefix)),
        PathBuf::from(format!("{}_summary.json", out_prefix)),
    )
}

/// Evaluate a results CSV and write the scored table and a JSON summary.
pub fn run_evaluation(
    results: &Path,
    explanations: Option<&Path>,
    out_prefix: &str,
) -> Result<EvaluationReport> {
    let mut table = ResultTable::from_csv_path(results)?;

    let tag_rows = match explanations {
        Some(path) if table.has_column(QUERY_COLUMN) => {
            let index = ExplanationIndex::from_path(path)?;
            Some(add_tag_complexity(&mut table, &index, QUERY_COLUMN)?)
        }
        Some(_) => {
            warn!(column = QUERY_COLUMN, "results have no query column, skipping tag complexity");
            None
        }
        None => None,
    };

    let mut report = evaluate_table(&mut table, ANSWER_COLUMN)?;
    report.tag_complexity_rows = tag_rows;

    let (csv_path, summary_path) = evaluation_paths(out_prefix);
    if let Some(parent) = csv_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    table.write_csv_path(&csv_path)?;
    std::fs::write(&summary_path, serde_json::to_string_pretty(&report)?)?;
    info!(path = %csv_path.display(), "evaluation written");
    Ok(report)
}
