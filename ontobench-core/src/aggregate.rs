//! Result aggregation.
//!
//! Workers never touch the result table. They send completed records and
//! call-log entries over a channel to a single owner task, which is the only
//! writer of the table, the progress counters and the log list.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::dispatch::{AttemptOutcome, DispatchOutcome, QueryAttempt};
use crate::error::{Error, Result};
use crate::llm::{GenerationParams, ModelSpec};
use crate::metrics::{round3, ResponseMetrics};
use crate::question::QuestionRow;
use crate::table::ResultTable;

/// Response text stored for a pair that never reported.
pub const NO_RESPONSE: &str = "[ERROR] No response";

/// Suffixes of the per-model detail columns, in column order.
pub const METRIC_SUFFIXES: [&str; 8] = [
    "confidence",
    "entropy",
    "consistency",
    "response_time",
    "reasoning_steps",
    "quality",
    "attempts",
    "failed",
];

/// Suffix of the per-model response column.
pub const RESPONSE_SUFFIX: &str = "_response";

/// Column holding a model's response.
pub fn response_column(display_name: &str) -> String {
    format!("{}{}", display_name, RESPONSE_SUFFIX)
}

/// Column holding one of a model's detail metrics.
pub fn metric_column(display_name: &str, suffix: &str) -> String {
    format!("{}_{}", display_name, suffix)
}

/// Hex SHA-256 of a prompt, logged so runs can be checked for reproducibility.
pub fn prompt_digest(prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Final result of one (row, model) pair. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub row_index: usize,
    pub display_name: String,
    /// Model content or a classified error marker
    pub response_text: String,
    /// Present only for successful pairs
    pub metrics: Option<ResponseMetrics>,
    pub attempts: u32,
    pub failed: bool,
}

impl ResultRecord {
    /// Build from a finished dispatch, extracting metrics on success.
    pub fn from_outcome(row: &QuestionRow, display_name: &str, outcome: &DispatchOutcome) -> Self {
        let metrics = outcome.success().map(|(response, elapsed)| {
            ResponseMetrics::extract(
                response,
                row.expected_answer.as_deref(),
                row.answer_type,
                elapsed,
            )
        });
        Self {
            row_index: row.index,
            display_name: display_name.to_string(),
            response_text: outcome.response_text(),
            metrics,
            attempts: outcome.attempt_count(),
            failed: !outcome.is_success(),
        }
    }

    /// Placeholder for a pair whose worker never reported.
    pub fn missing(row_index: usize, display_name: &str) -> Self {
        Self {
            row_index,
            display_name: display_name.to_string(),
            response_text: NO_RESPONSE.to_string(),
            metrics: None,
            attempts: 0,
            failed: true,
        }
    }

    /// Detail-column values, aligned with [`METRIC_SUFFIXES`].
    fn metric_cells(&self) -> [String; 8] {
        let (confidence, entropy, consistency, time, steps, quality) = match &self.metrics {
            Some(m) => (
                format!("{:.4}", m.confidence.confidence_score),
                format!("{:.4}", m.confidence.normalized_entropy),
                format!("{:.4}", m.confidence.consistency_score),
                format!("{:.3}", m.response_time_seconds),
                m.reasoning_step_count().to_string(),
                format!("{:.4}", m.heuristic.overall),
            ),
            None => Default::default(),
        };
        [
            confidence,
            entropy,
            consistency,
            time,
            steps,
            quality,
            self.attempts.to_string(),
            self.failed.to_string(),
        ]
    }
}

/// One provider call, success or failure, flattened for CSV and JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallLogEntry {
    #[serde(rename = "Query_index")]
    pub query_index: usize,
    #[serde(rename = "Query")]
    pub query: String,
    pub question_column_used: String,
    pub model: String,
    pub model_api_id: String,
    pub model_version: String,
    pub api_provider: String,
    pub timestamp_request: String,
    pub response_time_sec: f64,
    pub response_preview: String,
    pub attempt: u32,
    pub success: bool,
    pub error: Option<String>,
    pub prompt_sha256: String,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
    pub presence_penalty: f64,
    pub frequency_penalty: f64,
    // Response telemetry, empty for failed attempts
    pub has_logprobs: Option<bool>,
    pub confidence_score: Option<f64>,
    pub top_token_probability: Option<f64>,
    pub consistency_score: Option<f64>,
    pub entropy: Option<f64>,
    pub normalized_entropy: Option<f64>,
    pub reasoning_step_count: Option<usize>,
    pub quality_correctness: Option<f64>,
    pub quality_completeness: Option<f64>,
    pub quality_clarity: Option<f64>,
    pub quality_logical_structure: Option<f64>,
    pub quality_overall: Option<f64>,
}

/// Length of the response preview in a log entry.
const PREVIEW_CHARS: usize = 100;

impl CallLogEntry {
    pub fn from_attempt(
        attempt: &QueryAttempt,
        row: &QuestionRow,
        model: &ModelSpec,
        question_column: &str,
        prompt_sha256: &str,
    ) -> Self {
        let (model_version, usage, error, metrics) = match &attempt.outcome {
            AttemptOutcome::Success { response, .. } => {
                let metrics = ResponseMetrics::extract(
                    response,
                    row.expected_answer.as_deref(),
                    row.answer_type,
                    attempt.elapsed,
                );
                (response.model_version(), response.usage, None, Some(metrics))
            }
            AttemptOutcome::Failure(class) => {
                ("Unknown".to_string(), None, Some(class.render()), None)
            }
        };
        let confidence = metrics.as_ref().map(|m| m.confidence);
        let heuristic = metrics.as_ref().map(|m| m.heuristic);
        let GenerationParams {
            temperature,
            max_tokens,
            top_p,
            presence_penalty,
            frequency_penalty,
            ..
        } = model.generation_params;

        Self {
            query_index: row.index,
            query: row.query_text.clone(),
            question_column_used: question_column.to_string(),
            model: model.display_name.clone(),
            model_api_id: model.provider_model_id.clone(),
            model_version,
            api_provider: model.provider.label().to_string(),
            timestamp_request: attempt.started_at.to_rfc3339(),
            response_time_sec: round3(attempt.elapsed.as_secs_f64()),
            response_preview: attempt.response_text().chars().take(PREVIEW_CHARS).collect(),
            attempt: attempt.attempt_number,
            success: attempt.is_success(),
            error,
            prompt_sha256: prompt_sha256.to_string(),
            input_tokens: usage.map(|u| u.input_tokens),
            output_tokens: usage.map(|u| u.output_tokens),
            temperature,
            max_tokens,
            top_p,
            presence_penalty,
            frequency_penalty,
            has_logprobs: confidence.map(|c| c.has_logprobs),
            confidence_score: confidence.map(|c| c.confidence_score),
            top_token_probability: confidence.map(|c| c.top_token_probability),
            consistency_score: confidence.map(|c| c.consistency_score),
            entropy: confidence.map(|c| c.entropy),
            normalized_entropy: confidence.map(|c| c.normalized_entropy),
            reasoning_step_count: metrics.as_ref().map(ResponseMetrics::reasoning_step_count),
            quality_correctness: heuristic.map(|h| h.correctness),
            quality_completeness: heuristic.map(|h| h.completeness),
            quality_clarity: heuristic.map(|h| h.clarity),
            quality_logical_structure: heuristic.map(|h| h.logical_structure),
            quality_overall: heuristic.map(|h| h.overall),
        }
    }
}

/// Write call-log entries as CSV.
pub fn write_logs_csv(logs: &[CallLogEntry], path: &std::path::Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for entry in logs {
        writer.serialize(entry)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write call-log entries as a pretty JSON array.
pub fn write_logs_json(logs: &[CallLogEntry], path: &std::path::Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(logs)?)?;
    Ok(())
}

/// Message from a worker to the aggregator.
#[derive(Debug)]
pub enum AggregatorMessage {
    Record(ResultRecord),
    Log(CallLogEntry),
}

/// Run-level counters. Rows count once all their models are done.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunProgress {
    pub completed: usize,
    pub failed_queries: BTreeSet<usize>,
}

impl RunProgress {
    pub fn succeeded(&self) -> usize {
        self.completed - self.failed_queries.len()
    }

    /// Fraction of completed rows without a failed pair.
    pub fn success_rate(&self) -> f64 {
        if self.completed == 0 {
            0.0
        } else {
            self.succeeded() as f64 / self.completed as f64
        }
    }
}

/// End-of-run summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_rows: usize,
    pub total_pairs: usize,
    pub completed: usize,
    pub succeeded: usize,
    /// Row indices with at least one failed pair, ascending
    pub failed_queries: Vec<usize>,
    pub elapsed_seconds: f64,
    pub success_rate: f64,
    pub avg_seconds_per_query: f64,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        !self.failed_queries.is_empty()
    }

    /// Fold in a resume pass that re-ran every failed row of this run.
    ///
    /// The resumed failures replace this run's; counts, rate and timing are
    /// recomputed over the whole batch.
    pub fn merge_resumed(self, resumed: &RunSummary) -> Self {
        let mut failed_queries: Vec<usize> = resumed
            .failed_queries
            .iter()
            .copied()
            .filter(|i| self.failed_queries.contains(i))
            .collect();
        failed_queries.sort_unstable();
        failed_queries.dedup();

        let succeeded = self.completed.saturating_sub(failed_queries.len());
        let elapsed = self.elapsed_seconds + resumed.elapsed_seconds;
        Self {
            succeeded,
            failed_queries,
            elapsed_seconds: round3(elapsed),
            success_rate: if self.completed == 0 {
                0.0
            } else {
                succeeded as f64 / self.completed as f64
            },
            avg_seconds_per_query: if self.total_rows == 0 {
                0.0
            } else {
                round3(elapsed / self.total_rows as f64)
            },
            ..self
        }
    }
}

/// Output options that affect what the aggregator writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorOptions {
    pub save_detailed_metrics: bool,
    pub show_qa: bool,
}

#[derive(Debug)]
struct RowState {
    query: String,
    answers: Vec<Option<String>>,
    failed: bool,
    done: bool,
}

/// Everything the aggregator owned, handed back at the end of a run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub table: ResultTable,
    pub records: Vec<ResultRecord>,
    pub logs: Vec<CallLogEntry>,
    pub summary: RunSummary,
}

impl RunOutput {
    /// (row, model) pairs that produced a response.
    pub fn succeeded_pairs(&self) -> usize {
        self.records.iter().filter(|r| !r.failed).count()
    }
}

/// Sole owner of the result table during a run.
pub struct Aggregator {
    table: ResultTable,
    models: Vec<String>,
    rows: HashMap<usize, RowState>,
    order: Vec<usize>,
    records: Vec<ResultRecord>,
    logs: Vec<CallLogEntry>,
    progress: RunProgress,
    options: AggregatorOptions,
    started: Instant,
}

impl Aggregator {
    /// Prepare to aggregate `rows` x `models` into `table`.
    ///
    /// Output columns are created up front so every run has the same shape.
    pub fn new(
        mut table: ResultTable,
        rows: &[QuestionRow],
        models: &[ModelSpec],
        options: AggregatorOptions,
    ) -> Self {
        let models: Vec<String> = models.iter().map(|m| m.display_name.clone()).collect();
        for name in &models {
            table.ensure_column(&response_column(name));
            if options.save_detailed_metrics {
                for suffix in METRIC_SUFFIXES {
                    table.ensure_column(&metric_column(name, suffix));
                }
            }
        }

        let states = rows
            .iter()
            .map(|row| {
                (
                    row.index,
                    RowState {
                        query: row.query_text.clone(),
                        answers: vec![None; models.len()],
                        failed: false,
                        done: false,
                    },
                )
            })
            .collect();

        Self {
            table,
            models,
            rows: states,
            order: rows.iter().map(|r| r.index).collect(),
            records: Vec::with_capacity(rows.len()),
            logs: Vec::new(),
            progress: RunProgress::default(),
            options,
            started: Instant::now(),
        }
    }

    /// Current counters.
    pub fn progress(&self) -> &RunProgress {
        &self.progress
    }

    /// Apply one message.
    pub fn apply(&mut self, message: AggregatorMessage) {
        match message {
            AggregatorMessage::Log(entry) => self.logs.push(entry),
            AggregatorMessage::Record(record) => {
                if let Err(e) = self.store(record) {
                    error!(error = %e, "dropping result record");
                }
            }
        }
    }

    fn store(&mut self, record: ResultRecord) -> Result<()> {
        let position = self
            .models
            .iter()
            .position(|m| *m == record.display_name)
            .ok_or_else(|| Error::Internal(format!("unknown model '{}'", record.display_name)))?;
        let state = self
            .rows
            .get_mut(&record.row_index)
            .ok_or_else(|| Error::Internal(format!("unknown row {}", record.row_index)))?;
        if state.answers[position].is_some() {
            return Err(Error::Internal(format!(
                "duplicate record for row {} model '{}'",
                record.row_index, record.display_name
            )));
        }

        let name = &record.display_name;
        self.table.set(
            record.row_index,
            &response_column(name),
            record.response_text.clone(),
        )?;
        if self.options.save_detailed_metrics {
            for (suffix, value) in METRIC_SUFFIXES.iter().zip(record.metric_cells()) {
                self.table
                    .set(record.row_index, &metric_column(name, suffix), value)?;
            }
        }

        state.answers[position] = Some(record.response_text.clone());
        state.failed |= record.failed;
        let row_done = state.answers.iter().all(Option::is_some);
        let index = record.row_index;
        self.records.push(record);

        if row_done {
            self.complete_row(index);
        }
        Ok(())
    }

    fn complete_row(&mut self, index: usize) {
        let total = self.rows.len();
        let Some(state) = self.rows.get_mut(&index) else {
            return;
        };
        if state.done {
            return;
        }
        state.done = true;
        self.progress.completed += 1;
        if state.failed {
            self.progress.failed_queries.insert(index);
        }

        let completed = self.progress.completed;
        if self.options.show_qa {
            let answers: Vec<String> = self
                .models
                .iter()
                .zip(&state.answers)
                .map(|(model, answer)| {
                    format!("{}: {}", model, answer.as_deref().unwrap_or("No response"))
                })
                .collect();
            info!(
                row = index,
                completed,
                total,
                question = %state.query,
                answers = %answers.join(" | "),
                "row completed"
            );
        } else if completed % 10 == 0 || completed == total {
            info!(
                completed,
                total,
                success_rate = %format!("{:.1}%", self.progress.success_rate() * 100.0),
                "progress"
            );
        }
    }

    /// Drain the channel until every sender is gone.
    pub async fn run(mut self, mut receiver: mpsc::Receiver<AggregatorMessage>) -> Self {
        while let Some(message) = receiver.recv().await {
            self.apply(message);
        }
        self
    }

    /// Fill unreported pairs, then build the summary.
    pub fn finish(mut self) -> RunOutput {
        for index in self.order.clone() {
            let missing: Vec<String> = match self.rows.get(&index) {
                Some(state) => self
                    .models
                    .iter()
                    .zip(&state.answers)
                    .filter(|(_, answer)| answer.is_none())
                    .map(|(model, _)| model.clone())
                    .collect(),
                None => continue,
            };
            for model in missing {
                warn!(row = index, model = %model, "no result reported, recording failure");
                self.apply(AggregatorMessage::Record(ResultRecord::missing(index, &model)));
            }
        }

        let position: HashMap<usize, usize> = self
            .order
            .iter()
            .enumerate()
            .map(|(position, index)| (*index, position))
            .collect();
        let models = self.models.clone();
        let model_position = |name: &str| models.iter().position(|m| m == name);
        self.records.sort_by_key(|r| {
            (
                position.get(&r.row_index).copied(),
                model_position(&r.display_name),
            )
        });
        self.logs.sort_by_key(|l| position.get(&l.query_index).copied());

        let elapsed = self.started.elapsed();
        let summary = self.summary(elapsed);
        info!(
            completed = summary.completed,
            failed = summary.failed_queries.len(),
            elapsed_secs = summary.elapsed_seconds,
            "run finished"
        );

        RunOutput {
            table: self.table,
            records: self.records,
            logs: self.logs,
            summary,
        }
    }

    fn summary(&self, elapsed: Duration) -> RunSummary {
        let total_rows = self.rows.len();
        let elapsed_seconds = round3(elapsed.as_secs_f64());
        RunSummary {
            total_rows,
            total_pairs: total_rows * self.models.len(),
            completed: self.progress.completed,
            succeeded: self.progress.succeeded(),
            failed_queries: self.progress.failed_queries.iter().copied().collect(),
            elapsed_seconds,
            success_rate: self.progress.success_rate(),
            avg_seconds_per_query: if total_rows == 0 {
                0.0
            } else {
                round3(elapsed.as_secs_f64() / total_rows as f64)
            },
        }
    }

    /// Move the aggregator onto its own task.
    pub fn spawn(self, buffer: usize) -> AggregatorHandle {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let handle = tokio::spawn(self.run(receiver));
        AggregatorHandle { sender, handle }
    }
}

/// Handle to a spawned aggregator.
pub struct AggregatorHandle {
    sender: mpsc::Sender<AggregatorMessage>,
    handle: JoinHandle<Aggregator>,
}

impl AggregatorHandle {
    /// Sender for a worker.
    pub fn sender(&self) -> mpsc::Sender<AggregatorMessage> {
        self.sender.clone()
    }

    /// Close the channel, wait for the owner to drain it and finish.
    pub async fn finish(self) -> Result<RunOutput> {
        drop(self.sender);
        let aggregator = self
            .handle
            .await
            .map_err(|e| Error::Internal(format!("aggregator task failed: {}", e)))?;
        Ok(aggregator.finish())
    }
}
