//! Multi-provider query orchestrator.
//!
//! A run validates the batch, preloads ontology context, then fans rows out
//! to a bounded worker pool. Each worker sends one prompt per configured
//! model, one model after another, and reports to the aggregator. Rows run
//! in parallel; a failed pair never aborts the batch.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, instrument, warn};

use crate::aggregate::{
    metric_column, prompt_digest, response_column, Aggregator, AggregatorMessage,
    AggregatorOptions, CallLogEntry, ResultRecord, RunOutput, METRIC_SUFFIXES,
};
use crate::context::{preload_contexts, ContextMode, OntologyContextStore};
use crate::dispatch::{dispatch_with_retry, PairKey, RetryPolicy};
use crate::error::{Error, Result};
use crate::llm::{CompletionRequest, ModelSpec, ProviderClients};
use crate::prompt::{build_prompt, PromptInput};
use crate::question::{ensure_unique_indices, QuestionRow, QUESTION_COLUMN_FALLBACKS};
use crate::table::ResultTable;

/// Default worker pool width.
pub const DEFAULT_MAX_WORKERS: usize = 3;
/// Pool width used when re-running failed rows.
pub const RESUME_MAX_WORKERS: usize = 2;

/// Configuration for a run. Fixed for the run's duration.
///
/// Deserialization accepts the retry settings either nested under `retry`
/// or as the flat `max_retries` / `retry_backoff_seconds` keys, and rejects
/// unknown keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "OrchestratorConfigFile")]
pub struct OrchestratorConfig {
    /// Models queried for every row, in call order
    pub models: Vec<ModelSpec>,
    /// Kind of ontology context placed in prompts
    pub context_mode: ContextMode,
    /// Rows processed concurrently (default: 3)
    pub max_workers: usize,
    /// Retry ceiling and backoff per pair
    pub retry: RetryPolicy,
    /// Column holding the question text
    pub question_column: String,
    /// Write per-model detail metric columns
    pub save_detailed_metrics: bool,
    /// Log each finished row's question and answers
    pub show_qa: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            models: ModelSpec::default_set(),
            context_mode: ContextMode::Raw,
            max_workers: DEFAULT_MAX_WORKERS,
            retry: RetryPolicy::default(),
            question_column: QUESTION_COLUMN_FALLBACKS[0].to_string(),
            save_detailed_metrics: false,
            show_qa: false,
        }
    }
}

/// On-disk form of [`OrchestratorConfig`].
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct OrchestratorConfigFile {
    models: Vec<ModelSpec>,
    context_mode: ContextMode,
    max_workers: usize,
    retry: Option<RetryPolicy>,
    max_retries: Option<u32>,
    retry_backoff_seconds: Option<f64>,
    question_column: String,
    save_detailed_metrics: bool,
    show_qa: bool,
}

impl Default for OrchestratorConfigFile {
    fn default() -> Self {
        let config = OrchestratorConfig::default();
        Self {
            models: config.models,
            context_mode: config.context_mode,
            max_workers: config.max_workers,
            retry: None,
            max_retries: None,
            retry_backoff_seconds: None,
            question_column: config.question_column,
            save_detailed_metrics: config.save_detailed_metrics,
            show_qa: config.show_qa,
        }
    }
}

impl TryFrom<OrchestratorConfigFile> for OrchestratorConfig {
    type Error = String;

    fn try_from(file: OrchestratorConfigFile) -> std::result::Result<Self, Self::Error> {
        let flat = file.max_retries.is_some() || file.retry_backoff_seconds.is_some();
        let retry = match file.retry {
            Some(_) if flat => {
                return Err(
                    "set retry either as `retry` or as `max_retries`/`retry_backoff_seconds`, not both"
                        .to_string(),
                )
            }
            Some(retry) => retry,
            None => {
                let mut retry = RetryPolicy::default();
                if let Some(max_retries) = file.max_retries {
                    if max_retries == 0 {
                        return Err("max_retries must be at least 1".to_string());
                    }
                    retry = retry.with_max_attempts(max_retries);
                }
                if let Some(secs) = file.retry_backoff_seconds {
                    if !secs.is_finite() || secs < 0.0 {
                        return Err(format!(
                            "retry_backoff_seconds must be a non-negative number, got {}",
                            secs
                        ));
                    }
                    retry = retry.with_backoff(std::time::Duration::from_secs_f64(secs));
                }
                retry
            }
        };

        Ok(Self {
            models: file.models,
            context_mode: file.context_mode,
            max_workers: file.max_workers,
            retry,
            question_column: file.question_column,
            save_detailed_metrics: file.save_detailed_metrics,
            show_qa: file.show_qa,
        })
    }
}

impl OrchestratorConfig {
    pub fn with_models(mut self, models: Vec<ModelSpec>) -> Self {
        self.models = models;
        self
    }

    pub fn with_context_mode(mut self, mode: ContextMode) -> Self {
        self.context_mode = mode;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_question_column(mut self, column: impl Into<String>) -> Self {
        self.question_column = column.into();
        self
    }

    pub fn with_detailed_metrics(mut self, enabled: bool) -> Self {
        self.save_detailed_metrics = enabled;
        self
    }

    pub fn with_show_qa(mut self, enabled: bool) -> Self {
        self.show_qa = enabled;
        self
    }

    /// Load from a JSON file; missing fields take their defaults.
    pub fn from_json_file(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("invalid config '{}': {}", path.display(), e)))
    }

    /// Every output column a run with this config writes.
    pub fn output_columns(&self) -> Vec<String> {
        let mut columns = Vec::new();
        for model in &self.models {
            columns.push(response_column(&model.display_name));
            if self.save_detailed_metrics {
                columns.extend(
                    METRIC_SUFFIXES
                        .iter()
                        .map(|suffix| metric_column(&model.display_name, suffix)),
                );
            }
        }
        columns
    }
}

/// State shared read-only by every worker of a run.
struct WorkerShared {
    clients: ProviderClients,
    models: Vec<ModelSpec>,
    retry: RetryPolicy,
    context_mode: ContextMode,
    question_column: String,
}

/// Runs question batches against the configured models.
#[derive(Clone)]
pub struct Orchestrator {
    clients: ProviderClients,
    store: Arc<dyn OntologyContextStore>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        clients: ProviderClients,
        store: Arc<dyn OntologyContextStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            clients,
            store,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Question column to use, falling back to the conventional names.
    pub fn resolve_question_column(&self, table: &ResultTable) -> Result<String> {
        let configured = &self.config.question_column;
        if table.has_column(configured) {
            return Ok(configured.clone());
        }
        match QUESTION_COLUMN_FALLBACKS
            .iter()
            .find(|c| table.has_column(c))
        {
            Some(fallback) => {
                warn!(
                    configured = %configured,
                    fallback = %fallback,
                    "question column not found, using fallback"
                );
                Ok(fallback.to_string())
            }
            None => Err(Error::validation(format!(
                "question column '{}' not found; available columns: {}",
                configured,
                table.headers().join(", ")
            ))),
        }
    }

    /// Check the configuration and batch before any network call.
    ///
    /// Returns the resolved question column and the extracted rows.
    pub fn validate(&self, table: &ResultTable) -> Result<(String, Vec<QuestionRow>)> {
        let config = &self.config;
        if config.models.is_empty() {
            return Err(Error::validation("no models configured"));
        }
        if config.max_workers == 0 {
            return Err(Error::validation("max_workers must be at least 1"));
        }

        let mut names = HashSet::new();
        for model in &config.models {
            if !names.insert(model.display_name.as_str()) {
                return Err(Error::validation(format!(
                    "duplicate model display name '{}'",
                    model.display_name
                )));
            }
            if !self.clients.contains(model.provider) {
                return Err(Error::validation(format!(
                    "no client for provider '{}' used by model '{}' (set {})",
                    model.provider,
                    model.display_name,
                    model.provider.api_key_env()
                )));
            }
        }

        if !self.store.exists() {
            return Err(Error::validation("ontology context location does not exist"));
        }

        let question_column = self.resolve_question_column(table)?;
        let rows = QuestionRow::from_table(table, &question_column)?;
        ensure_unique_indices(&rows)?;
        Ok((question_column, rows))
    }

    /// Run every row of `table` against every configured model.
    ///
    /// Fails only on validation; provider failures are recorded per pair.
    #[instrument(skip_all, fields(rows = table.len(), models = self.config.models.len()))]
    pub async fn run(&self, table: ResultTable) -> Result<RunOutput> {
        let (question_column, rows) = self.validate(&table)?;
        let config = &self.config;
        info!(
            rows = rows.len(),
            models = config.models.len(),
            workers = config.max_workers,
            mode = %config.context_mode,
            question_column = %question_column,
            "starting run"
        );

        let contexts = preload_contexts(self.store.as_ref(), &rows, config.context_mode);

        let options = AggregatorOptions {
            save_detailed_metrics: config.save_detailed_metrics,
            show_qa: config.show_qa,
        };
        let buffer = (rows.len() * config.models.len()).clamp(16, 1024);
        let aggregator = Aggregator::new(table, &rows, &config.models, options).spawn(buffer);

        let shared = Arc::new(WorkerShared {
            clients: self.clients.clone(),
            models: config.models.clone(),
            retry: config.retry,
            context_mode: config.context_mode,
            question_column,
        });
        let semaphore = Arc::new(Semaphore::new(config.max_workers));

        let workers: Vec<_> = rows
            .into_iter()
            .map(|row| {
                let index = row.index;
                let context = context_for(&contexts, &row, config.context_mode);
                let shared = Arc::clone(&shared);
                let semaphore = Arc::clone(&semaphore);
                let sender = aggregator.sender();
                let handle = tokio::spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return;
                    };
                    process_row(&shared, row, context, sender).await;
                });
                (index, handle)
            })
            .collect();

        let (indices, handles): (Vec<_>, Vec<_>) = workers.into_iter().unzip();
        for (index, joined) in indices.into_iter().zip(join_all(handles).await) {
            if let Err(e) = joined {
                error!(row = index, error = %e, "worker failed");
            }
        }

        aggregator.finish().await
    }

    /// Re-run only `failed_indices` and write their new cells back into `table`.
    ///
    /// Uses a pool of [`RESUME_MAX_WORKERS`]. The returned records, logs and
    /// summary describe the resumed rows only.
    pub async fn resume_failed(
        &self,
        mut table: ResultTable,
        failed_indices: &[usize],
    ) -> Result<RunOutput> {
        if let Some(unknown) = failed_indices.iter().find(|i| !table.contains_index(**i)) {
            return Err(Error::validation(format!(
                "cannot resume row {}: not in the table",
                unknown
            )));
        }
        info!(rows = failed_indices.len(), "resuming failed rows");

        let mut resumer = self.clone();
        resumer.config.max_workers = RESUME_MAX_WORKERS;
        let resumed = resumer.run(table.subset(failed_indices)).await?;

        let columns = self.config.output_columns();
        for index in resumed.table.indices() {
            for column in &columns {
                if let Some(value) = resumed.table.get(index, column) {
                    table.set(index, column, value)?;
                }
            }
        }

        Ok(RunOutput { table, ..resumed })
    }
}

fn context_for(contexts: &HashMap<String, String>, row: &QuestionRow, mode: ContextMode) -> String {
    contexts
        .get(&row.root_entity)
        .cloned()
        .unwrap_or_else(|| crate::context::missing_placeholder(mode))
}

/// One worker unit: every model for one row, sequentially.
async fn process_row(
    shared: &WorkerShared,
    row: QuestionRow,
    context: String,
    sender: mpsc::Sender<AggregatorMessage>,
) {
    let input = PromptInput::new(
        &row.query_text,
        &context,
        row.answer_type,
        shared.context_mode,
    )
    .with_explanation(row.explanation_context.as_deref());
    let prompt = build_prompt(&input);
    let digest = prompt_digest(&prompt);

    for model in &shared.models {
        let Some(client) = shared.clients.get(model.provider) else {
            // Validation guarantees a client; record the pair as failed anyway
            error!(row = row.index, model = %model.display_name, "no client for provider");
            let record = ResultRecord::missing(row.index, &model.display_name);
            if sender.send(AggregatorMessage::Record(record)).await.is_err() {
                return;
            }
            continue;
        };

        let request = CompletionRequest::for_model(model, prompt.clone());
        let key = PairKey {
            row_index: row.index,
            display_name: &model.display_name,
        };
        let outcome = dispatch_with_retry(client.as_ref(), &request, &shared.retry, key).await;

        let mut messages: Vec<AggregatorMessage> = outcome
            .attempts
            .iter()
            .map(|attempt| {
                AggregatorMessage::Log(CallLogEntry::from_attempt(
                    attempt,
                    &row,
                    model,
                    &shared.question_column,
                    &digest,
                ))
            })
            .collect();
        messages.push(AggregatorMessage::Record(ResultRecord::from_outcome(
            &row,
            &model.display_name,
            &outcome,
        )));

        for message in messages {
            if sender.send(message).await.is_err() {
                warn!(row = row.index, "aggregator closed, dropping results");
                return;
            }
        }
    }
}
