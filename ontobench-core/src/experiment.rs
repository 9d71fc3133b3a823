//! Experiment driver: one question set, one context kind, one output directory.
//!
//! Three experiment kinds exist. They differ in the context placed in the
//! prompt and the column the question is read from:
//!
//! | kind                   | context    | question column |
//! |------------------------|------------|-----------------|
//! | `SparqlTtl`            | raw        | `SPARQL Query`  |
//! | `NlVerbalized`         | verbalized | `Question`      |
//! | `NlWithExplanations`   | verbalized | `Question`      |
//!
//! A run writes `{kind}_results.csv`, `{kind}_logs.csv` (and `.json`),
//! `{kind}_metrics.json` and `experiment_config.json` into a fresh
//! timestamped directory.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregate::{write_logs_csv, write_logs_json, RunOutput, RunSummary};
use crate::context::{available_entities, ContextMode, FileContextStore, OntologyContextStore};
use crate::error::{Error, Result};
use crate::explanation::{ExplanationIndex, EXPLANATION_COMPLEXITY_COLUMN};
use crate::llm::ProviderClients;
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::question::{ANSWER_TYPE_COLUMN, ROOT_ENTITY_COLUMN};
use crate::table::ResultTable;

/// Rows kept in test mode.
pub const DEFAULT_SAMPLE_SIZE: usize = 100;
/// Parent of every experiment output directory.
pub const DEFAULT_OUTPUT_ROOT: &str = "output/llm_reasoning_results";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentKind {
    SparqlTtl,
    NlVerbalized,
    NlWithExplanations,
}

impl ExperimentKind {
    /// Stem used for output file and directory names.
    pub fn slug(self) -> &'static str {
        match self {
            Self::SparqlTtl => "sparql_ttl",
            Self::NlVerbalized => "nl_verbalized",
            Self::NlWithExplanations => "nl_explanations",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::SparqlTtl => "SPARQL queries with TTL ontology context",
            Self::NlVerbalized => "Natural language questions with verbalized JSON ontology context",
            Self::NlWithExplanations => {
                "Natural language questions with explanation context (highest tag complexity)"
            }
        }
    }

    pub fn context_mode(self) -> ContextMode {
        match self {
            Self::SparqlTtl => ContextMode::Raw,
            Self::NlVerbalized | Self::NlWithExplanations => ContextMode::Verbalized,
        }
    }

    pub fn question_column(self) -> &'static str {
        match self {
            Self::SparqlTtl => "SPARQL Query",
            Self::NlVerbalized | Self::NlWithExplanations => "Question",
        }
    }

    pub fn needs_explanations(self) -> bool {
        matches!(self, Self::NlWithExplanations)
    }
}

impl std::str::FromStr for ExperimentKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "sparql_ttl" | "sparql" => Ok(Self::SparqlTtl),
            "nl_verbalized" | "nl" => Ok(Self::NlVerbalized),
            "nl_explanations" | "nl_with_explanations" => Ok(Self::NlWithExplanations),
            other => Err(Error::Config(format!("unknown experiment kind '{}'", other))),
        }
    }
}

impl std::fmt::Display for ExperimentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

/// Everything needed to run one experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub kind: ExperimentKind,
    pub description: String,
    pub questions_csv: PathBuf,
    pub ontology_dir: PathBuf,
    pub explanations_json: Option<PathBuf>,
    pub output_root: PathBuf,
    /// Keep only the first N rows; `None` runs the full set
    pub sample_size: Option<usize>,
    /// Re-run rows with failed pairs once after the main pass
    pub resume_failures: bool,
    pub orchestrator: OrchestratorConfig,
}

impl ExperimentConfig {
    /// Config for `kind` with the kind's context mode and question column.
    pub fn new(
        kind: ExperimentKind,
        questions_csv: impl Into<PathBuf>,
        ontology_dir: impl Into<PathBuf>,
    ) -> Self {
        let orchestrator = OrchestratorConfig::default()
            .with_context_mode(kind.context_mode())
            .with_question_column(kind.question_column())
            .with_detailed_metrics(true)
            .with_show_qa(true);
        Self {
            kind,
            description: kind.description().to_string(),
            questions_csv: questions_csv.into(),
            ontology_dir: ontology_dir.into(),
            explanations_json: None,
            output_root: PathBuf::from(DEFAULT_OUTPUT_ROOT),
            sample_size: Some(DEFAULT_SAMPLE_SIZE),
            resume_failures: false,
            orchestrator,
        }
    }

    pub fn with_explanations(mut self, path: impl Into<PathBuf>) -> Self {
        self.explanations_json = Some(path.into());
        self
    }

    pub fn with_output_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_root = path.into();
        self
    }

    pub fn with_sample_size(mut self, sample_size: Option<usize>) -> Self {
        self.sample_size = sample_size;
        self
    }

    pub fn with_resume_failures(mut self, enabled: bool) -> Self {
        self.resume_failures = enabled;
        self
    }

    /// Replace the orchestrator settings, keeping this kind's context mode
    /// and question column.
    pub fn with_orchestrator(mut self, config: OrchestratorConfig) -> Self {
        self.orchestrator = config
            .with_context_mode(self.kind.context_mode())
            .with_question_column(self.kind.question_column());
        self
    }

    pub fn test_mode(&self) -> bool {
        self.sample_size.is_some()
    }
}

/// First `sample_size` rows, or the whole table when `None`.
pub fn sample_rows(table: &ResultTable, sample_size: Option<usize>) -> ResultTable {
    match sample_size {
        Some(n) if table.len() > n => {
            info!(sample = n, total = table.len(), "test mode: using first rows");
            table.head(n)
        }
        _ => table.clone(),
    }
}

/// Root entities of a table split by whether a context file backs them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextCoverage {
    pub available: Vec<String>,
    pub missing: Vec<String>,
}

impl ContextCoverage {
    pub fn check(table: &ResultTable, base_path: &Path, mode: ContextMode) -> Self {
        let present = available_entities(base_path, mode);
        let entities: BTreeSet<&str> = table.column(ROOT_ENTITY_COLUMN).into_iter().collect();
        let (available, missing): (Vec<&str>, Vec<&str>) =
            entities.into_iter().partition(|e| present.contains(*e));
        Self {
            available: available.into_iter().map(str::to_string).collect(),
            missing: missing.into_iter().map(str::to_string).collect(),
        }
    }
}

/// Drop rows whose root entity has no context file. Returns rows removed.
pub fn filter_to_available(table: &mut ResultTable, coverage: &ContextCoverage) -> usize {
    let before = table.len();
    table.retain_rows(|_, cell| {
        cell(ROOT_ENTITY_COLUMN).is_some_and(|entity| coverage.available.contains(&entity))
    });
    before - table.len()
}

/// Counts over formal queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparqlPatterns {
    pub ask_queries: usize,
    pub select_queries: usize,
    pub binary_questions: usize,
    pub multi_choice_questions: usize,
    pub complex_patterns: usize,
}

impl SparqlPatterns {
    pub fn analyze(table: &ResultTable, query_column: &str) -> Self {
        let mut patterns = Self::default();
        for index in table.indices() {
            let query = table.get(index, query_column).unwrap_or_default();
            let upper = query.to_uppercase();
            let answer_type = table.get(index, ANSWER_TYPE_COLUMN).unwrap_or_default();

            if upper.contains("ASK") {
                patterns.ask_queries += 1;
            } else if upper.contains("SELECT") {
                patterns.select_queries += 1;
            }
            match answer_type.trim().to_uppercase().as_str() {
                "BIN" => patterns.binary_questions += 1,
                "MC" => patterns.multi_choice_questions += 1,
                _ => {}
            }
            if query.matches('{').count() > 1 || upper.contains("UNION") || upper.contains("FILTER") {
                patterns.complex_patterns += 1;
            }
        }
        patterns
    }
}

/// Counts over natural-language questions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NlPatterns {
    pub binary_questions: usize,
    pub multi_choice_questions: usize,
    pub membership_questions: usize,
    pub property_questions: usize,
    pub complex_questions: usize,
}

/// Column holding the task type label.
pub const TASK_TYPE_COLUMN: &str = "Task Type";

impl NlPatterns {
    pub fn analyze(table: &ResultTable, question_column: &str) -> Self {
        let mut patterns = Self::default();
        for index in table.indices() {
            let question = table.get(index, question_column).unwrap_or_default().to_lowercase();
            let answer_type = table.get(index, ANSWER_TYPE_COLUMN).unwrap_or_default();
            let task_type = table.get(index, TASK_TYPE_COLUMN).unwrap_or_default().to_lowercase();

            match answer_type.trim().to_lowercase().as_str() {
                "bin" => patterns.binary_questions += 1,
                "mc" => patterns.multi_choice_questions += 1,
                _ => {}
            }
            if task_type.contains("membership") {
                patterns.membership_questions += 1;
            } else if task_type.contains("property") {
                patterns.property_questions += 1;
            }
            if question.split_whitespace().count() > 10
                || question.contains(" and ")
                || question.contains(" or ")
            {
                patterns.complex_questions += 1;
            }
        }
        patterns
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryPatterns {
    Sparql(SparqlPatterns),
    Nl(NlPatterns),
}

impl QueryPatterns {
    pub fn analyze(kind: ExperimentKind, table: &ResultTable, question_column: &str) -> Self {
        match kind {
            ExperimentKind::SparqlTtl => Self::Sparql(SparqlPatterns::analyze(table, question_column)),
            _ => Self::Nl(NlPatterns::analyze(table, question_column)),
        }
    }
}

/// Coverage and size of the explanation context attached to a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExplanationAnalysis {
    pub total_questions: usize,
    pub explanations_found: usize,
    pub explanation_coverage: f64,
    pub complexity_mean: f64,
    /// Sample standard deviation; 0 for fewer than two rows
    pub complexity_std: f64,
    pub complexity_min: u64,
    pub complexity_max: u64,
}

impl ExplanationAnalysis {
    pub fn from_table(table: &ResultTable, explanations_found: usize) -> Self {
        let values: Vec<u64> = table
            .column(EXPLANATION_COMPLEXITY_COLUMN)
            .into_iter()
            .map(|v| v.trim().parse().unwrap_or(0))
            .collect();
        let n = values.len();
        if n == 0 {
            return Self::default();
        }

        let mean = values.iter().sum::<u64>() as f64 / n as f64;
        let std = if n > 1 {
            let var = values
                .iter()
                .map(|v| (*v as f64 - mean).powi(2))
                .sum::<f64>()
                / (n - 1) as f64;
            var.sqrt()
        } else {
            0.0
        };

        Self {
            total_questions: n,
            explanations_found,
            explanation_coverage: explanations_found as f64 / n as f64,
            complexity_mean: mean,
            complexity_std: std,
            complexity_min: values.iter().copied().min().unwrap_or(0),
            complexity_max: values.iter().copied().max().unwrap_or(0),
        }
    }
}

/// File layout of one experiment's output directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentOutput {
    pub dir: PathBuf,
    pub results_csv: PathBuf,
    pub logs_csv: PathBuf,
    pub logs_json: PathBuf,
    pub metrics_json: PathBuf,
    pub config_json: PathBuf,
    pub explanation_json: PathBuf,
}

impl ExperimentOutput {
    /// Layout for a run started at `started`. Nothing is created.
    pub fn layout(root: &Path, kind: ExperimentKind, test_mode: bool, started: DateTime<Local>) -> Self {
        let mode = if test_mode { "test" } else { "full" };
        let dir = root.join(format!(
            "{}_experiment_{}_{}",
            kind.slug(),
            mode,
            started.format("%Y%m%d_%H%M%S")
        ));
        let file = |suffix: &str| dir.join(format!("{}_{}", kind.slug(), suffix));
        Self {
            results_csv: file("results.csv"),
            logs_csv: file("logs.csv"),
            logs_json: file("logs.json"),
            metrics_json: file("metrics.json"),
            config_json: dir.join("experiment_config.json"),
            explanation_json: dir.join("explanation_analysis.json"),
            dir,
        }
    }

    pub fn create_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(())
    }
}

/// Written to `experiment_config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentSummary {
    pub run_id: Uuid,
    pub config: ExperimentConfig,
    pub patterns: QueryPatterns,
    pub explanation_analysis: Option<ExplanationAnalysis>,
    pub experiment_time_seconds: f64,
    pub total_questions_processed: usize,
    pub available_context_files: usize,
    pub missing_context_files: usize,
    /// Whole-batch summary, including the resume pass when one ran
    pub run: RunSummary,
    /// Rows with a failed pair after the first pass
    pub first_pass_failures: Vec<usize>,
    /// Rows still failing after the optional resume pass
    pub unresolved_failures: Vec<usize>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ExperimentReport {
    pub output: ExperimentOutput,
    pub summary: ExperimentSummary,
    pub result: RunOutput,
}

fn load_questions(path: &Path) -> Result<ResultTable> {
    let mut table = ResultTable::from_csv_path(path)?;
    let dropped = table.clean_input();
    if !dropped.is_empty() {
        info!(columns = ?dropped, "dropped sampling columns");
    }
    info!(path = %path.display(), rows = table.len(), "loaded questions");
    Ok(table)
}

/// Run one experiment end to end and write its output directory.
pub async fn run_experiment(config: ExperimentConfig, clients: ProviderClients) -> Result<ExperimentReport> {
    let started_local = Local::now();
    let run_id = Uuid::new_v4();
    let kind = config.kind;
    let mode = kind.context_mode();
    info!(%run_id, %kind, description = %config.description, "starting experiment");

    let store = FileContextStore::new(&config.ontology_dir);
    if !store.exists() {
        return Err(Error::Config(format!(
            "ontology directory does not exist: {}",
            config.ontology_dir.display()
        )));
    }

    let mut table = load_questions(&config.questions_csv)?;

    let coverage = ContextCoverage::check(&table, &config.ontology_dir, mode);
    info!(
        available = coverage.available.len(),
        missing = coverage.missing.len(),
        "checked context files"
    );
    if mode == ContextMode::Raw && !coverage.missing.is_empty() {
        let removed = filter_to_available(&mut table, &coverage);
        warn!(
            removed,
            remaining = table.len(),
            "dropped rows without a context file"
        );
        if table.is_empty() {
            return Err(Error::validation(
                "no questions remain after filtering for available context files",
            ));
        }
    }

    let mut table = sample_rows(&table, config.sample_size);

    let explanation_analysis = if kind.needs_explanations() {
        let path = config.explanations_json.as_deref().ok_or_else(|| {
            Error::Config(format!("experiment '{}' requires an explanations file", kind))
        })?;
        let index = ExplanationIndex::from_path(path)?;
        let found = index.annotate_table(&mut table)?;
        Some(ExplanationAnalysis::from_table(&table, found))
    } else {
        None
    };

    let patterns = QueryPatterns::analyze(kind, &table, kind.question_column());
    info!(?patterns, "query patterns");

    let orchestrator = Orchestrator::new(clients, Arc::new(store), config.orchestrator.clone());
    let clock = Instant::now();
    let mut result = orchestrator.run(table).await?;
    let first_pass_failures = result.summary.failed_queries.clone();

    if config.resume_failures && result.summary.has_failures() {
        let failed = result.summary.failed_queries.clone();
        let RunOutput {
            table,
            mut records,
            mut logs,
            summary,
        } = result;
        let resumed = orchestrator.resume_failed(table, &failed).await?;

        // Resumed pairs replace their first-pass records
        records.retain(|r| !failed.contains(&r.row_index));
        records.extend(resumed.records);
        records.sort_by_key(|r| r.row_index);
        logs.extend(resumed.logs);
        result = RunOutput {
            table: resumed.table,
            records,
            logs,
            summary: summary.merge_resumed(&resumed.summary),
        };
    }
    let experiment_time = clock.elapsed().as_secs_f64();

    let output = ExperimentOutput::layout(&config.output_root, kind, config.test_mode(), started_local);
    output.create_dir()?;
    result.table.write_csv_path(&output.results_csv)?;
    write_logs_csv(&result.logs, &output.logs_csv)?;
    write_logs_json(&result.logs, &output.logs_json)?;
    std::fs::write(&output.metrics_json, serde_json::to_string_pretty(&result.records)?)?;
    if let Some(analysis) = &explanation_analysis {
        std::fs::write(&output.explanation_json, serde_json::to_string_pretty(analysis)?)?;
    }

    let summary = ExperimentSummary {
        run_id,
        config,
        patterns,
        explanation_analysis,
        experiment_time_seconds: experiment_time,
        total_questions_processed: result.table.len(),
        available_context_files: coverage.available.len(),
        missing_context_files: coverage.missing.len(),
        run: result.summary.clone(),
        first_pass_failures,
        unresolved_failures: result.summary.failed_queries.clone(),
        timestamp: Utc::now(),
    };
    std::fs::write(&output.config_json, serde_json::to_string_pretty(&summary)?)?;

    info!(
        %run_id,
        dir = %output.dir.display(),
        seconds = experiment_time,
        questions = summary.total_questions_processed,
        "experiment completed"
    );
    Ok(ExperimentReport {
        output,
        summary,
        result,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::RetryPolicy;
    use crate::explanation::EXPLANATION_FOUND_COLUMN;
    use crate::llm::{CompletionRequest, CompletionResponse, LLMClient, ModelSpec, Provider};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::tempdir;

    struct EchoClient {
        reply: String,
        calls: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LLMClient for EchoClient {
        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts
                .lock()
                .unwrap()
                .push(request.messages[0].content.clone());
            Ok(CompletionResponse {
                id: "echo".to_string(),
                model: request.model.clone(),
                system_fingerprint: Some("fp_1".to_string()),
                content: self.reply.clone(),
                stop_reason: None,
                usage: None,
                logprobs: None,
                timestamp: Utc::now(),
            })
        }

        fn provider(&self) -> Provider {
            Provider::OpenAI
        }
    }

    fn clients(reply: &str) -> (ProviderClients, Arc<EchoClient>) {
        let client = Arc::new(EchoClient {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        });
        let clients = Provider::ALL
            .into_iter()
            .fold(ProviderClients::new(), |clients, provider| {
                clients.with_client_for(provider, client.clone())
            });
        (clients, client)
    }

    /// Fails every call whose prompt mentions `marker` until `failures`
    /// calls have failed, then answers `TRUE`.
    struct FlakyClient {
        marker: String,
        failures: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LLMClient for FlakyClient {
        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let flaky = request.messages[0].content.contains(&self.marker);
            if flaky
                && self
                    .failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(Error::LLM("connection reset".to_string()));
            }
            Ok(CompletionResponse {
                id: "flaky".to_string(),
                model: request.model.clone(),
                system_fingerprint: None,
                content: "TRUE".to_string(),
                stop_reason: None,
                usage: None,
                logprobs: None,
                timestamp: Utc::now(),
            })
        }

        fn provider(&self) -> Provider {
            Provider::OpenAI
        }
    }

    fn fast(config: ExperimentConfig) -> ExperimentConfig {
        let orchestrator = config
            .orchestrator
            .clone()
            .with_retry(RetryPolicy::default().with_backoff(Duration::from_millis(1)))
            .with_show_qa(false);
        config.with_orchestrator(orchestrator)
    }

    #[test]
    fn test_kind_settings() {
        assert_eq!(ExperimentKind::SparqlTtl.context_mode(), ContextMode::Raw);
        assert_eq!(ExperimentKind::SparqlTtl.question_column(), "SPARQL Query");
        assert_eq!(ExperimentKind::NlWithExplanations.context_mode(), ContextMode::Verbalized);
        assert_eq!("nl-explanations".parse::<ExperimentKind>().unwrap(), ExperimentKind::NlWithExplanations);
        assert_eq!("sparql_ttl".parse::<ExperimentKind>().unwrap(), ExperimentKind::SparqlTtl);
        assert!("graph".parse::<ExperimentKind>().is_err());
    }

    #[test]
    fn test_output_layout() {
        let started = Local.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        let out = ExperimentOutput::layout(Path::new("out"), ExperimentKind::NlVerbalized, true, started);
        assert_eq!(out.dir, PathBuf::from("out/nl_verbalized_experiment_test_20250304_050607"));
        assert_eq!(out.results_csv, out.dir.join("nl_verbalized_results.csv"));
        assert_eq!(out.config_json, out.dir.join("experiment_config.json"));
    }

    #[test]
    fn test_sample_rows() {
        let csv = "Question\nq0\nq1\nq2\n";
        let table = ResultTable::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(sample_rows(&table, Some(2)).indices(), vec![0, 1]);
        assert_eq!(sample_rows(&table, Some(10)).len(), 3);
        assert_eq!(sample_rows(&table, None).len(), 3);
    }

    #[test]
    fn test_sparql_patterns() {
        let csv = "SPARQL Query,Answer Type\n\
                   ASK { :a a :B },BIN\n\
                   \"SELECT ?x WHERE { ?x a :B . FILTER(?x != :a) }\",MC\n\
                   \"SELECT ?x WHERE { { ?x a :B } UNION { ?x a :C } }\",MC\n";
        let table = ResultTable::from_reader(csv.as_bytes()).unwrap();
        let patterns = SparqlPatterns::analyze(&table, "SPARQL Query");
        assert_eq!(
            patterns,
            SparqlPatterns {
                ask_queries: 1,
                select_queries: 2,
                binary_questions: 1,
                multi_choice_questions: 2,
                complex_patterns: 2,
            }
        );
    }

    #[test]
    fn test_nl_patterns() {
        let csv = "Question,Answer Type,Task Type\n\
                   Is alice a Mother?,BIN,Membership\n\
                   Who is a parent and also a teacher?,MC,Property Assertion\n";
        let table = ResultTable::from_reader(csv.as_bytes()).unwrap();
        let patterns = NlPatterns::analyze(&table, "Question");
        assert_eq!(patterns.binary_questions, 1);
        assert_eq!(patterns.multi_choice_questions, 1);
        assert_eq!(patterns.membership_questions, 1);
        assert_eq!(patterns.property_questions, 1);
        assert_eq!(patterns.complex_questions, 1);
    }

    #[test]
    fn test_explanation_analysis() {
        let csv = "explanation_complexity\n1\n3\n";
        let table = ResultTable::from_reader(csv.as_bytes()).unwrap();
        let analysis = ExplanationAnalysis::from_table(&table, 1);
        assert_eq!(analysis.explanation_coverage, 0.5);
        assert_eq!(analysis.complexity_mean, 2.0);
        assert!((analysis.complexity_std - 2f64.sqrt()).abs() < 1e-9);
        assert_eq!((analysis.complexity_min, analysis.complexity_max), (1, 3));
    }

    #[tokio::test]
    async fn test_sparql_experiment_filters_and_writes_outputs() {
        let dir = tempdir().unwrap();
        let ontologies = dir.path().join("ttl");
        std::fs::create_dir(&ontologies).unwrap();
        std::fs::write(ontologies.join("alice.ttl"), ":alice a :Person .").unwrap();

        let questions = dir.path().join("questions.csv");
        std::fs::write(
            &questions,
            "SPARQL Query,Root Entity,Answer Type,Answer,strata\n\
             ASK { :alice a :Person },alice,BIN,TRUE,1\n\
             ASK { :bob a :Person },bob,BIN,TRUE,1\n\
             ASK { :alice a :Agent },alice,BIN,TRUE,2\n",
        )
        .unwrap();

        let (clients, client) = clients("TRUE");
        let config = fast(
            ExperimentConfig::new(ExperimentKind::SparqlTtl, &questions, &ontologies)
                .with_output_root(dir.path().join("out")),
        );
        let report = run_experiment(config, clients).await.unwrap();

        assert_eq!(report.summary.total_questions_processed, 2);
        assert_eq!(report.summary.missing_context_files, 1);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2 * 3);
        assert!(client
            .prompts
            .lock()
            .unwrap()
            .iter()
            .all(|p| p.contains(":alice a :Person .")));

        let out = &report.output;
        for path in [&out.results_csv, &out.logs_csv, &out.logs_json, &out.metrics_json, &out.config_json] {
            assert!(path.exists(), "missing {}", path.display());
        }
        assert!(!out.explanation_json.exists());

        let results = ResultTable::from_csv_path(&out.results_csv).unwrap();
        assert!(!results.has_column("strata"));
        assert_eq!(results.get(0, "gpt-4o-mini_response"), Some("TRUE"));
        assert_eq!(results.len(), 2);
        assert_eq!(report.result.table.indices(), vec![0, 2]);

        let summary: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&out.config_json).unwrap()).unwrap();
        assert_eq!(summary["config"]["kind"], "sparql_ttl");
        assert_eq!(summary["patterns"]["ask_queries"], 2);
    }

    #[tokio::test]
    async fn test_explanation_experiment_guides_prompts() {
        let dir = tempdir().unwrap();
        let ontologies = dir.path().join("json");
        std::fs::create_dir(&ontologies).unwrap();
        std::fs::write(ontologies.join("alice.json"), r#"{"entity": "alice"}"#).unwrap();

        let explanations = dir.path().join("explanations.json");
        std::fs::write(
            &explanations,
            r#"{"alice|rdf:type|Mother": {"explanations": [["alice hasChild bob", "TAG: D"]], "explanationCount": 1}}"#,
        )
        .unwrap();

        let questions = dir.path().join("questions.csv");
        std::fs::write(
            &questions,
            "Question,Root Entity,Answer Type,Answer\n\
             Is alice a Mother?,alice,BIN,Mother\n\
             Is alice a Father?,alice,BIN,Father\n",
        )
        .unwrap();

        let (clients, client) = clients("TRUE");
        let config = fast(
            ExperimentConfig::new(ExperimentKind::NlWithExplanations, &questions, &ontologies)
                .with_explanations(&explanations)
                .with_output_root(dir.path().join("out"))
                .with_sample_size(None),
        );
        let report = run_experiment(config, clients).await.unwrap();

        let analysis = report.summary.explanation_analysis.unwrap();
        assert_eq!(analysis.explanations_found, 1);
        assert_eq!(analysis.total_questions, 2);
        assert!(report.output.explanation_json.exists());
        assert!(report.output.dir.to_string_lossy().contains("_full_"));

        assert_eq!(report.result.table.get(0, EXPLANATION_FOUND_COLUMN), Some("true"));
        assert!(client
            .prompts
            .lock()
            .unwrap()
            .iter()
            .any(|p| p.contains("alice hasChild bob")));
    }

    #[tokio::test]
    async fn test_explanation_experiment_requires_file() {
        let dir = tempdir().unwrap();
        let questions = dir.path().join("questions.csv");
        std::fs::write(&questions, "Question,Root Entity,Answer Type\nq,alice,BIN\n").unwrap();

        let (clients, client) = clients("TRUE");
        let config = ExperimentConfig::new(ExperimentKind::NlWithExplanations, &questions, dir.path());
        let err = run_experiment(config, clients).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_ontology_dir_is_config_error() {
        let dir = tempdir().unwrap();
        let (clients, _) = clients("TRUE");
        let config = ExperimentConfig::new(
            ExperimentKind::SparqlTtl,
            dir.path().join("q.csv"),
            dir.path().join("nope"),
        );
        assert!(matches!(
            run_experiment(config, clients).await,
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_resume_failures_merges_into_one_record_per_pair() {
        let dir = tempdir().unwrap();
        let ontologies = dir.path().join("ttl");
        std::fs::create_dir(&ontologies).unwrap();
        std::fs::write(ontologies.join("alice.ttl"), ":alice a :Person .").unwrap();
        std::fs::write(ontologies.join("bob.ttl"), ":bob a :Person .").unwrap();

        let questions = dir.path().join("questions.csv");
        std::fs::write(
            &questions,
            "SPARQL Query,Root Entity,Answer Type,Answer\n\
             ASK { :alice a :Person },alice,BIN,TRUE\n\
             ASK { :bob a :Person },bob,BIN,TRUE\n",
        )
        .unwrap();

        // Two failures exhaust both first-pass attempts for bob's row
        let client = Arc::new(FlakyClient {
            marker: ":bob".to_string(),
            failures: AtomicUsize::new(2),
            calls: AtomicUsize::new(0),
        });
        let clients = ProviderClients::new().with_client_for(Provider::OpenAI, client.clone());
        let base = ExperimentConfig::new(ExperimentKind::SparqlTtl, &questions, &ontologies)
            .with_output_root(dir.path().join("out"))
            .with_resume_failures(true);
        let orchestrator = base
            .orchestrator
            .clone()
            .with_models(vec![ModelSpec::gpt4o_mini()])
            .with_max_workers(1);
        let config = fast(base.with_orchestrator(orchestrator));

        let report = run_experiment(config, clients).await.unwrap();
        let result = &report.result;

        assert_eq!(client.calls.load(Ordering::SeqCst), 4);
        assert_eq!(report.summary.first_pass_failures, vec![1]);
        assert!(report.summary.unresolved_failures.is_empty());

        let pairs: Vec<(usize, &str)> = result
            .records
            .iter()
            .map(|r| (r.row_index, r.display_name.as_str()))
            .collect();
        assert_eq!(pairs, vec![(0, "gpt-4o-mini"), (1, "gpt-4o-mini")]);
        assert!(result.records.iter().all(|r| !r.failed));
        assert_eq!(result.succeeded_pairs(), 2);

        // Both failed first-pass attempts stay in the log next to the resumed one
        assert_eq!(result.logs.len(), 4);
        assert_eq!(result.logs.iter().filter(|l| !l.success).count(), 2);

        assert_eq!(result.table.get(0, "gpt-4o-mini_response"), Some("TRUE"));
        assert_eq!(result.table.get(1, "gpt-4o-mini_response"), Some("TRUE"));
        let written = ResultTable::from_csv_path(&report.output.results_csv).unwrap();
        assert_eq!(written.get(1, "gpt-4o-mini_response"), Some("TRUE"));

        let summary = &result.summary;
        assert_eq!(summary, &report.summary.run);
        assert_eq!(summary.total_rows, 2);
        assert_eq!(summary.completed, 2);
        assert!(summary.failed_queries.is_empty());
        assert_eq!(summary.succeeded, summary.completed - summary.failed_queries.len());
        assert_eq!(summary.success_rate, 1.0);
    }
}
