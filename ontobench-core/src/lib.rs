//! # ontobench-core
//!
//! Multi-provider LLM query orchestration for ontology reasoning experiments.
//!
//! A batch of questions, each scoped to an ontology entity, is sent to every
//! configured model. Each worker builds one prompt per row from the
//! question and the entity's ontology context. It dispatches that prompt to
//! each model with bounded retry and reports to a single aggregator task,
//! which owns the result table.
//!
//! ## Core Components
//!
//! - **Context**: resolves an entity to raw or verbalized ontology text
//! - **Prompt**: deterministic prompt construction per answer type
//! - **Dispatch**: per-pair retry with failure classification
//! - **Metrics**: confidence, reasoning steps and heuristic quality
//! - **Aggregate**: the single writer of results, call logs and progress
//! - **Orchestrator**: validation, preloading and the bounded worker pool
//! - **Evaluation**: exact-match scoring against gold answers
//! - **Experiment**: end-to-end driver writing a timestamped output directory
//!
//! ## Example
//!
//! ```rust,ignore
//! use ontobench_core::{FileContextStore, Orchestrator, OrchestratorConfig, ProviderClients, ResultTable};
//! use std::sync::Arc;
//!
//! let clients = ProviderClients::from_env()?;
//! let store = Arc::new(FileContextStore::from_user_path("~/ontologies/family_1hop"));
//! let orchestrator = Orchestrator::new(clients, store, OrchestratorConfig::default());
//!
//! let table = ResultTable::from_csv_path("questions.csv".as_ref())?;
//! let output = orchestrator.run(table).await?;
//! println!("{} of {} rows succeeded", output.summary.succeeded, output.summary.total_rows);
//! ```

pub mod aggregate;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod evaluation;
pub mod experiment;
pub mod explanation;
pub mod llm;
pub mod metrics;
pub mod orchestrator;
pub mod prompt;
pub mod question;
pub mod table;

// Re-exports for convenience
pub use aggregate::{CallLogEntry, ResultRecord, RunOutput, RunSummary};
pub use context::{ContextMode, FileContextStore, OntologyContextStore};
pub use dispatch::{dispatch_with_retry, DispatchOutcome, FailureClass, RetryPolicy};
pub use error::{Error, Result};
pub use evaluation::{evaluate_table, EvaluationReport, ExactMatchMetrics, ModelEvaluationSummary};
pub use experiment::{run_experiment, ExperimentConfig, ExperimentKind, ExperimentReport};
pub use explanation::ExplanationIndex;
pub use llm::{
    ClientConfig, CompletionRequest, CompletionResponse, LLMClient, ModelSpec,
    OpenAICompatibleClient, Provider, ProviderClients,
};
pub use metrics::{ConfidenceMetrics, HeuristicQuality, ResponseMetrics};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use prompt::{build_prompt, PromptInput};
pub use question::{AnswerType, QuestionRow};
pub use table::ResultTable;
