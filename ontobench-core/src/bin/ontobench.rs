//! ontobench CLI
//!
//! Runs ontology reasoning experiments against the configured LLM providers
//! and scores recorded responses against gold answers.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::info;

use ontobench_core::evaluation::{evaluation_paths, run_evaluation};
use ontobench_core::experiment::{run_experiment, ExperimentConfig, ExperimentKind, DEFAULT_OUTPUT_ROOT};
use ontobench_core::llm::ProviderClients;
use ontobench_core::orchestrator::OrchestratorConfig;

#[derive(Parser)]
#[command(name = "ontobench")]
#[command(author, version, about = "LLM ontology reasoning experiments")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an experiment and write a timestamped output directory
    Run(RunArgs),

    /// Score a results CSV with exact-match metrics
    Evaluate(EvaluateArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    SparqlTtl,
    NlVerbalized,
    NlExplanations,
}

impl From<KindArg> for ExperimentKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::SparqlTtl => ExperimentKind::SparqlTtl,
            KindArg::NlVerbalized => ExperimentKind::NlVerbalized,
            KindArg::NlExplanations => ExperimentKind::NlWithExplanations,
        }
    }
}

#[derive(Args)]
struct RunArgs {
    /// Experiment kind
    #[arg(long, value_enum)]
    kind: KindArg,

    /// Question CSV
    #[arg(long)]
    questions: String,

    /// Directory of per-entity ontology files
    #[arg(long)]
    ontology_dir: String,

    /// Explanations JSON (required for nl-explanations)
    #[arg(long)]
    explanations: Option<String>,

    /// Orchestrator config JSON (models, retry, workers)
    #[arg(long)]
    config: Option<String>,

    /// Parent of the output directory
    #[arg(long, default_value = DEFAULT_OUTPUT_ROOT)]
    output_dir: String,

    /// Use only the first N questions
    #[arg(long, conflicts_with = "full")]
    sample: Option<usize>,

    /// Use every question (default is a 100-row sample)
    #[arg(long)]
    full: bool,

    /// Concurrent rows
    #[arg(long, env = "ONTOBENCH_WORKERS")]
    workers: Option<usize>,

    /// Re-run rows with failed pairs once
    #[arg(long)]
    resume_failures: bool,
}

#[derive(Args)]
struct EvaluateArgs {
    /// Results CSV with `*_response` columns
    #[arg(long)]
    results: String,

    /// Explanations JSON for tag complexity
    #[arg(long)]
    explanations: Option<String>,

    /// Prefix of the written files
    #[arg(long)]
    out_prefix: String,
}

fn expand(path: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(path).with_context(|| format!("cannot expand path '{}'", path))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

async fn run(args: RunArgs) -> Result<()> {
    let kind = ExperimentKind::from(args.kind);
    let mut config = ExperimentConfig::new(kind, expand(&args.questions)?, expand(&args.ontology_dir)?)
        .with_output_root(expand(&args.output_dir)?)
        .with_resume_failures(args.resume_failures);

    if let Some(path) = &args.explanations {
        config = config.with_explanations(expand(path)?);
    }
    if kind.needs_explanations() && config.explanations_json.is_none() {
        bail!("--explanations is required for {}", kind);
    }
    if args.full {
        config = config.with_sample_size(None);
    } else if let Some(n) = args.sample {
        config = config.with_sample_size(Some(n));
    }

    let mut orchestrator = match &args.config {
        Some(path) => OrchestratorConfig::from_json_file(&expand(path)?)?,
        None => config.orchestrator.clone(),
    };
    if let Some(workers) = args.workers {
        orchestrator = orchestrator.with_max_workers(workers);
    }
    config = config.with_orchestrator(orchestrator);

    let clients = ProviderClients::from_env().context("failed to build provider clients")?;
    let report = run_experiment(config, clients).await?;

    let summary = &report.summary.run;
    println!("Results: {}", report.output.dir.display());
    println!(
        "Processed {} questions: {}/{} rows succeeded ({:.1}%), {}/{} pairs succeeded, in {:.1}s",
        report.summary.total_questions_processed,
        summary.succeeded,
        summary.total_rows,
        summary.success_rate * 100.0,
        report.result.succeeded_pairs(),
        summary.total_pairs,
        report.summary.experiment_time_seconds
    );
    if !report.summary.unresolved_failures.is_empty() {
        println!("Failed rows: {:?}", report.summary.unresolved_failures);
    }
    Ok(())
}

fn evaluate(args: EvaluateArgs) -> Result<()> {
    let results = expand(&args.results)?;
    let explanations = args.explanations.as_deref().map(expand).transpose()?;
    let report = run_evaluation(&results, explanations.as_deref(), &args.out_prefix)?;

    println!(
        "{:<24} {:>9} {:>9} {:>9} {:>9} {:>8} {:>8} {:>8}",
        "model", "accuracy", "precision", "recall", "f1", "perfect", "partial", "zero"
    );
    for model in &report.models {
        println!(
            "{:<24} {:>9.4} {:>9.4} {:>9.4} {:>9.4} {:>8} {:>8} {:>8}",
            model.model,
            model.mean_accuracy,
            model.mean_precision,
            model.mean_recall,
            model.mean_f1,
            model.perfect,
            model.partial,
            model.zero
        );
    }
    let (csv_path, summary_path) = evaluation_paths(&args.out_prefix);
    info!(csv = %csv_path.display(), summary = %summary_path.display(), "evaluation saved");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; keys may come from the environment
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Evaluate(args) => evaluate(args),
    }
}
