mod checker;
mod client;
mod config;
mod engine;
mod orchestrator;
mod planner;
mod prompt;
mod registry;
mod repair;
mod scorer;


use anyhow::{bail, Context, Result};
use arbiter_common::progress::{ProgressEvent, ProgressSink};
use arbiter_common::types::EvaluationReport;
use checker::ToolchainChecker;
use clap::{Parser, Subcommand};
use client::OpenRouterClient;
use config::ToolchainConfig;
use engine::{EngineConfig, EvaluationEngine};
use orchestrator::{BatchOrchestrator, OrchestratorConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "arbiter-bench")]
#[command(about = "Arbiter - grade LLM-generated code against a rubric", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full benchmark: generate responses in batches, then grade them
    Run {
        /// Provider model reference (e.g. vendor/model-name)
        #[arg(short, long)]
        model: String,

        /// Documentation file included in every generation prompt
        #[arg(short, long)]
        docs: PathBuf,

        /// Test registry JSON file
        #[arg(short, long, default_value = "tests.json")]
        tests: PathBuf,

        /// Report output path (defaults to <run_id>.json)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Tests per generation call
        #[arg(long, default_value = "45")]
        batch_size: usize,

        /// Explicit comma-separated batch sizes overriding --batch-size
        #[arg(long, value_delimiter = ',')]
        batch_sizes: Option<Vec<usize>>,

        /// Concurrent generation calls
        #[arg(long, default_value = "20")]
        concurrency: usize,

        /// Sampling temperature (defaults to DEFAULT_TEMPERATURE or 0.1)
        #[arg(long)]
        temperature: Option<f64>,

        /// Completion-token ceiling (defaults to the model's advertised max)
        #[arg(long)]
        max_tokens: Option<u32>,

        /// Provider API key (falls back to OPENROUTER_API_KEY)
        #[arg(long)]
        api_key: Option<String>,

        /// Toolchain config JSON (built-in defaults when omitted)
        #[arg(long)]
        toolchain: Option<PathBuf>,

        /// Skip the external structural check and penalize heuristically
        #[arg(long, default_value = "false")]
        skip_structural_check: bool,
    },

    /// Regenerate a single batch and print its responses
    Rerun {
        /// Provider model reference (e.g. vendor/model-name)
        #[arg(short, long)]
        model: String,

        /// Documentation file included in the generation prompt
        #[arg(short, long)]
        docs: PathBuf,

        /// Test registry JSON file
        #[arg(short, long, default_value = "tests.json")]
        tests: PathBuf,

        /// 1-based batch number to regenerate
        #[arg(short, long)]
        batch_num: u32,

        /// Tests per generation call (must match the original run)
        #[arg(long, default_value = "45")]
        batch_size: usize,

        /// Provider API key (falls back to OPENROUTER_API_KEY)
        #[arg(long)]
        api_key: Option<String>,

        /// Toolchain config JSON (built-in defaults when omitted)
        #[arg(long)]
        toolchain: Option<PathBuf>,
    },

    /// Grade an existing responses JSON file
    Evaluate {
        /// Responses file: bare id->code map or {metadata, responses}
        #[arg(short, long)]
        responses: PathBuf,

        /// Test registry JSON file
        #[arg(short, long, default_value = "tests.json")]
        tests: PathBuf,

        /// Report output path (prints to stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Restrict grading to these comma-separated test ids
        #[arg(long, value_delimiter = ',')]
        test_ids: Option<Vec<String>>,

        /// Toolchain config JSON (built-in defaults when omitted)
        #[arg(long)]
        toolchain: Option<PathBuf>,

        /// Skip the external structural check and penalize heuristically
        #[arg(long, default_value = "false")]
        skip_structural_check: bool,
    },

    /// Print rubric statistics
    Stats {
        /// Test registry JSON file
        #[arg(short, long, default_value = "tests.json")]
        tests: PathBuf,
    },
}

/// Relays orchestrator progress into the log stream.
struct LogSink;

impl ProgressSink for LogSink {
    fn on_event(&self, event: ProgressEvent) {
        info!(
            completed = event.completed,
            total = event.total,
            batch = event.batch_num,
            failed = event.failed,
            "{}",
            event.message
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            model,
            docs,
            tests,
            output,
            batch_size,
            batch_sizes,
            concurrency,
            temperature,
            max_tokens,
            api_key,
            toolchain,
            skip_structural_check,
        } => {
            run_benchmark(RunArgs {
                model,
                docs,
                tests,
                output,
                batch_size,
                batch_sizes,
                concurrency,
                temperature,
                max_tokens,
                api_key,
                toolchain,
                skip_structural_check,
            })
            .await?;
        }
        Commands::Rerun {
            model,
            docs,
            tests,
            batch_num,
            batch_size,
            api_key,
            toolchain,
        } => {
            rerun_batch(
                &model, &docs, &tests, batch_num, batch_size, api_key, toolchain,
            )
            .await?;
        }
        Commands::Evaluate {
            responses,
            tests,
            output,
            test_ids,
            toolchain,
            skip_structural_check,
        } => {
            evaluate_responses(
                &responses,
                &tests,
                output.as_deref(),
                test_ids.as_deref(),
                toolchain.as_deref(),
                skip_structural_check,
            )
            .await?;
        }
        Commands::Stats { tests } => {
            print_stats(&tests)?;
        }
    }

    Ok(())
}

struct RunArgs {
    model: String,
    docs: PathBuf,
    tests: PathBuf,
    output: Option<PathBuf>,
    batch_size: usize,
    batch_sizes: Option<Vec<usize>>,
    concurrency: usize,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
    api_key: Option<String>,
    toolchain: Option<PathBuf>,
    skip_structural_check: bool,
}

async fn run_benchmark(args: RunArgs) -> Result<()> {
    let tests = registry::load_tests(&args.tests)?;
    let doc_content = std::fs::read_to_string(&args.docs)
        .with_context(|| format!("Failed to read documentation file: {}", args.docs.display()))?;
    let toolchain = ToolchainConfig::load_or_default(args.toolchain.as_deref())?;

    let api_key = resolve_api_key(args.api_key)?;

    let temperature = args
        .temperature
        .or_else(|| {
            std::env::var("DEFAULT_TEMPERATURE")
                .ok()
                .and_then(|v| v.parse().ok())
        })
        .unwrap_or(0.1);

    let client = OpenRouterClient::new(api_key, toolchain.language.clone())
        .context("Failed to build provider client")?;
    let max_tokens = match args.max_tokens {
        Some(value) => value,
        None => client
            .max_tokens_for(&args.model)
            .await
            .context("Failed to resolve model token ceiling")?,
    };

    info!(
        model = %args.model,
        tests = tests.len(),
        batch_size = args.batch_size,
        temperature,
        max_tokens,
        "Starting benchmark"
    );

    let orchestrator = BatchOrchestrator::new(
        Arc::new(client),
        OrchestratorConfig {
            batch_size: args.batch_size,
            custom_batch_sizes: args.batch_sizes,
            concurrency: args.concurrency,
            temperature,
            max_tokens,
            ..Default::default()
        },
    );

    let run = orchestrator
        .run(&args.model, &doc_content, &tests, Arc::new(LogSink))
        .await?;

    println!("→ Generation complete: {}", run.run_id);
    println!("  Responses: {}/{}", run.num_responses, tests.len());
    if run.failed_batches > 0 {
        println!("  Failed batches: {}", run.failed_batches);
        for error in &run.errors {
            println!("    {}", error);
        }
    }

    let checker = Arc::new(ToolchainChecker::new(toolchain));
    let engine = EvaluationEngine::new(
        tests,
        checker,
        EngineConfig {
            structural_check: !args.skip_structural_check,
            ..Default::default()
        },
    );
    let report = engine.evaluate(&run.responses, None).await;

    print_report_summary(&report);

    let payload = serde_json::json!({
        "run_id": run.run_id,
        "model": run.model,
        "num_responses": run.num_responses,
        "failed_batches": run.failed_batches,
        "errors": run.errors,
        "responses": run.responses,
        "report": report,
    });
    let output_path = args
        .output
        .unwrap_or_else(|| PathBuf::from(format!("{}.json", run.run_id)));
    write_json(&output_path, &payload)?;
    println!("→ Report written to {}", output_path.display());

    Ok(())
}

async fn rerun_batch(
    model: &str,
    docs: &Path,
    tests_path: &Path,
    batch_num: u32,
    batch_size: usize,
    api_key: Option<String>,
    toolchain_path: Option<PathBuf>,
) -> Result<()> {
    let tests = registry::load_tests(tests_path)?;
    let doc_content = std::fs::read_to_string(docs)
        .with_context(|| format!("Failed to read documentation file: {}", docs.display()))?;
    let toolchain = ToolchainConfig::load_or_default(toolchain_path.as_deref())?;
    let api_key = resolve_api_key(api_key)?;

    let client = OpenRouterClient::new(api_key, toolchain.language.clone())
        .context("Failed to build provider client")?;
    let max_tokens = client
        .max_tokens_for(model)
        .await
        .context("Failed to resolve model token ceiling")?;

    let orchestrator = BatchOrchestrator::new(
        Arc::new(client),
        OrchestratorConfig {
            batch_size,
            max_tokens,
            ..Default::default()
        },
    );

    let responses = orchestrator
        .rerun_batch(model, &doc_content, &tests, batch_num)
        .await?;

    println!("→ Batch {} regenerated: {} responses", batch_num, responses.len());
    println!("{}", serde_json::to_string_pretty(&responses)?);
    Ok(())
}

fn resolve_api_key(api_key: Option<String>) -> Result<String> {
    match api_key.or_else(|| std::env::var("OPENROUTER_API_KEY").ok()) {
        Some(key) if !key.is_empty() => Ok(key),
        _ => bail!("API key required: provide --api-key or OPENROUTER_API_KEY env var"),
    }
}

async fn evaluate_responses(
    responses_path: &Path,
    tests_path: &Path,
    output: Option<&Path>,
    test_ids: Option<&[String]>,
    toolchain_path: Option<&Path>,
    skip_structural_check: bool,
) -> Result<()> {
    let tests = registry::load_tests(tests_path)?;
    let responses = registry::load_responses(responses_path)?;
    let toolchain = ToolchainConfig::load_or_default(toolchain_path)?;

    let checker = Arc::new(ToolchainChecker::new(toolchain));
    let engine = EvaluationEngine::new(
        tests,
        checker,
        EngineConfig {
            structural_check: !skip_structural_check,
            ..Default::default()
        },
    );
    let report = engine.evaluate(&responses, test_ids).await;

    print_report_summary(&report);

    match output {
        Some(path) => {
            write_json(path, &report)?;
            println!("→ Report written to {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    Ok(())
}

fn print_stats(tests_path: &Path) -> Result<()> {
    let tests = registry::load_tests(tests_path)?;
    let checker = Arc::new(ToolchainChecker::new(ToolchainConfig::default()));
    let engine = EvaluationEngine::new(tests, checker, EngineConfig::default());
    println!("{}", serde_json::to_string_pretty(&engine.stats())?);
    Ok(())
}

fn print_report_summary(report: &EvaluationReport) {
    println!("→ Evaluation complete");
    println!(
        "  Score: {} / {} ({}%)",
        report.total_score, report.max_score, report.percentage
    );
    println!(
        "  Tests: {} graded, {} missing",
        report.tests_completed, report.tests_missing
    );
    for (category, summary) in &report.category_breakdown {
        println!(
            "  {}: {} / {} ({}%)",
            category, summary.score, summary.max, summary.percentage
        );
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value).context("Failed to serialize report")?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    Ok(())
}
