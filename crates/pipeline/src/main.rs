//! Forecast pipeline - batch entry point
//!
//! Each invocation runs one command for a set of metrics, writes the run
//! record and the Prometheus textfile, prints the record as JSON on stdout
//! and exits with a status that encodes the outcome.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use forecast_lib::{
    ingest::store_from_config, recorder::recorder_from_config, PipelineCommand,
    PipelineError, PipelineMetrics, PipelineOrchestrator, RunRequest, TimeWindow,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

/// Exit status for failures outside the pipeline error taxonomy
const EXIT_INTERNAL: u8 = 1;

#[derive(Parser)]
#[command(name = "forecast-pipeline")]
#[command(author, version, about = "Server resource usage forecasting pipeline", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./forecast.{toml,yaml,json} when present)
    #[arg(long, short, global = true, env = "FORECAST_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "json")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest, preprocess, train and forecast
    Run(RunArgs),
    /// Fetch raw history and snapshot it
    Ingest(RunArgs),
    /// Canonicalise the raw snapshot of a run
    Preprocess(RunArgs),
    /// Select and persist a model from the preprocessed snapshot of a run
    Train(RunArgs),
    /// Forecast from the latest persisted model
    Infer(RunArgs),
}

#[derive(Args, Clone)]
struct RunArgs {
    /// Metric to process (repeatable, defaults to every configured metric)
    #[arg(long = "metric", short)]
    metrics: Vec<String>,

    /// Run identifier (defaults to the current UTC time, YYYYMMDDTHHMMSSZ)
    #[arg(long)]
    run_id: Option<String>,

    /// End of the history window, RFC 3339 (defaults to now)
    #[arg(long, value_parser = parse_end)]
    end: Option<i64>,

    /// Length of the history window in days
    #[arg(long)]
    history_days: Option<u32>,

    /// Recompute outputs that already exist for this run id
    #[arg(long)]
    force: bool,
}

impl Commands {
    fn split(self) -> (PipelineCommand, RunArgs) {
        match self {
            Commands::Run(args) => (PipelineCommand::Full, args),
            Commands::Ingest(args) => (PipelineCommand::Ingest, args),
            Commands::Preprocess(args) => (PipelineCommand::Preprocess, args),
            Commands::Train(args) => (PipelineCommand::Train, args),
            Commands::Infer(args) => (PipelineCommand::Infer, args),
        }
    }
}

fn parse_end(raw: &str) -> std::result::Result<i64, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.timestamp())
        .map_err(|e| format!("expected an RFC 3339 timestamp: {}", e))
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .init(),
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let mut config = config::load(cli.config.as_deref())?;
    let (command, args) = cli.command.split();

    if let Some(days) = args.history_days {
        config.history_days = days;
    }
    config.validate()?;

    let end = args.end.unwrap_or_else(|| Utc::now().timestamp());
    let window = TimeWindow::ending_at(end, config.history_secs(), config.sample_interval_secs);
    let run_id = args
        .run_id
        .unwrap_or_else(|| Utc::now().format("%Y%m%dT%H%M%SZ").to_string());
    let metrics = if args.metrics.is_empty() {
        config.metrics.clone()
    } else {
        args.metrics
    };

    let store = store_from_config(&config.store)?;
    let recorder = recorder_from_config(&config.recorder)?;
    let pipeline_metrics = PipelineMetrics::new()?;
    info!(
        command = command.as_str(),
        run_id = %run_id,
        store = %store.name(),
        recorder = %recorder.name(),
        artifact_dir = %config.artifact_dir.display(),
        "Pipeline configured"
    );

    let orchestrator = PipelineOrchestrator::new(config, store, recorder, pipeline_metrics);
    let record = orchestrator
        .run(RunRequest {
            command,
            run_id,
            metrics,
            window,
            force: args.force,
        })
        .await?;

    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(u8::try_from(record.exit_code()).unwrap_or(EXIT_INTERNAL))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            let code = e
                .downcast_ref::<PipelineError>()
                .and_then(|pe| u8::try_from(pe.kind().exit_code()).ok())
                .unwrap_or(EXIT_INTERNAL);
            error!(error = %e, exit_code = code, "Pipeline invocation failed");
            eprintln!("error: {:#}", e);
            ExitCode::from(code)
        }
    }
}
