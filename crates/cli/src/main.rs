//! Forecast operator CLI
//!
//! A read-only view over the artifact store written by the forecasting
//! pipeline: readiness per metric, forecasts, model versions and run history.

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{forecasts, models, runs, status};
use forecast_lib::artifacts::ArtifactStore;
use forecast_lib::config::RetryPolicy;
use std::path::PathBuf;

const DEFAULT_ARTIFACT_DIR: &str = "artifacts";
const DEFAULT_STALE_AFTER_SECS: i64 = 3600;

/// Resource usage forecast CLI
#[derive(Parser)]
#[command(name = "fcst")]
#[command(author, version, about = "Operator view of resource usage forecasts", long_about = None)]
pub struct Cli {
    /// Artifact store root (falls back to ~/.config/fcst/config.json, then ./artifacts)
    #[arg(long, env = "FORECAST_ARTIFACT_DIR")]
    pub artifact_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Forecast readiness per metric, with guidance when something is missing
    Status {
        /// Metric to show (repeatable, defaults to every metric in the store)
        #[arg(long = "metric", short)]
        metrics: Vec<String>,

        /// Age in seconds after which a forecast is stale
        #[arg(long)]
        stale_after: Option<i64>,
    },

    /// Show the latest forecast for a metric
    Forecast {
        /// Metric name
        metric: String,

        /// Show only the first N steps
        #[arg(long)]
        limit: Option<usize>,
    },

    /// List persisted model versions
    Models {
        /// Filter by metric
        #[arg(long, short)]
        metric: Option<String>,

        /// Show only the version each latest pointer references
        #[arg(long)]
        latest_only: bool,
    },

    /// Show recent pipeline runs
    Runs {
        /// Number of runs to show
        #[arg(long, default_value_t = 10)]
        limit: usize,

        /// Show per-metric outcomes of one run
        #[arg(long)]
        run_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = config::Config::load()?;

    let artifact_dir = cli
        .artifact_dir
        .or(settings.artifact_dir)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ARTIFACT_DIR));
    let store = ArtifactStore::new(artifact_dir, RetryPolicy::default());

    match cli.command {
        Commands::Status {
            metrics,
            stale_after,
        } => {
            let stale_after = stale_after
                .or(settings.stale_after_secs)
                .unwrap_or(DEFAULT_STALE_AFTER_SECS);
            status::show_status(&store, metrics, stale_after, cli.format).await?;
        }
        Commands::Forecast { metric, limit } => {
            forecasts::show_forecast(&store, &metric, limit, cli.format).await?;
        }
        Commands::Models {
            metric,
            latest_only,
        } => {
            models::list_models(&store, metric, latest_only, cli.format).await?;
        }
        Commands::Runs { limit, run_id } => {
            runs::list_runs(&store, limit, run_id, cli.format).await?;
        }
    }

    Ok(())
}
