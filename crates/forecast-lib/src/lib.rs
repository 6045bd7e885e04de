//! Forecasting pipeline library for server resource usage
//!
//! This crate provides the core functionality for:
//! - Metric history ingestion from time-series stores
//! - Preprocessing into canonical fixed-interval series
//! - Seasonal ARIMA model search, fitting and selection
//! - Fixed-horizon forecasting with prediction intervals
//! - Per-metric pipeline orchestration, artifacts and experiment tracking

pub mod artifacts;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod forecaster;
pub mod ingest;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod preprocess;
pub mod recorder;
pub mod retry;
pub mod trainer;

pub use config::PipelineConfig;
pub use error::{ErrorKind, PipelineError, Result};
pub use models::*;
pub use observability::{PipelineMetrics, StructuredLogger};
pub use dashboard::{load_overview, load_overviews, MetricOverview, OverviewStatus};
pub use forecaster::Forecaster;
pub use orchestrator::{PipelineCommand, PipelineOrchestrator, RunRecord, RunRequest, RunStatus};
pub use trainer::{ModelSelector, Trainer};
