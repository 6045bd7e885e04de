//! Metric history ingestion from time-series stores
//!
//! The ingestor reads raw points for a window and tolerates irregular
//! source sampling; regularisation is left to the preprocessor.

mod csv_store;
mod influx;
mod memory;

pub use csv_store::CsvStore;
pub use influx::InfluxStore;
pub use memory::InMemoryStore;

use crate::config::{PipelineConfig, RetryPolicy, StoreConfig};
use crate::error::{PipelineError, Result};
use crate::models::{MetricPoint, MetricSeries, TimeWindow};
use crate::retry::retry_with_backoff;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

pub use async_trait::async_trait;

/// Errors reported by a store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Unreachable(String),
    #[error("store returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("unknown metric {0}")]
    UnknownMetric(String),
}

/// Range-query interface of an external time-series store
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Points for `metric` with `start <= timestamp < end`, in source order
    async fn query(
        &self,
        metric: &str,
        start: i64,
        end: i64,
    ) -> std::result::Result<Vec<MetricPoint>, StoreError>;

    /// Human-readable backend name for logs
    fn name(&self) -> &str;
}

/// Build the store selected in configuration
pub fn store_from_config(config: &StoreConfig) -> Result<Arc<dyn TimeSeriesStore>> {
    match config {
        StoreConfig::Influx {
            url,
            org,
            bucket,
            token_env,
            series,
        } => {
            let token = std::env::var(token_env).unwrap_or_default();
            let store = InfluxStore::new(url, org, bucket, token, series.clone())?;
            Ok(Arc::new(store))
        }
        StoreConfig::Csv { path } => Ok(Arc::new(CsvStore::new(path.clone()))),
    }
}

/// Pulls raw metric history for a time window
pub struct Ingestor {
    store: Arc<dyn TimeSeriesStore>,
    retry: RetryPolicy,
    interval_secs: i64,
    min_history_secs: i64,
}

impl Ingestor {
    pub fn new(store: Arc<dyn TimeSeriesStore>, config: &PipelineConfig) -> Self {
        Self {
            store,
            retry: config.retry_policy.clone(),
            interval_secs: config.sample_interval_secs,
            min_history_secs: config.min_history_secs(),
        }
    }

    /// Fetch raw points for `metric` in `window`.
    ///
    /// Fails fast with `InsufficientHistory` when the window cannot hold the
    /// minimum history, and with `DataUnavailable` when the store stays
    /// unreachable or has nothing for the window.
    pub async fn fetch(&self, metric: &str, window: TimeWindow) -> Result<MetricSeries> {
        if window.end <= window.start {
            return Err(PipelineError::insufficient_history(
                metric,
                format!("window end {} is not after start {}", window.end, window.start),
            ));
        }
        if window.duration_secs() < self.min_history_secs {
            return Err(PipelineError::insufficient_history(
                metric,
                format!(
                    "window of {}s is shorter than the required {}s",
                    window.duration_secs(),
                    self.min_history_secs
                ),
            ));
        }

        debug!(
            metric = %metric,
            store = %self.store.name(),
            start = window.start,
            end = window.end,
            "Querying time-series store"
        );

        let store = self.store.clone();
        let operation = format!("query {} from {}", metric, self.store.name());
        let mut points = retry_with_backoff(&self.retry, &operation, || {
            let store = store.clone();
            async move { store.query(metric, window.start, window.end).await }
        })
        .await
        .map_err(|e| PipelineError::data_unavailable(metric, e.to_string()))?;

        points.retain(|p| window.contains(p.timestamp));
        if points.is_empty() {
            return Err(PipelineError::data_unavailable(
                metric,
                "store returned zero points for the window",
            ));
        }
        points.sort_by_key(|p| p.timestamp);

        info!(
            metric = %metric,
            points = points.len(),
            store = %self.store.name(),
            "Ingested raw metric history"
        );

        Ok(MetricSeries::new(metric, self.interval_secs, points))
    }
}
