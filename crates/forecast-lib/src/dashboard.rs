//! Read model for dashboards and the operator CLI
//!
//! Loading never fails: missing, stale or unreadable artifacts turn into a
//! status plus a guidance message naming the command that fixes them.

use crate::artifacts::{ArtifactStore, ModelPointer};
use crate::models::{format_timestamp, ForecastResult};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverviewStatus {
    /// Forecast is fresh and matches the latest model
    Ready,
    /// Forecast exists but is old or predates the latest model
    Stale,
    /// No forecast to show
    Missing,
}

impl OverviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverviewStatus::Ready => "ready",
            OverviewStatus::Stale => "stale",
            OverviewStatus::Missing => "missing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricOverview {
    pub metric: String,
    pub status: OverviewStatus,
    pub model: Option<ModelPointer>,
    pub forecast: Option<ForecastResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
}

impl MetricOverview {
    pub fn peak_upper(&self) -> Option<f64> {
        self.forecast.as_ref().and_then(|f| f.peak_upper())
    }
}

/// Latest model and forecast for `metric`, judged against `now`
pub async fn load_overview(
    store: &ArtifactStore,
    metric: &str,
    now: i64,
    stale_after_secs: i64,
) -> MetricOverview {
    let model = store.latest_pointer(metric).await.unwrap_or_else(|e| {
        warn!(metric = %metric, error = %e, "Unreadable model pointer");
        None
    });
    let forecast = store.load_forecast(metric).await.unwrap_or_else(|e| {
        warn!(metric = %metric, error = %e, "Unreadable forecast");
        None
    });

    let (status, guidance) = match (&model, &forecast) {
        (None, None) => (
            OverviewStatus::Missing,
            Some(format!(
                "No successful run for {} yet. Run `forecast-pipeline run --metric {}`.",
                metric, metric
            )),
        ),
        (Some(pointer), None) => (
            OverviewStatus::Missing,
            Some(format!(
                "Model {} is trained but no forecast exists. Run `forecast-pipeline infer --metric {}`.",
                pointer.version, metric
            )),
        ),
        (pointer, Some(forecast)) => {
            let age = now - forecast.generated_at;
            if age > stale_after_secs {
                (
                    OverviewStatus::Stale,
                    Some(format!(
                        "Forecast generated at {} is older than {}s. Run `forecast-pipeline run --metric {}`.",
                        format_timestamp(forecast.generated_at),
                        stale_after_secs,
                        metric
                    )),
                )
            } else {
                match pointer {
                    Some(pointer) if pointer.version != forecast.model_version => (
                        OverviewStatus::Stale,
                        Some(format!(
                            "Forecast was produced by {} but the latest model is {}. Run `forecast-pipeline infer --metric {}`.",
                            forecast.model_version, pointer.version, metric
                        )),
                    ),
                    Some(_) => (OverviewStatus::Ready, None),
                    None => (
                        OverviewStatus::Ready,
                        Some(format!(
                            "Model metadata is missing. Run `forecast-pipeline train --metric {}` to restore it.",
                            metric
                        )),
                    ),
                }
            }
        }
    };

    MetricOverview {
        metric: metric.to_string(),
        status,
        model,
        forecast,
        guidance,
    }
}

/// Overviews for several metrics, in the given order
pub async fn load_overviews(
    store: &ArtifactStore,
    metrics: &[String],
    now: i64,
    stale_after_secs: i64,
) -> Vec<MetricOverview> {
    let mut overviews = Vec::with_capacity(metrics.len());
    for metric in metrics {
        overviews.push(load_overview(store, metric, now, stale_after_secs).await);
    }
    overviews
}
