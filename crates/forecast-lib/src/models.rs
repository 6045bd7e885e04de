//! Core data models for the forecasting pipeline

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical sampling interval (5 minutes)
pub const SAMPLE_INTERVAL_SECS: i64 = 5 * 60;

/// Default forecast horizon (4 hours at 5-minute resolution)
pub const DEFAULT_HORIZON_STEPS: usize = 48;

/// A single (timestamp, value) observation, timestamps in unix seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: i64,
    pub value: f64,
}

impl MetricPoint {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Ordered observations of one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    pub metric: String,
    pub interval_secs: i64,
    pub points: Vec<MetricPoint>,
}

impl MetricSeries {
    pub fn new(metric: impl Into<String>, interval_secs: i64, points: Vec<MetricPoint>) -> Self {
        Self {
            metric: metric.into(),
            interval_secs,
            points,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<i64> {
        self.points.first().map(|p| p.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.points.last().map(|p| p.timestamp)
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    /// True when timestamps advance by exactly one interval and all values are finite
    pub fn is_canonical(&self) -> bool {
        self.points.iter().all(|p| p.value.is_finite())
            && self
                .points
                .windows(2)
                .all(|w| w[1].timestamp - w[0].timestamp == self.interval_secs)
    }
}

/// Half-open time window `[start, end)` in unix seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: i64,
    pub end: i64,
}

impl TimeWindow {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Window of `history_secs` ending at `end` floored to `interval_secs`
    pub fn ending_at(end: i64, history_secs: i64, interval_secs: i64) -> Self {
        let end = floor_to_interval(end, interval_secs);
        Self {
            start: end - history_secs,
            end,
        }
    }

    pub fn duration_secs(&self) -> i64 {
        self.end - self.start
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }
}

/// Per-metric context threaded through every stage call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: String,
    pub metric: String,
    pub window: TimeWindow,
}

impl RunContext {
    pub fn new(run_id: impl Into<String>, metric: impl Into<String>, window: TimeWindow) -> Self {
        Self {
            run_id: run_id.into(),
            metric: metric.into(),
            window,
        }
    }

    /// Model version tag produced by this run
    pub fn model_version(&self) -> String {
        format!("v{}", self.run_id)
    }
}

/// Seasonal ARIMA order (p, d, q) x (P, D, Q, s)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SarimaOrder {
    pub p: usize,
    pub d: usize,
    pub q: usize,
    pub seasonal_p: usize,
    pub seasonal_d: usize,
    pub seasonal_q: usize,
    pub period: usize,
}

impl SarimaOrder {
    pub fn new(non_seasonal: (usize, usize, usize), seasonal: (usize, usize, usize), period: usize) -> Self {
        Self {
            p: non_seasonal.0,
            d: non_seasonal.1,
            q: non_seasonal.2,
            seasonal_p: seasonal.0,
            seasonal_d: seasonal.1,
            seasonal_q: seasonal.2,
            period,
        }
    }

    /// An intercept is estimated only for undifferenced models
    pub fn has_intercept(&self) -> bool {
        self.d + self.seasonal_d == 0
    }

    /// Number of optimised ARMA coefficients
    pub fn coefficient_count(&self) -> usize {
        self.p + self.q + self.seasonal_p + self.seasonal_q
    }

    /// Number of estimated parameters, including intercept and innovation variance
    pub fn parameter_count(&self) -> usize {
        self.coefficient_count() + usize::from(self.has_intercept()) + 1
    }
}

impl fmt::Display for SarimaOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SARIMA({},{},{})x({},{},{},{})",
            self.p, self.d, self.q, self.seasonal_p, self.seasonal_d, self.seasonal_q, self.period
        )
    }
}

/// Outcome of fitting one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitStatus {
    Converged,
    NonConvergent,
    /// Converged, but the short projection was implausible
    Rejected,
    /// Never fitted because the search timed out
    Skipped,
}

impl FitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FitStatus::Converged => "converged",
            FitStatus::NonConvergent => "non_convergent",
            FitStatus::Rejected => "rejected",
            FitStatus::Skipped => "skipped",
        }
    }
}

/// A configuration in the search grid, with its scores once fitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCandidate {
    pub order: SarimaOrder,
    pub status: FitStatus,
    pub aic: Option<f64>,
    pub bic: Option<f64>,
    pub log_likelihood: Option<f64>,
    pub iterations: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ModelCandidate {
    pub fn unfitted(order: SarimaOrder, status: FitStatus, message: impl Into<String>) -> Self {
        Self {
            order,
            status,
            aic: None,
            bic: None,
            log_likelihood: None,
            iterations: 0,
            message: Some(message.into()),
        }
    }

    pub fn parameter_count(&self) -> usize {
        self.order.parameter_count()
    }
}

/// Fitted SARIMA coefficients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SarimaParams {
    pub ar: Vec<f64>,
    pub seasonal_ar: Vec<f64>,
    pub ma: Vec<f64>,
    pub seasonal_ma: Vec<f64>,
    /// Mean of the (undifferenced) series, zero when differencing is applied
    pub intercept: f64,
    /// Innovation variance
    pub sigma2: f64,
}

/// Recursion state needed to forecast without the training series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    /// Last observations of the original series, oldest first
    pub y_tail: Vec<f64>,
    /// Last in-sample residuals, oldest first
    pub residual_tail: Vec<f64>,
}

/// Bounds of the series a model was trained on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingWindow {
    pub start: i64,
    pub end: i64,
    pub observations: usize,
}

/// Selected and fitted model, immutable once persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub metric: String,
    pub version: String,
    pub run_id: String,
    pub order: SarimaOrder,
    pub params: SarimaParams,
    pub state: ModelState,
    pub aic: f64,
    pub bic: f64,
    pub log_likelihood: f64,
    pub window: TrainingWindow,
    pub interval_secs: i64,
    pub trained_at: i64,
    pub candidates_evaluated: usize,
    pub candidates_converged: usize,
}

/// One forecast step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub timestamp: i64,
    pub point: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Fixed-horizon forecast for one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub metric: String,
    pub model_version: String,
    pub generated_at: i64,
    pub horizon: usize,
    pub confidence_level: f64,
    pub points: Vec<ForecastPoint>,
}

impl ForecastResult {
    /// Highest upper bound across the horizon
    pub fn peak_upper(&self) -> Option<f64> {
        self.points.iter().map(|p| p.upper).reduce(f64::max)
    }
}

/// Floor a timestamp to a multiple of `interval_secs`
pub fn floor_to_interval(timestamp: i64, interval_secs: i64) -> i64 {
    timestamp.div_euclid(interval_secs) * interval_secs
}

/// Format unix seconds as RFC 3339 (UTC, second precision)
pub fn format_timestamp(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| timestamp.to_string())
}
