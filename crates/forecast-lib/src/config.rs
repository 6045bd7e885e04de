//! Pipeline configuration
//!
//! Every tunable the stages need lives here and is passed explicitly into
//! the component constructors.

use crate::artifacts::layout::is_valid_segment;
use crate::error::{PipelineError, Result};
use crate::models::{SarimaOrder, DEFAULT_HORIZON_STEPS, SAMPLE_INTERVAL_SECS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Inclusive range for one order component of the search grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRange {
    pub min: usize,
    pub max: usize,
}

impl OrderRange {
    pub const fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    pub fn values(&self) -> impl Iterator<Item = usize> {
        self.min..=self.max
    }
}

/// Bounded search space for SARIMA orders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateRanges {
    pub p: OrderRange,
    pub d: OrderRange,
    pub q: OrderRange,
    pub seasonal_p: OrderRange,
    pub seasonal_d: OrderRange,
    pub seasonal_q: OrderRange,
    /// Upper bound on d + D
    pub max_total_differencing: usize,
}

impl Default for CandidateRanges {
    fn default() -> Self {
        Self {
            p: OrderRange::new(0, 2),
            d: OrderRange::new(0, 1),
            q: OrderRange::new(0, 2),
            seasonal_p: OrderRange::new(0, 1),
            seasonal_d: OrderRange::new(0, 1),
            seasonal_q: OrderRange::new(0, 1),
            max_total_differencing: 2,
        }
    }
}

impl CandidateRanges {
    /// Enumerate every order in the grid, in lexicographic order
    pub fn enumerate(&self, period: usize) -> Vec<SarimaOrder> {
        let mut orders = Vec::new();
        for p in self.p.values() {
            for d in self.d.values() {
                for q in self.q.values() {
                    for sp in self.seasonal_p.values() {
                        for sd in self.seasonal_d.values() {
                            for sq in self.seasonal_q.values() {
                                if d + sd > self.max_total_differencing {
                                    continue;
                                }
                                orders.push(SarimaOrder::new((p, d, q), (sp, sd, sq), period));
                            }
                        }
                    }
                }
            }
        }
        orders
    }

    fn validate(&self) -> Result<()> {
        let ranges = [
            ("p", self.p),
            ("d", self.d),
            ("q", self.q),
            ("seasonal_p", self.seasonal_p),
            ("seasonal_d", self.seasonal_d),
            ("seasonal_q", self.seasonal_q),
        ];
        for (name, range) in ranges {
            if range.min > range.max {
                return Err(PipelineError::Config(format!(
                    "candidate_ranges.{} has min {} > max {}",
                    name, range.min, range.max
                )));
            }
            if range.max > 5 {
                return Err(PipelineError::Config(format!(
                    "candidate_ranges.{} max {} exceeds 5",
                    name, range.max
                )));
            }
        }
        Ok(())
    }
}

/// How missing grid points are filled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapFillPolicy {
    #[default]
    Linear,
    ForwardFill,
}

/// Timeout and retry-with-backoff policy for external I/O
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub attempt_timeout_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            attempt_timeout_secs: 30,
        }
    }
}

impl RetryPolicy {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

/// Model search settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Concurrent candidate fits per metric
    pub workers: usize,
    /// Overall search deadline per metric
    pub timeout_secs: u64,
    /// Optimiser iteration cap per candidate
    pub max_iterations: usize,
    /// Relative objective tolerance for convergence
    pub tolerance: f64,
    /// Reject candidates whose short projection leaves the plausible range
    pub plausibility_screen: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            timeout_secs: 600,
            max_iterations: 1000,
            tolerance: 1e-8,
            plausibility_screen: true,
        }
    }
}

impl SearchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// InfluxDB series reference for a logical metric name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfluxSeries {
    pub measurement: String,
    pub field: String,
}

/// Time-series store selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    Influx {
        url: String,
        org: String,
        bucket: String,
        /// Environment variable holding the API token
        #[serde(default = "default_token_env")]
        token_env: String,
        #[serde(default = "default_influx_series")]
        series: BTreeMap<String, InfluxSeries>,
    },
    Csv {
        path: PathBuf,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Influx {
            url: "http://localhost:8086".to_string(),
            org: "monitoring".to_string(),
            bucket: "system_metrics".to_string(),
            token_env: default_token_env(),
            series: default_influx_series(),
        }
    }
}

fn default_token_env() -> String {
    "DOCKER_INFLUXDB_INIT_ADMIN_TOKEN".to_string()
}

fn default_influx_series() -> BTreeMap<String, InfluxSeries> {
    let mut series = BTreeMap::new();
    series.insert(
        "cpu_usage_percent".to_string(),
        InfluxSeries {
            measurement: "cpu".to_string(),
            field: "usage_active".to_string(),
        },
    );
    series.insert(
        "memory_usage_percent".to_string(),
        InfluxSeries {
            measurement: "mem".to_string(),
            field: "used_percent".to_string(),
        },
    );
    series
}

/// Experiment recorder selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecorderConfig {
    File {
        root: PathBuf,
    },
    Mlflow {
        tracking_uri: String,
        #[serde(default = "default_experiment_name")]
        experiment_name: String,
    },
    Disabled,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        RecorderConfig::File {
            root: PathBuf::from("mlruns"),
        }
    }
}

fn default_experiment_name() -> String {
    "SARIMA_Forecasting".to_string()
}

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub metrics: Vec<String>,
    pub candidate_ranges: CandidateRanges,
    pub horizon_steps: usize,
    pub seasonal_period: usize,
    pub sample_interval_secs: i64,
    /// Longest run of missing grid points that may be filled
    pub max_gap_length: usize,
    pub gap_fill: GapFillPolicy,
    /// Robust z-score beyond which values are clipped
    pub outlier_threshold: f64,
    pub confidence_level: f64,
    pub retry_policy: RetryPolicy,
    pub history_days: u32,
    pub min_history_cycles: usize,
    pub search: SearchConfig,
    pub metric_concurrency: usize,
    pub artifact_dir: PathBuf,
    pub stale_after_secs: i64,
    pub store: StoreConfig,
    pub recorder: RecorderConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            metrics: vec![
                "cpu_usage_percent".to_string(),
                "memory_usage_percent".to_string(),
            ],
            candidate_ranges: CandidateRanges::default(),
            horizon_steps: DEFAULT_HORIZON_STEPS,
            seasonal_period: 12,
            sample_interval_secs: SAMPLE_INTERVAL_SECS,
            max_gap_length: 48,
            gap_fill: GapFillPolicy::default(),
            outlier_threshold: 3.5,
            confidence_level: 0.95,
            retry_policy: RetryPolicy::default(),
            history_days: 14,
            min_history_cycles: 72,
            search: SearchConfig::default(),
            metric_concurrency: 4,
            artifact_dir: PathBuf::from("artifacts"),
            stale_after_secs: 3600,
            store: StoreConfig::default(),
            recorder: RecorderConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Minimum canonical series length required before any fit
    pub fn min_history_points(&self) -> usize {
        self.seasonal_period * self.min_history_cycles
    }

    /// Minimum ingestion window length
    pub fn min_history_secs(&self) -> i64 {
        self.min_history_points() as i64 * self.sample_interval_secs
    }

    /// Default ingestion window length
    pub fn history_secs(&self) -> i64 {
        i64::from(self.history_days) * 24 * 60 * 60
    }

    pub fn validate(&self) -> Result<()> {
        if self.metrics.is_empty() {
            return Err(PipelineError::Config("metrics must not be empty".to_string()));
        }
        if let Some(bad) = self.metrics.iter().find(|m| !is_valid_segment(m)) {
            return Err(PipelineError::Config(format!(
                "metric name {:?} must use only letters, digits, '_', '-' or '.'",
                bad
            )));
        }
        if self.horizon_steps == 0 {
            return Err(PipelineError::Config("horizon_steps must be positive".to_string()));
        }
        if self.seasonal_period < 2 {
            return Err(PipelineError::Config("seasonal_period must be at least 2".to_string()));
        }
        if self.sample_interval_secs <= 0 {
            return Err(PipelineError::Config(
                "sample_interval_secs must be positive".to_string(),
            ));
        }
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(PipelineError::Config(format!(
                "confidence_level {} must lie in (0, 1)",
                self.confidence_level
            )));
        }
        if !(self.outlier_threshold > 0.0) {
            return Err(PipelineError::Config("outlier_threshold must be positive".to_string()));
        }
        if self.retry_policy.max_attempts == 0 {
            return Err(PipelineError::Config(
                "retry_policy.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.search.workers == 0 || self.metric_concurrency == 0 {
            return Err(PipelineError::Config(
                "search.workers and metric_concurrency must be positive".to_string(),
            ));
        }
        if self.min_history_cycles == 0 {
            return Err(PipelineError::Config("min_history_cycles must be positive".to_string()));
        }
        if self.history_secs() < self.min_history_secs() {
            return Err(PipelineError::Config(format!(
                "history_days {} is shorter than the minimum history of {} samples",
                self.history_days,
                self.min_history_points()
            )));
        }
        self.candidate_ranges.validate()
    }
}
