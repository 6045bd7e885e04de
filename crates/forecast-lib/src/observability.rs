//! Observability for the forecasting pipeline
//!
//! Provides:
//! - Prometheus metrics on a per-instance registry, exported as a textfile
//! - Structured logging of pipeline events with tracing

use crate::models::{ModelCandidate, SarimaOrder, TimeWindow};
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use tracing::{debug, info, warn};

/// Histogram buckets for stage durations (in seconds)
const STAGE_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0];

/// Pipeline metrics for one invocation
///
/// Clones share the same underlying registry.
#[derive(Clone)]
pub struct PipelineMetrics {
    registry: Registry,
    stage_duration_seconds: HistogramVec,
    stage_failures: IntCounterVec,
    candidates: IntCounterVec,
    last_success_timestamp: GaugeVec,
    forecast_peak_upper: GaugeVec,
    run_status: IntGaugeVec,
}

impl PipelineMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let stage_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "forecast_stage_duration_seconds",
                "Time spent in each pipeline stage",
            )
            .buckets(STAGE_BUCKETS.to_vec()),
            &["stage"],
        )?;
        let stage_failures = IntCounterVec::new(
            Opts::new(
                "forecast_stage_failures_total",
                "Pipeline stage failures by error kind",
            ),
            &["stage", "kind"],
        )?;
        let candidates = IntCounterVec::new(
            Opts::new(
                "forecast_candidates_total",
                "Model candidates evaluated, by fit status",
            ),
            &["metric", "status"],
        )?;
        let last_success_timestamp = GaugeVec::new(
            Opts::new(
                "forecast_last_success_timestamp_seconds",
                "Unix time of the last forecast produced per metric",
            ),
            &["metric"],
        )?;
        let forecast_peak_upper = GaugeVec::new(
            Opts::new(
                "forecast_peak_upper_bound",
                "Highest upper prediction bound over the forecast horizon",
            ),
            &["metric"],
        )?;
        let run_status = IntGaugeVec::new(
            Opts::new(
                "forecast_run_status",
                "Status of the latest invocation (1 for the active status)",
            ),
            &["command", "status"],
        )?;

        registry.register(Box::new(stage_duration_seconds.clone()))?;
        registry.register(Box::new(stage_failures.clone()))?;
        registry.register(Box::new(candidates.clone()))?;
        registry.register(Box::new(last_success_timestamp.clone()))?;
        registry.register(Box::new(forecast_peak_upper.clone()))?;
        registry.register(Box::new(run_status.clone()))?;

        Ok(Self {
            registry,
            stage_duration_seconds,
            stage_failures,
            candidates,
            last_success_timestamp,
            forecast_peak_upper,
            run_status,
        })
    }

    pub fn observe_stage_duration(&self, stage: &str, duration_secs: f64) {
        self.stage_duration_seconds
            .with_label_values(&[stage])
            .observe(duration_secs);
    }

    pub fn inc_stage_failure(&self, stage: &str, kind: &str) {
        self.stage_failures.with_label_values(&[stage, kind]).inc();
    }

    pub fn inc_candidate(&self, metric: &str, status: &str) {
        self.candidates.with_label_values(&[metric, status]).inc();
    }

    pub fn record_forecast(&self, metric: &str, generated_at: i64, peak_upper: Option<f64>) {
        self.last_success_timestamp
            .with_label_values(&[metric])
            .set(generated_at as f64);
        if let Some(peak) = peak_upper {
            self.forecast_peak_upper.with_label_values(&[metric]).set(peak);
        }
    }

    pub fn set_run_status(&self, command: &str, status: &str) {
        self.run_status.reset();
        self.run_status.with_label_values(&[command, status]).set(1);
    }

    /// Encode the registry in the Prometheus text exposition format
    pub fn encode(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Structured logger for pipeline events
///
/// Every event carries an `event` field and the run identifier.
#[derive(Clone)]
pub struct StructuredLogger {
    run_id: String,
}

impl StructuredLogger {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }

    pub fn log_pipeline_started(&self, command: &str, metrics: &[String], window: TimeWindow) {
        info!(
            event = "pipeline_started",
            run_id = %self.run_id,
            command = %command,
            metrics = ?metrics,
            window_start = window.start,
            window_end = window.end,
            "Forecasting pipeline started"
        );
    }

    pub fn log_stage_started(&self, metric: &str, stage: &str) {
        info!(
            event = "stage_started",
            run_id = %self.run_id,
            metric = %metric,
            stage = %stage,
            "Stage started"
        );
    }

    pub fn log_stage_failed(&self, metric: &str, stage: &str, kind: &str, reason: &str) {
        warn!(
            event = "stage_failed",
            run_id = %self.run_id,
            metric = %metric,
            stage = %stage,
            error_kind = %kind,
            reason = %reason,
            "Stage failed"
        );
    }

    pub fn log_candidate_evaluated(&self, metric: &str, candidate: &ModelCandidate) {
        debug!(
            event = "candidate_evaluated",
            run_id = %self.run_id,
            metric = %metric,
            order = %candidate.order,
            status = %candidate.status.as_str(),
            aic = ?candidate.aic,
            bic = ?candidate.bic,
            iterations = candidate.iterations,
            "Candidate evaluated"
        );
    }

    pub fn log_model_selected(
        &self,
        metric: &str,
        version: &str,
        order: &SarimaOrder,
        aic: f64,
        bic: f64,
        evaluated: usize,
        converged: usize,
    ) {
        info!(
            event = "model_selected",
            run_id = %self.run_id,
            metric = %metric,
            model_version = %version,
            order = %order,
            aic = aic,
            bic = bic,
            candidates_evaluated = evaluated,
            candidates_converged = converged,
            "Selected model"
        );
    }

    pub fn log_forecast_generated(
        &self,
        metric: &str,
        model_version: &str,
        horizon: usize,
        peak_upper: Option<f64>,
    ) {
        info!(
            event = "forecast_generated",
            run_id = %self.run_id,
            metric = %metric,
            model_version = %model_version,
            horizon = horizon,
            peak_upper = ?peak_upper,
            "Generated forecast"
        );
    }

    pub fn log_run_completed(
        &self,
        metric: &str,
        state: &str,
        failed_stage: Option<&str>,
        error_kind: Option<&str>,
    ) {
        match error_kind {
            Some(kind) => warn!(
                event = "run_completed",
                run_id = %self.run_id,
                metric = %metric,
                state = %state,
                failed_stage = ?failed_stage,
                error_kind = %kind,
                "Metric pipeline failed"
            ),
            None => info!(
                event = "run_completed",
                run_id = %self.run_id,
                metric = %metric,
                state = %state,
                "Metric pipeline completed"
            ),
        }
    }

    pub fn log_pipeline_finished(
        &self,
        command: &str,
        status: &str,
        succeeded: usize,
        failed: usize,
        exit_code: i32,
    ) {
        info!(
            event = "pipeline_finished",
            run_id = %self.run_id,
            command = %command,
            status = %status,
            succeeded = succeeded,
            failed = failed,
            exit_code = exit_code,
            "Forecasting pipeline finished"
        );
    }
}
