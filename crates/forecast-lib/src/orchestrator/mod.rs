//! Pipeline orchestration
//!
//! One stage machine per metric, run as independent tasks bounded by
//! `metric_concurrency`. A metric's failure is recorded in its outcome and
//! never reaches its siblings.

mod run_record;
mod state;

#[cfg(test)]
mod tests;

pub use run_record::{
    MetricOutcome, RunRecord, RunStatus, EXIT_INTERNAL, EXIT_MIXED_FAILURE, EXIT_PARTIAL,
};
pub use state::{IllegalTransition, Stage, StageMachine, StageTransition};

use crate::artifacts::{layout, ArtifactStore, SnapshotKind};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::forecaster::Forecaster;
use crate::ingest::{Ingestor, TimeSeriesStore};
use crate::models::{MetricSeries, RunContext, TimeWindow};
use crate::observability::{PipelineMetrics, StructuredLogger};
use crate::preprocess::Preprocessor;
use crate::recorder::{ExperimentRecorder, RetryingRecorder};
use crate::trainer::Trainer;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, warn};

/// Independently invocable operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineCommand {
    #[serde(rename = "run")]
    Full,
    Ingest,
    Preprocess,
    Train,
    Infer,
}

impl PipelineCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineCommand::Full => "run",
            PipelineCommand::Ingest => "ingest",
            PipelineCommand::Preprocess => "preprocess",
            PipelineCommand::Train => "train",
            PipelineCommand::Infer => "infer",
        }
    }

    /// Stages the command executes, in order
    pub fn stages(&self) -> &'static [Stage] {
        match self {
            PipelineCommand::Full => &[
                Stage::Ingesting,
                Stage::Preprocessing,
                Stage::Training,
                Stage::Forecasting,
            ],
            PipelineCommand::Ingest => &[Stage::Ingesting],
            PipelineCommand::Preprocess => &[Stage::Preprocessing],
            PipelineCommand::Train => &[Stage::Training],
            PipelineCommand::Infer => &[Stage::Forecasting],
        }
    }
}

/// Parameters of one invocation
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub command: PipelineCommand,
    pub run_id: String,
    pub metrics: Vec<String>,
    pub window: TimeWindow,
    /// Recompute stages whose output already exists for this run id
    pub force: bool,
}

/// What a stage handed to the next one
#[derive(Debug, Default)]
struct StageOutput {
    series: Option<MetricSeries>,
    artifacts: Vec<String>,
    model_version: Option<String>,
    reused: bool,
}

impl StageOutput {
    fn series(series: MetricSeries, artifacts: Vec<String>, reused: bool) -> Self {
        Self {
            series: Some(series),
            artifacts,
            model_version: None,
            reused,
        }
    }
}

/// Stage implementations shared by every metric task of one invocation
#[derive(Clone)]
struct StageRunner {
    ingestor: Arc<Ingestor>,
    preprocessor: Preprocessor,
    trainer: Arc<Trainer>,
    forecaster: Forecaster,
    artifacts: ArtifactStore,
    logger: StructuredLogger,
    metrics: PipelineMetrics,
    interval_secs: i64,
    horizon_steps: usize,
    force: bool,
}

impl StageRunner {
    async fn execute(self, command: PipelineCommand, ctx: RunContext) -> MetricOutcome {
        let metric = ctx.metric.clone();
        let mut machine = StageMachine::new();
        let mut artifacts = Vec::new();
        let mut reused = Vec::new();
        let mut model_version = None;
        let mut carried: Option<MetricSeries> = None;

        for &stage in command.stages() {
            if let Err(e) = machine.advance(stage) {
                return self.failed(machine, &metric, None, e.to_string(), artifacts);
            }
            self.logger.log_stage_started(&metric, stage.as_str());
            let started = Instant::now();

            let result = match stage {
                Stage::Ingesting => self.ingest(&ctx).await,
                Stage::Preprocessing => self.preprocess(&ctx, carried.take()).await,
                Stage::Training => self.train(&ctx, carried.take()).await,
                Stage::Forecasting => self.infer(&ctx, model_version.as_deref()).await,
                other => Err(PipelineError::Config(format!(
                    "{} is not an executable stage",
                    other
                ))),
            };
            self.metrics
                .observe_stage_duration(stage.as_str(), started.elapsed().as_secs_f64());

            match result {
                Ok(output) => {
                    artifacts.extend(output.artifacts);
                    if output.reused {
                        reused.push(stage);
                    }
                    if output.model_version.is_some() {
                        model_version = output.model_version;
                    }
                    carried = output.series;
                }
                Err(e) => {
                    let kind = e.kind();
                    self.metrics.inc_stage_failure(stage.as_str(), kind.as_str());
                    self.logger
                        .log_stage_failed(&metric, stage.as_str(), kind.as_str(), &e.to_string());
                    return self.failed(machine, &metric, Some(e), String::new(), artifacts);
                }
            }
        }

        if let Err(e) = machine.advance(Stage::Done) {
            return self.failed(machine, &metric, None, e.to_string(), artifacts);
        }
        MetricOutcome {
            metric,
            state: Stage::Done,
            failed_stage: None,
            error_kind: None,
            reason: None,
            artifacts,
            model_version,
            reused,
            transitions: machine.into_history(),
        }
    }

    fn failed(
        &self,
        mut machine: StageMachine,
        metric: &str,
        error: Option<PipelineError>,
        internal_reason: String,
        artifacts: Vec<String>,
    ) -> MetricOutcome {
        let failed_stage = machine.fail();
        let (error_kind, reason) = match error {
            Some(e) => (Some(e.kind()), e.to_string()),
            None => {
                error!(metric = %metric, reason = %internal_reason, "Metric pipeline aborted");
                (None, internal_reason)
            }
        };
        MetricOutcome {
            metric: metric.to_string(),
            state: Stage::Failed,
            failed_stage,
            error_kind,
            reason: Some(reason),
            artifacts,
            model_version: None,
            reused: Vec::new(),
            transitions: machine.into_history(),
        }
    }

    async fn reusable_snapshot(&self, ctx: &RunContext, kind: SnapshotKind) -> Option<MetricSeries> {
        if self.force {
            return None;
        }
        match self
            .artifacts
            .load_snapshot(&ctx.metric, &ctx.run_id, kind, self.interval_secs)
            .await
        {
            Ok(series) => series,
            Err(e) => {
                warn!(metric = %ctx.metric, error = %e, "Ignoring unreadable snapshot");
                None
            }
        }
    }

    /// Snapshot written by the previous stage of the same run
    async fn required_snapshot(&self, ctx: &RunContext, kind: SnapshotKind) -> Result<MetricSeries> {
        let key = layout::snapshot(&ctx.metric, &ctx.run_id, kind);
        let command = match kind {
            SnapshotKind::Raw => PipelineCommand::Ingest,
            SnapshotKind::Preprocessed => PipelineCommand::Preprocess,
        };
        self.artifacts
            .load_snapshot(&ctx.metric, &ctx.run_id, kind, self.interval_secs)
            .await
            .map_err(|e| PipelineError::data_unavailable(&ctx.metric, e.to_string()))?
            .ok_or_else(|| {
                PipelineError::data_unavailable(
                    &ctx.metric,
                    format!(
                        "{} not found; run `{}` for run id {} first",
                        key,
                        command.as_str(),
                        ctx.run_id
                    ),
                )
            })
    }

    async fn ingest(&self, ctx: &RunContext) -> Result<StageOutput> {
        let key = layout::snapshot(&ctx.metric, &ctx.run_id, SnapshotKind::Raw);
        if let Some(series) = self.reusable_snapshot(ctx, SnapshotKind::Raw).await {
            return Ok(StageOutput::series(series, vec![key], true));
        }
        let series = self.ingestor.fetch(&ctx.metric, ctx.window).await?;
        let key = self
            .artifacts
            .save_snapshot(&ctx.run_id, SnapshotKind::Raw, &series)
            .await?;
        Ok(StageOutput::series(series, vec![key], false))
    }

    async fn preprocess(&self, ctx: &RunContext, raw: Option<MetricSeries>) -> Result<StageOutput> {
        let key = layout::snapshot(&ctx.metric, &ctx.run_id, SnapshotKind::Preprocessed);
        if let Some(series) = self
            .reusable_snapshot(ctx, SnapshotKind::Preprocessed)
            .await
        {
            return Ok(StageOutput::series(series, vec![key], true));
        }
        let raw = match raw {
            Some(raw) => raw,
            None => self.required_snapshot(ctx, SnapshotKind::Raw).await?,
        };
        let canonical = self.preprocessor.normalize(&raw, ctx.window)?;
        let key = self
            .artifacts
            .save_snapshot(&ctx.run_id, SnapshotKind::Preprocessed, &canonical)
            .await?;
        Ok(StageOutput::series(canonical, vec![key], false))
    }

    async fn train(&self, ctx: &RunContext, canonical: Option<MetricSeries>) -> Result<StageOutput> {
        let version = ctx.model_version();
        if !self.force && self.artifacts.model_exists(&ctx.metric, &version).await {
            return Ok(StageOutput {
                series: None,
                artifacts: vec![layout::model(&ctx.metric, &version)],
                model_version: Some(version),
                reused: true,
            });
        }
        let canonical = match canonical {
            Some(series) => series,
            None => {
                self.required_snapshot(ctx, SnapshotKind::Preprocessed)
                    .await?
            }
        };
        let outcome = self.trainer.train(ctx, &canonical).await?;
        Ok(StageOutput {
            series: None,
            artifacts: outcome.artifacts,
            model_version: Some(outcome.model.version),
            reused: false,
        })
    }

    /// Forecast from `trained`, the version the same command just produced
    /// or reused, or else from the latest pointer.
    async fn infer(&self, ctx: &RunContext, trained: Option<&str>) -> Result<StageOutput> {
        let metric = ctx.metric.as_str();
        let loaded = match trained {
            Some(version) => self.artifacts.load_model(metric, version).await,
            None => self
                .artifacts
                .load_latest_model(metric)
                .await
                .map(|latest| latest.map(|(_, model)| model)),
        };
        let model = match loaded {
            Ok(Some(model)) => model,
            Ok(None) => {
                return Err(PipelineError::forecast(
                    metric,
                    "no trained model; run `train` first",
                ))
            }
            Err(e) => return Err(PipelineError::forecast(metric, e.to_string())),
        };
        let version = model.version.clone();

        let keys = vec![layout::forecast(metric), layout::forecast_meta(metric)];
        if !self.force {
            if let Ok(Some(existing)) = self.artifacts.load_forecast(metric).await {
                if existing.model_version == version
                    && existing.horizon == self.horizon_steps
                    && existing.confidence_level == self.forecaster.confidence_level()
                {
                    return Ok(StageOutput {
                        series: None,
                        artifacts: keys,
                        model_version: Some(version),
                        reused: true,
                    });
                }
            }
        }

        let forecast = self.forecaster.forecast(&model, self.horizon_steps)?;
        let artifacts = self.artifacts.save_forecast(&forecast).await?;
        let peak = forecast.peak_upper();
        self.metrics
            .record_forecast(metric, forecast.generated_at, peak);
        self.logger
            .log_forecast_generated(metric, &forecast.model_version, forecast.horizon, peak);
        Ok(StageOutput {
            series: None,
            artifacts,
            model_version: Some(version),
            reused: false,
        })
    }
}

/// Coordinates per-metric pipelines and writes the run record
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    store: Arc<dyn TimeSeriesStore>,
    recorder: Arc<dyn ExperimentRecorder>,
    artifacts: ArtifactStore,
    metrics: PipelineMetrics,
}

impl PipelineOrchestrator {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn TimeSeriesStore>,
        recorder: Arc<dyn ExperimentRecorder>,
        metrics: PipelineMetrics,
    ) -> Self {
        let artifacts = ArtifactStore::new(config.artifact_dir.clone(), config.retry_policy.clone());
        Self {
            config,
            store,
            recorder,
            artifacts,
            metrics,
        }
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    fn runner(&self, logger: StructuredLogger, force: bool) -> StageRunner {
        let recorder = RetryingRecorder::new(self.recorder.clone(), self.config.retry_policy.clone());
        StageRunner {
            ingestor: Arc::new(Ingestor::new(self.store.clone(), &self.config)),
            preprocessor: Preprocessor::new(&self.config),
            trainer: Arc::new(Trainer::new(
                &self.config,
                self.artifacts.clone(),
                recorder,
                logger.clone(),
                self.metrics.clone(),
            )),
            forecaster: Forecaster::new(&self.config),
            artifacts: self.artifacts.clone(),
            logger,
            metrics: self.metrics.clone(),
            interval_secs: self.config.sample_interval_secs,
            horizon_steps: self.config.horizon_steps,
            force,
        }
    }

    /// Execute `request` for every metric and persist the run record.
    ///
    /// Metric failures are reported in the record; only an invalid request
    /// or a failure to persist the record is an error.
    pub async fn run(&self, request: RunRequest) -> Result<RunRecord> {
        if !layout::is_valid_segment(&request.run_id) {
            return Err(PipelineError::Config(format!(
                "invalid run id {:?}",
                request.run_id
            )));
        }
        let mut metrics: Vec<String> = Vec::with_capacity(request.metrics.len());
        for metric in &request.metrics {
            if !layout::is_valid_segment(metric) {
                return Err(PipelineError::Config(format!(
                    "invalid metric name {:?}",
                    metric
                )));
            }
            if !metrics.contains(metric) {
                metrics.push(metric.clone());
            }
        }
        if metrics.is_empty() {
            return Err(PipelineError::Config("no metrics requested".to_string()));
        }

        let started_at = Utc::now().timestamp();
        let command = request.command;
        let logger = StructuredLogger::new(&request.run_id);
        logger.log_pipeline_started(command.as_str(), &metrics, request.window);

        let runner = self.runner(logger.clone(), request.force);
        let slots = Arc::new(Semaphore::new(self.config.metric_concurrency.max(1)));
        let mut set = JoinSet::new();
        for (idx, metric) in metrics.iter().enumerate() {
            let ctx = RunContext::new(&request.run_id, metric, request.window);
            let runner = runner.clone();
            let slots = slots.clone();
            set.spawn(async move {
                let _permit = slots.acquire_owned().await.ok();
                (idx, runner.execute(command, ctx).await)
            });
        }

        let mut outcomes: Vec<Option<MetricOutcome>> = vec![None; metrics.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, outcome)) => outcomes[idx] = Some(outcome),
                Err(e) => error!(error = %e, "Metric task failed"),
            }
        }
        let outcomes: Vec<MetricOutcome> = outcomes
            .into_iter()
            .zip(&metrics)
            .map(|(outcome, metric)| {
                outcome.unwrap_or_else(|| MetricOutcome {
                    metric: metric.clone(),
                    state: Stage::Failed,
                    failed_stage: None,
                    error_kind: None,
                    reason: Some("metric task panicked".to_string()),
                    artifacts: Vec::new(),
                    model_version: None,
                    reused: Vec::new(),
                    transitions: Vec::new(),
                })
            })
            .collect();

        for outcome in &outcomes {
            let kind = match (outcome.succeeded(), outcome.error_kind) {
                (true, _) => None,
                (false, Some(kind)) => Some(kind.as_str()),
                (false, None) => Some("internal"),
            };
            logger.log_run_completed(
                &outcome.metric,
                outcome.state.as_str(),
                outcome.failed_stage.map(|s| s.as_str()),
                kind,
            );
        }

        let record = RunRecord::new(
            &request.run_id,
            command,
            request.window,
            started_at,
            Utc::now().timestamp(),
            outcomes,
        );
        self.metrics
            .set_run_status(command.as_str(), record.status.as_str());
        logger.log_pipeline_finished(
            command.as_str(),
            record.status.as_str(),
            record.succeeded(),
            record.failed(),
            record.exit_code(),
        );

        self.artifacts.save_run_record(&record).await?;
        match self.metrics.encode() {
            Ok(text) => {
                self.artifacts.write_metrics(&text).await?;
            }
            Err(e) => warn!(error = %e, "Failed to encode metrics textfile"),
        }
        Ok(record)
    }
}
