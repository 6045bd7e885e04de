//! Model selection and training
//!
//! `ModelSelector` fits every order of the configured grid on a bounded pool
//! of blocking workers and ranks the converged candidates. `Trainer` wraps a
//! selection with experiment recording and model persistence.

pub mod candidates;
pub mod optimizer;
pub mod polynomial;
pub mod sarima;


pub use candidates::{compare_candidates, rank_candidates, select_best};
pub use sarima::{FitError, FitOptions, Projection, SarimaFit};

use crate::artifacts::{layout, ArtifactStore, ModelPointer};
use crate::config::{CandidateRanges, PipelineConfig, SearchConfig};
use crate::error::{PipelineError, Result};
use crate::models::{
    FitStatus, MetricSeries, ModelCandidate, RunContext, SarimaOrder, TrainedModel, TrainingWindow,
};
use crate::observability::{PipelineMetrics, StructuredLogger};
use crate::recorder::{RecordStatus, RetryingRecorder};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Steps projected by the plausibility screen
const PLAUSIBILITY_STEPS: usize = 5;

/// MLflow accepts at most 100 params per batch
const PARAM_BATCH: usize = 100;

/// A candidate after evaluation, with its fit when it converged
#[derive(Debug, Clone)]
struct Evaluated {
    candidate: ModelCandidate,
    fit: Option<SarimaFit>,
}

impl Evaluated {
    fn unfitted(order: SarimaOrder, status: FitStatus, message: impl Into<String>) -> Self {
        Self {
            candidate: ModelCandidate::unfitted(order, status, message),
            fit: None,
        }
    }
}

/// Outcome of a grid search
#[derive(Debug, Clone)]
pub struct Selection {
    /// Every grid order, in grid order
    pub candidates: Vec<ModelCandidate>,
    pub best: Option<TrainedModel>,
    pub timed_out: bool,
}

impl Selection {
    pub fn count(&self, status: FitStatus) -> usize {
        self.candidates.iter().filter(|c| c.status == status).count()
    }
}

fn evaluate(
    order: SarimaOrder,
    y: &[f64],
    options: &FitOptions,
    plausible: Option<(f64, f64)>,
) -> Evaluated {
    let fit = match sarima::fit(&order, y, options) {
        Ok(fit) => fit,
        Err(FitError::Cancelled) => {
            return Evaluated::unfitted(order, FitStatus::Skipped, "search timed out");
        }
        Err(e) => return Evaluated::unfitted(order, FitStatus::NonConvergent, e.to_string()),
    };

    let mut candidate = ModelCandidate {
        order,
        status: FitStatus::Converged,
        aic: Some(fit.aic),
        bic: Some(fit.bic),
        log_likelihood: Some(fit.log_likelihood),
        iterations: fit.iterations,
        message: None,
    };

    if let Some((low, high)) = plausible {
        let verdict = sarima::project(&order, &fit.params, &fit.state, PLAUSIBILITY_STEPS)
            .and_then(|projection| {
                if projection.mean.iter().all(|v| *v >= low && *v <= high) {
                    Ok(())
                } else {
                    Err(format!(
                        "{}-step projection leaves [{:.3}, {:.3}]",
                        PLAUSIBILITY_STEPS, low, high
                    ))
                }
            });
        if let Err(reason) = verdict {
            candidate.status = FitStatus::Rejected;
            candidate.message = Some(reason);
            return Evaluated {
                candidate,
                fit: None,
            };
        }
    }

    Evaluated {
        candidate,
        fit: Some(fit),
    }
}

/// `[min - 2 range, max + 2 range]` of the training data
fn plausible_range(y: &[f64]) -> (f64, f64) {
    let min = y.iter().copied().fold(f64::INFINITY, f64::min);
    let max = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    (min - 2.0 * range, max + 2.0 * range)
}

/// Bounded SARIMA grid search scored by information criteria
#[derive(Debug, Clone)]
pub struct ModelSelector {
    ranges: CandidateRanges,
    period: usize,
    search: SearchConfig,
    min_history_points: usize,
}

impl ModelSelector {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            ranges: config.candidate_ranges.clone(),
            period: config.seasonal_period,
            search: config.search.clone(),
            min_history_points: config.min_history_points(),
        }
    }

    /// Fit every candidate order and pick the best converged one.
    ///
    /// Fails with `InsufficientHistory` before any fit when the series is too
    /// short. Candidate failures never fail the search; an empty `best`
    /// means nothing converged.
    pub async fn search(&self, ctx: &RunContext, series: &MetricSeries) -> Result<Selection> {
        let metric = ctx.metric.as_str();
        self.check_history(metric, series)?;

        let y = Arc::new(series.values());
        let orders = self.ranges.enumerate(self.period);
        let plausible = self.search.plausibility_screen.then(|| plausible_range(&y));
        let cancel = Arc::new(AtomicBool::new(false));
        let workers = Arc::new(Semaphore::new(self.search.workers.max(1)));
        let options = FitOptions {
            max_iterations: self.search.max_iterations,
            tolerance: self.search.tolerance,
            cancel: Some(cancel.clone()),
        };

        let mut set = JoinSet::new();
        for (idx, order) in orders.iter().copied().enumerate() {
            let workers = workers.clone();
            let cancel = cancel.clone();
            let y = y.clone();
            let options = options.clone();
            set.spawn(async move {
                let Ok(_permit) = workers.acquire_owned().await else {
                    return (idx, Evaluated::unfitted(order, FitStatus::Skipped, "worker pool closed"));
                };
                if cancel.load(Ordering::Relaxed) {
                    return (idx, Evaluated::unfitted(order, FitStatus::Skipped, "search timed out"));
                }
                let evaluated =
                    tokio::task::spawn_blocking(move || evaluate(order, &y, &options, plausible))
                        .await
                        .unwrap_or_else(|e| {
                            Evaluated::unfitted(
                                order,
                                FitStatus::NonConvergent,
                                format!("fit task failed: {}", e),
                            )
                        });
                (idx, evaluated)
            });
        }

        let mut results: Vec<Option<Evaluated>> = vec![None; orders.len()];
        let deadline = tokio::time::Instant::now() + self.search.timeout();
        let mut timed_out = false;
        loop {
            tokio::select! {
                biased;
                _ = tokio::time::sleep_until(deadline) => {
                    timed_out = true;
                    cancel.store(true, Ordering::Relaxed);
                    set.abort_all();
                    break;
                }
                joined = set.join_next() => match joined {
                    Some(Ok((idx, evaluated))) => results[idx] = Some(evaluated),
                    Some(Err(e)) => warn!(metric = %metric, error = %e, "Candidate task failed"),
                    None => break,
                },
            }
        }
        if timed_out {
            // keep whatever finished before the deadline
            while let Some(joined) = set.join_next().await {
                if let Ok((idx, evaluated)) = joined {
                    if evaluated.candidate.status != FitStatus::Skipped {
                        results[idx] = Some(evaluated);
                    }
                }
            }
            warn!(
                metric = %metric,
                timeout_secs = self.search.timeout_secs,
                finished = results.iter().filter(|r| r.is_some()).count(),
                total = orders.len(),
                "Model search timed out, remaining candidates skipped"
            );
        }

        let evaluated: Vec<Evaluated> = results
            .into_iter()
            .zip(&orders)
            .map(|(result, order)| {
                result.unwrap_or_else(|| {
                    Evaluated::unfitted(*order, FitStatus::Skipped, "search timed out")
                })
            })
            .collect();
        let candidates: Vec<ModelCandidate> =
            evaluated.iter().map(|e| e.candidate.clone()).collect();

        let best = select_best(&candidates).and_then(|winner| {
            evaluated
                .iter()
                .find(|e| e.candidate.order == winner.order)
                .and_then(|e| e.fit.clone())
        });
        let best = best.map(|fit| self.trained_model(ctx, series, fit, &candidates));

        debug!(
            metric = %metric,
            candidates = candidates.len(),
            best = ?best.as_ref().map(|m| m.order.to_string()),
            "Model search finished"
        );
        Ok(Selection {
            candidates,
            best,
            timed_out,
        })
    }

    /// Reject series that are too short or off the canonical grid
    pub fn check_history(&self, metric: &str, series: &MetricSeries) -> Result<()> {
        if series.len() < self.min_history_points {
            return Err(PipelineError::insufficient_history(
                metric,
                format!(
                    "{} samples available, {} required",
                    series.len(),
                    self.min_history_points
                ),
            ));
        }
        if !series.is_canonical() {
            return Err(PipelineError::model_fit(
                metric,
                "training series is not on a gap-free fixed grid",
            ));
        }
        Ok(())
    }

    /// Search and return the winning model, or `ModelFitFailure`
    pub async fn select_and_fit(&self, ctx: &RunContext, series: &MetricSeries) -> Result<TrainedModel> {
        let selection = self.search(ctx, series).await?;
        match selection.best {
            Some(model) => Ok(model),
            None => Err(no_converged_candidates(&ctx.metric, &selection)),
        }
    }

    fn trained_model(
        &self,
        ctx: &RunContext,
        series: &MetricSeries,
        fit: SarimaFit,
        candidates: &[ModelCandidate],
    ) -> TrainedModel {
        TrainedModel {
            metric: ctx.metric.clone(),
            version: ctx.model_version(),
            run_id: ctx.run_id.clone(),
            order: fit.order,
            params: fit.params,
            state: fit.state,
            aic: fit.aic,
            bic: fit.bic,
            log_likelihood: fit.log_likelihood,
            window: TrainingWindow {
                start: series.first_timestamp().unwrap_or_default(),
                end: series.last_timestamp().unwrap_or_default(),
                observations: series.len(),
            },
            interval_secs: series.interval_secs,
            trained_at: Utc::now().timestamp(),
            candidates_evaluated: candidates
                .iter()
                .filter(|c| c.status != FitStatus::Skipped)
                .count(),
            candidates_converged: candidates
                .iter()
                .filter(|c| c.status == FitStatus::Converged)
                .count(),
        }
    }
}

fn no_converged_candidates(metric: &str, selection: &Selection) -> PipelineError {
    PipelineError::model_fit(
        metric,
        format!(
            "none of {} candidates converged ({} non-convergent, {} rejected, {} skipped{})",
            selection.candidates.len(),
            selection.count(FitStatus::NonConvergent),
            selection.count(FitStatus::Rejected),
            selection.count(FitStatus::Skipped),
            if selection.timed_out { ", search timed out" } else { "" }
        ),
    )
}

/// Persisted result of a training session
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub model: TrainedModel,
    pub pointer: ModelPointer,
    pub artifacts: Vec<String>,
}

/// Model selection plus recording and persistence
pub struct Trainer {
    selector: ModelSelector,
    artifacts: ArtifactStore,
    recorder: RetryingRecorder,
    horizon_steps: usize,
    logger: StructuredLogger,
    metrics: PipelineMetrics,
}

impl Trainer {
    pub fn new(
        config: &PipelineConfig,
        artifacts: ArtifactStore,
        recorder: RetryingRecorder,
        logger: StructuredLogger,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            selector: ModelSelector::new(config),
            artifacts,
            recorder,
            horizon_steps: config.horizon_steps,
            logger,
            metrics,
        }
    }

    /// Select, persist and record the best model for `series`.
    ///
    /// When no candidate converges nothing is persisted and the recorder run
    /// is closed as failed.
    pub async fn train(&self, ctx: &RunContext, series: &MetricSeries) -> Result<TrainingOutcome> {
        let metric = ctx.metric.as_str();
        self.selector.check_history(metric, series)?;
        let record_id = self.recorder.start_run(metric).await?;

        match self.train_recorded(ctx, series, &record_id).await {
            Ok(outcome) => {
                self.recorder
                    .end_run(&record_id, RecordStatus::Finished)
                    .await?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(end_err) = self.recorder.end_run(&record_id, RecordStatus::Failed).await {
                    warn!(metric = %metric, error = %end_err, "Failed to close recorder run");
                }
                Err(e)
            }
        }
    }

    async fn train_recorded(
        &self,
        ctx: &RunContext,
        series: &MetricSeries,
        record_id: &str,
    ) -> Result<TrainingOutcome> {
        let metric = ctx.metric.as_str();
        let selection = self.selector.search(ctx, series).await?;

        let mut params = Vec::with_capacity(selection.candidates.len());
        for (idx, candidate) in selection.candidates.iter().enumerate() {
            self.logger.log_candidate_evaluated(metric, candidate);
            self.metrics.inc_candidate(metric, candidate.status.as_str());
            params.push((
                format!("candidate_{:03}", idx),
                format!("{} {}", candidate.order, candidate.status.as_str()),
            ));
            if let (Some(aic), Some(bic)) = (candidate.aic, candidate.bic) {
                let scores = BTreeMap::from([("aic".to_string(), aic), ("bic".to_string(), bic)]);
                self.recorder
                    .log_metrics(record_id, &scores, idx as u64)
                    .await?;
            }
        }
        for chunk in params.chunks(PARAM_BATCH) {
            let batch: BTreeMap<String, String> = chunk.iter().cloned().collect();
            self.recorder.log_params(record_id, &batch).await?;
        }

        let Some(model) = selection.best.clone() else {
            return Err(no_converged_candidates(metric, &selection));
        };

        let order = model.order;
        let winner = BTreeMap::from([
            ("selected_order".to_string(), order.to_string()),
            ("p".to_string(), order.p.to_string()),
            ("d".to_string(), order.d.to_string()),
            ("q".to_string(), order.q.to_string()),
            ("seasonal_p".to_string(), order.seasonal_p.to_string()),
            ("seasonal_d".to_string(), order.seasonal_d.to_string()),
            ("seasonal_q".to_string(), order.seasonal_q.to_string()),
            ("seasonal_period".to_string(), order.period.to_string()),
            ("forecast_steps".to_string(), self.horizon_steps.to_string()),
            ("model_version".to_string(), model.version.clone()),
        ]);
        self.recorder.log_params(record_id, &winner).await?;
        let scores = BTreeMap::from([
            ("aic".to_string(), model.aic),
            ("bic".to_string(), model.bic),
            ("log_likelihood".to_string(), model.log_likelihood),
            ("sigma2".to_string(), model.params.sigma2),
        ]);
        self.recorder
            .log_metrics(record_id, &scores, selection.candidates.len() as u64)
            .await?;

        let summary = sarima::summary(&model);
        let pointer = self.artifacts.save_model(&model, &summary).await?;
        let summary_key = layout::model_summary(metric, &model.version);
        self.recorder
            .log_artifact(record_id, &pointer.file, "model")
            .await?;
        self.recorder
            .log_artifact(record_id, &summary_key, "summary")
            .await?;

        self.logger.log_model_selected(
            metric,
            &model.version,
            &model.order,
            model.aic,
            model.bic,
            model.candidates_evaluated,
            model.candidates_converged,
        );

        Ok(TrainingOutcome {
            artifacts: vec![
                pointer.file.clone(),
                summary_key,
                layout::model_pointer(metric),
            ],
            model,
            pointer,
        })
    }
}
