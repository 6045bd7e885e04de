//! Fixed-horizon forecasting from a persisted model

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::models::{ForecastPoint, ForecastResult, TrainedModel};
use crate::trainer::sarima;
use chrono::Utc;
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::debug;

/// Produces point forecasts and symmetric prediction intervals
#[derive(Debug, Clone)]
pub struct Forecaster {
    confidence_level: f64,
}

impl Forecaster {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            confidence_level: config.confidence_level,
        }
    }

    pub fn confidence_level(&self) -> f64 {
        self.confidence_level
    }

    /// Forecast `horizon` steps after the model's training window
    pub fn forecast(&self, model: &TrainedModel, horizon: usize) -> Result<ForecastResult> {
        self.forecast_at(model, horizon, Utc::now().timestamp())
    }

    /// Same as [`Forecaster::forecast`] with an explicit generation time.
    ///
    /// The points depend only on the model and the horizon.
    pub fn forecast_at(
        &self,
        model: &TrainedModel,
        horizon: usize,
        generated_at: i64,
    ) -> Result<ForecastResult> {
        let metric = model.metric.as_str();
        if horizon == 0 {
            return Err(PipelineError::forecast(metric, "horizon must be positive"));
        }
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(PipelineError::forecast(
                metric,
                format!("confidence level {} is outside (0, 1)", self.confidence_level),
            ));
        }

        let z = Normal::new(0.0, 1.0)
            .map_err(|e| PipelineError::forecast(metric, e.to_string()))?
            .inverse_cdf(0.5 + self.confidence_level / 2.0);

        let projection = sarima::project(&model.order, &model.params, &model.state, horizon)
            .map_err(|reason| PipelineError::forecast(metric, reason))?;

        let mut points = Vec::with_capacity(horizon);
        for (step, (mean, variance)) in projection
            .mean
            .iter()
            .zip(&projection.variance)
            .enumerate()
        {
            if !(mean.is_finite() && variance.is_finite() && *variance >= 0.0) {
                return Err(PipelineError::forecast(
                    metric,
                    format!("non-finite projection at step {}", step + 1),
                ));
            }
            let half_width = z * variance.sqrt();
            points.push(ForecastPoint {
                timestamp: model.window.end + (step as i64 + 1) * model.interval_secs,
                point: *mean,
                lower: mean - half_width,
                upper: mean + half_width,
            });
        }

        debug!(
            metric = %metric,
            model_version = %model.version,
            horizon,
            z,
            "Forecast projected"
        );

        Ok(ForecastResult {
            metric: model.metric.clone(),
            model_version: model.version.clone(),
            generated_at,
            horizon,
            confidence_level: self.confidence_level,
            points,
        })
    }
}
