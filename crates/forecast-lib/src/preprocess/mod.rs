//! Conversion of raw metric points into a canonical series
//!
//! Three deterministic steps: resample onto the fixed grid, fill bounded
//! gaps, clip outliers to a robust bound. The stage holds no state.

mod gaps;
mod outliers;
mod resample;

#[cfg(test)]
mod tests;

pub use gaps::fill_gaps;
pub use outliers::{clip_outliers, ClipSummary};
pub use resample::{resample, Grid};

use crate::config::{GapFillPolicy, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::models::{floor_to_interval, MetricPoint, MetricSeries, TimeWindow};
use tracing::debug;

/// Stateless canonicalisation stage
#[derive(Debug, Clone)]
pub struct Preprocessor {
    interval_secs: i64,
    max_gap_length: usize,
    gap_fill: GapFillPolicy,
    outlier_threshold: f64,
}

impl Preprocessor {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            interval_secs: config.sample_interval_secs,
            max_gap_length: config.max_gap_length,
            gap_fill: config.gap_fill,
            outlier_threshold: config.outlier_threshold,
        }
    }

    /// Produce exactly one finite value per grid timestamp from the first
    /// valid raw observation through the last grid slot of `window`.
    ///
    /// Data that stops early leaves a trailing gap, bounded by
    /// `max_gap_length` like any other.
    pub fn normalize(&self, raw: &MetricSeries, window: TimeWindow) -> Result<MetricSeries> {
        let metric = raw.metric.as_str();
        let mut grid = resample(&raw.points, self.interval_secs).ok_or_else(|| {
            PipelineError::data_unavailable(metric, "series has no finite observations")
        })?;
        grid.extend_through(
            floor_to_interval(window.end - 1, self.interval_secs),
            self.interval_secs,
        );

        let origin = grid.origin;
        let slots = grid.slots.len();
        let missing = grid.missing();
        let mut values = fill_gaps(&grid.slots, self.gap_fill, self.max_gap_length).map_err(
            |gap| {
                let at = origin + gap.start as i64 * self.interval_secs;
                let reason = if gap.start + gap.length == slots {
                    format!(
                        "no observations for the last {} samples since {} (maximum gap {})",
                        gap.length, at, self.max_gap_length
                    )
                } else {
                    format!(
                        "gap of {} samples at {} exceeds the maximum of {}",
                        gap.length, at, self.max_gap_length
                    )
                };
                PipelineError::insufficient_history(metric, reason)
            },
        )?;
        let clipped = clip_outliers(&mut values, self.outlier_threshold);

        debug!(
            metric = %metric,
            raw_points = raw.len(),
            grid_points = values.len(),
            filled = missing,
            clipped = clipped.clipped,
            "Normalized metric series"
        );

        let points = values
            .into_iter()
            .enumerate()
            .map(|(i, value)| MetricPoint::new(origin + i as i64 * self.interval_secs, value))
            .collect();
        Ok(MetricSeries::new(metric, self.interval_secs, points))
    }
}
