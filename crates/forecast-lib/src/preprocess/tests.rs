//! Canonical-series properties of the preprocessor

use super::Preprocessor;
use crate::config::{GapFillPolicy, PipelineConfig};
use crate::models::{floor_to_interval, MetricPoint, MetricSeries, TimeWindow, SAMPLE_INTERVAL_SECS};
use crate::ErrorKind;

const DAY: i64 = 24 * 60 * 60;

/// Small deterministic generator so the property cases are reproducible
struct Lcg(u64);

impl Lcg {
    fn next_f64(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }
}

fn cpu_samples(start: i64, count: i64) -> Vec<MetricPoint> {
    (0..count)
        .map(|i| {
            let phase = (i % 12) as f64 / 12.0 * std::f64::consts::TAU;
            MetricPoint::new(start + i * SAMPLE_INTERVAL_SECS, 40.0 + 10.0 * phase.sin())
        })
        .collect()
}

/// Window whose last grid slot holds the latest raw point
fn window_through(points: &[MetricPoint]) -> TimeWindow {
    let first = points.iter().map(|p| p.timestamp).min().unwrap_or(0);
    let last = points.iter().map(|p| p.timestamp).max().unwrap_or(0);
    TimeWindow::new(
        floor_to_interval(first, SAMPLE_INTERVAL_SECS),
        floor_to_interval(last, SAMPLE_INTERVAL_SECS) + SAMPLE_INTERVAL_SECS,
    )
}

#[test]
fn test_fourteen_days_with_three_hour_gap() {
    let config = PipelineConfig::default();
    let start = 1_704_067_200;
    let mut points = cpu_samples(start, 14 * DAY / SAMPLE_INTERVAL_SECS);
    // 36 samples = 3 hours, removed from the middle of day 7
    points.drain(2000..2036);
    let raw = MetricSeries::new("cpu_usage_percent", SAMPLE_INTERVAL_SECS, points);

    let window = TimeWindow::new(start, start + 14 * DAY);
    let canonical = Preprocessor::new(&config).normalize(&raw, window).unwrap();

    assert_eq!(canonical.len(), 4032);
    assert!(canonical.is_canonical());
    assert_eq!(canonical.first_timestamp(), Some(start));
    assert_eq!(
        canonical.last_timestamp(),
        Some(start + 4031 * SAMPLE_INTERVAL_SECS)
    );
}

#[test]
fn test_normalize_is_deterministic() {
    let config = PipelineConfig::default();
    let mut rng = Lcg(7);
    let mut points = Vec::new();
    for i in 0..600 {
        if rng.next_f64() < 0.1 {
            continue;
        }
        let jitter = (rng.next_f64() * 120.0) as i64;
        points.push(MetricPoint::new(
            i * SAMPLE_INTERVAL_SECS + jitter,
            50.0 + rng.next_f64() * 20.0,
        ));
    }
    let raw = MetricSeries::new("memory_usage_percent", SAMPLE_INTERVAL_SECS, points);

    let preprocessor = Preprocessor::new(&config);
    let window = window_through(&raw.points);
    let first = preprocessor.normalize(&raw, window).unwrap();
    let second = preprocessor.normalize(&raw, window).unwrap();

    let bits = |s: &MetricSeries| -> Vec<(i64, u64)> {
        s.points.iter().map(|p| (p.timestamp, p.value.to_bits())).collect()
    };
    assert_eq!(bits(&first), bits(&second));
}

#[test]
fn test_generated_series_are_canonical() {
    for seed in 1..=25u64 {
        let mut rng = Lcg(seed);
        let mut config = PipelineConfig::default();
        if seed % 2 == 0 {
            config.gap_fill = GapFillPolicy::ForwardFill;
        }

        let mut points = Vec::new();
        let mut t = 1_700_000_000 + (rng.next_f64() * 300.0) as i64;
        for _ in 0..1000 {
            let value = if rng.next_f64() < 0.02 {
                f64::NAN
            } else if rng.next_f64() < 0.01 {
                1_000.0
            } else {
                30.0 + rng.next_f64() * 5.0
            };
            points.push(MetricPoint::new(t, value));
            // irregular sampling with occasional duplicates and short gaps
            t += match (rng.next_f64() * 10.0) as u32 {
                0 => 0,
                1 => 4 * SAMPLE_INTERVAL_SECS,
                _ => 200 + (rng.next_f64() * 200.0) as i64,
            };
        }
        points.reverse();

        let raw = MetricSeries::new("cpu_usage_percent", SAMPLE_INTERVAL_SECS, points);
        let window = window_through(&raw.points);
        let canonical = Preprocessor::new(&config).normalize(&raw, window).unwrap();

        assert!(canonical.is_canonical(), "seed {} not canonical", seed);
        assert!(canonical
            .points
            .iter()
            .all(|p| p.timestamp % SAMPLE_INTERVAL_SECS == 0));
        assert!(canonical.points.iter().all(|p| p.value < 1_000.0));
    }
}

#[test]
fn test_gap_beyond_threshold_is_insufficient_history() {
    let config = PipelineConfig::default();
    let mut points = cpu_samples(0, 1000);
    points.drain(100..(100 + config.max_gap_length + 1));
    let raw = MetricSeries::new("cpu_usage_percent", SAMPLE_INTERVAL_SECS, points);

    let window = window_through(&raw.points);
    let err = Preprocessor::new(&config).normalize(&raw, window).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientHistory);
}

#[test]
fn test_outliers_clipped_not_dropped() {
    let config = PipelineConfig::default();
    let mut points = cpu_samples(0, 288);
    points[100].value = 10_000.0;
    let raw = MetricSeries::new("cpu_usage_percent", SAMPLE_INTERVAL_SECS, points);

    let window = TimeWindow::new(0, DAY);
    let canonical = Preprocessor::new(&config).normalize(&raw, window).unwrap();
    assert_eq!(canonical.len(), 288);
    assert!(canonical.points[100].value < 100.0);
    assert!(canonical.points[100].value > 40.0);
}

#[test]
fn test_all_nan_is_data_unavailable() {
    let config = PipelineConfig::default();
    let points = (0..10).map(|i| MetricPoint::new(i * 300, f64::NAN)).collect();
    let raw = MetricSeries::new("cpu_usage_percent", SAMPLE_INTERVAL_SECS, points);

    let err = Preprocessor::new(&config)
        .normalize(&raw, TimeWindow::new(0, 3000))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DataUnavailable);
}

#[test]
fn test_data_ending_early_beyond_max_gap_is_insufficient_history() {
    let config = PipelineConfig::default();
    // one day window, last six hours (72 samples) absent
    let points = cpu_samples(0, 288 - 72);
    let raw = MetricSeries::new("cpu_usage_percent", SAMPLE_INTERVAL_SECS, points);

    let err = Preprocessor::new(&config)
        .normalize(&raw, TimeWindow::new(0, DAY))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientHistory);
    assert!(err.to_string().contains("last 72 samples"), "{}", err);
}

#[test]
fn test_short_trailing_gap_reaches_window_end() {
    let config = PipelineConfig::default();
    let points = cpu_samples(0, 288 - 12);
    let raw = MetricSeries::new("cpu_usage_percent", SAMPLE_INTERVAL_SECS, points);

    let canonical = Preprocessor::new(&config)
        .normalize(&raw, TimeWindow::new(0, DAY))
        .unwrap();

    assert_eq!(canonical.len(), 288);
    assert!(canonical.is_canonical());
    assert_eq!(canonical.last_timestamp(), Some(DAY - SAMPLE_INTERVAL_SECS));
    let held = canonical.points[275].value;
    assert!(canonical.points[276..].iter().all(|p| p.value == held));
}

#[test]
fn test_data_starting_late_is_not_padded() {
    let config = PipelineConfig::default();
    // history begins 12 hours into a one-day window
    let points = cpu_samples(DAY / 2, 144);
    let raw = MetricSeries::new("cpu_usage_percent", SAMPLE_INTERVAL_SECS, points);

    let canonical = Preprocessor::new(&config)
        .normalize(&raw, TimeWindow::new(0, DAY))
        .unwrap();

    assert_eq!(canonical.len(), 144);
    assert_eq!(canonical.first_timestamp(), Some(DAY / 2));
    assert_eq!(canonical.last_timestamp(), Some(DAY - SAMPLE_INTERVAL_SECS));
}
