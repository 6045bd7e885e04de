/// Consistency constant relating MAD to the standard deviation of a normal
const MAD_SCALE: f64 = 0.6745;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClipSummary {
    pub median: f64,
    pub mad: f64,
    pub clipped: usize,
}

/// Clip values whose robust z-score exceeds `threshold` to the nearest bound.
///
/// With a zero MAD no scale can be estimated and the values are left as is.
pub fn clip_outliers(values: &mut [f64], threshold: f64) -> ClipSummary {
    if values.is_empty() {
        return ClipSummary::default();
    }
    let med = median(values.to_vec());
    let mad = median(values.iter().map(|v| (v - med).abs()).collect());
    let mut summary = ClipSummary {
        median: med,
        mad,
        clipped: 0,
    };
    if mad <= 0.0 {
        return summary;
    }

    let half_width = threshold * mad / MAD_SCALE;
    let (lower, upper) = (med - half_width, med + half_width);
    for v in values.iter_mut() {
        if MAD_SCALE * (*v - med).abs() / mad > threshold {
            *v = v.clamp(lower, upper);
            summary.clipped += 1;
        }
    }
    summary
}

fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
