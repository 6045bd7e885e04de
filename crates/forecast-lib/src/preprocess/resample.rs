use crate::models::{floor_to_interval, MetricPoint};

/// Raw observations bucketed onto a fixed grid
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    /// Timestamp of slot 0
    pub origin: i64,
    /// One entry per grid slot, `None` where no observation fell
    pub slots: Vec<Option<f64>>,
}

impl Grid {
    pub fn missing(&self) -> usize {
        self.slots.iter().filter(|s| s.is_none()).count()
    }

    /// Append empty slots so the grid reaches `last_slot`; never shrinks
    pub fn extend_through(&mut self, last_slot: i64, interval_secs: i64) {
        let len = ((last_slot - self.origin) / interval_secs + 1).max(0) as usize;
        if len > self.slots.len() {
            self.slots.resize(len, None);
        }
    }
}

/// Bucket points into `interval_secs` slots, averaging points that share a slot.
///
/// Non-finite values are treated as absent. Returns `None` when nothing
/// finite remains.
pub fn resample(points: &[MetricPoint], interval_secs: i64) -> Option<Grid> {
    let mut valid: Vec<MetricPoint> = points
        .iter()
        .filter(|p| p.value.is_finite())
        .copied()
        .collect();
    valid.sort_by_key(|p| p.timestamp);

    let origin = floor_to_interval(valid.first()?.timestamp, interval_secs);
    let last = floor_to_interval(valid.last()?.timestamp, interval_secs);
    let len = ((last - origin) / interval_secs) as usize + 1;

    let mut sums = vec![0.0; len];
    let mut counts = vec![0u32; len];
    for point in &valid {
        let slot = ((floor_to_interval(point.timestamp, interval_secs) - origin) / interval_secs)
            as usize;
        sums[slot] += point.value;
        counts[slot] += 1;
    }

    let slots = sums
        .into_iter()
        .zip(counts)
        .map(|(sum, count)| (count > 0).then(|| sum / f64::from(count)))
        .collect();
    Some(Grid { origin, slots })
}
