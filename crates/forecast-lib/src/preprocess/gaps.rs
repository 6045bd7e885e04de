use crate::config::GapFillPolicy;

/// A run of empty slots longer than allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapTooLong {
    pub start: usize,
    pub length: usize,
}

/// Fill every run of empty slots no longer than `max_gap`.
///
/// A run at either end of the grid is filled from its single neighbour
/// under the same bound.
pub fn fill_gaps(
    slots: &[Option<f64>],
    policy: GapFillPolicy,
    max_gap: usize,
) -> Result<Vec<f64>, GapTooLong> {
    let mut values = Vec::with_capacity(slots.len());
    let mut i = 0;
    while i < slots.len() {
        if let Some(v) = slots[i] {
            values.push(v);
            i += 1;
            continue;
        }

        let start = i;
        while i < slots.len() && slots[i].is_none() {
            i += 1;
        }
        let length = i - start;
        if length > max_gap {
            return Err(GapTooLong { start, length });
        }

        let before = values.last().copied();
        let after = slots.get(i).copied().flatten();
        match (before, after, policy) {
            (Some(a), Some(b), GapFillPolicy::Linear) => {
                let step = (b - a) / (length + 1) as f64;
                values.extend((1..=length).map(|k| a + step * k as f64));
            }
            (Some(a), _, _) => values.extend(std::iter::repeat(a).take(length)),
            (None, Some(b), _) => values.extend(std::iter::repeat(b).take(length)),
            (None, None, _) => return Err(GapTooLong { start, length }),
        }
    }
    Ok(values)
}
