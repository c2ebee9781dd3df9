//! Ordered-partition window helpers. Callers are responsible for ordering
//! each partition by an explicit sort key (detectors order by month).

/// Previous value `n` positions back within the partition, or `None` near
/// the partition start.
pub fn lag<T: Clone>(values: &[T], n: usize) -> Vec<Option<T>> {
    values
        .iter()
        .enumerate()
        .map(|(idx, _)| {
            if idx >= n {
                Some(values[idx - n].clone())
            } else {
                None
            }
        })
        .collect()
}

/// Trailing average over up to `window` values ending at each position
/// (the window shrinks at the partition start).
pub fn rolling_average(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    values
        .iter()
        .enumerate()
        .map(|(idx, _)| {
            let start = idx.saturating_sub(window - 1);
            let slice = &values[start..=idx];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect()
}

/// Month-over-month growth as a percentage. `None` when the prior value is
/// zero, so callers drop the row instead of dividing by zero.
pub fn growth_pct(prev: f64, current: f64) -> Option<f64> {
    if prev == 0.0 {
        return None;
    }
    Some((current - prev) / prev * 100.0)
}
