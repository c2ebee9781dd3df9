//! Order-statistic percentiles with linear interpolation.

/// Per-group order statistics used for peer comparison.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeerStats {
    pub count: usize,
    pub median: f64,
    pub upper: f64,
}

/// Computes the percentile at `fraction` (0.0..=1.0) over values that are
/// already sorted ascending, interpolating linearly between order statistics.
pub fn percentile(sorted_values: &[f64], fraction: f64) -> Option<f64> {
    if sorted_values.is_empty() || !(0.0..=1.0).contains(&fraction) {
        return None;
    }
    let n = sorted_values.len();
    if n == 1 {
        return Some(sorted_values[0]);
    }
    let rank = fraction * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return Some(sorted_values[lo]);
    }
    let weight = rank - lo as f64;
    Some(sorted_values[lo] + (sorted_values[hi] - sorted_values[lo]) * weight)
}

/// Computes median and the `upper_fraction` percentile for one peer group.
/// Groups below `min_group_size` members are excluded from all
/// percentile-based comparison and return `None`.
pub fn peer_stats(
    values: &mut Vec<f64>,
    upper_fraction: f64,
    min_group_size: usize,
) -> Option<PeerStats> {
    if values.len() < min_group_size {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median = percentile(values, 0.5)?;
    let upper = percentile(values, upper_fraction)?;
    Some(PeerStats {
        count: values.len(),
        median,
        upper,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_interpolates_between_order_statistics() {
        let values = vec![10.0, 20.0, 30.0, 40.0];
        assert_eq!(percentile(&values, 0.0), Some(10.0));
        assert_eq!(percentile(&values, 1.0), Some(40.0));
        assert_eq!(percentile(&values, 0.5), Some(25.0));
        // rank = 0.99 * 3 = 2.97 -> 30 + 0.97 * 10
        let p99 = percentile(&values, 0.99).unwrap();
        assert!((p99 - 39.7).abs() < 1e-9);
    }

    #[test]
    fn percentile_of_empty_or_invalid_fraction_is_none() {
        assert_eq!(percentile(&[], 0.5), None);
        assert_eq!(percentile(&[1.0], 1.5), None);
    }

    #[test]
    fn peer_stats_respects_minimum_group_size() {
        let mut small: Vec<f64> = (0..9).map(f64::from).collect();
        assert!(peer_stats(&mut small, 0.99, 10).is_none());

        let mut large: Vec<f64> = (1..=11).map(f64::from).collect();
        let stats = peer_stats(&mut large, 0.99, 10).unwrap();
        assert_eq!(stats.count, 11);
        assert_eq!(stats.median, 6.0);
        assert!(stats.upper > 10.0 && stats.upper <= 11.0);
    }
}
