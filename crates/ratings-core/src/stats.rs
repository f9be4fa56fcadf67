// ── Percentile helper ─────────────────────────────────────────────────────────

/// Compute the `p`-th percentile of a **sorted** slice using standard linear
/// interpolation (the same algorithm used by NumPy's `percentile` function).
///
/// Returns `0.0` for an empty slice.
pub fn percentile(sorted_data: &[f64], p: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }
    let len = sorted_data.len();
    if len == 1 {
        return sorted_data[0];
    }
    let rank = (p / 100.0) * (len as f64 - 1.0);
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted_data[lo];
    }
    let frac = rank - lo as f64;
    sorted_data[lo] + frac * (sorted_data[hi] - sorted_data[lo])
}

/// Median of a **sorted** slice (`0.0` when empty).
pub fn median(sorted_data: &[f64]) -> f64 {
    percentile(sorted_data, 50.0)
}

/// Sort a copy of `values` ascending. NaNs are dropped.
pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut v: Vec<f64> = values.iter().copied().filter(|x| !x.is_nan()).collect();
    v.sort_by(f64::total_cmp);
    v
}

// ── Quartiles ─────────────────────────────────────────────────────────────────

/// Tukey hinges of a **sorted** slice: the medians of the lower and upper
/// halves, excluding the overall median when the length is odd.
///
/// Unlike interpolated percentiles, a single extreme value cannot pull the
/// upper hinge towards itself in a small sample.
pub fn hinges(sorted_data: &[f64]) -> (f64, f64) {
    let len = sorted_data.len();
    match len {
        0 => (0.0, 0.0),
        1 => (sorted_data[0], sorted_data[0]),
        _ => {
            let half = len / 2;
            let lower = &sorted_data[..half];
            let upper = &sorted_data[len - half..];
            (median(lower), median(upper))
        }
    }
}

/// Interquartile range based on [`hinges`].
pub fn iqr(sorted_data: &[f64]) -> f64 {
    let (q1, q3) = hinges(sorted_data);
    q3 - q1
}

/// Median absolute deviation from the median.
pub fn mad(sorted_data: &[f64]) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }
    let m = median(sorted_data);
    let deviations: Vec<f64> = sorted_data.iter().map(|x| (x - m).abs()).collect();
    median(&sorted(&deviations))
}

/// Population standard deviation.
pub fn std_dev(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let n = data.len() as f64;
    let mean = data.iter().sum::<f64>() / n;
    let var = data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    var.sqrt()
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_empty_returns_zero() {
        assert_eq!(percentile(&[], 90.0), 0.0);
    }

    #[test]
    fn test_percentile_single_element() {
        assert_eq!(percentile(&[42.0], 90.0), 42.0);
        assert_eq!(percentile(&[42.0], 0.0), 42.0);
    }

    #[test]
    fn test_percentile_p50_even() {
        let data = vec![1.0, 2.0, 3.0, 4.0];
        // rank = 0.5 * 3 = 1.5 → interpolate between data[1]=2 and data[2]=3
        assert!((percentile(&data, 50.0) - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_percentile_p90_ten_elements() {
        let data: Vec<f64> = (1..=10).map(|x| x as f64).collect();
        assert!((percentile(&data, 90.0) - 9.1).abs() < 1e-9);
    }

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median(&[1.0, 5.0, 9.0]), 5.0);
        assert_eq!(median(&[900.0, 950.0, 1000.0, 1050.0, 1100.0, 9999.0]), 1025.0);
    }

    #[test]
    fn test_sorted_drops_nan() {
        let v = sorted(&[3.0, f64::NAN, 1.0, 2.0]);
        assert_eq!(v, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_hinges_even_length() {
        let data = [900.0, 950.0, 1000.0, 1050.0, 1100.0, 9999.0];
        assert_eq!(hinges(&data), (950.0, 1100.0));
        assert_eq!(iqr(&data), 150.0);
    }

    #[test]
    fn test_hinges_odd_length_excludes_median() {
        let data = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
        // lower = [1,2,3] → 2; upper = [5,6,7] → 6
        assert_eq!(hinges(&data), (2.0, 6.0));
    }

    #[test]
    fn test_hinges_degenerate() {
        assert_eq!(hinges(&[]), (0.0, 0.0));
        assert_eq!(hinges(&[7.0]), (7.0, 7.0));
    }

    #[test]
    fn test_mad() {
        // median 3; deviations [2,1,0,1,2] → median 1
        assert_eq!(mad(&[1.0, 2.0, 3.0, 4.0, 5.0]), 1.0);
        assert_eq!(mad(&[]), 0.0);
    }

    #[test]
    fn test_std_dev() {
        let sd = std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((sd - 2.0).abs() < 1e-9);
    }
}
