//! Robust statistics for sky-level estimation.
//!
//! Sky pixels in a full-frame image are contaminated by stars, so plain means
//! are biased high. The functions here ignore non-finite samples and provide
//! the clipped, skew-corrected estimators the background and detection stages
//! rely on.

use thiserror::Error;

/// Errors raised by statistics that need at least one finite sample.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatsError {
    #[error("Insufficient data points: {total} total values, 0 finite")]
    NoFiniteValues { total: usize },
}

/// Tuning of the skew-corrected mode estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeParams {
    /// Samples further than `clip_sigma` standard deviations from the median are dropped.
    pub clip_sigma: f64,
    /// The mode formula is only trusted when `std(clipped) < max_std_ratio * median(clipped)`.
    pub max_std_ratio: f64,
}

impl Default for ModeParams {
    fn default() -> Self {
        Self {
            clip_sigma: 3.0,
            max_std_ratio: 0.3,
        }
    }
}

fn finite_values(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|v| v.is_finite()).collect()
}

fn sorted_median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

/// Calculate median of a slice of f64 values
///
/// Non-finite values (NaN, ±inf) are dropped before sorting. For even-length
/// data, returns the average of the two middle values.
///
/// # Returns
///
/// * `Ok(median)` - The median value
/// * `Err(StatsError)` - If no finite values remain after filtering
pub fn median(values: &[f64]) -> Result<f64, StatsError> {
    let mut valid = finite_values(values);
    if valid.is_empty() {
        return Err(StatsError::NoFiniteValues {
            total: values.len(),
        });
    }
    valid.sort_by(f64::total_cmp);
    Ok(sorted_median(&valid))
}

/// Arithmetic mean of the finite values, `None` when there are none.
pub fn mean(values: &[f64]) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for &v in values.iter().filter(|v| v.is_finite()) {
        sum += v;
        count += 1;
    }
    (count > 0).then(|| sum / count as f64)
}

/// Population standard deviation (ddof = 0) of the finite values.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let mu = mean(values)?;
    let (sum_sq, count) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(acc, n), &v| (acc + (v - mu).powi(2), n + 1));
    Some((sum_sq / count as f64).sqrt())
}

/// Median absolute deviation from the median (unscaled).
pub fn median_absolute_deviation(values: &[f64]) -> Result<f64, StatsError> {
    let center = median(values)?;
    let deviations: Vec<f64> = values
        .iter()
        .filter(|v| v.is_finite())
        .map(|v| (v - center).abs())
        .collect();
    median(&deviations)
}

/// Keep the samples strictly within `n_sigma` standard deviations of the median.
///
/// A sample with zero spread clips to an empty vector, which callers treat as
/// "no usable clipped sample".
pub fn sigma_clip(values: &[f64], n_sigma: f64) -> Vec<f64> {
    let valid = finite_values(values);
    let (Ok(center), Some(sigma)) = (median(&valid), std_dev(&valid)) else {
        return Vec::new();
    };
    valid
        .into_iter()
        .filter(|v| (v - center).abs() < n_sigma * sigma)
        .collect()
}

/// Skew-corrected mode of a sky sample.
///
/// The sample is sigma clipped; if the clipped spread is small relative to
/// its level, the mode is estimated as `2.5 * median - 1.5 * mean`, otherwise
/// the plain median of the unclipped sample is returned.
///
/// # Returns
/// `None` only when the sample holds no finite value.
pub fn robust_mode(values: &[f64], params: &ModeParams) -> Option<f64> {
    let plain_median = median(values).ok()?;
    let clipped = sigma_clip(values, params.clip_sigma);

    if let (Ok(clipped_median), Some(clipped_mean), Some(clipped_std)) =
        (median(&clipped), mean(&clipped), std_dev(&clipped))
    {
        if clipped_std < params.max_std_ratio * clipped_median {
            return Some(2.5 * clipped_median - 1.5 * clipped_mean);
        }
    }

    Some(plain_median)
}

/// Center of the most populated bin of an equal-width histogram.
///
/// The histogram spans `[min, max]` of the finite values, the last bin is
/// closed on the right, and ties resolve to the lowest bin. A sample whose
/// values are all equal returns that value.
pub fn histogram_mode(values: &[f64], bins: usize) -> Option<f64> {
    let bins = bins.max(1);
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for &v in values.iter().filter(|v| v.is_finite()) {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    if !lo.is_finite() {
        return None;
    }
    if hi <= lo {
        return Some(lo);
    }

    let width = (hi - lo) / bins as f64;
    let mut counts = vec![0usize; bins];
    for &v in values.iter().filter(|v| v.is_finite()) {
        let bin = (((v - lo) / width) as usize).min(bins - 1);
        counts[bin] += 1;
    }

    let mut best = 0;
    for (i, &count) in counts.iter().enumerate() {
        if count > counts[best] {
            best = i;
        }
    }
    Some(lo + (best as f64 + 0.5) * width)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn normal_sample(n: usize, mean: f64, sigma: f64, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(mean, sigma).unwrap();
        (0..n).map(|_| normal.sample(&mut rng)).collect()
    }

    #[test]
    fn test_median_odd_length() {
        assert_eq!(median(&[1.0, 3.0, 2.0, 5.0, 4.0]).unwrap(), 3.0);
    }

    #[test]
    fn test_median_even_length() {
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]).unwrap(), 2.5);
    }

    #[test]
    fn test_median_ignores_non_finite() {
        let values = vec![1.0, f64::NAN, 3.0, f64::INFINITY, 2.0];
        assert_eq!(median(&values).unwrap(), 2.0);
    }

    #[test]
    fn test_median_all_nan() {
        let result = median(&[f64::NAN, f64::NAN]);
        assert_eq!(result, Err(StatsError::NoFiniteValues { total: 2 }));
    }

    #[test]
    fn test_median_empty_slice() {
        assert!(median(&[]).is_err());
    }

    #[test]
    fn test_std_dev_population() {
        let values = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_relative_eq!(std_dev(&values).unwrap(), 2.0, epsilon = 1e-12);
        assert_relative_eq!(mean(&values).unwrap(), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_mad() {
        let values = vec![1.0, 1.0, 2.0, 2.0, 4.0, 6.0, 9.0];
        assert_eq!(median_absolute_deviation(&values).unwrap(), 1.0);
    }

    #[test]
    fn test_sigma_clip_drops_outlier() {
        let mut values = normal_sample(500, 100.0, 2.0, 7);
        values.push(10_000.0);
        let clipped = sigma_clip(&values, 3.0);
        assert!(clipped.iter().all(|&v| v < 1000.0));
        assert!(clipped.len() >= 490);
    }

    #[test]
    fn test_sigma_clip_constant_is_empty() {
        assert!(sigma_clip(&[5.0; 10], 3.0).is_empty());
    }

    #[test]
    fn test_robust_mode_resists_bright_sources() {
        let mut values = normal_sample(4096, 100.0, 3.0, 11);
        for v in values.iter_mut().take(200) {
            *v += 2000.0;
        }
        let mode = robust_mode(&values, &ModeParams::default()).unwrap();
        assert_relative_eq!(mode, 100.0, epsilon = 1.5);

        let naive_mean = mean(&values).unwrap();
        assert!(naive_mean > 150.0);
    }

    #[test]
    fn test_robust_mode_falls_back_to_median_for_wide_samples() {
        // Spread dwarfs the level, so the skew formula is not trusted
        let values = normal_sample(1000, 0.0, 5.0, 3);
        let mode = robust_mode(&values, &ModeParams::default()).unwrap();
        assert_eq!(mode, median(&values).unwrap());
    }

    #[test]
    fn test_robust_mode_constant_sample() {
        assert_eq!(robust_mode(&[42.0; 16], &ModeParams::default()), Some(42.0));
    }

    #[test]
    fn test_robust_mode_empty() {
        assert_eq!(robust_mode(&[], &ModeParams::default()), None);
        assert_eq!(robust_mode(&[f64::NAN], &ModeParams::default()), None);
    }

    #[test]
    fn test_histogram_mode_peak() {
        let mut values = vec![0.0; 10];
        values.extend(vec![5.0; 50]);
        values.push(10.0);
        let mode = histogram_mode(&values, 10).unwrap();
        assert_relative_eq!(mode, 5.5, epsilon = 1e-12);
    }

    #[test]
    fn test_histogram_mode_constant() {
        assert_eq!(histogram_mode(&[3.0; 5], 100), Some(3.0));
        assert_eq!(histogram_mode(&[], 100), None);
    }

    #[test]
    fn test_histogram_mode_max_lands_in_last_bin() {
        let values = vec![0.0, 1.0, 1.0, 1.0];
        let mode = histogram_mode(&values, 4).unwrap();
        assert_relative_eq!(mode, 0.875, epsilon = 1e-12);
    }
}
