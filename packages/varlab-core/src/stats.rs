//! Statistical helpers shared by the risk engine and the backtest validator.

use std::cmp::Ordering;

use statrs::distribution::{ContinuousCDF, Normal};
use statrs::statistics::Statistics;

/// Arithmetic mean. Returns NaN for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    values.iter().mean()
}

/// Sample standard deviation (n - 1 denominator). Returns NaN for fewer than two values.
pub fn sample_std(values: &[f64]) -> f64 {
    values.iter().std_dev()
}

/// Percentile with linear interpolation between order statistics.
///
/// `q` is a probability in `[0, 1]`; the rank is `q * (n - 1)`. Returns NaN for an
/// empty slice.
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    if sorted.len() == 1 {
        return sorted[0];
    }

    let rank = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (rank - lo as f64) * (sorted[hi] - sorted[lo])
    }
}

/// Mean of the values at or below `threshold`; the threshold itself when none are.
pub fn tail_mean(values: &[f64], threshold: f64) -> f64 {
    let tail: Vec<f64> = values.iter().copied().filter(|v| *v <= threshold).collect();
    if tail.is_empty() {
        threshold
    } else {
        mean(&tail)
    }
}

/// Standard normal quantile; infinite at the ends of `[0, 1]`, NaN outside it.
pub fn norm_ppf(p: f64) -> f64 {
    if !(0.0..=1.0).contains(&p) {
        return f64::NAN;
    }
    if p == 0.0 {
        return f64::NEG_INFINITY;
    }
    if p == 1.0 {
        return f64::INFINITY;
    }
    Normal::new(0.0, 1.0).map_or(f64::NAN, |normal| normal.inverse_cdf(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_norm_ppf() {
        assert!((norm_ppf(0.5)).abs() < 0.001);
        assert!((norm_ppf(0.95) - 1.645).abs() < 0.01);
        assert!((norm_ppf(0.975) - 1.96).abs() < 0.01);
        assert!((norm_ppf(0.99) - 2.326).abs() < 0.01);

        // Symmetry
        assert!((norm_ppf(0.05) + 1.645).abs() < 0.01);
        assert!((norm_ppf(0.01) + 2.326).abs() < 0.01);

        assert_eq!(norm_ppf(0.0), f64::NEG_INFINITY);
        assert_eq!(norm_ppf(1.0), f64::INFINITY);
        assert!(norm_ppf(1.5).is_nan());
    }

    #[test]
    fn test_moments() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_abs_diff_eq!(mean(&values), 2.5);
        // sqrt(5/3)
        assert_abs_diff_eq!(sample_std(&values), 1.2909944487358056, epsilon = 1e-12);

        assert!(mean(&[]).is_nan());
        assert!(sample_std(&[1.0]).is_nan());
    }

    #[test]
    fn test_percentile_interpolates() {
        let returns = [
            0.06, -0.03, 0.01, -0.01, 0.04, 0.0, 0.03, -0.02, 0.05, 0.02,
        ];
        // rank 0.45 between -0.03 and -0.02
        assert_abs_diff_eq!(percentile(&returns, 0.05), -0.0255, epsilon = 1e-12);
        assert_abs_diff_eq!(percentile(&returns, 0.01), -0.0291, epsilon = 1e-12);
        assert_abs_diff_eq!(percentile(&returns, 0.0), -0.03);
        assert_abs_diff_eq!(percentile(&returns, 1.0), 0.06);
        assert_abs_diff_eq!(percentile(&[7.0], 0.3), 7.0);
    }

    #[test]
    fn test_tail_mean() {
        let returns = [-0.05, -0.03, -0.01, 0.02];
        assert_abs_diff_eq!(tail_mean(&returns, -0.03), -0.04, epsilon = 1e-12);
        // Empty tail falls back to the threshold
        assert_abs_diff_eq!(tail_mean(&returns, -0.10), -0.10);
    }
}
