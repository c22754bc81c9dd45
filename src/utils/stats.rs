//! Statistical utility functions.

use statrs::distribution::{ContinuousCDF, Normal};

/// Quantile function of the standard normal distribution.
///
/// # Example
/// ```
/// use housing_forecast::utils::quantile_normal;
///
/// let z = quantile_normal(0.975);
/// assert!((z - 1.96).abs() < 0.01);
/// ```
pub fn quantile_normal(p: f64) -> f64 {
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }
    Normal::new(0.0, 1.0)
        .map(|n| n.inverse_cdf(p))
        .unwrap_or(f64::NAN)
}

/// Two-sided critical value for a confidence level, e.g. 1.96 for 0.95.
pub fn z_for_level(level: f64) -> f64 {
    quantile_normal(1.0 - (1.0 - level) / 2.0)
}

/// Calculate the mean of a slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Calculate the variance of a slice (sample variance with n-1 denominator).
pub fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    let sum_sq: f64 = values.iter().map(|x| (x - m).powi(2)).sum();
    sum_sq / (values.len() - 1) as f64
}

/// Calculate the standard deviation of a slice.
pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// Sum of squared deviations from the mean.
pub fn centered_sum_squares(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|x| (x - m).powi(2)).sum()
}

/// True when a series carries no variation beyond rounding noise.
pub fn is_constant(values: &[f64]) -> bool {
    if values.len() < 2 {
        return true;
    }
    let m = mean(values);
    let scale = 1.0 + m * m;
    centered_sum_squares(values) / values.len() as f64 <= 1e-12 * scale
}

/// Calculate the median of a slice.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

/// Percentile (0-100) with linear interpolation between order statistics.
pub fn percentile(values: &[f64], pct: f64) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    percentile_sorted(&sorted, pct)
}

/// Percentile of an already sorted, finite slice.
pub fn percentile_sorted(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Calculate the autocorrelation at a given lag.
pub fn autocorrelation(values: &[f64], lag: usize) -> f64 {
    if values.len() <= lag {
        return f64::NAN;
    }
    let m = mean(values);
    let n = values.len();

    let mut numerator = 0.0;
    let mut denominator = 0.0;

    for i in 0..n {
        denominator += (values[i] - m).powi(2);
        if i >= lag {
            numerator += (values[i] - m) * (values[i - lag] - m);
        }
    }

    if denominator == 0.0 {
        return 0.0;
    }
    numerator / denominator
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn quantile_normal_known_values() {
        assert_relative_eq!(quantile_normal(0.5), 0.0, epsilon = 1e-9);
        assert_relative_eq!(quantile_normal(0.975), 1.959964, epsilon = 1e-4);
        assert_relative_eq!(quantile_normal(0.025), -1.959964, epsilon = 1e-4);
        assert_relative_eq!(z_for_level(0.99), 2.575829, epsilon = 1e-4);
        assert_eq!(quantile_normal(0.0), f64::NEG_INFINITY);
        assert_eq!(quantile_normal(1.0), f64::INFINITY);
    }

    #[test]
    fn moments() {
        assert_relative_eq!(mean(&[1.0, 2.0, 3.0, 4.0, 5.0]), 3.0, epsilon = 1e-10);
        assert!(mean(&[]).is_nan());
        assert_relative_eq!(variance(&[1.0, 2.0, 3.0, 4.0, 5.0]), 2.5, epsilon = 1e-10);
        assert!(variance(&[1.0]).is_nan());
        assert_relative_eq!(std_dev(&[1.0, 2.0, 3.0, 4.0, 5.0]), 2.5_f64.sqrt(), epsilon = 1e-10);
        assert_relative_eq!(centered_sum_squares(&[1.0, 3.0]), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn constant_detection_is_scale_aware() {
        assert!(is_constant(&[5000.0; 10]));
        assert!(is_constant(&[1.0]));
        assert!(!is_constant(&[1.0, 1.01, 0.99]));
    }

    #[test]
    fn median_and_percentiles() {
        assert_relative_eq!(median(&[5.0, 1.0, 3.0, 2.0, 4.0]), 3.0, epsilon = 1e-10);
        assert_relative_eq!(median(&[1.0, 2.0, 3.0, 4.0]), 2.5, epsilon = 1e-10);
        assert!(median(&[]).is_nan());

        let values: Vec<f64> = (0..=100).map(|i| i as f64).collect();
        assert_relative_eq!(percentile(&values, 2.5), 2.5, epsilon = 1e-10);
        assert_relative_eq!(percentile(&values, 97.5), 97.5, epsilon = 1e-10);
        assert_relative_eq!(percentile(&[3.0, f64::NAN, 1.0], 50.0), 2.0, epsilon = 1e-10);
    }

    #[test]
    fn autocorrelation_of_trend_is_high() {
        let values: Vec<f64> = (0..20).map(|i| i as f64).collect();
        assert_relative_eq!(autocorrelation(&values, 0), 1.0, epsilon = 1e-10);
        assert!(autocorrelation(&values, 1) > 0.8);
        assert_eq!(autocorrelation(&[2.0; 5], 1), 0.0);
    }
}
