//! Unit-root testing and differencing to stationarity.
//!
//! The augmented Dickey-Fuller regression
//!
//! ```text
//! Δy_t = α + β y_{t-1} + Σ_{i=1..k} γ_i Δy_{t-i} + ε_t
//! ```
//!
//! is estimated by OLS with `k` chosen by AIC on a common sample. The null
//! hypothesis is a unit root (β = 0); rejecting it implies stationarity.

use crate::error::{ForecastError, Result};
use crate::models::diff::difference;
use crate::utils::ols::{fit_equation, Design, RegressionFit};
use crate::utils::stats::is_constant;
use statrs::distribution::{ContinuousCDF, Normal};

/// Shortest series the test is run on.
pub const MIN_ADF_LENGTH: usize = 10;

/// |β| below this in an exact fit is treated as zero.
const DETERMINISTIC_BETA_TOLERANCE: f64 = 1e-8;

/// Result of a stationarity test.
#[derive(Debug, Clone, PartialEq)]
pub struct StationarityResult {
    /// Test statistic
    pub statistic: f64,
    /// Approximate p-value
    pub p_value: f64,
    /// Number of lagged differences used
    pub lags: usize,
    /// Whether the series is stationary at the 5% level
    pub is_stationary: bool,
    /// True for a series without variation, which is stationary by definition.
    pub is_constant: bool,
    /// Critical values at common significance levels
    pub critical_values: CriticalValues,
}

impl StationarityResult {
    /// Whether the unit-root null is rejected at `alpha`.
    pub fn rejects_unit_root(&self, alpha: f64) -> bool {
        self.is_constant || self.p_value < alpha
    }

    fn undefined(lags: usize) -> Self {
        Self {
            statistic: f64::NAN,
            p_value: f64::NAN,
            lags,
            is_stationary: false,
            is_constant: false,
            critical_values: CriticalValues::default(),
        }
    }
}

/// Critical values for stationarity tests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CriticalValues {
    /// Critical value at 1% significance
    pub cv_1pct: f64,
    /// Critical value at 5% significance
    pub cv_5pct: f64,
    /// Critical value at 10% significance
    pub cv_10pct: f64,
}

impl CriticalValues {
    /// MacKinnon (2010) finite-sample critical values, constant, no trend.
    fn with_constant(n: usize) -> Self {
        let t = n as f64;
        Self {
            cv_1pct: -3.43035 - 6.5393 / t - 16.786 / (t * t),
            cv_5pct: -2.86154 - 2.8903 / t - 4.234 / (t * t),
            cv_10pct: -2.56677 - 1.5384 / t - 2.809 / (t * t),
        }
    }
}

/// Augmented Dickey-Fuller test for a unit root.
///
/// # Arguments
/// * `series` - Time series data
/// * `max_lags` - Maximum lagged differences (default: (n-1)^(1/3))
pub fn adf_test(series: &[f64], max_lags: Option<usize>) -> StationarityResult {
    let n = series.len();

    if n > 1 && is_constant(series) {
        return StationarityResult {
            statistic: f64::NEG_INFINITY,
            p_value: 0.0,
            lags: 0,
            is_stationary: true,
            is_constant: true,
            critical_values: CriticalValues::with_constant(n),
        };
    }
    if n < MIN_ADF_LENGTH {
        return StationarityResult::undefined(0);
    }

    let default_lags = ((n - 1) as f64).powf(1.0 / 3.0).floor() as usize;
    let max_lags = max_lags.unwrap_or(default_lags).min((n - 4) / 3);

    let diff = difference(series, 1);
    if is_constant(&diff) {
        // An exact linear trend: differencing once leaves a constant.
        return StationarityResult {
            statistic: f64::INFINITY,
            p_value: 1.0,
            lags: 0,
            is_stationary: false,
            is_constant: false,
            critical_values: CriticalValues::with_constant(n),
        };
    }
    // diff[j] = series[j + 1] - series[j]; the regression for diff[j] needs
    // series[j] and diff[j - 1 ..= j - k].
    let start = max_lags;
    let rows = diff.len() - start;

    let best_lag = (0..=max_lags)
        .filter_map(|k| {
            let fit = adf_regression(series, &diff, start, k).ok()?;
            if fit.rss <= 0.0 {
                return Some((k, f64::NEG_INFINITY));
            }
            let aic = rows as f64 * (fit.rss / rows as f64).ln() + 2.0 * (k + 2) as f64;
            Some((k, aic))
        })
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(k, _)| k);

    let Some(lags) = best_lag else {
        return StationarityResult::undefined(0);
    };

    let fit = match adf_regression(series, &diff, start, lags) {
        Ok(fit) => fit,
        Err(_) => return StationarityResult::undefined(lags),
    };
    let critical_values = CriticalValues::with_constant(rows);
    let beta = fit.coefficients[1];

    // A deterministic recursion: decide from the sign of β alone. A linear
    // trend fits exactly with β at rounding level, which is a unit root.
    let tss: f64 = crate::utils::stats::centered_sum_squares(&diff[start..]);
    if fit.rss <= 1e-12 * tss.max(1e-300) || fit.std_errors[1] == 0.0 {
        let mean_reverting = beta < -DETERMINISTIC_BETA_TOLERANCE;
        return StationarityResult {
            statistic: if mean_reverting {
                f64::NEG_INFINITY
            } else {
                f64::INFINITY
            },
            p_value: if mean_reverting { 0.0 } else { 1.0 },
            lags,
            is_stationary: mean_reverting,
            is_constant: false,
            critical_values,
        };
    }

    let statistic = beta / fit.std_errors[1];
    let p_value = mackinnon_p_value(statistic);

    StationarityResult {
        statistic,
        p_value,
        lags,
        is_stationary: statistic < critical_values.cv_5pct,
        is_constant: false,
        critical_values,
    }
}

/// OLS fit of the ADF regression with `lags` lagged differences.
fn adf_regression(series: &[f64], diff: &[f64], start: usize, lags: usize) -> Result<RegressionFit> {
    let design = adf_design(series, diff, start, lags)?;
    fit_equation(&diff[start..], &design.to_matrix(), None)
}

fn adf_design(series: &[f64], diff: &[f64], start: usize, lags: usize) -> Result<Design> {
    let rows = start..diff.len();
    let mut design = Design::new();
    design.push("level", rows.clone().map(|j| series[j]).collect())?;
    for i in 1..=lags {
        design.push(format!("diff.l{i}"), rows.clone().map(|j| diff[j - i]).collect())?;
    }
    Ok(design)
}

/// Approximate p-value of the ADF statistic (MacKinnon 1994, constant only).
fn mackinnon_p_value(statistic: f64) -> f64 {
    const TAU_MAX: f64 = 2.74;
    const TAU_MIN: f64 = -18.83;
    const TAU_STAR: f64 = -1.61;
    const SMALL_P: [f64; 3] = [2.1659, 1.4412, 0.038269];
    const LARGE_P: [f64; 4] = [1.7339, 0.93202, -0.12745, -0.010368];

    if statistic.is_nan() {
        return f64::NAN;
    }
    if statistic > TAU_MAX {
        return 1.0;
    }
    if statistic < TAU_MIN {
        return 0.0;
    }
    let coefs: &[f64] = if statistic <= TAU_STAR {
        &SMALL_P
    } else {
        &LARGE_P
    };
    let poly: f64 = coefs
        .iter()
        .enumerate()
        .map(|(i, c)| c * statistic.powi(i as i32))
        .sum();
    Normal::new(0.0, 1.0).map(|n| n.cdf(poly)).unwrap_or(f64::NAN)
}

/// A series brought to stationarity by repeated differencing.
#[derive(Debug, Clone, PartialEq)]
pub struct StationarityOutcome {
    /// Number of differencing passes applied.
    pub order: usize,
    /// The differenced series.
    pub transformed: Vec<f64>,
    /// Test on the final, accepted series.
    pub final_test: StationarityResult,
}

/// Difference `series` until the ADF test rejects a unit root at
/// `significance`, using at most `max_passes` passes.
pub fn ensure_stationary(
    variable: &str,
    series: &[f64],
    significance: f64,
    max_passes: usize,
) -> Result<StationarityOutcome> {
    if series.len() < MIN_ADF_LENGTH + max_passes {
        return Err(ForecastError::InsufficientData {
            needed: MIN_ADF_LENGTH + max_passes,
            got: series.len(),
        });
    }

    let mut current = series.to_vec();
    for order in 0..=max_passes {
        let test = adf_test(&current, None);
        if test.rejects_unit_root(significance) {
            return Ok(StationarityOutcome {
                order,
                transformed: current,
                final_test: test,
            });
        }
        if order < max_passes {
            current = difference(&current, 1);
        }
    }

    Err(ForecastError::NonStationarity {
        variable: variable.to_string(),
        passes: max_passes,
    })
}

/// Accept a fixed differencing order only when the `order`-times
/// differenced series rejects a unit root at `significance`.
pub fn check_differenced(
    variable: &str,
    series: &[f64],
    order: usize,
    significance: f64,
) -> Result<StationarityOutcome> {
    if series.len() < MIN_ADF_LENGTH + order {
        return Err(ForecastError::InsufficientData {
            needed: MIN_ADF_LENGTH + order,
            got: series.len(),
        });
    }
    let transformed = difference(series, order);
    let test = adf_test(&transformed, None);
    if !test.rejects_unit_root(significance) {
        return Err(ForecastError::NonStationarity {
            variable: variable.to_string(),
            passes: order,
        });
    }
    Ok(StationarityOutcome {
        order,
        transformed,
        final_test: test,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn white_noise(n: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect()
    }

    // Drifting walk, so the level regression cannot reject by chance.
    fn random_walk(n: usize, seed: u64) -> Vec<f64> {
        let mut level = 100.0;
        white_noise(n, seed)
            .into_iter()
            .map(|e| {
                level += 0.5 + e;
                level
            })
            .collect()
    }

    #[test]
    fn white_noise_rejects_unit_root() {
        let result = adf_test(&white_noise(200, 1), None);
        assert!(result.statistic < -3.5);
        assert!(result.p_value < 0.01);
        assert!(result.is_stationary);
    }

    #[test]
    fn random_walk_keeps_unit_root() {
        let result = adf_test(&random_walk(200, 2), None);
        assert!(!result.statistic.is_nan());
        assert!(result.p_value > 0.05);
        assert!(!result.is_stationary);
    }

    #[test]
    fn constant_series_is_stationary() {
        let result = adf_test(&[1.0; 40], None);
        assert!(result.is_constant);
        assert!(result.rejects_unit_root(0.01));
    }

    #[test]
    fn short_series_is_undefined() {
        assert!(adf_test(&[1.0, 2.0, 1.5], Some(1)).statistic.is_nan());
        assert!(adf_test(&[], None).statistic.is_nan());
    }

    #[test]
    fn critical_values_are_ordered() {
        let result = adf_test(&white_noise(100, 3), None);
        assert!(result.critical_values.cv_1pct < result.critical_values.cv_5pct);
        assert!(result.critical_values.cv_5pct < result.critical_values.cv_10pct);
    }

    #[test]
    fn p_value_is_monotone_in_statistic() {
        let mut last = 0.0;
        for t in [-6.0, -4.0, -2.86, -1.61, -1.0, 0.0, 1.0] {
            let p = mackinnon_p_value(t);
            assert!(p >= last);
            last = p;
        }
        assert!((mackinnon_p_value(-2.86) - 0.05).abs() < 0.01);
    }

    #[test]
    fn ensure_stationary_differences_random_walk_once() {
        let outcome = ensure_stationary("price_per_area", &random_walk(120, 4), 0.05, 2).unwrap();
        assert_eq!(outcome.order, 1);
        assert_eq!(outcome.transformed.len(), 119);
        assert!(outcome.final_test.rejects_unit_root(0.05));

        let outcome = ensure_stationary("volume", &white_noise(120, 5), 0.05, 2).unwrap();
        assert_eq!(outcome.order, 0);
    }

    #[test]
    fn linear_trend_is_differenced_once() {
        let series: Vec<f64> = (0..60).map(|i| (6000.0 * 1.01_f64.powi(i)).ln()).collect();
        let outcome = ensure_stationary("price_per_area", &series, 0.05, 2).unwrap();
        assert_eq!(outcome.order, 1);
        assert!(outcome.final_test.is_constant);
    }

    #[test]
    fn adf_design_columns_share_rows() {
        let series = white_noise(40, 6);
        let diff = difference(&series, 1);
        let design = adf_design(&series, &diff, 3, 3).unwrap();
        assert_eq!(design.rows(), diff.len() - 3);
        assert_eq!(design.width(), 4);
        assert!(adf_regression(&series, &diff, 3, 3).is_ok());
    }

    #[test]
    fn fixed_order_must_reach_stationarity() {
        let walk = random_walk(120, 7);
        let outcome = check_differenced("appreciation", &walk, 1, 0.05).unwrap();
        assert_eq!(outcome.order, 1);
        assert_eq!(outcome.transformed.len(), 119);

        let explosive: Vec<f64> = (0..60).map(|t| 1.08_f64.powi(t) / 100.0).collect();
        assert!(matches!(
            check_differenced("appreciation", &explosive, 1, 0.05),
            Err(ForecastError::NonStationarity { passes: 1, .. })
        ));
    }

    #[test]
    fn explosive_series_fails_after_max_passes() {
        let series: Vec<f64> = (0..60).map(|i| 1.2_f64.powi(i)).collect();
        let err = ensure_stationary("price_per_area", &series, 0.05, 2).unwrap_err();
        assert_eq!(
            err,
            ForecastError::NonStationarity {
                variable: "price_per_area".to_string(),
                passes: 2
            }
        );
    }
}
