//! Residual diagnostic tests for fitted models.
//!
//! Every test here has "the residuals are well behaved" as its null
//! hypothesis, so a small p-value flags a problem.

use crate::utils::ols::{fit_equation, Design};
use crate::utils::stats::{mean, variance};
use statrs::distribution::{ChiSquared, ContinuousCDF};

/// Result of a chi-squared residual test.
#[derive(Debug, Clone, PartialEq)]
pub struct ResidualTestResult {
    /// Test statistic
    pub statistic: f64,
    /// P-value from the asymptotic chi-squared distribution
    pub p_value: f64,
    /// Degrees of freedom
    pub df: usize,
}

impl ResidualTestResult {
    /// True unless the null is rejected at `alpha`.
    pub fn passes(&self, alpha: f64) -> bool {
        !(self.p_value <= alpha)
    }

    fn undefined() -> Self {
        Self {
            statistic: f64::NAN,
            p_value: f64::NAN,
            df: 0,
        }
    }

    fn flat(df: usize) -> Self {
        Self {
            statistic: 0.0,
            p_value: 1.0,
            df,
        }
    }
}

/// Default number of lags: `min(10, n/5)`, at least one.
pub fn default_lags(n: usize) -> usize {
    10.min(n / 5).max(1)
}

/// Ljung-Box test for autocorrelation in residuals.
///
/// # Arguments
/// * `residuals` - Model residuals
/// * `lags` - Number of lags to include (default: min(10, n/5))
/// * `fitted_params` - Number of fitted parameters (for degrees of freedom adjustment)
pub fn ljung_box(residuals: &[f64], lags: Option<usize>, fitted_params: usize) -> ResidualTestResult {
    let n = residuals.len();
    if n < 3 {
        return ResidualTestResult::undefined();
    }

    let lags = lags.unwrap_or_else(|| default_lags(n)).min(n - 1);
    let df = lags.saturating_sub(fitted_params).max(1);

    let m = mean(residuals);
    let centered: Vec<f64> = residuals.iter().map(|&x| x - m).collect();
    let var: f64 = centered.iter().map(|&x| x * x).sum();
    if var == 0.0 {
        return ResidualTestResult::flat(df);
    }

    let mut q = 0.0;
    for k in 1..=lags {
        let acf_k: f64 = centered
            .iter()
            .skip(k)
            .zip(centered.iter())
            .map(|(&a, &b)| a * b)
            .sum::<f64>()
            / var;
        q += (acf_k * acf_k) / (n - k) as f64;
    }
    q *= n as f64 * (n + 2) as f64;

    ResidualTestResult {
        statistic: q,
        p_value: chi_squared_sf(q, df),
        df,
    }
}

/// Engle's ARCH-LM test for conditional heteroskedasticity.
///
/// Regresses squared residuals on `lags` of their own lags; `n·R²` is
/// asymptotically χ²(lags).
pub fn arch_lm(residuals: &[f64], lags: Option<usize>) -> ResidualTestResult {
    let lags = lags.unwrap_or(4).max(1);
    let n = residuals.len();
    if n < lags + 3 {
        return ResidualTestResult::undefined();
    }

    let m = mean(residuals);
    let squared: Vec<f64> = residuals.iter().map(|r| (r - m).powi(2)).collect();
    let target = &squared[lags..];
    let tss = crate::utils::stats::centered_sum_squares(target);
    if tss <= 0.0 {
        return ResidualTestResult::flat(lags);
    }

    let mut design = Design::new();
    for i in 1..=lags {
        let lagged = squared[lags - i..n - i].to_vec();
        // Every lag column has n - lags rows.
        let _ = design.push(format!("e2.l{i}"), lagged);
    }

    match fit_equation(target, &design.to_matrix(), None) {
        Ok(fit) => {
            let r2 = (1.0 - fit.rss / tss).clamp(0.0, 1.0);
            let lm = target.len() as f64 * r2;
            ResidualTestResult {
                statistic: lm,
                p_value: chi_squared_sf(lm, lags),
                df: lags,
            }
        }
        Err(_) => ResidualTestResult::flat(lags),
    }
}

/// Jarque-Bera normality test, χ²(2) under the null.
pub fn jarque_bera(residuals: &[f64]) -> ResidualTestResult {
    let n = residuals.len();
    if n < 4 {
        return ResidualTestResult::undefined();
    }
    let m = mean(residuals);
    // Population moments.
    let var = variance(residuals) * (n - 1) as f64 / n as f64;
    if var <= 0.0 {
        return ResidualTestResult::flat(2);
    }
    let sd = var.sqrt();
    let skew = residuals.iter().map(|x| ((x - m) / sd).powi(3)).sum::<f64>() / n as f64;
    let kurt = residuals.iter().map(|x| ((x - m) / sd).powi(4)).sum::<f64>() / n as f64;

    let jb = n as f64 / 6.0 * (skew * skew + (kurt - 3.0).powi(2) / 4.0);
    ResidualTestResult {
        statistic: jb,
        p_value: chi_squared_sf(jb, 2),
        df: 2,
    }
}

fn chi_squared_sf(x: f64, df: usize) -> f64 {
    if !x.is_finite() {
        return if x.is_nan() { f64::NAN } else { 0.0 };
    }
    if x <= 0.0 || df == 0 {
        return 1.0;
    }
    ChiSquared::new(df as f64)
        .map(|dist| dist.sf(x))
        .unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    fn gaussian(n: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n).map(|_| rng.sample::<f64, _>(StandardNormal)).collect()
    }

    #[test]
    fn ljung_box_lags_and_range() {
        let residuals = gaussian(100, 1);
        let result = ljung_box(&residuals, Some(10), 0);
        assert!(result.statistic >= 0.0);
        assert!((0.0..=1.0).contains(&result.p_value));
        assert_eq!(result.df, 10);
        assert_eq!(ljung_box(&residuals, Some(10), 3).df, 7);
    }

    #[test]
    fn ljung_box_detects_autocorrelation() {
        let mut residuals = vec![0.0; 100];
        residuals[0] = 1.0;
        let shocks = gaussian(100, 2);
        for i in 1..100 {
            residuals[i] = 0.9 * residuals[i - 1] + 0.1 * shocks[i];
        }
        let result = ljung_box(&residuals, Some(10), 0);
        assert!(result.p_value < 0.01);
        assert!(!result.passes(0.05));
    }

    #[test]
    fn ljung_box_edge_cases() {
        assert!(ljung_box(&[1.0, 2.0], None, 0).statistic.is_nan());
        let flat = ljung_box(&[0.5; 20], None, 0);
        assert_eq!(flat.p_value, 1.0);
        assert!(flat.passes(0.05));
    }

    #[test]
    fn arch_lm_flags_volatility_clusters() {
        let shocks = gaussian(300, 3);
        // Alternating calm and turbulent regimes of 25 observations.
        let clustered: Vec<f64> = shocks
            .iter()
            .enumerate()
            .map(|(i, e)| if (i / 25) % 2 == 0 { 0.1 * e } else { 3.0 * e })
            .collect();
        assert!(arch_lm(&clustered, Some(4)).p_value < 0.01);
        assert!(arch_lm(&[0.0; 30], Some(4)).passes(0.05));
        assert!(arch_lm(&[0.1, 0.2], Some(4)).p_value.is_nan());
    }

    #[test]
    fn jarque_bera_separates_normal_from_skewed() {
        let normal = gaussian(500, 4);
        let skewed: Vec<f64> = normal.iter().map(|x| x.exp()).collect();
        assert!(jarque_bera(&skewed).p_value < 1e-6);
        assert!(jarque_bera(&normal).statistic < jarque_bera(&skewed).statistic);
        assert_eq!(jarque_bera(&[2.0; 10]).p_value, 1.0);
    }

    #[test]
    fn nan_p_value_does_not_fail() {
        let result = ljung_box(&[1.0], None, 0);
        assert!(result.passes(0.05));
    }
}
