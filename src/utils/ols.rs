//! Ordinary least squares with optional ridge penalty.
//!
//! [`fit_equation`] is the single regression kernel used by both model
//! stages: the VAR calls it once per equation with a shared design, the
//! ARIMAX estimator calls it for every candidate order. A [`Design`] keeps
//! named regressor columns so that screening (constant columns, variance
//! inflation) can report what it removed.

use crate::error::{ForecastError, Result};
use crate::utils::linalg::{inverse_spd, scaled_min_pivot, solve_spd, SINGULAR_PIVOT};
use crate::utils::stats::{centered_sum_squares, is_constant};
use nalgebra::{DMatrix, DVector};
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Coefficients and residual statistics of one regression.
#[derive(Debug, Clone, PartialEq)]
pub struct RegressionFit {
    /// One coefficient per design column; index 0 is the intercept.
    pub coefficients: Vec<f64>,
    pub fitted: Vec<f64>,
    pub residuals: Vec<f64>,
    /// Residual sum of squares.
    pub rss: f64,
    /// Residual variance `rss / df_resid`.
    pub sigma2: f64,
    pub std_errors: Vec<f64>,
    pub df_resid: usize,
    /// Penalty used, if any.
    pub ridge_alpha: Option<f64>,
}

impl RegressionFit {
    pub fn t_stats(&self) -> Vec<f64> {
        self.coefficients
            .iter()
            .zip(&self.std_errors)
            .map(|(b, se)| b / se)
            .collect()
    }

    /// Two-sided p-values from the Student t distribution.
    pub fn p_values(&self) -> Vec<f64> {
        let dist = match StudentsT::new(0.0, 1.0, self.df_resid.max(1) as f64) {
            Ok(d) => d,
            Err(_) => return vec![f64::NAN; self.coefficients.len()],
        };
        self.t_stats()
            .into_iter()
            .map(|t| {
                if t.is_nan() {
                    1.0
                } else {
                    (2.0 * dist.sf(t.abs())).min(1.0)
                }
            })
            .collect()
    }

    /// Prediction for one design row (including the leading 1).
    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.coefficients.iter().zip(row).map(|(b, x)| b * x).sum()
    }
}

/// Fit `y = X β + e` by least squares.
///
/// Column 0 of `x` is treated as the intercept. With `ridge = Some(alpha)`
/// every other column `j` is penalized by `alpha × Σ(x_j − x̄_j)²`, which
/// keeps the penalty independent of the regressor's units.
///
/// Fails with [`ForecastError::SingularMatrix`] when the (penalized) Gram
/// matrix is numerically rank deficient.
pub fn fit_equation(y: &[f64], x: &DMatrix<f64>, ridge: Option<f64>) -> Result<RegressionFit> {
    let n = y.len();
    let k = x.ncols();
    if x.nrows() != n {
        return Err(ForecastError::DimensionMismatch {
            expected: n,
            got: x.nrows(),
        });
    }
    if k == 0 {
        return Err(ForecastError::InvalidParameter(
            "design matrix has no columns".to_string(),
        ));
    }
    if n <= k {
        return Err(ForecastError::InsufficientData {
            needed: k + 1,
            got: n,
        });
    }

    let mut gram = x.transpose() * x;
    if let Some(alpha) = ridge {
        for j in 1..k {
            let col: Vec<f64> = x.column(j).iter().copied().collect();
            gram[(j, j)] += alpha * centered_sum_squares(&col).max(1e-8);
        }
    }

    let pivot = scaled_min_pivot(&gram);
    if pivot < SINGULAR_PIVOT {
        return Err(ForecastError::SingularMatrix(format!(
            "X'X of {k} columns is rank deficient (min scaled pivot {pivot:.3e})"
        )));
    }

    let y_vec = DVector::from_column_slice(y);
    let xty = x.transpose() * &y_vec;
    let beta = solve_spd(&gram, &xty)
        .ok_or_else(|| ForecastError::SingularMatrix("Cholesky solve failed".to_string()))?;

    let fitted_vec = x * &beta;
    let fitted: Vec<f64> = fitted_vec.iter().copied().collect();
    let residuals: Vec<f64> = y.iter().zip(&fitted).map(|(a, f)| a - f).collect();
    let rss: f64 = residuals.iter().map(|r| r * r).sum();
    let df_resid = n - k;
    let sigma2 = rss / df_resid as f64;

    let inv = inverse_spd(&gram)
        .ok_or_else(|| ForecastError::SingularMatrix("X'X inverse failed".to_string()))?;
    let std_errors = (0..k).map(|j| (sigma2 * inv[(j, j)]).max(0.0).sqrt()).collect();

    if beta.iter().any(|b| !b.is_finite()) {
        return Err(ForecastError::ComputationError(
            "non-finite regression coefficients".to_string(),
        ));
    }

    Ok(RegressionFit {
        coefficients: beta.iter().copied().collect(),
        fitted,
        residuals,
        rss,
        sigma2,
        std_errors,
        df_resid,
        ridge_alpha: ridge,
    })
}

/// Named regressor columns; the intercept is implicit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Design {
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
}

impl Design {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column. All columns must share the same length.
    pub fn push(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<()> {
        if let Some(first) = self.columns.first() {
            if first.len() != values.len() {
                return Err(ForecastError::DimensionMismatch {
                    expected: first.len(),
                    got: values.len(),
                });
            }
        }
        self.names.push(name.into());
        self.columns.push(values);
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.columns.first().map(|c| c.len()).unwrap_or(0)
    }

    /// Number of regressors, excluding the intercept.
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.position(name).map(|i| self.columns[i].as_slice())
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<f64>> {
        let i = self.position(name)?;
        self.names.remove(i);
        Some(self.columns.remove(i))
    }

    /// Remove every column without variation; returns the removed names.
    pub fn drop_constant(&mut self) -> Vec<String> {
        let constant: Vec<String> = self
            .names
            .iter()
            .zip(&self.columns)
            .filter(|(_, c)| is_constant(c))
            .map(|(n, _)| n.clone())
            .collect();
        for name in &constant {
            self.remove(name);
        }
        constant
    }

    /// Design matrix with a leading intercept column.
    pub fn matrix(&self, rows: usize) -> DMatrix<f64> {
        DMatrix::from_fn(rows, self.columns.len() + 1, |i, j| {
            if j == 0 {
                1.0
            } else {
                self.columns[j - 1][i]
            }
        })
    }

    /// Matrix over all rows of the design.
    pub fn to_matrix(&self) -> DMatrix<f64> {
        self.matrix(self.rows())
    }
}

/// Variance inflation factor of each listed column against the others.
///
/// Perfect collinearity yields `f64::INFINITY`.
pub fn variance_inflation(design: &Design, names: &[String]) -> Vec<(String, f64)> {
    if names.len() < 2 {
        return names.iter().map(|n| (n.clone(), 1.0)).collect();
    }
    names
        .iter()
        .map(|target| {
            let vif = design
                .column(target)
                .map(|y| {
                    let mut others = Design::new();
                    for name in names.iter().filter(|n| *n != target) {
                        if let Some(col) = design.column(name) {
                            // Lengths match by construction.
                            let _ = others.push(name.clone(), col.to_vec());
                        }
                    }
                    let tss = centered_sum_squares(y);
                    if tss <= 0.0 {
                        return 1.0;
                    }
                    match fit_equation(y, &others.matrix(y.len()), None) {
                        Ok(fit) => {
                            let unexplained = fit.rss / tss;
                            if unexplained < 1e-10 {
                                f64::INFINITY
                            } else {
                                1.0 / unexplained
                            }
                        }
                        Err(_) => f64::INFINITY,
                    }
                })
                .unwrap_or(1.0);
            (target.clone(), vif)
        })
        .collect()
}

/// Outcome of variance-inflation screening.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollinearityScreen {
    /// Columns removed, with their VIF at removal.
    pub dropped: Vec<(String, f64)>,
    /// Perfectly collinear columns left in place for a ridge fit.
    pub retained_collinear: Vec<String>,
}

/// Iteratively drop the highest-VIF column among `candidates` while its VIF
/// exceeds `threshold`.
///
/// A perfectly collinear column fails with [`ForecastError::Collinearity`]
/// unless `allow_ridge` is set, in which case screening stops and the
/// columns are left for the penalized fit.
pub fn screen_collinear(
    design: &mut Design,
    candidates: &[String],
    threshold: f64,
    allow_ridge: bool,
) -> Result<CollinearityScreen> {
    let mut remaining: Vec<String> = candidates
        .iter()
        .filter(|n| design.position(n).is_some())
        .cloned()
        .collect();
    let mut screen = CollinearityScreen::default();

    while remaining.len() >= 2 {
        let vifs = variance_inflation(design, &remaining);
        let Some((worst, vif)) = vifs
            .into_iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        else {
            break;
        };
        if vif <= threshold {
            break;
        }
        if vif.is_infinite() {
            if allow_ridge {
                screen.retained_collinear = remaining;
                break;
            }
            return Err(ForecastError::Collinearity { variable: worst, vif });
        }
        design.remove(&worst);
        remaining.retain(|n| n != &worst);
        screen.dropped.push((worst, vif));
    }
    Ok(screen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn design(cols: &[(&str, Vec<f64>)]) -> Design {
        let mut d = Design::new();
        for (name, values) in cols {
            d.push(*name, values.clone()).unwrap();
        }
        d
    }

    #[test]
    fn fit_simple_linear() {
        // y = 2 + 3x
        let x = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let y: Vec<f64> = x.iter().map(|v| 2.0 + 3.0 * v).collect();
        let fit = fit_equation(&y, &design(&[("x", x)]).to_matrix(), None).unwrap();

        assert_relative_eq!(fit.coefficients[0], 2.0, epsilon = 1e-9);
        assert_relative_eq!(fit.coefficients[1], 3.0, epsilon = 1e-9);
        assert!(fit.rss < 1e-18);
        assert_eq!(fit.df_resid, 3);
        assert_relative_eq!(fit.predict_row(&[1.0, 10.0]), 32.0, epsilon = 1e-9);
    }

    #[test]
    fn fit_with_noise_has_significant_slope() {
        let n = 100;
        let x: Vec<f64> = (0..n).map(|i| i as f64 * 0.1).collect();
        let y: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(i, &xi)| 2.5 + 1.7 * xi + (i as f64 * 1.3).sin() * 0.1)
            .collect();
        let fit = fit_equation(&y, &design(&[("x", x)]).to_matrix(), None).unwrap();
        assert_relative_eq!(fit.coefficients[1], 1.7, epsilon = 0.05);
        let p = fit.p_values();
        assert!(p[1] < 1e-6);
        let residual_sum: f64 = fit.residuals.iter().sum();
        assert!(residual_sum.abs() < 1e-8);
    }

    #[test]
    fn singular_design_is_rejected_and_ridge_recovers() {
        let x1 = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let x2: Vec<f64> = x1.iter().map(|v| v * 2.0).collect();
        let y = vec![1.1, 2.3, 2.9, 4.2, 5.1, 5.8];
        let m = design(&[("x1", x1), ("x2", x2)]).to_matrix();

        assert!(matches!(
            fit_equation(&y, &m, None),
            Err(ForecastError::SingularMatrix(_))
        ));
        let fit = fit_equation(&y, &m, Some(0.1)).unwrap();
        assert_eq!(fit.ridge_alpha, Some(0.1));
        assert!(fit.coefficients.iter().all(|b| b.is_finite()));
    }

    #[test]
    fn too_few_rows() {
        let m = design(&[("x", vec![1.0, 2.0])]).to_matrix();
        assert!(matches!(
            fit_equation(&[1.0, 2.0], &m, None),
            Err(ForecastError::InsufficientData { .. })
        ));
    }

    #[test]
    fn design_drops_constant_columns() {
        let mut d = design(&[
            ("flat", vec![3.0; 5]),
            ("x", vec![1.0, 2.0, 3.0, 4.0, 5.0]),
        ]);
        assert_eq!(d.drop_constant(), vec!["flat".to_string()]);
        assert_eq!(d.names(), &["x".to_string()]);
        assert!(d.push("short", vec![1.0]).is_err());
    }

    #[test]
    fn vif_screening_drops_or_fails() {
        let a: Vec<f64> = (0..30).map(|i| (i as f64 * 0.7).sin()).collect();
        let b: Vec<f64> = (0..30).map(|i| (i as f64 * 1.9).cos()).collect();
        let near: Vec<f64> = a
            .iter()
            .zip(&b)
            .enumerate()
            .map(|(i, (x, y))| x + 0.5 * y + 0.01 * (i as f64 * 3.1).sin())
            .collect();
        let names = vec!["a".to_string(), "b".to_string(), "near".to_string()];

        let mut d = design(&[("a", a.clone()), ("b", b.clone()), ("near", near)]);
        let screen = screen_collinear(&mut d, &names, 10.0, false).unwrap();
        assert_eq!(screen.dropped.len(), 1);
        assert_eq!(d.width(), 2);

        let exact: Vec<f64> = a.iter().map(|v| 100.0 * v).collect();
        let mut d = design(&[("a", a), ("exact", exact)]);
        let names = vec!["a".to_string(), "exact".to_string()];
        assert!(matches!(
            screen_collinear(&mut d, &names, 10.0, false),
            Err(ForecastError::Collinearity { .. })
        ));
        let screen = screen_collinear(&mut d, &names, 10.0, true).unwrap();
        assert_eq!(screen.retained_collinear.len(), 2);
        assert_eq!(d.width(), 2);
    }
}
