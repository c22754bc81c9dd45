//! Moving-average representation, impulse responses and Granger causality.

use crate::core::MarketVariable;
use crate::error::{ForecastError, Result};
use crate::models::diff::cumulate;
use crate::utils::linalg::cholesky_lower;
use crate::utils::ols::fit_equation;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, FisherSnedecor};

/// MA(∞) coefficient matrices `Ψ_0 = I, Ψ_h = Σ_l A_l Ψ_{h-l}`.
pub(crate) fn psi_matrices(lag_matrices: &[DMatrix<f64>], k: usize, horizon: usize) -> Vec<DMatrix<f64>> {
    let mut psi: Vec<DMatrix<f64>> = Vec::with_capacity(horizon);
    if horizon == 0 {
        return psi;
    }
    psi.push(DMatrix::identity(k, k));
    for h in 1..horizon {
        let mut next = DMatrix::zeros(k, k);
        for (l, a) in lag_matrices.iter().enumerate() {
            if l + 1 > h {
                break;
            }
            next += a * &psi[h - l - 1];
        }
        psi.push(next);
    }
    psi
}

/// Per-step forecast standard errors on the level scale of each variable.
///
/// Row `i` of the Ψ sequence is cumulated `differencing[i]` times, which
/// maps shocks on the differenced scale onto the level.
pub(crate) fn level_standard_errors(
    lag_matrices: &[DMatrix<f64>],
    sigma: &DMatrix<f64>,
    differencing: &[usize],
    horizon: usize,
) -> Vec<Vec<f64>> {
    let k = sigma.nrows();
    let psi = psi_matrices(lag_matrices, k, horizon);
    (0..k)
        .map(|i| {
            // theta[c][j]: cumulated response of variable i to shock c at step j.
            let theta: Vec<Vec<f64>> = (0..k)
                .map(|c| {
                    let raw: Vec<f64> = psi.iter().map(|p| p[(i, c)]).collect();
                    cumulate(&raw, differencing[i])
                })
                .collect();
            let mut variance = 0.0;
            (0..horizon)
                .map(|j| {
                    for a in 0..k {
                        for b in 0..k {
                            variance += theta[a][j] * sigma[(a, b)] * theta[b][j];
                        }
                    }
                    variance.max(0.0).sqrt()
                })
                .collect()
        })
        .collect()
}

/// Responses of every variable to a one-standard-deviation shock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpulseResponse {
    pub shock: MarketVariable,
    /// False when Σ was not positive definite and generalized responses
    /// were used instead of Cholesky-orthogonalized ones.
    pub orthogonalized: bool,
    /// `(variable, response at horizons 0..n)` on the level scale.
    pub responses: Vec<(MarketVariable, Vec<f64>)>,
}

impl ImpulseResponse {
    pub fn response(&self, variable: MarketVariable) -> Option<&[f64]> {
        self.responses
            .iter()
            .find(|(v, _)| *v == variable)
            .map(|(_, r)| r.as_slice())
    }
}

pub(crate) fn impulse_response(
    lag_matrices: &[DMatrix<f64>],
    sigma: &DMatrix<f64>,
    variables: &[MarketVariable],
    differencing: &[usize],
    shock: MarketVariable,
    horizons: usize,
) -> Result<ImpulseResponse> {
    let k = sigma.nrows();
    let s = variables
        .iter()
        .position(|v| *v == shock)
        .ok_or_else(|| ForecastError::InvalidParameter(format!("unknown shock variable {shock}")))?;

    let (impact, orthogonalized) = match cholesky_lower(sigma) {
        Some(p) => (p.column(s).into_owned(), true),
        None => {
            let sd = sigma[(s, s)].max(0.0).sqrt();
            if sd == 0.0 {
                return Err(ForecastError::ComputationError(format!(
                    "shock variable {shock} has zero residual variance"
                )));
            }
            (sigma.column(s).into_owned() / sd, false)
        }
    };

    let psi = psi_matrices(lag_matrices, k, horizons);
    let responses = variables
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let raw: Vec<f64> = psi.iter().map(|p| (p.row(i) * &impact)[(0, 0)]).collect();
            (*v, cumulate(&raw, differencing[i]))
        })
        .collect();

    Ok(ImpulseResponse {
        shock,
        orthogonalized,
        responses,
    })
}

/// F-test of "all lags of `cause` are zero" in the `effect` equation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrangerResult {
    pub cause: MarketVariable,
    pub effect: MarketVariable,
    pub statistic: f64,
    pub p_value: f64,
    pub df_num: usize,
    pub df_den: usize,
}

impl GrangerResult {
    /// Whether `cause` Granger-causes `effect` at `alpha`.
    pub fn is_significant(&self, alpha: f64) -> bool {
        self.p_value < alpha
    }
}

pub(crate) fn granger_test(
    y: &[f64],
    full: &crate::utils::ols::Design,
    restricted_out: &[String],
    ridge: Option<f64>,
    cause: MarketVariable,
    effect: MarketVariable,
) -> Result<GrangerResult> {
    let q = restricted_out.len();
    let unrestricted = fit_equation(y, &full.to_matrix(), ridge)?;
    let df_den = unrestricted.df_resid;

    if q == 0 {
        return Ok(GrangerResult {
            cause,
            effect,
            statistic: 0.0,
            p_value: 1.0,
            df_num: 0,
            df_den,
        });
    }

    let mut reduced = full.clone();
    for name in restricted_out {
        reduced.remove(name);
    }
    let restricted = fit_equation(y, &reduced.matrix(y.len()), ridge)?;

    let gain = (restricted.rss - unrestricted.rss).max(0.0);
    let (statistic, p_value) = if unrestricted.rss <= 0.0 {
        if gain > 0.0 {
            (f64::INFINITY, 0.0)
        } else {
            (0.0, 1.0)
        }
    } else {
        let f = (gain / q as f64) / (unrestricted.rss / df_den as f64);
        let p = FisherSnedecor::new(q as f64, df_den as f64)
            .map(|d| d.sf(f))
            .unwrap_or(f64::NAN);
        (f, p)
    };

    Ok(GrangerResult {
        cause,
        effect,
        statistic,
        p_value,
        df_num: q,
        df_den,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn psi_of_var1_is_power() {
        let a = DMatrix::from_row_slice(2, 2, &[0.5, 0.1, 0.0, 0.3]);
        let psi = psi_matrices(&[a.clone()], 2, 4);
        assert_eq!(psi.len(), 4);
        assert_eq!(psi[0], DMatrix::identity(2, 2));
        let cube = &a * &a * &a;
        assert_relative_eq!(psi[3][(0, 1)], cube[(0, 1)], epsilon = 1e-12);
    }

    #[test]
    fn standard_errors_grow_and_integrate() {
        let a = DMatrix::from_element(1, 1, 0.0);
        let sigma = DMatrix::from_element(1, 1, 4.0);
        // White noise: constant se on the stationary scale, √h after one integration.
        let se = level_standard_errors(&[a.clone()], &sigma, &[0], 3);
        assert_relative_eq!(se[0][2], 2.0, epsilon = 1e-12);
        let se = level_standard_errors(&[a], &sigma, &[1], 4);
        assert_relative_eq!(se[0][3], 4.0, epsilon = 1e-12);
        assert!(se[0].windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn orthogonalized_impulse_response() {
        let vars = [MarketVariable::Appreciation, MarketVariable::Volume];
        let a = DMatrix::from_row_slice(2, 2, &[0.5, 0.0, 0.2, 0.5]);
        let sigma = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 1.0]);
        let irf =
            impulse_response(&[a], &sigma, &vars, &[0, 0], MarketVariable::Appreciation, 3).unwrap();
        assert!(irf.orthogonalized);
        let own = irf.response(MarketVariable::Appreciation).unwrap();
        assert_relative_eq!(own[0], 1.0);
        assert_relative_eq!(own[2], 0.25, epsilon = 1e-12);
        let cross = irf.response(MarketVariable::Volume).unwrap();
        assert_relative_eq!(cross[0], 0.0);
        assert_relative_eq!(cross[1], 0.2, epsilon = 1e-12);
    }

    #[test]
    fn generalized_response_for_singular_sigma() {
        let vars = [MarketVariable::Appreciation, MarketVariable::Volume];
        let a = DMatrix::from_element(2, 2, 0.1);
        let sigma = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let irf = impulse_response(&[a], &sigma, &vars, &[0, 0], MarketVariable::Volume, 2).unwrap();
        assert!(!irf.orthogonalized);
        assert_relative_eq!(irf.response(MarketVariable::Volume).unwrap()[0], 1.0);
    }
}
