//! Shared VAR design construction and lag-order selection.
//!
//! Every candidate lag is estimated on the same rows (those available to
//! the largest candidate), so information criteria are comparable.

use crate::config::LagCriterion;
use crate::error::{ForecastError, Result};
use crate::utils::linalg::log_det_spd;
use crate::utils::ols::{fit_equation, Design, RegressionFit};
use nalgebra::DMatrix;
use std::ops::RangeInclusive;
use tracing::debug;

/// Role of a design column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Regressor {
    /// Lag `lag` (1-based) of endogenous variable `variable`.
    Lag { variable: usize, lag: usize },
    /// Exogenous column, by index into the sample's exogenous names.
    Exog(usize),
}

/// Stationary endogenous series and level exogenous columns on a common
/// time index.
#[derive(Debug, Clone)]
pub(crate) struct VarSample {
    pub names: Vec<String>,
    pub series: Vec<Vec<f64>>,
    pub exog_names: Vec<String>,
    pub exog: Vec<Vec<f64>>,
}

/// Design over rows `start..len` with the roles of its surviving columns.
#[derive(Debug, Clone)]
pub(crate) struct VarDesign {
    pub design: Design,
    pub roles: Vec<Regressor>,
    pub start: usize,
    /// Columns without variation, absorbed by the intercept.
    pub absorbed: Vec<String>,
}

/// All equations of one VAR(p) estimated on one design.
#[derive(Debug, Clone)]
pub(crate) struct SystemFit {
    pub lag: usize,
    pub design: VarDesign,
    pub equations: Vec<RegressionFit>,
}

impl VarSample {
    pub fn len(&self) -> usize {
        self.series.first().map(|s| s.len()).unwrap_or(0)
    }

    pub fn dim(&self) -> usize {
        self.series.len()
    }

    /// Parameters per equation of a VAR(`lag`), intercept included.
    pub fn params_per_equation(&self, lag: usize) -> usize {
        1 + self.dim() * lag + self.exog.len()
    }

    pub fn design(&self, lag: usize, start: usize) -> Result<VarDesign> {
        if start < lag || start >= self.len() {
            return Err(ForecastError::InsufficientData {
                needed: start + 1,
                got: self.len(),
            });
        }
        let rows = start..self.len();
        let mut design = Design::new();
        let mut named: Vec<(String, Regressor)> = Vec::new();

        for l in 1..=lag {
            for (v, series) in self.series.iter().enumerate() {
                let name = format!("{}.l{l}", self.names[v]);
                design.push(name.clone(), rows.clone().map(|t| series[t - l]).collect())?;
                named.push((name, Regressor::Lag { variable: v, lag: l }));
            }
        }
        for (j, column) in self.exog.iter().enumerate() {
            let name = self.exog_names[j].clone();
            design.push(name.clone(), column[rows.clone()].to_vec())?;
            named.push((name, Regressor::Exog(j)));
        }

        let absorbed = design.drop_constant();
        let roles = named
            .into_iter()
            .filter(|(name, _)| !absorbed.contains(name))
            .map(|(_, role)| role)
            .collect();

        Ok(VarDesign {
            design,
            roles,
            start,
            absorbed,
        })
    }

    /// Fit every equation of a VAR(`lag`) on rows `start..`.
    pub fn fit_system(&self, lag: usize, start: usize, ridge: Option<f64>) -> Result<SystemFit> {
        let design = self.design(lag, start)?;
        let x = design.design.matrix(self.len() - start);
        let equations = self
            .series
            .iter()
            .map(|y| fit_equation(&y[start..], &x, ridge))
            .collect::<Result<Vec<_>>>()?;
        Ok(SystemFit {
            lag,
            design,
            equations,
        })
    }
}

impl SystemFit {
    pub fn rows(&self) -> usize {
        self.equations.first().map(|e| e.residuals.len()).unwrap_or(0)
    }

    /// `T × k` residual matrix.
    pub fn residual_matrix(&self) -> DMatrix<f64> {
        let t = self.rows();
        DMatrix::from_fn(t, self.equations.len(), |i, j| self.equations[j].residuals[i])
    }

    /// Residual covariance `E'E / divisor`.
    pub fn residual_covariance(&self, divisor: f64) -> DMatrix<f64> {
        let e = self.residual_matrix();
        (e.transpose() * &e) / divisor.max(1.0)
    }

    /// Multivariate information criterion of the fit.
    ///
    /// `ln det(Σ_ML) + penalty · k · n_params / T`, with a small relative
    /// ridge on Σ so that an exactly fitted equation stays finite.
    pub fn information_criterion(&self, params_per_equation: usize, criterion: LagCriterion) -> f64 {
        let t = self.rows() as f64;
        let k = self.equations.len();
        let mut sigma = self.residual_covariance(t);
        let scale = (sigma.trace() / k as f64).max(1e-300);
        for i in 0..k {
            sigma[(i, i)] += 1e-10 * scale;
        }
        let Some(log_det) = log_det_spd(&sigma) else {
            return f64::INFINITY;
        };
        let penalty = match criterion {
            LagCriterion::Aic => 2.0,
            LagCriterion::Bic => t.ln(),
        };
        log_det + penalty * (k * params_per_equation) as f64 / t
    }
}

/// Outcome of lag selection.
#[derive(Debug, Clone, PartialEq)]
pub struct LagSelection {
    pub lag: usize,
    /// Criterion value of every candidate that could be estimated.
    pub scores: Vec<(usize, f64)>,
}

/// Pick the lag in `candidates` minimizing `criterion`.
///
/// The upper end of the range is lowered until the common sample leaves
/// enough degrees of freedom for the largest candidate.
pub(crate) fn select_lag(
    sample: &VarSample,
    candidates: RangeInclusive<usize>,
    criterion: LagCriterion,
    ridge: Option<f64>,
) -> Result<LagSelection> {
    let (min_lag, mut max_lag) = (*candidates.start(), *candidates.end());
    while max_lag >= min_lag
        && sample.len() < max_lag + sample.params_per_equation(max_lag) + 2
    {
        max_lag -= 1;
    }
    if max_lag < min_lag || min_lag == 0 {
        return Err(ForecastError::InsufficientData {
            needed: min_lag.max(1) + sample.params_per_equation(min_lag.max(1)) + 2,
            got: sample.len(),
        });
    }

    let mut scores = Vec::new();
    let mut last_error = None;
    for lag in min_lag..=max_lag {
        match sample.fit_system(lag, max_lag, ridge) {
            Ok(fit) => {
                let score = fit.information_criterion(sample.params_per_equation(lag), criterion);
                scores.push((lag, score));
            }
            Err(e) => last_error = Some(e),
        }
    }

    let best = scores
        .iter()
        .copied()
        .filter(|(_, s)| s.is_finite())
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    match best {
        Some((lag, score)) => {
            debug!(lag, score, candidates = scores.len(), "selected VAR lag");
            Ok(LagSelection { lag, scores })
        }
        None => Err(last_error.unwrap_or_else(|| {
            ForecastError::ComputationError("no lag candidate could be evaluated".to_string())
        })),
    }
}
