//! Candidate estimation and order search for the area model.
//!
//! A candidate ARIMAX(p, d, q) is estimated on the differenced series `w`:
//!
//! ```text
//! w_t = c + Σ φ_i w_{t-i} + β'x_t + e_t + θ e_{t-1}
//! ```
//!
//! With `q = 0` this is ordinary least squares. With `q = 1` every column is
//! filtered by `(1 + θL)^{-1}`, `β` is concentrated out by OLS, and `θ` is
//! found by golden-section search on the conditional sum of squares.

use crate::config::LagCriterion;
use crate::error::{ForecastError, Result};
use crate::utils::ols::{fit_equation, Design, RegressionFit};
use crate::utils::optimization::{golden_section, GoldenSectionConfig};
use nalgebra::DMatrix;
use std::ops::RangeInclusive;
use std::time::Instant;
use tracing::debug;

/// Bound on |θ| keeping the MA part invertible.
pub const THETA_BOUND: f64 = 0.95;

/// Differenced target and regressors on a common index.
#[derive(Debug, Clone)]
pub(crate) struct ArimaxSample {
    pub target: Vec<f64>,
    pub regressors: Design,
}

/// One estimated candidate.
#[derive(Debug, Clone)]
pub(crate) struct CandidateFit {
    pub p: usize,
    pub q: usize,
    pub theta: f64,
    /// First row of `target` used in estimation.
    pub start: usize,
    /// Design column names (intercept excluded), aligned with
    /// `regression.coefficients[1..]`.
    pub names: Vec<String>,
    pub absorbed: Vec<String>,
    pub regression: RegressionFit,
    pub aic: f64,
    pub bic: f64,
}

impl CandidateFit {
    pub fn score(&self, criterion: LagCriterion) -> f64 {
        match criterion {
            LagCriterion::Aic => self.aic,
            LagCriterion::Bic => self.bic,
        }
    }

    pub fn coefficient(&self, name: &str) -> f64 {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|j| self.regression.coefficients[j + 1])
            .unwrap_or(0.0)
    }
}

pub(crate) fn ar_name(lag: usize) -> String {
    format!("ar.l{lag}")
}

impl ArimaxSample {
    pub fn len(&self) -> usize {
        self.target.len()
    }

    fn design(&self, p: usize, start: usize) -> Result<(Design, Vec<String>)> {
        let mut design = Design::new();
        for i in 1..=p {
            design.push(ar_name(i), (start..self.len()).map(|t| self.target[t - i]).collect())?;
        }
        for name in self.regressors.names() {
            if let Some(column) = self.regressors.column(name) {
                design.push(name.clone(), column[start..].to_vec())?;
            }
        }
        let absorbed = design.drop_constant();
        Ok((design, absorbed))
    }

    /// Estimate ARIMAX(p, ·, q) on rows `start..`.
    pub fn fit_candidate(&self, p: usize, q: usize, start: usize, ridge: Option<f64>) -> Result<CandidateFit> {
        if start < p || start >= self.len() {
            return Err(ForecastError::InsufficientData {
                needed: start + 1,
                got: self.len(),
            });
        }
        let (design, absorbed) = self.design(p, start)?;
        let y = &self.target[start..];
        let x = design.to_matrix();

        let (theta, regression) = if q == 0 {
            (0.0, fit_equation(y, &x, ridge)?)
        } else {
            let css = |theta: f64| {
                fit_equation(&filter_series(y, theta), &filter_columns(&x, theta), ridge)
                    .map(|f| f.rss)
                    .unwrap_or(f64::INFINITY)
            };
            let search = golden_section(css, -THETA_BOUND, THETA_BOUND, GoldenSectionConfig::default());
            if !search.optimal_value.is_finite() {
                return Err(ForecastError::NonConvergence(format!(
                    "MA(1) search failed for p = {p}"
                )));
            }
            let theta = search.optimal_point;
            let fit = fit_equation(&filter_series(y, theta), &filter_columns(&x, theta), ridge)?;
            (theta, fit)
        };

        let n = y.len() as f64;
        let n_params = (regression.coefficients.len() + q + 1) as f64;
        let log_term = n * (regression.rss.max(1e-300) / n).ln();

        Ok(CandidateFit {
            p,
            q,
            theta,
            start,
            names: design.names().to_vec(),
            absorbed,
            regression,
            aic: log_term + 2.0 * n_params,
            bic: log_term + n.ln() * n_params,
        })
    }
}

/// `ỹ_t = y_t − θ ỹ_{t−1}` with a zero pre-sample value.
pub(crate) fn filter_series(y: &[f64], theta: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(y.len());
    let mut prev = 0.0;
    for &v in y {
        prev = v - theta * prev;
        out.push(prev);
    }
    out
}

fn filter_columns(x: &DMatrix<f64>, theta: f64) -> DMatrix<f64> {
    let mut out = x.clone();
    for j in 0..x.ncols() {
        let column: Vec<f64> = x.column(j).iter().copied().collect();
        for (i, v) in filter_series(&column, theta).into_iter().enumerate() {
            out[(i, j)] = v;
        }
    }
    out
}

/// Best candidate of a grid search.
#[derive(Debug, Clone)]
pub(crate) struct SearchOutcome {
    pub best: CandidateFit,
    /// The deadline passed before every candidate was tried.
    pub truncated: bool,
    pub evaluated: usize,
}

/// Search `p` over `ar_orders` and `q` over `0..=max_q` on a common sample.
///
/// Candidates are skipped once `deadline` has passed; the best candidate
/// found so far is kept, and the search fails with `Timeout` only when
/// none was estimated.
pub(crate) fn grid_search(
    sample: &ArimaxSample,
    ar_orders: RangeInclusive<usize>,
    max_q: usize,
    criterion: LagCriterion,
    ridge: Option<f64>,
    started: Instant,
    deadline: Instant,
) -> Result<SearchOutcome> {
    let min_p = *ar_orders.start();
    let mut max_p = *ar_orders.end();
    let width = sample.regressors.width();
    while max_p >= min_p && sample.len() < max_p + (1 + max_p + width + max_q) + 3 {
        if max_p == 0 {
            break;
        }
        max_p -= 1;
    }
    if max_p < min_p || sample.len() < max_p + (1 + max_p + width) + 3 {
        return Err(ForecastError::InsufficientData {
            needed: min_p + (1 + min_p + width + max_q) + 3,
            got: sample.len(),
        });
    }

    let mut best: Option<CandidateFit> = None;
    let mut truncated = false;
    let mut evaluated = 0;
    let mut last_error = None;

    'grid: for p in min_p..=max_p {
        for q in 0..=max_q {
            if Instant::now() > deadline {
                truncated = true;
                break 'grid;
            }
            evaluated += 1;
            match sample.fit_candidate(p, q, max_p, ridge) {
                Ok(fit) => {
                    let better = best
                        .as_ref()
                        .map_or(true, |b| fit.score(criterion) < b.score(criterion));
                    if better {
                        best = Some(fit);
                    }
                }
                Err(e) => last_error = Some(e),
            }
        }
    }

    match best {
        Some(best) => {
            debug!(p = best.p, q = best.q, evaluated, truncated, "selected ARIMAX order");
            Ok(SearchOutcome {
                best,
                truncated,
                evaluated,
            })
        }
        None if truncated => Err(ForecastError::Timeout {
            elapsed_ms: started.elapsed().as_millis() as u64,
        }),
        None => Err(last_error.unwrap_or_else(|| {
            ForecastError::ComputationError("no ARIMAX candidate could be estimated".to_string())
        })),
    }
}

/// Refit `(p, q)` on its full sample, dropping the least significant local
/// feature while its p-value is at least `threshold`.
///
/// Returns the final fit and the removed column names.
pub(crate) fn eliminate_features(
    sample: &mut ArimaxSample,
    p: usize,
    q: usize,
    ridge: Option<f64>,
    threshold: f64,
) -> Result<(CandidateFit, Vec<String>)> {
    let mut removed = Vec::new();
    loop {
        let fit = sample.fit_candidate(p, q, p, ridge)?;
        let p_values = fit.regression.p_values();
        let worst = fit
            .names
            .iter()
            .enumerate()
            .filter(|(_, name)| name.starts_with("feature:"))
            .map(|(j, name)| (name.clone(), p_values[j + 1]))
            .filter(|(_, pv)| pv.is_finite() && *pv >= threshold)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        match worst {
            Some((name, p_value)) => {
                debug!(feature = %name, p_value, "eliminated local feature");
                sample.regressors.remove(&name);
                removed.push(name);
            }
            None => return Ok((fit, removed)),
        }
    }
}
