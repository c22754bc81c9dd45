//! Regional vector autoregression.

use crate::config::VarConfig;
use crate::core::{
    DiagnosticTest, ExogenousPath, FitOptions, FitStatus, Forecast, ForecastKey, ForecastSource,
    GeoLevel, GeographyId, IntervalPath, MarketVariable, ModelKind, ModelOrder, Month,
    TimeSeriesPanel,
};
use crate::error::{ForecastError, Result};
use crate::models::diff::integrate;
use crate::models::traits::FittedModel;
use crate::models::var::analysis::{
    granger_test, impulse_response, level_standard_errors, GrangerResult, ImpulseResponse,
};
use crate::models::var::lag_selection::{select_lag, Regressor, SystemFit, VarSample};
use crate::utils::ols::{screen_collinear, Design};
use crate::utils::stats::z_for_level;
use crate::validation::{arch_lm, check_stability, ensure_stationary, jarque_bera, ljung_box, StabilityResult};
use nalgebra::DMatrix;
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Reason attached to fits that needed the ridge penalty.
pub const RIDGE_REASON: &str = "collinearity-ridge-applied";

/// Level forecasts of every endogenous variable.
#[derive(Debug, Clone, PartialEq)]
pub struct VarForecastPaths {
    pub variables: Vec<MarketVariable>,
    /// Point forecasts on the level scale, one row per variable.
    pub points: Vec<Vec<f64>>,
    /// Forecast standard errors on the level scale.
    pub std_errors: Vec<Vec<f64>>,
}

impl VarForecastPaths {
    pub fn variable(&self, variable: MarketVariable) -> Option<(&[f64], &[f64])> {
        let i = self.variables.iter().position(|v| *v == variable)?;
        Some((&self.points[i], &self.std_errors[i]))
    }
}

/// A VAR(p) fitted to one region.
///
/// Each endogenous series is differenced to stationarity on its own; the
/// system is estimated equation by equation with a shared design of lagged
/// endogenous values and level exogenous columns. Price per area enters in
/// logs, so compounding prices difference to a stationary growth rate.
#[derive(Debug, Clone)]
pub struct RegionalVarModel {
    geography: GeographyId,
    months: Vec<Month>,
    variables: Vec<MarketVariable>,
    differencing: Vec<usize>,
    lag: usize,
    intercept: Vec<f64>,
    lag_matrices: Vec<DMatrix<f64>>,
    exog_names: Vec<String>,
    exog_coefficients: DMatrix<f64>,
    sigma: DMatrix<f64>,
    sample: VarSample,
    system: SystemFit,
    levels: Vec<Vec<f64>>,
    last_exog: BTreeMap<String, f64>,
    ridge_alpha: Option<f64>,
    stability: StabilityResult,
    diagnostics: Vec<DiagnosticTest>,
    notes: Vec<String>,
    status: FitStatus,
    aic: f64,
    ci_level: f64,
    ci_cap: f64,
}

impl RegionalVarModel {
    /// Fit with the configured search.
    pub fn fit(panel: &TimeSeriesPanel, config: &VarConfig) -> Result<Self> {
        Self::fit_with(panel, config, &FitOptions::primary())
    }

    /// Fit one attempt with the given options.
    #[instrument(skip_all, fields(geography = %panel.geography(), attempt = %options.label))]
    pub fn fit_with(panel: &TimeSeriesPanel, config: &VarConfig, options: &FitOptions) -> Result<Self> {
        if panel.len() < config.min_history {
            return Err(ForecastError::DataInsufficiency {
                geography: panel.geography().to_string(),
                needed: config.min_history,
                got: panel.len(),
            });
        }

        let variables: Vec<MarketVariable> = MarketVariable::ALL.to_vec();
        let levels = variables
            .iter()
            .map(|v| model_scale(panel, *v))
            .collect::<Result<Vec<_>>>()?;
        let mut differencing = Vec::with_capacity(variables.len());
        let mut stationary = Vec::with_capacity(variables.len());
        let mut diagnostics = Vec::new();
        for (v, level) in variables.iter().zip(&levels) {
            let outcome = ensure_stationary(
                v.name(),
                level,
                config.significance,
                config.max_differencing,
            )?;
            diagnostics.push(
                DiagnosticTest::with_verdict(
                    "adf",
                    outcome.final_test.statistic,
                    outcome.final_test.p_value,
                    true,
                )
                .on(v.name()),
            );
            differencing.push(outcome.order);
            stationary.push(outcome.transformed);
        }
        let dmax = differencing.iter().copied().max().unwrap_or(0);

        // Align every series on time index dmax..n.
        let series: Vec<Vec<f64>> = stationary
            .iter()
            .zip(&differencing)
            .map(|(s, &d)| s[dmax - d..].to_vec())
            .collect();

        let ridge = options.ridge.then_some(config.ridge_alpha);
        let mut notes = Vec::new();
        let mut exog_design = Design::new();
        for (name, values) in panel.exogenous() {
            exog_design.push(name.clone(), values[dmax..].to_vec())?;
        }
        for name in exog_design.drop_constant() {
            notes.push(format!("absorbed-constant:{name}"));
        }
        let candidates = exog_design.names().to_vec();
        let screen = screen_collinear(&mut exog_design, &candidates, config.vif_threshold, options.ridge)?;
        for (name, vif) in &screen.dropped {
            debug!(regressor = %name, vif, "dropped collinear exogenous column");
            notes.push(format!("dropped-collinear:{name}"));
        }

        let exog_names = exog_design.names().to_vec();
        let sample = VarSample {
            names: variables.iter().map(|v| v.name().to_string()).collect(),
            series,
            exog: exog_names
                .iter()
                .filter_map(|n| exog_design.column(n).map(|c| c.to_vec()))
                .collect(),
            exog_names: exog_names.clone(),
        };

        let criterion = options.criterion.unwrap_or(config.criterion);
        let (min_lag, max_lag) = match options.fixed_order {
            Some(order) => (order, order),
            None => {
                let max = options.max_order.map_or(config.max_lag, |m| m.min(config.max_lag));
                (config.min_lag.min(max), max)
            }
        };
        let selection = select_lag(&sample, min_lag..=max_lag, criterion, ridge)?;
        let lag = selection.lag;

        let system = sample.fit_system(lag, lag, ridge)?;
        for name in &system.design.absorbed {
            notes.push(format!("absorbed-constant:{name}"));
        }
        let k = variables.len();
        let rows = system.rows();
        let n_params = 1 + system.design.roles.len();
        let mut intercept = vec![0.0; k];
        let mut lag_matrices = vec![DMatrix::zeros(k, k); lag];
        let mut exog_coefficients = DMatrix::zeros(k, exog_names.len());
        for (i, eq) in system.equations.iter().enumerate() {
            intercept[i] = eq.coefficients[0];
            for (j, role) in system.design.roles.iter().enumerate() {
                let beta = eq.coefficients[j + 1];
                match *role {
                    Regressor::Lag { variable, lag } => lag_matrices[lag - 1][(i, variable)] = beta,
                    Regressor::Exog(x) => exog_coefficients[(i, x)] = beta,
                }
            }
        }
        let dof = rows.saturating_sub(n_params).max(1) as f64;
        let sigma = system.residual_covariance(dof);
        let aic = system.information_criterion(sample.params_per_equation(lag), crate::config::LagCriterion::Aic);

        let stability = check_stability(&lag_matrices)?;
        diagnostics.push(DiagnosticTest::with_verdict(
            "stability",
            stability.max_modulus,
            f64::NAN,
            stability.is_stable,
        ));
        for (v, eq) in variables.iter().zip(&system.equations) {
            let lb = ljung_box(&eq.residuals, None, lag);
            diagnostics.push(
                DiagnosticTest::from_p_value("ljung-box", lb.statistic, lb.p_value, config.significance)
                    .on(v.name()),
            );
            let arch = arch_lm(&eq.residuals, Some(config.arch_lags));
            diagnostics.push(
                DiagnosticTest::from_p_value("arch-lm", arch.statistic, arch.p_value, config.significance)
                    .on(v.name()),
            );
            let jb = jarque_bera(&eq.residuals);
            diagnostics.push(
                DiagnosticTest::from_p_value("jarque-bera", jb.statistic, jb.p_value, config.significance)
                    .on(v.name()),
            );
        }

        let mut reasons: Vec<String> = diagnostics
            .iter()
            .filter(|d| !d.passed)
            .map(|d| d.failure_reason())
            .collect();
        if ridge.is_some() {
            reasons.insert(0, RIDGE_REASON.to_string());
        }
        let status = FitStatus::from_reasons(reasons);
        debug!(lag, ?differencing, status = status.label(), "fitted regional VAR");

        let last_exog = panel
            .exogenous()
            .iter()
            .filter_map(|(name, values)| values.last().map(|v| (name.clone(), *v)))
            .collect();

        Ok(Self {
            geography: panel.geography().clone(),
            months: panel.months().to_vec(),
            levels,
            variables,
            differencing,
            lag,
            intercept,
            lag_matrices,
            exog_names,
            exog_coefficients,
            sigma,
            sample,
            system,
            last_exog,
            ridge_alpha: ridge,
            stability,
            diagnostics,
            notes,
            status,
            aic,
            ci_level: config.ci_level,
            ci_cap: config.ci_cap,
        })
    }

    pub fn lag(&self) -> usize {
        self.lag
    }

    /// Differencing order of each endogenous variable.
    pub fn differencing(&self) -> &[usize] {
        &self.differencing
    }

    pub fn variables(&self) -> &[MarketVariable] {
        &self.variables
    }

    pub fn intercept(&self) -> &[f64] {
        &self.intercept
    }

    /// `A_1 .. A_p`, each `k × k`.
    pub fn lag_matrices(&self) -> &[DMatrix<f64>] {
        &self.lag_matrices
    }

    /// Exogenous columns retained in the fit.
    pub fn exog_names(&self) -> &[String] {
        &self.exog_names
    }

    pub fn exog_coefficients(&self) -> &DMatrix<f64> {
        &self.exog_coefficients
    }

    /// Residual covariance, degrees-of-freedom adjusted.
    pub fn sigma(&self) -> &DMatrix<f64> {
        &self.sigma
    }

    pub fn stability(&self) -> &StabilityResult {
        &self.stability
    }

    pub fn months(&self) -> &[Month] {
        &self.months
    }

    pub fn last_month(&self) -> Option<Month> {
        self.months.last().copied()
    }

    /// Residuals of one equation.
    pub fn equation_residuals(&self, variable: MarketVariable) -> Option<&[f64]> {
        let i = self.index_of(variable).ok()?;
        Some(&self.system.equations[i].residuals)
    }

    fn index_of(&self, variable: MarketVariable) -> Result<usize> {
        self.variables
            .iter()
            .position(|v| *v == variable)
            .ok_or_else(|| ForecastError::InvalidParameter(format!("variable {variable} not in model")))
    }

    /// Level forecasts and standard errors of every variable.
    pub fn forecast_paths(&self, horizon: usize, exog: &ExogenousPath) -> Result<VarForecastPaths> {
        if horizon == 0 {
            return Err(ForecastError::InvalidParameter(
                "horizon must be positive".to_string(),
            ));
        }
        let k = self.variables.len();
        let mut history: Vec<Vec<f64>> = self.sample.series.clone();
        let mut future: Vec<Vec<f64>> = vec![Vec::with_capacity(horizon); k];

        for step in 0..horizon {
            let x: Vec<f64> = self
                .exog_names
                .iter()
                .map(|name| {
                    let last = self.last_exog.get(name).copied().unwrap_or(0.0);
                    exog.value_or(name, step, last)
                })
                .collect();
            let t = history[0].len();
            let next: Vec<f64> = (0..k)
                .map(|i| {
                    let mut value = self.intercept[i];
                    for (l, a) in self.lag_matrices.iter().enumerate() {
                        for (j, series) in history.iter().enumerate() {
                            value += a[(i, j)] * series[t - l - 1];
                        }
                    }
                    for (j, xj) in x.iter().enumerate() {
                        value += self.exog_coefficients[(i, j)] * xj;
                    }
                    value
                })
                .collect();
            for (i, value) in next.into_iter().enumerate() {
                history[i].push(value);
                future[i].push(value);
            }
        }

        let mut points: Vec<Vec<f64>> = future
            .iter()
            .zip(&self.levels)
            .zip(&self.differencing)
            .map(|((f, level), &d)| integrate(f, level, d))
            .collect();
        let mut std_errors = level_standard_errors(&self.lag_matrices, &self.sigma, &self.differencing, horizon);
        for (i, v) in self.variables.iter().enumerate() {
            if v.is_logged() {
                // Delta method: se(exp x) ≈ exp(x) · se(x).
                for (p, se) in points[i].iter_mut().zip(std_errors[i].iter_mut()) {
                    *p = p.exp();
                    *se *= *p;
                }
            }
        }
        if points.iter().flatten().any(|p| !p.is_finite()) {
            return Err(ForecastError::ComputationError(format!(
                "non-finite VAR forecast for {}",
                self.geography
            )));
        }

        Ok(VarForecastPaths {
            variables: self.variables.clone(),
            points,
            std_errors,
        })
    }

    /// Appreciation forecast with analytic intervals under `scenario`.
    pub fn forecast(&self, scenario: &str, horizon: usize, exog: &ExogenousPath) -> Result<Forecast> {
        let paths = self.forecast_paths(horizon, exog)?;
        let i = self.index_of(MarketVariable::Appreciation)?;
        let z = z_for_level(self.ci_level);
        let half: Vec<f64> = paths.std_errors[i].iter().map(|se| z * se).collect();
        let path = IntervalPath::symmetric(paths.points[i].clone(), &half)?;
        let first = self.last_month().ok_or(ForecastError::EmptyData)?.succ();
        Forecast::from_intervals(
            ForecastKey::new(self.geography.clone(), GeoLevel::Region, scenario),
            ForecastSource::Model(ModelKind::Var),
            first,
            path,
            self.ci_cap,
        )
    }

    /// Does `cause` Granger-cause appreciation?
    pub fn granger_causality(&self, cause: MarketVariable) -> Result<GrangerResult> {
        self.granger_causality_between(cause, MarketVariable::Appreciation)
    }

    /// F-test that all lags of `cause` are zero in the `effect` equation.
    pub fn granger_causality_between(
        &self,
        cause: MarketVariable,
        effect: MarketVariable,
    ) -> Result<GrangerResult> {
        let c = self.index_of(cause)?;
        let e = self.index_of(effect)?;
        let design = &self.system.design;
        let restricted_out: Vec<String> = design
            .design
            .names()
            .iter()
            .zip(&design.roles)
            .filter(|(_, role)| matches!(role, Regressor::Lag { variable, .. } if *variable == c))
            .map(|(name, _)| name.clone())
            .collect();
        let y = &self.sample.series[e][design.start..];
        granger_test(y, &design.design, &restricted_out, self.ridge_alpha, cause, effect)
    }

    /// Responses of every variable to a one-standard-deviation `shock`,
    /// for horizons `0..horizons`, on the level scale (log points for
    /// price per area).
    pub fn impulse_response(&self, shock: MarketVariable, horizons: usize) -> Result<ImpulseResponse> {
        impulse_response(
            &self.lag_matrices,
            &self.sigma,
            &self.variables,
            &self.differencing,
            shock,
            horizons,
        )
    }

    /// One-step-ahead fitted appreciation aligned with the panel months.
    ///
    /// Months before the first estimated row carry the observed value.
    pub fn in_sample_signal(&self) -> Vec<f64> {
        let i = self
            .variables
            .iter()
            .position(|v| *v == MarketVariable::Appreciation)
            .unwrap_or(0);
        let actual = &self.levels[i];
        let residuals = &self.system.equations[i].residuals;
        let offset = actual.len() - residuals.len();
        actual
            .iter()
            .enumerate()
            .map(|(t, y)| if t < offset { *y } else { y - residuals[t - offset] })
            .collect()
    }
}

/// `variable` on the scale the system is estimated on.
fn model_scale(panel: &TimeSeriesPanel, variable: MarketVariable) -> Result<Vec<f64>> {
    let values = panel.variable(variable);
    if !variable.is_logged() {
        return Ok(values.to_vec());
    }
    if let Some(bad) = values.iter().find(|v| !(**v > 0.0) || !v.is_finite()) {
        return Err(ForecastError::InvalidParameter(format!(
            "{} must be positive to take logs, got {bad} in {}",
            variable.name(),
            panel.geography()
        )));
    }
    Ok(values.iter().map(|v| v.ln()).collect())
}

impl FittedModel for RegionalVarModel {
    fn geography(&self) -> &GeographyId {
        &self.geography
    }

    fn level(&self) -> GeoLevel {
        GeoLevel::Region
    }

    fn kind(&self) -> ModelKind {
        ModelKind::Var
    }

    fn order(&self) -> ModelOrder {
        ModelOrder::Var {
            lag: self.lag,
            differencing: self.differencing.clone(),
        }
    }

    fn status(&self) -> &FitStatus {
        &self.status
    }

    fn diagnostics(&self) -> &[DiagnosticTest] {
        &self.diagnostics
    }

    fn notes(&self) -> &[String] {
        &self.notes
    }

    fn residuals(&self) -> &[f64] {
        let i = self
            .variables
            .iter()
            .position(|v| *v == MarketVariable::Appreciation)
            .unwrap_or(0);
        &self.system.equations[i].residuals
    }

    fn aic(&self) -> f64 {
        self.aic
    }

    fn observations(&self) -> usize {
        self.system.rows()
    }
}
