//! Area ARIMAX model with the regional forecast as an exogenous input.

use crate::config::ArimaxConfig;
use crate::core::{
    DiagnosticTest, FitOptions, FitStatus, Forecast, ForecastKey, ForecastSource, GeoLevel,
    GeographyId, IntervalPath, ModelKind, ModelOrder, Month, TimeSeriesPanel,
};
use crate::error::{ForecastError, Result};
use crate::models::arimax::exog::{Intervention, RegressorSet, REGIONAL_SIGNAL};
use crate::models::arimax::search::{ar_name, eliminate_features, grid_search, ArimaxSample, CandidateFit};
use crate::models::diff::{cumulate, difference, integrate};
use crate::models::traits::FittedModel;
use crate::models::var::RIDGE_REASON;
use crate::utils::bootstrap::{bootstrap_bands, BootstrapConfig, ResidualSampler};
use crate::utils::ols::Design;
use crate::validation::{arch_lm, check_differenced, ensure_stationary, jarque_bera, ljung_box};
use rand::Rng;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// An ARIMAX(p, d, q) fitted to one area, q ∈ {0, 1}.
#[derive(Debug, Clone)]
pub struct AreaArimaxModel {
    geography: GeographyId,
    parent: Option<GeographyId>,
    months: Vec<Month>,
    levels: Vec<f64>,
    target: Vec<f64>,
    d: usize,
    fit: CandidateFit,
    ar: Vec<f64>,
    regressors: RegressorSet,
    betas: Vec<f64>,
    sampler: ResidualSampler,
    bootstrap: BootstrapConfig,
    status: FitStatus,
    diagnostics: Vec<DiagnosticTest>,
    notes: Vec<String>,
    ci_level: f64,
    ci_cap: f64,
}

impl AreaArimaxModel {
    /// Fit with the configured search and no interventions.
    pub fn fit(panel: &TimeSeriesPanel, regional_signal: &[f64], config: &ArimaxConfig) -> Result<Self> {
        Self::fit_with(panel, regional_signal, &[], config, &FitOptions::primary())
    }

    /// Fit one attempt.
    ///
    /// `regional_signal` is the parent region's in-sample appreciation
    /// signal aligned with the panel months.
    #[instrument(skip_all, fields(geography = %panel.geography(), attempt = %options.label))]
    pub fn fit_with(
        panel: &TimeSeriesPanel,
        regional_signal: &[f64],
        interventions: &[Intervention],
        config: &ArimaxConfig,
        options: &FitOptions,
    ) -> Result<Self> {
        if panel.len() < config.min_history {
            return Err(ForecastError::DataInsufficiency {
                geography: panel.geography().to_string(),
                needed: config.min_history,
                got: panel.len(),
            });
        }
        let regressors = RegressorSet::from_panel(panel, regional_signal, interventions)?;
        let levels = panel.appreciation().to_vec();

        let d = match options.fixed_differencing {
            Some(d) => {
                check_differenced("appreciation", &levels, d.min(config.max_d), config.significance)?.order
            }
            None => {
                ensure_stationary("appreciation", &levels, config.significance, config.max_d)?.order
            }
        };

        let mut design = Design::new();
        for (name, column) in regressors.names.iter().zip(&regressors.columns) {
            design.push(name.clone(), difference(column, d))?;
        }
        let mut sample = ArimaxSample {
            target: difference(&levels, d),
            regressors: design,
        };

        let ar_orders = match options.fixed_order {
            Some(p) => p..=p,
            None => 1..=options.max_order.map_or(config.max_p, |m| m.min(config.max_p)).max(1),
        };
        let max_q = options.max_ma.map_or(config.max_q, |m| m.min(config.max_q));
        let ridge = options.ridge.then_some(config.ridge_alpha);
        let started = Instant::now();
        let deadline = started + Duration::from_millis(config.attempt_timeout_ms);

        let outcome = grid_search(&sample, ar_orders, max_q, config.criterion, ridge, started, deadline)?;
        let mut notes = Vec::new();
        if outcome.truncated {
            notes.push("grid-search-truncated".to_string());
        }
        let (p, q) = (outcome.best.p, outcome.best.q);
        let (fit, removed) = eliminate_features(&mut sample, p, q, ridge, config.feature_significance)?;
        notes.extend(removed.iter().map(|name| format!("eliminated:{name}")));
        notes.extend(fit.absorbed.iter().map(|name| format!("absorbed-constant:{name}")));

        let residuals = &fit.regression.residuals;
        let significance = config.significance;
        let lb = ljung_box(residuals, None, p + q);
        let arch = arch_lm(residuals, Some(config.arch_lags));
        let jb = jarque_bera(residuals);
        let diagnostics = vec![
            DiagnosticTest::from_p_value("ljung-box", lb.statistic, lb.p_value, significance),
            DiagnosticTest::from_p_value("arch-lm", arch.statistic, arch.p_value, significance),
            DiagnosticTest::from_p_value("jarque-bera", jb.statistic, jb.p_value, significance),
        ];
        let mut reasons: Vec<String> = diagnostics
            .iter()
            .filter(|t| !t.passed)
            .map(|t| t.failure_reason())
            .collect();
        if ridge.is_some() {
            reasons.insert(0, RIDGE_REASON.to_string());
        }
        let status = FitStatus::from_reasons(reasons);

        let ar = (1..=p).map(|i| fit.coefficient(&ar_name(i))).collect();
        let betas = regressors.names.iter().map(|n| fit.coefficient(n)).collect();
        let sampler = ResidualSampler::new(residuals)?;
        debug!(p, d, q, theta = fit.theta, status = status.label(), "fitted area ARIMAX");

        Ok(Self {
            geography: panel.geography().clone(),
            parent: panel.parent().cloned(),
            months: panel.months().to_vec(),
            levels,
            target: sample.target,
            d,
            fit,
            ar,
            regressors,
            betas,
            sampler,
            bootstrap: BootstrapConfig::new(config.bootstrap_draws).with_seed(config.seed),
            status,
            diagnostics,
            notes,
            ci_level: config.ci_level,
            ci_cap: config.ci_cap,
        })
    }

    pub fn parent(&self) -> Option<&GeographyId> {
        self.parent.as_ref()
    }

    pub fn months(&self) -> &[Month] {
        &self.months
    }

    pub fn last_month(&self) -> Option<Month> {
        self.months.last().copied()
    }

    /// Orders `(p, d, q)`.
    pub fn orders(&self) -> (usize, usize, usize) {
        (self.fit.p, self.d, self.fit.q)
    }

    pub fn intercept(&self) -> f64 {
        self.fit.regression.coefficients[0]
    }

    pub fn ar_coefficients(&self) -> &[f64] {
        &self.ar
    }

    /// MA(1) coefficient; 0 when q = 0.
    pub fn theta(&self) -> f64 {
        self.fit.theta
    }

    /// Coefficient of a regressor column; 0 when it was absorbed or eliminated.
    pub fn coefficient(&self, name: &str) -> f64 {
        self.fit.coefficient(name)
    }

    /// Weight of the regional signal.
    pub fn regional_weight(&self) -> f64 {
        self.fit.coefficient(REGIONAL_SIGNAL)
    }

    /// Regressor columns still in the fitted equation.
    pub fn active_regressors(&self) -> Vec<&str> {
        self.regressors
            .names
            .iter()
            .filter(|n| self.fit.names.contains(n))
            .map(|n| n.as_str())
            .collect()
    }

    /// Deterministic appreciation path given a regional path.
    ///
    /// `regional_future` is held at its last value beyond its length;
    /// features missing from `features` keep their last observed value.
    pub fn point_path(
        &self,
        horizon: usize,
        regional_future: &[f64],
        features: &BTreeMap<String, f64>,
    ) -> Result<Vec<f64>> {
        if horizon == 0 {
            return Err(ForecastError::InvalidParameter(
                "horizon must be positive".to_string(),
            ));
        }
        let first = self.last_month().ok_or(ForecastError::EmptyData)?.succ();
        let future = self.regressors.future(first, horizon, regional_future, features);
        let x: Vec<Vec<f64>> = future
            .iter()
            .zip(&self.regressors.columns)
            .map(|(f, history)| difference_future(history, f, self.d))
            .collect();

        let mut w = self.target.clone();
        let n = w.len();
        let last_residual = self.fit.regression.residuals.last().copied().unwrap_or(0.0);
        for h in 0..horizon {
            let t = w.len();
            let mut value = self.intercept();
            for (i, phi) in self.ar.iter().enumerate() {
                value += phi * w[t - i - 1];
            }
            for (beta, column) in self.betas.iter().zip(&x) {
                value += beta * column[h];
            }
            if h == 0 {
                value += self.fit.theta * last_residual;
            }
            w.push(value);
        }

        let path = integrate(&w[n..], &self.levels, self.d);
        if path.iter().any(|v| !v.is_finite()) {
            return Err(ForecastError::ComputationError(format!(
                "non-finite ARIMAX forecast for {}",
                self.geography
            )));
        }
        Ok(path)
    }

    /// Level-scale effect of a shock sequence passed through the ARMA
    /// recursion and integrated.
    fn shock_response(&self, shocks: &[f64]) -> Vec<f64> {
        let mut s: Vec<f64> = Vec::with_capacity(shocks.len());
        for (h, eps) in shocks.iter().enumerate() {
            let mut value = *eps;
            if h > 0 {
                value += self.fit.theta * shocks[h - 1];
            }
            for (i, phi) in self.ar.iter().enumerate() {
                if h > i {
                    value += phi * s[h - i - 1];
                }
            }
            s.push(value);
        }
        cumulate(&s, self.d)
    }

    /// One bootstrap path of forecast noise, to be added to a point path.
    pub fn residual_path<R: Rng + ?Sized>(&self, rng: &mut R, horizon: usize) -> Vec<f64> {
        self.shock_response(&self.sampler.draw(horizon, rng))
    }

    /// Appreciation forecast under `scenario` with bootstrap intervals.
    pub fn forecast(
        &self,
        scenario: &str,
        horizon: usize,
        regional_future: &[f64],
        features: &BTreeMap<String, f64>,
    ) -> Result<Forecast> {
        let point = self.point_path(horizon, regional_future, features)?;
        let lower_pct = 50.0 * (1.0 - self.ci_level);
        let (lower, upper) = bootstrap_bands(
            &self.sampler,
            horizon,
            &self.bootstrap,
            lower_pct,
            100.0 - lower_pct,
            |shocks: &[f64]| -> Vec<f64> {
                self.shock_response(shocks)
                    .iter()
                    .zip(&point)
                    .map(|(s, p)| p + s)
                    .collect()
            },
        )?;
        self.finalize(scenario, IntervalPath::new(point, lower, upper)?)
    }

    /// Build a forecast from a raw interval path produced elsewhere
    /// (e.g. Monte Carlo propagation).
    pub fn finalize(&self, scenario: &str, path: IntervalPath) -> Result<Forecast> {
        let first = self.last_month().ok_or(ForecastError::EmptyData)?.succ();
        Forecast::from_intervals(
            ForecastKey::new(self.geography.clone(), GeoLevel::Area, scenario),
            ForecastSource::Model(ModelKind::Arimax),
            first,
            path,
            self.ci_cap,
        )
    }
}

/// `d`-th differences of `future`, continuing `history`.
fn difference_future(history: &[f64], future: &[f64], d: usize) -> Vec<f64> {
    if d == 0 {
        return future.to_vec();
    }
    let tail = &history[history.len().saturating_sub(d)..];
    let joined: Vec<f64> = tail.iter().chain(future).copied().collect();
    difference(&joined, d)
}

impl FittedModel for AreaArimaxModel {
    fn geography(&self) -> &GeographyId {
        &self.geography
    }

    fn level(&self) -> GeoLevel {
        GeoLevel::Area
    }

    fn kind(&self) -> ModelKind {
        ModelKind::Arimax
    }

    fn order(&self) -> ModelOrder {
        ModelOrder::Arimax {
            p: self.fit.p,
            d: self.d,
            q: self.fit.q,
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
        &self.fit.regression.residuals
    }

    fn aic(&self) -> f64 {
        self.fit.aic
    }

    fn observations(&self) -> usize {
        self.fit.regression.residuals.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn area(n: usize, seed: u64) -> (TimeSeriesPanel, Vec<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0, 0.3).unwrap();
        let signal: Vec<f64> = (0..n).map(|t| 0.5 + 0.4 * ((t as f64) / 6.0).sin()).collect();
        let mut y = vec![0.5; n];
        for t in 1..n {
            y[t] = 0.1 + 0.3 * y[t - 1] + 0.9 * signal[t] + noise.sample(&mut rng);
        }
        let panel = TimeSeriesPanel::new(
            "punggol",
            GeoLevel::Area,
            Month::new(2016, 1).unwrap().range(n),
            y,
            vec![30.0; n],
            vec![6000.0; n],
        )
        .unwrap()
        .with_parent("north-east")
        .with_static_feature("mrt_score", 0.9)
        .unwrap();
        (panel, signal)
    }

    #[test]
    fn short_panel_is_data_insufficiency() {
        let (panel, signal) = area(10, 1);
        let err = AreaArimaxModel::fit(&panel, &signal, &ArimaxConfig::default()).unwrap_err();
        assert!(matches!(err, ForecastError::DataInsufficiency { needed: 24, got: 10, .. }));
    }

    #[test]
    fn fit_tracks_regional_signal() {
        let (panel, signal) = area(200, 2);
        let model = AreaArimaxModel::fit(&panel, &signal, &ArimaxConfig::default()).unwrap();
        let (p, d, q) = model.orders();
        assert!(p >= 1 && d == 0 && q <= 1);
        assert_relative_eq!(model.regional_weight(), 0.9, epsilon = 0.25);
        assert_eq!(model.parent(), Some(&GeographyId::new("north-east")));
        assert!(model.notes().contains(&"absorbed-constant:feature:mrt_score".to_string()));
        assert!(model.active_regressors().contains(&REGIONAL_SIGNAL));
    }

    #[test]
    fn point_path_responds_to_regional_path() {
        let (panel, signal) = area(120, 3);
        let model = AreaArimaxModel::fit(&panel, &signal, &ArimaxConfig::default()).unwrap();
        let features = BTreeMap::new();
        let low = model.point_path(12, &[0.0; 12], &features).unwrap();
        let high = model.point_path(12, &[2.0; 12], &features).unwrap();
        assert_eq!(low.len(), 12);
        assert!(high[11] > low[11]);
    }

    #[test]
    fn bootstrap_forecast_is_seeded_and_capped() {
        let (panel, signal) = area(96, 4);
        let config = ArimaxConfig::default().with_bootstrap(300, 11);
        let model = AreaArimaxModel::fit(&panel, &signal, &config).unwrap();
        let regional = vec![0.5; 24];
        let a = model.forecast("baseline", 24, &regional, &BTreeMap::new()).unwrap();
        let b = model.forecast("baseline", 24, &regional, &BTreeMap::new()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.first_month(), Some(Month::new(2024, 1).unwrap()));
        for step in a.steps() {
            assert!(step.lower <= step.point && step.point <= step.upper);
            assert!(step.half_width() <= 30.0);
        }
    }

    #[test]
    fn residual_paths_vary_with_rng() {
        let (panel, signal) = area(80, 5);
        let model = AreaArimaxModel::fit(&panel, &signal, &ArimaxConfig::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let a = model.residual_path(&mut rng, 6);
        let b = model.residual_path(&mut rng, 6);
        assert_eq!(a.len(), 6);
        assert_ne!(a, b);
    }

    #[test]
    fn ar_only_fixed_order_options() {
        let (panel, signal) = area(60, 6);
        let options = FitOptions::labelled("fixed-low-order")
            .with_fixed_order(1)
            .with_max_ma(0)
            .with_fixed_differencing(1)
            .with_ridge();
        let model =
            AreaArimaxModel::fit_with(&panel, &signal, &[], &ArimaxConfig::default(), &options).unwrap();
        assert_eq!(model.orders(), (1, 1, 0));
        assert!(model.status().is_degraded());
    }

    #[test]
    fn fixed_differencing_still_checks_for_unit_root() {
        let n = 60;
        let (_, signal) = area(n, 7);
        let explosive: Vec<f64> = (0..n).map(|t| 1.08_f64.powi(t as i32) / 100.0).collect();
        let panel = TimeSeriesPanel::new(
            "tengah",
            GeoLevel::Area,
            Month::new(2016, 1).unwrap().range(n),
            explosive,
            vec![30.0; n],
            vec![6000.0; n],
        )
        .unwrap();
        let options = FitOptions::labelled("fixed-low-order")
            .with_fixed_order(1)
            .with_max_ma(0)
            .with_fixed_differencing(1);
        let err =
            AreaArimaxModel::fit_with(&panel, &signal, &[], &ArimaxConfig::default(), &options).unwrap_err();
        assert!(matches!(err, ForecastError::NonStationarity { passes: 1, .. }));
    }

    #[test]
    fn difference_future_continues_history() {
        assert_eq!(difference_future(&[1.0, 3.0], &[4.0, 6.0], 1), vec![1.0, 2.0]);
        assert_eq!(difference_future(&[1.0], &[4.0], 0), vec![4.0]);
    }
}
