//! Run configuration.
//!
//! A [`PipelineConfig`] is built once per pipeline run and passed by reference
//! into every fitting and forecasting entry point. Every section has defaults
//! matching the documented thresholds and can be overridden from JSON.

use crate::error::{ForecastError, Result};
use crate::pipeline::Scenario;
use crate::recovery::RetryVariant;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Information criterion used for lag / order selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LagCriterion {
    /// Akaike information criterion.
    #[default]
    Aic,
    /// Bayesian (Schwarz) information criterion.
    Bic,
}

/// Panel preparation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Physical bound for appreciation values, in percent.
    pub appreciation_bound: f64,
    /// Longest run of missing months that may be interpolated.
    pub max_gap_months: usize,
    /// Tukey fence multiplier used to winsorize appreciation and volume.
    pub outlier_iqr_multiplier: f64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            appreciation_bound: 50.0,
            max_gap_months: 3,
            outlier_iqr_multiplier: 3.0,
        }
    }
}

/// Regional VAR settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VarConfig {
    /// Minimum panel length in months.
    pub min_history: usize,
    /// Smallest lag order considered.
    pub min_lag: usize,
    /// Largest lag order considered.
    pub max_lag: usize,
    /// Criterion for lag selection.
    pub criterion: LagCriterion,
    /// Maximum differencing passes per endogenous series.
    pub max_differencing: usize,
    /// Significance level for unit-root and diagnostic tests.
    pub significance: f64,
    /// Variance-inflation threshold for exogenous regressors.
    pub vif_threshold: f64,
    /// Ridge penalty used when an attempt enables regularization.
    pub ridge_alpha: f64,
    /// Confidence level of emitted intervals.
    pub ci_level: f64,
    /// Cap on the emitted interval half-width, in percentage points.
    pub ci_cap: f64,
    /// Default forecast horizon in months.
    pub horizon: usize,
    /// Lags for the ARCH-LM heteroskedasticity test.
    pub arch_lags: usize,
}

impl Default for VarConfig {
    fn default() -> Self {
        Self {
            min_history: 30,
            min_lag: 1,
            max_lag: 6,
            criterion: LagCriterion::Aic,
            max_differencing: 2,
            significance: 0.05,
            vif_threshold: 10.0,
            ridge_alpha: 0.1,
            ci_level: 0.95,
            ci_cap: 20.0,
            horizon: 36,
            arch_lags: 4,
        }
    }
}

impl VarConfig {
    /// Set the lag search range.
    pub fn with_lag_range(mut self, min_lag: usize, max_lag: usize) -> Self {
        self.min_lag = min_lag;
        self.max_lag = max_lag;
        self
    }

    /// Set the selection criterion.
    pub fn with_criterion(mut self, criterion: LagCriterion) -> Self {
        self.criterion = criterion;
        self
    }
}

/// Area ARIMAX settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArimaxConfig {
    /// Minimum panel length in months.
    pub min_history: usize,
    /// Largest AR order considered (search starts at 1).
    pub max_p: usize,
    /// Largest MA order considered (0 or 1).
    pub max_q: usize,
    /// Largest differencing order.
    pub max_d: usize,
    /// Criterion for order selection.
    pub criterion: LagCriterion,
    /// Significance level of the unit-root test.
    pub significance: f64,
    /// Local features are kept only when their p-value is below this.
    pub feature_significance: f64,
    /// Ridge penalty used when an attempt enables regularization.
    pub ridge_alpha: f64,
    /// Residual bootstrap draws for the intervals.
    pub bootstrap_draws: usize,
    /// Seed of the residual bootstrap.
    pub seed: u64,
    /// Confidence level of emitted intervals.
    pub ci_level: f64,
    /// Cap on the emitted interval half-width, in percentage points.
    pub ci_cap: f64,
    /// Default forecast horizon in months.
    pub horizon: usize,
    /// Window of event dummies, in months after the event.
    pub event_window_months: usize,
    /// Time budget for one order grid search.
    pub attempt_timeout_ms: u64,
    /// Lags for the ARCH-LM heteroskedasticity test.
    pub arch_lags: usize,
}

impl Default for ArimaxConfig {
    fn default() -> Self {
        Self {
            min_history: 24,
            max_p: 6,
            max_q: 1,
            max_d: 1,
            criterion: LagCriterion::Aic,
            significance: 0.05,
            feature_significance: 0.10,
            ridge_alpha: 0.1,
            bootstrap_draws: 1000,
            seed: 42,
            ci_level: 0.95,
            ci_cap: 30.0,
            horizon: 24,
            event_window_months: 6,
            attempt_timeout_ms: 5_000,
            arch_lags: 4,
        }
    }
}

impl ArimaxConfig {
    /// Set the maximum (p, d, q) orders.
    pub fn with_max_orders(mut self, max_p: usize, max_d: usize, max_q: usize) -> Self {
        self.max_p = max_p;
        self.max_d = max_d;
        self.max_q = max_q;
        self
    }

    /// Set the bootstrap draws and seed.
    pub fn with_bootstrap(mut self, draws: usize, seed: u64) -> Self {
        self.bootstrap_draws = draws;
        self.seed = seed;
        self
    }
}

/// Retry grid and failure budgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Upper bound on retry attempts after the primary fit.
    pub max_retries: usize,
    /// Ordered retry variants for regional VAR fits.
    pub region_grid: Vec<RetryVariant>,
    /// Ordered retry variants for area ARIMAX fits.
    pub area_grid: Vec<RetryVariant>,
    /// Share of regions allowed to end in fallback or be skipped.
    pub max_region_failure_ratio: f64,
    /// Share of areas allowed to end in fallback or be skipped.
    pub max_area_failure_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            region_grid: vec![
                RetryVariant::RidgeRegularized,
                RetryVariant::ReducedAr,
                RetryVariant::FixedLowOrder,
            ],
            area_grid: vec![
                RetryVariant::ReducedAr,
                RetryVariant::ArOnly,
                RetryVariant::FixedLowOrder,
            ],
            max_region_failure_ratio: 1.0 / 7.0,
            max_area_failure_ratio: 2.0 / 20.0,
        }
    }
}

/// Nearest-neighbour fallback settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Number of neighbours averaged.
    pub k: usize,
    /// Weight of the price-level distance.
    pub price_weight: f64,
    /// Weight of the transaction-volume distance.
    pub volume_weight: f64,
    /// Weight of the amenity-feature distance.
    pub amenity_weight: f64,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            k: 3,
            price_weight: 1.0,
            volume_weight: 1.0,
            amenity_weight: 1.0,
        }
    }
}

/// Monte Carlo propagation of regional uncertainty into areas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonteCarloConfig {
    /// Number of regional sample paths.
    pub draws: usize,
    /// Base seed; each (scenario, area, draw) derives its own stream.
    pub seed: u64,
    /// Lower percentile of the emitted interval.
    pub lower_percentile: f64,
    /// Upper percentile of the emitted interval.
    pub upper_percentile: f64,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            draws: 1000,
            seed: 7,
            lower_percentile: 2.5,
            upper_percentile: 97.5,
        }
    }
}

/// Expanding-window backtest settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CvConfig {
    /// Number of folds.
    pub folds: usize,
    /// Forecast horizon evaluated in each fold.
    pub horizon: usize,
    /// Months between consecutive cutoffs.
    pub step_months: usize,
    /// Regional RMSE acceptance threshold, in percentage points.
    pub region_rmse_threshold: f64,
    /// Area RMSE acceptance threshold, in percentage points.
    pub area_rmse_threshold: f64,
    /// Directional accuracy acceptance threshold.
    pub directional_accuracy_threshold: f64,
}

impl Default for CvConfig {
    fn default() -> Self {
        Self {
            folds: 5,
            horizon: 12,
            step_months: 6,
            region_rmse_threshold: 5.0,
            area_rmse_threshold: 8.0,
            directional_accuracy_threshold: 0.70,
        }
    }
}

impl CvConfig {
    /// Set the number of folds and months between cutoffs.
    pub fn with_folds(mut self, folds: usize, step_months: usize) -> Self {
        self.folds = folds;
        self.step_months = step_months;
        self
    }

    /// Set the evaluated horizon.
    pub fn with_horizon(mut self, horizon: usize) -> Self {
        self.horizon = horizon;
        self
    }
}

/// Scenarios forecast by a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub scenarios: Vec<Scenario>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            scenarios: Scenario::defaults(),
        }
    }
}

/// Complete configuration of one pipeline run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub data: DataConfig,
    pub var: VarConfig,
    pub arimax: ArimaxConfig,
    pub retry: RetryConfig,
    pub similarity: SimilarityConfig,
    pub monte_carlo: MonteCarloConfig,
    pub cv: CvConfig,
    pub scenario: ScenarioConfig,
}

impl PipelineConfig {
    /// Parse a configuration from JSON; absent fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Check value ranges and cross-field consistency.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(ForecastError::InvalidParameter(msg.to_string()));

        if self.var.min_lag == 0 || self.var.min_lag > self.var.max_lag {
            return invalid("var lag range must satisfy 1 <= min_lag <= max_lag");
        }
        if self.arimax.max_p == 0 {
            return invalid("arimax max_p must be at least 1");
        }
        if self.arimax.max_q > 1 {
            return invalid("arimax supports MA orders 0 and 1 only");
        }
        if self.arimax.max_d > 1 {
            return invalid("arimax supports differencing orders 0 and 1 only");
        }
        for level in [self.var.ci_level, self.arimax.ci_level] {
            if !(0.0 < level && level < 1.0) {
                return invalid("confidence levels must lie in (0, 1)");
            }
        }
        for cap in [self.var.ci_cap, self.arimax.ci_cap, self.data.appreciation_bound] {
            if cap <= 0.0 {
                return invalid("caps and bounds must be positive");
            }
        }
        if self.var.ridge_alpha <= 0.0 || self.arimax.ridge_alpha <= 0.0 {
            return invalid("ridge penalties must be positive");
        }
        if self.arimax.bootstrap_draws == 0 || self.monte_carlo.draws == 0 {
            return invalid("bootstrap and Monte Carlo draws must be positive");
        }
        if self.monte_carlo.lower_percentile >= self.monte_carlo.upper_percentile {
            return invalid("Monte Carlo percentiles must be ordered");
        }
        if self.similarity.k == 0 {
            return invalid("similarity k must be positive");
        }
        if self.cv.folds == 0 || self.cv.horizon == 0 || self.cv.step_months == 0 {
            return invalid("cross-validation folds, horizon and step must be positive");
        }
        let mut names: Vec<&str> = self.scenario.scenarios.iter().map(|s| s.name.as_str()).collect();
        names.sort_unstable();
        if names.windows(2).any(|w| w[0] == w[1]) {
            return invalid("scenario names must be unique");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_thresholds() {
        let config = PipelineConfig::default();
        assert_eq!(config.var.min_history, 30);
        assert_eq!(config.arimax.min_history, 24);
        assert_eq!(config.var.max_lag, 6);
        assert_eq!(config.var.vif_threshold, 10.0);
        assert_eq!(config.var.ci_cap, 20.0);
        assert_eq!(config.arimax.ci_cap, 30.0);
        assert_eq!(config.arimax.bootstrap_draws, 1000);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.cv.folds, 5);
        assert_eq!(config.similarity.k, 3);
        assert_eq!(config.data.appreciation_bound, 50.0);
        assert_eq!(config.scenario.scenarios.len(), 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn json_overrides_keep_other_defaults() {
        let json = r#"{ "var": { "max_lag": 4, "criterion": "bic" }, "cv": { "folds": 3 } }"#;
        let config = PipelineConfig::from_json_str(json).unwrap();

        assert_eq!(config.var.max_lag, 4);
        assert_eq!(config.var.criterion, LagCriterion::Bic);
        assert_eq!(config.var.min_history, 30);
        assert_eq!(config.cv.folds, 3);
        assert_eq!(config.cv.horizon, 12);
    }

    #[test]
    fn validate_rejects_inconsistent_values() {
        let mut config = PipelineConfig::default();
        config.var.min_lag = 7;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.arimax.max_q = 2;
        assert!(config.validate().is_err());

        let json = r#"{ "monte_carlo": { "draws": 0 } }"#;
        assert!(PipelineConfig::from_json_str(json).is_err());

        let json = r#"{ "scenario": { "scenarios": [{ "name": "a" }, { "name": "a" }] } }"#;
        assert!(PipelineConfig::from_json_str(json).is_err());
    }

    #[test]
    fn builder_setters() {
        let var = VarConfig::default()
            .with_lag_range(1, 3)
            .with_criterion(LagCriterion::Bic);
        assert_eq!(var.max_lag, 3);
        assert_eq!(var.criterion, LagCriterion::Bic);

        let cv = CvConfig::default().with_folds(3, 4).with_horizon(6);
        assert_eq!((cv.folds, cv.step_months, cv.horizon), (3, 4, 6));
    }
}
