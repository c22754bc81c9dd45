//! Expanding-window backtest of the whole hierarchy.

use crate::config::{CvConfig, PipelineConfig};
use crate::core::{Forecast, ForecastSource, GeoLevel, GeographyId, Month};
use crate::data::TimeSeriesDataset;
use crate::error::{ForecastError, Result};
use crate::pipeline::runner::HierarchicalPipeline;
use crate::pipeline::scenario::Scenario;
use crate::recovery::ExternalPredictor;
use crate::utils::metrics::calculate_metrics;
use crate::utils::stats::{mean, std_dev};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Accuracy of one geography in one fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldMetrics {
    pub fold: usize,
    pub cutoff: Month,
    pub geography: GeographyId,
    pub level: GeoLevel,
    pub rmse: f64,
    pub mae: f64,
    pub mape: Option<f64>,
    pub direction_correct: Option<bool>,
    pub stepwise_directional_accuracy: f64,
    /// Steps with a realized value.
    pub evaluated_steps: usize,
    /// Whether the fold forecast came from a model or a fallback.
    pub source: ForecastSource,
}

/// One backtest fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationFold {
    pub index: usize,
    pub cutoff: Month,
    pub metrics: Vec<FoldMetrics>,
    /// Run warnings of the fold, e.g. failure-budget breaches.
    pub warnings: Vec<String>,
}

/// Aggregate accuracy of one geography over all folds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeographyCvSummary {
    pub geography: GeographyId,
    pub level: GeoLevel,
    pub folds: usize,
    pub rmse: f64,
    pub rmse_std: f64,
    pub mae: f64,
    /// Mean MAPE, when every fold had one.
    pub mape: Option<f64>,
    /// Share of folds whose predicted direction matched, over folds with
    /// a non-flat realized move.
    pub directional_accuracy: Option<f64>,
    /// Folds served by a fallback estimate.
    pub fallback_folds: usize,
    pub accepted: bool,
}

/// Result of a backtest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvReport {
    pub horizon: usize,
    pub folds: Vec<ValidationFold>,
    pub summaries: Vec<GeographyCvSummary>,
}

impl CvReport {
    /// All per-fold rows, in fold order.
    pub fn fold_metrics(&self) -> impl Iterator<Item = &FoldMetrics> {
        self.folds.iter().flat_map(|f| f.metrics.iter())
    }

    pub fn summary(&self, geography: &GeographyId) -> Option<&GeographyCvSummary> {
        self.summaries.iter().find(|s| &s.geography == geography)
    }

    /// Share of geographies at `level` meeting the acceptance thresholds.
    pub fn acceptance_rate(&self, level: GeoLevel) -> Option<f64> {
        let at_level: Vec<_> = self.summaries.iter().filter(|s| s.level == level).collect();
        if at_level.is_empty() {
            return None;
        }
        Some(at_level.iter().filter(|s| s.accepted).count() as f64 / at_level.len() as f64)
    }
}

/// Runs the pipeline at a sequence of cutoffs and scores the baseline
/// forecasts against what was realized.
///
/// Each fold trains on everything up to its cutoff and uses the realized
/// macro values of the test window as the baseline path. Failures inside a
/// fold go through the same retry and fallback handling as a normal run.
#[derive(Debug)]
pub struct CrossValidationHarness {
    pipeline: HierarchicalPipeline,
    cv: CvConfig,
}

impl CrossValidationHarness {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let cv = config.cv.clone();
        if cv.folds == 0 || cv.horizon == 0 {
            return Err(ForecastError::InvalidParameter(
                "cross-validation needs at least one fold and a positive horizon".to_string(),
            ));
        }
        Ok(Self {
            pipeline: HierarchicalPipeline::new(config)?,
            cv,
        })
    }

    pub fn with_external_predictor(mut self, predictor: Arc<dyn ExternalPredictor>) -> Self {
        self.pipeline = self.pipeline.with_external_predictor(predictor);
        self
    }

    /// Fold cutoffs, earliest first. Fold `k` ends
    /// `horizon + (folds - 1 - k) * step` months before the last month.
    pub fn cutoffs(&self, dataset: &TimeSeriesDataset) -> Result<Vec<Month>> {
        let (first, last) = match (dataset.first_month(), dataset.last_month()) {
            (Some(f), Some(l)) => (f, l),
            _ => return Err(ForecastError::EmptyData),
        };
        let cutoffs: Vec<Month> = (0..self.cv.folds)
            .map(|k| {
                let back = self.cv.horizon + (self.cv.folds - 1 - k) * self.cv.step_months;
                last.offset(-(back as i32))
            })
            .filter(|c| *c >= first)
            .collect();
        if cutoffs.is_empty() {
            return Err(ForecastError::InsufficientData {
                needed: self.cv.horizon + 1,
                got: first.months_until(last) as usize + 1,
            });
        }
        if cutoffs.len() < self.cv.folds {
            warn!(
                requested = self.cv.folds,
                usable = cutoffs.len(),
                "history too short for every fold"
            );
        }
        Ok(cutoffs)
    }

    #[instrument(skip_all, fields(folds = self.cv.folds, horizon = self.cv.horizon))]
    pub fn run(&self, dataset: &TimeSeriesDataset) -> Result<CvReport> {
        let baseline = [Scenario::baseline()];
        let mut folds = Vec::new();
        for (index, cutoff) in self.cutoffs(dataset)?.into_iter().enumerate() {
            let train = dataset.truncate_through(cutoff);
            let outlook = dataset.macro_series().window(cutoff.succ(), self.cv.horizon);
            let output = self.pipeline.run_with(
                &train,
                &baseline,
                outlook.as_ref(),
                self.cv.horizon,
                self.cv.horizon,
            )?;
            let metrics: Vec<FoldMetrics> = output
                .forecasts
                .iter()
                .filter_map(|forecast| score(dataset, forecast, index, cutoff))
                .collect();
            info!(fold = index, %cutoff, scored = metrics.len(), "fold complete");
            folds.push(ValidationFold {
                index,
                cutoff,
                metrics,
                warnings: output.report.warnings,
            });
        }
        let summaries = summarize(&folds, &self.cv);
        Ok(CvReport {
            horizon: self.cv.horizon,
            folds,
            summaries,
        })
    }
}

/// Metrics of one fold forecast against the full dataset; `None` when no
/// forecast month has a realized value.
fn score(dataset: &TimeSeriesDataset, forecast: &Forecast, fold: usize, cutoff: Month) -> Option<FoldMetrics> {
    let panel = match forecast.level() {
        GeoLevel::Region => dataset.region(forecast.geography()),
        GeoLevel::Area => dataset.area(forecast.geography()),
    }?;
    let (actual, predicted): (Vec<f64>, Vec<f64>) = forecast
        .steps()
        .iter()
        .filter_map(|step| {
            panel
                .position(step.month)
                .map(|i| (panel.appreciation()[i], step.point))
        })
        .unzip();
    let metrics = match calculate_metrics(&actual, &predicted) {
        Ok(m) => m,
        Err(err) => {
            debug!(geography = %forecast.geography(), error = %err, "fold not scored");
            return None;
        }
    };
    Some(FoldMetrics {
        fold,
        cutoff,
        geography: forecast.geography().clone(),
        level: forecast.level(),
        rmse: metrics.rmse,
        mae: metrics.mae,
        mape: metrics.mape,
        direction_correct: metrics.direction_correct,
        stepwise_directional_accuracy: metrics.stepwise_directional_accuracy,
        evaluated_steps: actual.len(),
        source: forecast.source(),
    })
}

fn summarize(folds: &[ValidationFold], cv: &CvConfig) -> Vec<GeographyCvSummary> {
    let mut by_geography: BTreeMap<(GeoLevel, &GeographyId), Vec<&FoldMetrics>> = BTreeMap::new();
    for m in folds.iter().flat_map(|f| &f.metrics) {
        by_geography.entry((m.level, &m.geography)).or_default().push(m);
    }
    by_geography
        .into_iter()
        .map(|((level, geography), rows)| {
            let rmses: Vec<f64> = rows.iter().map(|m| m.rmse).collect();
            let maes: Vec<f64> = rows.iter().map(|m| m.mae).collect();
            let mapes: Option<Vec<f64>> = rows.iter().map(|m| m.mape).collect();
            let directions: Vec<bool> = rows.iter().filter_map(|m| m.direction_correct).collect();
            let directional_accuracy = (!directions.is_empty())
                .then(|| directions.iter().filter(|d| **d).count() as f64 / directions.len() as f64);
            let rmse = mean(&rmses);
            let threshold = match level {
                GeoLevel::Region => cv.region_rmse_threshold,
                GeoLevel::Area => cv.area_rmse_threshold,
            };
            let accepted = rmse < threshold
                && directional_accuracy.is_some_and(|da| da > cv.directional_accuracy_threshold);
            GeographyCvSummary {
                geography: geography.clone(),
                level,
                folds: rows.len(),
                rmse,
                rmse_std: if rows.len() > 1 { std_dev(&rmses) } else { 0.0 },
                mae: mean(&maes),
                mape: mapes.map(|m| mean(&m)),
                directional_accuracy,
                fallback_folds: rows.iter().filter(|m| m.source.is_fallback()).count(),
                accepted,
            }
        })
        .collect()
}
