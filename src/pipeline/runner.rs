//! Hierarchical orchestration: regions first, then their areas.
//!
//! A run has four phases. Regions are fitted in parallel; each fitted region
//! is forecast under every scenario and failed regions get fallback
//! forecasts. Areas are then fitted in parallel against their parent's
//! in-sample signal, and forecast under every scenario from the parent's
//! forecast for that scenario with Monte Carlo intervals. Failed areas go
//! to the fallback ladder last, once every model-based area forecast exists.

use crate::config::PipelineConfig;
use crate::core::{
    ExogenousPath, FallbackKind, FitStatus, Forecast, ForecastSource, ForecastTable, GeoLevel,
    GeographyId, TimeSeriesPanel,
};
use crate::data::TimeSeriesDataset;
use crate::error::{ForecastError, Result};
use crate::models::{AreaArimaxModel, FittedModel, RegionalVarModel};
use crate::pipeline::monte_carlo::{area_forecast, GaussianPath};
use crate::pipeline::report::{GeographyOutcome, GeographyReport, RunReport};
use crate::pipeline::scenario::{baseline_path, Scenario};
use crate::recovery::{
    ExternalPredictor, FallbackRequest, FitOutcome, PeerForecast, RecoveryController, RecoveryTrace,
};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Forecasts and the run report of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Every (geography, scenario) forecast. Skipped geographies are absent.
    pub forecasts: ForecastTable,
    pub report: RunReport,
}

/// Fits and forecasts a two-level region/area hierarchy under a set of
/// scenarios.
#[derive(Debug)]
pub struct HierarchicalPipeline {
    config: PipelineConfig,
    controller: RecoveryController,
}

impl HierarchicalPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let controller = RecoveryController::from_config(&config, None);
        Ok(Self { config, controller })
    }

    /// Enable the external-model fallback.
    pub fn with_external_predictor(mut self, predictor: Arc<dyn ExternalPredictor>) -> Self {
        self.controller = RecoveryController::from_config(&self.config, Some(predictor));
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run with the configured horizons, holding macro variables at their
    /// last observed values.
    #[instrument(skip_all, fields(regions = dataset.regions().len(), areas = dataset.areas().len()))]
    pub fn run(&self, dataset: &TimeSeriesDataset, scenarios: &[Scenario]) -> Result<PipelineOutput> {
        self.run_with(
            dataset,
            scenarios,
            None,
            self.config.var.horizon,
            self.config.arimax.horizon,
        )
    }

    /// Run the scenarios listed in the configuration.
    pub fn run_configured(&self, dataset: &TimeSeriesDataset) -> Result<PipelineOutput> {
        self.run(dataset, &self.config.scenario.scenarios)
    }

    /// Run with explicit horizons and an optional macro outlook that
    /// replaces the held-flat baseline path.
    pub(crate) fn run_with(
        &self,
        dataset: &TimeSeriesDataset,
        scenarios: &[Scenario],
        outlook: Option<&ExogenousPath>,
        region_horizon: usize,
        area_horizon: usize,
    ) -> Result<PipelineOutput> {
        check_scenarios(scenarios)?;
        if region_horizon == 0 || area_horizon == 0 {
            return Err(ForecastError::InvalidParameter(
                "forecast horizons must be positive".to_string(),
            ));
        }

        let mut regions = self.fit_regions(dataset);
        self.forecast_regions(&mut regions, scenarios, outlook, region_horizon);
        let region_fallbacks = self.region_fallbacks(&regions, scenarios, region_horizon);
        apply_fallbacks(&mut regions, region_fallbacks);
        info!(
            fitted = regions.iter().filter(|r| r.model.is_some()).count(),
            total = regions.len(),
            "regional phase complete"
        );

        let by_id: HashMap<&GeographyId, &GeographyRun<'_, RegionalVarModel>> =
            regions.iter().map(|r| (r.panel.geography(), r)).collect();
        let mut areas = self.fit_areas(dataset, &by_id);
        self.forecast_areas(&mut areas, &by_id, scenarios, area_horizon);
        let area_fallbacks = self.area_fallbacks(&areas, &by_id, scenarios, area_horizon);
        drop(by_id);
        apply_fallbacks(&mut areas, area_fallbacks);
        info!(
            fitted = areas.iter().filter(|a| a.model.is_some()).count(),
            total = areas.len(),
            "area phase complete"
        );

        let mut forecasts = Vec::new();
        let mut entries = Vec::with_capacity(regions.len() + areas.len());
        for run in regions {
            let (entry, mut f) = run.finish();
            entries.push(entry);
            forecasts.append(&mut f);
        }
        for run in areas {
            let (entry, mut f) = run.finish();
            entries.push(entry);
            forecasts.append(&mut f);
        }

        let mut report = RunReport::new(
            scenarios.iter().map(|s| s.name.clone()).collect(),
            entries,
            dataset.exclusions().to_vec(),
        );
        let retry = self.controller.retry_config();
        if report.check_budgets(retry.max_region_failure_ratio, retry.max_area_failure_ratio) {
            for warning in &report.warnings {
                warn!("{warning}");
            }
        }
        Ok(PipelineOutput {
            forecasts: ForecastTable::new(forecasts),
            report,
        })
    }

    fn fit_regions<'a>(&self, dataset: &'a TimeSeriesDataset) -> Vec<GeographyRun<'a, RegionalVarModel>> {
        dataset
            .regions()
            .par_iter()
            .map(|panel| {
                let fitted = self.controller.fit_with_retries(panel.geography(), GeoLevel::Region, |options| {
                    RegionalVarModel::fit_with(panel, &self.config.var, options)
                });
                GeographyRun::new(panel, fitted)
            })
            .collect()
    }

    fn forecast_regions(
        &self,
        regions: &mut [GeographyRun<'_, RegionalVarModel>],
        scenarios: &[Scenario],
        outlook: Option<&ExogenousPath>,
        horizon: usize,
    ) {
        regions.par_iter_mut().for_each(|run| {
            let Some(model) = run.model.as_ref() else {
                return;
            };
            let baseline = baseline_path(run.panel.exogenous(), horizon, outlook);
            let results: Vec<(String, Result<Forecast>)> = scenarios
                .iter()
                .map(|s| (s.name.clone(), model.forecast(&s.name, horizon, &s.apply(&baseline, horizon))))
                .collect();
            run.accept(results, horizon);
        });
    }

    fn region_fallbacks<'a>(
        &self,
        regions: &[GeographyRun<'a, RegionalVarModel>],
        scenarios: &[Scenario],
        horizon: usize,
    ) -> Vec<FallbackResult> {
        regions
            .par_iter()
            .enumerate()
            .filter(|(_, run)| run.needs_fallback(scenarios.len()))
            .map(|(i, run)| {
                let mut trace = run.trace.clone();
                let forecasts = scenarios
                    .iter()
                    .filter(|s| !run.forecasts.contains_key(&s.name))
                    .map(|s| {
                        let request = FallbackRequest::new(run.panel, &s.name, horizon, self.config.var.ci_cap)
                            .with_ci_level(self.config.var.ci_level)
                            .with_peers(peers(regions, i, &s.name));
                        self.controller.run_fallbacks(&request, &mut trace)
                    })
                    .collect();
                (i, forecasts, trace)
            })
            .collect()
    }

    fn fit_areas<'a>(
        &self,
        dataset: &'a TimeSeriesDataset,
        regions: &HashMap<&GeographyId, &GeographyRun<'_, RegionalVarModel>>,
    ) -> Vec<GeographyRun<'a, AreaArimaxModel>> {
        dataset
            .areas()
            .par_iter()
            .map(|panel| {
                let parent = panel.parent().and_then(|id| regions.get(id));
                let signal = match parent {
                    Some(run) => {
                        let source = match &run.model {
                            Some(model) => model.in_sample_signal(),
                            None => run.panel.appreciation().to_vec(),
                        };
                        align_signal(panel, run.panel, &source)
                    }
                    None => vec![0.0; panel.len()],
                };
                let fitted = self.controller.fit_with_retries(panel.geography(), GeoLevel::Area, |options| {
                    AreaArimaxModel::fit_with(panel, &signal, dataset.interventions(), &self.config.arimax, options)
                });
                GeographyRun::new(panel, fitted)
            })
            .collect()
    }

    fn forecast_areas(
        &self,
        areas: &mut [GeographyRun<'_, AreaArimaxModel>],
        regions: &HashMap<&GeographyId, &GeographyRun<'_, RegionalVarModel>>,
        scenarios: &[Scenario],
        horizon: usize,
    ) {
        let features = BTreeMap::new();
        areas.par_iter_mut().for_each(|run| {
            let Some(model) = run.model.as_ref() else {
                return;
            };
            let parent = run.panel.parent().and_then(|id| regions.get(id));
            let results: Vec<(String, Result<Forecast>)> = scenarios
                .iter()
                .map(|s| {
                    let forecast = match parent.and_then(|p| p.forecasts.get(&s.name)) {
                        Some(regional) => {
                            let path = GaussianPath::from_forecast(regional, self.config.var.ci_level);
                            area_forecast(model, &path, &features, &s.name, horizon, &self.config.monte_carlo)
                        }
                        None => model.forecast(&s.name, horizon, &[], &features),
                    };
                    (s.name.clone(), forecast)
                })
                .collect();
            run.accept(results, horizon);
        });
    }

    fn area_fallbacks(
        &self,
        areas: &[GeographyRun<'_, AreaArimaxModel>],
        regions: &HashMap<&GeographyId, &GeographyRun<'_, RegionalVarModel>>,
        scenarios: &[Scenario],
        horizon: usize,
    ) -> Vec<FallbackResult> {
        areas
            .par_iter()
            .enumerate()
            .filter(|(_, run)| run.needs_fallback(scenarios.len()))
            .map(|(i, run)| {
                let parent = run.panel.parent().and_then(|id| regions.get(id));
                let mut trace = run.trace.clone();
                let forecasts = scenarios
                    .iter()
                    .filter(|s| !run.forecasts.contains_key(&s.name))
                    .map(|s| {
                        let mut request = FallbackRequest::new(run.panel, &s.name, horizon, self.config.arimax.ci_cap)
                            .with_ci_level(self.config.arimax.ci_level)
                            .with_peers(peers(areas, i, &s.name));
                        if let Some(p) = parent {
                            if let Some(regional) = p.forecasts.get(&s.name) {
                                request = request.with_parent(p.panel, regional);
                            }
                        }
                        self.controller.run_fallbacks(&request, &mut trace)
                    })
                    .collect();
                (i, forecasts, trace)
            })
            .collect()
    }
}

/// Index of a run, its fallback forecasts and the updated trace.
type FallbackResult = (usize, Vec<Forecast>, RecoveryTrace);

fn check_scenarios(scenarios: &[Scenario]) -> Result<()> {
    if scenarios.is_empty() {
        return Err(ForecastError::InvalidParameter(
            "at least one scenario is required".to_string(),
        ));
    }
    let mut seen = BTreeSet::new();
    for s in scenarios {
        if !seen.insert(s.name.as_str()) {
            return Err(ForecastError::InvalidParameter(format!(
                "duplicate scenario name '{}'",
                s.name
            )));
        }
    }
    Ok(())
}

/// `source` (aligned with `parent`'s months) re-indexed onto `area`'s
/// months, holding the edge values outside the parent's span.
fn align_signal(area: &TimeSeriesPanel, parent: &TimeSeriesPanel, source: &[f64]) -> Vec<f64> {
    let Some(first) = parent.first_month() else {
        return vec![0.0; area.len()];
    };
    let last = source.len().saturating_sub(1) as i32;
    area.months()
        .iter()
        .map(|m| {
            let i = first.months_until(*m).clamp(0, last) as usize;
            source.get(i).copied().unwrap_or(0.0)
        })
        .collect()
}

/// Model-based forecasts of every other run under `scenario`.
fn peers<'a, M>(runs: &'a [GeographyRun<'a, M>], skip: usize, scenario: &str) -> Vec<PeerForecast<'a>> {
    runs.iter()
        .enumerate()
        .filter(|(j, run)| *j != skip && run.model.is_some())
        .filter_map(|(_, run)| {
            run.forecasts
                .get(scenario)
                .filter(|f| !f.is_fallback())
                .map(|forecast| PeerForecast {
                    panel: run.panel,
                    forecast,
                })
        })
        .collect()
}

fn apply_fallbacks<M>(runs: &mut [GeographyRun<'_, M>], results: Vec<FallbackResult>) {
    for (i, forecasts, trace) in results {
        let run = &mut runs[i];
        run.trace = trace;
        for forecast in forecasts {
            if let ForecastSource::Fallback(kind) = forecast.source() {
                run.fallbacks.insert(forecast.scenario().to_string(), kind);
            }
            run.forecasts.insert(forecast.scenario().to_string(), forecast);
        }
    }
}

/// Working state of one geography during a run.
struct GeographyRun<'a, M> {
    panel: &'a TimeSeriesPanel,
    model: Option<M>,
    attempt: Option<String>,
    error: Option<ForecastError>,
    skipped: bool,
    trace: RecoveryTrace,
    forecasts: BTreeMap<String, Forecast>,
    fallbacks: BTreeMap<String, FallbackKind>,
}

impl<'a, M: FittedModel> GeographyRun<'a, M> {
    fn new(panel: &'a TimeSeriesPanel, (outcome, trace): (FitOutcome<M>, RecoveryTrace)) -> Self {
        let mut run = Self {
            panel,
            model: None,
            attempt: None,
            error: None,
            skipped: false,
            trace,
            forecasts: BTreeMap::new(),
            fallbacks: BTreeMap::new(),
        };
        match outcome {
            FitOutcome::Fitted { model, attempt } => {
                run.model = Some(model);
                run.attempt = Some(attempt.label);
            }
            FitOutcome::Skipped(err) => {
                run.skipped = true;
                run.error = Some(err);
            }
            FitOutcome::Failed(err) => run.error = Some(err),
        }
        run
    }

    /// Keep successful model forecasts; failures are traced and left to
    /// the fallback ladder.
    fn accept(&mut self, results: Vec<(String, Result<Forecast>)>, horizon: usize) {
        for (scenario, result) in results {
            match result {
                Ok(forecast) => {
                    self.forecasts.insert(scenario, forecast);
                }
                Err(err) => self.trace.record_forecast_failure(&scenario, horizon, &err),
            }
        }
    }

    fn needs_fallback(&self, scenarios: usize) -> bool {
        !self.skipped && self.forecasts.len() < scenarios
    }

    fn finish(self) -> (GeographyReport, Vec<Forecast>) {
        let outcome = if self.skipped {
            GeographyOutcome::Skipped
        } else if self.model.is_some() && self.fallbacks.is_empty() {
            GeographyOutcome::Modelled
        } else {
            GeographyOutcome::Fallback
        };
        let status = match (&self.model, &self.error) {
            (Some(model), _) => model.status().clone(),
            (None, Some(err)) => FitStatus::Failed {
                reason: err.to_string(),
            },
            (None, None) => FitStatus::Failed {
                reason: "no fit attempted".to_string(),
            },
        };
        let entry = GeographyReport {
            geography: self.panel.geography().clone(),
            level: self.panel.level(),
            outcome,
            status,
            model: self.model.as_ref().map(|m| m.summary()),
            attempt: self.attempt,
            fallbacks: self.fallbacks,
            trace: self.trace,
        };
        (entry, self.forecasts.into_values().collect())
    }
}
