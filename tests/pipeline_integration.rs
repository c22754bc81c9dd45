//! End-to-end runs: transactions to dataset, pipeline, storage and backtest.

use approx::assert_relative_eq;
use housing_forecast::config::{ArimaxConfig, CvConfig, PipelineConfig};
use housing_forecast::core::{
    FallbackKind, ForecastSource, GeoLevel, IntervalPath, Month, TimeSeriesPanel,
};
use housing_forecast::data::{MacroSeries, TimeSeriesDataset, Transaction};
use housing_forecast::error::Result;
use housing_forecast::io::{
    read_forecasts_parquet, write_cv_parquet, write_cv_summary_parquet, write_forecasts_parquet,
};
use housing_forecast::models::arimax::Intervention;
use housing_forecast::pipeline::{
    CrossValidationHarness, GeographyOutcome, HierarchicalPipeline, RunReport, Scenario, GDP_GROWTH,
    INTEREST_RATE,
};
use housing_forecast::recovery::{
    ExternalPredictor, FallbackRequest, RecoveryController, RegionalAverageFallback,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

const MONTHS: i32 = 72;

fn month(offset: i32) -> Month {
    Month::new(2017, 1).unwrap().offset(offset)
}

fn transactions() -> Vec<Transaction> {
    let layout = [
        ("central", ["bishan", "queenstown", "toa-payoh"], 9000.0, 1.004),
        ("north", ["yishun", "woodlands", "sembawang"], 6000.0, 1.006),
    ];
    let mut rng = StdRng::seed_from_u64(2024);
    let mut rows = Vec::new();
    for (region, areas, base, growth) in layout {
        for (i, area) in areas.iter().enumerate() {
            let level = base * (1.0 + 0.1 * i as f64);
            for t in 0..MONTHS {
                let trend = level * f64::powi(growth, t);
                for _ in 0..rng.gen_range(3..=6) {
                    let price_per_area = trend * (1.0 + rng.gen_range(-0.02..0.02));
                    rows.push(Transaction::new(region, *area, month(t), price_per_area * 95.0, 95.0));
                }
            }
        }
    }
    rows
}

fn macro_series() -> MacroSeries {
    MacroSeries::new()
        .with_column(
            INTEREST_RATE,
            (0..MONTHS).map(|t| (month(t), 2.5 + 0.75 * (t as f64 / 9.0).sin())),
        )
        .with_column(
            GDP_GROWTH,
            (0..MONTHS).map(|t| (month(t), 3.0 + (t as f64 / 13.0).cos())),
        )
}

fn dataset() -> TimeSeriesDataset {
    TimeSeriesDataset::builder(Default::default())
        .transactions(&transactions())
        .unwrap()
        .macro_series(macro_series())
        .static_feature("bishan", "mrt_score", 0.9)
        .static_feature("yishun", "mrt_score", 0.6)
        .intervention(Intervention::event("mrt-opening", month(40), 6))
        .build()
}

fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.arimax = ArimaxConfig::default().with_bootstrap(200, 5);
    config.monte_carlo.draws = 200;
    config.var.horizon = 12;
    config.arimax.horizon = 12;
    config
}

#[test]
fn dataset_is_built_from_transactions() {
    let dataset = dataset();
    assert_eq!(dataset.regions().len(), 2);
    assert_eq!(dataset.areas().len(), 6);
    assert!(dataset.exclusions().is_empty());
    let bishan = dataset.area(&"bishan".into()).unwrap();
    assert_eq!(bishan.parent().map(|p| p.as_str()), Some("central"));
    assert_eq!(bishan.len(), MONTHS as usize - 1);
    assert!(bishan.exogenous_column(INTEREST_RATE).is_some());
    assert_eq!(dataset.areas_of(&"north".into()).count(), 3);
}

#[test]
fn every_geography_gets_every_scenario() {
    let dataset = dataset();
    let config = fast_config();
    let output = HierarchicalPipeline::new(config.clone())
        .unwrap()
        .run(&dataset, &Scenario::defaults())
        .unwrap();

    assert_eq!(output.forecasts.len(), 8 * 4);
    for panel in dataset.regions().iter().chain(dataset.areas()) {
        for scenario in Scenario::defaults() {
            let forecast = output.forecasts.get(panel.geography(), &scenario.name).unwrap();
            assert_eq!(forecast.horizon(), 12);
            assert_eq!(forecast.first_month(), panel.last_month().map(|m| m.succ()));
            let cap = match panel.level() {
                GeoLevel::Region => config.var.ci_cap,
                GeoLevel::Area => config.arimax.ci_cap,
            };
            let steps = forecast.steps();
            for pair in steps.windows(2) {
                assert!(pair[1].lower_half_width() >= pair[0].lower_half_width() - 1e-9);
                assert!(pair[1].upper_half_width() >= pair[0].upper_half_width() - 1e-9);
            }
            for step in steps {
                assert!(step.lower <= step.point && step.point <= step.upper);
                assert!(step.half_width() <= cap + 1e-9);
            }
        }
    }

    let report = &output.report;
    assert_eq!(report.regions.total, 2);
    assert_eq!(report.areas.total, 6);
    assert_eq!(report.scenarios.len(), 4);
    for entry in &report.geographies {
        assert_eq!(
            entry.used_fallback(),
            output
                .forecasts
                .iter()
                .filter(|f| f.geography() == &entry.geography)
                .any(|f| f.is_fallback())
        );
    }
}

#[test]
fn outputs_round_trip_through_storage() {
    let output = HierarchicalPipeline::new(fast_config())
        .unwrap()
        .run(&dataset(), &[Scenario::baseline(), Scenario::policy_shock()])
        .unwrap();
    let dir = tempfile::tempdir().unwrap();

    let forecasts = dir.path().join("forecasts.parquet");
    write_forecasts_parquet(&output.forecasts, &forecasts).unwrap();
    assert_eq!(read_forecasts_parquet(&forecasts).unwrap(), output.forecasts);

    let report = dir.path().join("run_report.json");
    output.report.write_json(&report).unwrap();
    let text = std::fs::read_to_string(&report).unwrap();
    let restored = RunReport::from_json_str(&text).unwrap();
    assert_eq!(restored.geographies.len(), output.report.geographies.len());
    assert_eq!(restored.to_json_string().unwrap(), text);
}

#[test]
fn pipeline_is_deterministic() {
    let dataset = dataset();
    let pipeline = HierarchicalPipeline::new(fast_config()).unwrap();
    let a = pipeline.run(&dataset, &[Scenario::bullish()]).unwrap();
    let b = pipeline.run(&dataset, &[Scenario::bullish()]).unwrap();
    assert_eq!(a.forecasts, b.forecasts);
}

#[test]
fn backtest_scores_every_geography() {
    let mut config = fast_config();
    config.cv = CvConfig::default().with_folds(2, 6).with_horizon(6);
    let harness = CrossValidationHarness::new(config).unwrap();
    let dataset = dataset();
    let report = harness.run(&dataset).unwrap();

    assert_eq!(report.folds.len(), 2);
    assert_eq!(report.folds[1].cutoff, dataset.last_month().unwrap().offset(-6));
    for fold in &report.folds {
        assert_eq!(fold.metrics.len(), 8);
        assert!(fold.metrics.iter().all(|m| m.rmse.is_finite() && m.evaluated_steps == 6));
    }
    assert_eq!(report.summaries.len(), 8);
    assert!(report.summaries.iter().all(|s| s.folds == 2));

    let dir = tempfile::tempdir().unwrap();
    let folds = dir.path().join("cv_folds.parquet");
    let summary = dir.path().join("cv_summary.parquet");
    write_cv_parquet(&report, &folds).unwrap();
    write_cv_summary_parquet(&report, &summary).unwrap();
    assert!(std::fs::metadata(&folds).unwrap().len() > 0);
    assert!(std::fs::metadata(&summary).unwrap().len() > 0);
}

struct FlatPredictor;

impl ExternalPredictor for FlatPredictor {
    fn name(&self) -> &str {
        "flat"
    }

    fn predict(&self, _panel: &TimeSeriesPanel, _scenario: &str, horizon: usize) -> Result<IntervalPath> {
        IntervalPath::symmetric(vec![0.25; horizon], &vec![1.0; horizon])
    }
}

#[test]
fn external_predictor_serves_geographies_without_peers() {
    let config = PipelineConfig::default();
    let controller = RecoveryController::from_config(&config, Some(Arc::new(FlatPredictor)));
    let n = 40;
    let panel = TimeSeriesPanel::new(
        "west",
        GeoLevel::Region,
        month(0).range(n),
        vec![0.4; n],
        vec![100.0; n],
        vec![5000.0; n],
    )
    .unwrap();

    let mut trace = housing_forecast::recovery::RecoveryTrace::new("west".into(), GeoLevel::Region);
    let request = FallbackRequest::new(&panel, "baseline", 6, config.var.ci_cap);
    let forecast = controller.run_fallbacks(&request, &mut trace);

    assert_eq!(forecast.source(), ForecastSource::Fallback(FallbackKind::ExternalModel));
    assert_eq!(forecast.points(), vec![0.25; 6]);
    assert_eq!(trace.fallbacks, vec![FallbackKind::ExternalModel]);
}

#[test]
fn area_without_a_model_uses_its_region_and_breaches_budget() {
    let n = 60;
    let mut rng = StdRng::seed_from_u64(31);
    let mut appreciation = vec![0.6; n];
    let mut price = vec![5000.0; n];
    for t in 1..n {
        appreciation[t] = 0.3 + 0.5 * appreciation[t - 1] + rng.gen_range(-0.3..0.3);
        price[t] = price[t - 1] * (1.0 + appreciation[t] / 100.0);
    }
    let region = TimeSeriesPanel::new(
        "west",
        GeoLevel::Region,
        month(0).range(n),
        appreciation,
        (0..n).map(|_| 250.0 + rng.gen_range(-25.0..25.0)).collect(),
        price,
    )
    .unwrap();
    let area = TimeSeriesPanel::new(
        "jurong",
        GeoLevel::Area,
        month(0).range(n),
        (0..n).map(|t| f64::powi(1.08, t as i32) / 100.0).collect(),
        (0..n).map(|_| 35.0 + rng.gen_range(-5.0..5.0)).collect(),
        vec![5500.0; n],
    )
    .unwrap()
    .with_parent("west");
    let bias = RegionalAverageFallback::bias(&area, &region).unwrap();

    let dataset = TimeSeriesDataset::from_panels(vec![region], vec![area]);
    let output = HierarchicalPipeline::new(fast_config())
        .unwrap()
        .run(&dataset, &[Scenario::baseline()])
        .unwrap();

    let jurong = "jurong".into();
    let parent = output.forecasts.get(&"west".into(), "baseline").unwrap();
    let forecast = output.forecasts.get(&jurong, "baseline").unwrap();
    assert_eq!(forecast.source(), ForecastSource::Fallback(FallbackKind::RegionalAverage));
    assert_eq!(forecast.horizon(), parent.horizon());
    for (own, theirs) in forecast.points().iter().zip(parent.points()) {
        assert_relative_eq!(*own, theirs + bias, epsilon = 1e-9);
    }

    let entry = output.report.geography(&jurong).unwrap();
    assert_eq!(entry.outcome, GeographyOutcome::Fallback);
    assert_eq!(entry.trace.retries(), 3);
    assert_eq!(entry.trace.fallbacks, vec![FallbackKind::RegionalAverage]);
    assert_eq!(output.report.areas.fallback, 1);
    assert_eq!(output.report.regions.fallback, 0);
    assert!(output
        .report
        .warnings
        .iter()
        .any(|w| w.starts_with("area failure budget exceeded: 1 of 1")));
}
