//! Benchmarks for the model fits and Monte Carlo propagation.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use housing_forecast::config::{ArimaxConfig, MonteCarloConfig, VarConfig};
use housing_forecast::core::{
    Forecast, ForecastKey, ForecastSource, GeoLevel, IntervalPath, ModelKind, Month,
    TimeSeriesPanel,
};
use housing_forecast::models::{AreaArimaxModel, RegionalVarModel};
use housing_forecast::pipeline::{propagate, GaussianPath};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

fn start() -> Month {
    Month::new(2010, 1).unwrap()
}

fn region_panel(n: usize) -> TimeSeriesPanel {
    let mut rng = StdRng::seed_from_u64(42);
    let mut appreciation = vec![0.5; n];
    let mut volume = vec![300.0; n];
    let mut price = vec![6000.0; n];
    for t in 1..n {
        appreciation[t] = 0.2 + 0.5 * appreciation[t - 1] + rng.gen_range(-0.3..0.3);
        volume[t] = 150.0 + 0.5 * volume[t - 1] + rng.gen_range(-20.0..20.0);
        price[t] = price[t - 1] * (1.0 + appreciation[t] / 100.0);
    }
    TimeSeriesPanel::new("central", GeoLevel::Region, start().range(n), appreciation, volume, price)
        .unwrap()
        .with_exogenous("interest_rate", (0..n).map(|t| 2.5 + (t as f64 / 9.0).sin()).collect())
        .unwrap()
}

fn area_panel(n: usize, signal: &[f64]) -> TimeSeriesPanel {
    let mut rng = StdRng::seed_from_u64(7);
    let appreciation: Vec<f64> = signal.iter().map(|s| 0.1 + s + rng.gen_range(-0.2..0.2)).collect();
    TimeSeriesPanel::new("bishan", GeoLevel::Area, start().range(n), appreciation, vec![40.0; n], vec![9000.0; n])
        .unwrap()
        .with_parent("central")
}

fn bench_var_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("var_fit");
    let config = VarConfig::default();

    for size in [48, 96, 192].iter() {
        let panel = region_panel(*size);
        group.bench_with_input(BenchmarkId::new("RegionalVar", size), size, |b, _| {
            b.iter(|| RegionalVarModel::fit(black_box(&panel), &config))
        });
    }

    group.finish();
}

fn bench_arimax_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("arimax_fit");
    let config = ArimaxConfig::default().with_bootstrap(200, 1);

    for size in [48, 96].iter() {
        let signal: Vec<f64> = (0..*size).map(|t| 0.5 + 0.3 * (t as f64 / 4.0).cos()).collect();
        let panel = area_panel(*size, &signal);
        group.bench_with_input(BenchmarkId::new("AreaArimax", size), size, |b, _| {
            b.iter(|| AreaArimaxModel::fit(black_box(&panel), &signal, &config))
        });
    }

    group.finish();
}

fn bench_monte_carlo(c: &mut Criterion) {
    let mut group = c.benchmark_group("monte_carlo");
    let n = 96;
    let signal: Vec<f64> = (0..n).map(|t| 0.5 + 0.3 * (t as f64 / 4.0).cos()).collect();
    let model = AreaArimaxModel::fit(&area_panel(n, &signal), &signal, &ArimaxConfig::default().with_bootstrap(200, 1))
        .unwrap();
    let regional = Forecast::from_intervals(
        ForecastKey::new("central".into(), GeoLevel::Region, "baseline"),
        ForecastSource::Model(ModelKind::Var),
        start().offset(n as i32),
        IntervalPath::symmetric(vec![0.5; 36], &vec![0.8; 36]).unwrap(),
        20.0,
    )
    .unwrap();
    let path = GaussianPath::from_forecast(&regional, 0.95);
    let features = BTreeMap::new();

    for draws in [500, 2000, 10000].iter() {
        let config = MonteCarloConfig {
            draws: *draws,
            ..MonteCarloConfig::default()
        };
        group.bench_with_input(BenchmarkId::new("propagate", draws), draws, |b, _| {
            b.iter(|| propagate(&model, black_box(&path), &features, "baseline", 36, &config))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_var_fit, bench_arimax_fit, bench_monte_carlo);
criterion_main!(benches);
