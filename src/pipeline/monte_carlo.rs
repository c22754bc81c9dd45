//! Monte Carlo propagation of regional uncertainty into area forecasts.
//!
//! Composing the regional interval with the area model's own interval
//! understates compounded uncertainty, so each draw samples a regional
//! path from the regional forecast (Gaussian per step, σ recovered from the
//! analytic interval), pushes it through the area model's point recursion
//! and adds a bootstrap residual path. The area interval is taken from the
//! empirical percentiles of the draws.

use crate::config::MonteCarloConfig;
use crate::core::{Forecast, IntervalPath};
use crate::error::{ForecastError, Result};
use crate::models::{AreaArimaxModel, FittedModel};
use crate::utils::bootstrap::percentile_bands;
use crate::utils::stats::z_for_level;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Marginal Gaussian distribution of a regional forecast path.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianPath {
    pub mean: Vec<f64>,
    pub sd: Vec<f64>,
}

impl GaussianPath {
    /// Recover per-step σ from a symmetric interval at `ci_level`.
    pub fn from_forecast(forecast: &Forecast, ci_level: f64) -> Self {
        let z = z_for_level(ci_level);
        let sd = forecast
            .steps()
            .iter()
            .map(|s| ((s.upper - s.lower) / (2.0 * z)).max(0.0))
            .collect();
        Self {
            mean: forecast.points(),
            sd,
        }
    }

    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    /// One sampled path of `horizon` steps; steps beyond the regional
    /// horizon repeat the last distribution.
    pub fn sample<R: rand::Rng + ?Sized>(&self, horizon: usize, rng: &mut R) -> Vec<f64> {
        (0..horizon)
            .map(|h| {
                let i = h.min(self.len().saturating_sub(1));
                let z: f64 = StandardNormal.sample(rng);
                self.mean.get(i).copied().unwrap_or(0.0) + self.sd.get(i).copied().unwrap_or(0.0) * z
            })
            .collect()
    }
}

/// Independent stream seed for one (scenario, geography, draw).
pub fn stream_seed(base: u64, scenario: &str, geography: &str, draw: usize) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in scenario.bytes().chain([0xff]).chain(geography.bytes()) {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    splitmix64(base ^ splitmix64(hash ^ splitmix64(draw as u64)))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// Raw area interval path under `scenario`.
///
/// The point path is the area recursion on the regional mean path; the
/// bounds are the configured percentiles of `config.draws` simulated paths,
/// run in parallel.
pub fn propagate(
    model: &AreaArimaxModel,
    regional: &GaussianPath,
    features: &BTreeMap<String, f64>,
    scenario: &str,
    horizon: usize,
    config: &MonteCarloConfig,
) -> Result<IntervalPath> {
    if config.draws == 0 {
        return Err(ForecastError::InvalidParameter(
            "Monte Carlo needs at least one draw".to_string(),
        ));
    }
    if regional.is_empty() {
        return Err(ForecastError::EmptyData);
    }
    let geography = model.geography().as_str();
    let point = model.point_path(horizon, &regional.mean, features)?;

    let samples: Vec<Vec<f64>> = (0..config.draws)
        .into_par_iter()
        .map(|draw| -> Result<Vec<f64>> {
            let mut rng = StdRng::seed_from_u64(stream_seed(config.seed, scenario, geography, draw));
            let path = regional.sample(horizon, &mut rng);
            let central = model.point_path(horizon, &path, features)?;
            let noise = model.residual_path(&mut rng, horizon);
            Ok(central.iter().zip(&noise).map(|(c, e)| c + e).collect())
        })
        .collect::<Result<Vec<_>>>()?;

    let mut columns: Vec<Vec<f64>> = vec![Vec::with_capacity(config.draws); horizon];
    for sample in &samples {
        for (h, v) in sample.iter().enumerate() {
            columns[h].push(*v);
        }
    }
    let (lower, upper) = percentile_bands(columns, config.lower_percentile, config.upper_percentile);
    IntervalPath::new(point, lower, upper)
}

/// Finalized area forecast with Monte Carlo intervals.
pub fn area_forecast(
    model: &AreaArimaxModel,
    regional: &GaussianPath,
    features: &BTreeMap<String, f64>,
    scenario: &str,
    horizon: usize,
    config: &MonteCarloConfig,
) -> Result<Forecast> {
    let path = propagate(model, regional, features, scenario, horizon, config)?;
    model.finalize(scenario, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArimaxConfig;
    use crate::core::{ForecastKey, ForecastSource, GeoLevel, ModelKind, Month, TimeSeriesPanel};
    use approx::assert_relative_eq;
    use rand_distr::Normal;

    fn regional_forecast(sd: f64, horizon: usize) -> Forecast {
        let z = z_for_level(0.95);
        Forecast::from_intervals(
            ForecastKey::new("r".into(), GeoLevel::Region, "baseline"),
            ForecastSource::Model(ModelKind::Var),
            Month::new(2024, 1).unwrap(),
            IntervalPath::symmetric(vec![0.5; horizon], &vec![z * sd; horizon]).unwrap(),
            20.0,
        )
        .unwrap()
    }

    fn fitted_area() -> AreaArimaxModel {
        let n = 96;
        let mut rng = StdRng::seed_from_u64(3);
        let noise = Normal::new(0.0, 0.2).unwrap();
        let signal: Vec<f64> = (0..n).map(|t| 0.5 + 0.3 * ((t as f64) / 4.0).cos()).collect();
        let y: Vec<f64> = (0..n).map(|t| 0.1 + signal[t] + noise.sample(&mut rng)).collect();
        let panel = TimeSeriesPanel::new(
            "a",
            GeoLevel::Area,
            Month::new(2016, 1).unwrap().range(n),
            y,
            vec![10.0; n],
            vec![5000.0; n],
        )
        .unwrap();
        AreaArimaxModel::fit(&panel, &signal, &ArimaxConfig::default()).unwrap()
    }

    #[test]
    fn gaussian_path_recovers_sigma() {
        let g = GaussianPath::from_forecast(&regional_forecast(0.4, 6), 0.95);
        assert_eq!(g.len(), 6);
        for sd in &g.sd {
            assert_relative_eq!(*sd, 0.4, epsilon = 1e-9);
        }
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(g.sample(10, &mut rng).len(), 10);
    }

    #[test]
    fn seeds_differ_by_stream() {
        let a = stream_seed(7, "baseline", "a", 0);
        assert_eq!(a, stream_seed(7, "baseline", "a", 0));
        assert_ne!(a, stream_seed(7, "baseline", "a", 1));
        assert_ne!(a, stream_seed(7, "bearish", "a", 0));
        assert_ne!(a, stream_seed(7, "baseline", "b", 0));
    }

    #[test]
    fn regional_uncertainty_widens_area_interval() {
        let model = fitted_area();
        let config = MonteCarloConfig {
            draws: 400,
            ..Default::default()
        };
        let features = BTreeMap::new();
        let calm = propagate(&model, &GaussianPath::from_forecast(&regional_forecast(0.01, 12), 0.95), &features, "baseline", 12, &config).unwrap();
        let wild = propagate(&model, &GaussianPath::from_forecast(&regional_forecast(3.0, 12), 0.95), &features, "baseline", 12, &config).unwrap();
        let width = |p: &IntervalPath| p.upper[11] - p.lower[11];
        assert!(width(&wild) > width(&calm));
        assert_eq!(calm.point, wild.point);
    }

    #[test]
    fn propagation_is_reproducible() {
        let model = fitted_area();
        let regional = GaussianPath::from_forecast(&regional_forecast(0.5, 12), 0.95);
        let config = MonteCarloConfig {
            draws: 200,
            ..Default::default()
        };
        let features = BTreeMap::new();
        let a = area_forecast(&model, &regional, &features, "baseline", 12, &config).unwrap();
        let b = area_forecast(&model, &regional, &features, "baseline", 12, &config).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.level(), GeoLevel::Area);
    }
}
