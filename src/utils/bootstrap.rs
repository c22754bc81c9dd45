//! Residual bootstrap for forecast uncertainty.
//!
//! Area models simulate future paths by feeding resampled residuals through
//! their recursion; this module supplies the seeded resampling and the
//! per-step percentile bands.

use crate::error::{ForecastError, Result};
use crate::utils::stats::{mean, percentile_sorted};
use rand::prelude::*;
use rand::SeedableRng;

/// Configuration for bootstrap interval estimation.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapConfig {
    /// Number of bootstrap samples to generate.
    pub n_samples: usize,
    /// Block size for block bootstrap (None for residual bootstrap).
    pub block_size: Option<usize>,
    /// Random seed.
    pub seed: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            n_samples: 1000,
            block_size: None,
            seed: 42,
        }
    }
}

impl BootstrapConfig {
    /// Create a new bootstrap config with specified number of samples.
    pub fn new(n_samples: usize) -> Self {
        Self {
            n_samples,
            ..Default::default()
        }
    }

    /// Use block bootstrap with specified block size.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = Some(block_size);
        self
    }

    /// Set random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Draws shock sequences from a pool of centered residuals.
#[derive(Debug, Clone)]
pub struct ResidualSampler {
    pool: Vec<f64>,
    block_size: Option<usize>,
}

impl ResidualSampler {
    /// Build a sampler; residuals are centered so shocks have zero mean.
    pub fn new(residuals: &[f64]) -> Result<Self> {
        let valid: Vec<f64> = residuals.iter().copied().filter(|r| r.is_finite()).collect();
        if valid.is_empty() {
            return Err(ForecastError::ComputationError(
                "no valid residuals for bootstrap".to_string(),
            ));
        }
        let m = mean(&valid);
        Ok(Self {
            pool: valid.into_iter().map(|r| r - m).collect(),
            block_size: None,
        })
    }

    pub fn with_block_size(mut self, block_size: Option<usize>) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// A shock sequence of the given length.
    pub fn draw<R: Rng + ?Sized>(&self, len: usize, rng: &mut R) -> Vec<f64> {
        match self.block_size {
            Some(bs) if bs > 1 && bs <= self.pool.len() => resample_blocks(&self.pool, bs, len, rng),
            _ => resample_residuals(&self.pool, len, rng),
        }
    }
}

/// Resample residuals with replacement (residual bootstrap).
fn resample_residuals<R: Rng + ?Sized>(residuals: &[f64], len: usize, rng: &mut R) -> Vec<f64> {
    let n = residuals.len();
    (0..len).map(|_| residuals[rng.gen_range(0..n)]).collect()
}

/// Resample contiguous blocks (preserves short-range autocorrelation).
fn resample_blocks<R: Rng + ?Sized>(
    residuals: &[f64],
    block_size: usize,
    len: usize,
    rng: &mut R,
) -> Vec<f64> {
    let n = residuals.len();
    let mut result = Vec::with_capacity(len + block_size);
    while result.len() < len {
        let start = rng.gen_range(0..=(n - block_size));
        result.extend_from_slice(&residuals[start..start + block_size]);
    }
    result.truncate(len);
    result
}

/// Simulate `config.n_samples` paths of length `horizon` and return the
/// per-step empirical percentiles `(lower, upper)`.
///
/// `simulate` maps a shock sequence to a simulated path.
pub fn bootstrap_bands<F>(
    sampler: &ResidualSampler,
    horizon: usize,
    config: &BootstrapConfig,
    lower_pct: f64,
    upper_pct: f64,
    simulate: F,
) -> Result<(Vec<f64>, Vec<f64>)>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    if config.n_samples == 0 {
        return Err(ForecastError::InvalidParameter(
            "bootstrap needs at least one sample".to_string(),
        ));
    }
    let mut rng = StdRng::seed_from_u64(config.seed);
    let sampler = sampler.clone().with_block_size(config.block_size);
    let mut samples: Vec<Vec<f64>> = vec![Vec::with_capacity(config.n_samples); horizon];

    for _ in 0..config.n_samples {
        let shocks = sampler.draw(horizon, &mut rng);
        for (h, value) in simulate(&shocks).into_iter().enumerate().take(horizon) {
            if value.is_finite() {
                samples[h].push(value);
            }
        }
    }

    Ok(percentile_bands(samples, lower_pct, upper_pct))
}

/// Per-step percentiles of sample columns; empty columns yield NaN.
pub fn percentile_bands(
    mut samples: Vec<Vec<f64>>,
    lower_pct: f64,
    upper_pct: f64,
) -> (Vec<f64>, Vec<f64>) {
    let mut lower = Vec::with_capacity(samples.len());
    let mut upper = Vec::with_capacity(samples.len());
    for column in &mut samples {
        column.retain(|v| v.is_finite());
        column.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        lower.push(percentile_sorted(column, lower_pct));
        upper.push(percentile_sorted(column, upper_pct));
    }
    (lower, upper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn bootstrap_config_builder() {
        let config = BootstrapConfig::new(500).with_block_size(10).with_seed(7);
        assert_eq!(config.n_samples, 500);
        assert_eq!(config.block_size, Some(10));
        assert_eq!(config.seed, 7);
        assert_eq!(BootstrapConfig::default().n_samples, 1000);
    }

    #[test]
    fn sampler_centers_residuals() {
        let sampler = ResidualSampler::new(&[1.0, 2.0, 3.0, f64::NAN]).unwrap();
        assert_eq!(sampler.len(), 3);
        let mut rng = StdRng::seed_from_u64(1);
        let draws = sampler.draw(200, &mut rng);
        assert_eq!(draws.len(), 200);
        assert!(draws.iter().all(|d| [-1.0, 0.0, 1.0].contains(d)));
        assert!(ResidualSampler::new(&[f64::NAN]).is_err());
    }

    #[test]
    fn block_draws_have_requested_length() {
        let residuals: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let sampler = ResidualSampler::new(&residuals)
            .unwrap()
            .with_block_size(Some(3));
        let mut rng = StdRng::seed_from_u64(42);
        assert_eq!(sampler.draw(7, &mut rng).len(), 7);
    }

    #[test]
    fn random_walk_bands_widen_and_are_reproducible() {
        let residuals: Vec<f64> = (0..50).map(|i| ((i * 37 % 11) as f64 - 5.0) / 5.0).collect();
        let sampler = ResidualSampler::new(&residuals).unwrap();
        let config = BootstrapConfig::new(400).with_seed(11);
        let walk = |shocks: &[f64]| -> Vec<f64> {
            let mut level = 0.0;
            shocks
                .iter()
                .map(|s| {
                    level += s;
                    level
                })
                .collect()
        };

        let (lower, upper) = bootstrap_bands(&sampler, 6, &config, 2.5, 97.5, walk).unwrap();
        assert!(upper[5] - lower[5] > upper[0] - lower[0]);
        for h in 0..6 {
            assert!(lower[h] <= upper[h]);
        }

        let (lower2, _) = bootstrap_bands(&sampler, 6, &config, 2.5, 97.5, walk).unwrap();
        for h in 0..6 {
            assert_relative_eq!(lower[h], lower2[h]);
        }
    }

    #[test]
    fn empty_band_columns_are_nan() {
        let (lower, upper) = percentile_bands(vec![vec![], vec![1.0, 3.0]], 0.0, 100.0);
        assert!(lower[0].is_nan() && upper[0].is_nan());
        assert_eq!((lower[1], upper[1]), (1.0, 3.0));
    }
}
