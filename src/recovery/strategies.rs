//! Fallback estimators used once every fitting attempt has failed.
//!
//! Strategies are tried in a fixed order by the controller. Each one either
//! produces a forecast or explains why it cannot; the naïve strategy never
//! fails.

use crate::config::SimilarityConfig;
use crate::core::{
    FallbackKind, Forecast, ForecastKey, ForecastSource, GeoLevel, IntervalPath, Month,
    TimeSeriesPanel,
};
use crate::error::{ForecastError, Result};
use crate::recovery::similarity::{nearest, SimilarityProfile};
use crate::utils::stats::{autocorrelation, mean, std_dev, z_for_level};
use std::sync::Arc;

/// A forecast already produced by a fitted model for another geography.
#[derive(Debug, Clone, Copy)]
pub struct PeerForecast<'a> {
    pub panel: &'a TimeSeriesPanel,
    pub forecast: &'a Forecast,
}

/// Everything a fallback strategy may draw on for one geography.
#[derive(Debug, Clone)]
pub struct FallbackRequest<'a> {
    pub panel: &'a TimeSeriesPanel,
    pub scenario: &'a str,
    pub horizon: usize,
    /// Interval cap of the geography's level.
    pub ci_cap: f64,
    /// Confidence level of the emitted intervals.
    pub ci_level: f64,
    /// Owning region's panel, for areas.
    pub parent_panel: Option<&'a TimeSeriesPanel>,
    /// Owning region's forecast under the same scenario, for areas.
    pub parent_forecast: Option<&'a Forecast>,
    /// Model-based forecasts of same-level geographies under the same scenario.
    pub peers: Vec<PeerForecast<'a>>,
}

impl<'a> FallbackRequest<'a> {
    pub fn new(panel: &'a TimeSeriesPanel, scenario: &'a str, horizon: usize, ci_cap: f64) -> Self {
        Self {
            panel,
            scenario,
            horizon,
            ci_cap,
            ci_level: 0.95,
            parent_panel: None,
            parent_forecast: None,
            peers: Vec::new(),
        }
    }

    pub fn with_ci_level(mut self, level: f64) -> Self {
        self.ci_level = level;
        self
    }

    pub fn with_parent(mut self, panel: &'a TimeSeriesPanel, forecast: &'a Forecast) -> Self {
        self.parent_panel = Some(panel);
        self.parent_forecast = Some(forecast);
        self
    }

    pub fn with_peers(mut self, peers: Vec<PeerForecast<'a>>) -> Self {
        self.peers = peers;
        self
    }

    fn first_month(&self) -> Result<Month> {
        self.panel
            .last_month()
            .map(|m| m.succ())
            .ok_or(ForecastError::EmptyData)
    }

    fn finalize(&self, kind: FallbackKind, path: IntervalPath) -> Result<Forecast> {
        Forecast::from_intervals(
            ForecastKey::new(self.panel.geography().clone(), self.panel.level(), self.scenario),
            ForecastSource::Fallback(kind),
            self.first_month()?,
            path,
            self.ci_cap,
        )
    }
}

/// One rung of the fallback ladder.
pub trait FallbackStrategy: Send + Sync {
    fn kind(&self) -> FallbackKind;

    /// Whether the strategy makes sense at this level of the hierarchy.
    fn applies_to(&self, _level: GeoLevel) -> bool {
        true
    }

    fn estimate(&self, request: &FallbackRequest<'_>) -> Result<Forecast>;
}

/// Parent forecast shifted by the historical appreciation gap.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegionalAverageFallback;

impl RegionalAverageFallback {
    /// Mean area appreciation minus mean parent appreciation over the months
    /// both panels cover.
    pub fn bias(area: &TimeSeriesPanel, parent: &TimeSeriesPanel) -> Result<f64> {
        let (own, theirs): (Vec<f64>, Vec<f64>) = area
            .months()
            .iter()
            .zip(area.appreciation())
            .filter_map(|(m, a)| parent.position(*m).map(|i| (*a, parent.appreciation()[i])))
            .unzip();
        if own.is_empty() {
            return Err(ForecastError::FallbackUnavailable(format!(
                "{} shares no months with {}",
                area.geography(),
                parent.geography()
            )));
        }
        Ok(mean(&own) - mean(&theirs))
    }
}

impl FallbackStrategy for RegionalAverageFallback {
    fn kind(&self) -> FallbackKind {
        FallbackKind::RegionalAverage
    }

    fn applies_to(&self, level: GeoLevel) -> bool {
        level == GeoLevel::Area
    }

    fn estimate(&self, request: &FallbackRequest<'_>) -> Result<Forecast> {
        let (parent, forecast) = match (request.parent_panel, request.parent_forecast) {
            (Some(p), Some(f)) => (p, f),
            _ => {
                return Err(ForecastError::FallbackUnavailable(
                    "no parent region forecast".to_string(),
                ))
            }
        };
        if forecast.horizon() < request.horizon {
            return Err(ForecastError::FallbackUnavailable(format!(
                "parent forecast covers {} of {} months",
                forecast.horizon(),
                request.horizon
            )));
        }
        let bias = Self::bias(request.panel, parent)?;
        let path = truncate(forecast.to_interval_path(), request.horizon);
        request.finalize(self.kind(), path.shifted(bias))
    }
}

/// Average of the nearest peers' forecasts.
#[derive(Debug, Clone, Default)]
pub struct SimilarityFallback {
    pub config: SimilarityConfig,
}

impl SimilarityFallback {
    pub fn new(config: SimilarityConfig) -> Self {
        Self { config }
    }
}

impl FallbackStrategy for SimilarityFallback {
    fn kind(&self) -> FallbackKind {
        FallbackKind::Similarity
    }

    fn estimate(&self, request: &FallbackRequest<'_>) -> Result<Forecast> {
        let peers: Vec<&PeerForecast<'_>> = request
            .peers
            .iter()
            .filter(|p| {
                p.panel.geography() != request.panel.geography()
                    && !p.forecast.is_fallback()
                    && p.forecast.scenario() == request.scenario
                    && p.forecast.horizon() >= request.horizon
            })
            .collect();
        if peers.is_empty() {
            return Err(ForecastError::FallbackUnavailable(
                "no model-based peer forecasts".to_string(),
            ));
        }

        let target = SimilarityProfile::from_panel(request.panel);
        let profiles: Vec<SimilarityProfile> =
            peers.iter().map(|p| SimilarityProfile::from_panel(p.panel)).collect();
        let chosen = nearest(&target, &profiles, &self.config);

        let h = request.horizon;
        let mut path = IntervalPath {
            point: vec![0.0; h],
            lower: vec![0.0; h],
            upper: vec![0.0; h],
        };
        for (i, _) in &chosen {
            let peer = peers[*i].forecast;
            for (step, s) in peer.steps().iter().take(h).enumerate() {
                path.point[step] += s.point;
                path.lower[step] += s.lower;
                path.upper[step] += s.upper;
            }
        }
        let k = chosen.len() as f64;
        for v in path.point.iter_mut().chain(&mut path.lower).chain(&mut path.upper) {
            *v /= k;
        }
        request.finalize(self.kind(), path)
    }
}

/// A general-purpose predictor supplied by the caller, e.g. a
/// gradient-boosted model trained on static features.
pub trait ExternalPredictor: Send + Sync {
    fn name(&self) -> &str;

    /// Point and interval paths of length `horizon`.
    fn predict(&self, panel: &TimeSeriesPanel, scenario: &str, horizon: usize) -> Result<IntervalPath>;
}

/// Delegates to an injected [`ExternalPredictor`], if any.
#[derive(Clone, Default)]
pub struct ExternalModelFallback {
    predictor: Option<Arc<dyn ExternalPredictor>>,
}

impl ExternalModelFallback {
    pub fn new(predictor: Option<Arc<dyn ExternalPredictor>>) -> Self {
        Self { predictor }
    }
}

impl std::fmt::Debug for ExternalModelFallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalModelFallback")
            .field("predictor", &self.predictor.as_ref().map(|p| p.name().to_string()))
            .finish()
    }
}

impl FallbackStrategy for ExternalModelFallback {
    fn kind(&self) -> FallbackKind {
        FallbackKind::ExternalModel
    }

    fn estimate(&self, request: &FallbackRequest<'_>) -> Result<Forecast> {
        let predictor = self.predictor.as_ref().ok_or_else(|| {
            ForecastError::FallbackUnavailable("no external predictor configured".to_string())
        })?;
        let path = predictor.predict(request.panel, request.scenario, request.horizon)?;
        if path.horizon() != request.horizon {
            return Err(ForecastError::DimensionMismatch {
                expected: request.horizon,
                got: path.horizon(),
            });
        }
        request.finalize(self.kind(), path)
    }
}

/// Mean-reverting AR(1)-style extrapolation from the last observation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NaiveFallback;

impl NaiveFallback {
    /// `μ + φ^h (y_T − μ)` with `φ` the lag-1 autocorrelation clipped to
    /// `[0, 0.99]`, and `z · sd(Δy) · √h` half-widths.
    pub fn path(history: &[f64], horizon: usize, ci_level: f64) -> IntervalPath {
        let last = history.last().copied().unwrap_or(0.0);
        let mu = if history.is_empty() { 0.0 } else { mean(history) };
        let phi = autocorrelation(history, 1);
        let phi = if phi.is_finite() { phi.clamp(0.0, 0.99) } else { 0.0 };
        let diffs: Vec<f64> = history.windows(2).map(|w| w[1] - w[0]).collect();
        let sd = std_dev(&diffs);
        let sd = if sd.is_finite() { sd } else { 0.0 };
        let z = z_for_level(ci_level);

        let point: Vec<f64> = (1..=horizon)
            .map(|h| mu + phi.powi(h as i32) * (last - mu))
            .collect();
        let widths: Vec<f64> = (1..=horizon).map(|h| z * sd * (h as f64).sqrt()).collect();
        IntervalPath {
            lower: point.iter().zip(&widths).map(|(p, w)| p - w).collect(),
            upper: point.iter().zip(&widths).map(|(p, w)| p + w).collect(),
            point,
        }
    }

    /// Naïve forecast for any request; total for every non-empty horizon.
    pub fn forecast(request: &FallbackRequest<'_>) -> Forecast {
        let path = Self::path(request.panel.appreciation(), request.horizon, request.ci_level);
        let key = ForecastKey::new(request.panel.geography().clone(), request.panel.level(), request.scenario);
        let first = request
            .panel
            .last_month()
            .map(|m| m.succ())
            .or_else(|| Month::new(1970, 1).ok());
        match first {
            Some(first) => Forecast::from_intervals(
                key.clone(),
                ForecastSource::Fallback(FallbackKind::Naive),
                first,
                path,
                request.ci_cap.max(f64::MIN_POSITIVE),
            )
            .unwrap_or_else(|_| Forecast::from_steps(key, ForecastSource::Fallback(FallbackKind::Naive), Vec::new())),
            None => Forecast::from_steps(key, ForecastSource::Fallback(FallbackKind::Naive), Vec::new()),
        }
    }
}

impl FallbackStrategy for NaiveFallback {
    fn kind(&self) -> FallbackKind {
        FallbackKind::Naive
    }

    fn estimate(&self, request: &FallbackRequest<'_>) -> Result<Forecast> {
        Ok(Self::forecast(request))
    }
}

fn truncate(mut path: IntervalPath, horizon: usize) -> IntervalPath {
    path.point.truncate(horizon);
    path.lower.truncate(horizon);
    path.upper.truncate(horizon);
    path
}

/// The default ladder: regional average, similarity, external, naïve.
pub fn default_ladder(
    similarity: SimilarityConfig,
    external: Option<Arc<dyn ExternalPredictor>>,
) -> Vec<Box<dyn FallbackStrategy>> {
    vec![
        Box::new(RegionalAverageFallback),
        Box::new(SimilarityFallback::new(similarity)),
        Box::new(ExternalModelFallback::new(external)),
        Box::new(NaiveFallback),
    ]
}

/// Kinds in ladder order.
pub fn ladder_kinds(ladder: &[Box<dyn FallbackStrategy>]) -> Vec<FallbackKind> {
    ladder.iter().map(|s| s.kind()).collect()
}
