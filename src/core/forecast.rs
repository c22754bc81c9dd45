//! Forecast result structures.
//!
//! A [`Forecast`] is the immutable output for one (geography, scenario) pair:
//! an ordered run of [`ForecastStep`]s, each carrying a point estimate and an
//! interval. Intervals are finalized once, in [`Forecast::from_intervals`]:
//! half-widths are made non-decreasing in the horizon and then clamped to the
//! physical cap, with clamped steps flagged rather than rejected.

use crate::core::geography::{GeoLevel, GeographyId};
use crate::core::month::Month;
use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Model family that produced a forecast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Regional vector autoregression.
    Var,
    /// Area ARIMA with exogenous regressors.
    Arimax,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Var => "var",
            ModelKind::Arimax => "arimax",
        }
    }
}

/// Structural fallback estimators, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackKind {
    /// Parent region forecast plus the area's historical bias.
    RegionalAverage,
    /// Mean of the nearest peers' model forecasts.
    Similarity,
    /// Caller-supplied feature-based predictor.
    ExternalModel,
    /// Mean-reverting AR(1) extrapolation; always available.
    Naive,
}

impl FallbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackKind::RegionalAverage => "regional-average",
            FallbackKind::Similarity => "similarity",
            FallbackKind::ExternalModel => "external-model",
            FallbackKind::Naive => "naive",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "regional-average" => Some(FallbackKind::RegionalAverage),
            "similarity" => Some(FallbackKind::Similarity),
            "external-model" => Some(FallbackKind::ExternalModel),
            "naive" => Some(FallbackKind::Naive),
            _ => None,
        }
    }
}

impl fmt::Display for FallbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a forecast came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "kind", rename_all = "lowercase")]
pub enum ForecastSource {
    /// A fitted time-series model.
    Model(ModelKind),
    /// A fallback estimator.
    Fallback(FallbackKind),
}

impl ForecastSource {
    /// Text label, e.g. `model:var` or `fallback:naive`.
    pub fn label(&self) -> String {
        match self {
            ForecastSource::Model(kind) => format!("model:{}", kind.as_str()),
            ForecastSource::Fallback(kind) => format!("fallback:{}", kind.as_str()),
        }
    }

    /// Inverse of [`ForecastSource::label`].
    pub fn parse(text: &str) -> Option<Self> {
        let (family, kind) = text.split_once(':')?;
        match family {
            "model" => match kind {
                "var" => Some(ForecastSource::Model(ModelKind::Var)),
                "arimax" => Some(ForecastSource::Model(ModelKind::Arimax)),
                _ => None,
            },
            "fallback" => FallbackKind::parse(kind).map(ForecastSource::Fallback),
            _ => None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ForecastSource::Fallback(_))
    }
}

impl fmt::Display for ForecastSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Identity of a forecast.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ForecastKey {
    pub geography: GeographyId,
    pub level: GeoLevel,
    pub scenario: String,
}

impl ForecastKey {
    pub fn new(geography: GeographyId, level: GeoLevel, scenario: impl Into<String>) -> Self {
        Self {
            geography,
            level,
            scenario: scenario.into(),
        }
    }
}

/// Raw point and interval paths before finalization.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalPath {
    pub point: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl IntervalPath {
    /// Create a path, checking that all three sequences have equal length.
    pub fn new(point: Vec<f64>, lower: Vec<f64>, upper: Vec<f64>) -> Result<Self> {
        if lower.len() != point.len() || upper.len() != point.len() {
            return Err(ForecastError::DimensionMismatch {
                expected: point.len(),
                got: lower.len().min(upper.len()),
            });
        }
        Ok(Self {
            point,
            lower,
            upper,
        })
    }

    /// Symmetric interval `point ± half_width`.
    pub fn symmetric(point: Vec<f64>, half_widths: &[f64]) -> Result<Self> {
        if half_widths.len() != point.len() {
            return Err(ForecastError::DimensionMismatch {
                expected: point.len(),
                got: half_widths.len(),
            });
        }
        let lower = point.iter().zip(half_widths).map(|(p, w)| p - w).collect();
        let upper = point.iter().zip(half_widths).map(|(p, w)| p + w).collect();
        Ok(Self {
            point,
            lower,
            upper,
        })
    }

    pub fn horizon(&self) -> usize {
        self.point.len()
    }

    /// Shift the whole path by a constant.
    pub fn shifted(mut self, delta: f64) -> Self {
        for v in self
            .point
            .iter_mut()
            .chain(self.lower.iter_mut())
            .chain(self.upper.iter_mut())
        {
            *v += delta;
        }
        self
    }
}

/// One forecast horizon step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastStep {
    /// 1-based horizon.
    pub horizon: usize,
    pub month: Month,
    pub point: f64,
    pub lower: f64,
    pub upper: f64,
    /// True when the interval was cut back to the cap at this step.
    pub clamped: bool,
}

impl ForecastStep {
    pub fn lower_half_width(&self) -> f64 {
        self.point - self.lower
    }

    pub fn upper_half_width(&self) -> f64 {
        self.upper - self.point
    }

    pub fn half_width(&self) -> f64 {
        self.lower_half_width().max(self.upper_half_width())
    }
}

/// Forecast for one geography under one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    key: ForecastKey,
    source: ForecastSource,
    steps: Vec<ForecastStep>,
}

impl Forecast {
    /// Finalize raw paths into a forecast starting at `first_month`.
    ///
    /// Lower and upper half-widths are each replaced by their running maximum
    /// over the horizon, then capped at `cap`. Non-finite widths are treated
    /// as exceeding the cap.
    pub fn from_intervals(
        key: ForecastKey,
        source: ForecastSource,
        first_month: Month,
        path: IntervalPath,
        cap: f64,
    ) -> Result<Self> {
        if path.point.is_empty() {
            return Err(ForecastError::EmptyData);
        }
        if path.point.iter().any(|p| !p.is_finite()) {
            return Err(ForecastError::ComputationError(format!(
                "non-finite point forecast for {}",
                key.geography
            )));
        }
        if cap <= 0.0 {
            return Err(ForecastError::InvalidParameter(format!(
                "interval cap must be positive, got {cap}"
            )));
        }

        let mut running_lower = 0.0_f64;
        let mut running_upper = 0.0_f64;
        let steps = path
            .point
            .iter()
            .zip(path.lower.iter().zip(path.upper.iter()))
            .enumerate()
            .map(|(i, (&point, (&lower, &upper)))| {
                let lower_width = width_or_infinite(point - lower);
                let upper_width = width_or_infinite(upper - point);
                running_lower = running_lower.max(lower_width);
                running_upper = running_upper.max(upper_width);

                let clamped = running_lower > cap || running_upper > cap;
                ForecastStep {
                    horizon: i + 1,
                    month: first_month.offset(i as i32),
                    point,
                    lower: point - running_lower.min(cap),
                    upper: point + running_upper.min(cap),
                    clamped,
                }
            })
            .collect();

        Ok(Self { key, source, steps })
    }

    /// Rebuild a forecast from already finalized steps.
    pub fn from_steps(key: ForecastKey, source: ForecastSource, steps: Vec<ForecastStep>) -> Self {
        Self { key, source, steps }
    }

    pub fn key(&self) -> &ForecastKey {
        &self.key
    }

    pub fn geography(&self) -> &GeographyId {
        &self.key.geography
    }

    pub fn level(&self) -> GeoLevel {
        self.key.level
    }

    pub fn scenario(&self) -> &str {
        &self.key.scenario
    }

    pub fn source(&self) -> ForecastSource {
        self.source
    }

    pub fn is_fallback(&self) -> bool {
        self.source.is_fallback()
    }

    pub fn steps(&self) -> &[ForecastStep] {
        &self.steps
    }

    pub fn horizon(&self) -> usize {
        self.steps.len()
    }

    pub fn first_month(&self) -> Option<Month> {
        self.steps.first().map(|s| s.month)
    }

    /// Point estimates in horizon order.
    pub fn points(&self) -> Vec<f64> {
        self.steps.iter().map(|s| s.point).collect()
    }

    pub fn lowers(&self) -> Vec<f64> {
        self.steps.iter().map(|s| s.lower).collect()
    }

    pub fn uppers(&self) -> Vec<f64> {
        self.steps.iter().map(|s| s.upper).collect()
    }

    /// Point estimate at a 1-based horizon.
    pub fn point_at(&self, horizon: usize) -> Option<f64> {
        horizon
            .checked_sub(1)
            .and_then(|i| self.steps.get(i))
            .map(|s| s.point)
    }

    pub fn any_clamped(&self) -> bool {
        self.steps.iter().any(|s| s.clamped)
    }

    /// Raw paths of this forecast, e.g. for averaging peers.
    pub fn to_interval_path(&self) -> IntervalPath {
        IntervalPath {
            point: self.points(),
            lower: self.lowers(),
            upper: self.uppers(),
        }
    }
}

fn width_or_infinite(width: f64) -> f64 {
    if width.is_finite() {
        width.max(0.0)
    } else {
        f64::INFINITY
    }
}

/// All forecasts of a run, ordered by (scenario, level, geography).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastTable {
    forecasts: Vec<Forecast>,
}

impl ForecastTable {
    pub fn new(mut forecasts: Vec<Forecast>) -> Self {
        forecasts.sort_by(|a, b| {
            (a.scenario(), a.level(), a.geography()).cmp(&(b.scenario(), b.level(), b.geography()))
        });
        Self { forecasts }
    }

    pub fn len(&self) -> usize {
        self.forecasts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forecasts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Forecast> {
        self.forecasts.iter()
    }

    pub fn as_slice(&self) -> &[Forecast] {
        &self.forecasts
    }

    pub fn get(&self, geography: &GeographyId, scenario: &str) -> Option<&Forecast> {
        self.forecasts
            .iter()
            .find(|f| f.geography() == geography && f.scenario() == scenario)
    }

    pub fn contains_geography(&self, geography: &GeographyId) -> bool {
        self.forecasts.iter().any(|f| f.geography() == geography)
    }

    pub fn for_scenario<'a>(&'a self, scenario: &'a str) -> impl Iterator<Item = &'a Forecast> {
        self.forecasts.iter().filter(move |f| f.scenario() == scenario)
    }
}
