//! Monthly panel of one geography.

use crate::core::geography::{GeoLevel, GeographyId};
use crate::core::month::Month;
use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Endogenous market variables modelled by the regional VAR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketVariable {
    /// Month-over-month appreciation, in percent.
    Appreciation,
    /// Transaction count.
    Volume,
    /// Median price per unit floor area.
    PricePerArea,
}

impl MarketVariable {
    /// All variables, in VAR equation order.
    pub const ALL: [MarketVariable; 3] = [
        MarketVariable::Appreciation,
        MarketVariable::Volume,
        MarketVariable::PricePerArea,
    ];

    /// Whether the regional system models this variable in logs.
    pub fn is_logged(&self) -> bool {
        matches!(self, MarketVariable::PricePerArea)
    }

    pub fn name(&self) -> &'static str {
        match self {
            MarketVariable::Appreciation => "appreciation",
            MarketVariable::Volume => "volume",
            MarketVariable::PricePerArea => "price_per_area",
        }
    }
}

impl fmt::Display for MarketVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Contiguous monthly observations of one region or area.
///
/// Invariants checked on construction: months strictly consecutive, all
/// columns the same length, all values finite.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesPanel {
    geography: GeographyId,
    level: GeoLevel,
    parent: Option<GeographyId>,
    months: Vec<Month>,
    appreciation: Vec<f64>,
    volume: Vec<f64>,
    price_per_area: Vec<f64>,
    /// Time-varying covariates broadcast from macro series (plus policy flags).
    exogenous: BTreeMap<String, Vec<f64>>,
    /// Area-level amenity features, constant or slowly varying.
    local_features: BTreeMap<String, Vec<f64>>,
}

impl TimeSeriesPanel {
    /// Create a panel from its endogenous columns.
    pub fn new(
        geography: impl Into<GeographyId>,
        level: GeoLevel,
        months: Vec<Month>,
        appreciation: Vec<f64>,
        volume: Vec<f64>,
        price_per_area: Vec<f64>,
    ) -> Result<Self> {
        let geography = geography.into();
        let n = months.len();
        for column in [&appreciation, &volume, &price_per_area] {
            if column.len() != n {
                return Err(ForecastError::DimensionMismatch {
                    expected: n,
                    got: column.len(),
                });
            }
            if column.iter().any(|v| !v.is_finite()) {
                return Err(ForecastError::MissingValues(format!(
                    "geography {geography} has non-finite endogenous values"
                )));
            }
        }
        for pair in months.windows(2) {
            if pair[0].months_until(pair[1]) != 1 {
                return Err(ForecastError::InvalidParameter(format!(
                    "geography {geography}: months must be contiguous, found {} then {}",
                    pair[0], pair[1]
                )));
            }
        }

        Ok(Self {
            geography,
            level,
            parent: None,
            months,
            appreciation,
            volume,
            price_per_area,
            exogenous: BTreeMap::new(),
            local_features: BTreeMap::new(),
        })
    }

    /// Set the owning region of an area.
    pub fn with_parent(mut self, parent: impl Into<GeographyId>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Attach a time-varying exogenous column.
    pub fn with_exogenous(mut self, name: impl Into<String>, values: Vec<f64>) -> Result<Self> {
        self.check_column(&values)?;
        self.exogenous.insert(name.into(), values);
        Ok(self)
    }

    /// Attach a local feature column.
    pub fn with_local_feature(mut self, name: impl Into<String>, values: Vec<f64>) -> Result<Self> {
        self.check_column(&values)?;
        self.local_features.insert(name.into(), values);
        Ok(self)
    }

    /// Attach a time-invariant local feature.
    pub fn with_static_feature(self, name: impl Into<String>, value: f64) -> Result<Self> {
        let n = self.len();
        self.with_local_feature(name, vec![value; n])
    }

    fn check_column(&self, values: &[f64]) -> Result<()> {
        if values.len() != self.len() {
            return Err(ForecastError::DimensionMismatch {
                expected: self.len(),
                got: values.len(),
            });
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ForecastError::MissingValues(format!(
                "geography {} has a non-finite covariate",
                self.geography
            )));
        }
        Ok(())
    }

    pub fn geography(&self) -> &GeographyId {
        &self.geography
    }

    pub fn level(&self) -> GeoLevel {
        self.level
    }

    pub fn parent(&self) -> Option<&GeographyId> {
        self.parent.as_ref()
    }

    pub fn len(&self) -> usize {
        self.months.len()
    }

    pub fn is_empty(&self) -> bool {
        self.months.is_empty()
    }

    pub fn months(&self) -> &[Month] {
        &self.months
    }

    pub fn first_month(&self) -> Option<Month> {
        self.months.first().copied()
    }

    pub fn last_month(&self) -> Option<Month> {
        self.months.last().copied()
    }

    /// Index of a month inside the panel.
    pub fn position(&self, month: Month) -> Option<usize> {
        let first = self.first_month()?;
        let offset = first.months_until(month);
        (offset >= 0 && (offset as usize) < self.len()).then_some(offset as usize)
    }

    pub fn variable(&self, variable: MarketVariable) -> &[f64] {
        match variable {
            MarketVariable::Appreciation => &self.appreciation,
            MarketVariable::Volume => &self.volume,
            MarketVariable::PricePerArea => &self.price_per_area,
        }
    }

    pub fn appreciation(&self) -> &[f64] {
        &self.appreciation
    }

    pub fn volume(&self) -> &[f64] {
        &self.volume
    }

    pub fn price_per_area(&self) -> &[f64] {
        &self.price_per_area
    }

    pub fn exogenous(&self) -> &BTreeMap<String, Vec<f64>> {
        &self.exogenous
    }

    pub fn exogenous_column(&self, name: &str) -> Option<&[f64]> {
        self.exogenous.get(name).map(|v| v.as_slice())
    }

    pub fn local_features(&self) -> &BTreeMap<String, Vec<f64>> {
        &self.local_features
    }

    /// Latest value of every local feature.
    pub fn feature_profile(&self) -> BTreeMap<String, f64> {
        self.local_features
            .iter()
            .filter_map(|(name, values)| values.last().map(|v| (name.clone(), *v)))
            .collect()
    }

    /// Sub-panel over observation indices `[start, end)`.
    pub fn slice(&self, start: usize, end: usize) -> Result<Self> {
        if start > end || end > self.len() {
            return Err(ForecastError::IndexOutOfBounds {
                index: end.max(start),
                size: self.len(),
            });
        }
        let cut = |v: &Vec<f64>| v[start..end].to_vec();
        Ok(Self {
            geography: self.geography.clone(),
            level: self.level,
            parent: self.parent.clone(),
            months: self.months[start..end].to_vec(),
            appreciation: cut(&self.appreciation),
            volume: cut(&self.volume),
            price_per_area: cut(&self.price_per_area),
            exogenous: self
                .exogenous
                .iter()
                .map(|(k, v)| (k.clone(), cut(v)))
                .collect(),
            local_features: self
                .local_features
                .iter()
                .map(|(k, v)| (k.clone(), cut(v)))
                .collect(),
        })
    }

    /// Observations up to and including `cutoff`.
    pub fn truncate_through(&self, cutoff: Month) -> Result<Self> {
        let first = self.first_month().ok_or(ForecastError::EmptyData)?;
        let keep = (first.months_until(cutoff) + 1).clamp(0, self.len() as i32) as usize;
        self.slice(0, keep)
    }
}

/// Future values of exogenous columns, indexed by forecast step.
///
/// Columns absent from the path, or shorter than the horizon, are held at
/// the last value observed in the panel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExogenousPath {
    columns: BTreeMap<String, Vec<f64>>,
}

impl ExogenousPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every column of `history` held flat at its last value.
    pub fn hold_last(history: &BTreeMap<String, Vec<f64>>, horizon: usize) -> Self {
        let columns = history
            .iter()
            .filter_map(|(name, values)| values.last().map(|v| (name.clone(), vec![*v; horizon])))
            .collect();
        Self { columns }
    }

    pub fn with_column(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.columns.insert(name.into(), values);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, values: Vec<f64>) {
        self.columns.insert(name.into(), values);
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(|v| v.as_slice())
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Vec<f64>> {
        self.columns.get_mut(name)
    }

    pub fn columns(&self) -> &BTreeMap<String, Vec<f64>> {
        &self.columns
    }

    /// Value of `name` at 0-based `step`, falling back to `last_observed`.
    pub fn value_or(&self, name: &str, step: usize, last_observed: f64) -> f64 {
        self.columns
            .get(name)
            .and_then(|v| v.get(step).or(v.last()))
            .copied()
            .unwrap_or(last_observed)
    }
}
