//! Assembly of cleaned region and area panels.

use crate::config::DataConfig;
use crate::core::{ExogenousPath, GeoLevel, GeographyId, Month, TimeSeriesPanel};
use crate::data::cleaning::{cap_outliers, clip_appreciation, impute_gaps, pct_change};
use crate::data::transactions::{aggregate_monthly, RawPanel, Transaction};
use crate::error::{ForecastError, Result};
use crate::models::arimax::Intervention;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// Name of the policy indicator column.
pub const POLICY_CHANGE: &str = "policy_change";

/// Macroeconomic series keyed by month, shared by every geography.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MacroSeries {
    columns: BTreeMap<String, BTreeMap<Month, f64>>,
    policy_changes: BTreeSet<Month>,
}

impl MacroSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named column from `(month, value)` pairs. NaN values are
    /// treated as missing.
    pub fn with_column(mut self, name: impl Into<String>, values: impl IntoIterator<Item = (Month, f64)>) -> Self {
        let column = values.into_iter().filter(|(_, v)| v.is_finite()).collect();
        self.columns.insert(name.into(), column);
        self
    }

    /// Months in which a regulatory change took effect.
    pub fn with_policy_changes(mut self, months: impl IntoIterator<Item = Month>) -> Self {
        self.policy_changes.extend(months);
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.keys().map(|k| k.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.policy_changes.is_empty()
    }

    pub fn policy_changes(&self) -> &BTreeSet<Month> {
        &self.policy_changes
    }

    pub fn value(&self, name: &str, month: Month) -> Option<f64> {
        self.columns.get(name).and_then(|c| c.get(&month)).copied()
    }

    /// Columns aligned to `months`, gaps imputed with `max_gap_months`.
    /// The policy indicator is 1 exactly in change months.
    pub fn aligned(&self, months: &[Month], max_gap_months: usize) -> Result<BTreeMap<String, Vec<f64>>> {
        let mut out = BTreeMap::new();
        for (name, column) in &self.columns {
            let raw: Vec<f64> = months
                .iter()
                .map(|m| column.get(m).copied().unwrap_or(f64::NAN))
                .collect();
            let filled = impute_gaps(&raw, max_gap_months).map_err(|e| {
                ForecastError::MissingValues(format!("macro column '{name}': {e}"))
            })?;
            out.insert(name.clone(), filled);
        }
        if !self.policy_changes.is_empty() {
            let flags = months
                .iter()
                .map(|m| if self.policy_changes.contains(m) { 1.0 } else { 0.0 })
                .collect();
            out.insert(POLICY_CHANGE.to_string(), flags);
        }
        Ok(out)
    }

    /// Realized values for `horizon` months from `first`, when every column
    /// covers the whole window.
    pub fn window(&self, first: Month, horizon: usize) -> Option<ExogenousPath> {
        let months = first.range(horizon);
        let mut path = ExogenousPath::new();
        for (name, column) in &self.columns {
            let values: Option<Vec<f64>> = months.iter().map(|m| column.get(m).copied()).collect();
            path.set(name.clone(), values?);
        }
        if !self.policy_changes.is_empty() {
            path.set(
                POLICY_CHANGE,
                months
                    .iter()
                    .map(|m| if self.policy_changes.contains(m) { 1.0 } else { 0.0 })
                    .collect(),
            );
        }
        Some(path)
    }
}

/// Local feature value: constant or a monthly column.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    Static(f64),
    Monthly(BTreeMap<Month, f64>),
}

/// A geography left out of the dataset, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    pub geography: GeographyId,
    pub level: GeoLevel,
    pub reason: String,
}

/// Cleaned region and area panels ready for fitting.
#[derive(Debug, Clone, Default)]
pub struct TimeSeriesDataset {
    regions: Vec<TimeSeriesPanel>,
    areas: Vec<TimeSeriesPanel>,
    macro_series: MacroSeries,
    interventions: Vec<Intervention>,
    exclusions: Vec<Exclusion>,
}

impl TimeSeriesDataset {
    pub fn builder(config: DataConfig) -> DatasetBuilder {
        DatasetBuilder::new(config)
    }

    /// A dataset from already cleaned panels.
    pub fn from_panels(regions: Vec<TimeSeriesPanel>, areas: Vec<TimeSeriesPanel>) -> Self {
        Self {
            regions,
            areas,
            ..Default::default()
        }
    }

    pub fn with_macro(mut self, macro_series: MacroSeries) -> Self {
        self.macro_series = macro_series;
        self
    }

    pub fn with_interventions(mut self, interventions: Vec<Intervention>) -> Self {
        self.interventions = interventions;
        self
    }

    pub fn regions(&self) -> &[TimeSeriesPanel] {
        &self.regions
    }

    pub fn areas(&self) -> &[TimeSeriesPanel] {
        &self.areas
    }

    pub fn region(&self, id: &GeographyId) -> Option<&TimeSeriesPanel> {
        self.regions.iter().find(|p| p.geography() == id)
    }

    pub fn area(&self, id: &GeographyId) -> Option<&TimeSeriesPanel> {
        self.areas.iter().find(|p| p.geography() == id)
    }

    /// Areas whose parent is `region`.
    pub fn areas_of<'a>(&'a self, region: &'a GeographyId) -> impl Iterator<Item = &'a TimeSeriesPanel> + 'a {
        self.areas.iter().filter(move |p| p.parent() == Some(region))
    }

    pub fn macro_series(&self) -> &MacroSeries {
        &self.macro_series
    }

    pub fn interventions(&self) -> &[Intervention] {
        &self.interventions
    }

    pub fn exclusions(&self) -> &[Exclusion] {
        &self.exclusions
    }

    /// Latest month observed in any panel.
    pub fn last_month(&self) -> Option<Month> {
        self.regions
            .iter()
            .chain(&self.areas)
            .filter_map(|p| p.last_month())
            .max()
    }

    /// Earliest month observed in any panel.
    pub fn first_month(&self) -> Option<Month> {
        self.regions
            .iter()
            .chain(&self.areas)
            .filter_map(|p| p.first_month())
            .min()
    }

    /// The dataset as it looked at `cutoff`: every panel truncated after
    /// that month; panels with no data left are dropped. Macro series and
    /// interventions are kept whole.
    pub fn truncate_through(&self, cutoff: Month) -> Self {
        let cut = |panels: &[TimeSeriesPanel]| -> Vec<TimeSeriesPanel> {
            panels
                .iter()
                .filter_map(|p| p.truncate_through(cutoff).ok())
                .filter(|p| !p.is_empty())
                .collect()
        };
        Self {
            regions: cut(&self.regions),
            areas: cut(&self.areas),
            macro_series: self.macro_series.clone(),
            interventions: self.interventions.clone(),
            exclusions: self.exclusions.clone(),
        }
    }
}

/// Collects raw inputs and produces a [`TimeSeriesDataset`].
#[derive(Debug, Clone)]
pub struct DatasetBuilder {
    config: DataConfig,
    raw: Vec<RawPanel>,
    macro_series: MacroSeries,
    features: BTreeMap<GeographyId, BTreeMap<String, FeatureValue>>,
    interventions: Vec<Intervention>,
}

impl DatasetBuilder {
    pub fn new(config: DataConfig) -> Self {
        Self {
            config,
            raw: Vec::new(),
            macro_series: MacroSeries::new(),
            features: BTreeMap::new(),
            interventions: Vec::new(),
        }
    }

    /// Aggregate transactions into region and area panels.
    pub fn transactions(mut self, transactions: &[Transaction]) -> Result<Self> {
        self.raw.extend(aggregate_monthly(transactions, GeoLevel::Region)?);
        self.raw.extend(aggregate_monthly(transactions, GeoLevel::Area)?);
        Ok(self)
    }

    /// Add a pre-aggregated panel, e.g. one read from Parquet.
    pub fn raw_panel(mut self, panel: RawPanel) -> Self {
        self.raw.push(panel);
        self
    }

    pub fn macro_series(mut self, macro_series: MacroSeries) -> Self {
        self.macro_series = macro_series;
        self
    }

    pub fn static_feature(mut self, area: impl Into<GeographyId>, name: impl Into<String>, value: f64) -> Self {
        self.features
            .entry(area.into())
            .or_default()
            .insert(name.into(), FeatureValue::Static(value));
        self
    }

    pub fn monthly_feature(
        mut self,
        area: impl Into<GeographyId>,
        name: impl Into<String>,
        values: impl IntoIterator<Item = (Month, f64)>,
    ) -> Self {
        self.features
            .entry(area.into())
            .or_default()
            .insert(name.into(), FeatureValue::Monthly(values.into_iter().collect()));
        self
    }

    pub fn intervention(mut self, intervention: Intervention) -> Self {
        self.interventions.push(intervention);
        self
    }

    /// Clean every raw panel. Panels that cannot be repaired are recorded
    /// as exclusions instead of failing the build.
    pub fn build(self) -> TimeSeriesDataset {
        let mut dataset = TimeSeriesDataset {
            macro_series: self.macro_series.clone(),
            interventions: self.interventions.clone(),
            ..Default::default()
        };

        for raw in &self.raw {
            match self.clean(raw) {
                Ok(panel) => match panel.level() {
                    GeoLevel::Region => dataset.regions.push(panel),
                    GeoLevel::Area => dataset.areas.push(panel),
                },
                Err(err) => {
                    warn!(geography = %raw.geography, error = %err, "excluding geography");
                    dataset.exclusions.push(Exclusion {
                        geography: raw.geography.clone(),
                        level: raw.level,
                        reason: err.to_string(),
                    });
                }
            }
        }

        let known: BTreeSet<GeographyId> =
            dataset.regions.iter().map(|p| p.geography().clone()).collect();
        let (kept, orphans): (Vec<_>, Vec<_>) = std::mem::take(&mut dataset.areas)
            .into_iter()
            .partition(|p| p.parent().is_some_and(|parent| known.contains(parent)));
        dataset.areas = kept;
        for orphan in orphans {
            warn!(geography = %orphan.geography(), "area has no known parent region");
            dataset.exclusions.push(Exclusion {
                geography: orphan.geography().clone(),
                level: GeoLevel::Area,
                reason: "no known parent region".to_string(),
            });
        }

        dataset.regions.sort_by(|a, b| a.geography().cmp(b.geography()));
        dataset.areas.sort_by(|a, b| a.geography().cmp(b.geography()));
        info!(
            regions = dataset.regions.len(),
            areas = dataset.areas.len(),
            excluded = dataset.exclusions.len(),
            "dataset built"
        );
        dataset
    }

    fn clean(&self, raw: &RawPanel) -> Result<TimeSeriesPanel> {
        let raw = raw.clone().fill_calendar()?;
        if raw.is_empty() {
            return Err(ForecastError::EmptyData);
        }
        let gap = self.config.max_gap_months;
        let prices = impute_gaps(&raw.price_per_area, gap)?;

        // Derived appreciation loses the first month.
        let (start, appreciation) = match &raw.appreciation {
            Some(a) => (0, impute_gaps(a, gap)?),
            None => (1, pct_change(&prices)),
        };
        if appreciation.iter().any(|v| !v.is_finite()) {
            return Err(ForecastError::MissingValues(format!(
                "geography {} has a zero price",
                raw.geography
            )));
        }
        let (appreciation, _) = cap_outliers(&appreciation, self.config.outlier_iqr_multiplier);
        let appreciation = clip_appreciation(&appreciation, self.config.appreciation_bound);
        let (volume, _) = cap_outliers(&raw.volume[start..], self.config.outlier_iqr_multiplier);

        let months = raw.months[start..].to_vec();
        let mut panel = TimeSeriesPanel::new(
            raw.geography.clone(),
            raw.level,
            months.clone(),
            appreciation,
            volume,
            prices[start..].to_vec(),
        )?;
        if let Some(parent) = &raw.parent {
            panel = panel.with_parent(parent.clone());
        }
        for (name, values) in self.macro_series.aligned(&months, gap)? {
            panel = panel.with_exogenous(name, values)?;
        }

        if raw.level == GeoLevel::Area {
            for (name, values) in &raw.features {
                panel = panel.with_local_feature(name.clone(), impute_gaps(&values[start..], gap)?)?;
            }
            if let Some(features) = self.features.get(&raw.geography) {
                for (name, feature) in features {
                    panel = match feature {
                        FeatureValue::Static(v) => panel.with_static_feature(name.clone(), *v)?,
                        FeatureValue::Monthly(by_month) => {
                            let column: Vec<f64> = months
                                .iter()
                                .map(|m| by_month.get(m).copied().unwrap_or(f64::NAN))
                                .collect();
                            panel.with_local_feature(name.clone(), impute_gaps(&column, gap)?)?
                        }
                    };
                }
            }
        }
        Ok(panel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn m(offset: i32) -> Month {
        Month::new(2019, 1).unwrap().offset(offset)
    }

    fn transactions(months: i32) -> Vec<Transaction> {
        let mut rows = Vec::new();
        for t in 0..months {
            let price = 400_000.0 * 1.01_f64.powi(t);
            rows.push(Transaction::new("east", "tampines", m(t), price, 100.0));
            rows.push(Transaction::new("east", "bedok", m(t), price * 0.9, 100.0));
        }
        rows
    }

    #[test]
    fn builds_panels_with_macro_and_features() {
        let rates = MacroSeries::new()
            .with_column("interest_rate", (0..36).filter(|t| t % 7 != 3).map(|t| (m(t), 2.0)))
            .with_policy_changes([m(12)]);
        let dataset = TimeSeriesDataset::builder(DataConfig::default())
            .transactions(&transactions(36))
            .unwrap()
            .macro_series(rates)
            .static_feature("tampines", "mrt_score", 0.8)
            .build();

        assert_eq!(dataset.regions().len(), 1);
        assert_eq!(dataset.areas().len(), 2);
        assert!(dataset.exclusions().is_empty());

        let region = &dataset.regions()[0];
        assert_eq!(region.len(), 35);
        assert_eq!(region.first_month(), Some(m(1)));
        assert_relative_eq!(region.appreciation()[10], 1.0, epsilon = 1e-9);
        assert_eq!(region.exogenous_column("interest_rate").unwrap(), vec![2.0; 35].as_slice());
        assert_eq!(region.exogenous_column(POLICY_CHANGE).unwrap()[11], 1.0);

        let tampines = dataset.area(&GeographyId::new("tampines")).unwrap();
        assert_eq!(tampines.parent(), Some(&GeographyId::new("east")));
        assert_eq!(tampines.feature_profile()["mrt_score"], 0.8);
        assert_eq!(dataset.areas_of(&GeographyId::new("east")).count(), 2);
    }

    #[test]
    fn unrepairable_panels_are_excluded() {
        let mut rows = transactions(30);
        rows.retain(|t| !(t.area.as_str() == "bedok" && (10..16).contains(&m(0).months_until(t.month))));
        let dataset = TimeSeriesDataset::builder(DataConfig::default())
            .transactions(&rows)
            .unwrap()
            .build();
        assert_eq!(dataset.areas().len(), 1);
        assert_eq!(dataset.exclusions().len(), 1);
        assert_eq!(dataset.exclusions()[0].geography.as_str(), "bedok");
    }

    #[test]
    fn orphan_areas_are_excluded() {
        let mut raw = RawPanel::new("lonely", GeoLevel::Area);
        raw.months = m(0).range(3);
        raw.volume = vec![1.0; 3];
        raw.price_per_area = vec![10.0, 10.1, 10.2];
        let dataset = TimeSeriesDataset::builder(DataConfig::default()).raw_panel(raw).build();
        assert!(dataset.areas().is_empty());
        assert_eq!(dataset.exclusions()[0].reason, "no known parent region");
    }

    #[test]
    fn truncation_and_macro_window() {
        let macro_series = MacroSeries::new().with_column("gdp_growth", (0..40).map(|t| (m(t), t as f64)));
        let dataset = TimeSeriesDataset::builder(DataConfig::default())
            .transactions(&transactions(36))
            .unwrap()
            .macro_series(macro_series)
            .build();
        let cut = dataset.truncate_through(m(24));
        assert_eq!(cut.last_month(), Some(m(24)));
        assert_eq!(cut.regions()[0].len(), 24);

        let window = cut.macro_series().window(m(25), 3).unwrap();
        assert_eq!(window.column("gdp_growth").unwrap(), &[25.0, 26.0, 27.0]);
        assert!(cut.macro_series().window(m(39), 3).is_none());
    }
}
