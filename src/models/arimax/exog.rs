//! Exogenous regressors of the area model: the injected regional signal,
//! local features and intervention dummies.

use crate::core::{GeographyId, Month, TimeSeriesPanel};
use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the injected regional column.
pub const REGIONAL_SIGNAL: &str = "regional_signal";

/// Shape of an intervention dummy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InterventionKind {
    /// 1 for `window_months` months starting at the event month.
    Event { window_months: usize },
    /// 1 from the change month onward.
    Step,
}

/// A dated event or policy change affecting some areas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intervention {
    pub name: String,
    pub month: Month,
    pub kind: InterventionKind,
    /// Affected areas; empty means every area.
    #[serde(default)]
    pub geographies: Vec<GeographyId>,
}

impl Intervention {
    /// An event such as a station opening, active for `window_months`.
    pub fn event(name: impl Into<String>, month: Month, window_months: usize) -> Self {
        Self {
            name: name.into(),
            month,
            kind: InterventionKind::Event { window_months },
            geographies: Vec::new(),
        }
    }

    /// A permanent change such as a new regulation.
    pub fn step(name: impl Into<String>, month: Month) -> Self {
        Self {
            name: name.into(),
            month,
            kind: InterventionKind::Step,
            geographies: Vec::new(),
        }
    }

    /// Restrict to the given areas.
    pub fn for_geographies(mut self, geographies: Vec<GeographyId>) -> Self {
        self.geographies = geographies;
        self
    }

    pub fn applies_to(&self, geography: &GeographyId) -> bool {
        self.geographies.is_empty() || self.geographies.contains(geography)
    }

    /// Dummy value in `month`.
    pub fn value_at(&self, month: Month) -> f64 {
        let since = self.month.months_until(month);
        let active = match self.kind {
            InterventionKind::Event { window_months } => since >= 0 && (since as usize) < window_months,
            InterventionKind::Step => since >= 0,
        };
        if active {
            1.0
        } else {
            0.0
        }
    }

    pub fn column_name(&self) -> String {
        format!("intervention:{}", self.name)
    }
}

/// What a regressor column represents.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RegressorKind {
    Signal,
    Feature(String),
    Intervention(Intervention),
}

/// Level regressor columns aligned with an area panel.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RegressorSet {
    pub names: Vec<String>,
    pub kinds: Vec<RegressorKind>,
    pub columns: Vec<Vec<f64>>,
}

impl RegressorSet {
    pub fn from_panel(
        panel: &TimeSeriesPanel,
        regional_signal: &[f64],
        interventions: &[Intervention],
    ) -> Result<Self> {
        if regional_signal.len() != panel.len() {
            return Err(ForecastError::DimensionMismatch {
                expected: panel.len(),
                got: regional_signal.len(),
            });
        }
        if regional_signal.iter().any(|v| !v.is_finite()) {
            return Err(ForecastError::MissingValues(format!(
                "regional signal for {} has non-finite values",
                panel.geography()
            )));
        }

        let mut set = Self {
            names: vec![REGIONAL_SIGNAL.to_string()],
            kinds: vec![RegressorKind::Signal],
            columns: vec![regional_signal.to_vec()],
        };
        for (name, values) in panel.local_features() {
            set.names.push(format!("feature:{name}"));
            set.kinds.push(RegressorKind::Feature(name.clone()));
            set.columns.push(values.clone());
        }
        for intervention in interventions.iter().filter(|i| i.applies_to(panel.geography())) {
            set.names.push(intervention.column_name());
            set.kinds.push(RegressorKind::Intervention(intervention.clone()));
            set.columns
                .push(panel.months().iter().map(|m| intervention.value_at(*m)).collect());
        }
        Ok(set)
    }

    /// Future level values of every column.
    ///
    /// The regional path is held at its last value beyond its length;
    /// features come from `features` or are held at their last observation;
    /// interventions are evaluated on the future months.
    pub fn future(
        &self,
        first_month: Month,
        horizon: usize,
        regional_future: &[f64],
        features: &BTreeMap<String, f64>,
    ) -> Vec<Vec<f64>> {
        self.kinds
            .iter()
            .zip(&self.columns)
            .map(|(kind, history)| {
                let last = history.last().copied().unwrap_or(0.0);
                (0..horizon)
                    .map(|h| match kind {
                        RegressorKind::Signal => regional_future
                            .get(h)
                            .or(regional_future.last())
                            .copied()
                            .unwrap_or(last),
                        RegressorKind::Feature(name) => features.get(name).copied().unwrap_or(last),
                        RegressorKind::Intervention(i) => i.value_at(first_month.offset(h as i32)),
                    })
                    .collect()
            })
            .collect()
    }
}
