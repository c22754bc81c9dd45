//! Named macro scenarios and their exogenous paths.

use crate::core::ExogenousPath;
use crate::data::POLICY_CHANGE;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Interest-rate proxy column, in percent.
pub const INTEREST_RATE: &str = "interest_rate";
/// GDP-growth proxy column, in percent.
pub const GDP_GROWTH: &str = "gdp_growth";
/// Price-index (inflation proxy) column.
pub const PRICE_INDEX: &str = "price_index";

/// A set of exogenous-variable overrides applied at forecast time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub name: String,
    /// Added to the interest rate, in percentage points.
    pub rate_delta: f64,
    /// Added to GDP growth, in percentage points.
    pub gdp_delta: f64,
    /// Added to the price index.
    pub inflation_delta: f64,
    /// Set the policy indicator in the first forecast month.
    pub policy_shock: bool,
}

impl Default for Scenario {
    fn default() -> Self {
        Self::baseline()
    }
}

impl Scenario {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rate_delta: 0.0,
            gdp_delta: 0.0,
            inflation_delta: 0.0,
            policy_shock: false,
        }
    }

    pub fn baseline() -> Self {
        Self::new("baseline")
    }

    /// Rates 50bp lower, GDP growth one point higher.
    pub fn bullish() -> Self {
        Self::new("bullish").with_rate_delta(-0.5).with_gdp_delta(1.0)
    }

    /// Rates 100bp higher, GDP growth one point lower.
    pub fn bearish() -> Self {
        Self::new("bearish").with_rate_delta(1.0).with_gdp_delta(-1.0)
    }

    /// A regulatory change in the first forecast month with a 25bp hike.
    pub fn policy_shock() -> Self {
        Self::new("policy-shock").with_rate_delta(0.25).with_policy_shock()
    }

    /// Baseline, bullish, bearish and policy-shock.
    pub fn defaults() -> Vec<Self> {
        vec![Self::baseline(), Self::bullish(), Self::bearish(), Self::policy_shock()]
    }

    pub fn with_rate_delta(mut self, delta: f64) -> Self {
        self.rate_delta = delta;
        self
    }

    pub fn with_gdp_delta(mut self, delta: f64) -> Self {
        self.gdp_delta = delta;
        self
    }

    pub fn with_inflation_delta(mut self, delta: f64) -> Self {
        self.inflation_delta = delta;
        self
    }

    pub fn with_policy_shock(mut self) -> Self {
        self.policy_shock = true;
        self
    }

    /// Overlay this scenario on a baseline path of `horizon` steps.
    ///
    /// Deltas only touch columns present in the baseline; the policy
    /// indicator is written whenever the shock is set.
    pub fn apply(&self, baseline: &ExogenousPath, horizon: usize) -> ExogenousPath {
        let mut path = baseline.clone();
        for (column, delta) in [
            (INTEREST_RATE, self.rate_delta),
            (GDP_GROWTH, self.gdp_delta),
            (PRICE_INDEX, self.inflation_delta),
        ] {
            if delta == 0.0 {
                continue;
            }
            if let Some(values) = path.column_mut(column) {
                for v in values.iter_mut() {
                    *v += delta;
                }
            }
        }
        if self.policy_shock {
            let mut flags = vec![0.0; horizon];
            if let Some(first) = flags.first_mut() {
                *first = 1.0;
            }
            path.set(POLICY_CHANGE, flags);
        }
        path
    }
}

/// Baseline exogenous path: the supplied outlook where it has a column,
/// otherwise the last observed value held flat. Policy indicators default
/// to zero.
pub fn baseline_path(
    history: &BTreeMap<String, Vec<f64>>,
    horizon: usize,
    outlook: Option<&ExogenousPath>,
) -> ExogenousPath {
    let mut path = ExogenousPath::hold_last(history, horizon);
    if history.contains_key(POLICY_CHANGE) {
        path.set(POLICY_CHANGE, vec![0.0; horizon]);
    }
    if let Some(outlook) = outlook {
        for (name, values) in outlook.columns() {
            if history.contains_key(name) {
                let last = history[name].last().copied().unwrap_or(0.0);
                let filled = (0..horizon)
                    .map(|h| values.get(h).or(values.last()).copied().unwrap_or(last))
                    .collect();
                path.set(name.clone(), filled);
            }
        }
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> BTreeMap<String, Vec<f64>> {
        [
            (INTEREST_RATE.to_string(), vec![2.0, 2.5]),
            (GDP_GROWTH.to_string(), vec![3.0, 3.0]),
            (POLICY_CHANGE.to_string(), vec![0.0, 1.0]),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn baseline_holds_last_values_and_clears_policy() {
        let path = baseline_path(&history(), 3, None);
        assert_eq!(path.column(INTEREST_RATE).unwrap(), &[2.5, 2.5, 2.5]);
        assert_eq!(path.column(POLICY_CHANGE).unwrap(), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn outlook_overrides_known_columns() {
        let outlook = ExogenousPath::new()
            .with_column(INTEREST_RATE, vec![3.0, 3.5])
            .with_column("unknown", vec![9.0; 3]);
        let path = baseline_path(&history(), 3, Some(&outlook));
        assert_eq!(path.column(INTEREST_RATE).unwrap(), &[3.0, 3.5, 3.5]);
        assert!(path.column("unknown").is_none());
    }

    #[test]
    fn scenarios_shift_their_columns() {
        let base = baseline_path(&history(), 2, None);
        let bearish = Scenario::bearish().apply(&base, 2);
        assert_eq!(bearish.column(INTEREST_RATE).unwrap(), &[3.5, 3.5]);
        assert_eq!(bearish.column(GDP_GROWTH).unwrap(), &[2.0, 2.0]);

        let shock = Scenario::policy_shock().apply(&base, 2);
        assert_eq!(shock.column(POLICY_CHANGE).unwrap(), &[1.0, 0.0]);
        assert_eq!(shock.column(INTEREST_RATE).unwrap(), &[2.75, 2.75]);

        assert_eq!(Scenario::baseline().apply(&base, 2), base);
        assert_eq!(Scenario::defaults().len(), 4);
    }

    #[test]
    fn scenario_deserializes_with_defaults() {
        let s: Scenario = serde_json::from_str(r#"{ "name": "hike", "rate_delta": 2.0 }"#).unwrap();
        assert_eq!(s.name, "hike");
        assert_eq!(s.gdp_delta, 0.0);
        assert!(!s.policy_shock);
    }
}
