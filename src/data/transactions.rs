//! Raw transaction records and their monthly aggregation.

use crate::core::{GeoLevel, GeographyId, Month};
use crate::error::{ForecastError, Result};
use crate::utils::stats::median;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// One resale or sale transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub region: GeographyId,
    pub area: GeographyId,
    pub month: Month,
    pub price: f64,
    /// Floor area in square metres.
    pub floor_area: f64,
}

impl Transaction {
    pub fn new(
        region: impl Into<GeographyId>,
        area: impl Into<GeographyId>,
        month: Month,
        price: f64,
        floor_area: f64,
    ) -> Self {
        Self {
            region: region.into(),
            area: area.into(),
            month,
            price,
            floor_area,
        }
    }

    fn is_valid(&self) -> bool {
        self.price.is_finite() && self.price > 0.0 && self.floor_area.is_finite() && self.floor_area > 0.0
    }

    pub fn price_per_area(&self) -> f64 {
        self.price / self.floor_area
    }
}

/// Uncleaned monthly columns of one geography.
///
/// NaN marks a missing value. `appreciation` is `None` when it has to be
/// derived from prices.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPanel {
    pub geography: GeographyId,
    pub level: GeoLevel,
    pub parent: Option<GeographyId>,
    pub months: Vec<Month>,
    pub appreciation: Option<Vec<f64>>,
    pub volume: Vec<f64>,
    pub price_per_area: Vec<f64>,
    pub features: BTreeMap<String, Vec<f64>>,
}

impl RawPanel {
    pub fn new(geography: impl Into<GeographyId>, level: GeoLevel) -> Self {
        Self {
            geography: geography.into(),
            level,
            parent: None,
            months: Vec::new(),
            appreciation: None,
            volume: Vec::new(),
            price_per_area: Vec::new(),
            features: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.months.len()
    }

    pub fn is_empty(&self) -> bool {
        self.months.is_empty()
    }

    /// Sort by month and insert NaN rows for calendar months with no data.
    ///
    /// Missing volume becomes 0: a month without rows had no transactions.
    pub fn fill_calendar(self) -> Result<Self> {
        let n = self.len();
        let columns = [Some(&self.volume), Some(&self.price_per_area), self.appreciation.as_ref()];
        for column in columns.into_iter().flatten().chain(self.features.values()) {
            if column.len() != n {
                return Err(ForecastError::DimensionMismatch {
                    expected: n,
                    got: column.len(),
                });
            }
        }
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by_key(|&i| self.months[i]);
        if let Some(pair) = order.windows(2).find(|w| self.months[w[0]] == self.months[w[1]]) {
            return Err(ForecastError::InvalidParameter(format!(
                "geography {} has two rows for {}",
                self.geography, self.months[pair[0]]
            )));
        }
        let (first, last) = match (order.first(), order.last()) {
            (Some(&f), Some(&l)) => (self.months[f], self.months[l]),
            _ => return Ok(self),
        };
        let span = first.months_until(last) as usize + 1;
        let calendar = first.range(span);
        let reindex = |column: &[f64], fill: f64| -> Vec<f64> {
            let mut out = vec![fill; span];
            for &i in &order {
                out[first.months_until(self.months[i]) as usize] = column[i];
            }
            out
        };

        let volume = reindex(&self.volume, 0.0)
            .into_iter()
            .map(|v| if v.is_finite() { v } else { 0.0 })
            .collect();
        Ok(Self {
            geography: self.geography.clone(),
            level: self.level,
            parent: self.parent.clone(),
            appreciation: self.appreciation.as_ref().map(|a| reindex(a, f64::NAN)),
            volume,
            price_per_area: reindex(&self.price_per_area, f64::NAN),
            features: self
                .features
                .iter()
                .map(|(k, v)| (k.clone(), reindex(v, f64::NAN)))
                .collect(),
            months: calendar,
        })
    }
}

/// Group transactions by (geography, month) at `level`.
///
/// Volume is the transaction count and price per area the median of
/// `price / floor_area`. Months between a geography's first and last
/// transaction with no rows get zero volume and a missing price.
/// Records with non-positive price or floor area are dropped.
pub fn aggregate_monthly(transactions: &[Transaction], level: GeoLevel) -> Result<Vec<RawPanel>> {
    let mut groups: BTreeMap<&GeographyId, (Option<&GeographyId>, BTreeMap<Month, Vec<f64>>)> =
        BTreeMap::new();
    let mut rejected = 0usize;
    for t in transactions {
        if !t.is_valid() {
            rejected += 1;
            continue;
        }
        let (geography, parent) = match level {
            GeoLevel::Region => (&t.region, None),
            GeoLevel::Area => (&t.area, Some(&t.region)),
        };
        let entry = groups.entry(geography).or_insert_with(|| (parent, BTreeMap::new()));
        entry.1.entry(t.month).or_default().push(t.price_per_area());
    }
    if rejected > 0 {
        warn!(rejected, level = level.as_str(), "dropped invalid transactions");
    }

    groups
        .into_iter()
        .map(|(geography, (parent, by_month))| {
            let mut raw = RawPanel::new(geography.clone(), level);
            raw.parent = parent.cloned();
            for (month, values) in by_month {
                raw.months.push(month);
                raw.volume.push(values.len() as f64);
                raw.price_per_area.push(median(&values));
            }
            raw.fill_calendar()
        })
        .collect()
}
