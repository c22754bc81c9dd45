//! Retry variants and the attempt plan derived from them.

use crate::config::{LagCriterion, RetryConfig};
use crate::core::{FitOptions, GeoLevel};
use crate::error::ForecastError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A narrowed parameter set tried after the primary fit fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetryVariant {
    /// Same search with the ridge penalty switched on.
    RidgeRegularized,
    /// Lower the maximum AR / lag order.
    ReducedAr,
    /// Lower the maximum MA order.
    ReducedMa,
    /// Drop the MA part entirely.
    ArOnly,
    /// Fixed order 1 with conservative defaults.
    FixedLowOrder,
}

impl RetryVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryVariant::RidgeRegularized => "ridge-regularized",
            RetryVariant::ReducedAr => "reduced-ar",
            RetryVariant::ReducedMa => "reduced-ma",
            RetryVariant::ArOnly => "ar-only",
            RetryVariant::FixedLowOrder => "fixed-low-order",
        }
    }

    /// Fit options for this variant at the given level.
    ///
    /// A VAR has no MA part, so the MA variants narrow the lag search
    /// instead. Only `RidgeRegularized` switches the penalty on by itself.
    pub fn options_for(&self, level: GeoLevel) -> FitOptions {
        let base = FitOptions::labelled(self.as_str());
        match (self, level) {
            (RetryVariant::RidgeRegularized, _) => base.with_ridge(),
            (RetryVariant::ReducedAr, _) => base.with_max_order(2),
            (RetryVariant::ReducedMa, GeoLevel::Region) => base.with_max_order(3),
            (RetryVariant::ReducedMa, GeoLevel::Area) => base.with_max_ma(0),
            (RetryVariant::ArOnly, GeoLevel::Region) => base.with_criterion(LagCriterion::Bic),
            (RetryVariant::ArOnly, GeoLevel::Area) => base.with_max_ma(0),
            (RetryVariant::FixedLowOrder, GeoLevel::Region) => {
                base.with_fixed_order(1).with_criterion(LagCriterion::Bic)
            }
            (RetryVariant::FixedLowOrder, GeoLevel::Area) => base
                .with_fixed_order(1)
                .with_fixed_differencing(1)
                .with_max_ma(0),
        }
    }

    /// Options for this variant when it follows a failure with `trigger`.
    ///
    /// Singular and collinear designs get the ridge penalty on every
    /// variant. After any other failure the penalty stays off, and the
    /// ridge-only variant is skipped because it would repeat the search.
    pub fn after(&self, level: GeoLevel, trigger: &ForecastError) -> Option<FitOptions> {
        let options = self.options_for(level);
        if trigger.calls_for_ridge() {
            Some(options.with_ridge())
        } else if *self == RetryVariant::RidgeRegularized {
            None
        } else {
            Some(options)
        }
    }
}

impl fmt::Display for RetryVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The grid variants tried after the primary attempt, at most `max_retries`.
pub fn retry_grid(config: &RetryConfig, level: GeoLevel) -> Vec<RetryVariant> {
    let grid = match level {
        GeoLevel::Region => &config.region_grid,
        GeoLevel::Area => &config.area_grid,
    };
    grid.iter().take(config.max_retries).copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_is_bounded_by_max_retries() {
        let mut config = RetryConfig::default();
        assert_eq!(
            retry_grid(&config, GeoLevel::Region),
            vec![
                RetryVariant::RidgeRegularized,
                RetryVariant::ReducedAr,
                RetryVariant::FixedLowOrder
            ]
        );

        config.max_retries = 1;
        assert_eq!(retry_grid(&config, GeoLevel::Area), vec![RetryVariant::ReducedAr]);
    }

    #[test]
    fn variants_narrow_the_search() {
        let area = RetryVariant::FixedLowOrder.options_for(GeoLevel::Area);
        assert_eq!(area.fixed_order, Some(1));
        assert_eq!(area.fixed_differencing, Some(1));
        assert_eq!(area.max_ma, Some(0));
        assert!(!area.ridge);

        let region = RetryVariant::RidgeRegularized.options_for(GeoLevel::Region);
        assert!(region.ridge);
        assert_eq!(region.max_order, None);

        assert_eq!(RetryVariant::ArOnly.options_for(GeoLevel::Area).max_ma, Some(0));
        assert!(!RetryVariant::ArOnly.options_for(GeoLevel::Area).ridge);
        assert!(!RetryVariant::ReducedAr.options_for(GeoLevel::Region).ridge);
    }

    #[test]
    fn ridge_follows_the_triggering_error() {
        let singular = ForecastError::SingularMatrix("X'X".into());
        let stalled = ForecastError::NonConvergence("css".into());
        let explosive = ForecastError::NonStationarity {
            variable: "appreciation".into(),
            passes: 2,
        };

        assert!(RetryVariant::ReducedAr.after(GeoLevel::Region, &singular).unwrap().ridge);
        assert!(!RetryVariant::ReducedAr.after(GeoLevel::Region, &stalled).unwrap().ridge);
        assert!(!RetryVariant::FixedLowOrder.after(GeoLevel::Area, &explosive).unwrap().ridge);
        assert!(RetryVariant::RidgeRegularized.after(GeoLevel::Region, &stalled).is_none());
        assert!(RetryVariant::RidgeRegularized.after(GeoLevel::Region, &singular).is_some());
    }

    #[test]
    fn variants_serialize_in_kebab_case() {
        let json = serde_json::to_string(&RetryVariant::ReducedAr).unwrap();
        assert_eq!(json, "\"reduced-ar\"");
        let back: RetryVariant = serde_json::from_str("\"fixed-low-order\"").unwrap();
        assert_eq!(back, RetryVariant::FixedLowOrder);
    }
}
