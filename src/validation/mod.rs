//! Statistical validation of series and fitted models.
//!
//! Stationarity testing decides the differencing order of each series;
//! residual tests and the companion-matrix stability check feed the
//! diagnostics attached to every fit.
//!
//! # Example
//!
//! ```
//! use housing_forecast::validation::{adf_test, ljung_box};
//!
//! let residuals = vec![0.1, -0.2, 0.15, -0.1, 0.05, -0.08, 0.12, -0.15, 0.1, -0.05];
//! let lb = ljung_box(&residuals, Some(3), 0);
//! assert!(lb.p_value >= 0.0 && lb.p_value <= 1.0);
//!
//! let series: Vec<f64> = (0..40).map(|i| ((i * 7) % 11) as f64).collect();
//! let adf = adf_test(&series, None);
//! assert!(adf.statistic.is_finite());
//! ```

pub mod residual_tests;
pub mod stability;
pub mod stationarity;

pub use residual_tests::{arch_lm, jarque_bera, ljung_box, ResidualTestResult};
pub use stability::{check_stability, StabilityResult};
pub use stationarity::{
    adf_test, check_differenced, ensure_stationary, CriticalValues, StationarityOutcome, StationarityResult,
};
