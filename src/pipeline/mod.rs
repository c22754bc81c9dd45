//! Scenario forecasting over the region/area hierarchy.
//!
//! [`HierarchicalPipeline`] fits every region and area, forecasts each under
//! the requested [`Scenario`]s and propagates regional uncertainty into
//! areas by Monte Carlo. [`CrossValidationHarness`] backtests the same
//! pipeline over expanding windows.

pub mod cross_validation;
pub mod monte_carlo;
mod report;
mod runner;
mod scenario;

pub use cross_validation::{
    CrossValidationHarness, CvReport, FoldMetrics, GeographyCvSummary, ValidationFold,
};
pub use monte_carlo::{area_forecast, propagate, stream_seed, GaussianPath};
pub use report::{GeographyOutcome, GeographyReport, LevelCounts, RunReport};
pub use runner::{HierarchicalPipeline, PipelineOutput};
pub use scenario::{baseline_path, Scenario, GDP_GROWTH, INTEREST_RATE, PRICE_INDEX};
