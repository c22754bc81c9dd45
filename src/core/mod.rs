//! Core data structures: geographies, months, panels, forecasts and fit status.

mod fitted;
mod forecast;
mod geography;
mod month;
mod panel;

pub use fitted::{DiagnosticTest, FitOptions, FitStatus, FitSummary, ModelOrder};
pub use forecast::{
    FallbackKind, Forecast, ForecastKey, ForecastSource, ForecastStep, ForecastTable,
    IntervalPath, ModelKind,
};
pub use geography::{GeoLevel, GeographyId};
pub use month::Month;
pub use panel::{ExogenousPath, MarketVariable, TimeSeriesPanel};
