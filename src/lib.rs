//! # housing-forecast
//!
//! Hierarchical housing-price forecasting.
//!
//! Regions are modelled with a vector autoregression over appreciation,
//! transaction volume and price per unit area; areas are modelled with
//! ARIMAX driven by their region's signal, local features and intervention
//! dummies. Failed fits are retried with narrower settings and, when that
//! fails too, replaced by structural fallback estimates. Forecasts are
//! produced per named macro scenario, with regional uncertainty pushed into
//! area intervals by Monte Carlo, and the whole pipeline can be backtested
//! over expanding windows.
//!
//! ```no_run
//! use housing_forecast::prelude::*;
//!
//! # fn main() -> housing_forecast::Result<()> {
//! let panels = housing_forecast::io::read_panel_parquet("panels.parquet")?;
//! let macro_series = housing_forecast::io::read_macro_parquet("macro.parquet")?;
//! let config = PipelineConfig::default();
//!
//! let mut builder = TimeSeriesDataset::builder(config.data.clone()).macro_series(macro_series);
//! for panel in panels {
//!     builder = builder.raw_panel(panel);
//! }
//! let dataset = builder.build();
//!
//! let output = HierarchicalPipeline::new(config)?.run(&dataset, &Scenario::defaults())?;
//! housing_forecast::io::write_forecasts_parquet(&output.forecasts, "forecasts.parquet")?;
//! output.report.write_json("run_report.json")?;
//! # Ok(())
//! # }
//! ```

#![allow(clippy::too_many_arguments)]
#![allow(clippy::type_complexity)]
#![allow(clippy::needless_range_loop)]

pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod io;
pub mod models;
pub mod pipeline;
pub mod recovery;
pub mod utils;
pub mod validation;

pub use error::{ForecastError, Result};

pub mod prelude {
    pub use crate::config::PipelineConfig;
    pub use crate::core::{
        FitStatus, Forecast, ForecastSource, ForecastTable, GeoLevel, GeographyId, Month,
        TimeSeriesPanel,
    };
    pub use crate::data::{MacroSeries, TimeSeriesDataset, Transaction};
    pub use crate::error::{ForecastError, Result};
    pub use crate::models::{AreaArimaxModel, FittedModel, RegionalVarModel};
    pub use crate::pipeline::{
        CrossValidationHarness, HierarchicalPipeline, PipelineOutput, RunReport, Scenario,
    };
    pub use crate::recovery::{ExternalPredictor, RecoveryController};
    pub use crate::utils::{calculate_metrics, AccuracyMetrics};
}
