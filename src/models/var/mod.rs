//! Regional vector autoregression.
//!
//! # Example
//!
//! ```no_run
//! use housing_forecast::config::VarConfig;
//! use housing_forecast::core::{ExogenousPath, MarketVariable, TimeSeriesPanel};
//! use housing_forecast::models::var::RegionalVarModel;
//!
//! # fn run(panel: TimeSeriesPanel) -> housing_forecast::error::Result<()> {
//! let model = RegionalVarModel::fit(&panel, &VarConfig::default())?;
//! let forecast = model.forecast("baseline", 36, &ExogenousPath::new())?;
//! let granger = model.granger_causality(MarketVariable::Volume)?;
//! println!("{} steps, volume -> appreciation p = {:.3}", forecast.horizon(), granger.p_value);
//! # Ok(())
//! # }
//! ```

mod analysis;
mod lag_selection;
mod model;

pub use analysis::{GrangerResult, ImpulseResponse};
pub use lag_selection::LagSelection;
pub use model::{RegionalVarModel, VarForecastPaths, RIDGE_REASON};
