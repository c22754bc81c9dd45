//! Columnar storage of panels, macro series, forecasts and backtests.

mod parquet;

pub use parquet::{
    read_forecasts_parquet, read_macro_parquet, read_panel_parquet, write_cv_parquet,
    write_cv_summary_parquet, write_forecasts_parquet,
};
