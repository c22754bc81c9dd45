//! Building cleaned monthly panels from transactions, macro series and
//! local features.

mod cleaning;
mod dataset;
mod transactions;

pub use cleaning::{cap_outliers, clip_appreciation, impute_gaps, pct_change};
pub use dataset::{
    DatasetBuilder, Exclusion, FeatureValue, MacroSeries, TimeSeriesDataset, POLICY_CHANGE,
};
pub use transactions::{aggregate_monthly, RawPanel, Transaction};
