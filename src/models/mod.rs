//! Forecasting models.

pub mod arimax;
pub mod diff;
mod traits;
pub mod var;

pub use arimax::{AreaArimaxModel, Intervention, InterventionKind};
pub use traits::FittedModel;
pub use var::RegionalVarModel;
