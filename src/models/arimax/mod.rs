//! Area-level ARIMAX models.
//!
//! Each area's appreciation is modelled as an ARIMA(p, d, q) process,
//! `q ≤ 1`, with the parent region's appreciation signal, local features
//! and intervention dummies as regressors. Regressors are differenced
//! together with the target.

mod exog;
mod model;
mod search;

pub use exog::{Intervention, InterventionKind, REGIONAL_SIGNAL};
pub use model::AreaArimaxModel;
pub use search::THETA_BOUND;
