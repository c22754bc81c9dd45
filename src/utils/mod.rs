//! Numerical utilities shared by the model stages.

pub mod bootstrap;
pub mod linalg;
pub mod metrics;
pub mod ols;
pub mod optimization;
pub mod stats;

pub use bootstrap::{bootstrap_bands, percentile_bands, BootstrapConfig, ResidualSampler};
pub use metrics::{calculate_metrics, AccuracyMetrics};
pub use ols::{fit_equation, screen_collinear, variance_inflation, Design, RegressionFit};
pub use optimization::{golden_section, GoldenSectionConfig, GoldenSectionResult};
pub use stats::{quantile_normal, z_for_level};
