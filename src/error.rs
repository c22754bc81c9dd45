//! Error types for the housing-forecast library.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for forecasting operations.
pub type Result<T> = std::result::Result<T, ForecastError>;

/// Coarse grouping of errors, used to decide whether a failed fit is
/// skipped, retried or treated as a caller bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    /// Panel too short; the geography is skipped and never retried.
    DataInsufficiency,
    /// Unit root persists after the maximum number of differencing passes.
    NonStationarity,
    /// Numerical estimation failure (singular design, non-convergence, timeout).
    EstimationFailure,
    /// Invalid input or configuration.
    Invalid,
    /// Reading or writing external storage failed.
    Storage,
}

/// Errors that can occur while building panels, fitting or forecasting.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForecastError {
    /// Input data is empty.
    #[error("empty input data")]
    EmptyData,

    /// Insufficient data points for the operation.
    #[error("insufficient data: need at least {needed}, got {got}")]
    InsufficientData { needed: usize, got: usize },

    /// A geography's panel is shorter than the minimum history.
    #[error("geography {geography}: panel has {got} months, minimum is {needed}")]
    DataInsufficiency {
        geography: String,
        needed: usize,
        got: usize,
    },

    /// A series is still non-stationary after the allowed differencing passes.
    #[error("series '{variable}' is non-stationary after {passes} differencing passes")]
    NonStationarity { variable: String, passes: usize },

    /// The design matrix is singular or numerically rank deficient.
    #[error("singular matrix: {0}")]
    SingularMatrix(String),

    /// An exogenous regressor is perfectly collinear with the others.
    #[error("collinear regressor '{variable}' (VIF {vif})")]
    Collinearity { variable: String, vif: f64 },

    /// An iterative estimator did not converge.
    #[error("estimation did not converge: {0}")]
    NonConvergence(String),

    /// A fitting attempt exceeded its time budget.
    #[error("fit attempt timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },

    /// Invalid parameter value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Dimension mismatch between data structures.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Index out of bounds.
    #[error("index out of bounds: {index} (size: {size})")]
    IndexOutOfBounds { index: usize, size: usize },

    /// Model has not been fitted yet.
    #[error("model must be fitted before prediction")]
    FitRequired,

    /// Missing values that could not be imputed.
    #[error("missing values: {0}")]
    MissingValues(String),

    /// Computation error (e.g., numerical issues).
    #[error("computation error: {0}")]
    ComputationError(String),

    /// A fallback strategy could not produce a forecast.
    #[error("fallback unavailable: {0}")]
    FallbackUnavailable(String),

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(String),

    /// Columnar storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ForecastError {
    /// Map the error onto the failure taxonomy used by the recovery controller.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ForecastError::DataInsufficiency { .. } => ErrorCategory::DataInsufficiency,
            ForecastError::NonStationarity { .. } => ErrorCategory::NonStationarity,
            ForecastError::SingularMatrix(_)
            | ForecastError::Collinearity { .. }
            | ForecastError::NonConvergence(_)
            | ForecastError::Timeout { .. }
            | ForecastError::ComputationError(_)
            | ForecastError::InsufficientData { .. }
            | ForecastError::FallbackUnavailable(_) => ErrorCategory::EstimationFailure,
            ForecastError::Io(_) | ForecastError::Storage(_) | ForecastError::Serialization(_) => {
                ErrorCategory::Storage
            }
            ForecastError::EmptyData
            | ForecastError::InvalidParameter(_)
            | ForecastError::DimensionMismatch { .. }
            | ForecastError::IndexOutOfBounds { .. }
            | ForecastError::FitRequired
            | ForecastError::MissingValues(_) => ErrorCategory::Invalid,
        }
    }

    /// Whether a regularized refit addresses this error.
    pub fn calls_for_ridge(&self) -> bool {
        matches!(
            self,
            ForecastError::SingularMatrix(_) | ForecastError::Collinearity { .. }
        )
    }

    /// Whether the retry grid should be tried after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::NonStationarity | ErrorCategory::EstimationFailure
        )
    }
}

impl From<std::io::Error> for ForecastError {
    fn from(err: std::io::Error) -> Self {
        ForecastError::Io(err.to_string())
    }
}

impl From<polars::prelude::PolarsError> for ForecastError {
    fn from(err: polars::prelude::PolarsError) -> Self {
        ForecastError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ForecastError {
    fn from(err: serde_json::Error) -> Self {
        ForecastError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_are_descriptive() {
        let err = ForecastError::DataInsufficiency {
            geography: "A-07".to_string(),
            needed: 24,
            got: 10,
        };
        assert_eq!(
            err.to_string(),
            "geography A-07: panel has 10 months, minimum is 24"
        );

        let err = ForecastError::NonStationarity {
            variable: "price_per_area".to_string(),
            passes: 2,
        };
        assert_eq!(
            err.to_string(),
            "series 'price_per_area' is non-stationary after 2 differencing passes"
        );

        let err = ForecastError::Timeout { elapsed_ms: 1500 };
        assert_eq!(err.to_string(), "fit attempt timed out after 1500 ms");
    }

    #[test]
    fn categories_drive_retry_decisions() {
        let short = ForecastError::DataInsufficiency {
            geography: "R1".into(),
            needed: 30,
            got: 12,
        };
        assert_eq!(short.category(), ErrorCategory::DataInsufficiency);
        assert!(!short.is_retryable());

        assert!(ForecastError::SingularMatrix("X'X".into()).is_retryable());
        assert!(ForecastError::Collinearity {
            variable: "rate".into(),
            vif: f64::INFINITY
        }
        .is_retryable());
        assert!(ForecastError::NonStationarity {
            variable: "volume".into(),
            passes: 2
        }
        .is_retryable());
        assert!(!ForecastError::InvalidParameter("horizon".into()).is_retryable());
        assert_eq!(
            ForecastError::Storage("bad file".into()).category(),
            ErrorCategory::Storage
        );
    }

    #[test]
    fn errors_are_clonable_and_comparable() {
        let err1 = ForecastError::SingularMatrix("design".into());
        let err2 = err1.clone();
        assert_eq!(err1, err2);
    }
}
