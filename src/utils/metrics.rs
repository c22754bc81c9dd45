//! Accuracy metrics for forecast evaluation.
//!
//! Forecast targets are monthly appreciation rates, so the direction of the
//! price move over a test window is the sign of the summed appreciation.

use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};

/// Accuracy of one forecast against realized values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyMetrics {
    /// Root Mean Squared Error
    pub rmse: f64,
    /// Mean Absolute Error
    pub mae: f64,
    /// Mean Absolute Percentage Error (None if zeros in actual)
    pub mape: Option<f64>,
    /// Whether the predicted cumulative move has the realized sign
    /// (None when the realized move is exactly flat).
    pub direction_correct: Option<bool>,
    /// Share of steps whose predicted sign matches the realized sign.
    pub stepwise_directional_accuracy: f64,
}

/// Calculate accuracy metrics between actual and predicted values.
pub fn calculate_metrics(actual: &[f64], predicted: &[f64]) -> Result<AccuracyMetrics> {
    if actual.is_empty() || predicted.is_empty() {
        return Err(ForecastError::EmptyData);
    }
    if actual.len() != predicted.len() {
        return Err(ForecastError::DimensionMismatch {
            expected: actual.len(),
            got: predicted.len(),
        });
    }

    Ok(AccuracyMetrics {
        rmse: rmse(actual, predicted),
        mae: mae(actual, predicted),
        mape: mape(actual, predicted),
        direction_correct: direction_correct(actual, predicted),
        stepwise_directional_accuracy: stepwise_directional_accuracy(actual, predicted),
    })
}

/// Calculate MAE between two slices.
pub fn mae(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.len() != predicted.len() || actual.is_empty() {
        return f64::NAN;
    }
    actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).abs())
        .sum::<f64>()
        / actual.len() as f64
}

/// Calculate MSE between two slices.
pub fn mse(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.len() != predicted.len() || actual.is_empty() {
        return f64::NAN;
    }
    actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum::<f64>()
        / actual.len() as f64
}

/// Calculate RMSE between two slices.
pub fn rmse(actual: &[f64], predicted: &[f64]) -> f64 {
    mse(actual, predicted).sqrt()
}

/// MAPE in percent; undefined when any actual value is zero.
pub fn mape(actual: &[f64], predicted: &[f64]) -> Option<f64> {
    if actual.len() != predicted.len() || actual.is_empty() {
        return None;
    }
    if actual.iter().any(|a| a.abs() < 1e-12) {
        return None;
    }
    let total: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| ((a - p) / a).abs())
        .sum();
    Some(100.0 * total / actual.len() as f64)
}

/// Whether the summed predicted appreciation has the sign of the realized one.
pub fn direction_correct(actual: &[f64], predicted: &[f64]) -> Option<bool> {
    let realized: f64 = actual.iter().sum();
    if realized == 0.0 || actual.len() != predicted.len() {
        return None;
    }
    let forecast: f64 = predicted.iter().sum();
    Some(realized.signum() == forecast.signum() && forecast != 0.0)
}

/// Fraction of steps where predicted and realized signs agree.
pub fn stepwise_directional_accuracy(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.len() != predicted.len() || actual.is_empty() {
        return f64::NAN;
    }
    let sign = |v: f64| if v > 0.0 { 1 } else if v < 0.0 { -1 } else { 0 };
    let hits = actual
        .iter()
        .zip(predicted)
        .filter(|(a, p)| sign(**a) == sign(**p))
        .count();
    hits as f64 / actual.len() as f64
}
