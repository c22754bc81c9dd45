//! Explicit missing-data and outlier policies.
//!
//! Every function here is total over its documented inputs: it either
//! returns a repaired series or says why the series cannot be repaired.

use crate::error::{ForecastError, Result};
use crate::utils::stats::percentile;

/// Fill missing values (NaN) by linear interpolation.
///
/// Internal runs of at most `max_gap_months` are interpolated between their
/// neighbours; leading and trailing runs of at most `max_gap_months` take
/// the nearest observed value. A longer run, or a series with no observed
/// value at all, is a [`ForecastError::MissingValues`].
pub fn impute_gaps(series: &[f64], max_gap_months: usize) -> Result<Vec<f64>> {
    let observed: Vec<usize> = (0..series.len()).filter(|&i| series[i].is_finite()).collect();
    let (first, last) = match (observed.first(), observed.last()) {
        (Some(&f), Some(&l)) => (f, l),
        _ if series.is_empty() => return Ok(Vec::new()),
        _ => {
            return Err(ForecastError::MissingValues(
                "series has no observed values".to_string(),
            ))
        }
    };

    let too_long = |run: usize| {
        Err(ForecastError::MissingValues(format!(
            "gap of {run} months exceeds the limit of {max_gap_months}"
        )))
    };
    if first > max_gap_months {
        return too_long(first);
    }
    if series.len() - 1 - last > max_gap_months {
        return too_long(series.len() - 1 - last);
    }

    let mut out = series.to_vec();
    for v in out.iter_mut().take(first) {
        *v = series[first];
    }
    for v in out.iter_mut().skip(last + 1) {
        *v = series[last];
    }
    for pair in observed.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let run = b - a - 1;
        if run == 0 {
            continue;
        }
        if run > max_gap_months {
            return too_long(run);
        }
        let step = (series[b] - series[a]) / (b - a) as f64;
        for i in a + 1..b {
            out[i] = series[a] + step * (i - a) as f64;
        }
    }
    Ok(out)
}

/// Winsorize at the Tukey fences `Q1 − k·IQR` and `Q3 + k·IQR`.
///
/// Returns the capped series and the number of points that moved.
pub fn cap_outliers(series: &[f64], iqr_multiplier: f64) -> (Vec<f64>, usize) {
    if series.len() < 4 {
        return (series.to_vec(), 0);
    }
    let q1 = percentile(series, 25.0);
    let q3 = percentile(series, 75.0);
    let iqr = q3 - q1;
    let lower = q1 - iqr_multiplier * iqr;
    let upper = q3 + iqr_multiplier * iqr;

    let mut capped = 0;
    let out = series
        .iter()
        .map(|&v| {
            if v < lower {
                capped += 1;
                lower
            } else if v > upper {
                capped += 1;
                upper
            } else {
                v
            }
        })
        .collect();
    (out, capped)
}

/// Hard clip at `±bound`.
pub fn clip_appreciation(series: &[f64], bound: f64) -> Vec<f64> {
    series.iter().map(|v| v.clamp(-bound, bound)).collect()
}

/// Month-over-month percentage change; one element shorter than `prices`.
pub fn pct_change(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .map(|w| {
            if w[0] != 0.0 {
                100.0 * (w[1] / w[0] - 1.0)
            } else {
                f64::NAN
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const NAN: f64 = f64::NAN;

    #[test]
    fn interpolates_internal_gaps() {
        let filled = impute_gaps(&[1.0, NAN, NAN, 4.0, 5.0], 3).unwrap();
        assert_eq!(filled, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn fills_edges_with_nearest_value() {
        let filled = impute_gaps(&[NAN, 2.0, 3.0, NAN], 1).unwrap();
        assert_eq!(filled, vec![2.0, 2.0, 3.0, 3.0]);
    }

    #[test]
    fn long_gaps_are_errors() {
        assert!(impute_gaps(&[1.0, NAN, NAN, NAN, NAN, 6.0], 3).is_err());
        assert!(impute_gaps(&[NAN, NAN, 1.0], 1).is_err());
        assert!(impute_gaps(&[NAN, NAN], 5).is_err());
        assert!(impute_gaps(&[], 3).unwrap().is_empty());
    }

    #[test]
    fn caps_at_tukey_fences() {
        let mut series: Vec<f64> = (0..20).map(|i| (i % 5) as f64).collect();
        series[7] = 500.0;
        let (capped, count) = cap_outliers(&series, 3.0);
        assert_eq!(count, 1);
        assert!(capped[7] < 20.0);
        assert_eq!(capped[0], series[0]);
    }

    #[test]
    fn clip_and_pct_change() {
        assert_eq!(clip_appreciation(&[-80.0, 3.0, 70.0], 50.0), vec![-50.0, 3.0, 50.0]);
        let changes = pct_change(&[100.0, 101.0, 99.99]);
        assert_relative_eq!(changes[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(changes[1], -1.0, epsilon = 1e-9);
    }
}
