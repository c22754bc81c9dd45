//! Differencing and its inverse.

/// Apply differencing to a time series.
///
/// # Arguments
/// * `series` - The input series
/// * `d` - Differencing order (number of times to difference)
///
/// # Returns
/// The differenced series, `d` observations shorter.
pub fn difference(series: &[f64], d: usize) -> Vec<f64> {
    if d == 0 || series.is_empty() {
        return series.to_vec();
    }

    let mut result = series.to_vec();
    for _ in 0..d {
        if result.len() <= 1 {
            return Vec::new();
        }
        result = result.windows(2).map(|w| w[1] - w[0]).collect();
    }
    result
}

/// Last value of the series at every differencing level `0..d`.
///
/// `anchors[0]` is the last level, `anchors[1]` the last first difference,
/// and so on.
pub fn anchors(original: &[f64], d: usize) -> Vec<f64> {
    (0..d)
        .map(|level| difference(original, level).last().copied().unwrap_or(0.0))
        .collect()
}

/// Integrate a differenced forecast back onto the level scale.
///
/// # Arguments
/// * `differenced` - Future values of the `d`-times differenced series
/// * `original` - The observed series the forecast continues
/// * `d` - Differencing order used
pub fn integrate(differenced: &[f64], original: &[f64], d: usize) -> Vec<f64> {
    integrate_with_anchors(differenced, &anchors(original, d))
}

/// [`integrate`] with precomputed [`anchors`].
pub fn integrate_with_anchors(differenced: &[f64], anchors: &[f64]) -> Vec<f64> {
    let mut result = differenced.to_vec();
    for &init in anchors.iter().rev() {
        let mut cumsum = init;
        for value in result.iter_mut() {
            cumsum += *value;
            *value = cumsum;
        }
    }
    result
}

/// Cumulative sums applied `d` times; maps per-step shocks on the
/// differenced scale to their effect on the level.
pub fn cumulate(values: &[f64], d: usize) -> Vec<f64> {
    integrate_with_anchors(values, &vec![0.0; d])
}
