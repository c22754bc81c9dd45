//! Optimization utilities for parameter estimation.

/// Result of a bounded scalar minimization.
#[derive(Debug, Clone)]
pub struct GoldenSectionResult {
    /// The minimizing argument found.
    pub optimal_point: f64,
    /// The objective function value at the optimal point.
    pub optimal_value: f64,
    /// Number of iterations performed.
    pub iterations: usize,
    /// Whether the bracket shrank below the tolerance.
    pub converged: bool,
}

/// Configuration for golden-section search.
#[derive(Debug, Clone)]
pub struct GoldenSectionConfig {
    /// Maximum number of iterations.
    pub max_iter: usize,
    /// Width of the final bracket.
    pub tolerance: f64,
}

impl Default for GoldenSectionConfig {
    fn default() -> Self {
        Self {
            max_iter: 100,
            tolerance: 1e-6,
        }
    }
}

/// Minimize a unimodal function on `[lower, upper]` by golden-section search.
///
/// Non-finite objective values are treated as `+∞`. Both end points are
/// evaluated as well, so a minimum on the boundary is not missed.
///
/// # Example
/// ```
/// use housing_forecast::utils::optimization::{golden_section, GoldenSectionConfig};
///
/// let result = golden_section(|x| (x - 0.3).powi(2), -0.95, 0.95, GoldenSectionConfig::default());
/// assert!(result.converged);
/// assert!((result.optimal_point - 0.3).abs() < 1e-4);
/// ```
pub fn golden_section<F>(
    objective: F,
    lower: f64,
    upper: f64,
    config: GoldenSectionConfig,
) -> GoldenSectionResult
where
    F: Fn(f64) -> f64,
{
    let eval = |x: f64| {
        let v = objective(x);
        if v.is_finite() {
            v
        } else {
            f64::INFINITY
        }
    };

    let (mut a, mut b) = if lower <= upper {
        (lower, upper)
    } else {
        (upper, lower)
    };
    let inv_phi = (5.0_f64.sqrt() - 1.0) / 2.0;

    let mut c = b - inv_phi * (b - a);
    let mut d = a + inv_phi * (b - a);
    let mut fc = eval(c);
    let mut fd = eval(d);

    let mut iterations = 0;
    while iterations < config.max_iter && (b - a) > config.tolerance {
        iterations += 1;
        if fc <= fd {
            b = d;
            d = c;
            fd = fc;
            c = b - inv_phi * (b - a);
            fc = eval(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + inv_phi * (b - a);
            fd = eval(d);
        }
    }
    let converged = (b - a) <= config.tolerance;

    let mid = (a + b) / 2.0;
    let mut best = (mid, eval(mid));
    for x in [lower, upper] {
        let v = eval(x);
        if v < best.1 {
            best = (x, v);
        }
    }

    GoldenSectionResult {
        optimal_point: best.0,
        optimal_value: best.1,
        iterations,
        converged,
    }
}
