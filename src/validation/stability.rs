//! Stability of a fitted vector autoregression.

use crate::error::Result;
use crate::utils::linalg::{companion_matrix, eigenvalue_moduli};
use nalgebra::DMatrix;

/// Largest companion eigenvalue modulus accepted as stable.
pub const STABILITY_BOUND: f64 = 1.0 - 1e-8;

/// Eigenvalue moduli of the companion matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct StabilityResult {
    /// Sorted in descending order.
    pub moduli: Vec<f64>,
    pub max_modulus: f64,
    pub is_stable: bool,
}

/// A VAR(p) is stable when every eigenvalue of its companion matrix lies
/// strictly inside the unit circle.
pub fn check_stability(lag_matrices: &[DMatrix<f64>]) -> Result<StabilityResult> {
    let companion = companion_matrix(lag_matrices)?;
    let moduli = eigenvalue_moduli(&companion)?;
    let max_modulus = moduli.first().copied().unwrap_or(0.0);
    Ok(StabilityResult {
        is_stable: max_modulus < STABILITY_BOUND,
        max_modulus,
        moduli,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn diagonal_var1() {
        let a = DMatrix::from_row_slice(2, 2, &[0.5, 0.0, 0.0, -0.3]);
        let result = check_stability(&[a]).unwrap();
        assert!(result.is_stable);
        assert_relative_eq!(result.max_modulus, 0.5, epsilon = 1e-10);
        assert_eq!(result.moduli.len(), 2);
    }

    #[test]
    fn unit_root_is_unstable() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.2, 0.4]);
        let result = check_stability(&[a]).unwrap();
        assert!(!result.is_stable);
    }

    #[test]
    fn var2_with_complex_roots() {
        // y_t = 1.2 y_{t-1} - 0.5 y_{t-2}: roots with modulus sqrt(0.5).
        let a1 = DMatrix::from_element(1, 1, 1.2);
        let a2 = DMatrix::from_element(1, 1, -0.5);
        let result = check_stability(&[a1, a2]).unwrap();
        assert!(result.is_stable);
        assert_relative_eq!(result.max_modulus, 0.5_f64.sqrt(), epsilon = 1e-8);
    }

    #[test]
    fn empty_lags_are_rejected() {
        assert!(check_stability(&[]).is_err());
    }
}
