//! Dense linear algebra helpers on top of `nalgebra`.

use crate::error::{ForecastError, Result};
use nalgebra::linalg::Schur;
use nalgebra::{DMatrix, DVector};

/// Pivot threshold below which a scaled Gram matrix is treated as singular.
pub const SINGULAR_PIVOT: f64 = 1e-10;

/// Build an `n × k` matrix from `k` equal-length columns.
pub fn from_columns(columns: &[&[f64]]) -> Result<DMatrix<f64>> {
    let n = columns.first().map(|c| c.len()).unwrap_or(0);
    if let Some(bad) = columns.iter().find(|c| c.len() != n) {
        return Err(ForecastError::DimensionMismatch {
            expected: n,
            got: bad.len(),
        });
    }
    Ok(DMatrix::from_fn(n, columns.len(), |i, j| columns[j][i]))
}

/// Lower Cholesky factor of a symmetric positive definite matrix.
///
/// Returns `None` for matrices that are only semi-definite, i.e. when a
/// pivot vanishes relative to the largest diagonal entry.
pub fn cholesky_lower(m: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let l = m.clone().cholesky()?.l();
    let scale = (0..m.nrows())
        .map(|i| m[(i, i)].abs())
        .fold(0.0_f64, f64::max)
        .sqrt();
    if (0..l.nrows()).any(|i| !(l[(i, i)] > 1e-12 * scale)) {
        return None;
    }
    Some(l)
}

/// Smallest squared Cholesky pivot of `gram` after scaling it to unit
/// diagonal. Returns 0 when the factorization fails or a diagonal entry is
/// not positive.
pub fn scaled_min_pivot(gram: &DMatrix<f64>) -> f64 {
    let k = gram.nrows();
    if k == 0 {
        return 1.0;
    }
    let diag: Vec<f64> = (0..k).map(|i| gram[(i, i)]).collect();
    if diag.iter().any(|d| !(*d > 0.0) || !d.is_finite()) {
        return 0.0;
    }
    let scaled = DMatrix::from_fn(k, k, |i, j| gram[(i, j)] / (diag[i] * diag[j]).sqrt());
    match cholesky_lower(&scaled) {
        Some(l) => (0..k).map(|i| l[(i, i)] * l[(i, i)]).fold(f64::INFINITY, f64::min),
        None => 0.0,
    }
}

/// Solve `a x = b` for symmetric positive definite `a`.
pub fn solve_spd(a: &DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    a.clone().cholesky().map(|c| c.solve(b))
}

/// Inverse of a symmetric positive definite matrix.
pub fn inverse_spd(a: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    a.clone().cholesky().map(|c| c.inverse())
}

/// Log-determinant of a symmetric positive definite matrix.
pub fn log_det_spd(m: &DMatrix<f64>) -> Option<f64> {
    let l = cholesky_lower(m)?;
    Some((0..l.nrows()).map(|i| 2.0 * l[(i, i)].ln()).sum())
}

/// `row · m · rowᵀ` for a row vector given as a slice.
pub fn quadratic_form(row: &[f64], m: &DMatrix<f64>) -> f64 {
    let v = DVector::from_column_slice(row);
    (v.transpose() * m * &v)[(0, 0)]
}

/// Companion matrix of a VAR(p) with `k × k` lag coefficient matrices.
///
/// ```text
/// | A1 A2 ... Ap |
/// | I  0  ... 0  |
/// | 0  I  ... 0  |
/// ```
pub fn companion_matrix(lags: &[DMatrix<f64>]) -> Result<DMatrix<f64>> {
    let p = lags.len();
    let k = lags.first().map(|a| a.nrows()).ok_or(ForecastError::EmptyData)?;
    if lags.iter().any(|a| a.nrows() != k || a.ncols() != k) {
        return Err(ForecastError::InvalidParameter(
            "lag matrices must all be square with the same size".to_string(),
        ));
    }
    let mut c = DMatrix::zeros(k * p, k * p);
    for (lag, a) in lags.iter().enumerate() {
        c.view_mut((0, lag * k), (k, k)).copy_from(a);
    }
    for i in k..k * p {
        c[(i, i - k)] = 1.0;
    }
    Ok(c)
}

/// Moduli of the eigenvalues of a real square matrix, via real Schur form.
pub fn eigenvalue_moduli(m: &DMatrix<f64>) -> Result<Vec<f64>> {
    if m.nrows() != m.ncols() {
        return Err(ForecastError::DimensionMismatch {
            expected: m.nrows(),
            got: m.ncols(),
        });
    }
    if m.iter().any(|v| !v.is_finite()) {
        return Err(ForecastError::ComputationError(
            "matrix has non-finite entries".to_string(),
        ));
    }
    let schur = Schur::try_new(m.clone(), f64::EPSILON, 10_000).ok_or_else(|| {
        ForecastError::NonConvergence("Schur decomposition did not converge".to_string())
    })?;
    let mut moduli: Vec<f64> = schur.complex_eigenvalues().iter().map(|z| z.re.hypot(z.im)).collect();
    moduli.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    Ok(moduli)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn from_columns_checks_lengths() {
        let m = from_columns(&[&[1.0, 2.0], &[3.0, 4.0]]).unwrap();
        assert_eq!(m[(1, 0)], 2.0);
        assert_eq!(m[(0, 1)], 3.0);
        assert!(from_columns(&[&[1.0, 2.0], &[3.0]]).is_err());
    }

    #[test]
    fn min_pivot_detects_collinearity() {
        let x = from_columns(&[&[1.0, 1.0, 1.0, 1.0], &[1.0, 2.0, 3.0, 4.0], &[2.0, 4.0, 6.0, 8.0]])
            .unwrap();
        let gram = x.transpose() * &x;
        assert!(scaled_min_pivot(&gram) < SINGULAR_PIVOT);

        let x = from_columns(&[&[1.0, 1.0, 1.0, 1.0], &[1.0, 2.0, 3.0, 4.0], &[0.5, -1.0, 2.0, 0.0]])
            .unwrap();
        let gram = x.transpose() * &x;
        assert!(scaled_min_pivot(&gram) > 1e-3);
    }

    #[test]
    fn spd_helpers() {
        let a = DMatrix::from_row_slice(2, 2, &[4.0, 2.0, 2.0, 3.0]);
        let x = solve_spd(&a, &DVector::from_vec(vec![2.0, 1.0])).unwrap();
        assert_relative_eq!(x[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(x[1], 0.0, epsilon = 1e-12);
        assert_relative_eq!(log_det_spd(&a).unwrap(), 8.0_f64.ln(), epsilon = 1e-12);
        assert_relative_eq!(quadratic_form(&[1.0, 1.0], &a), 11.0, epsilon = 1e-12);
        assert!(cholesky_lower(&DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0])).is_none());
    }

    #[test]
    fn companion_eigenvalues_of_ar2() {
        // y_t = 0.5 y_{t-1} + 0.3 y_{t-2}: roots of z^2 - 0.5 z - 0.3.
        let lags = vec![
            DMatrix::from_element(1, 1, 0.5),
            DMatrix::from_element(1, 1, 0.3),
        ];
        let c = companion_matrix(&lags).unwrap();
        assert_eq!(c.nrows(), 2);
        assert_eq!(c[(1, 0)], 1.0);

        let moduli = eigenvalue_moduli(&c).unwrap();
        let r1 = (0.5 + (0.25_f64 + 1.2).sqrt()) / 2.0;
        assert_relative_eq!(moduli[0], r1, epsilon = 1e-8);
        assert!(moduli.iter().all(|m| *m < 1.0));
    }

    #[test]
    fn complex_eigenvalues_use_modulus() {
        // Rotation scaled by 0.9 has eigenvalues 0.9 e^{±iθ}.
        let m = DMatrix::from_row_slice(2, 2, &[0.0, -0.9, 0.9, 0.0]);
        let moduli = eigenvalue_moduli(&m).unwrap();
        assert_relative_eq!(moduli[0], 0.9, epsilon = 1e-8);
        assert_relative_eq!(moduli[1], 0.9, epsilon = 1e-8);
    }
}
