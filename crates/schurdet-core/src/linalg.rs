//! Dense linear-algebra primitives.
//!
//! Linear solves and determinants go through LU decomposition with
//! partial pivoting in `faer`; products use `ndarray`. The rest of the workspace
//! treats these as black boxes with the usual numeric contracts.

use faer::linalg::solvers::SpSolver;
use ndarray::Array2;
use thiserror::Error;

use crate::types::Matrix;

/// Errors from the dense primitives.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LinAlgError {
    #[error("Expected a square matrix, got {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },

    #[error("Dimension mismatch in {op}: {left:?} vs {right:?}")]
    DimensionMismatch {
        op: &'static str,
        left: (usize, usize),
        right: (usize, usize),
    },

    #[error("Matrix is singular (|det| = {det:.3e} <= {tolerance:.1e})")]
    Singular { det: f64, tolerance: f64 },

    #[error("Non-finite value produced by {0}")]
    NonFinite(&'static str),
}

fn ensure_square(m: &Matrix) -> Result<usize, LinAlgError> {
    if m.nrows() != m.ncols() {
        return Err(LinAlgError::NotSquare {
            rows: m.nrows(),
            cols: m.ncols(),
        });
    }
    Ok(m.nrows())
}

fn to_faer(m: &Matrix) -> faer::Mat<f64> {
    faer::Mat::<f64>::from_fn(m.nrows(), m.ncols(), |i, j| m[[i, j]])
}

fn from_faer(m: &faer::Mat<f64>) -> Matrix {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m.read(i, j))
}

/// Determinant through faer's partial-pivot LU.
///
/// An exactly zero pivot leaves NaN in faer's factors. For finite input
/// that only happens when the matrix is exactly singular, so it is
/// reported as `0.0`. The empty matrix has determinant 1.
pub fn determinant(m: &Matrix) -> Result<f64, LinAlgError> {
    let n = ensure_square(m)?;
    if n == 0 {
        return Ok(1.0);
    }
    if m.iter().any(|v| !v.is_finite()) {
        return Err(LinAlgError::NonFinite("determinant"));
    }

    let det = to_faer(m).determinant();
    if det.is_nan() {
        return Ok(0.0);
    }
    if !det.is_finite() {
        return Err(LinAlgError::NonFinite("determinant"));
    }
    Ok(det)
}

/// Solve $A X = B$ for $X$.
///
/// Callers are expected to have rejected singular `a` already; a solve that
/// produces infinities or NaNs is reported as [`LinAlgError::NonFinite`].
pub fn solve(a: &Matrix, rhs: &Matrix) -> Result<Matrix, LinAlgError> {
    let n = ensure_square(a)?;
    if rhs.nrows() != n {
        return Err(LinAlgError::DimensionMismatch {
            op: "solve",
            left: a.dim(),
            right: rhs.dim(),
        });
    }
    if n == 0 || rhs.ncols() == 0 {
        return Ok(Matrix::zeros(rhs.dim()));
    }

    let lu = to_faer(a).partial_piv_lu();
    let x = from_faer(&lu.solve(&to_faer(rhs)));

    if x.iter().any(|v| !v.is_finite()) {
        return Err(LinAlgError::NonFinite("solve"));
    }
    Ok(x)
}

/// Explicit inverse, computed as the solve against the identity.
pub fn inverse(a: &Matrix) -> Result<Matrix, LinAlgError> {
    let n = ensure_square(a)?;
    solve(a, &Matrix::eye(n))
}

/// Matrix product $A B$ with a shape check.
pub fn matmul(a: &Matrix, b: &Matrix) -> Result<Matrix, LinAlgError> {
    if a.ncols() != b.nrows() {
        return Err(LinAlgError::DimensionMismatch {
            op: "matmul",
            left: a.dim(),
            right: b.dim(),
        });
    }
    Ok(a.dot(b))
}

/// Whether `value` is indistinguishable from zero at `tolerance`.
pub fn is_negligible(value: f64, tolerance: f64) -> bool {
    value.abs() <= tolerance
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_determinant_2x2() {
        let a = array![[2.0, 3.0], [1.0, 4.0]];
        assert_relative_eq!(determinant(&a).unwrap(), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_inverse_reference_block() {
        let a = array![[2.0, 3.0], [1.0, 4.0]];
        let inv = inverse(&a).unwrap();
        let expected = array![[0.8, -0.6], [-0.2, 0.4]];
        for (x, y) in inv.iter().zip(expected.iter()) {
            assert_relative_eq!(*x, *y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_solve_identity_system() {
        let a = Matrix::eye(5);
        let rhs = Array2::from_shape_fn((5, 2), |(i, j)| (i * 2 + j) as f64);
        let x = solve(&a, &rhs).unwrap();
        for (x, y) in x.iter().zip(rhs.iter()) {
            assert_relative_eq!(*x, *y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_solve_checks_rhs_rows() {
        let a = Matrix::eye(3);
        let rhs = Matrix::zeros((2, 1));
        assert!(matches!(
            solve(&a, &rhs),
            Err(LinAlgError::DimensionMismatch { op: "solve", .. })
        ));
    }

    #[test]
    fn test_matmul_shape_mismatch() {
        let a = Matrix::zeros((2, 3));
        let b = Matrix::zeros((2, 3));
        assert!(matmul(&a, &b).is_err());
        assert_eq!(matmul(&a, &b.t().to_owned()).unwrap().dim(), (2, 2));
    }

    #[test]
    fn test_determinant_with_row_swap() {
        let a = array![[0.0, 1.0, 2.0], [1.0, 0.0, 3.0], [4.0, -3.0, 8.0]];
        assert_relative_eq!(determinant(&a).unwrap(), -2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_determinant_of_zero_block_is_exactly_zero() {
        assert_eq!(determinant(&Matrix::zeros((2, 2))).unwrap(), 0.0);
        assert_eq!(determinant(&Matrix::zeros((0, 0))).unwrap(), 1.0);
    }

    #[test]
    fn test_determinant_rejects_non_finite_input() {
        let a = array![[1.0, f64::NAN], [0.0, 1.0]];
        assert_eq!(determinant(&a), Err(LinAlgError::NonFinite("determinant")));
        assert!(matches!(
            determinant(&Matrix::zeros((2, 3))),
            Err(LinAlgError::NotSquare { rows: 2, cols: 3 })
        ));
    }

    #[test]
    fn test_determinant_of_reference_matrix() {
        let m = array![
            [2.0, 3.0, 1.0, 0.0],
            [1.0, 4.0, 2.0, 1.0],
            [5.0, 1.0, 3.0, 2.0],
            [0.0, 2.0, 1.0, 1.0],
        ];
        assert_relative_eq!(determinant(&m).unwrap(), 9.0, epsilon = 1e-12);
    }

    #[test]
    fn test_determinant_of_singular_matrix_is_negligible() {
        let a = array![[1.0, 2.0], [2.0, 4.0]];
        assert!(is_negligible(determinant(&a).unwrap(), 1e-8));
    }
}
