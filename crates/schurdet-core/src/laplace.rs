//! Cofactor (Laplace) expansion determinant.
//!
//! Expands recursively along the first row. The cost is $O(N!)$, so this is
//! only a reference for small matrices and for timing comparisons against
//! the block method; it never runs inside the process group.

use log::warn;
use ndarray::Axis;

use crate::linalg::LinAlgError;
use crate::types::Matrix;

/// Orders above this take noticeable time; a warning is logged.
pub const LAPLACE_WARN_ORDER: usize = 10;

/// Determinant by first-row cofactor expansion.
pub fn laplace_determinant(m: &Matrix) -> Result<f64, LinAlgError> {
    if m.nrows() != m.ncols() {
        return Err(LinAlgError::NotSquare {
            rows: m.nrows(),
            cols: m.ncols(),
        });
    }
    if m.nrows() > LAPLACE_WARN_ORDER {
        warn!(
            "Laplace expansion of order {} is factorial in cost",
            m.nrows()
        );
    }
    Ok(expand(m))
}

fn expand(m: &Matrix) -> f64 {
    match m.nrows() {
        0 => 1.0,
        1 => m[[0, 0]],
        2 => m[[0, 0]] * m[[1, 1]] - m[[0, 1]] * m[[1, 0]],
        n => (0..n)
            .filter(|&j| m[[0, j]] != 0.0)
            .map(|j| {
                let sign = if j % 2 == 0 { 1.0 } else { -1.0 };
                sign * m[[0, j]] * expand(&minor(m, j))
            })
            .sum(),
    }
}

/// Drop row 0 and column `col`.
fn minor(m: &Matrix, col: usize) -> Matrix {
    let n = m.nrows();
    let rows = m.select(Axis(0), &(1..n).collect::<Vec<_>>());
    let keep: Vec<usize> = (0..n).filter(|&j| j != col).collect();
    rows.select(Axis(1), &keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_reference_matrix() {
        let m = array![
            [2.0, 3.0, 1.0, 0.0],
            [1.0, 4.0, 2.0, 1.0],
            [5.0, 1.0, 3.0, 2.0],
            [0.0, 2.0, 1.0, 1.0],
        ];
        assert!((laplace_determinant(&m).unwrap() - 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_base_cases() {
        assert_eq!(laplace_determinant(&array![[7.0]]).unwrap(), 7.0);
        assert_eq!(
            laplace_determinant(&array![[1.0, 2.0], [3.0, 4.0]]).unwrap(),
            -2.0
        );
    }

    #[test]
    fn test_rejects_non_square() {
        let m = Matrix::zeros((2, 3));
        assert!(matches!(
            laplace_determinant(&m),
            Err(LinAlgError::NotSquare { rows: 2, cols: 3 })
        ));
    }
}
