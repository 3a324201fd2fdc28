//! Schur-complement numerics.
//!
//! For $M = [[A, B], [C, D]]$ with $A$ invertible,
//! $$S = D - C A^{-1} B, \qquad \det M = \det A \cdot \det S.$$
//!
//! The distributed protocol computes $T = C A^{-1} B$ piecewise; this module
//! holds the pure steps around it: factoring $A$, forming $S$ from $T$ and
//! combining the determinants. [`block_determinant`] runs the whole chain in
//! one thread and serves as a reference.

use log::debug;

use crate::linalg::{self, is_negligible, LinAlgError};
use crate::types::{Blocks, Matrix};

/// Pass `det` through unless it is zero at `tolerance`.
///
/// This is the single singularity gate for block $A$, whichever backend
/// computed the determinant.
pub fn ensure_nonsingular(det: f64, tolerance: f64) -> Result<f64, LinAlgError> {
    if is_negligible(det, tolerance) {
        return Err(LinAlgError::Singular { det, tolerance });
    }
    Ok(det)
}

/// Check that `a` is non-singular at `tolerance` and return its determinant.
pub fn checked_determinant(a: &Matrix, tolerance: f64) -> Result<f64, LinAlgError> {
    ensure_nonsingular(linalg::determinant(a)?, tolerance)
}

/// $S = D - T$.
pub fn schur_complement(d: &Matrix, t: &Matrix) -> Result<Matrix, LinAlgError> {
    if d.dim() != t.dim() {
        return Err(LinAlgError::DimensionMismatch {
            op: "schur_complement",
            left: d.dim(),
            right: t.dim(),
        });
    }
    Ok(d - t)
}

/// $\det M = \det A \cdot \det S$.
pub fn combine(det_a: f64, det_s: f64) -> f64 {
    det_a * det_s
}

/// Single-threaded Schur determinant of an already split matrix.
pub fn block_determinant(blocks: &Blocks, tolerance: f64) -> Result<f64, LinAlgError> {
    let det_a = checked_determinant(&blocks.a, tolerance)?;
    let a_inv = linalg::inverse(&blocks.a)?;
    debug!("factored {}x{} block, det = {:.6e}", a_inv.nrows(), a_inv.ncols(), det_a);
    let t = linalg::matmul(&linalg::matmul(&blocks.c, &a_inv)?, &blocks.b)?;
    let s = schur_complement(&blocks.d, &t)?;
    Ok(combine(det_a, linalg::determinant(&s)?))
}
