//! Compute backend trait and device abstraction.
//!
//! The [`ComputeBackend`] trait isolates every rank of the process group from
//! how the dense primitives are executed. Coordinator and workers only ever
//! call these four operations; the protocol code stays device-agnostic.

use schurdet_core::linalg::{self, LinAlgError};
use schurdet_core::Matrix;
use thiserror::Error;

/// Errors originating from compute backends.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ComputeError {
    #[error("Backend not available: {0}")]
    Unavailable(String),

    #[error("Device error: {0}")]
    DeviceError(String),

    #[error(transparent)]
    LinAlg(#[from] LinAlgError),
}

/// Describes the capabilities of a compute backend.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub compute_units: Option<usize>,
}

/// Abstraction over the dense linear-algebra primitives used by each rank.
pub trait ComputeBackend: Send + Sync {
    /// Return information about the device.
    fn device_info(&self) -> DeviceInfo;

    /// Matrix product $A B$.
    ///
    /// This is the hot path: every worker computes its slice of
    /// $T = C A^{-1} B$ as two of these.
    fn matmul(&self, a: &Matrix, b: &Matrix) -> Result<Matrix, ComputeError>;

    /// Solve $A X = B$ for a block of right-hand sides.
    fn solve(&self, a: &Matrix, rhs: &Matrix) -> Result<Matrix, ComputeError> {
        Ok(linalg::solve(a, rhs)?)
    }

    /// Determinant of a square matrix.
    fn determinant(&self, m: &Matrix) -> Result<f64, ComputeError> {
        Ok(linalg::determinant(m)?)
    }

    /// Explicit inverse.
    fn inverse(&self, a: &Matrix) -> Result<Matrix, ComputeError> {
        self.solve(a, &Matrix::eye(a.nrows()))
    }
}
