//! CPU compute backend using Rayon for shared-memory parallelism.

use std::sync::Arc;

use ndarray::{Array1, Axis};
use rayon::prelude::*;
use schurdet_core::linalg::{self, LinAlgError};
use schurdet_core::Matrix;

use crate::backend::{ComputeBackend, ComputeError, DeviceInfo};

/// Products with fewer output entries than this run on the calling thread.
const PARALLEL_THRESHOLD: usize = 64 * 64;

/// CPU backend that splits matrix products by output row across threads.
pub struct CpuBackend {
    num_threads: usize,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl CpuBackend {
    /// Create a new CPU backend on the global Rayon pool.
    pub fn new() -> Self {
        Self {
            num_threads: rayon::current_num_threads(),
            pool: None,
        }
    }

    /// Create a CPU backend with a dedicated pool of `num_threads` threads.
    pub fn with_threads(num_threads: usize) -> Result<Self, ComputeError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("schurdet-cpu-{}", i))
            .build()
            .map_err(|e| ComputeError::DeviceError(e.to_string()))?;
        Ok(Self {
            num_threads: pool.current_num_threads(),
            pool: Some(Arc::new(pool)),
        })
    }

    fn parallel_matmul(a: &Matrix, b: &Matrix) -> Matrix {
        let rows: Vec<Array1<f64>> = (0..a.nrows())
            .into_par_iter()
            .map(|i| a.row(i).dot(b))
            .collect();
        let mut product = Matrix::zeros((a.nrows(), b.ncols()));
        for (mut out, row) in product.axis_iter_mut(Axis(0)).zip(rows.iter()) {
            out.assign(row);
        }
        product
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeBackend for CpuBackend {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: format!("CPU ({} threads)", self.num_threads),
            compute_units: Some(self.num_threads),
        }
    }

    fn matmul(&self, a: &Matrix, b: &Matrix) -> Result<Matrix, ComputeError> {
        if a.ncols() != b.nrows() {
            return Err(LinAlgError::DimensionMismatch {
                op: "matmul",
                left: a.dim(),
                right: b.dim(),
            }
            .into());
        }
        if a.nrows() * b.ncols() < PARALLEL_THRESHOLD {
            return Ok(linalg::matmul(a, b)?);
        }
        let product = match &self.pool {
            Some(pool) => pool.install(|| Self::parallel_matmul(a, b)),
            None => Self::parallel_matmul(a, b),
        };
        Ok(product)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    #[test]
    fn test_parallel_matmul_matches_serial() {
        let a = Array2::from_shape_fn((96, 70), |(i, j)| ((i * 7 + j * 3) % 11) as f64 - 5.0);
        let b = Array2::from_shape_fn((70, 80), |(i, j)| ((i + 2 * j) % 5) as f64 * 0.5);
        let backend = CpuBackend::with_threads(3).unwrap();
        let got = backend.matmul(&a, &b).unwrap();
        let expected = a.dot(&b);
        assert_eq!(got.dim(), (96, 80));
        for (x, y) in got.iter().zip(expected.iter()) {
            assert_relative_eq!(*x, *y, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_matmul_rejects_bad_shapes() {
        let backend = CpuBackend::new();
        let err = backend
            .matmul(&Matrix::zeros((2, 3)), &Matrix::zeros((2, 2)))
            .unwrap_err();
        assert!(matches!(err, ComputeError::LinAlg(LinAlgError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_inverse_through_solve() {
        let backend = CpuBackend::default();
        let a = ndarray::array![[4.0, 7.0], [2.0, 6.0]];
        let inv = backend.inverse(&a).unwrap();
        let id = a.dot(&inv);
        assert_relative_eq!(id[[0, 0]], 1.0, epsilon = 1e-12);
        assert_relative_eq!(id[[0, 1]], 0.0, epsilon = 1e-12);
        assert_relative_eq!(id[[1, 0]], 0.0, epsilon = 1e-12);
        assert_relative_eq!(id[[1, 1]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_device_info_reports_threads() {
        let backend = CpuBackend::with_threads(2).unwrap();
        assert_eq!(backend.device_info().compute_units, Some(2));
    }
}
