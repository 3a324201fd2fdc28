//! Collective operations rooted at the coordinator.
//!
//! Every rank of the group must enter the same collective in the same
//! order. Pieces are laid out by a [`WorkAssignment`] over all ranks, so
//! slot `r` of the layout is owned by rank `r`, root included.

use std::sync::Arc;

use log::trace;
use ndarray::{Axis, Slice};
use schurdet_core::partition::balanced_assignment;
use schurdet_core::{Matrix, WorkAssignment};

use super::comm::{Communicator, ProtocolError};
use super::message::{Payload, Phase};
use super::topology::COORDINATOR;
use super::DistributedError;
use crate::backend::ComputeBackend;

fn root_value<T>(value: Option<T>, phase: Phase) -> Result<T, ProtocolError> {
    value.ok_or(ProtocolError::UnexpectedPayload(phase))
}

/// Broadcast one matrix from the root. The root passes `Some`, everyone else
/// `None`; every rank returns the same shared matrix.
pub fn broadcast(
    comm: &mut Communicator,
    value: Option<Arc<Matrix>>,
) -> Result<Arc<Matrix>, ProtocolError> {
    if comm.rank() != COORDINATOR {
        return comm.recv(COORDINATOR, Phase::Broadcast)?.into_shared(Phase::Broadcast);
    }
    let value = root_value(value, Phase::Broadcast)?;
    for dest in 1..comm.size() {
        comm.send(dest, Phase::Broadcast, Payload::Matrix(Arc::clone(&value)))?;
    }
    Ok(value)
}

/// Scatter contiguous slices of `source` along `axis`. Rank `r` receives
/// the slice `layout.range(r)`.
pub fn scatter(
    comm: &mut Communicator,
    source: Option<&Matrix>,
    layout: &WorkAssignment,
    axis: Axis,
) -> Result<Matrix, ProtocolError> {
    if comm.rank() != COORDINATOR {
        return comm.recv(COORDINATOR, Phase::Scatter)?.into_block(Phase::Scatter);
    }
    let source = root_value(source, Phase::Scatter)?;
    for dest in 1..comm.size() {
        let piece = source
            .slice_axis(axis, Slice::from(layout.range(dest)))
            .to_owned();
        comm.send(dest, Phase::Scatter, Payload::Block(piece))?;
    }
    Ok(source
        .slice_axis(axis, Slice::from(layout.range(COORDINATOR)))
        .to_owned())
}

/// Gather slices along `axis` into a `dim`-shaped matrix on the root.
///
/// Non-root ranks return `None`. Pieces are placed by the layout, never by
/// arrival order, and a piece with the wrong shape is rejected.
pub fn gather(
    comm: &mut Communicator,
    local: Matrix,
    layout: &WorkAssignment,
    axis: Axis,
    dim: (usize, usize),
) -> Result<Option<Matrix>, ProtocolError> {
    if comm.rank() != COORDINATOR {
        comm.send(COORDINATOR, Phase::Gather, Payload::Block(local))?;
        return Ok(None);
    }

    let mut out = Matrix::zeros(dim);
    place(&mut out, &local, layout, axis, COORDINATOR)?;
    for peer in 1..comm.size() {
        let piece = comm.recv(peer, Phase::Gather)?.into_block(Phase::Gather)?;
        place(&mut out, &piece, layout, axis, peer)?;
    }
    Ok(Some(out))
}

fn place(
    out: &mut Matrix,
    piece: &Matrix,
    layout: &WorkAssignment,
    axis: Axis,
    peer: usize,
) -> Result<(), ProtocolError> {
    let mut target = out.slice_axis_mut(axis, Slice::from(layout.range(peer)));
    if piece.dim() != target.dim() {
        return Err(ProtocolError::MalformedResult {
            peer,
            message: format!(
                "gathered piece is {:?}, expected {:?}",
                piece.dim(),
                target.dim()
            ),
        });
    }
    target.assign(piece);
    Ok(())
}

/// Invert an `n x n` matrix across the whole group.
///
/// The root broadcasts $A$ and scatters the columns of $I_n$; each rank
/// solves $A X = I_{cols}$ for its columns and the root gathers the solved
/// columns back into place. Only the root passes `a` and gets `Some`.
pub fn parallel_inverse(
    comm: &mut Communicator,
    backend: &dyn ComputeBackend,
    a: Option<&Matrix>,
    n: usize,
) -> Result<Option<Matrix>, DistributedError> {
    let layout = balanced_assignment(n, comm.size());
    let shared = broadcast(comm, a.map(|m| Arc::new(m.clone())))?;
    let identity = (comm.rank() == COORDINATOR).then(|| Matrix::eye(n));
    let columns = scatter(comm, identity.as_ref(), &layout, Axis(1))?;
    trace!(
        "rank {} solving for {} identity column(s)",
        comm.rank(),
        columns.ncols()
    );
    let solved = backend.solve(&shared, &columns)?;
    Ok(gather(comm, solved, &layout, Axis(1), (n, n))?)
}

/// Multiply `a` (`n` rows) by `b` across the whole group.
///
/// The root scatters row groups of `a` and broadcasts `b`; each rank forms
/// its rows of the product and the root gathers them. Only the root passes
/// the operands and gets `Some`.
pub fn parallel_matmul(
    comm: &mut Communicator,
    backend: &dyn ComputeBackend,
    a: Option<&Matrix>,
    b: Option<&Matrix>,
    n: usize,
) -> Result<Option<Matrix>, DistributedError> {
    let layout = balanced_assignment(n, comm.size());
    let rows = scatter(comm, a, &layout, Axis(0))?;
    let right = broadcast(comm, b.map(|m| Arc::new(m.clone())))?;
    let product = backend.matmul(&rows, &right)?;
    Ok(gather(comm, product, &layout, Axis(0), (n, right.ncols()))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuBackend;
    use crate::distributed::comm::ProcessGroup;
    use approx::assert_relative_eq;
    use ndarray::array;
    use std::thread;

    /// Run `member` on ranks 1.. and `root` on rank 0 of a fresh group.
    fn with_group<R>(
        size: usize,
        member: fn(&mut Communicator) -> Result<(), DistributedError>,
        root: impl FnOnce(&mut Communicator) -> R,
    ) -> R {
        let mut comms = ProcessGroup::connect(size);
        let mut root_comm = comms.remove(0);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|mut comm| thread::spawn(move || member(&mut comm)))
            .collect();
        let out = root(&mut root_comm);
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        out
    }

    #[test]
    fn test_parallel_inverse_keeps_column_order() {
        let a = array![[2.0, 3.0], [1.0, 4.0]];
        let inv = with_group(
            3,
            |comm| parallel_inverse(comm, &CpuBackend::new(), None, 2).map(|_| ()),
            |comm| {
                parallel_inverse(comm, &CpuBackend::new(), Some(&a), 2)
                    .unwrap()
                    .unwrap()
            },
        );
        let expected = array![[0.8, -0.6], [-0.2, 0.4]];
        for (x, y) in inv.iter().zip(expected.iter()) {
            assert_relative_eq!(*x, *y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_parallel_matmul_matches_serial() {
        let a = Matrix::from_shape_fn((5, 5), |(i, j)| (i * 5 + j) as f64);
        let b = Matrix::from_shape_fn((5, 5), |(i, j)| if i == j { 2.0 } else { 0.5 });
        let got = with_group(
            4,
            |comm| parallel_matmul(comm, &CpuBackend::new(), None, None, 5).map(|_| ()),
            |comm| {
                parallel_matmul(comm, &CpuBackend::new(), Some(&a), Some(&b), 5)
                    .unwrap()
                    .unwrap()
            },
        );
        let expected = a.dot(&b);
        for (x, y) in got.iter().zip(expected.iter()) {
            assert_relative_eq!(*x, *y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_more_ranks_than_rows() {
        let a = array![[3.0]];
        let b = array![[2.0]];
        let got = with_group(
            3,
            |comm| parallel_matmul(comm, &CpuBackend::new(), None, None, 1).map(|_| ()),
            |comm| {
                parallel_matmul(comm, &CpuBackend::new(), Some(&a), Some(&b), 1)
                    .unwrap()
                    .unwrap()
            },
        );
        assert_eq!(got, array![[6.0]]);
    }

    #[test]
    fn test_gather_rejects_wrong_shape() {
        let mut comms = ProcessGroup::connect(2);
        let member = comms.pop().unwrap();
        let mut root = comms.pop().unwrap();
        member
            .send(0, Phase::Gather, Payload::Block(Matrix::zeros((2, 2))))
            .unwrap();

        let layout = balanced_assignment(2, 2);
        let err = gather(&mut root, Matrix::zeros((1, 2)), &layout, Axis(0), (2, 2)).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedResult { peer: 1, .. }));
    }
}
