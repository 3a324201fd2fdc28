//! Ranks 1..P: wait for the plan, compute a slice of $T$, return it.

use log::{debug, trace};
use schurdet_core::partition::balanced_assignment;

use super::collective;
use super::comm::{Communicator, ProtocolError};
use super::message::{PartialResult, Payload, Phase};
use super::topology::COORDINATOR;
use super::{DistributedError, InversionMode, ProductMode};
use crate::backend::ComputeBackend;

/// What one worker did during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSummary {
    pub rank: usize,
    /// Rows of the product this rank computed.
    pub rows: usize,
    /// The run was aborted before this rank finished its share.
    pub cancelled: bool,
}

/// Serve one run. An abort from another rank ends the worker cleanly as
/// cancelled; a local failure aborts the group and is returned.
pub(crate) fn run_worker(
    comm: &mut Communicator,
    backend: &dyn ComputeBackend,
) -> Result<WorkerSummary, DistributedError> {
    let rank = comm.rank();
    match serve(comm, backend) {
        Ok(rows) => Ok(WorkerSummary {
            rank,
            rows,
            cancelled: false,
        }),
        Err(DistributedError::Protocol(ProtocolError::Aborted { peer, reason })) => {
            debug!("rank {} cancelled by rank {}: {}", rank, peer, reason);
            Ok(WorkerSummary {
                rank,
                rows: 0,
                cancelled: true,
            })
        }
        Err(e) => {
            comm.abort(&format!("rank {} failed: {}", rank, e));
            Err(e)
        }
    }
}

fn serve(comm: &mut Communicator, backend: &dyn ComputeBackend) -> Result<usize, DistributedError> {
    let plan = comm
        .recv(COORDINATOR, Phase::Plan)?
        .into_plan(Phase::Plan)?;
    trace!("rank {} received {:?}", comm.rank(), plan);

    if plan.inversion == InversionMode::Distributed {
        collective::parallel_inverse(comm, backend, None, plan.n2)?;
    }

    match plan.product {
        ProductMode::PointToPoint => {
            let chunk = comm
                .recv(COORDINATOR, Phase::Chunk)?
                .into_chunk(Phase::Chunk)?;
            let operands = comm
                .recv(COORDINATOR, Phase::Operands)?
                .into_operands(Phase::Operands)?;

            let partial = backend.matmul(&chunk.rows, &operands.a_inv)?;
            let product = backend.matmul(&partial, &operands.b)?;
            let rows = chunk.indices.len();
            comm.send(
                COORDINATOR,
                Phase::Result,
                Payload::Result(PartialResult {
                    product,
                    indices: chunk.indices,
                }),
            )?;
            Ok(rows)
        }
        ProductMode::Collective => {
            collective::parallel_matmul(comm, backend, None, None, plan.n2)?;
            collective::parallel_matmul(comm, backend, None, None, plan.n2)?;
            Ok(balanced_assignment(plan.n2, comm.size()).counts()[comm.rank()])
        }
    }
}
