//! Rank 0: loads the matrix, validates, factors $A$, distributes the
//! product and assembles $\det M$.

use std::sync::Arc;
use std::time::Instant;

use log::{debug, info};
use ndarray::Axis;
use schurdet_core::linalg::is_negligible;
use schurdet_core::partition::split_blocks;
use schurdet_core::schur::{combine, ensure_nonsingular, schur_complement};
use schurdet_core::{Blocks, Matrix, ParseError, WorkAssignment};

use super::collective;
use super::comm::{Communicator, ProtocolError};
use super::message::{Payload, Phase, Plan, RowChunk, SharedOperands};
use super::topology::ProcessTopology;
use super::{
    CoordinatorState, DistributedError, InversionMode, ProductMode, RunConfig, SchurReport,
    Termination,
};
use crate::backend::ComputeBackend;

pub(crate) struct Coordinator<'a> {
    comm: &'a mut Communicator,
    backend: &'a dyn ComputeBackend,
    config: &'a RunConfig,
    state: CoordinatorState,
}

impl<'a> Coordinator<'a> {
    pub fn new(
        comm: &'a mut Communicator,
        backend: &'a dyn ComputeBackend,
        config: &'a RunConfig,
    ) -> Self {
        Self {
            comm,
            backend,
            config,
            state: CoordinatorState::Loading,
        }
    }

    /// Drive the run to `Done`, aborting the whole group on any failure.
    pub fn run<F>(mut self, load: F) -> Result<SchurReport, DistributedError>
    where
        F: FnOnce() -> Result<Matrix, ParseError>,
    {
        match self.execute(load) {
            Ok(report) => Ok(report),
            Err(e) => {
                let reason = format!("coordinator failed in {}: {}", self.state, e);
                self.enter(CoordinatorState::Aborted);
                self.comm.abort(&reason);
                Err(e)
            }
        }
    }

    fn enter(&mut self, state: CoordinatorState) {
        debug!("coordinator: {} -> {}", self.state, state);
        self.state = state;
    }

    fn execute<F>(&mut self, load: F) -> Result<SchurReport, DistributedError>
    where
        F: FnOnce() -> Result<Matrix, ParseError>,
    {
        let matrix = load()?;
        info!("Loaded {}x{} matrix", matrix.nrows(), matrix.ncols());

        self.enter(CoordinatorState::Validating);
        let policy = self.config.shape_policy;
        let blocks = split_blocks(&matrix, policy)?;
        let n2 = blocks.half();
        let topology = ProcessTopology::new(self.comm.size(), n2, policy)?;
        info!(
            "Split into {}x{} blocks for {} worker(s) ({})",
            n2,
            n2,
            topology.workers(),
            policy
        );

        self.enter(CoordinatorState::FactoringA);
        let tolerance = self.config.singular_tolerance;
        let det_a = ensure_nonsingular(self.backend.determinant(&blocks.a)?, tolerance)
            .map_err(DistributedError::from_factoring)?;
        debug!("det(A) = {:.6e}", det_a);

        let started = Instant::now();
        let plan = Plan {
            n2,
            inversion: self.config.inversion,
            product: self.config.product,
        };
        for worker in topology.worker_ranks() {
            self.comm.send(worker, Phase::Plan, Payload::Plan(plan))?;
        }

        let a_inv = match plan.inversion {
            InversionMode::Local => self.backend.inverse(&blocks.a)?,
            InversionMode::Distributed => {
                collective::parallel_inverse(self.comm, self.backend, Some(&blocks.a), n2)?
                    .ok_or(ProtocolError::UnexpectedPayload(Phase::Gather))?
            }
        };

        self.enter(CoordinatorState::Dispatching);
        let (assignment, t) = match plan.product {
            ProductMode::PointToPoint => {
                let assignment = topology.worker_assignment();
                self.dispatch(&topology, &assignment, &blocks, &a_inv)?;
                self.enter(CoordinatorState::AwaitingResults);
                let t = self.collect(&topology, &assignment, n2)?;
                (assignment, t)
            }
            ProductMode::Collective => {
                let ca = collective::parallel_matmul(
                    self.comm,
                    self.backend,
                    Some(&blocks.c),
                    Some(&a_inv),
                    n2,
                )?
                .ok_or(ProtocolError::UnexpectedPayload(Phase::Gather))?;
                self.enter(CoordinatorState::AwaitingResults);
                let t = collective::parallel_matmul(
                    self.comm,
                    self.backend,
                    Some(&ca),
                    Some(&blocks.b),
                    n2,
                )?
                .ok_or(ProtocolError::UnexpectedPayload(Phase::Gather))?;
                (topology.rank_assignment(), t)
            }
        };

        self.enter(CoordinatorState::Assembling);
        let s = schur_complement(&blocks.d, &t)?;

        self.enter(CoordinatorState::Finalizing);
        let det_s = self.backend.determinant(&s)?;
        let (det_m, termination) =
            if self.config.short_circuit_singular && is_negligible(det_s, tolerance) {
                info!("det(S) = {:.3e} is negligible, stopping early", det_s);
                (None, Termination::SingularResult)
            } else {
                (Some(combine(det_a, det_s)), Termination::Completed)
            };
        let elapsed = started.elapsed();

        self.enter(CoordinatorState::Done);
        info!("Finished in {:.3} ms", elapsed.as_secs_f64() * 1e3);
        Ok(SchurReport {
            matrix,
            blocks,
            det_a,
            a_inv,
            assignment,
            t,
            s,
            det_s,
            det_m,
            elapsed,
            termination,
            processes: topology.processes(),
            tolerance,
        })
    }

    /// Send every worker its rows of C, then the shared operands.
    fn dispatch(
        &mut self,
        topology: &ProcessTopology,
        assignment: &WorkAssignment,
        blocks: &Blocks,
        a_inv: &Matrix,
    ) -> Result<(), DistributedError> {
        for (slot, worker) in topology.worker_ranks().enumerate() {
            let indices = assignment.indices(slot);
            let rows = blocks.c.select(Axis(0), &indices);
            debug!("rank {} <- rows {:?} of C", worker, indices);
            self.comm
                .send(worker, Phase::Chunk, Payload::Chunk(RowChunk { rows, indices }))?;
        }

        let operands = Arc::new(SharedOperands {
            a_inv: a_inv.clone(),
            b: blocks.b.clone(),
        });
        for worker in topology.worker_ranks() {
            self.comm
                .send(worker, Phase::Operands, Payload::Operands(Arc::clone(&operands)))?;
        }
        Ok(())
    }

    /// Receive one partial result per worker and write it into $T$.
    fn collect(
        &mut self,
        topology: &ProcessTopology,
        assignment: &WorkAssignment,
        n2: usize,
    ) -> Result<Matrix, DistributedError> {
        let mut t = Matrix::zeros((n2, n2));
        for (slot, worker) in topology.worker_ranks().enumerate() {
            let result = self
                .comm
                .recv(worker, Phase::Result)?
                .into_result(Phase::Result)?;

            let expected = assignment.indices(slot);
            if result.indices != expected {
                return Err(ProtocolError::MalformedResult {
                    peer: worker,
                    message: format!(
                        "returned rows {:?}, assigned {:?}",
                        result.indices, expected
                    ),
                }
                .into());
            }
            if result.product.dim() != (expected.len(), n2) {
                return Err(ProtocolError::MalformedResult {
                    peer: worker,
                    message: format!(
                        "product is {:?}, expected {:?}",
                        result.product.dim(),
                        (expected.len(), n2)
                    ),
                }
                .into());
            }

            for (row, &index) in result.product.outer_iter().zip(result.indices.iter()) {
                t.row_mut(index).assign(&row);
            }
            debug!("rank {} -> {} row(s) of T", worker, expected.len());
        }
        Ok(t)
    }
}
