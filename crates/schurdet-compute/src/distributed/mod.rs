//! Distributed Schur-complement determinant over a fixed process group.
//!
//! The group has one coordinator (rank 0) and $W = P - 1$ workers, all
//! started together and alive for the whole run. Ranks share no mutable
//! state; they exchange owned, phase-tagged messages.
//!
//! The strategy is:
//!
//! - **Block split**: the coordinator cuts $M$ into $A, B, C, D$ and factors
//!   $A$ (or inverts it across the whole group by solving against scattered
//!   identity columns).
//! - **Block-row distribution**: each worker receives a contiguous group of
//!   rows of $C$ plus the broadcast operands $\{A^{-1}, B\}$ and returns its
//!   rows of $T = C A^{-1} B$.
//! - **Reassembly**: the coordinator writes every partial result back at its
//!   row indices, forms $S = D - T$ and returns
//!   $\det M = \det A \cdot \det S$.
//!
//! Any failed precondition aborts the whole group: the coordinator cancels
//! its token and wakes every blocked worker, then returns the error.
//!
//! Ranks talk through a [`Transport`]. [`Supervisor::execute`] runs the whole
//! group as threads over in-process channels; with the `distributed`
//! feature, [`Supervisor::run_rank`] runs one rank of an `mpirun` launch
//! over [`mpi_comm::MpiTransport`].

pub mod collective;
pub mod comm;
mod coordinator;
pub mod message;
#[cfg(feature = "distributed")]
pub mod mpi_comm;
mod supervisor;
pub mod topology;
mod worker;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use schurdet_core::linalg::{is_negligible, LinAlgError};
use schurdet_core::{Blocks, Matrix, ParseError, ShapeError, ShapePolicy, WorkAssignment};

use crate::backend::ComputeError;

pub use comm::{
    AbortHandle, CancellationToken, ChannelTransport, Communicator, ProcessGroup, ProtocolError,
    Transport,
};
pub use message::{Envelope, Payload, PartialResult, Phase, Plan, RowChunk, SharedOperands};
pub use supervisor::{GroupOutcome, RankOutcome, Supervisor};
pub use topology::{ProcessTopology, Role, TopologyError, COORDINATOR};
pub use worker::WorkerSummary;

/// How $A^{-1}$ is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InversionMode {
    /// The coordinator inverts $A$ on its own backend.
    #[default]
    Local,
    /// Every rank solves $A X = I_{cols}$ for its share of identity columns.
    Distributed,
}

/// How $T = C A^{-1} B$ is distributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProductMode {
    /// Coordinator sends row chunks to workers and collects their products.
    #[default]
    PointToPoint,
    /// All ranks, coordinator included, take part in two collective
    /// row-scatter / broadcast / gather multiplies.
    Collective,
}

/// Parameters of one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Total process count $P$, coordinator included.
    pub processes: usize,
    pub shape_policy: ShapePolicy,
    pub inversion: InversionMode,
    pub product: ProductMode,
    /// Absolute threshold below which a determinant counts as zero.
    pub singular_tolerance: f64,
    /// Stop before forming $\det M$ when $\det S$ is negligible.
    pub short_circuit_singular: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            processes: 2,
            shape_policy: ShapePolicy::default(),
            inversion: InversionMode::default(),
            product: ProductMode::default(),
            singular_tolerance: 1e-8,
            short_circuit_singular: false,
        }
    }
}

/// Coordinator state machine. `Aborted` is reachable from every other
/// state except `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Loading,
    Validating,
    FactoringA,
    Dispatching,
    AwaitingResults,
    Assembling,
    Finalizing,
    Done,
    Aborted,
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Loading => "LOADING",
            Self::Validating => "VALIDATING",
            Self::FactoringA => "FACTORING_A",
            Self::Dispatching => "DISPATCHING",
            Self::AwaitingResults => "AWAITING_RESULTS",
            Self::Assembling => "ASSEMBLING",
            Self::Finalizing => "FINALIZING",
            Self::Done => "DONE",
            Self::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

/// Errors that end a distributed run. Every one of them aborts the group.
#[derive(Debug, Error)]
pub enum DistributedError {
    #[error("Input error: {0}")]
    Input(#[from] ParseError),

    #[error("Invalid matrix shape: {0}")]
    Shape(#[from] ShapeError),

    #[error("Invalid process configuration: {0}")]
    Topology(#[from] TopologyError),

    #[error("Block A is singular (det(A) = {det:.3e}, tolerance {tolerance:.1e}), cannot continue")]
    SingularBlock { det: f64, tolerance: f64 },

    #[error("Linear algebra error: {0}")]
    LinAlg(#[from] LinAlgError),

    #[error("Compute backend error: {0}")]
    Compute(#[from] ComputeError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Rank {rank} failed: {message}")]
    WorkerFailed { rank: usize, message: String },
}

impl DistributedError {
    /// Report a singular $A$ as [`DistributedError::SingularBlock`].
    fn from_factoring(e: LinAlgError) -> Self {
        match e {
            LinAlgError::Singular { det, tolerance } => Self::SingularBlock { det, tolerance },
            other => Self::LinAlg(other),
        }
    }

    /// Coordinator state a precondition failure belongs to, if it is one.
    pub fn state(&self) -> Option<CoordinatorState> {
        match self {
            Self::Input(_) => Some(CoordinatorState::Loading),
            Self::Shape(_) | Self::Topology(_) => Some(CoordinatorState::Validating),
            Self::SingularBlock { .. } => Some(CoordinatorState::FactoringA),
            _ => None,
        }
    }
}

/// How a successful run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Termination {
    /// $\det M$ was computed.
    Completed,
    /// $\det S$ was negligible and the run stopped before forming $\det M$.
    SingularResult,
}

/// Every intermediate value of a run, for printing or serialisation.
#[derive(Debug, Clone)]
pub struct SchurReport {
    pub matrix: Matrix,
    pub blocks: Blocks,
    pub det_a: f64,
    pub a_inv: Matrix,
    /// Row layout used for $C$ (over workers, or over all ranks when the
    /// product is collective).
    pub assignment: WorkAssignment,
    pub t: Matrix,
    pub s: Matrix,
    pub det_s: f64,
    /// `None` when the run short-circuited on a singular $S$.
    pub det_m: Option<f64>,
    /// Wall time from the first message of the run to $\det M$.
    pub elapsed: Duration,
    pub termination: Termination,
    pub processes: usize,
    pub tolerance: f64,
}

impl SchurReport {
    /// Whether $M$ is singular at the run's tolerance.
    pub fn is_singular(&self) -> bool {
        match (self.termination, self.det_m) {
            (Termination::Completed, Some(det)) => is_negligible(det, self.tolerance),
            _ => true,
        }
    }
}
