//! # Schurdet Compute
//!
//! Execution layer of the schurdet workspace. A
//! [`ComputeBackend`](backend::ComputeBackend) trait isolates the protocol
//! from how dense products and solves are executed, and the
//! [`distributed`] module runs the coordinator/worker Schur-complement
//! protocol over a process group.
//!
//! ## Available backends
//!
//! | Backend | Feature flag | Status |
//! |---------|-------------|--------|
//! | CPU (Rayon) | `cpu` (default) | Implemented |
//!
//! ## Transports
//!
//! | Transport | Feature flag | Ranks |
//! |-----------|-------------|-------|
//! | In-process channels | always | threads |
//! | Distributed (MPI) | `distributed` | processes under `mpirun` |
//!
//! ## Protocol modes
//!
//! | Stage | Modes |
//! |-------|-------|
//! | $A^{-1}$ | local on the coordinator, or distributed column solve |
//! | $T = C A^{-1} B$ | point-to-point row chunks, or collective multiplies |

pub mod backend;

#[cfg(feature = "cpu")]
pub mod cpu;

pub mod distributed;

pub use backend::{ComputeBackend, ComputeError, DeviceInfo};
pub use distributed::{
    DistributedError, GroupOutcome, InversionMode, ProductMode, RankOutcome, RunConfig,
    SchurReport, Supervisor, Termination,
};

#[cfg(feature = "cpu")]
pub use cpu::CpuBackend;
