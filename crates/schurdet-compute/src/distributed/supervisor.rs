//! Starts a process group, runs one job on it and joins every rank.
//!
//! [`Supervisor::execute`] owns the whole group as threads of this program.
//! [`Supervisor::run_rank`] runs a single rank when the group is launched
//! from outside, one process per rank.

use std::sync::Arc;
use std::thread;

use log::info;
use schurdet_core::{Matrix, ParseError};

use super::comm::{AbortHandle, Communicator, ProcessGroup};
use super::coordinator::Coordinator;
use super::topology::{Role, TopologyError};
use super::worker::{self, WorkerSummary};
use super::{DistributedError, RunConfig, SchurReport};
use crate::backend::ComputeBackend;

/// Results of every rank after the group has shut down.
#[derive(Debug)]
pub struct GroupOutcome {
    pub coordinator: Result<SchurReport, DistributedError>,
    /// One entry per worker, in rank order.
    pub workers: Vec<Result<WorkerSummary, DistributedError>>,
}

impl GroupOutcome {
    /// Whether every worker that returned was cancelled by an abort.
    pub fn all_workers_cancelled(&self) -> bool {
        self.workers
            .iter()
            .all(|w| matches!(w, Ok(summary) if summary.cancelled))
    }
}

/// What one rank returned when it ran on its own.
#[derive(Debug)]
pub enum RankOutcome {
    Coordinator(Result<SchurReport, DistributedError>),
    Worker(Result<WorkerSummary, DistributedError>),
}

/// Aborts the group if the owning rank unwinds.
struct AbortOnPanic(AbortHandle);

impl Drop for AbortOnPanic {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.abort("rank panicked");
        }
    }
}

/// Runs jobs on a fresh group of `config.processes` ranks, one thread each.
pub struct Supervisor {
    config: RunConfig,
    backend: Arc<dyn ComputeBackend>,
}

impl Supervisor {
    pub fn new(config: RunConfig, backend: Arc<dyn ComputeBackend>) -> Self {
        Self { config, backend }
    }

    /// Run a job and return the coordinator's result.
    pub fn run<F>(&self, load: F) -> Result<SchurReport, DistributedError>
    where
        F: FnOnce() -> Result<Matrix, ParseError>,
    {
        self.execute(load).coordinator
    }

    /// Run a job on an in-memory matrix.
    pub fn run_matrix(&self, matrix: Matrix) -> Result<SchurReport, DistributedError> {
        self.run(move || Ok(matrix))
    }

    /// Run this rank's share of a job on an already connected communicator.
    ///
    /// The group size comes from `comm`, not from `config.processes`.
    /// `load` only runs on the coordinator.
    pub fn run_rank<F>(&self, mut comm: Communicator, load: F) -> RankOutcome
    where
        F: FnOnce() -> Result<Matrix, ParseError>,
    {
        let _guard = AbortOnPanic(comm.abort_handle());
        let backend = self.backend.as_ref();
        match Role::of(comm.rank()) {
            Role::Coordinator => {
                RankOutcome::Coordinator(Coordinator::new(&mut comm, backend, &self.config).run(load))
            }
            Role::Worker => RankOutcome::Worker(worker::run_worker(&mut comm, backend)),
        }
    }

    /// Run a job and report every rank's outcome.
    ///
    /// `load` runs on the coordinator once all workers are up. Workers
    /// always terminate: either the run completes or the coordinator aborts
    /// the group.
    pub fn execute<F>(&self, load: F) -> GroupOutcome
    where
        F: FnOnce() -> Result<Matrix, ParseError>,
    {
        let processes = self.config.processes;
        if processes == 0 {
            return GroupOutcome {
                coordinator: Err(TopologyError::NoWorkers { processes }.into()),
                workers: Vec::new(),
            };
        }

        let mut comms = ProcessGroup::connect(processes);
        let mut root = comms.remove(0);
        info!(
            "Starting {} rank(s) on {}",
            processes,
            self.backend.device_info().name
        );

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(comms.len());
            let mut spawn_error = None;
            for mut comm in comms {
                let rank = comm.rank();
                let backend = self.backend.as_ref();
                let guard = AbortOnPanic(comm.abort_handle());
                let spawned = thread::Builder::new()
                    .name(format!("rank-{}", rank))
                    .spawn_scoped(scope, move || {
                        let _guard = guard;
                        worker::run_worker(&mut comm, backend)
                    });
                match spawned {
                    Ok(handle) => handles.push((rank, handle)),
                    Err(e) => {
                        spawn_error.get_or_insert(DistributedError::WorkerFailed {
                            rank,
                            message: format!("could not start thread: {}", e),
                        });
                    }
                }
            }

            let coordinator = match spawn_error {
                Some(e) => {
                    root.abort(&e.to_string());
                    Err(e)
                }
                None => {
                    let _guard = AbortOnPanic(root.abort_handle());
                    Coordinator::new(&mut root, self.backend.as_ref(), &self.config).run(load)
                }
            };

            let workers = handles
                .into_iter()
                .map(|(rank, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        Err(DistributedError::WorkerFailed {
                            rank,
                            message: "thread panicked".into(),
                        })
                    })
                })
                .collect();

            GroupOutcome {
                coordinator,
                workers,
            }
        })
    }
}
