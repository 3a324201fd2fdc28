//! Process-count validation and role assignment.

use std::ops::Range;

use schurdet_core::partition::balanced_assignment;
use schurdet_core::{ShapePolicy, WorkAssignment};
use thiserror::Error;

/// Rank of the coordinator.
pub const COORDINATOR: usize = 0;

/// Errors when the process count does not fit the problem.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error(
        "At least 2 processes are required (1 coordinator and 1+ workers), got {processes}"
    )]
    NoWorkers { processes: usize },

    #[error(
        "The number of workers ({workers}) must equal the submatrix order ({n2}); \
         run again with {required_processes} processes"
    )]
    WorkerCountMismatch {
        workers: usize,
        n2: usize,
        required_processes: usize,
    },
}

/// Role of a rank. Fixed for the lifetime of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Coordinator,
    Worker,
}

impl Role {
    /// Rank 0 coordinates, every other rank works.
    pub fn of(rank: usize) -> Self {
        if rank == COORDINATOR {
            Self::Coordinator
        } else {
            Self::Worker
        }
    }
}

/// A validated process group layout for one problem size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessTopology {
    processes: usize,
    n2: usize,
}

impl ProcessTopology {
    /// Check `processes` against the block order `n2` under `policy`.
    pub fn new(processes: usize, n2: usize, policy: ShapePolicy) -> Result<Self, TopologyError> {
        let workers = processes.saturating_sub(1);
        if workers == 0 {
            return Err(TopologyError::NoWorkers { processes });
        }
        if policy.requires_exact_workers() && workers != n2 {
            return Err(TopologyError::WorkerCountMismatch {
                workers,
                n2,
                required_processes: n2 + 1,
            });
        }
        Ok(Self { processes, n2 })
    }

    pub fn processes(&self) -> usize {
        self.processes
    }

    pub fn workers(&self) -> usize {
        self.processes - 1
    }

    pub fn n2(&self) -> usize {
        self.n2
    }

    /// Ranks of the workers, in dispatch order.
    pub fn worker_ranks(&self) -> Range<usize> {
        1..self.processes
    }

    /// Rows of C per worker; slot `i` belongs to rank `i + 1`.
    pub fn worker_assignment(&self) -> WorkAssignment {
        balanced_assignment(self.n2, self.workers())
    }

    /// Rows (or identity columns) per rank for collective operations;
    /// slot `i` belongs to rank `i`.
    pub fn rank_assignment(&self) -> WorkAssignment {
        balanced_assignment(self.n2, self.processes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_policy_names_required_processes() {
        let err = ProcessTopology::new(4, 4, ShapePolicy::EvenExact).unwrap_err();
        assert_eq!(
            err,
            TopologyError::WorkerCountMismatch {
                workers: 3,
                n2: 4,
                required_processes: 5,
            }
        );
        assert!(err.to_string().contains("run again with 5 processes"));
        assert!(ProcessTopology::new(5, 4, ShapePolicy::EvenExact).is_ok());
    }

    #[test]
    fn test_balanced_policies_accept_any_worker_count() {
        for policy in [ShapePolicy::EvenBalanced, ShapePolicy::PowerOfTwo] {
            let topo = ProcessTopology::new(4, 4, policy).unwrap();
            assert_eq!(topo.workers(), 3);
            assert_eq!(topo.worker_assignment().counts(), &[2, 1, 1]);
            assert_eq!(topo.rank_assignment().counts(), &[1, 1, 1, 1]);
        }
    }

    #[test]
    fn test_single_process_has_no_workers() {
        for processes in [0, 1] {
            assert_eq!(
                ProcessTopology::new(processes, 2, ShapePolicy::EvenBalanced),
                Err(TopologyError::NoWorkers { processes })
            );
        }
    }

    #[test]
    fn test_roles() {
        let topo = ProcessTopology::new(3, 2, ShapePolicy::EvenExact).unwrap();
        assert_eq!(Role::of(0), Role::Coordinator);
        assert_eq!(Role::of(2), Role::Worker);
        assert_eq!(topo.worker_ranks(), 1..3);
    }
}
