//! Messages exchanged between ranks.
//!
//! Every message carries an explicit [`Phase`] tag. A receive names the
//! phase it expects, so a receive issued out of order is reported as a
//! mismatch instead of silently consuming the wrong payload.
//!
//! With the `distributed` feature every message type is serde-encodable so
//! it can cross a process boundary.

use std::fmt;
use std::sync::Arc;

use schurdet_core::Matrix;
#[cfg(feature = "distributed")]
use serde::{Deserialize, Serialize};

use super::comm::ProtocolError;
use super::{InversionMode, ProductMode};

/// Protocol phase a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "distributed", derive(Serialize, Deserialize))]
pub enum Phase {
    /// Run plan announced by the coordinator after factoring $A$.
    Plan,
    /// Point-to-point rows of C for one worker.
    Chunk,
    /// Broadcast of the shared operands $\{A^{-1}, B\}$.
    Operands,
    /// A worker's slice of $T$.
    Result,
    /// Collective broadcast of a single matrix.
    Broadcast,
    /// Collective scatter of a row or column group.
    Scatter,
    /// Collective gather of a row or column group.
    Gather,
    /// The group is being torn down.
    Abort,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What follows the plan message, as seen by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "distributed", derive(Serialize, Deserialize))]
pub struct Plan {
    /// Block order $n_2$.
    pub n2: usize,
    pub inversion: InversionMode,
    pub product: ProductMode,
}

/// Rows of C assigned to one worker, with their row numbers in C.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "distributed", derive(Serialize, Deserialize))]
pub struct RowChunk {
    pub rows: Matrix,
    pub indices: Vec<usize>,
}

/// Operands every worker needs, identical on every rank and immutable.
#[derive(Debug)]
#[cfg_attr(feature = "distributed", derive(Serialize, Deserialize))]
pub struct SharedOperands {
    pub a_inv: Matrix,
    pub b: Matrix,
}

/// One worker's rows of $T = C A^{-1} B$.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "distributed", derive(Serialize, Deserialize))]
pub struct PartialResult {
    pub product: Matrix,
    pub indices: Vec<usize>,
}

/// Message body.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "distributed", derive(Serialize, Deserialize))]
pub enum Payload {
    Plan(Plan),
    Chunk(RowChunk),
    Operands(Arc<SharedOperands>),
    Result(PartialResult),
    Matrix(Arc<Matrix>),
    Block(Matrix),
    Abort(String),
}

impl Payload {
    pub fn into_plan(self, phase: Phase) -> Result<Plan, ProtocolError> {
        match self {
            Payload::Plan(plan) => Ok(plan),
            _ => Err(ProtocolError::UnexpectedPayload(phase)),
        }
    }

    pub fn into_chunk(self, phase: Phase) -> Result<RowChunk, ProtocolError> {
        match self {
            Payload::Chunk(chunk) => Ok(chunk),
            _ => Err(ProtocolError::UnexpectedPayload(phase)),
        }
    }

    pub fn into_operands(self, phase: Phase) -> Result<Arc<SharedOperands>, ProtocolError> {
        match self {
            Payload::Operands(operands) => Ok(operands),
            _ => Err(ProtocolError::UnexpectedPayload(phase)),
        }
    }

    pub fn into_result(self, phase: Phase) -> Result<PartialResult, ProtocolError> {
        match self {
            Payload::Result(result) => Ok(result),
            _ => Err(ProtocolError::UnexpectedPayload(phase)),
        }
    }

    pub fn into_shared(self, phase: Phase) -> Result<Arc<Matrix>, ProtocolError> {
        match self {
            Payload::Matrix(m) => Ok(m),
            _ => Err(ProtocolError::UnexpectedPayload(phase)),
        }
    }

    pub fn into_block(self, phase: Phase) -> Result<Matrix, ProtocolError> {
        match self {
            Payload::Block(m) => Ok(m),
            _ => Err(ProtocolError::UnexpectedPayload(phase)),
        }
    }
}

/// A tagged message in flight.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "distributed", derive(Serialize, Deserialize))]
pub struct Envelope {
    pub source: usize,
    pub phase: Phase,
    pub payload: Payload,
}
