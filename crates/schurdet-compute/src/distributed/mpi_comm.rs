//! MPI transport: one OS process per rank.
//!
//! Requires the `distributed` feature flag and an MPI installation. Each
//! envelope travels as one bincode-encoded byte message on the world
//! communicator; [`Communicator`] keeps its per-source ordering and phase
//! checks on top.
//!
//! # Usage
//!
//! ```ignore
//! let (_universe, comm) = connect_world()?;
//! match supervisor.run_rank(comm, load) { ... }
//! ```
//!
//! Sends are blocking standard-mode sends. The protocol never has two ranks
//! sending to each other at the same time, and abort messages are small
//! enough for the eager path, so a rank that has already finished does not
//! stall an abort.

use std::sync::Arc;

use mpi::environment::Universe;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;

use super::comm::{Communicator, ProtocolError, Transport};
use super::message::Envelope;

/// Encode an envelope for the wire.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, ProtocolError> {
    bincode::serialize(envelope).map_err(|e| ProtocolError::Transport(e.to_string()))
}

/// Decode an envelope received from the wire.
pub fn decode(bytes: &[u8]) -> Result<Envelope, ProtocolError> {
    bincode::deserialize(bytes).map_err(|e| ProtocolError::Transport(e.to_string()))
}

/// Transport over the MPI world communicator.
///
/// Holds no MPI handle; the world communicator is looked up per call, so
/// MPI must stay initialised for as long as the transport is used.
pub struct MpiTransport {
    rank: usize,
    size: usize,
}

impl MpiTransport {
    /// Must be called after `mpi::initialize()`.
    pub fn new() -> Self {
        let world = SimpleCommunicator::world();
        Self {
            rank: world.rank() as usize,
            size: world.size() as usize,
        }
    }
}

impl Default for MpiTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MpiTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send(&self, dest: usize, envelope: Envelope) -> Result<(), ProtocolError> {
        if dest >= self.size {
            return Err(ProtocolError::InvalidRank {
                rank: dest,
                size: self.size,
            });
        }
        let bytes = encode(&envelope)?;
        let world = SimpleCommunicator::world();
        world.process_at_rank(dest as i32).send(&bytes[..]);
        Ok(())
    }

    fn recv(&self) -> Result<Envelope, ProtocolError> {
        let world = SimpleCommunicator::world();
        let (bytes, status) = world.any_process().receive_vec::<u8>();
        let envelope = decode(&bytes)?;

        let sender = status.source_rank() as usize;
        if envelope.source != sender {
            return Err(ProtocolError::MalformedResult {
                peer: sender,
                message: format!("envelope claims to come from rank {}", envelope.source),
            });
        }
        Ok(envelope)
    }
}

/// Initialise MPI and connect this process to the world group.
///
/// The returned universe finalises MPI when dropped; keep it alive until
/// the communicator is no longer used.
pub fn connect_world() -> Result<(Universe, Communicator), ProtocolError> {
    let universe = mpi::initialize()
        .ok_or_else(|| ProtocolError::Transport("MPI is already initialised".into()))?;
    let comm = Communicator::new(Arc::new(MpiTransport::new()));
    Ok((universe, comm))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::message::{PartialResult, Payload, Phase};
    use ndarray::array;

    #[test]
    fn test_wire_format_keeps_rows_and_indices() {
        let envelope = Envelope {
            source: 2,
            phase: Phase::Result,
            payload: Payload::Result(PartialResult {
                product: array![[1.2, 0.8]],
                indices: vec![1],
            }),
        };
        let decoded = decode(&encode(&envelope).unwrap()).unwrap();

        assert_eq!(decoded.source, 2);
        assert_eq!(decoded.phase, Phase::Result);
        let result = decoded.payload.into_result(Phase::Result).unwrap();
        assert_eq!(result.product, array![[1.2, 0.8]]);
        assert_eq!(result.indices, vec![1]);
    }

    #[test]
    fn test_garbage_is_a_transport_error() {
        assert!(matches!(
            decode(&[0xff, 0x01]),
            Err(ProtocolError::Transport(_))
        ));
    }
}
