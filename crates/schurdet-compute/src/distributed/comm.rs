//! Message passing between the ranks of a process group.
//!
//! A [`Transport`] moves envelopes between ranks; [`Communicator`] layers
//! the protocol rules on top of any transport. Messages from one source are
//! delivered in the order they were sent; messages from other sources that
//! arrive while a rank waits for a specific peer are parked and served
//! later. An `Abort` envelope from any source wins over everything else.
//!
//! | Transport | Ranks | Feature flag |
//! |-----------|-------|--------------|
//! | [`ChannelTransport`] | threads of one program | always |
//! | `MpiTransport` | processes of an `mpirun` launch | `distributed` |

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use thiserror::Error;

use super::message::{Envelope, Payload, Phase};

/// Errors raised by point-to-point and collective operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Rank {rank} expected a {expected} message from rank {peer}, got {found}")]
    PhaseMismatch {
        rank: usize,
        peer: usize,
        expected: Phase,
        found: Phase,
    },

    #[error("Run aborted by rank {peer}: {reason}")]
    Aborted { peer: usize, reason: String },

    #[error("Rank {rank} lost its connection to the group")]
    Disconnected { rank: usize },

    #[error("Payload does not match phase {0}")]
    UnexpectedPayload(Phase),

    #[error("Malformed result from rank {peer}: {message}")]
    MalformedResult { peer: usize, message: String },

    #[error("Rank {rank} is outside a group of {size}")]
    InvalidRank { rank: usize, size: usize },

    #[error("Transport failure: {0}")]
    Transport(String),
}

/// Moves envelopes between the ranks of a fixed-size group.
///
/// Implementations only deliver bytes or values; ordering per source,
/// parking and phase checks live in [`Communicator`].
pub trait Transport: Send + Sync {
    /// This endpoint's rank.
    fn rank(&self) -> usize;

    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// Deliver `envelope` to `dest`. Must not wait for `dest` to receive
    /// small messages.
    fn send(&self, dest: usize, envelope: Envelope) -> Result<(), ProtocolError>;

    /// Block until the next envelope for this rank arrives, from any source.
    fn recv(&self) -> Result<Envelope, ProtocolError>;
}

/// Group-wide cancellation flag.
///
/// Cloned into every rank. Setting it does not interrupt anything by itself;
/// [`Communicator::abort`] sets it and also wakes every blocked rank with an
/// `Abort` message.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// In-process transport: one mpsc inbox per rank.
pub struct ChannelTransport {
    rank: usize,
    peers: Vec<Sender<Envelope>>,
    inbox: Mutex<Receiver<Envelope>>,
}

impl Transport for ChannelTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, dest: usize, envelope: Envelope) -> Result<(), ProtocolError> {
        let peer = self.peers.get(dest).ok_or(ProtocolError::InvalidRank {
            rank: dest,
            size: self.size(),
        })?;
        peer.send(envelope)
            .map_err(|_| ProtocolError::Disconnected { rank: dest })
    }

    fn recv(&self) -> Result<Envelope, ProtocolError> {
        let disconnected = ProtocolError::Disconnected { rank: self.rank };
        let inbox = self.inbox.lock().map_err(|_| disconnected.clone())?;
        inbox.recv().map_err(|_| disconnected)
    }
}

/// A fixed-size set of connected communicators, one per rank.
pub struct ProcessGroup;

impl ProcessGroup {
    /// Wire up `size` in-process ranks. Rank `i` owns element `i` of the
    /// result; all of them share one cancellation token.
    pub fn connect(size: usize) -> Vec<Communicator> {
        let token = CancellationToken::new();
        let (senders, inboxes): (Vec<Sender<Envelope>>, Vec<Receiver<Envelope>>) =
            (0..size).map(|_| mpsc::channel()).unzip();

        inboxes
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| {
                let transport = ChannelTransport {
                    rank,
                    peers: senders.clone(),
                    inbox: Mutex::new(inbox),
                };
                Communicator::with_token(Arc::new(transport), token.clone())
            })
            .collect()
    }
}

/// One rank's endpoint into the group.
pub struct Communicator {
    transport: Arc<dyn Transport>,
    pending: VecDeque<Envelope>,
    token: CancellationToken,
}

impl Communicator {
    /// Endpoint over `transport` with a token of its own, for ranks that
    /// share no memory with the rest of the group.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_token(transport, CancellationToken::new())
    }

    fn with_token(transport: Arc<dyn Transport>, token: CancellationToken) -> Self {
        Self {
            transport,
            pending: VecDeque::new(),
            token,
        }
    }

    pub fn rank(&self) -> usize {
        self.transport.rank()
    }

    pub fn size(&self) -> usize {
        self.transport.size()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    fn check_rank(&self, rank: usize) -> Result<(), ProtocolError> {
        if rank >= self.size() {
            return Err(ProtocolError::InvalidRank {
                rank,
                size: self.size(),
            });
        }
        Ok(())
    }

    /// Send `payload` to `dest` under `phase`.
    pub fn send(&self, dest: usize, phase: Phase, payload: Payload) -> Result<(), ProtocolError> {
        self.check_rank(dest)?;
        self.transport.send(
            dest,
            Envelope {
                source: self.rank(),
                phase,
                payload,
            },
        )
    }

    /// Block until the next message from `peer` arrives and check its phase.
    pub fn recv(&mut self, peer: usize, phase: Phase) -> Result<Payload, ProtocolError> {
        self.check_rank(peer)?;

        let parked = self
            .pending
            .iter()
            .position(|e| e.phase == Phase::Abort)
            .or_else(|| self.pending.iter().position(|e| e.source == peer));
        if let Some(envelope) = parked.and_then(|pos| self.pending.remove(pos)) {
            return self.accept(envelope, peer, phase);
        }

        loop {
            let envelope = self.transport.recv()?;
            if envelope.source == peer || envelope.phase == Phase::Abort {
                return self.accept(envelope, peer, phase);
            }
            self.pending.push_back(envelope);
        }
    }

    fn accept(&self, envelope: Envelope, peer: usize, phase: Phase) -> Result<Payload, ProtocolError> {
        if let Payload::Abort(reason) = envelope.payload {
            self.token.cancel();
            return Err(ProtocolError::Aborted {
                peer: envelope.source,
                reason,
            });
        }
        if envelope.phase != phase {
            return Err(ProtocolError::PhaseMismatch {
                rank: self.rank(),
                peer,
                expected: phase,
                found: envelope.phase,
            });
        }
        Ok(envelope.payload)
    }

    /// Cancel the group and wake every other rank with an `Abort` message.
    pub fn abort(&self, reason: &str) {
        self.abort_handle().abort(reason);
    }

    /// A detached handle that can abort the group without borrowing `self`.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            transport: Arc::clone(&self.transport),
            token: self.token.clone(),
        }
    }
}

/// Sends `Abort` to every other rank of the group.
#[derive(Clone)]
pub struct AbortHandle {
    transport: Arc<dyn Transport>,
    token: CancellationToken,
}

impl AbortHandle {
    /// Ranks that have already finished may be gone; failed sends to them
    /// are ignored.
    pub fn abort(&self, reason: &str) {
        let rank = self.transport.rank();
        if self.token.is_cancelled() {
            debug!("rank {} abort after cancellation: {}", rank, reason);
        } else {
            warn!("rank {} aborting the group: {}", rank, reason);
        }
        self.token.cancel();
        for dest in (0..self.transport.size()).filter(|&dest| dest != rank) {
            let _ = self.transport.send(
                dest,
                Envelope {
                    source: rank,
                    phase: Phase::Abort,
                    payload: Payload::Abort(reason.to_string()),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::message::Plan;
    use crate::distributed::{InversionMode, ProductMode};
    use schurdet_core::Matrix;
    use std::thread;

    #[test]
    fn test_point_to_point_round_trip() {
        let mut comms = ProcessGroup::connect(2);
        let mut worker = comms.pop().unwrap();
        let mut root = comms.pop().unwrap();

        let handle = thread::spawn(move || {
            let payload = worker.recv(0, Phase::Plan).unwrap();
            assert!(matches!(payload, Payload::Plan(Plan { n2: 2, .. })));
            worker
                .send(0, Phase::Gather, Payload::Block(Matrix::eye(2)))
                .unwrap();
        });

        let plan = Plan {
            n2: 2,
            inversion: InversionMode::Local,
            product: ProductMode::PointToPoint,
        };
        root.send(1, Phase::Plan, Payload::Plan(plan)).unwrap();
        let reply = root.recv(1, Phase::Gather).unwrap();
        assert!(matches!(reply, Payload::Block(m) if m == Matrix::eye(2)));
        handle.join().unwrap();
    }

    #[test]
    fn test_misordered_receive_fails_fast() {
        let mut comms = ProcessGroup::connect(2);
        let mut worker = comms.pop().unwrap();
        let root = comms.pop().unwrap();
        root.send(1, Phase::Broadcast, Payload::Block(Matrix::eye(1)))
            .unwrap();

        let err = worker.recv(0, Phase::Chunk).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::PhaseMismatch {
                rank: 1,
                peer: 0,
                expected: Phase::Chunk,
                found: Phase::Broadcast,
            }
        );
    }

    #[test]
    fn test_other_sources_are_parked() {
        let mut comms = ProcessGroup::connect(3);
        let two = comms.pop().unwrap();
        let one = comms.pop().unwrap();
        let mut root = comms.pop().unwrap();

        two.send(0, Phase::Result, Payload::Block(Matrix::zeros((1, 1))))
            .unwrap();
        one.send(0, Phase::Result, Payload::Block(Matrix::eye(1)))
            .unwrap();

        let first = root.recv(1, Phase::Result).unwrap();
        assert!(matches!(first, Payload::Block(m) if m[[0, 0]] == 1.0));
        let second = root.recv(2, Phase::Result).unwrap();
        assert!(matches!(second, Payload::Block(m) if m[[0, 0]] == 0.0));
    }

    #[test]
    fn test_abort_unblocks_receiver() {
        let mut comms = ProcessGroup::connect(3);
        let mut two = comms.pop().unwrap();
        let _one = comms.pop().unwrap();
        let root = comms.pop().unwrap();

        let handle = thread::spawn(move || two.recv(0, Phase::Chunk));
        root.abort("A singular");
        let err = handle.join().unwrap().unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Aborted {
                peer: 0,
                reason: "A singular".into(),
            }
        );
        assert!(root.token().is_cancelled());
    }

    #[test]
    fn test_separate_endpoints_do_not_share_cancellation() {
        let mut comms = ProcessGroup::connect(2);
        let mut one = comms.pop().unwrap();
        let root = Communicator::new(comms.pop().unwrap().transport);
        root.abort("coordinator failed in VALIDATING");

        assert!(root.token().is_cancelled());
        assert!(!one.token().is_cancelled());
        assert!(matches!(
            one.recv(0, Phase::Plan),
            Err(ProtocolError::Aborted { peer: 0, .. })
        ));
        assert!(one.token().is_cancelled());
    }

    #[test]
    fn test_invalid_rank() {
        let mut comms = ProcessGroup::connect(1);
        let mut root = comms.pop().unwrap();
        assert!(matches!(
            root.send(3, Phase::Plan, Payload::Abort(String::new())),
            Err(ProtocolError::InvalidRank { rank: 3, size: 1 })
        ));
        assert!(matches!(
            root.recv(1, Phase::Plan),
            Err(ProtocolError::InvalidRank { rank: 1, size: 1 })
        ));
    }
}
