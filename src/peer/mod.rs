//! Peer-wire protocol: handshake, message framing, and the single-peer
//! leech session built on top of them.
use thiserror::Error;

pub mod handshake;
pub mod message;
pub mod session;

pub use handshake::Handshake;
pub use message::Message;
pub use session::{PeerSession, Sink};

/// Errors in the handshake or message framing layer.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("handshake protocol string or info-hash mismatch")]
    HandshakeMismatch,

    #[error("frame length {len} exceeds the {} byte ceiling", message::MAX_FRAME_LEN)]
    FrameTooLarge { len: u32 },

    #[error("malformed message (id {id}): {reason}")]
    MalformedMessage { id: u8, reason: &'static str },

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// SHA-1 mismatch between a downloaded piece and its declared hash.
#[derive(Debug, Error)]
#[error("checksum mismatch on piece {piece}")]
pub struct ChecksumError {
    pub piece: usize,
}

/// The kind of failure that terminated a peer session.
#[derive(Debug, Error)]
pub enum SessionErrorKind {
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Checksum(#[from] ChecksumError),

    #[error("peer violated the piece protocol: {0}")]
    PieceViolation(&'static str),

    #[error("sink write failed: {0}")]
    Sink(#[from] std::io::Error),
}

/// The terminal error of a peer session: a kind plus, when relevant, the
/// piece index that was in flight.
#[derive(Debug, Error)]
#[error("session failed on piece {piece:?}: {kind}")]
pub struct SessionError {
    pub kind: SessionErrorKind,
    pub piece: Option<usize>,
}

impl SessionError {
    pub fn new(kind: SessionErrorKind, piece: Option<usize>) -> Self {
        Self { kind, piece }
    }
}
