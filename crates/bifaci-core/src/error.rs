//! Error types for the Bifaci protocol core.
//!
//! Layered on top of `bifaci_proto::ProtoError`: this crate additionally
//! reports I/O failures, ordering faults, and handshake failures.
//!
//! We keep `io::Error` at the boundary rather than letting it leak through
//! call signatures, so callers can match on `CoreError` without reaching
//! into `ErrorKind`.

use std::io;

use thiserror::Error;

/// Errors that can occur reading, writing, sequencing, or handshaking
/// frames.
#[derive(Error, Debug)]
pub enum CoreError {
    /// The underlying byte stream failed.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// A frame was structurally invalid or violated a negotiated limit.
    #[error("protocol error: {0}")]
    Protocol(#[from] bifaci_proto::ProtoError),

    /// A frame arrived further out of order than `max_reorder_buffer`
    /// tolerates.
    #[error("flow {flow:?} reorder buffer overflow: seq {seq} while waiting for {expected}")]
    ReorderOverflow {
        /// The flow the frame belonged to.
        flow: String,
        /// Sequence number of the frame that overflowed the buffer.
        seq: u64,
        /// Sequence number the reassembler was still waiting for.
        expected: u64,
    },

    /// A frame arrived with `seq` at or behind one already delivered.
    #[error("flow {flow:?} stale/duplicate seq {seq}, expected {expected}")]
    StaleSeq {
        /// The flow the frame belonged to.
        flow: String,
        /// Sequence number of the stale frame.
        seq: u64,
        /// Sequence number the reassembler is waiting for.
        expected: u64,
    },

    /// A frame arrived whose `seq` is already buffered, out of order.
    #[error("flow {flow:?} duplicate seq {seq} already buffered")]
    DuplicateSeq {
        /// The flow the frame belonged to.
        flow: String,
        /// Sequence number that was already pending.
        seq: u64,
    },

    /// The peer's first frame was not HELLO.
    #[error("handshake error: expected HELLO, got {0:?}")]
    ExpectedHello(bifaci_proto::FrameType),

    /// A peer's first frame did not match the type a protocol stage
    /// requires (e.g. RELAY_NOTIFY when attaching a master).
    #[error("expected {expected:?}, got {got:?}")]
    UnexpectedFrameType {
        /// The frame type required at this point in the exchange.
        expected: bifaci_proto::FrameType,
        /// The frame type actually received.
        got: bifaci_proto::FrameType,
    },

    /// A plugin-role peer's HELLO did not include a manifest, which is
    /// mandatory for that role.
    #[error("handshake error: manifest is mandatory from this role")]
    ManifestRequired,

    /// Identity verification nonce did not round-trip unchanged.
    #[error("identity verification failed: nonce mismatch")]
    IdentityMismatch,

    /// The peer closed the connection before completing the handshake.
    #[error("peer closed connection during handshake")]
    HandshakeClosed,
}

impl CoreError {
    /// Returns true if retrying the operation (e.g. reconnecting) might
    /// succeed. Reorder overflow and handshake/identity failures indicate a
    /// broken or malicious peer and are never transient.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
