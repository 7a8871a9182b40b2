//! Wire-level error types.
//!
//! These are the codec/structural errors from the frame data model.
//! Ordering faults, I/O errors and handshake failures are layered on top
//! in `bifaci-core` — this crate never does I/O.

use thiserror::Error;

/// Errors produced by frame encoding, decoding, and checksum verification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtoError {
    /// CBOR was structurally invalid, or a required field was missing for
    /// the frame's type. The string names the offending field or defect.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// A frame (or the chunk data backing it) exceeded a negotiated limit.
    #[error("frame too large: {len} exceeds limit {limit}")]
    FrameTooLarge {
        /// Length that was rejected.
        len: u64,
        /// Negotiated limit it was checked against.
        limit: u64,
    },

    /// A CHUNK's payload did not match its declared FNV-1a checksum.
    #[error("checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Checksum declared on the frame.
        expected: u64,
        /// Checksum actually computed over the payload.
        actual: u64,
    },
}
