//! Wire format for the Bifaci frame protocol.
//!
//! This crate is pure data model: CBOR frame encode/decode, message ids,
//! checksums, and negotiated limits. It performs no I/O — see
//! `bifaci-core` for framed reads/writes, sequencing, and the handshake.

mod checksum;
mod error;
mod frame;
mod frame_type;
mod limits;
mod message_id;

pub use checksum::{compute_checksum, FNV_OFFSET_BASIS, FNV_PRIME};
pub use error::ProtoError;
pub use frame::{Frame, LENGTH_PREFIX_SIZE};
pub use frame_type::FrameType;
pub use limits::{Limits, DEFAULT_MAX_CHUNK, DEFAULT_MAX_FRAME, DEFAULT_MAX_REORDER_BUFFER};
pub use message_id::MessageId;

/// Capability URN every peer is expected to serve: identity verification.
pub const CAP_IDENTITY: &str = "urn:bifaci:identity";

/// Fixed nonce used by identity verification. Both sides know it in
/// advance; the verifier checks the peer echoes it back unchanged.
pub const IDENTITY_NONCE: &[u8; 21] = b"capns-identity-verify";
