//! Framed I/O, sequencing, reassembly, handshake and identity verification
//! for the Bifaci protocol. Built on top of the pure data model in
//! `bifaci-proto`.

mod capability;
mod error;
mod handshake;
mod identity;
mod io;
mod manifest;
mod reorder;
mod seq;

pub use capability::{CapabilityMatcher, ExactMatch};
pub use error::CoreError;
pub use handshake::{perform_handshake, HandshakeResult};
pub use identity::{respond_to_identity_request, verify_identity};
pub use io::{FrameReader, FrameWriter};
pub use manifest::{decode_manifest, encode_manifest};
pub use reorder::ReorderBuffer;
pub use seq::{FlowKey, SeqAssigner};
