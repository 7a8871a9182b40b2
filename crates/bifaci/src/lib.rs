//! Bifaci: a capability-routed, length-prefixed CBOR frame protocol for
//! connecting an engine to subprocess plugins and chains of relays.
//!
//! This crate re-exports the full public surface of the protocol split
//! across `bifaci-proto` (wire format), `bifaci-core` (framed I/O,
//! sequencing, handshake), `bifaci-host` (plugin routing) and
//! `bifaci-relay` (relay routing), so most consumers only need to depend
//! on `bifaci` itself.

pub use bifaci_core::{
    decode_manifest, encode_manifest, perform_handshake, respond_to_identity_request,
    verify_identity, CapabilityMatcher, CoreError, ExactMatch, FlowKey, FrameReader, FrameWriter,
    HandshakeResult, ReorderBuffer, SeqAssigner,
};
pub use bifaci_host::{
    new_with_identity, HostError, InProcessHandler, InProcessPluginHost, PluginHost, PluginId,
};
pub use bifaci_proto::{
    compute_checksum, Frame, FrameType, Limits, MessageId, ProtoError, CAP_IDENTITY,
    DEFAULT_MAX_CHUNK, DEFAULT_MAX_FRAME, DEFAULT_MAX_REORDER_BUFFER, IDENTITY_NONCE,
    LENGTH_PREFIX_SIZE,
};
pub use bifaci_relay::{MasterId, RelayError, RelaySwitch};
