//! Errors produced by the relay switch.

use thiserror::Error;

/// Errors from attaching masters to, or routing requests through, a
/// [`crate::RelaySwitch`].
#[derive(Error, Debug)]
pub enum RelayError {
    /// No attached master serves the requested capability.
    #[error("no master relay serves capability {0}")]
    NoHandler(String),

    /// A master failed identity verification when attached.
    #[error("master failed identity verification")]
    IdentityFailed,

    /// A request referenced a routing id with no known owning master.
    #[error("no pending request for routing id {0:?}")]
    UnknownRouting(bifaci_proto::MessageId),

    /// Core protocol/handshake/transport failure.
    #[error(transparent)]
    Core(#[from] bifaci_core::CoreError),
}
