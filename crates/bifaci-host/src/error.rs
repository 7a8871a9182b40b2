//! Errors produced by the plugin host.

use thiserror::Error;

/// Errors from registering, routing to, or spawning subprocess plugins.
#[derive(Error, Debug)]
pub enum HostError {
    /// No registered plugin serves the requested capability.
    #[error("no plugin registered for capability {0}")]
    NoHandler(String),

    /// A request referenced a routing id with no known owning plugin
    /// (the request never existed, or its owning plugin already died).
    #[error("no pending request for routing id {0:?}")]
    UnknownRouting(bifaci_proto::MessageId),

    /// Spawning the plugin subprocess failed.
    #[error("failed to spawn plugin {program}: {source}")]
    Spawn {
        /// Program that failed to spawn.
        program: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A plugin's stdio handles were unexpectedly unavailable.
    #[error("plugin {0} has no stdio pipes")]
    MissingStdio(String),

    /// Core protocol/handshake/transport failure.
    #[error(transparent)]
    Core(#[from] bifaci_core::CoreError),
}
